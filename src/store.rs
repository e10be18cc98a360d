//! Persisted state: rotation phase, whitelist, theme settings and a few
//! preferences, kept in one JSON document.
//!
//! Loading is tolerant. Each top-level key is decoded on its own, so a
//! corrupted entry is discarded (and logged) while the rest of the file is
//! still used. A file that is not JSON at all yields defaults.
//!
//! ## Rust concepts
//! - `serde_json::Value` as an intermediate for partial decoding
//! - Write-to-temp-then-rename for atomic saves
//! - `Mutex` poisoning recovery with `into_inner`

use crate::error::StoreError;
use crate::shake::ShakeSettings;
use crate::theme::rotation::RotationSnapshot;
use crate::theme::settings::SettingValues;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Everything this engine persists between runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationSnapshot>,
    /// `None` until the user has edited the whitelist once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub theme_settings: BTreeMap<String, SettingValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_start_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shake: Option<ShakeSettings>,
}

impl PersistedState {
    /// Decode a document key by key, dropping anything malformed.
    pub fn from_json_lenient(text: &str) -> Self {
        let root = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                tracing::warn!("Persisted state is not a JSON object, using defaults");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!("Persisted state is corrupt ({}), using defaults", e);
                return Self::default();
            }
        };

        Self {
            rotation: field(&root, "rotation"),
            whitelist: field(&root, "whitelist"),
            theme_settings: theme_settings(&root),
            selected_theme: field(&root, "selected_theme"),
            auto_start_enabled: field(&root, "auto_start_enabled"),
            shake: field(&root, "shake"),
        }
    }
}

fn field<T: DeserializeOwned>(root: &Map<String, Value>, key: &str) -> Option<T> {
    let value = root.get(key)?;
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Discarding corrupt persisted '{}': {}", key, e);
            None
        }
    }
}

fn theme_settings(root: &Map<String, Value>) -> BTreeMap<String, SettingValues> {
    let Some(Value::Object(themes)) = root.get("theme_settings") else {
        return BTreeMap::new();
    };

    let mut out = BTreeMap::new();
    for (theme_id, values) in themes {
        let Value::Object(values) = values else {
            tracing::warn!("Discarding corrupt settings for theme '{}'", theme_id);
            continue;
        };
        let mut parsed = SettingValues::new();
        for (key, value) in values {
            match serde_json::from_value(value.clone()) {
                Ok(v) => {
                    parsed.insert(key.clone(), v);
                }
                Err(_) => {
                    tracing::warn!("Discarding corrupt setting '{}.{}'", theme_id, key);
                }
            }
        }
        out.insert(theme_id.clone(), parsed);
    }
    out
}

/// Shared handle to the persisted state. In-memory when no path is given.
#[derive(Debug)]
pub struct StateStore {
    path: Option<PathBuf>,
    state: Mutex<PersistedState>,
}

impl StateStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(PersistedState::default()),
        }
    }

    /// Open (or lazily create) a store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(text) => PersistedState::from_json_lenient(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                tracing::warn!("Could not read {}: {}, using defaults", path.display(), e);
                PersistedState::default()
            }
        };
        Self {
            path: Some(path),
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, PersistedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> PersistedState {
        self.lock().clone()
    }

    /// Mutate the state and write it out.
    pub fn update(&self, f: impl FnOnce(&mut PersistedState)) -> Result<(), StoreError> {
        let snapshot = {
            let mut state = self.lock();
            f(&mut state);
            state.clone()
        };
        self.write(&snapshot)
    }

    /// Like [`update`](Self::update), but a failed write is only logged.
    pub fn update_logged(&self, what: &str, f: impl FnOnce(&mut PersistedState)) {
        if let Err(e) = self.update(f) {
            tracing::warn!("Failed to persist {}: {}", what, e);
        }
    }

    fn write(&self, state: &PersistedState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    // ── Typed accessors ──────────────────────────────────────────────

    pub fn rotation(&self) -> Option<RotationSnapshot> {
        self.lock().rotation
    }

    pub fn save_rotation(&self, snapshot: RotationSnapshot) {
        self.update_logged("rotation phase", |s| s.rotation = Some(snapshot));
    }

    pub fn whitelist(&self) -> Option<Vec<String>> {
        self.lock().whitelist.clone()
    }

    pub fn save_whitelist(&self, packages: Vec<String>) {
        self.update_logged("whitelist", |s| s.whitelist = Some(packages));
    }

    pub fn theme_settings(&self, theme_id: &str) -> Option<SettingValues> {
        self.lock().theme_settings.get(theme_id).cloned()
    }

    pub fn save_theme_settings(&self, theme_id: &str, values: SettingValues) {
        self.update_logged("theme settings", |s| {
            s.theme_settings.insert(theme_id.to_string(), values);
        });
    }

    pub fn selected_theme(&self) -> Option<String> {
        self.lock().selected_theme.clone()
    }

    pub fn save_selected_theme(&self, theme_id: &str) {
        self.update_logged("selected theme", |s| {
            s.selected_theme = Some(theme_id.to_string())
        });
    }

    pub fn auto_start_enabled(&self) -> Option<bool> {
        self.lock().auto_start_enabled
    }

    pub fn save_auto_start_enabled(&self, enabled: bool) {
        self.update_logged("auto-start flag", |s| s.auto_start_enabled = Some(enabled));
    }

    pub fn shake(&self) -> Option<ShakeSettings> {
        self.lock().shake.clone()
    }

    pub fn save_shake(&self, settings: ShakeSettings) {
        self.update_logged("shake settings", |s| s.shake = Some(settings));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::settings::SettingValue;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::open(tmp.path().join("state.json"));
        assert_eq!(store.snapshot(), PersistedState::default());
    }

    #[test]
    fn saved_state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        let store = StateStore::open(&path);
        store.save_rotation(RotationSnapshot {
            angle: 42.0,
            is_paused: true,
            start_time_ms: 0,
        });
        store.save_whitelist(vec!["app.a".into(), "app.b".into()]);
        let mut values = SettingValues::new();
        values.insert("brightness".into(), SettingValue::Number(0.5));
        store.save_theme_settings("album_art", values.clone());
        store.save_selected_theme("pulse");

        let reopened = StateStore::open(&path);
        assert_eq!(reopened.rotation().map(|r| r.angle), Some(42.0));
        assert_eq!(
            reopened.whitelist(),
            Some(vec!["app.a".to_string(), "app.b".to_string()])
        );
        assert_eq!(reopened.theme_settings("album_art"), Some(values));
        assert_eq!(reopened.selected_theme().as_deref(), Some("pulse"));
        assert!(!tmp.path().join("state.tmp").exists());
    }

    #[test]
    fn corrupt_key_is_dropped_and_rest_kept() {
        let state = PersistedState::from_json_lenient(
            r#"{
                "rotation": {"angle": "not a number"},
                "whitelist": ["app.a"],
                "theme_settings": {
                    "pulse": {"brightness": 200, "bad": null},
                    "broken": 17
                }
            }"#,
        );
        assert_eq!(state.rotation, None);
        assert_eq!(state.whitelist, Some(vec!["app.a".to_string()]));
        assert_eq!(
            state.theme_settings["pulse"].get("brightness"),
            Some(&SettingValue::Number(200.0))
        );
        assert!(!state.theme_settings["pulse"].contains_key("bad"));
        assert!(!state.theme_settings.contains_key("broken"));
    }

    #[test]
    fn garbage_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        std::fs::write(&path, "{{{{ nope").unwrap();
        let store = StateStore::open(&path);
        assert_eq!(store.snapshot(), PersistedState::default());
    }

    #[test]
    fn in_memory_store_keeps_values_without_a_file() {
        let store = StateStore::in_memory();
        store.save_auto_start_enabled(false);
        assert_eq!(store.auto_start_enabled(), Some(false));
        assert!(store.path().is_none());
    }
}
