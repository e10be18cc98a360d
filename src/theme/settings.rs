//! Declarative settings schema shared by every configurable theme.
//!
//! A theme publishes an ordered list of [`SettingDecl`]s. A settings UI can
//! render that list without knowing anything about the theme, and whatever
//! values it sends back go through [`SettingsSchema::apply`], which clamps
//! numbers, drops unknown keys, and falls back to defaults for values of the
//! wrong type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of control a setting is, with its constraints and default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettingKind {
    Slider {
        min: f64,
        max: f64,
        step: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
        default: f64,
    },
    Toggle {
        default: bool,
    },
    Dropdown {
        options: Vec<DropdownOption>,
        default: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub value: String,
    pub label: String,
}

/// One entry in a schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettingDecl {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: SettingKind,
}

impl SettingDecl {
    pub fn slider(id: &str, label: &str, min: f64, max: f64, step: f64, default: f64) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: SettingKind::Slider {
                min,
                max,
                step,
                unit: None,
                default,
            },
        }
    }

    /// Attach a display unit to a slider. No effect on other kinds.
    pub fn with_unit(mut self, unit: &str) -> Self {
        if let SettingKind::Slider { unit: u, .. } = &mut self.kind {
            *u = Some(unit.to_string());
        }
        self
    }

    pub fn toggle(id: &str, label: &str, default: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: SettingKind::Toggle { default },
        }
    }

    pub fn dropdown(id: &str, label: &str, options: &[(&str, &str)], default: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: SettingKind::Dropdown {
                options: options
                    .iter()
                    .map(|(value, label)| DropdownOption {
                        value: value.to_string(),
                        label: label.to_string(),
                    })
                    .collect(),
                default: default.to_string(),
            },
        }
    }

    pub fn default_value(&self) -> SettingValue {
        match &self.kind {
            SettingKind::Slider { default, .. } => SettingValue::Number(*default),
            SettingKind::Toggle { default } => SettingValue::Bool(*default),
            SettingKind::Dropdown { default, .. } => SettingValue::Choice(default.clone()),
        }
    }

    /// Coerce `value` into this declaration's constraints, or `None` if it
    /// is the wrong type.
    fn coerce(&self, value: &SettingValue) -> Option<SettingValue> {
        match (&self.kind, value) {
            (SettingKind::Slider { min, max, .. }, SettingValue::Number(n)) if !n.is_nan() => {
                Some(SettingValue::Number(n.clamp(*min, *max)))
            }
            (SettingKind::Toggle { .. }, SettingValue::Bool(b)) => Some(SettingValue::Bool(*b)),
            (SettingKind::Dropdown { options, .. }, SettingValue::Choice(c))
                if options.iter().any(|o| &o.value == c) =>
            {
                Some(SettingValue::Choice(c.clone()))
            }
            _ => None,
        }
    }
}

/// A setting value as it travels to and from a UI or the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(f64),
    Choice(String),
}

pub type SettingValues = BTreeMap<String, SettingValue>;

/// Ordered list of setting declarations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSchema {
    pub settings: Vec<SettingDecl>,
}

impl SettingsSchema {
    pub fn new(settings: Vec<SettingDecl>) -> Self {
        Self { settings }
    }

    pub fn get(&self, id: &str) -> Option<&SettingDecl> {
        self.settings.iter().find(|d| d.id == id)
    }

    pub fn defaults(&self) -> ResolvedSettings {
        ResolvedSettings(
            self.settings
                .iter()
                .map(|d| (d.id.clone(), d.default_value()))
                .collect(),
        )
    }

    /// Merge `patch` onto `current`.
    ///
    /// Unknown keys are ignored. Numbers are clamped to the slider range.
    /// Values of the wrong type, NaN, or unknown dropdown options leave the
    /// current value in place.
    pub fn apply(&self, current: &ResolvedSettings, patch: &SettingValues) -> ResolvedSettings {
        let mut next = self.defaults();
        for decl in &self.settings {
            let value = patch
                .get(&decl.id)
                .and_then(|v| decl.coerce(v))
                .or_else(|| current.0.get(&decl.id).and_then(|v| decl.coerce(v)))
                .unwrap_or_else(|| decl.default_value());
            next.0.insert(decl.id.clone(), value);
        }
        next
    }

    /// Resolve a stored value map on top of the defaults.
    pub fn resolve(&self, values: &SettingValues) -> ResolvedSettings {
        self.apply(&self.defaults(), values)
    }
}

/// A complete, validated value for every setting in a schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResolvedSettings(SettingValues);

impl ResolvedSettings {
    pub fn number(&self, id: &str) -> f64 {
        match self.0.get(id) {
            Some(SettingValue::Number(n)) => *n,
            _ => 0.0,
        }
    }

    pub fn toggle(&self, id: &str) -> bool {
        matches!(self.0.get(id), Some(SettingValue::Bool(true)))
    }

    pub fn choice(&self, id: &str) -> &str {
        match self.0.get(id) {
            Some(SettingValue::Choice(c)) => c,
            _ => "",
        }
    }

    pub fn values(&self) -> &SettingValues {
        &self.0
    }

    /// Ids whose value differs between `self` and `other`.
    pub fn changed_keys<'a>(&'a self, other: &'a ResolvedSettings) -> Vec<&'a str> {
        self.0
            .iter()
            .filter(|(k, v)| other.0.get(*k) != Some(*v))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}
