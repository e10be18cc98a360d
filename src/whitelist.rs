//! The set of apps allowed to switch the matrix on automatically.
//!
//! Seeded from [`DEFAULT_APPS`] on first run, then edited by the user and
//! persisted as a plain list of package names. Packages in [`BLACKLIST`]
//! (system and media-adjacent services that publish sessions of their own)
//! can never trigger activation.

use serde::Serialize;
use std::collections::HashSet;

/// `(package, display name, whitelisted by default)`
pub const DEFAULT_APPS: &[(&str, &str, bool)] = &[
    ("com.spotify.music", "Spotify", true),
    ("com.google.android.apps.youtube.music", "YouTube Music", true),
    ("com.apple.android.music", "Apple Music", true),
    ("deezer.android.app", "Deezer", true),
    ("com.aspiro.tidal", "TIDAL", true),
    ("com.amazon.mp3", "Amazon Music", true),
    ("com.soundcloud.android", "SoundCloud", true),
    ("com.pandora.android", "Pandora", false),
    ("com.maxmpz.audioplayer", "Poweramp", false),
    ("org.videolan.vlc", "VLC", false),
    ("com.google.android.youtube", "YouTube", false),
    ("au.com.shiftyjelly.pocketcasts", "Pocket Casts", false),
];

/// Packages that never count as "the app that is playing".
pub const BLACKLIST: &[&str] = &[
    "android",
    "com.android.systemui",
    "com.android.bluetooth",
    "com.google.android.gms",
    "com.google.android.googlequicksearchbox",
    "com.google.android.as",
    "com.android.server.telecom",
];

pub fn is_blacklisted(package: &str) -> bool {
    BLACKLIST.contains(&package)
}

/// Human-readable name for a package, falling back to the package name.
pub fn display_name_for(package: &str) -> String {
    DEFAULT_APPS
        .iter()
        .find(|(p, _, _)| *p == package)
        .map(|(_, name, _)| name.to_string())
        .unwrap_or_else(|| package.to_string())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct WhitelistEntry {
    pub package_name: String,
    pub display_name: String,
    pub is_whitelisted: bool,
    pub is_installed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Whitelist {
    entries: Vec<WhitelistEntry>,
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Whitelist {
    pub fn with_defaults() -> Self {
        Self {
            entries: DEFAULT_APPS
                .iter()
                .map(|(package, name, whitelisted)| WhitelistEntry {
                    package_name: package.to_string(),
                    display_name: name.to_string(),
                    is_whitelisted: *whitelisted,
                    is_installed: false,
                })
                .collect(),
        }
    }

    /// Rebuild from a persisted package list. `None` means never saved.
    pub fn from_saved(saved: Option<Vec<String>>) -> Self {
        let mut whitelist = Self::with_defaults();
        let Some(saved) = saved else {
            return whitelist;
        };

        let saved: HashSet<String> = saved.into_iter().filter(|p| !p.is_empty()).collect();
        for entry in &mut whitelist.entries {
            entry.is_whitelisted = saved.contains(&entry.package_name);
        }
        let mut extra: Vec<&String> = saved
            .iter()
            .filter(|p| !whitelist.entries.iter().any(|e| &e.package_name == *p))
            .collect();
        extra.sort();
        for package in extra {
            whitelist.entries.push(WhitelistEntry {
                package_name: package.clone(),
                display_name: display_name_for(package),
                is_whitelisted: true,
                is_installed: false,
            });
        }
        whitelist
    }

    pub fn entries(&self) -> &[WhitelistEntry] {
        &self.entries
    }

    pub fn is_whitelisted(&self, package: &str) -> bool {
        !is_blacklisted(package)
            && self
                .entries
                .iter()
                .any(|e| e.package_name == package && e.is_whitelisted)
    }

    /// Toggle a package. Unknown packages are added. Returns `true` if the
    /// effective state changed.
    pub fn set_whitelisted(&mut self, package: &str, whitelisted: bool) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.package_name == package) {
            let changed = entry.is_whitelisted != whitelisted;
            entry.is_whitelisted = whitelisted;
            return changed;
        }
        if !whitelisted {
            return false;
        }
        self.entries.push(WhitelistEntry {
            package_name: package.to_string(),
            display_name: display_name_for(package),
            is_whitelisted: true,
            is_installed: false,
        });
        true
    }

    /// Whitelisted package names, for persistence.
    pub fn packages(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.is_whitelisted)
            .map(|e| e.package_name.clone())
            .collect()
    }

    pub fn refresh_installed(&mut self, installed: &HashSet<String>) {
        for entry in &mut self.entries {
            entry.is_installed = installed.contains(&entry.package_name);
        }
    }
}
