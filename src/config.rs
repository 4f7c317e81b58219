use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the cache database and the JSON status documents.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Name the remote store uses for the inbox.
    #[serde(default = "default_inbox")]
    pub inbox: String,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Ids per header fetch in phase 1.
    pub header_chunk: usize,
    /// Ids per full fetch in phase 2.
    pub body_chunk: usize,
    /// How many of the newest cached ids get their flags refreshed in phase 3.
    pub flag_window: usize,
    /// Ad folder created and used when the listing has none.
    pub ad_folder_fallback: String,
    /// Sync a rule's target folder right after routing mail into it.
    pub follow_routed: bool,
    /// Trigger a background sync whenever a folder view is loaded.
    pub sync_on_view: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            header_chunk: 50,
            body_chunk: 100,
            flag_window: 100,
            ad_folder_fallback: "INBOX.Reklam".to_string(),
            follow_routed: true,
            sync_on_view: true,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            inbox: default_inbox(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Load `settings.toml` from the working directory, falling back to defaults.
    pub fn load() -> Self {
        match Self::load_from(SETTINGS_FILE) {
            Ok(config) => config,
            Err(e) => {
                if Path::new(SETTINGS_FILE).exists() {
                    warn!("Ignoring unreadable {}: {}", SETTINGS_FILE, e);
                }
                Self::default()
            }
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("mailmirror.db")
    }

    pub fn is_inbox(&self, folder: &str) -> bool {
        folder.eq_ignore_ascii_case(&self.inbox)
    }
}
