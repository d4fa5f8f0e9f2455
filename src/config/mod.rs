//! Persisted settings: copy paths, extra tool options, and the schedule.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scheduler::{MAX_INTERVAL_HOURS, MIN_INTERVAL_HOURS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub source: String,
    pub dest: String,
    pub options: String,
    pub schedule_enabled: bool,
    pub interval_hours: u32,
    pub last_run_at: Option<DateTime<Local>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source: String::new(),
            dest: String::new(),
            options: String::new(),
            schedule_enabled: false,
            interval_hours: MIN_INTERVAL_HOURS,
            last_run_at: None,
        }
    }
}

impl Settings {
    pub fn paths_set(&self) -> bool {
        !self.source.trim().is_empty() && !self.dest.trim().is_empty()
    }

    fn clamped(mut self) -> Self {
        self.interval_hours = self
            .interval_hours
            .clamp(MIN_INTERVAL_HOURS, MAX_INTERVAL_HOURS);
        self
    }
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("robowrap")
        .join("settings.json")
}

/// Load settings, falling back to defaults on a missing or unreadable
/// file. A corrupt file is reported but never fatal.
pub fn load(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
            Ok(settings) => settings.clamped(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings file is corrupt, using defaults");
                Settings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read settings, using defaults");
            Settings::default()
        }
    }
}

pub fn save(path: &Path, settings: &Settings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}
