//! Runtime settings.
//!
//! Settings live in the same JSON document as the rules; unknown keys
//! (including `"rules"`) are ignored here and every field has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::conversation::{EvictionConfig, DEFAULT_SEGMENT_COUNT};
use crate::error::{ConfigError, ConfigResult};

/// Largest settings or rule file accepted, in bytes.
pub const MAX_FILE_SIZE: u64 = 40_960_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of tracked conversations
    pub max_conversation: u32,

    /// Seconds of inactivity after which a conversation is forgotten
    pub max_inactive_conversation_life_time: u32,

    /// Lock segments in the conversation table
    pub segment_count: usize,

    /// Milliseconds between eviction ticks
    pub eviction_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_conversation: 64_000,
            max_inactive_conversation_life_time: 3600,
            segment_count: DEFAULT_SEGMENT_COUNT,
            eviction_interval_ms: 100,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::from_json(&read_bounded(path)?)
    }

    pub fn eviction_config(&self) -> EvictionConfig {
        EvictionConfig {
            interval: Duration::from_millis(self.eviction_interval_ms.max(1)),
            enabled: true,
        }
    }
}

/// Reads a whole file, refusing anything over [`MAX_FILE_SIZE`].
pub(crate) fn read_bounded<P: AsRef<Path>>(path: P) -> ConfigResult<String> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)?.len();
    if size > MAX_FILE_SIZE {
        return Err(ConfigError::FileTooLarge(size));
    }
    Ok(std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_conversation, 64_000);
        assert_eq!(settings.max_inactive_conversation_life_time, 3600);
        assert_eq!(settings.eviction_config().interval, Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = Settings::from_json(
            r#"{"max_conversation": 10, "rules": [], "gw_mode": true}"#,
        )
        .unwrap();
        assert_eq!(settings.max_conversation, 10);
        assert_eq!(settings.max_inactive_conversation_life_time, 3600);
        assert_eq!(settings.segment_count, DEFAULT_SEGMENT_COUNT);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_inactive_conversation_life_time": 60, "segment_count": 128}}"#).unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.max_inactive_conversation_life_time, 60);
        assert_eq!(settings.segment_count, 128);
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            Settings::load("/nonexistent/settings.json"),
            Err(ConfigError::Io(_))
        ));
        assert!(matches!(Settings::from_json("{"), Err(ConfigError::Json(_))));
    }
}
