//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

use batchd_worker::MAX_CACHE_FOLDERS;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Root of the result cache (default: "var/cache/batchd")
    pub cache_folder: String,

    /// Numbered entries allowed per bucket (default: 10000)
    pub cache_max_folders: u64,

    /// Seconds to wait for outputs after success is reported (default: 60)
    pub output_timeout_seconds: u64,

    /// Output poll interval in milliseconds (default: 100)
    pub poll_interval_ms: u64,

    /// Dispatch priority for submitted work (default: 5)
    pub dispatch_priority: i64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            cache_folder: "var/cache/batchd".to_string(),
            cache_max_folders: MAX_CACHE_FOLDERS as u64,
            output_timeout_seconds: 60,
            poll_interval_ms: 100,
            dispatch_priority: i64::from(batchd_protocol::DEFAULT_PRIORITY),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "cache": {
                "folder": self.cache_folder,
                "max_folders": self.cache_max_folders
            },
            "wait": {
                "output_timeout_seconds": self.output_timeout_seconds,
                "poll_interval_ms": self.poll_interval_ms
            },
            "dispatch": {
                "priority": self.dispatch_priority
            }
        })
    }
}
