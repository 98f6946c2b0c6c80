//! Layer merging for `cache`, `wait` and `dispatch` settings.
//!
//! Tables combine key by key, so a project file setting only
//! `cache.max_folders` keeps the host's `cache.folder`. Anything that is not
//! a table on both sides is taken from the later layer as a whole.

use serde_json::Value;

/// Overlay `overlay` onto `base` and return the result.
///
/// A `null` in the overlay clears the base value.
pub fn deep_merge(mut base: Value, overlay: Value) -> Value {
    merge_into(&mut base, overlay);
    base
}

fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(section), Value::Object(overrides)) => {
            for (key, value) in overrides {
                match section.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        section.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Fold builtin, host, project and CLI layers, later ones winning.
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = deep_merge(json!({"priority": 5}), json!({"priority": 9}));
        assert_eq!(result["priority"], 9);
    }

    #[test]
    fn test_object_deep_merge() {
        let base = json!({
            "wait": {
                "output_timeout_seconds": 60,
                "poll_interval_ms": 100
            }
        });
        let overlay = json!({
            "wait": {
                "output_timeout_seconds": 5
            }
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["wait"]["output_timeout_seconds"], 5);
        assert_eq!(result["wait"]["poll_interval_ms"], 100);
    }

    #[test]
    fn test_array_replace() {
        let base = json!({"inputs": ["a.raw", "b.raw", "c.raw"]});
        let overlay = json!({"inputs": ["z.raw"]});
        let result = deep_merge(base, overlay);

        assert_eq!(result["inputs"], json!(["z.raw"]));
    }

    #[test]
    fn test_null_override() {
        let result = deep_merge(json!({"value": 100}), json!({"value": null}));
        assert!(result["value"].is_null());
    }

    #[test]
    fn test_merge_layers() {
        let builtin = json!({
            "cache": {"folder": "var/cache/batchd", "max_folders": 10000},
            "dispatch": {"priority": 5}
        });
        let host = json!({"cache": {"folder": "/srv/cache"}});
        let project = json!({"cache": {"max_folders": 50}});
        let cli = json!({"cache": {"folder": "/tmp/cache"}});

        let result = merge_layers(vec![builtin, host, project, cli]);

        assert_eq!(result["cache"]["folder"], "/tmp/cache");
        assert_eq!(result["cache"]["max_folders"], 50);
        assert_eq!(result["dispatch"]["priority"], 5);
    }
}
