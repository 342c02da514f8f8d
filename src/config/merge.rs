//! Field-by-field merging of configuration tiers.
//!
//! Objects merge recursively; every other value (arrays included) is
//! replaced wholesale by the higher tier.

use serde_json::Value;

/// Merge `overlay` onto `base`, with `overlay` taking precedence.
///
/// A null in the overlay means "not specified" and keeps the base value.
///
/// ```
/// use serde_json::json;
/// use task_store_engine::config::deep_merge;
///
/// let defaults = json!({
///     "store": { "path": "task-store/tasks.json", "mirror_path": null },
///     "cache": { "capacity": 500, "stale_after_ms": 300000 }
/// });
/// let project = json!({
///     "store": { "path": "board.json" },
///     "cache": { "capacity": null, "stale_after_ms": 1000 }
/// });
/// let merged = deep_merge(defaults, project);
/// assert_eq!(merged["store"]["path"], "board.json");
/// assert_eq!(merged["cache"]["capacity"], 500);
/// assert_eq!(merged["cache"]["stale_after_ms"], 1000);
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Fold [`deep_merge`] over tiers ordered lowest to highest priority.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}
