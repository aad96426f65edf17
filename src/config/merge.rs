//! Deep merge of user configuration over defaults.

use serde_json::Value;

/// Merges `overlay` into `base`.
///
/// Objects merge key by key. Arrays and scalars in `overlay` replace the
/// value in `base`. An explicit `null` in `overlay` leaves `base` untouched.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None if value.is_null() => {}
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_objects_merge_recursively() {
        let mut base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        deep_merge(&mut base, json!({"nested": {"y": 3, "z": 4}}));
        assert_eq!(base, json!({"a": 1, "nested": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn test_arrays_are_replaced() {
        let mut base = json!({"list": [1, 2, 3]});
        deep_merge(&mut base, json!({"list": [9]}));
        assert_eq!(base, json!({"list": [9]}));
    }

    #[test]
    fn test_null_leaves_default() {
        let mut base = json!({"memory": 896, "topic": null});
        deep_merge(&mut base, json!({"memory": null, "extra": null}));
        assert_eq!(base, json!({"memory": 896, "topic": null}));
    }

    #[test]
    fn test_scalar_replaces_object() {
        let mut base = json!({"permissions": {"Statement": []}});
        deep_merge(&mut base, json!({"permissions": "admin"}));
        assert_eq!(base, json!({"permissions": "admin"}));
    }
}
