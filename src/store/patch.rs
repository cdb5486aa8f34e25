//! JSON merge patch (RFC 7386)

use serde_json::{Map, Value};

/// Build the merge patch that turns `original` into `modified`.
///
/// Removed keys become `null`; arrays and scalars are replaced wholesale.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            let mut patch = Map::new();
            for (key, old) in original {
                match modified.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(new) if new != old => {
                        patch.insert(key.clone(), create_merge_patch(old, new));
                    }
                    Some(_) => {}
                }
            }
            for (key, new) in modified {
                if !original.contains_key(key) {
                    patch.insert(key.clone(), new.clone());
                }
            }
            Value::Object(patch)
        }
        _ => modified.clone(),
    }
}

/// Apply a merge patch to `target` in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(fields) = target {
        for (key, value) in entries {
            if value.is_null() {
                fields.remove(key);
            } else {
                apply_merge_patch(fields.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// True when the patch changes nothing
pub fn is_empty_patch(patch: &Value) -> bool {
    matches!(patch, Value::Object(map) if map.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_merge_patch_nested_change() {
        let original = json!({
            "metadata": {"name": "a", "annotations": {"x": "1", "y": "2"}},
            "spec": {"replicas": 1}
        });
        let modified = json!({
            "metadata": {"name": "a", "annotations": {"x": "1", "z": "3"}},
            "spec": {"replicas": 1}
        });

        let patch = create_merge_patch(&original, &modified);
        assert_eq!(
            patch,
            json!({"metadata": {"annotations": {"y": null, "z": "3"}}})
        );
    }

    #[test]
    fn test_apply_merge_patch_rfc_examples() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        apply_merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"a": [1, 2]});
        apply_merge_patch(&mut target, &json!({"a": [3]}));
        assert_eq!(target, json!({"a": [3]}));

        let mut target = json!("scalar");
        apply_merge_patch(&mut target, &json!({"a": {"b": "c"}}));
        assert_eq!(target, json!({"a": {"b": "c"}}));
    }

    #[test]
    fn test_created_patch_reproduces_modified() {
        let original = json!({"a": 1, "b": {"c": [1, 2], "d": "x"}, "gone": true});
        let modified = json!({"a": 2, "b": {"c": [3], "d": "x"}, "new": {"k": "v"}});

        let mut target = original.clone();
        apply_merge_patch(&mut target, &create_merge_patch(&original, &modified));
        assert_eq!(target, modified);
    }

    #[test]
    fn test_is_empty_patch() {
        let doc = json!({"a": 1});
        assert!(is_empty_patch(&create_merge_patch(&doc, &doc)));
        assert!(!is_empty_patch(&json!({"a": 2})));
    }
}
