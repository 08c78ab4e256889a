use serde_json::Value;

use super::path::{empty_tree, is_container};

/// Folds `trees` left to right with [`deep_merge`], starting from an empty object.
pub fn deep_merge_all(trees: &[Value]) -> Value {
    trees
        .iter()
        .fold(empty_tree(), |merged, tree| deep_merge(&merged, tree))
}

/// Merges `source` over `target`. Objects merge by key, arrays merge by position,
/// and anything else is replaced by `source`.
pub fn deep_merge(target: &Value, source: &Value) -> Value {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            let mut merged = target.clone();
            for (key, incoming) in source {
                let next = match merged.get(key) {
                    Some(existing) if is_container(incoming) && !existing.is_null() => {
                        deep_merge(existing, incoming)
                    }
                    _ => incoming.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (Value::Array(target), Value::Array(source)) => Value::Array(merge_arrays(target, source)),
        (_, source) => source.clone(),
    }
}

fn merge_arrays(target: &[Value], source: &[Value]) -> Vec<Value> {
    let mut merged = target.to_vec();
    for (index, incoming) in source.iter().enumerate() {
        let slot_is_empty = merged.get(index).is_none_or(Value::is_null);
        if slot_is_empty {
            if merged.len() <= index {
                merged.resize(index + 1, Value::Null);
            }
            merged[index] = incoming.clone();
        } else if is_container(incoming) {
            let existing = target.get(index).unwrap_or(&Value::Null);
            merged[index] = deep_merge(existing, incoming);
        } else if !target.contains(incoming) {
            merged.push(incoming.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_sources_win_at_leaves() {
        let merged = deep_merge_all(&[json!({"a": "x"}), json!({}), json!({"a": "y"})]);
        assert_eq!(merged, json!({"a": "y"}));
    }

    #[test]
    fn objects_merge_by_key() {
        let merged = deep_merge_all(&[
            json!({"address": {"street": "required"}}),
            json!({"address": {"zip": "invalid"}, "email": "taken"}),
        ]);
        assert_eq!(
            merged,
            json!({
                "address": {"street": "required", "zip": "invalid"},
                "email": "taken",
            })
        );
    }

    #[test]
    fn arrays_merge_positionally() {
        let merged = deep_merge(
            &json!({"friends": [{"name": "required"}, null]}),
            &json!({"friends": [{"age": "too young"}, {"name": "required"}]}),
        );
        assert_eq!(
            merged,
            json!({"friends": [
                {"name": "required", "age": "too young"},
                {"name": "required"},
            ]})
        );
    }

    #[test]
    fn scalar_array_elements_are_not_duplicated() {
        let merged = deep_merge(&json!(["a", "b"]), &json!(["b", "c", "a"]));
        assert_eq!(merged, json!(["a", "b", "c"]));
    }

    #[test]
    fn incoming_container_replaces_scalar_element() {
        let merged = deep_merge(&json!(["too short"]), &json!([{"name": "required"}]));
        assert_eq!(merged, json!([{"name": "required"}]));
    }

    #[test]
    fn mismatched_kinds_take_the_source() {
        assert_eq!(deep_merge(&json!({"a": 1}), &json!([1])), json!([1]));
        assert_eq!(deep_merge(&json!([1]), &json!({"a": 1})), json!({"a": 1}));
    }
}
