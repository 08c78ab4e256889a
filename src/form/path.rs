use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use log::warn;
use serde_json::{Map, Value};

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldPath(Cow<'static, str>);

impl FieldPath {
    pub const fn from_static(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }

    pub fn new(value: impl Into<String>) -> Self {
        Self(Cow::Owned(value.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> Vec<PathSegment> {
        parse_path(&self.0)
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FieldPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for FieldPath {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&FieldPath> for FieldPath {
    fn from(value: &FieldPath) -> Self {
        value.clone()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    fn key(&self) -> Cow<'_, str> {
        match self {
            PathSegment::Key(key) => Cow::Borrowed(key),
            PathSegment::Index(index) => Cow::Owned(index.to_string()),
        }
    }
}

/// Splits `a.b[0]["c"]` style paths into key and index segments.
pub fn parse_path(path: &str) -> Vec<PathSegment> {
    path.split(['.', '[', ']'])
        .map(|raw| raw.trim_matches(|c| c == '"' || c == '\''))
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            if raw.bytes().all(|byte| byte.is_ascii_digit()) {
                raw.parse::<usize>()
                    .map(PathSegment::Index)
                    .unwrap_or_else(|_| PathSegment::Key(raw.to_string()))
            } else {
                PathSegment::Key(raw.to_string())
            }
        })
        .collect()
}

pub fn get_in<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    parse_path(path)
        .iter()
        .try_fold(tree, |node, segment| child(node, segment))
}

/// Returns a copy of `tree` with the leaf at `path` replaced, or removed when
/// `value` is `None`.
pub fn set_in(tree: &Value, path: &str, value: Option<Value>) -> Value {
    if get_in(tree, path) == value.as_ref() {
        return tree.clone();
    }
    let mut next = tree.clone();
    set_in_place(&mut next, path, value);
    next
}

/// Writes or removes the leaf at `path` in place. Returns `false` when the
/// path is rejected: it is empty, or an index lies too far past an array's end.
pub fn set_in_place(tree: &mut Value, path: &str, value: Option<Value>) -> bool {
    let segments = parse_path(path);
    if segments.is_empty() {
        warn!("ignoring write to an empty field path");
        return false;
    }
    match value {
        Some(value) => write_at(tree, &segments, value),
        None => {
            remove_at(tree, &segments);
            true
        }
    }
}

/// Mirrors the container shape of `values` with every leaf set to `true`.
pub fn set_nested_all_true(values: &Value) -> Value {
    match values {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), set_nested_all_true(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(set_nested_all_true).collect()),
        _ => Value::Bool(true),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(super) fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

pub(super) fn empty_tree() -> Value {
    Value::Object(Map::new())
}

fn child<'a>(node: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    match (node, segment) {
        (Value::Object(map), segment) => map.get(segment.key().as_ref()),
        (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
        _ => None,
    }
}

fn empty_container_for(segment: &PathSegment) -> Value {
    match segment {
        PathSegment::Index(_) => Value::Array(Vec::new()),
        PathSegment::Key(_) => empty_tree(),
    }
}

fn prepare_container(node: &mut Value, segment: &PathSegment) {
    let replacement = match (&*node, segment) {
        (Value::Object(_), _) | (Value::Array(_), PathSegment::Index(_)) => return,
        (Value::Array(items), PathSegment::Key(key)) => {
            warn!("field path key `{key}` addresses an array; converting it to an object");
            Value::Object(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), item.clone()))
                    .collect(),
            )
        }
        (_, segment) => empty_container_for(segment),
    };
    *node = replacement;
}

/// Padding an array may receive from a single indexed write.
const MAX_ARRAY_PADDING: usize = 10_000;

fn within_padding_limit(tree: &Value, segments: &[PathSegment]) -> bool {
    let mut node = Some(tree);
    for segment in segments {
        if let PathSegment::Index(index) = segment {
            let len = match node {
                Some(Value::Object(_)) => None,
                Some(Value::Array(items)) => Some(items.len()),
                _ => Some(0),
            };
            if len.is_some_and(|len| index.saturating_sub(len) > MAX_ARRAY_PADDING) {
                return false;
            }
        }
        node = node.and_then(|node| child(node, segment));
    }
    true
}

fn write_at(tree: &mut Value, segments: &[PathSegment], value: Value) -> bool {
    if !within_padding_limit(tree, segments) {
        warn!("ignoring write to an index more than {MAX_ARRAY_PADDING} past an array's end");
        return false;
    }
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let mut node = tree;
    for (index, segment) in parents.iter().enumerate() {
        let slot = slot_mut(node, segment);
        if !is_container(slot) {
            *slot = empty_container_for(&segments[index + 1]);
        }
        node = slot;
    }
    *slot_mut(node, last) = value;
    true
}

// Callers check the padding limit first.
fn slot_mut<'a>(node: &'a mut Value, segment: &PathSegment) -> &'a mut Value {
    prepare_container(node, segment);
    match (node, segment) {
        (Value::Array(items), PathSegment::Index(index)) => {
            if items.len() <= *index {
                items.resize(index.saturating_add(1), Value::Null);
            }
            &mut items[*index]
        }
        // prepare_container leaves an object for every other combination.
        (node, segment) => &mut node[segment.key().as_ref()],
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &PathSegment) -> Option<&'a mut Value> {
    match (node, segment) {
        (Value::Object(map), segment) => map.get_mut(segment.key().as_ref()),
        (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index),
        _ => None,
    }
}

/// Removes the leaf, then prunes ancestors the removal left vacant. Missing
/// branches are left alone.
fn remove_at(node: &mut Value, segments: &[PathSegment]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return remove_leaf(node, first);
    }
    let Some(branch) = child_mut(node, first) else {
        return false;
    };
    if !remove_at(branch, rest) {
        return false;
    }
    if is_vacant(branch) {
        remove_leaf(node, first);
    }
    true
}

fn is_vacant(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.iter().all(Value::is_null),
        _ => false,
    }
}

fn remove_leaf(node: &mut Value, segment: &PathSegment) -> bool {
    match (node, segment) {
        (Value::Object(map), segment) => map.remove(segment.key().as_ref()).is_some(),
        (Value::Array(items), PathSegment::Index(index)) => match items.get_mut(*index) {
            Some(slot) if !slot.is_null() => {
                *slot = Value::Null;
                true
            }
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn parses_dotted_and_bracketed_segments() {
        assert_eq!(
            parse_path("items[2].name"),
            vec![
                PathSegment::Key("items".into()),
                PathSegment::Index(2),
                PathSegment::Key("name".into()),
            ]
        );
        assert_eq!(parse_path("a.0"), parse_path("a[0]"));
        assert_eq!(
            parse_path("map[\"key\"]"),
            vec![
                PathSegment::Key("map".into()),
                PathSegment::Key("key".into())
            ]
        );
    }

    #[test]
    fn get_in_returns_none_for_missing_branches() {
        let tree = json!({"address": {"street": "Main"}, "items": [{"name": "a"}]});
        assert_eq!(get_in(&tree, "address.street"), Some(&json!("Main")));
        assert_eq!(get_in(&tree, "items[0].name"), Some(&json!("a")));
        assert_eq!(get_in(&tree, "items[3].name"), None);
        assert_eq!(get_in(&tree, "address.street.number"), None);
        assert_eq!(get_in(&tree, "missing.deep.path"), None);
    }

    #[test]
    fn set_in_creates_arrays_for_numeric_segments() {
        let tree = set_in(&json!({}), "items[2].name", Some(json!("c")));
        assert_eq!(tree, json!({"items": [null, null, {"name": "c"}]}));

        let tree = set_in(&json!({}), "address.street", Some(json!("Main")));
        assert_eq!(tree, json!({"address": {"street": "Main"}}));
    }

    #[test]
    fn set_in_leaves_input_untouched() {
        let original = json!({"a": {"b": 1}, "c": [1, 2]});
        let next = set_in(&original, "a.b", Some(json!(2)));
        assert_eq!(original, json!({"a": {"b": 1}, "c": [1, 2]}));
        assert_eq!(next, json!({"a": {"b": 2}, "c": [1, 2]}));
    }

    #[test]
    fn removing_a_leaf_keeps_siblings_and_skips_missing_branches() {
        let tree = json!({"a": {"b": "x", "c": "y"}});
        assert_eq!(set_in(&tree, "a.b", None), json!({"a": {"c": "y"}}));
        assert_eq!(set_in(&tree, "z.q", None), tree);
    }

    #[test]
    fn removing_the_last_leaf_prunes_vacant_parents() {
        let tree = json!({"address": {"street": "Required"}, "items": [{"name": "x"}]});
        let tree = set_in(&tree, "address.street", None);
        assert_eq!(tree, json!({"items": [{"name": "x"}]}));
        assert_eq!(set_in(&tree, "items[0].name", None), json!({}));

        let nested = json!({"a": {"b": {"c": 1}, "d": 2}});
        assert_eq!(set_in(&nested, "a.b.c", None), json!({"a": {"d": 2}}));
    }

    #[test]
    fn far_out_of_range_indices_are_rejected() {
        let mut tree = json!({"items": [1]});
        assert!(!set_in_place(&mut tree, "items[18446744073709551615]", Some(json!("x"))));
        assert!(!set_in_place(&mut tree, "fresh[4000000000].name", Some(json!("x"))));
        assert_eq!(tree, json!({"items": [1]}));

        assert!(set_in_place(&mut tree, "items[3]", Some(json!(4))));
        assert_eq!(tree, json!({"items": [1, null, null, 4]}));
    }

    #[test]
    fn empty_path_writes_nothing() {
        let mut tree = json!({"a": 1});
        assert!(!set_in_place(&mut tree, "", Some(json!(2))));
        assert!(!set_in_place(&mut tree, "..[]", None));
        assert_eq!(tree, json!({"a": 1}));
    }

    #[test]
    fn scalar_intermediates_are_replaced_by_containers() {
        let tree = set_in(&json!({"a": "text"}), "a.b", Some(json!(true)));
        assert_eq!(tree, json!({"a": {"b": true}}));
    }

    #[test]
    fn key_segment_against_array_converts_to_object() {
        let tree = set_in(&json!({"a": [1, 2]}), "a.extra", Some(json!(3)));
        assert_eq!(tree, json!({"a": {"0": 1, "1": 2, "extra": 3}}));
    }

    #[test]
    fn nested_all_true_mirrors_shape() {
        let values = json!({
            "email": "a@b.c",
            "address": {"street": "", "zip": null},
            "friends": [{"name": "x"}, "y"],
        });
        assert_eq!(
            set_nested_all_true(&values),
            json!({
                "email": true,
                "address": {"street": true, "zip": true},
                "friends": [{"name": true}, true],
            })
        );
    }

    #[test]
    fn truthiness_matches_form_semantics() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("required")));
        assert!(is_truthy(&json!({})));
    }

    fn segment_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-c]{1,3}".prop_map(|key| format!(".{key}")),
            (0usize..4).prop_map(|index| format!("[{index}]")),
        ]
    }

    proptest! {
        #[test]
        fn get_after_set_returns_written_value(
            segments in proptest::collection::vec(segment_strategy(), 1..5),
            leaf in prop_oneof![any::<i64>().prop_map(Value::from), "[a-z]{0,6}".prop_map(Value::from)],
        ) {
            let base = json!({"a": {"b": [1, 2]}, "c": "scalar"});
            let path = segments.concat();
            let written = set_in(&base, &path, Some(leaf.clone()));
            prop_assert_eq!(get_in(&written, &path), Some(&leaf));
            prop_assert_eq!(set_in(&base, &path, Some(leaf)), written);
        }
    }
}
