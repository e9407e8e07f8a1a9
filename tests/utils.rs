//! Integration tests for the JSON helpers consumed by the expression
//! evaluator and state merge path.

use serde_json::json;

use threadengine::utils::json_ext::{
    deep_merge, get_by_path, has_structure, merge_multiple, set_by_path, JsonError, JsonValueExt,
    MergeStrategy,
};

#[test]
fn deep_merge_recurses_into_nested_objects() {
    let left = json!({"a": 1, "b": {"x": 10}});
    let right = json!({"b": {"y": 20}, "c": 3});

    let merged = deep_merge(&left, &right, MergeStrategy::DeepMerge).unwrap();
    assert_eq!(merged, json!({"a": 1, "b": {"x": 10, "y": 20}, "c": 3}));
}

#[test]
fn deep_merge_prefer_left_keeps_the_left_scalar_on_conflict() {
    let left = json!({"a": 1});
    let right = json!({"a": 2});

    let merged = deep_merge(&left, &right, MergeStrategy::PreferLeft).unwrap();
    assert_eq!(merged, json!({"a": 1}));
}

#[test]
fn deep_merge_fail_on_conflict_reports_the_path_and_types() {
    let left = json!({"a": {"b": 1}});
    let right = json!({"a": {"b": "two"}});

    let err = deep_merge(&left, &right, MergeStrategy::FailOnConflict).unwrap_err();
    match err {
        JsonError::MergeConflict { path, left_type, right_type } => {
            assert_eq!(path, "a.b");
            assert_eq!(left_type, "number");
            assert_eq!(right_type, "string");
        }
        other => panic!("expected MergeConflict, got {other:?}"),
    }
}

#[test]
fn deep_merge_arrays_concatenate_under_deep_merge() {
    let left = json!({"items": [1, 2]});
    let right = json!({"items": [3]});

    let merged = deep_merge(&left, &right, MergeStrategy::DeepMerge).unwrap();
    assert_eq!(merged, json!({"items": [1, 2, 3]}));
}

#[test]
fn merge_multiple_folds_left_to_right() {
    let values = vec![json!({"a": 1}), json!({"b": 2}), json!({"a": 3})];
    let merged = merge_multiple(values.iter(), MergeStrategy::DeepMerge).unwrap();
    assert_eq!(merged, json!({"a": 3, "b": 2}));
}

#[test]
fn get_by_path_walks_objects_and_arrays() {
    let data = json!({"user": {"tags": ["admin", "owner"]}});
    assert_eq!(get_by_path(&data, "user.tags.1"), Some(&json!("owner")));
    assert_eq!(get_by_path(&data, "user.missing"), None);
}

#[test]
fn set_by_path_creates_intermediate_objects() {
    let mut data = json!({});
    set_by_path(&mut data, "user.profile.name", json!("Alice")).unwrap();
    assert_eq!(data, json!({"user": {"profile": {"name": "Alice"}}}));
}

#[test]
fn set_by_path_rejects_a_path_through_a_non_object() {
    let mut data = json!({"user": "not an object"});
    let err = set_by_path(&mut data, "user.name", json!("Alice")).unwrap_err();
    assert!(matches!(err, JsonError::InvalidPointer { .. }));
}

#[test]
fn has_structure_checks_for_every_expected_key() {
    let data = json!({"name": "Alice", "age": 30});
    assert!(has_structure(&data, &["name", "age"]));
    assert!(!has_structure(&data, &["name", "email"]));
}

#[test]
fn json_value_ext_helpers_cover_containers_and_scalars() {
    let data = json!({"tags": ["a", "b"], "empty": {}});
    assert_eq!(data.element_count(), 2);
    assert!(data["empty"].is_empty_container());
    assert!(!data["tags"].is_empty_container());
    assert_eq!(data.get_path_or("tags.0", &json!("missing")), &json!("a"));
    assert_eq!(data.get_path_or("missing", &json!("fallback")), &json!("fallback"));

    let mut keys = data.keys();
    keys.sort();
    assert_eq!(keys, vec!["empty".to_string(), "tags".to_string()]);
}
