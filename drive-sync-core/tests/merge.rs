use drive_sync_core::merge::{deep_merge, merge_json};
use serde_json::{json, Value};

#[test]
fn remote_values_win_and_repo_only_keys_survive() {
    let repo = json!({"a": 1, "nested": {"x": 1, "keep": true}, "list": [1, 2, 3], "only_repo": "r"});
    let remote = json!({"a": 2, "nested": {"x": 2, "new": "n"}, "list": [9], "only_remote": null});

    let merged = deep_merge(&repo, &remote);

    assert_eq!(
        merged,
        json!({
            "a": 2,
            "nested": {"x": 2, "keep": true, "new": "n"},
            "list": [9],
            "only_repo": "r",
            "only_remote": null
        })
    );
}

#[test]
fn arrays_and_null_replace_wholesale() {
    let repo = json!({"items": [{"id": 1, "extra": true}], "title": "Old"});
    let remote = json!({"items": [{"id": 1}], "title": null});
    let merged = deep_merge(&repo, &remote);
    assert_eq!(merged["items"], json!([{"id": 1}]));
    assert_eq!(merged["title"], Value::Null);
}

#[test]
fn object_replaced_by_primitive_and_vice_versa() {
    let repo = json!({"a": {"deep": 1}, "b": "text"});
    let remote = json!({"a": "flat", "b": {"deep": 2}});
    assert_eq!(deep_merge(&repo, &remote), json!({"a": "flat", "b": {"deep": 2}}));
}

#[test]
fn non_object_remote_wins_regardless_of_repo() {
    let repo = json!({"a": 1});
    for remote in [json!([1, 2]), json!("text"), json!(42), Value::Null, json!(true)] {
        assert_eq!(deep_merge(&repo, &remote), remote);
    }
    assert_eq!(deep_merge(&json!([1]), &json!({"a": 1})), json!({"a": 1}));
}

#[test]
fn merge_is_idempotent_on_its_result() {
    let repo = json!({"hero": {"title": "Old", "subtitle": "Keep"}, "local": "y", "tags": ["a"]});
    let remote = json!({"hero": {"title": "New"}, "extra": "x", "tags": ["b", "c"]});
    let once = deep_merge(&repo, &remote);
    let twice = deep_merge(&once, &remote);
    assert_eq!(once, twice);
}

#[test]
fn home_page_merge_reports_overrides_and_preserved_fields() {
    let repo = json!({"hero": {"title": "Old", "subtitle": "Keep"}, "local": "y"});
    let remote = json!({"hero": {"title": "New"}, "extra": "x"});

    let result = merge_json(&repo, &remote);

    assert!(result.changed);
    assert_eq!(
        result.merged,
        json!({"hero": {"title": "New", "subtitle": "Keep"}, "extra": "x", "local": "y"})
    );
    let overridden: Vec<&str> = result.drive_override.iter().map(|o| o.path.as_str()).collect();
    assert_eq!(overridden, vec!["hero.title"]);
    assert_eq!(result.drive_override[0].old_value, json!("Old"));
    assert_eq!(result.drive_override[0].new_value, json!("New"));
    assert_eq!(result.git_only, vec!["hero.subtitle".to_string(), "local".to_string()]);
}

#[test]
fn merged_keys_follow_repo_order_then_remote_additions() {
    let repo = json!({"hero": {"title": "Old", "subtitle": "Keep"}, "local": "y"});
    let remote = json!({"extra": "x", "hero": {"title": "New"}});
    let merged = deep_merge(&repo, &remote);
    let text = serde_json::to_string(&merged).unwrap();
    assert_eq!(
        text,
        r#"{"hero":{"title":"New","subtitle":"Keep"},"local":"y","extra":"x"}"#
    );
}

#[test]
fn reporting_is_skipped_when_nothing_changes() {
    let repo = json!({"a": 1, "repo_only": 2});
    let result = merge_json(&repo, &json!({"a": 1}));
    assert!(!result.changed);
    assert_eq!(result.merged, repo);
    assert!(result.git_only.is_empty());
}
