//! Structural JSON merge: remote values win, repository-only fields survive.

use serde::Serialize;
use serde_json::{Map, Value};

/// A field whose repository value was replaced by the remote one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    pub path: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub merged: Value,
    /// Whether `merged` differs from the repository document.
    pub changed: bool,
    /// Dotted paths present only in the repository copy and kept.
    pub git_only: Vec<String>,
    pub drive_override: Vec<Override>,
}

/// Merge `remote` over `repo`.
///
/// Objects merge key by key (repository key order first, then keys only the
/// remote has). Any other value, arrays and `null` included, is taken from
/// the remote side whole. If either side is not an object the remote wins.
pub fn deep_merge(repo: &Value, remote: &Value) -> Value {
    let (Value::Object(repo_map), Value::Object(remote_map)) = (repo, remote) else {
        return remote.clone();
    };

    let mut result = Map::new();
    for (key, repo_value) in repo_map {
        let value = match remote_map.get(key) {
            Some(remote_value) if repo_value.is_object() && remote_value.is_object() => {
                deep_merge(repo_value, remote_value)
            }
            Some(remote_value) => remote_value.clone(),
            None => repo_value.clone(),
        };
        result.insert(key.clone(), value);
    }
    for (key, remote_value) in remote_map {
        if !repo_map.contains_key(key) {
            result.insert(key.clone(), remote_value.clone());
        }
    }
    Value::Object(result)
}

pub fn has_changes(a: &Value, b: &Value) -> bool {
    a != b
}

/// Merge and describe what happened, for pull request bodies.
pub fn merge_json(repo: &Value, remote: &Value) -> MergeResult {
    let merged = deep_merge(repo, remote);
    let changed = has_changes(repo, &merged);

    let mut git_only = Vec::new();
    let mut drive_override = Vec::new();
    if changed {
        collect_git_only(repo, remote, "", &mut git_only);
        collect_overrides(repo, remote, "", &mut drive_override);
    }

    MergeResult {
        merged,
        changed,
        git_only,
        drive_override,
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn collect_git_only(repo: &Value, remote: &Value, prefix: &str, out: &mut Vec<String>) {
    let (Value::Object(repo_map), Value::Object(remote_map)) = (repo, remote) else {
        return;
    };
    for (key, repo_value) in repo_map {
        let path = join(prefix, key);
        match remote_map.get(key) {
            None => out.push(path),
            Some(remote_value) if repo_value.is_object() && remote_value.is_object() => {
                collect_git_only(repo_value, remote_value, &path, out)
            }
            Some(_) => {}
        }
    }
}

fn collect_overrides(repo: &Value, remote: &Value, prefix: &str, out: &mut Vec<Override>) {
    let (Value::Object(repo_map), Value::Object(remote_map)) = (repo, remote) else {
        return;
    };
    for (key, remote_value) in remote_map {
        let Some(repo_value) = repo_map.get(key) else {
            continue;
        };
        let path = join(prefix, key);
        if repo_value.is_object() && remote_value.is_object() {
            collect_overrides(repo_value, remote_value, &path, out);
        } else if repo_value != remote_value {
            out.push(Override {
                path,
                old_value: repo_value.clone(),
                new_value: remote_value.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_is_repo_first_then_remote_only() {
        let merged = deep_merge(&json!({"b": 1, "a": 2}), &json!({"c": 3, "a": 4}));
        let keys: Vec<_> = merged.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn unchanged_merge_reports_nothing() {
        let doc = json!({"meta": {"slug": "x"}, "extra": [1]});
        let result = merge_json(&doc, &json!({"meta": {"slug": "x"}}));
        assert!(!result.changed);
        assert!(result.git_only.is_empty());
        assert!(result.drive_override.is_empty());
    }
}
