// File: src/diff.rs
//
// Structural delta between two document revisions. The engine carries diffs
// opaquely; only the in-memory document store computes them itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Delta produced by a versioned document mutation.
///
/// `merge_patch` follows the RFC 7386 shape: changed fields carry their new
/// value, removed fields carry null, and nested objects recurse. `changes`
/// is the flat top-level view of the same comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub has_changes: bool,
    pub version: i64,
    pub merge_patch: Value,
    pub changes: HashMap<String, Value>,
}

impl Diff {
    /// Compare two document post-images and record the result against the
    /// given post-mutation version.
    pub fn between(old: &Value, new: &Value, version: i64) -> Self {
        let merge_patch = merge_patch(old, new);
        let has_changes = !patch_is_empty(&merge_patch);
        let changes = top_level_changes(old, new);

        Diff {
            has_changes,
            version,
            merge_patch,
            changes,
        }
    }
}

fn merge_patch(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut patch = Map::new();
            for (key, new_value) in new_map {
                match old_map.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value) => {
                        patch.insert(key.clone(), merge_patch(old_value, new_value));
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            // Removals map to null, per merge-patch semantics.
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ => new.clone(),
    }
}

fn patch_is_empty(patch: &Value) -> bool {
    match patch {
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn top_level_changes(old: &Value, new: &Value) -> HashMap<String, Value> {
    let mut changes = HashMap::new();
    let (Value::Object(old_map), Value::Object(new_map)) = (old, new) else {
        if old != new {
            changes.insert("$value".to_string(), new.clone());
        }
        return changes;
    };

    for (key, new_value) in new_map {
        if old_map.get(key) != Some(new_value) {
            changes.insert(key.clone(), new_value.clone());
        }
    }
    for key in old_map.keys() {
        if !new_map.contains_key(key) {
            changes.insert(key.clone(), Value::Null);
        }
    }
    changes
}
