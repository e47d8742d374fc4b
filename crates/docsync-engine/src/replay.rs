// File: src/replay.rs
//
// Rebuild document state from a snapshot and the event tail

use serde_json::{Map, Value};

use docsync_core::{Event, Operation, Snapshot};

/// Apply an RFC 7386 merge patch in place: null removes a field, objects
/// recurse, anything else replaces the target.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !matches!(target, Value::Object(_)) {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                for (key, value) in entries {
                    if value.is_null() {
                        map.remove(key);
                    } else {
                        apply_merge_patch(map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other.clone(),
    }
}

/// Fold events onto a snapshot's state, in the order given.
///
/// Creations replace the state with the recorded post-image, updates apply
/// the structural diff (falling back to the post-image carried by
/// change-feed events), and deletions clear the state to null. Feeding this
/// the latest snapshot and the events after its capture cursor yields the
/// document's current state.
pub fn rebuild(snapshot: Option<&Snapshot>, events: &[Event]) -> Value {
    let mut state = snapshot.map(|s| s.state.clone()).unwrap_or(Value::Null);

    for event in events {
        match event.operation {
            Operation::Create => {
                if let Some(doc) = event
                    .metadata
                    .get("created_doc")
                    .or_else(|| event.metadata.get("data"))
                {
                    state = doc.clone();
                }
            }
            Operation::Update | Operation::UpdateSection => {
                if let Some(diff) = &event.diff {
                    apply_merge_patch(&mut state, &diff.merge_patch);
                } else if let Some(data) = event.metadata.get("data") {
                    state = data.clone();
                }
            }
            Operation::Delete => {
                state = Value::Null;
            }
        }
    }
    state
}
