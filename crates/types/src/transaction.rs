// Path: crates/types/src/transaction.rs
//! The replicated transaction record and the slot-confinement rules.

use json_patch::{Patch, PatchOperation};
use serde::{Deserialize, Serialize};

/// A single committed (or in-flight) edit of one source's slot.
///
/// Field names are capitalized on the wire for compatibility with the
/// original cluster protocol: `{"Source": ..., "Id": ..., "Payload": ...}`.
/// The payload is itself a serialized RFC 6902 JSON-Patch document, so a
/// transaction travelling over the websocket link is double-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The nickname of the node that authored this edit. Doubles as the
    /// top-level key of the slot the payload is allowed to touch.
    #[serde(rename = "Source")]
    pub source: String,
    /// Per-source sequence number, dense starting at 1. `0` is reserved to
    /// mean "nothing observed from this source".
    #[serde(rename = "Id")]
    pub id: u64,
    /// A JSON-Patch document serialized as a string.
    #[serde(rename = "Payload")]
    pub payload: String,
}

/// An element of the Transaction Manager's input queue.
///
/// Locally admitted edits arrive un-stamped: the applier itself assigns
/// `id = vclock[source] + 1` under its single-writer discipline, which keeps
/// per-source ids dense without a separate admission mutex.
#[derive(Debug, Clone)]
pub enum Submission {
    /// An edit accepted from a local client; the payload has already passed
    /// the slot-confinement check.
    Local {
        /// The raw JSON-Patch body as received.
        payload: String,
    },
    /// A fully stamped transaction received from a peer.
    Replicated(Transaction),
}

/// Returns the JSON Pointer of a source's slot, escaping the nickname per
/// RFC 6901 (`~` becomes `~0`, `/` becomes `~1`).
pub fn slot_pointer(source: &str) -> String {
    format!("/{}", source.replace('~', "~0").replace('/', "~1"))
}

fn within(root: &str, path: &str) -> bool {
    path.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn touched_pointers(op: &PatchOperation) -> (&str, Option<&str>) {
    match op {
        PatchOperation::Add(o) => (&o.path, None),
        PatchOperation::Remove(o) => (&o.path, None),
        PatchOperation::Replace(o) => (&o.path, None),
        PatchOperation::Move(o) => (&o.path, Some(&o.from)),
        PatchOperation::Copy(o) => (&o.path, Some(&o.from)),
        PatchOperation::Test(o) => (&o.path, None),
    }
}

/// Returns the first pointer in `patch` that escapes the subtree rooted at
/// `/<source>`, or `None` if the whole patch is confined to the slot. For
/// `move` and `copy` the `from` pointer is constrained as well, since both
/// ends of those operations modify state.
pub fn first_escape(patch: &Patch, source: &str) -> Option<String> {
    let root = slot_pointer(source);
    for op in &patch.0 {
        let (path, from) = touched_pointers(op);
        if !within(&root, path) {
            return Some(path.to_owned());
        }
        if let Some(from) = from {
            if !within(&root, from) {
                return Some(from.to_owned());
            }
        }
    }
    None
}

/// Checks that every operation in `patch` stays inside the subtree rooted at
/// `/<source>`.
pub fn confined_to_slot(patch: &Patch, source: &str) -> bool {
    first_escape(patch, source).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Patch {
        serde_json::from_str(s).expect("patch fixture")
    }

    #[test]
    fn accepts_slot_root_and_descendants() {
        let patch = parse(
            r#"[
                {"op":"add","path":"/A","value":""},
                {"op":"replace","path":"/A","value":"hi"},
                {"op":"add","path":"/A/nested/deep","value":1}
            ]"#,
        );
        assert!(confined_to_slot(&patch, "A"));
    }

    #[test]
    fn rejects_foreign_slot() {
        let patch = parse(r#"[{"op":"add","path":"/B","value":"x"}]"#);
        assert!(!confined_to_slot(&patch, "A"));
    }

    #[test]
    fn rejects_sibling_with_shared_prefix() {
        // "/AB" begins with "/A" as a string but is a different slot.
        let patch = parse(r#"[{"op":"add","path":"/AB","value":"x"}]"#);
        assert!(!confined_to_slot(&patch, "A"));
    }

    #[test]
    fn reports_first_escaping_pointer() {
        let patch = parse(
            r#"[
                {"op":"add","path":"/A","value":1},
                {"op":"add","path":"/B","value":2}
            ]"#,
        );
        assert_eq!(first_escape(&patch, "A"), Some("/B".to_owned()));
    }

    #[test]
    fn rejects_move_from_foreign_slot() {
        let patch = parse(r#"[{"op":"move","from":"/B/x","path":"/A/x"}]"#);
        assert!(!confined_to_slot(&patch, "A"));
    }

    #[test]
    fn escapes_pointer_special_characters() {
        assert_eq!(slot_pointer("a/b"), "/a~1b");
        assert_eq!(slot_pointer("a~b"), "/a~0b");
        let patch = parse(r#"[{"op":"add","path":"/a~1b","value":""}]"#);
        assert!(confined_to_slot(&patch, "a/b"));
    }

    #[test]
    fn wire_format_uses_capitalized_keys() {
        let tx = Transaction {
            source: "A".into(),
            id: 3,
            payload: "[]".into(),
        };
        let wire = serde_json::to_string(&tx).expect("serialize");
        assert_eq!(wire, r#"{"Source":"A","Id":3,"Payload":"[]"}"#);
        let back: Transaction = serde_json::from_str(&wire).expect("deserialize");
        assert_eq!(back, tx);
    }
}
