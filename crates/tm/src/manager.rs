// Path: crates/tm/src/manager.rs

//! The Transaction Manager: snapshot, journal and vclock behind one RW-lock,
//! fed by a bounded queue with exactly one consumer.

use json_patch::{AddOperation, Patch, PatchOperation};
use parking_lot::RwLock;
use patchwork_types::{
    slot_pointer, ApplyError, ErrorCode, StoreError, Submission, Transaction, VClock,
};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tokio::sync::mpsc;

struct TmState {
    document: Value,
    journal: Vec<Transaction>,
    vclock: VClock,
}

/// Owns all replicated state of a node.
///
/// Every mutation goes through [`TransactionManager::run`], which drains the
/// input queue one submission at a time; the RW-lock exists only so readers
/// can take consistent copies, never to serialize writers. Readers always
/// receive fresh values, never aliases of TM-owned state.
pub struct TransactionManager {
    local_source: String,
    state: RwLock<TmState>,
}

impl TransactionManager {
    /// Creates an empty manager for a node whose nickname is `local_source`.
    pub fn new(local_source: String) -> Self {
        Self {
            local_source,
            state: RwLock::new(TmState {
                document: Value::Object(Map::new()),
                journal: Vec::new(),
                vclock: VClock::new(),
            }),
        }
    }

    /// The nickname this node writes under.
    pub fn local_source(&self) -> &str {
        &self.local_source
    }

    /// Serializes the current snapshot. The returned buffer is a fresh copy;
    /// a concurrent apply can never tear it.
    pub fn snapshot_bytes(&self) -> Result<Vec<u8>, ApplyError> {
        let st = self.state.read();
        serde_json::to_vec(&st.document).map_err(ApplyError::SerializeSnapshot)
    }

    /// Returns a copy of the version vector.
    pub fn vclock(&self) -> VClock {
        self.state.read().vclock.clone()
    }

    /// Returns a copy of the full journal, in application order.
    pub fn journal(&self) -> Vec<Transaction> {
        self.state.read().journal.clone()
    }

    /// Computes the transactions a caller whose version vector is `from`
    /// needs in order to reach this node's state.
    ///
    /// Journal entries are returned verbatim for sources the caller already
    /// knows. For each snapshot slot the caller has never heard of, the
    /// history is collapsed into a single synthesized `add` of the current
    /// slot value, stamped with that source's current vclock entry. Within a
    /// source the output ascends by id; across sources the order carries no
    /// meaning.
    pub fn diff(&self, from: &VClock) -> Result<Vec<Transaction>, StoreError> {
        let st = self.state.read();
        let slots = st
            .document
            .as_object()
            .ok_or(StoreError::SnapshotNotObject)?;

        let mut picked: Vec<Transaction> = Vec::new();
        let mut done: HashSet<&str> = HashSet::new();
        for tr in st.journal.iter().rev() {
            let Some(have) = from.entry(&tr.source) else {
                // Unknown sources are handled wholesale from the snapshot.
                continue;
            };
            if have < tr.id {
                if !done.contains(tr.source.as_str()) {
                    picked.push(tr.clone());
                }
            } else {
                done.insert(tr.source.as_str());
                if done.len() == from.len() {
                    break;
                }
            }
        }
        picked.reverse();

        for (slot, value) in slots {
            if from.contains(slot) {
                continue;
            }
            let patch = Patch(vec![PatchOperation::Add(AddOperation {
                path: slot_pointer(slot),
                value: value.clone(),
            })]);
            let payload =
                serde_json::to_string(&patch).map_err(|source| StoreError::EncodeMaterializing {
                    slot: slot.clone(),
                    source,
                })?;
            picked.push(Transaction {
                source: slot.clone(),
                id: st.vclock.get(slot),
                payload,
            });
        }
        Ok(picked)
    }

    /// Drains the input queue until it is closed, applying each submission.
    /// This is the sole writer of snapshot, journal and vclock.
    pub async fn run(&self, mut rx: mpsc::Receiver<Submission>) {
        while let Some(sub) = rx.recv().await {
            match sub {
                Submission::Local { payload } => {
                    // Stamping here, on the applier, keeps per-source ids
                    // dense without an admission mutex: nothing else writes
                    // the local source's vclock entry.
                    let id = self.state.read().vclock.get(&self.local_source) + 1;
                    self.apply(Transaction {
                        source: self.local_source.clone(),
                        id,
                        payload,
                    });
                }
                Submission::Replicated(tx) => self.apply(tx),
            }
        }
        tracing::debug!(target: "tm", "input queue closed, applier exiting");
    }

    fn apply(&self, tx: Transaction) {
        let prev = self.state.read().vclock.get(&tx.source);
        if prev >= tx.id {
            tracing::trace!(target: "tm", source = %tx.source, id = tx.id, have = prev, "dropping duplicate or stale transaction");
            return;
        }
        if prev > 0 && tx.id > prev + 1 {
            // Anti-entropy returns histories densely, so a gap cannot occur
            // under this protocol; apply anyway and leave a trace.
            tracing::warn!(target: "tm", source = %tx.source, id = tx.id, have = prev, "gap in replicated ids");
        }

        let mut patch: Patch = match serde_json::from_str(&tx.payload) {
            Ok(p) => p,
            Err(e) => {
                let error = ApplyError::DecodePayload(e);
                tracing::warn!(target: "tm", source = %tx.source, id = tx.id, code = error.code(), %error, "dropping transaction");
                return;
            }
        };

        let mut st = self.state.write();
        // First contact with a source: its opening transaction is authored
        // against an assumed-empty slot that does not exist here yet, so
        // create it before the payload's own operations run.
        let slot_missing = st
            .document
            .as_object()
            .is_some_and(|o| !o.contains_key(&tx.source));
        if prev == 0 && slot_missing {
            patch.0.insert(
                0,
                PatchOperation::Add(AddOperation {
                    path: slot_pointer(&tx.source),
                    value: Value::String(String::new()),
                }),
            );
        }

        let mut next = st.document.clone();
        if let Err(e) = json_patch::patch(&mut next, &patch) {
            drop(st);
            let error = ApplyError::PatchFailed(e);
            tracing::warn!(target: "tm", source = %tx.source, id = tx.id, code = error.code(), %error, "dropping transaction");
            return;
        }
        st.document = next;
        st.vclock.advance(tx.source.clone(), tx.id);
        st.journal.push(tx);
    }
}
