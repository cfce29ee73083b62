// Path: crates/types/src/error.rs
//! Core error types shared across the workspace.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised by the local write admission path (`POST /replace`).
///
/// All variants map to a 400 response with no state change.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The request body did not parse as an RFC 6902 JSON-Patch document.
    #[error("body is not a JSON-Patch document: {0}")]
    MalformedPatch(String),
    /// An operation referenced a path outside the node's own slot.
    #[error("operation path {path:?} escapes slot \"/{slot}\"")]
    ForeignSlot {
        /// The offending pointer.
        path: String,
        /// The nickname whose slot the edit was required to stay inside.
        slot: String,
    },
}

impl ErrorCode for AdmissionError {
    fn code(&self) -> &'static str {
        match self {
            Self::MalformedPatch(_) => "ADMISSION_MALFORMED_PATCH",
            Self::ForeignSlot { .. } => "ADMISSION_FOREIGN_SLOT",
        }
    }
}

/// Errors that make the applier drop a transaction, or fail a snapshot read.
///
/// The applier never propagates these: a transaction that cannot be decoded
/// or applied is logged and dropped with no state change, and anti-entropy
/// re-delivers anything a peer is still missing on its next poll cycle.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The transaction payload did not decode as a JSON-Patch document.
    #[error("payload is not a JSON-Patch document: {0}")]
    DecodePayload(#[source] serde_json::Error),
    /// The decoded patch failed to apply against the current snapshot.
    #[error("patch does not apply to the snapshot: {0}")]
    PatchFailed(#[source] json_patch::PatchError),
    /// Serializing the snapshot for a reader failed.
    #[error("cannot serialize snapshot: {0}")]
    SerializeSnapshot(#[source] serde_json::Error),
}

impl ErrorCode for ApplyError {
    fn code(&self) -> &'static str {
        match self {
            Self::DecodePayload(_) => "APPLY_DECODE_PAYLOAD",
            Self::PatchFailed(_) => "APPLY_PATCH_FAILED",
            Self::SerializeSnapshot(_) => "APPLY_SERIALIZE_SNAPSHOT",
        }
    }
}

/// Errors surfaced from the Transaction Manager's read paths.
///
/// `SnapshotNotObject` is an invariant violation (the journal fold must be a
/// JSON object) and is treated as fatal by the diff path; callers retry on
/// the next poll cycle.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The snapshot is no longer a JSON object.
    #[error("snapshot is not a JSON object")]
    SnapshotNotObject,
    /// Serializing a synthesized materializing patch failed.
    #[error("cannot encode materializing patch for slot {slot:?}: {source}")]
    EncodeMaterializing {
        /// The slot the patch was synthesized for.
        slot: String,
        /// The underlying encoder error.
        #[source]
        source: serde_json::Error,
    },
}

impl ErrorCode for StoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::SnapshotNotObject => "STORE_SNAPSHOT_NOT_OBJECT",
            Self::EncodeMaterializing { .. } => "STORE_ENCODE_MATERIALIZING",
        }
    }
}
