// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Patchwork Types
//!
//! This crate is the foundational library for a Patchwork node, containing
//! the core data structures shared by every other crate in the workspace.
//!
//! ## Architectural Role
//!
//! As the base crate, `patchwork-types` has minimal dependencies and is
//! itself a dependency for almost every other crate in the workspace. It
//! provides the canonical definitions of [`Transaction`], [`VClock`] and
//! [`Submission`], plus the slot-confinement rules that make cross-node
//! conflicts structurally impossible.

/// A unified set of error types used across the workspace.
pub mod error;
/// The replicated transaction record and its input-queue wrapper.
pub mod transaction;
/// The per-source version vector.
pub mod vclock;

pub use error::{AdmissionError, ApplyError, ErrorCode, StoreError};
pub use transaction::{confined_to_slot, first_escape, slot_pointer, Submission, Transaction};
pub use vclock::VClock;

/// Capacity of the Transaction Manager's input queue. A full queue applies
/// natural backpressure to both HTTP handlers and replication clients.
pub const TM_QUEUE_DEPTH: usize = 10;
