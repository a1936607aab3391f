//! # Update Engine
//!
//! Collects the update primitives of one snapshot, reconciles them and applies
//! them to the node store in an order that never invalidates a position that
//! is still to be used.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌──────┐  prepare()  ┌──────────┐  apply()  ┌─────────┐
//! │ Open │ ──────────> │ Prepared │ ────────> │ Applied │
//! └──────┘             └──────────┘           └─────────┘
//!    │                      │
//!    │ conflict, validation, cancellation, i/o
//!    v                      v
//! ┌─────────────────────────────┐
//! │           Failed            │
//! └─────────────────────────────┘
//! ```
//!
//! ## Pipeline
//!
//! 1. `add`: primitives with the same kind and target are merged; merging two
//!    single-valued primitives is a conflict
//! 2. `prepare`: targets are validated and payloads are staged into clips
//!    ([`builder`])
//! 3. reconciliation: content replacement discards updates inside the
//!    replaced content, replacements discard deletes of the same node
//! 4. substitution: content replacement becomes deletes plus one text insert
//! 5. node-level primitives are visited in descending position and emit
//!    atomic updates addressed by snapshot positions ([`atomic`])
//! 6. the atomic update cache is ordered, checked and pruned, then applied
//!    back to front; adjacent texts are merged afterwards
//! 7. database-level primitives run in kind order ([`resource`])
//!
//! ## Module Overview
//!
//! - `kind`: [`UpdateKind`] and its total priority order
//! - `builder`: insertion-sequence builder (staged clips)
//! - `node`: node-level primitives ([`NodeUpdate`])
//! - `resource`: database-level primitives ([`ResourceUpdate`])
//! - `atomic`: atomic update cache
//! - `pending`: the pending update list ([`PendingUpdates`])
//!
//! ## Cancellation
//!
//! Staging a large payload polls a [`CancelFlag`] every
//! `CANCEL_POLL_INTERVAL` copied nodes. Once atomic updates are being applied
//! the flag is ignored.

pub mod atomic;
pub mod builder;
pub mod kind;
pub mod node;
pub mod pending;
pub mod resource;

pub use atomic::{AtomicUpdate, AtomicUpdateCache};
pub use builder::{build_clip, BuildMode};
pub use kind::UpdateKind;
pub use node::{InsertPosition, NodeUpdate};
pub use pending::{ListState, PendingUpdates, Update, UpdateSummary};
pub use resource::{ResourceKey, ResourceUpdate};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between the query layer and the
/// pending update list.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
