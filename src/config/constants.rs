//! # xupdb Configuration Constants
//!
//! This module centralizes the numeric configuration values of the update
//! engine. Values that depend on each other are co-located and the
//! relationships are enforced through compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! CANCEL_POLL_INTERVAL (1024 nodes)
//!       │
//!       └─> must be a power of two; the builder polls the cancellation
//!           flag when `copied % CANCEL_POLL_INTERVAL == 0`
//!
//! DOCS_LINEAR_SCAN_LIMIT (16 documents)
//!       │
//!       └─> below this many documents, exact path lookups scan linearly
//!           instead of building the sorted path permutation
//!
//! INLINE_ATTRIBUTES (8)
//!       │
//!       └─> inline capacity of the attribute name set checked per element
//!           during prepare; larger elements spill to the heap
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use crate::config::{CANCEL_POLL_INTERVAL, RAW_DIR};
//! ```

// ============================================================================
// INSERTION SEQUENCE CONSTRUCTION
// ============================================================================

/// Number of copied nodes between two polls of the cancellation flag.
pub const CANCEL_POLL_INTERVAL: usize = 1024;

/// Initial capacity of a staged clip's record buffer.
pub const DEFAULT_CLIP_CAPACITY: usize = 16;

const _: () = assert!(
    CANCEL_POLL_INTERVAL.is_power_of_two(),
    "CANCEL_POLL_INTERVAL must be a power of two"
);

// ============================================================================
// PREPARE CHECKS
// ============================================================================

/// Inline capacity for attribute name lists collected per element.
pub const INLINE_ATTRIBUTES: usize = 8;

// ============================================================================
// DOCUMENT RESOURCE INDEX
// ============================================================================

/// Exact path lookups on indexes with at most this many documents use a
/// linear scan and never build the sorted path permutation.
pub const DOCS_LINEAR_SCAN_LIMIT: usize = 16;

/// Separator of hierarchical resource paths.
pub const PATH_SEPARATOR: char = '/';

// ============================================================================
// BLOB STORAGE LAYOUT
// ============================================================================

/// Directory below the database directory holding binary resources.
pub const RAW_DIR: &str = "raw";

/// Directory below the database directory holding stored values.
pub const VALUES_DIR: &str = "values";

const _: () = assert!(
    !const_str_eq(RAW_DIR, VALUES_DIR),
    "binary and value resources must live in different directories"
);

const fn const_str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}
