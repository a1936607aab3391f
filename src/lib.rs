//! # xupdb - Transactional Updates for an Embedded XML Database
//!
//! xupdb is the update engine of an embedded XML database. Queries collect
//! update primitives against a snapshot of a pre-order node store; the engine
//! reconciles them and applies them as one consistent modification:
//!
//! - **Snapshot addressing**: every primitive names its target by the
//!   position it had before any update was applied
//! - **Position-safe ordering**: atomic updates run from the highest position
//!   down, so no pending position is invalidated
//! - **Indexed resources**: document roots stay addressable by path through
//!   every structural change
//!
//! ## Quick Start
//!
//! ```ignore
//! use xupdb::{Database, Fragment, NodeUpdate, ResourceUpdate};
//!
//! let mut db = Database::builder().open()?;
//! let doc = db.create_document("books.xml", vec![Fragment::element("books")])?;
//!
//! let mut pul = db.begin();
//! pul.add(NodeUpdate::insert_into(doc + 1, vec![Fragment::element("book")]))?;
//! pul.add(ResourceUpdate::store_value("stats/count", b"1".to_vec()))?;
//! let summary = pul.apply(&mut db)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     Public API (Database, PUL)      │
//! ├─────────────────────────────────────┤
//! │  Update Primitives │ Atomic Cache   │
//! ├────────────────────┼────────────────┤
//! │  Insertion Builder │ Resource Index │
//! ├─────────────────────────────────────┤
//! │     Node Store (pre/dist/size)      │
//! ├─────────────────────────────────────┤
//! │    Blob Store (raw/, values/)       │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! database_dir/
//! ├── raw/       # binary resources, one file per path
//! └── values/    # stored values, one file per path
//! ```
//!
//! ## Module Overview
//!
//! - [`store`]: node records, the `NodeStore` trait, staged clips
//! - [`update`]: primitives, pending update list, atomic update cache
//! - [`resources`]: document resource index and blob stores
//! - [`database`]: the `Database` facade and its builder
//! - [`config`]: constants and runtime options
//! - [`error`]: the `UpdateError` taxonomy

pub mod config;
pub mod database;
pub mod error;
pub mod resources;
pub mod store;
pub mod update;

pub use config::{NotFoundPolicy, OnMissing, UpdateOptions};
pub use database::{AtomicReport, Database, DatabaseBuilder};
pub use error::UpdateError;
pub use resources::{BlobStore, DirBlobs, Docs, MemBlobs, ResourceType};
pub use store::{DataClip, Fragment, MemStore, NodeId, NodeKind, NodeStore, Pre};
pub use update::{
    CancelFlag, InsertPosition, ListState, NodeUpdate, PendingUpdates, ResourceUpdate, UpdateKind,
    UpdateSummary,
};
