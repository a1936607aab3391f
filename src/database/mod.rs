//! # Database Module
//!
//! `Database` owns the three pieces the update engine writes to: the node
//! store, the document resource index and the blob store. It is the single
//! place where a structural change reaches both the store and the index, so
//! the two can never drift apart.
//!
//! ## Update Pipeline
//!
//! ```text
//! db.begin() ──> PendingUpdates (Open)
//!                    │ add(NodeUpdate / ResourceUpdate)
//!                    ▼
//!                prepare(&db)            validation, staged clips
//!                    │
//!                    ▼
//!                apply(&mut db)
//!                    │  ├─ db.apply_atomics(cache)   node-level, back to front
//!                    │  └─ ResourceUpdate::apply     database-level, kind order
//!                    ▼
//!                UpdateSummary
//! ```
//!
//! ## Structural Maintenance
//!
//! | Method          | Store                       | Index                    |
//! |-----------------|-----------------------------|--------------------------|
//! | `insert_nodes`  | `insert(pre, parent, clip)` | `insert(pre, clip)`      |
//! | `delete_nodes`  | `delete(pre, size)`         | `delete(pre, size)`      |
//! | `replace_nodes` | delete, then insert         | delete, then insert      |
//! | `rename_node`   | `rename(pre, name)`         | `rename` for documents   |
//!
//! ## Usage Example
//!
//! ```ignore
//! use xupdb::{Database, Fragment, NodeUpdate, ResourceUpdate};
//!
//! let mut db = Database::builder().open()?;
//! db.update(|pul| pul.add(ResourceUpdate::add("doc.xml", vec![Fragment::element("root")])))?;
//!
//! let root = db.docs().exact("doc.xml").map(|doc| doc + 1);
//! db.update(|pul| pul.add(NodeUpdate::insert_into(root, vec![Fragment::text("hi")])))?;
//! ```
//!
//! ## Thread Safety
//!
//! A database has a single writer. `PendingUpdates::apply` takes
//! `&mut Database`, so no reader can observe a half-applied snapshot.

mod builder;
#[allow(clippy::module_inception)]
mod database;

pub use builder::DatabaseBuilder;
pub use database::{AtomicReport, Database};
