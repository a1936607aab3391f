//! # Database Builder
//!
//! `DatabaseBuilder` configures and opens a [`Database`](super::Database).
//!
//! ## Configuration Options
//!
//! | Option      | Default          | Description                                   |
//! |-------------|------------------|-----------------------------------------------|
//! | path        | none (in memory) | Directory for binary and value resources      |
//! | merge_texts | true             | Merge adjacent texts after applying a snapshot|
//! | not_found   | ignore idempotent| Reaction to targets that no longer resolve    |
//!
//! ## Usage Examples
//!
//! ### In memory:
//!
//! ```ignore
//! let db = Database::builder().open()?;
//! ```
//!
//! ### With a resource directory and a strict not-found policy:
//!
//! ```ignore
//! let db = Database::builder()
//!     .path("./mydb")
//!     .not_found(NotFoundPolicy { idempotent: OnMissing::Fail, strict: OnMissing::Fail })
//!     .open()?;
//! ```
//!
//! ### Over an existing node store:
//!
//! ```ignore
//! let db = Database::builder().open_with(store)?;
//! ```
//!
//! The document index is rebuilt from the store's document roots on open.

use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

use super::Database;
use crate::config::{NotFoundPolicy, UpdateOptions};
use crate::resources::{BlobStore, DirBlobs, MemBlobs};
use crate::store::{MemStore, NodeStore};

#[derive(Debug, Clone, Default)]
pub struct DatabaseBuilder {
    path: Option<PathBuf>,
    options: UpdateOptions,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores binary and value resources below `path`. The directory is
    /// created if it doesn't exist.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables or disables merging of adjacent texts after apply.
    pub fn merge_texts(mut self, enabled: bool) -> Self {
        self.options = self.options.merge_texts(enabled);
        self
    }

    pub fn not_found(mut self, policy: NotFoundPolicy) -> Self {
        self.options = self.options.not_found(policy);
        self
    }

    /// Opens an empty database over an in-memory node store.
    pub fn open(self) -> Result<Database<MemStore>> {
        self.open_with(MemStore::new())
    }

    /// Opens a database over an existing node store.
    pub fn open_with<S: NodeStore>(self, store: S) -> Result<Database<S>> {
        let blobs: Box<dyn BlobStore> = match &self.path {
            Some(path) => Box::new(
                DirBlobs::open(path)
                    .wrap_err_with(|| format!("failed to open resource directory {}", path.display()))?,
            ),
            None => Box::new(MemBlobs::new()),
        };
        Ok(Database::with_parts(store, blobs, self.options, self.path))
    }

    pub fn get_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get_options(&self) -> UpdateOptions {
        self.options
    }
}
