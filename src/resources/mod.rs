//! # Document Resource Index
//!
//! Every document root in the node store is a *resource* addressed by a
//! hierarchical path. `Docs` maps those paths to root positions and is kept
//! in sync with every structural change the update engine performs.
//!
//! ## Layout
//!
//! ```text
//! pres:  [ 0,        5,        9      ]   sorted by position
//! paths: [ "a/x.xml", "b.xml", "a/y.xml" ]
//! order: Some([0, 2, 1])                  lazily computed path permutation
//! ```
//!
//! ## Maintenance
//!
//! | Operation             | Effect                                              |
//! |-----------------------|-----------------------------------------------------|
//! | `insert(pre, clip)`   | adds every document root of the clip, shifts others |
//! | `delete(pre, size)`   | drops roots inside the range, shifts the rest back  |
//! | `rename(pre, path)`   | replaces the path of one root                       |
//!
//! Each of them drops the path permutation instead of patching it. Bulk
//! operations insert thousands of documents in one snapshot; rebuilding the
//! permutation once on the next lookup costs O(n log n) per batch rather than
//! per document.
//!
//! ## Lookups
//!
//! - `exact`: linear scan for small indexes (`DOCS_LINEAR_SCAN_LIMIT`),
//!   otherwise binary search over the permutation
//! - `prefix`: linear scan, returns roots whose path equals the query or lies
//!   below it
//! - `is_dir`: true if some path lies strictly below the query
//!
//! ## Thread Safety
//!
//! The permutation cache sits behind a `parking_lot::Mutex` so lookups work
//! through `&self`. Mutations need `&mut self`; the pending update list holds
//! the only mutable borrow while it applies.

pub mod blob;
pub mod path;

pub use blob::{BlobStore, DirBlobs, MemBlobs, ResourceType};
pub use path::{is_within, normalize_path, rebase};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::config::{DOCS_LINEAR_SCAN_LIMIT, PATH_SEPARATOR};
use crate::store::{DataClip, NodeKind, NodeStore, Pre};

#[derive(Debug, Default)]
pub struct Docs {
    pres: Vec<Pre>,
    paths: Vec<String>,
    order: Mutex<Option<Arc<[usize]>>>,
}

impl Docs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index from the document roots of a store.
    pub fn from_store<S: NodeStore + ?Sized>(store: &S) -> Self {
        let mut docs = Self::new();
        docs.rebuild(store);
        docs
    }

    pub fn rebuild<S: NodeStore + ?Sized>(&mut self, store: &S) {
        self.pres.clear();
        self.paths.clear();
        let mut pre = 0;
        while pre < store.len() {
            let kind = store.kind(pre);
            if kind == NodeKind::Document {
                self.pres.push(pre);
                self.paths.push(Self::stored_path(store.name(pre).unwrap_or_default()));
            }
            pre += store.size(pre, kind);
        }
        self.invalidate();
        trace!(documents = self.pres.len(), "rebuilt document index");
    }

    pub fn len(&self) -> usize {
        self.pres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pres.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Pre, &str)> {
        self.pres.iter().copied().zip(self.paths.iter().map(String::as_str))
    }

    /// Path of the document rooted at `pre`.
    pub fn path(&self, pre: Pre) -> Option<&str> {
        self.pres
            .binary_search(&pre)
            .ok()
            .map(|index| self.paths[index].as_str())
    }

    pub fn insert(&mut self, pre: Pre, clip: &DataClip) {
        let index = self.pres.partition_point(|&p| p < pre);
        for p in &mut self.pres[index..] {
            *p += clip.len();
        }

        let added: Vec<(Pre, String)> = clip
            .records()
            .iter()
            .enumerate()
            .filter(|(_, record)| record.kind == NodeKind::Document)
            .map(|(offset, record)| {
                (
                    pre + offset,
                    Self::stored_path(record.name.as_deref().unwrap_or_default()),
                )
            })
            .collect();
        if added.is_empty() {
            return;
        }

        let (pres, paths): (Vec<_>, Vec<_>) = added.into_iter().unzip();
        self.pres.splice(index..index, pres).for_each(drop);
        self.paths.splice(index..index, paths).for_each(drop);
        self.invalidate();
    }

    pub fn delete(&mut self, pre: Pre, size: usize) {
        let start = self.pres.partition_point(|&p| p < pre);
        let end = self.pres.partition_point(|&p| p < pre + size);
        for p in &mut self.pres[end..] {
            *p -= size;
        }
        if start < end {
            self.pres.drain(start..end);
            self.paths.drain(start..end);
            self.invalidate();
        }
    }

    /// Replaces the path of the document rooted at `pre`; returns false if no
    /// document is rooted there.
    pub fn rename(&mut self, pre: Pre, path: &str) -> bool {
        match self.pres.binary_search(&pre) {
            Ok(index) => {
                self.paths[index] = Self::stored_path(path);
                self.invalidate();
                true
            }
            Err(_) => false,
        }
    }

    /// Root position of the document with exactly this path.
    pub fn exact(&self, path: &str) -> Option<Pre> {
        let path = normalize_path(path)?;
        if self.pres.len() <= DOCS_LINEAR_SCAN_LIMIT {
            return self
                .paths
                .iter()
                .position(|p| *p == path)
                .map(|index| self.pres[index]);
        }

        let order = self.order();
        order
            .binary_search_by(|&index| self.paths[index].as_str().cmp(path.as_str()))
            .ok()
            .map(|slot| self.pres[order[slot]])
    }

    /// Root positions of all documents at or below `path`, in document order.
    pub fn prefix(&self, path: &str) -> Vec<Pre> {
        let Some(path) = normalize_path(path) else {
            return Vec::new();
        };
        self.iter()
            .filter(|(_, p)| is_within(p, &path))
            .map(|(pre, _)| pre)
            .collect()
    }

    /// True if some document lies strictly below `path`.
    pub fn is_dir(&self, path: &str) -> bool {
        let Some(path) = normalize_path(path) else {
            return false;
        };
        if path.is_empty() {
            return !self.is_empty();
        }
        self.paths.iter().any(|p| {
            p.len() > path.len()
                && p.starts_with(path.as_str())
                && p[path.len()..].starts_with(PATH_SEPARATOR)
        })
    }

    pub fn has_order(&self) -> bool {
        self.order.lock().is_some()
    }

    fn order(&self) -> Arc<[usize]> {
        let mut cached = self.order.lock();
        if let Some(order) = cached.as_ref() {
            return Arc::clone(order);
        }
        let mut order: Vec<usize> = (0..self.paths.len()).collect();
        order.sort_by(|&a, &b| self.paths[a].cmp(&self.paths[b]));
        let order: Arc<[usize]> = order.into();
        *cached = Some(Arc::clone(&order));
        trace!(documents = order.len(), "sorted document paths");
        order
    }

    fn invalidate(&mut self) {
        *self.order.get_mut() = None;
    }

    fn stored_path(path: &str) -> String {
        normalize_path(path).unwrap_or_else(|| path.to_string())
    }
}
