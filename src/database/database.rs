use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use tracing::{debug, trace};

use super::builder::DatabaseBuilder;
use crate::config::UpdateOptions;
use crate::resources::{BlobStore, Docs, MemBlobs};
use crate::store::{DataClip, Fragment, MemStore, NodeKind, NodeStore, Pre};
use crate::update::{AtomicUpdate, AtomicUpdateCache, PendingUpdates, ResourceUpdate, UpdateSummary};

/// Outcome of one `apply_atomics` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtomicReport {
    pub applied: usize,
    pub pruned: usize,
    pub merged_texts: usize,
}

pub struct Database<S: NodeStore = MemStore> {
    store: S,
    docs: Docs,
    blobs: Box<dyn BlobStore>,
    options: UpdateOptions,
    dir: Option<PathBuf>,
}

impl Database<MemStore> {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Empty in-memory database with default options.
    pub fn in_memory() -> Self {
        Self::with_parts(MemStore::new(), Box::new(MemBlobs::new()), UpdateOptions::default(), None)
    }
}

impl<S: NodeStore> Database<S> {
    pub(crate) fn with_parts(
        store: S,
        blobs: Box<dyn BlobStore>,
        options: UpdateOptions,
        dir: Option<PathBuf>,
    ) -> Self {
        let docs = Docs::from_store(&store);
        Self {
            store,
            docs,
            blobs,
            options,
            dir,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn docs(&self) -> &Docs {
        &self.docs
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn options(&self) -> UpdateOptions {
        self.options
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Opens a pending update list for one snapshot.
    pub fn begin(&self) -> PendingUpdates {
        PendingUpdates::new(self.options)
    }

    /// Runs `f` against a fresh pending update list and applies it.
    pub fn update<F>(&mut self, f: F) -> Result<UpdateSummary>
    where
        F: FnOnce(&mut PendingUpdates) -> Result<()>,
    {
        let mut pending = self.begin();
        f(&mut pending)?;
        pending.apply(self)
    }

    /// Adds a document at the end of the store and returns its root position.
    pub fn create_document(&mut self, path: &str, children: Vec<Fragment>) -> Result<Pre> {
        self.update(|pending| pending.add(ResourceUpdate::add(path, children)))
            .wrap_err_with(|| format!("failed to create document {:?}", path))?;
        self.docs
            .exact(path)
            .ok_or_else(|| eyre::eyre!("document {:?} missing after add", path))
    }

    /// Commits ordered atomic updates, highest location first, then merges
    /// texts that became adjacent. This is the only entry point through which
    /// node-level updates reach the store.
    pub fn apply_atomics(&mut self, mut cache: AtomicUpdateCache) -> Result<AtomicReport> {
        cache.finish()?;
        let candidates = if self.options.merge_texts {
            cache.text_candidates()
        } else {
            Vec::new()
        };
        let pruned = cache.pruned();
        let updates = cache.into_updates();
        let applied = updates.len();

        for update in updates.into_iter().rev() {
            trace!(?update, "applying atomic update");
            match update {
                AtomicUpdate::Delete { location, size, .. } => self.delete_nodes(location, size)?,
                AtomicUpdate::Insert {
                    location,
                    parent,
                    clip,
                    ..
                } => self.insert_nodes(location, parent, &clip)?,
                AtomicUpdate::Replace {
                    location,
                    size,
                    parent,
                    clip,
                } => self.replace_nodes(location, size, parent, &clip)?,
                AtomicUpdate::UpdateValue { location, value } => {
                    self.store.update_value(location, &value)?
                }
                AtomicUpdate::Rename { location, name } => self.rename_node(location, &name)?,
            }
        }

        let merged_texts = self.merge_adjacent_texts(&candidates)?;
        debug!(applied, pruned, merged_texts, "applied atomic updates");
        Ok(AtomicReport {
            applied,
            pruned,
            merged_texts,
        })
    }

    pub(crate) fn insert_nodes(&mut self, pre: Pre, parent: Option<Pre>, clip: &DataClip) -> Result<()> {
        self.store.insert(pre, parent, clip)?;
        self.docs.insert(pre, clip);
        Ok(())
    }

    pub(crate) fn delete_nodes(&mut self, pre: Pre, size: usize) -> Result<()> {
        self.store.delete(pre, size)?;
        self.docs.delete(pre, size);
        Ok(())
    }

    pub(crate) fn replace_nodes(
        &mut self,
        pre: Pre,
        size: usize,
        parent: Option<Pre>,
        clip: &DataClip,
    ) -> Result<()> {
        self.delete_nodes(pre, size)?;
        self.insert_nodes(pre, parent, clip)
    }

    pub(crate) fn rename_node(&mut self, pre: Pre, name: &str) -> Result<()> {
        self.store.rename(pre, name)?;
        if self.store.kind(pre) == NodeKind::Document {
            self.docs.rename(pre, name);
        }
        Ok(())
    }

    pub(crate) fn blobs_mut(&mut self) -> &mut dyn BlobStore {
        self.blobs.as_mut()
    }

    pub(crate) fn optimize(&mut self, all: bool) -> Result<()> {
        self.store.optimize(all)?;
        self.docs.rebuild(&self.store);
        debug!(all, documents = self.docs.len(), "optimized database");
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.store.flush()?;
        self.blobs.sync()
    }

    /// Merges each candidate text with a following text sibling. Candidates
    /// must be sorted in descending order.
    fn merge_adjacent_texts(&mut self, candidates: &[Pre]) -> Result<usize> {
        let mut merged = 0;
        for &pre in candidates {
            let next = pre + 1;
            if next >= self.store.len()
                || self.store.kind(pre) != NodeKind::Text
                || self.store.kind(next) != NodeKind::Text
                || self.store.parent(pre, NodeKind::Text) != self.store.parent(next, NodeKind::Text)
            {
                continue;
            }
            let value = format!(
                "{}{}",
                self.store.value(pre).unwrap_or_default(),
                self.store.value(next).unwrap_or_default()
            );
            self.store.update_value(pre, &value)?;
            self.delete_nodes(next, 1)?;
            merged += 1;
        }
        if merged > 0 {
            trace!(merged, "merged adjacent texts");
        }
        Ok(merged)
    }
}

impl<S: NodeStore + std::fmt::Debug> std::fmt::Debug for Database<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.store)
            .field("docs", &self.docs)
            .field("options", &self.options)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::serialize;
    use crate::update::InsertPosition;

    #[test]
    fn apply_atomics_runs_back_to_front() {
        let mut db = Database::in_memory();
        let root = Fragment::element("r")
            .with_child(Fragment::element("a"))
            .with_child(Fragment::element("b"));
        db.create_document("d", vec![root]).unwrap();

        let mut cache = AtomicUpdateCache::new();
        cache.push(AtomicUpdate::Delete {
            location: 2,
            size: 1,
            parent: Some(1),
        });
        cache.push(AtomicUpdate::Insert {
            location: 4,
            parent: Some(1),
            position: InsertPosition::Into,
            clip: DataClip::from_fragment(&Fragment::element("c")),
        });
        cache.push(AtomicUpdate::Rename {
            location: 3,
            name: "bb".into(),
        });

        let report = db.apply_atomics(cache).unwrap();

        assert_eq!(serialize(db.store(), 0), "<r><bb/><c/></r>");
        assert_eq!(report.applied, 3);
    }

    #[test]
    fn adjacent_texts_merge_after_apply() {
        let mut db = Database::in_memory();
        let root = Fragment::element("r")
            .with_child(Fragment::text("a"))
            .with_child(Fragment::element("x"))
            .with_child(Fragment::text("b"));
        db.create_document("d", vec![root]).unwrap();

        let mut cache = AtomicUpdateCache::new();
        cache.push(AtomicUpdate::Delete {
            location: 3,
            size: 1,
            parent: Some(1),
        });

        let report = db.apply_atomics(cache).unwrap();

        assert_eq!(report.merged_texts, 1);
        assert_eq!(serialize(db.store(), 0), "<r>ab</r>");
        assert_eq!(db.store().len(), 3);
    }

    #[test]
    fn text_merge_can_be_disabled() {
        let options = UpdateOptions::new().merge_texts(false);
        let mut db = Database::builder().options(options).open().unwrap();
        let root = Fragment::element("r")
            .with_child(Fragment::text("a"))
            .with_child(Fragment::element("x"))
            .with_child(Fragment::text("b"));
        db.create_document("d", vec![root]).unwrap();

        let mut cache = AtomicUpdateCache::new();
        cache.push(AtomicUpdate::Delete {
            location: 3,
            size: 1,
            parent: Some(1),
        });
        let report = db.apply_atomics(cache).unwrap();

        assert_eq!(report.merged_texts, 0);
        assert_eq!(db.store().len(), 4);
    }

    #[test]
    fn document_rename_updates_index() {
        let mut db = Database::in_memory();
        let pre = db.create_document("a.xml", vec![Fragment::element("r")]).unwrap();

        db.rename_node(pre, "b.xml").unwrap();

        assert_eq!(db.docs().exact("b.xml"), Some(pre));
        assert_eq!(db.store().name(pre), Some("b.xml"));
    }
}
