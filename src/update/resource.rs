//! # Database-Level Primitives
//!
//! A [`ResourceUpdate`] operates on whole resources (documents, binaries,
//! stored values) or on the database itself. Database-level primitives take
//! no part in position-shift resolution: they run after every node-level
//! atomic update of the snapshot has been applied, in kind order.
//!
//! ## Keys and Merging
//!
//! | Kind            | Key            | Merge                                  |
//! |-----------------|----------------|----------------------------------------|
//! | add             | path           | conflict                               |
//! | delete-resource | path           | no-op                                  |
//! | rename          | source path    | conflict                               |
//! | store-value     | path           | conflict                               |
//! | store-binary    | path           | conflict                               |
//! | optimize        | database       | `all` flags are OR-ed                  |
//! | flush           | database       | no-op                                  |
//! | put             | node id        | paths accumulate, a duplicate conflicts|
//!
//! ## Positions
//!
//! Documents affected by delete-resource and rename are resolved to node
//! identifiers during prepare. At apply time the identifiers are mapped back
//! to positions with a fresh [`IdMap`], since node-level updates and earlier
//! database-level updates have shifted every position by then.
//!
//! ## Scope
//!
//! Prepare sees the rest of the snapshot through a [`ResourceScope`]. A path
//! held by a document that a delete-resource, a rename or a node-level delete
//! removes is free for an add or a rename of the same snapshot. A node that a
//! node-level delete or replacement removes is missing for `put`.

use std::fmt;
use std::mem;
use std::path::PathBuf;

use eyre::Result;
use tracing::debug;

use super::builder::{build_clip, BuildMode};
use super::{CancelFlag, UpdateKind};
use crate::config::{NotFoundPolicy, OnMissing};
use crate::database::Database;
use crate::error::UpdateError;
use crate::resources::{is_within, normalize_path, rebase, BlobStore, ResourceType};
use crate::store::{serialize, DataClip, Fragment, IdMap, NodeId, NodeKind, NodeStore, Pre};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Path(String),
    Node(NodeId),
    Database,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Path(path) => write!(f, "path {:?}", path),
            ResourceKey::Node(id) => write!(f, "node {}", id),
            ResourceKey::Database => f.write_str("database"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOp {
    Add { path: String, nodes: Vec<Fragment> },
    DeleteResource { path: String },
    Rename { source: String, target: String },
    StoreValue { path: String, data: Vec<u8> },
    StoreBinary { path: String, data: Vec<u8> },
    Optimize { all: bool },
    Flush,
    Put { id: NodeId, paths: Vec<PathBuf> },
}

/// Effects of the other primitives of a snapshot on existing resources.
#[derive(Debug, Default)]
pub(crate) struct ResourceScope {
    /// Normalized paths of delete-resource primitives.
    pub deleted: Vec<String>,
    /// Normalized source paths of rename primitives.
    pub moved: Vec<String>,
    /// `[start, end)` pre ranges removed by node-level deletes and replacements.
    pub removed: Vec<(Pre, Pre)>,
    /// `[start, end)` pre ranges of documents replaced in place.
    pub renewed: Vec<(Pre, Pre)>,
}

impl ResourceScope {
    fn removes(&self, pre: Pre) -> bool {
        self.removed.iter().any(|&(start, end)| (start..end).contains(&pre))
    }

    /// True if the node with pre `pre` loses its identifier.
    fn drops(&self, pre: Pre) -> bool {
        self.removes(pre) || self.renewed.iter().any(|&(start, end)| (start..end).contains(&pre))
    }

    /// True if the document at `pre` no longer holds `path` once the
    /// snapshot is applied.
    fn frees(&self, pre: Pre, path: &str) -> bool {
        self.removes(pre)
            || self.deleted.iter().any(|d| is_within(path, d))
            || self.moved.iter().any(|m| is_within(path, m))
    }
}

#[derive(Debug, Clone)]
pub struct ResourceUpdate {
    op: ResourceOp,
    clip: Option<DataClip>,
    /// Affected documents and their final paths, resolved during prepare.
    documents: Vec<(NodeId, String)>,
    skip: bool,
}

impl ResourceUpdate {
    fn new(op: ResourceOp) -> Self {
        Self {
            op,
            clip: None,
            documents: Vec::new(),
            skip: false,
        }
    }

    /// Adds a document at `path` holding `nodes`.
    pub fn add(path: impl Into<String>, nodes: Vec<Fragment>) -> Self {
        Self::new(ResourceOp::Add {
            path: path.into(),
            nodes,
        })
    }

    /// Deletes every resource at or below `path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(ResourceOp::DeleteResource { path: path.into() })
    }

    /// Moves every resource at or below `source` to `target`.
    pub fn rename(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(ResourceOp::Rename {
            source: source.into(),
            target: target.into(),
        })
    }

    pub fn store_value(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(ResourceOp::StoreValue {
            path: path.into(),
            data: data.into(),
        })
    }

    pub fn store_binary(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::new(ResourceOp::StoreBinary {
            path: path.into(),
            data: data.into(),
        })
    }

    pub fn optimize(all: bool) -> Self {
        Self::new(ResourceOp::Optimize { all })
    }

    pub fn flush() -> Self {
        Self::new(ResourceOp::Flush)
    }

    /// Serializes the node with identifier `id` to a file once the snapshot
    /// is applied.
    pub fn put(id: NodeId, path: impl Into<PathBuf>) -> Self {
        Self::new(ResourceOp::Put {
            id,
            paths: vec![path.into()],
        })
    }

    pub fn op(&self) -> &ResourceOp {
        &self.op
    }

    pub fn kind(&self) -> UpdateKind {
        match &self.op {
            ResourceOp::Add { .. } => UpdateKind::Add,
            ResourceOp::DeleteResource { .. } => UpdateKind::DeleteResource,
            ResourceOp::Rename { .. } => UpdateKind::Rename,
            ResourceOp::StoreValue { .. } => UpdateKind::StoreValue,
            ResourceOp::StoreBinary { .. } => UpdateKind::StoreBinary,
            ResourceOp::Optimize { .. } => UpdateKind::Optimize,
            ResourceOp::Flush => UpdateKind::Flush,
            ResourceOp::Put { .. } => UpdateKind::Put,
        }
    }

    pub fn key(&self) -> ResourceKey {
        match &self.op {
            ResourceOp::Add { path, .. }
            | ResourceOp::DeleteResource { path }
            | ResourceOp::Rename { source: path, .. }
            | ResourceOp::StoreValue { path, .. }
            | ResourceOp::StoreBinary { path, .. } => ResourceKey::Path(key_path(path)),
            ResourceOp::Put { id, .. } => ResourceKey::Node(*id),
            ResourceOp::Optimize { .. } | ResourceOp::Flush => ResourceKey::Database,
        }
    }

    /// Paths this primitive creates resources at. For a rename these are
    /// the final paths of the moved documents.
    pub(crate) fn scheduled_paths(&self) -> Vec<String> {
        match &self.op {
            ResourceOp::Add { path, .. } => vec![key_path(path)],
            ResourceOp::Rename { target, .. } if self.documents.is_empty() => vec![key_path(target)],
            ResourceOp::Rename { .. } => self.documents.iter().map(|(_, path)| path.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Number of affected resources, for update-count reporting.
    pub fn size(&self) -> usize {
        match &self.op {
            ResourceOp::DeleteResource { .. } | ResourceOp::Rename { .. } => {
                self.documents.len().max(1)
            }
            ResourceOp::Put { paths, .. } => paths.len(),
            _ => 1,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    pub fn merge(&mut self, other: ResourceUpdate) -> Result<()> {
        let kind = self.kind();
        let key = self.key();
        if kind != other.kind() || key != other.key() {
            return Err(UpdateError::Internal(format!(
                "cannot merge {} on {} into {} on {}",
                other.kind(),
                other.key(),
                kind,
                key
            ))
            .into());
        }
        match (&mut self.op, other.op) {
            (ResourceOp::DeleteResource { .. }, _) | (ResourceOp::Flush, _) => Ok(()),
            (ResourceOp::Optimize { all }, ResourceOp::Optimize { all: other_all }) => {
                *all |= other_all;
                Ok(())
            }
            (ResourceOp::Put { paths, .. }, ResourceOp::Put { paths: more, .. }) => {
                for path in more {
                    if paths.contains(&path) {
                        return Err(UpdateError::conflict(kind, path.display()).into());
                    }
                    paths.push(path);
                }
                Ok(())
            }
            _ => Err(UpdateError::conflict(kind, key).into()),
        }
    }

    /// Validates the primitive against the unmodified database and resolves
    /// the documents it affects.
    pub(crate) fn prepare<S: NodeStore>(
        &mut self,
        db: &Database<S>,
        scope: &ResourceScope,
        policy: NotFoundPolicy,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let kind = self.kind();
        let invalid = |message: String| -> eyre::Report { UpdateError::validation(kind, message).into() };
        let store = db.store();
        let docs = db.docs();

        match &mut self.op {
            ResourceOp::Add { path, nodes } => {
                let normalized = normalize_path(path)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| invalid(format!("invalid resource path {:?}", path)))?;
                if let Some(existing) = docs.exact(&normalized) {
                    if !scope.frees(existing, &normalized) {
                        return Err(invalid(format!("resource {:?} already exists", normalized)));
                    }
                }
                let children: Vec<Fragment> = mem::take(nodes)
                    .into_iter()
                    .flat_map(|node| match node {
                        Fragment::Document { children, .. } => children,
                        other => vec![other],
                    })
                    .collect();
                if let Some(attr) = children.iter().find(|n| n.kind() == NodeKind::Attribute) {
                    return Err(invalid(format!(
                        "attribute {} cannot be a document child",
                        attr.name().unwrap_or_default()
                    )));
                }
                let document = Fragment::document(normalized.clone(), children);
                self.clip = Some(build_clip(std::slice::from_ref(&document), BuildMode::Documents, cancel)?);
                if let Fragment::Document { children, .. } = document {
                    *nodes = children;
                }
                *path = normalized;
            }
            ResourceOp::DeleteResource { path } => {
                *path = normalize_path(path).ok_or_else(|| invalid(format!("invalid resource path {:?}", path)))?;
                let found = docs.prefix(path);
                if found.is_empty() && !has_blobs(db.blobs(), path)? {
                    self.skip = missing(policy, kind, &*path)?;
                }
                self.documents = found
                    .into_iter()
                    .filter(|&pre| !scope.removes(pre))
                    .map(|pre| (store.id(pre), docs.path(pre).unwrap_or_default().to_string()))
                    .collect();
            }
            ResourceOp::Rename { source, target } => {
                *source = normalize_path(source).ok_or_else(|| invalid(format!("invalid source path {:?}", source)))?;
                *target = normalize_path(target)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| invalid(format!("invalid target path {:?}", target)))?;
                let (source, target) = (source.as_str(), target.as_str());
                let found = docs.prefix(source);
                if found.is_empty() && !has_blobs(db.blobs(), source)? {
                    self.skip = missing(policy, kind, source)?;
                }
                self.documents = found
                    .into_iter()
                    .filter(|&pre| !scope.removes(pre))
                    .map(|pre| {
                        let current = docs.path(pre).unwrap_or_default();
                        (store.id(pre), rebase(current, source, target))
                    })
                    .collect();

                let finals = self.documents.iter().map(|(_, path)| path.as_str());
                for path in std::iter::once(target).chain(finals) {
                    if let Some(existing) = docs.exact(path) {
                        if !scope.frees(existing, path) {
                            return Err(invalid(format!("target {:?} already exists", path)));
                        }
                    }
                }
            }
            ResourceOp::StoreValue { path, .. } | ResourceOp::StoreBinary { path, .. } => {
                *path = normalize_path(path)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| invalid(format!("invalid resource path {:?}", path)))?;
            }
            ResourceOp::Optimize { .. } | ResourceOp::Flush => {}
            ResourceOp::Put { id, paths } => {
                if paths.iter().any(|p| p.as_os_str().is_empty()) {
                    return Err(invalid("empty output path".to_string()));
                }
                match store.pre_of(*id) {
                    Some(pre) if !scope.drops(pre) => {}
                    _ => self.skip = missing(policy, kind, format!("node {}", id))?,
                }
            }
        }
        Ok(())
    }

    /// Applies the primitive. Runs after every node-level atomic update.
    pub fn apply<S: NodeStore>(&mut self, db: &mut Database<S>, policy: NotFoundPolicy) -> Result<()> {
        if self.skip {
            return Ok(());
        }
        let kind = self.kind();
        match &mut self.op {
            ResourceOp::Add { path, .. } => {
                let clip = self.clip.take().ok_or_else(|| {
                    UpdateError::Internal(format!("add of {:?} was not prepared", path))
                })?;
                let end = db.store().len();
                db.insert_nodes(end, None, &clip)?;
                debug!(path = %path, nodes = clip.len(), "added document");
            }
            ResourceOp::DeleteResource { path } => {
                let ids = IdMap::build(db.store());
                let mut pres = Vec::with_capacity(self.documents.len());
                for (id, doc_path) in &self.documents {
                    match ids.get(*id) {
                        Some(pre) => pres.push(pre),
                        None => {
                            missing(policy, kind, doc_path)?;
                        }
                    }
                }
                pres.sort_unstable_by(|a, b| b.cmp(a));
                for pre in &pres {
                    let size = db.store().size(*pre, NodeKind::Document);
                    db.delete_nodes(*pre, size)?;
                }
                let blobs = db.blobs_mut().delete(path)?;
                debug!(path = %path, documents = pres.len(), blobs, "deleted resources");
            }
            ResourceOp::Rename { source, target } => {
                let ids = IdMap::build(db.store());
                for (id, new_path) in &self.documents {
                    match ids.get(*id) {
                        Some(pre) => db.rename_node(pre, new_path)?,
                        None => {
                            missing(policy, kind, new_path)?;
                        }
                    }
                }
                let blobs = db.blobs_mut().rename(source, target)?;
                debug!(source = %source, target = %target, documents = self.documents.len(), blobs, "renamed resources");
            }
            ResourceOp::StoreValue { path, data } => {
                db.blobs_mut().write(ResourceType::Value, path, data)?;
            }
            ResourceOp::StoreBinary { path, data } => {
                db.blobs_mut().write(ResourceType::Binary, path, data)?;
            }
            ResourceOp::Optimize { all } => db.optimize(*all)?,
            ResourceOp::Flush => db.flush()?,
            ResourceOp::Put { id, paths } => {
                let Some(pre) = IdMap::build(db.store()).get(*id) else {
                    missing(policy, kind, format!("node {}", id))?;
                    return Ok(());
                };
                let xml = serialize(db.store(), pre);
                for path in paths.iter() {
                    std::fs::write(path, xml.as_bytes()).map_err(|e| UpdateError::io(path, e))?;
                    debug!(path = %path.display(), bytes = xml.len(), "put node");
                }
            }
        }
        Ok(())
    }
}

fn key_path(path: &str) -> String {
    normalize_path(path).unwrap_or_else(|| path.to_string())
}

fn has_blobs(blobs: &dyn BlobStore, path: &str) -> Result<bool> {
    for rtype in ResourceType::ALL {
        if blobs.paths(rtype)?.iter().any(|p| is_within(p, path)) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Applies the not-found policy. Returns true if the target is skipped.
fn missing(policy: NotFoundPolicy, kind: UpdateKind, target: impl fmt::Display) -> Result<bool> {
    match policy.for_kind(kind) {
        OnMissing::Ignore => {
            debug!(%kind, %target, "target not found, skipping");
            Ok(true)
        }
        OnMissing::Fail => Err(UpdateError::not_found(kind, target).into()),
    }
}
