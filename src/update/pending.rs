//! # Pending Update List
//!
//! `PendingUpdates` collects the primitives of one snapshot and turns them
//! into a single consistent modification of the database.
//!
//! ## Storage
//!
//! Node-level primitives are stored once per `(kind, pre)`, database-level
//! primitives once per `(kind, key)`. A second request for the same slot is
//! merged into the first (see [`NodeUpdate::merge`] and
//! [`ResourceUpdate::merge`]).
//!
//! ## Prepare
//!
//! ```text
//! resolve targets ─> prepare ─> reconcile ─> substitute ─> prepare ─> checks ─> resources
//!   not-found          clips     content       synthesized    new clips   attribute   scope,
//!   policy                       replacement   primitives                 names       scheduled paths
//! ```
//!
//! Every step reads the unmodified snapshot. The store is first touched in
//! [`PendingUpdates::apply`], after all conflicts and validation errors have
//! surfaced.
//!
//! ## Apply
//!
//! 1. node-level primitives emit atomic updates (descending pre, then kind)
//! 2. `Database::apply_atomics` orders, prunes and applies them back to front
//! 3. database-level primitives run in kind order, request order within a kind
//!
//! Any error moves the list to `Failed`. A failed list rejects further calls.

use std::cmp::Reverse;
use std::mem;

use eyre::Result;
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use super::atomic::AtomicUpdateCache;
use super::node::{NodeOp, NodeUpdate};
use super::resource::{ResourceKey, ResourceOp, ResourceScope, ResourceUpdate};
use super::{CancelFlag, UpdateKind};
use crate::config::{OnMissing, UpdateOptions, INLINE_ATTRIBUTES};
use crate::database::Database;
use crate::error::UpdateError;
use crate::resources::normalize_path;
use crate::store::{NodeKind, NodeStore, Pre};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListState {
    #[default]
    Open,
    Prepared,
    Applied,
    Failed,
}

impl ListState {
    pub fn name(self) -> &'static str {
        match self {
            ListState::Open => "open",
            ListState::Prepared => "prepared",
            ListState::Applied => "applied",
            ListState::Failed => "failed",
        }
    }
}

/// A primitive of either level.
#[derive(Debug, Clone)]
pub enum Update {
    Node(NodeUpdate),
    Resource(ResourceUpdate),
}

impl From<NodeUpdate> for Update {
    fn from(update: NodeUpdate) -> Self {
        Update::Node(update)
    }
}

impl From<ResourceUpdate> for Update {
    fn from(update: ResourceUpdate) -> Self {
        Update::Resource(update)
    }
}

/// Counters reported by a successful apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Sum of the sizes of all requested primitives.
    pub size: usize,
    /// Atomic updates applied to the store.
    pub atomics: usize,
    /// Atomic updates dropped because an enclosing node was deleted or replaced.
    pub pruned: usize,
    pub merged_texts: usize,
    /// Primitives dropped during reconciliation.
    pub discarded: usize,
    /// Primitives whose target no longer resolved.
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct PendingUpdates {
    state: ListState,
    nodes: Vec<NodeUpdate>,
    node_slots: HashMap<(UpdateKind, Pre), usize>,
    resources: Vec<ResourceUpdate>,
    resource_slots: HashMap<(UpdateKind, ResourceKey), usize>,
    options: UpdateOptions,
    cancel: CancelFlag,
    discarded: usize,
    skipped: usize,
}

impl PendingUpdates {
    pub fn new(options: UpdateOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Shares `cancel` with the caller; raising it aborts prepare.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    pub fn options(&self) -> UpdateOptions {
        self.options
    }

    /// Number of stored primitives of both levels.
    pub fn len(&self) -> usize {
        self.nodes.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node_updates(&self) -> &[NodeUpdate] {
        &self.nodes
    }

    pub fn resource_updates(&self) -> &[ResourceUpdate] {
        &self.resources
    }

    pub fn find(&self, kind: UpdateKind, pre: Pre) -> Option<&NodeUpdate> {
        self.node_slots.get(&(kind, pre)).map(|&slot| &self.nodes[slot])
    }

    pub fn find_resource(&self, kind: UpdateKind, key: &ResourceKey) -> Option<&ResourceUpdate> {
        self.resource_slots
            .get(&(kind, key.clone()))
            .map(|&slot| &self.resources[slot])
    }

    /// Adds a primitive, merging it with a stored one of the same kind and
    /// target. A failed merge moves the list to `Failed`.
    pub fn add(&mut self, update: impl Into<Update>) -> Result<()> {
        self.require_state(ListState::Open, "add")?;
        let update = update.into();
        let result = match update {
            Update::Node(update) => self.add_node(update),
            Update::Resource(update) => self.add_resource(update),
        };
        if let Err(err) = &result {
            self.fail("add", err);
        }
        result
    }

    /// Validates the list against the unmodified database and stages every
    /// payload.
    pub fn prepare<S: NodeStore>(&mut self, db: &Database<S>) -> Result<()> {
        self.require_state(ListState::Open, "prepare")?;
        match self.prepare_all(db) {
            Ok(()) => {
                self.state = ListState::Prepared;
                debug!(
                    nodes = self.nodes.len(),
                    resources = self.resources.len(),
                    discarded = self.discarded,
                    skipped = self.skipped,
                    "prepared pending updates"
                );
                Ok(())
            }
            Err(err) => {
                self.fail("prepare", &err);
                Err(err)
            }
        }
    }

    /// Applies the list. An open list is prepared first.
    pub fn apply<S: NodeStore>(&mut self, db: &mut Database<S>) -> Result<UpdateSummary> {
        if self.state == ListState::Open {
            self.prepare(db)?;
        }
        self.require_state(ListState::Prepared, "apply")?;
        match self.apply_all(db) {
            Ok(summary) => {
                self.state = ListState::Applied;
                debug!(?summary, "applied pending updates");
                Ok(summary)
            }
            Err(err) => {
                self.fail("apply", &err);
                Err(err)
            }
        }
    }

    fn require_state(&self, state: ListState, operation: &'static str) -> Result<()> {
        if self.state != state {
            return Err(UpdateError::InvalidState {
                operation,
                state: self.state.name(),
            }
            .into());
        }
        Ok(())
    }

    fn fail(&mut self, operation: &'static str, err: &eyre::Report) {
        warn!(operation, error = %err, "pending update list failed");
        self.state = ListState::Failed;
    }

    fn add_node(&mut self, update: NodeUpdate) -> Result<()> {
        let slot = (update.kind(), update.pre());
        trace!(kind = %slot.0, pre = slot.1, "adding node update");
        match self.node_slots.get(&slot) {
            Some(&index) => self.nodes[index].merge(update),
            None => {
                self.node_slots.insert(slot, self.nodes.len());
                self.nodes.push(update);
                Ok(())
            }
        }
    }

    fn add_resource(&mut self, update: ResourceUpdate) -> Result<()> {
        let slot = (update.kind(), update.key());
        trace!(kind = %slot.0, key = %slot.1, "adding resource update");
        match self.resource_slots.get(&slot) {
            Some(&index) => self.resources[index].merge(update),
            None => {
                self.resource_slots.insert(slot, self.resources.len());
                self.resources.push(update);
                Ok(())
            }
        }
    }

    fn has(&self, kind: UpdateKind, pre: Pre) -> bool {
        self.node_slots.contains_key(&(kind, pre))
    }

    /// Keeps the node updates matching `keep` and rebuilds the slot map.
    /// Returns the number of dropped updates.
    fn retain_nodes(&mut self, mut keep: impl FnMut(&NodeUpdate) -> bool) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|update| keep(update));
        self.node_slots = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, update)| ((update.kind(), update.pre()), index))
            .collect();
        before - self.nodes.len()
    }

    fn prepare_all<S: NodeStore>(&mut self, db: &Database<S>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(UpdateError::Cancelled.into());
        }
        let store = db.store();
        let policy = self.options.not_found;

        let len = store.len();
        let mut unresolved = Ok(());
        let skipped = self.retain_nodes(|update| {
            if update.pre() < len {
                return true;
            }
            if unresolved.is_ok() && policy.for_kind(update.kind()) == OnMissing::Fail {
                unresolved = Err(UpdateError::not_found(update.kind(), format!("pre {}", update.pre())));
            }
            false
        });
        unresolved?;
        if skipped > 0 {
            debug!(skipped, "skipped node updates with unresolved targets");
        }
        self.skipped += skipped;

        for update in &mut self.nodes {
            update.prepare(store, &self.cancel)?;
        }

        self.reconcile_content_replacement(store);

        let mut synthesized = Vec::new();
        for update in &mut self.nodes {
            synthesized.extend(update.substitute(store));
        }
        for update in synthesized {
            self.add_node(update)?;
        }
        for update in &mut self.nodes {
            update.prepare(store, &self.cancel)?;
        }

        let replaced: HashSet<Pre> = self
            .nodes
            .iter()
            .filter(|u| matches!(u.kind(), UpdateKind::ReplaceNode | UpdateKind::ReplaceDocument))
            .map(NodeUpdate::pre)
            .collect();
        if !replaced.is_empty() {
            let dropped = self.retain_nodes(|u| !(u.kind() == UpdateKind::Delete && replaced.contains(&u.pre())));
            self.discarded += dropped;
        }

        self.check_attribute_names(store)?;
        if self.resources.is_empty() {
            return Ok(());
        }

        let scope = self.resource_scope(store);
        for update in &mut self.resources {
            update.prepare(db, &scope, policy, &self.cancel)?;
            if update.is_skipped() {
                self.skipped += 1;
            }
        }
        self.check_scheduled_paths()
    }

    /// Collects what the prepared node-level primitives and the
    /// delete-resource and rename primitives remove from the database.
    fn resource_scope<S: NodeStore>(&self, store: &S) -> ResourceScope {
        let mut scope = ResourceScope::default();
        for update in &self.nodes {
            let pre = update.pre();
            let range = (pre, pre + store.size(pre, store.kind(pre)));
            match update.kind() {
                UpdateKind::Delete | UpdateKind::ReplaceNode => scope.removed.push(range),
                UpdateKind::ReplaceDocument => scope.renewed.push(range),
                _ => {}
            }
        }
        for update in &self.resources {
            match update.op() {
                ResourceOp::DeleteResource { path } => scope.deleted.extend(normalize_path(path)),
                ResourceOp::Rename { source, .. } => scope.moved.extend(normalize_path(source)),
                _ => {}
            }
        }
        scope
    }

    /// Content replacement on an element removes every child, so updates on
    /// or inside the old content and child inserts on the element are
    /// dropped. Attribute updates survive.
    fn reconcile_content_replacement<S: NodeStore>(&mut self, store: &S) {
        let ranges: Vec<(Pre, Pre, Pre)> = self
            .nodes
            .iter()
            .filter(|u| {
                matches!(u.op(), NodeOp::ReplaceValue { substituted: false, .. })
                    && store.kind(u.pre()) == NodeKind::Element
            })
            .map(|u| {
                let pre = u.pre();
                let start = pre + store.attribute_size(pre, NodeKind::Element);
                let end = pre + store.size(pre, NodeKind::Element);
                (pre, start, end)
            })
            .collect();
        if ranges.is_empty() {
            return;
        }

        let dropped = self.retain_nodes(|u| {
            let pre = u.pre();
            !ranges.iter().any(|&(target, start, end)| {
                (start..end).contains(&pre)
                    || (pre == target
                        && matches!(
                            u.kind(),
                            UpdateKind::InsertInto | UpdateKind::InsertIntoAsFirst | UpdateKind::InsertIntoAsLast
                        ))
            })
        });
        if dropped > 0 {
            debug!(dropped, elements = ranges.len(), "discarded updates inside replaced content");
        }
        self.discarded += dropped;
    }

    /// Computes the final attribute name set of every element whose
    /// attributes are inserted, replaced or renamed and rejects duplicates.
    fn check_attribute_names<S: NodeStore>(&self, store: &S) -> Result<()> {
        let mut owners: Vec<(Pre, UpdateKind)> = Vec::new();
        for update in &self.nodes {
            let pre = update.pre();
            match update.kind() {
                UpdateKind::InsertAttributes => owners.push((pre, update.kind())),
                UpdateKind::ReplaceNode | UpdateKind::RenameNode
                    if store.kind(pre) == NodeKind::Attribute =>
                {
                    if let Some(owner) = store.parent(pre, NodeKind::Attribute) {
                        owners.push((owner, update.kind()));
                    }
                }
                _ => {}
            }
        }
        owners.sort_unstable_by_key(|&(owner, _)| owner);
        owners.dedup_by_key(|&mut (owner, _)| owner);

        for (owner, kind) in owners {
            let mut names: SmallVec<[&str; INLINE_ATTRIBUTES]> = SmallVec::new();
            for attr in store.attributes(owner) {
                if let Some(replace) = self.find(UpdateKind::ReplaceNode, attr) {
                    names.extend(replace.added_attribute_names());
                } else if self.has(UpdateKind::Delete, attr) {
                    continue;
                } else if let Some(rename) = self.find(UpdateKind::RenameNode, attr) {
                    names.extend(rename.added_attribute_names());
                } else {
                    names.push(store.name(attr).unwrap_or_default());
                }
            }
            if let Some(insert) = self.find(UpdateKind::InsertAttributes, owner) {
                names.extend(insert.added_attribute_names());
            }

            names.sort_unstable();
            if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
                return Err(UpdateError::validation(
                    kind,
                    format!("duplicate attribute {:?} on element at pre {}", pair[0], owner),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Two primitives creating a resource at the same path conflict.
    fn check_scheduled_paths(&self) -> Result<()> {
        let mut scheduled: HashSet<String> = HashSet::new();
        for update in self.resources.iter().filter(|u| !u.is_skipped()) {
            for path in update.scheduled_paths() {
                if scheduled.contains(&path) {
                    return Err(UpdateError::conflict(update.kind(), format!("path {:?}", path)).into());
                }
                scheduled.insert(path);
            }
        }
        Ok(())
    }

    fn apply_all<S: NodeStore>(&mut self, db: &mut Database<S>) -> Result<UpdateSummary> {
        let mut summary = UpdateSummary {
            discarded: self.discarded,
            skipped: self.skipped,
            ..UpdateSummary::default()
        };
        summary.size = self
            .nodes
            .iter()
            .filter(|u| !u.is_synthesized())
            .map(NodeUpdate::size)
            .sum::<usize>()
            + self
                .resources
                .iter()
                .filter(|u| !u.is_skipped())
                .map(ResourceUpdate::size)
                .sum::<usize>();

        let mut nodes = mem::take(&mut self.nodes);
        self.node_slots.clear();
        nodes.sort_by_key(|u| (Reverse(u.pre()), u.kind()));

        let mut cache = AtomicUpdateCache::new();
        for update in &mut nodes {
            update.add_atomics(db.store(), &mut cache)?;
        }
        if !cache.is_empty() {
            let report = db.apply_atomics(cache)?;
            summary.atomics = report.applied;
            summary.pruned = report.pruned;
            summary.merged_texts = report.merged_texts;
        }

        let mut resources = mem::take(&mut self.resources);
        self.resource_slots.clear();
        resources.sort_by_key(ResourceUpdate::kind);
        let policy = self.options.not_found;
        for update in &mut resources {
            trace!(kind = %update.kind(), key = %update.key(), "applying resource update");
            update.apply(db, policy)?;
        }

        Ok(summary)
    }
}
