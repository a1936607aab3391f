//! # Node-Level Primitives
//!
//! A [`NodeUpdate`] is one update intent on a stored node, addressed by the
//! node's snapshot position. The kind set is closed; behavior is selected by
//! matching on [`NodeOp`].
//!
//! ## Contract
//!
//! | Operation     | Effect                                                         |
//! |---------------|----------------------------------------------------------------|
//! | `merge`       | absorb a same-kind primitive on the same target               |
//! | `prepare`     | validate target and payload, stage the payload into a clip    |
//! | `substitute`  | rewrite content replacement into deletes and a text insert    |
//! | `add_atomics` | emit atomic updates addressed by snapshot positions           |
//! | `size`        | number of fragments for update-count reporting                |
//!
//! ## Merging
//!
//! - inserts: the other payload is appended (request order kept) and the
//!   staged clip is dropped so the next `prepare` builds it from the whole
//!   payload, merging texts across the boundary
//! - delete: no-op
//! - replace-node, replace-document, replace-value, rename-node: conflict
//!
//! ## Insert Locations
//!
//! ```text
//! <p>                     before  T: pre(T)             parent(T)
//!   <T a="1">             after   T: pre(T) + size(T)   parent(T)
//!     <c/>                as-first, attributes: pre(T) + asize(T), T
//!   </T>                  into, as-last: pre(T) + size(T), T
//! </p>
//! ```

use std::mem;

use eyre::Result;
use smallvec::SmallVec;

use super::atomic::{AtomicUpdate, AtomicUpdateCache};
use super::builder::{build_clip, BuildMode};
use super::{CancelFlag, UpdateKind};
use crate::config::INLINE_ATTRIBUTES;
use crate::error::UpdateError;
use crate::store::{DataClip, Fragment, NodeKind, NodeStore, Pre};

/// Where an insert attaches its staged clip relative to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertPosition {
    Before,
    After,
    Into,
    AsFirst,
    AsLast,
    Attributes,
}

impl InsertPosition {
    pub fn kind(self) -> UpdateKind {
        match self {
            InsertPosition::Before => UpdateKind::InsertBefore,
            InsertPosition::After => UpdateKind::InsertAfter,
            InsertPosition::Into => UpdateKind::InsertInto,
            InsertPosition::AsFirst => UpdateKind::InsertIntoAsFirst,
            InsertPosition::AsLast => UpdateKind::InsertIntoAsLast,
            InsertPosition::Attributes => UpdateKind::InsertAttributes,
        }
    }

    /// Order of inserts sharing a location and a parent.
    pub fn rank(self) -> u8 {
        match self {
            InsertPosition::Attributes => 0,
            InsertPosition::AsFirst => 1,
            InsertPosition::After => 2,
            InsertPosition::Before => 3,
            InsertPosition::Into => 4,
            InsertPosition::AsLast => 5,
        }
    }

    /// Insertion location and parent for a target, in snapshot positions.
    pub fn locate<S: NodeStore + ?Sized>(self, store: &S, pre: Pre) -> (Pre, Option<Pre>) {
        let kind = store.kind(pre);
        match self {
            InsertPosition::Before => (pre, store.parent(pre, kind)),
            InsertPosition::After => (pre + store.size(pre, kind), store.parent(pre, kind)),
            InsertPosition::Into | InsertPosition::AsLast => {
                (pre + store.size(pre, kind), Some(pre))
            }
            InsertPosition::AsFirst | InsertPosition::Attributes => {
                (pre + store.attribute_size(pre, kind), Some(pre))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOp {
    Delete,
    Insert {
        position: InsertPosition,
        nodes: Vec<Fragment>,
        clip: Option<DataClip>,
    },
    ReplaceNode {
        nodes: Vec<Fragment>,
        clip: Option<DataClip>,
    },
    ReplaceDocument {
        document: Fragment,
        clip: Option<DataClip>,
    },
    ReplaceValue {
        value: String,
        substituted: bool,
    },
    RenameNode {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeUpdate {
    pre: Pre,
    op: NodeOp,
    fragments: usize,
    synthesized: bool,
}

impl NodeUpdate {
    fn new(pre: Pre, op: NodeOp) -> Self {
        let fragments = match &op {
            NodeOp::Insert { nodes, .. } | NodeOp::ReplaceNode { nodes, .. } => nodes.len(),
            _ => 1,
        };
        Self {
            pre,
            op,
            fragments,
            synthesized: false,
        }
    }

    pub fn delete(pre: Pre) -> Self {
        Self::new(pre, NodeOp::Delete)
    }

    pub fn insert(position: InsertPosition, pre: Pre, nodes: Vec<Fragment>) -> Self {
        Self::new(
            pre,
            NodeOp::Insert {
                position,
                nodes,
                clip: None,
            },
        )
    }

    pub fn insert_before(pre: Pre, nodes: Vec<Fragment>) -> Self {
        Self::insert(InsertPosition::Before, pre, nodes)
    }

    pub fn insert_after(pre: Pre, nodes: Vec<Fragment>) -> Self {
        Self::insert(InsertPosition::After, pre, nodes)
    }

    pub fn insert_into(pre: Pre, nodes: Vec<Fragment>) -> Self {
        Self::insert(InsertPosition::Into, pre, nodes)
    }

    pub fn insert_into_as_first(pre: Pre, nodes: Vec<Fragment>) -> Self {
        Self::insert(InsertPosition::AsFirst, pre, nodes)
    }

    pub fn insert_into_as_last(pre: Pre, nodes: Vec<Fragment>) -> Self {
        Self::insert(InsertPosition::AsLast, pre, nodes)
    }

    pub fn insert_attributes(pre: Pre, attributes: Vec<Fragment>) -> Self {
        Self::insert(InsertPosition::Attributes, pre, attributes)
    }

    pub fn replace_node(pre: Pre, nodes: Vec<Fragment>) -> Self {
        Self::new(pre, NodeOp::ReplaceNode { nodes, clip: None })
    }

    pub fn replace_document(pre: Pre, document: Fragment) -> Self {
        Self::new(
            pre,
            NodeOp::ReplaceDocument {
                document,
                clip: None,
            },
        )
    }

    pub fn replace_value(pre: Pre, value: impl Into<String>) -> Self {
        Self::new(
            pre,
            NodeOp::ReplaceValue {
                value: value.into(),
                substituted: false,
            },
        )
    }

    pub fn rename_node(pre: Pre, name: impl Into<String>) -> Self {
        Self::new(pre, NodeOp::RenameNode { name: name.into() })
    }

    fn synthesized(mut self) -> Self {
        self.synthesized = true;
        self
    }

    pub fn pre(&self) -> Pre {
        self.pre
    }

    pub fn op(&self) -> &NodeOp {
        &self.op
    }

    pub fn kind(&self) -> UpdateKind {
        match &self.op {
            NodeOp::Delete => UpdateKind::Delete,
            NodeOp::Insert { position, .. } => position.kind(),
            NodeOp::ReplaceNode { .. } => UpdateKind::ReplaceNode,
            NodeOp::ReplaceDocument { .. } => UpdateKind::ReplaceDocument,
            NodeOp::ReplaceValue { .. } => UpdateKind::ReplaceValue,
            NodeOp::RenameNode { .. } => UpdateKind::RenameNode,
        }
    }

    /// Created by substitution rather than requested.
    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    /// Rewritten into other primitives; kept only for conflict detection.
    pub fn is_substituted(&self) -> bool {
        matches!(self.op, NodeOp::ReplaceValue { substituted: true, .. })
    }

    pub fn is_prepared(&self) -> bool {
        match &self.op {
            NodeOp::Insert { clip, .. }
            | NodeOp::ReplaceNode { clip, .. }
            | NodeOp::ReplaceDocument { clip, .. } => clip.is_some(),
            _ => true,
        }
    }

    pub fn clip(&self) -> Option<&DataClip> {
        match &self.op {
            NodeOp::Insert { clip, .. }
            | NodeOp::ReplaceNode { clip, .. }
            | NodeOp::ReplaceDocument { clip, .. } => clip.as_ref(),
            _ => None,
        }
    }

    /// Number of fragments this primitive inserts, or 1 for other kinds.
    pub fn size(&self) -> usize {
        self.fragments
    }

    pub fn merge(&mut self, other: NodeUpdate) -> Result<()> {
        let kind = self.kind();
        if kind != other.kind() || self.pre != other.pre {
            return Err(UpdateError::Internal(format!(
                "cannot merge {} on pre {} into {} on pre {}",
                other.kind(),
                other.pre,
                kind,
                self.pre
            ))
            .into());
        }
        let synthesized = other.synthesized;
        match (&mut self.op, other.op) {
            (NodeOp::Delete, NodeOp::Delete) => {}
            (
                NodeOp::Insert { nodes, clip, .. },
                NodeOp::Insert {
                    nodes: mut more, ..
                },
            ) => {
                nodes.append(&mut more);
                *clip = None;
                self.fragments = nodes.len();
            }
            _ => return Err(UpdateError::conflict(kind, format!("pre {}", self.pre)).into()),
        }
        self.synthesized &= synthesized;
        Ok(())
    }

    /// Validates the target and stages the payload. Does nothing for a
    /// primitive that is already staged.
    pub fn prepare<S: NodeStore + ?Sized>(&mut self, store: &S, cancel: &CancelFlag) -> Result<()> {
        if self.is_prepared() && !matches!(self.op, NodeOp::ReplaceValue { .. } | NodeOp::RenameNode { .. }) {
            return Ok(());
        }
        let kind = self.kind();
        let pre = self.pre;
        let target = store.kind(pre);
        let has_parent = store.parent(pre, target).is_some();
        let invalid = |message: String| -> eyre::Report { UpdateError::validation(kind, message).into() };

        match &mut self.op {
            NodeOp::Delete => {}
            NodeOp::Insert {
                position,
                nodes,
                clip,
            } => {
                let position = *position;
                match position {
                    InsertPosition::Before | InsertPosition::After => {
                        if !has_parent || target == NodeKind::Attribute {
                            return Err(invalid(format!("{} target at pre {} has no siblings", target, pre)));
                        }
                    }
                    InsertPosition::Attributes => {
                        if target != NodeKind::Element {
                            return Err(invalid(format!("{} target at pre {} cannot own attributes", target, pre)));
                        }
                    }
                    _ => {
                        if !target.is_container() {
                            return Err(invalid(format!("{} target at pre {} cannot own children", target, pre)));
                        }
                    }
                }
                let attributes_only = position == InsertPosition::Attributes;
                check_payload(nodes, attributes_only).map_err(invalid)?;
                let staged = build_clip(nodes, BuildMode::Nodes, cancel)?;
                self.fragments = staged.fragments();
                *clip = Some(staged);
            }
            NodeOp::ReplaceNode { nodes, clip } => {
                if target == NodeKind::Document || !has_parent {
                    return Err(invalid(format!(
                        "{} target at pre {} has no parent; use replace-document",
                        target, pre
                    )));
                }
                check_payload(nodes, target == NodeKind::Attribute).map_err(invalid)?;
                let staged = build_clip(nodes, BuildMode::Nodes, cancel)?;
                self.fragments = staged.fragments();
                *clip = Some(staged);
            }
            NodeOp::ReplaceDocument { document, clip } => {
                if target != NodeKind::Document {
                    return Err(invalid(format!("{} target at pre {} is not a document", target, pre)));
                }
                let payload = document.kind();
                let Fragment::Document { path, .. } = document else {
                    return Err(invalid(format!("{} payload is not a document", payload)));
                };
                *path = store.name(pre).unwrap_or_default().to_string();
                let staged = build_clip(std::slice::from_ref(document), BuildMode::Documents, cancel)?;
                self.fragments = staged.fragments();
                *clip = Some(staged);
            }
            NodeOp::ReplaceValue { value, .. } => match target {
                NodeKind::Document => {
                    return Err(invalid(format!("document at pre {} has no value", pre)));
                }
                NodeKind::Comment if value.contains("--") || value.ends_with('-') => {
                    return Err(invalid(format!("invalid comment value {:?}", value)));
                }
                NodeKind::ProcessingInstruction if value.contains("?>") => {
                    return Err(invalid(format!("invalid processing instruction value {:?}", value)));
                }
                _ => {}
            },
            NodeOp::RenameNode { name } => {
                if !matches!(
                    target,
                    NodeKind::Element | NodeKind::Attribute | NodeKind::ProcessingInstruction
                ) {
                    return Err(invalid(format!("{} at pre {} has no name", target, pre)));
                }
                if name.is_empty() || name.chars().any(char::is_whitespace) {
                    return Err(invalid(format!("invalid name {:?}", name)));
                }
            }
        }
        Ok(())
    }

    /// Rewrites content replacement. Returns the primitives that take over;
    /// `self` stays in the list, marked as substituted.
    pub fn substitute<S: NodeStore + ?Sized>(&mut self, store: &S) -> Vec<NodeUpdate> {
        let pre = self.pre;
        let NodeOp::ReplaceValue { value, substituted } = &mut self.op else {
            return Vec::new();
        };
        if *substituted {
            return Vec::new();
        }
        match store.kind(pre) {
            NodeKind::Element => {
                *substituted = true;
                let mut replacement: Vec<NodeUpdate> = store
                    .children(pre)
                    .into_iter()
                    .map(|child| NodeUpdate::delete(child).synthesized())
                    .collect();
                if !value.is_empty() {
                    let text = mem::take(value);
                    let mut insert =
                        NodeUpdate::insert_into_as_first(pre, vec![Fragment::text(text.clone())]);
                    if let NodeOp::Insert { clip, .. } = &mut insert.op {
                        *clip = Some(DataClip::text(text));
                    }
                    replacement.push(insert.synthesized());
                }
                replacement
            }
            NodeKind::Text if value.is_empty() => {
                *substituted = true;
                vec![NodeUpdate::delete(pre).synthesized()]
            }
            _ => Vec::new(),
        }
    }

    /// Emits atomic updates for this primitive. Staged clips move into the
    /// cache.
    pub fn add_atomics<S: NodeStore + ?Sized>(
        &mut self,
        store: &S,
        cache: &mut AtomicUpdateCache,
    ) -> Result<()> {
        let pre = self.pre;
        let kind = store.kind(pre);
        let size = store.size(pre, kind);
        let parent = store.parent(pre, kind);
        let unprepared = || -> eyre::Report {
            UpdateError::Internal(format!("atomic updates requested for unprepared node update on pre {}", pre)).into()
        };

        match &mut self.op {
            NodeOp::Delete => cache.push(AtomicUpdate::Delete {
                location: pre,
                size,
                parent,
            }),
            NodeOp::Insert { position, clip, .. } => {
                let clip = clip.take().ok_or_else(unprepared)?;
                if !clip.is_empty() {
                    let (location, parent) = position.locate(store, pre);
                    cache.push(AtomicUpdate::Insert {
                        location,
                        parent,
                        position: *position,
                        clip,
                    });
                }
            }
            NodeOp::ReplaceNode { clip, .. } | NodeOp::ReplaceDocument { clip, .. } => {
                let clip = clip.take().ok_or_else(unprepared)?;
                if clip.is_empty() {
                    cache.push(AtomicUpdate::Delete {
                        location: pre,
                        size,
                        parent,
                    });
                } else {
                    cache.push(AtomicUpdate::Replace {
                        location: pre,
                        size,
                        parent,
                        clip,
                    });
                }
            }
            NodeOp::ReplaceValue { value, substituted } => {
                if !*substituted {
                    cache.push(AtomicUpdate::UpdateValue {
                        location: pre,
                        value: mem::take(value),
                    });
                }
            }
            NodeOp::RenameNode { name } => cache.push(AtomicUpdate::Rename {
                location: pre,
                name: mem::take(name),
            }),
        }
        Ok(())
    }

    /// Names of the attributes this primitive adds to an element.
    pub(crate) fn added_attribute_names(&self) -> SmallVec<[&str; INLINE_ATTRIBUTES]> {
        let mut names = SmallVec::new();
        match &self.op {
            NodeOp::Insert {
                position: InsertPosition::Attributes,
                nodes,
                ..
            }
            | NodeOp::ReplaceNode { nodes, .. } => {
                for node in nodes {
                    if let Fragment::Attribute { name, .. } = node {
                        names.push(name.as_str());
                    }
                }
            }
            NodeOp::RenameNode { name } => names.push(name.as_str()),
            _ => {}
        }
        names
    }
}

fn check_payload(nodes: &[Fragment], attributes_only: bool) -> std::result::Result<(), String> {
    for node in nodes {
        let is_attribute = node.kind() == NodeKind::Attribute;
        if attributes_only && !is_attribute {
            return Err(format!("{} in an attribute-only payload", node.kind()));
        }
        if !attributes_only && is_attribute {
            return Err(format!(
                "attribute {} in a payload that takes no attributes",
                node.name().unwrap_or_default()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    // 0 doc, 1 <r>, 2 @a, 3 <x>, 4 "t", 5 <y/>, 6 <!--c-->
    fn store() -> MemStore {
        let mut store = MemStore::new();
        let doc = Fragment::document(
            "d.xml",
            vec![Fragment::element("r")
                .with_attribute("a", "1")
                .with_child(Fragment::element("x").with_child(Fragment::text("t")))
                .with_child(Fragment::element("y"))
                .with_child(Fragment::comment("c"))],
        );
        store.insert(0, None, &DataClip::from_fragment(&doc)).unwrap();
        store
    }

    fn validation(result: Result<()>) -> bool {
        result
            .err()
            .and_then(|e| e.downcast_ref::<UpdateError>().map(UpdateError::is_validation))
            .unwrap_or(false)
    }

    #[test]
    fn delete_merge_is_noop() {
        let mut first = NodeUpdate::delete(3);

        first.merge(NodeUpdate::delete(3)).unwrap();

        assert_eq!(first.size(), 1);
        let mut cache = AtomicUpdateCache::new();
        first.add_atomics(&store(), &mut cache).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn insert_merge_appends_in_request_order() {
        let mut a = NodeUpdate::insert_before(3, vec![Fragment::element("a1"), Fragment::element("a2")]);
        let b = NodeUpdate::insert_before(3, vec![Fragment::element("b1")]);

        a.merge(b).unwrap();
        a.prepare(&store(), &CancelFlag::new()).unwrap();

        let names: Vec<_> = a
            .clip()
            .unwrap()
            .records()
            .iter()
            .map(|r| r.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["a1", "a2", "b1"]);
        assert_eq!(a.size(), 3);
    }

    #[test]
    fn single_valued_kinds_conflict() {
        for (first, second) in [
            (NodeUpdate::replace_node(3, vec![]), NodeUpdate::replace_node(3, vec![])),
            (NodeUpdate::replace_value(4, "a"), NodeUpdate::replace_value(4, "b")),
            (NodeUpdate::rename_node(3, "a"), NodeUpdate::rename_node(3, "b")),
        ] {
            let mut first = first;
            let err = first.merge(second).unwrap_err();
            assert!(err.downcast_ref::<UpdateError>().unwrap().is_conflict());
        }
    }

    #[test]
    fn insert_locations_follow_target_layout() {
        let store = store();

        assert_eq!(InsertPosition::Before.locate(&store, 3), (3, Some(1)));
        assert_eq!(InsertPosition::After.locate(&store, 3), (5, Some(1)));
        assert_eq!(InsertPosition::Into.locate(&store, 1), (7, Some(1)));
        assert_eq!(InsertPosition::AsFirst.locate(&store, 1), (3, Some(1)));
        assert_eq!(InsertPosition::Attributes.locate(&store, 1), (3, Some(1)));
    }

    #[test]
    fn target_kinds_are_validated() {
        let store = store();
        let cancel = CancelFlag::new();

        assert!(validation(
            NodeUpdate::insert_into(4, vec![Fragment::element("e")]).prepare(&store, &cancel)
        ));
        assert!(validation(
            NodeUpdate::insert_before(0, vec![Fragment::element("e")]).prepare(&store, &cancel)
        ));
        assert!(validation(NodeUpdate::replace_node(0, vec![]).prepare(&store, &cancel)));
        assert!(validation(NodeUpdate::replace_value(0, "v").prepare(&store, &cancel)));
        assert!(validation(NodeUpdate::rename_node(4, "n").prepare(&store, &cancel)));
        assert!(validation(
            NodeUpdate::replace_document(1, Fragment::document("x", vec![])).prepare(&store, &cancel)
        ));
    }

    #[test]
    fn payload_kinds_are_validated() {
        let store = store();
        let cancel = CancelFlag::new();

        assert!(validation(
            NodeUpdate::insert_into(1, vec![Fragment::attribute("b", "2")]).prepare(&store, &cancel)
        ));
        assert!(validation(
            NodeUpdate::insert_attributes(1, vec![Fragment::text("t")]).prepare(&store, &cancel)
        ));
        assert!(validation(
            NodeUpdate::replace_node(2, vec![Fragment::element("e")]).prepare(&store, &cancel)
        ));
        NodeUpdate::replace_node(2, vec![Fragment::attribute("b", "2")])
            .prepare(&store, &cancel)
            .unwrap();
    }

    #[test]
    fn comment_and_pi_values_are_validated() {
        let store = store();
        let cancel = CancelFlag::new();

        assert!(validation(NodeUpdate::replace_value(6, "a--b").prepare(&store, &cancel)));
        assert!(validation(NodeUpdate::replace_value(6, "a-").prepare(&store, &cancel)));
        NodeUpdate::replace_value(6, "fine").prepare(&store, &cancel).unwrap();
    }

    #[test]
    fn element_content_replacement_substitutes_deletes_and_text() {
        let store = store();
        let mut rec = NodeUpdate::replace_value(1, "x");

        let replacement = rec.substitute(&store);

        let summary: Vec<_> = replacement.iter().map(|u| (u.kind(), u.pre())).collect();
        assert_eq!(
            summary,
            vec![
                (UpdateKind::Delete, 3),
                (UpdateKind::Delete, 5),
                (UpdateKind::Delete, 6),
                (UpdateKind::InsertIntoAsFirst, 1),
            ]
        );
        assert!(replacement.iter().all(NodeUpdate::is_synthesized));
        assert_eq!(replacement[3].clip().unwrap().records()[0].value.as_deref(), Some("x"));
        assert!(rec.is_substituted());

        let mut cache = AtomicUpdateCache::new();
        rec.add_atomics(&store, &mut cache).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn empty_element_content_replacement_only_deletes() {
        let mut rec = NodeUpdate::replace_value(3, "");

        let replacement = rec.substitute(&store());

        assert_eq!(replacement, vec![NodeUpdate::delete(4).synthesized()]);
    }

    #[test]
    fn empty_text_value_becomes_delete() {
        let mut update = NodeUpdate::replace_value(4, "");

        let replacement = update.substitute(&store());

        assert_eq!(replacement.len(), 1);
        assert_eq!(replacement[0].kind(), UpdateKind::Delete);
        assert_eq!(replacement[0].pre(), 4);
        assert!(NodeUpdate::replace_value(4, "v").substitute(&store()).is_empty());
    }

    #[test]
    fn replace_with_empty_payload_emits_delete() {
        let store = store();
        let mut update = NodeUpdate::replace_node(3, vec![]);
        update.prepare(&store, &CancelFlag::new()).unwrap();
        let mut cache = AtomicUpdateCache::new();

        update.add_atomics(&store, &mut cache).unwrap();

        assert_eq!(
            cache.into_updates(),
            vec![AtomicUpdate::Delete {
                location: 3,
                size: 2,
                parent: Some(1)
            }]
        );
    }

    #[test]
    fn replace_document_keeps_the_stored_path() {
        let store = store();
        let mut update =
            NodeUpdate::replace_document(0, Fragment::document("ignored", vec![Fragment::element("n")]));

        update.prepare(&store, &CancelFlag::new()).unwrap();

        let root = &update.clip().unwrap().records()[0];
        assert_eq!(root.kind, NodeKind::Document);
        assert_eq!(root.name.as_deref(), Some("d.xml"));
    }
}
