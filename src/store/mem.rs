//! # In-Memory Node Store
//!
//! `MemStore` keeps node records in a `Vec` indexed by pre-order rank, with a
//! parallel vector of stable node identifiers.
//!
//! ## Structural Maintenance
//!
//! Inserting `n` records at `pre` (or deleting `n` records from `pre`) must
//! keep two things consistent:
//!
//! 1. the `size` of every ancestor of the insertion point grows (shrinks) by `n`
//! 2. every record behind the insertion point whose parent lies *before* it
//!    gets its `dist` increased (decreased) by `n`; records whose parent moved
//!    with them keep their distance
//!
//! ```text
//! insert 2 records at pre 3, parent 1:
//!
//!   before            after
//!   1 <a>  size 4     1 <a>  size 6
//!   2   <b/>          2   <b/>
//!   3   <c/> dist 2   3   <new/>
//!   4   <d/> dist 3   4   <new/>
//!                     5   <c/> dist 4
//!                     6   <d/> dist 5
//! ```
//!
//! Both passes are linear in the store size, which is fine for a reference
//! store; a paged store would defer distance updates to the end of a batch.

use eyre::{bail, Result};

use super::{DataClip, NodeId, NodeKind, NodeRecord, NodeStore, Pre};

#[derive(Debug, Default)]
pub struct MemStore {
    records: Vec<NodeRecord>,
    ids: Vec<NodeId>,
    next_id: NodeId,
    dirty: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, pre: Pre) -> Option<&NodeRecord> {
        self.records.get(pre)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Identifier the next inserted node will receive.
    pub fn next_id(&self) -> NodeId {
        self.next_id
    }

    /// Positions of all document roots in document order.
    pub fn documents(&self) -> Vec<Pre> {
        let mut docs = Vec::new();
        let mut pre = 0;
        while pre < self.records.len() {
            docs.push(pre);
            pre += self.records[pre].size;
        }
        docs
    }

    /// Recomputes every size and distance from scratch and compares them with
    /// the stored values.
    pub fn verify(&self) -> Result<()> {
        let mut stack: Vec<Pre> = Vec::new();
        for (pre, record) in self.records.iter().enumerate() {
            while let Some(&top) = stack.last() {
                if top + self.records[top].size > pre {
                    break;
                }
                stack.pop();
            }
            let expected_dist = stack.last().map(|&parent| pre - parent).unwrap_or(0);
            if record.dist != expected_dist {
                bail!(
                    "record {} has distance {}, expected {}",
                    pre,
                    record.dist,
                    expected_dist
                );
            }
            if record.size == 0 || pre + record.size > self.records.len() {
                bail!("record {} has invalid size {}", pre, record.size);
            }
            if record.asize == 0 || record.asize > record.size {
                bail!("record {} has invalid attribute size {}", pre, record.asize);
            }
            if record.kind == NodeKind::Element {
                let attrs = self.records[pre + 1..pre + record.asize]
                    .iter()
                    .all(|r| r.kind == NodeKind::Attribute);
                if !attrs {
                    bail!("record {} has attribute size {} covering non-attributes", pre, record.asize);
                }
            }
            stack.push(pre);
        }
        Ok(())
    }

    fn parent_of(&self, pre: Pre) -> Option<Pre> {
        match self.records[pre].dist {
            0 => None,
            dist => Some(pre - dist),
        }
    }

    fn resize_ancestors(&mut self, parent: Option<Pre>, grow: bool, n: usize) {
        let mut ancestor = parent;
        while let Some(pre) = ancestor {
            let record = &mut self.records[pre];
            if grow {
                record.size += n;
            } else {
                record.size -= n;
            }
            ancestor = self.parent_of(pre);
        }
    }

    fn check_position(&self, pre: Pre) -> Result<()> {
        if pre >= self.records.len() {
            bail!("position {} out of range (store size {})", pre, self.records.len());
        }
        Ok(())
    }
}

impl NodeStore for MemStore {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn kind(&self, pre: Pre) -> NodeKind {
        self.records[pre].kind
    }

    fn size(&self, pre: Pre, _kind: NodeKind) -> usize {
        self.records[pre].size
    }

    fn parent(&self, pre: Pre, _kind: NodeKind) -> Option<Pre> {
        self.parent_of(pre)
    }

    fn attribute_size(&self, pre: Pre, _kind: NodeKind) -> usize {
        self.records[pre].asize
    }

    fn name(&self, pre: Pre) -> Option<&str> {
        self.records[pre].name.as_deref()
    }

    fn value(&self, pre: Pre) -> Option<&str> {
        self.records[pre].value.as_deref()
    }

    fn id(&self, pre: Pre) -> NodeId {
        self.ids[pre]
    }

    fn delete(&mut self, pre: Pre, size: usize) -> Result<()> {
        self.check_position(pre)?;
        if size != self.records[pre].size {
            bail!(
                "cannot delete {} records at {}: subtree has {}",
                size,
                pre,
                self.records[pre].size
            );
        }

        let parent = self.parent_of(pre);
        if self.records[pre].kind == NodeKind::Attribute {
            if let Some(owner) = parent {
                self.records[owner].asize -= 1;
            }
        }
        self.resize_ancestors(parent, false, size);

        for index in pre + size..self.records.len() {
            let record = &mut self.records[index];
            if record.dist != 0 && index - record.dist < pre {
                record.dist -= size;
            }
        }

        self.records.drain(pre..pre + size);
        self.ids.drain(pre..pre + size);
        self.dirty = true;
        Ok(())
    }

    fn insert(&mut self, pre: Pre, parent: Option<Pre>, clip: &DataClip) -> Result<()> {
        let n = clip.len();
        if n == 0 {
            return Ok(());
        }
        if pre > self.records.len() {
            bail!("insert position {} out of range (store size {})", pre, self.records.len());
        }
        if let Some(parent) = parent {
            if parent >= pre {
                bail!("parent {} does not precede insert position {}", parent, pre);
            }
        }

        for index in pre..self.records.len() {
            let record = &mut self.records[index];
            if record.dist != 0 && index - record.dist < pre {
                record.dist += n;
            }
        }

        let mut attributes = 0;
        let staged = clip.records().iter().enumerate().map(|(offset, record)| {
            let mut record = record.clone();
            if record.dist == 0 {
                if let Some(parent) = parent {
                    record.dist = pre + offset - parent;
                }
                if record.kind == NodeKind::Attribute {
                    attributes += 1;
                }
            }
            record
        });
        let tail = self.records.split_off(pre);
        self.records.extend(staged);
        self.records.extend(tail);

        let first_id = self.next_id;
        self.next_id += n as NodeId;
        let tail = self.ids.split_off(pre);
        self.ids.extend(first_id..first_id + n as NodeId);
        self.ids.extend(tail);

        if let Some(owner) = parent {
            self.records[owner].asize += attributes;
        }
        self.resize_ancestors(parent, true, n);
        self.dirty = true;
        Ok(())
    }

    fn update_value(&mut self, pre: Pre, value: &str) -> Result<()> {
        self.check_position(pre)?;
        self.records[pre].value = Some(value.to_string());
        self.dirty = true;
        Ok(())
    }

    fn rename(&mut self, pre: Pre, name: &str) -> Result<()> {
        self.check_position(pre)?;
        self.records[pre].name = Some(name.to_string());
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.dirty = false;
        Ok(())
    }

    fn optimize(&mut self, all: bool) -> Result<()> {
        self.records.shrink_to_fit();
        self.ids.shrink_to_fit();
        if all {
            self.verify()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{serialize, Fragment};

    fn store_with(children: Vec<Fragment>) -> MemStore {
        let mut store = MemStore::new();
        let doc = Fragment::document("doc", vec![Fragment::Element {
            name: "r".into(),
            attributes: vec![],
            children,
        }]);
        store.insert(0, None, &DataClip::from_fragment(&doc)).unwrap();
        store
    }

    #[test]
    fn insert_updates_sizes_and_following_distances() {
        let mut store = store_with(vec![
            Fragment::element("b"),
            Fragment::element("c"),
            Fragment::element("d"),
        ]);

        let clip = DataClip::from_fragment(&Fragment::element("new").with_child(Fragment::text("x")));
        store.insert(3, Some(1), &clip).unwrap();

        assert_eq!(serialize(&store, 0), "<r><b/><new>x</new><c/><d/></r>");
        assert_eq!(store.size(1, NodeKind::Element), 6);
        assert_eq!(store.parent(5, NodeKind::Element), Some(1));
        assert_eq!(store.parent(6, NodeKind::Element), Some(1));
        store.verify().unwrap();
    }

    #[test]
    fn delete_shrinks_ancestors() {
        let mut store = store_with(vec![
            Fragment::element("b").with_child(Fragment::element("x")),
            Fragment::element("c"),
        ]);

        store.delete(2, 2).unwrap();

        assert_eq!(serialize(&store, 0), "<r><c/></r>");
        assert_eq!(store.size(0, NodeKind::Document), 3);
        store.verify().unwrap();
    }

    #[test]
    fn delete_rejects_partial_subtree() {
        let mut store = store_with(vec![Fragment::element("b").with_child(Fragment::element("x"))]);

        assert!(store.delete(2, 1).is_err());
    }

    #[test]
    fn attribute_insert_and_delete_track_attribute_size() {
        let mut store = store_with(vec![Fragment::element("b")]);

        let clip = DataClip::from_fragment(&Fragment::attribute("k", "v"));
        store.insert(2, Some(1), &clip).unwrap();
        assert_eq!(store.attribute_size(1, NodeKind::Element), 2);
        assert_eq!(serialize(&store, 0), "<r k=\"v\"><b/></r>");

        store.delete(2, 1).unwrap();
        assert_eq!(store.attribute_size(1, NodeKind::Element), 1);
        store.verify().unwrap();
    }

    #[test]
    fn ids_are_stable_and_fresh() {
        let mut store = store_with(vec![Fragment::element("b")]);
        let id_b = store.id(2);

        store
            .insert(2, Some(1), &DataClip::from_fragment(&Fragment::element("a")))
            .unwrap();

        assert_eq!(store.id(3), id_b);
        assert_ne!(store.id(2), id_b);
        assert_eq!(store.next_id(), 4);
    }

    #[test]
    fn documents_are_top_level_roots() {
        let mut store = store_with(vec![]);
        let second = DataClip::from_fragment(&Fragment::document("other", vec![Fragment::element("x")]));
        store.insert(store.len(), None, &second).unwrap();

        assert_eq!(store.documents(), vec![0, 2]);
        assert!(store.is_dirty());
        store.flush().unwrap();
        assert!(!store.is_dirty());
    }
}
