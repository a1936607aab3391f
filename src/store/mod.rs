//! # Node Store
//!
//! The node store holds XML nodes as one flat sequence in pre-order. A node is
//! addressed by its pre-order rank (`Pre`); the rank of every node behind an
//! insertion or deletion point shifts by the number of nodes inserted or
//! removed. The store also hands out a stable [`NodeId`] per node that keeps
//! identifying the node across such shifts.
//!
//! ## Record Layout
//!
//! ```text
//! pre  kind       dist  size  asize  name     value
//! ---  ---------  ----  ----  -----  -------  -----
//! 0    Document   0     5     1      doc0
//! 1    Element    1     4     2      n
//! 2    Attribute  1     1     1      id       0
//! 3    Element    2     2     1      a
//! 4    Text       1     1     1               hi
//! ```
//!
//! - `dist`: distance to the parent (`pre - parent`), `0` for document roots
//! - `size`: number of records in the subtree, including the node itself
//! - `asize`: `1 +` number of attributes for elements, `1` for other kinds
//!
//! Attributes follow their element directly and precede its children, so
//! the first child of an element sits at `pre + asize` and the node following
//! its subtree at `pre + size`.
//!
//! ## Module Overview
//!
//! - `mem`: [`MemStore`], the in-memory reference implementation
//! - `clip`: [`DataClip`], staged records waiting to be inserted
//! - `fragment`: [`Fragment`], owned node trees used as update payload
//! - `serialize`: compact XML serialization of stored subtrees
//!
//! ## Positions Across Mutations
//!
//! A `Pre` is valid until the next structural mutation. Code that needs to
//! find a node after mutations resolves its `NodeId` through an [`IdMap`],
//! which is rebuilt explicitly for each pass and never kept across one.

pub mod clip;
pub mod fragment;
pub mod mem;
pub mod serialize;

pub use clip::DataClip;
pub use fragment::Fragment;
pub use mem::MemStore;
pub use serialize::serialize;

use eyre::Result;
use hashbrown::HashMap;

/// Pre-order rank of a node.
pub type Pre = usize;

/// Stable node identifier, never reused within one store.
pub type NodeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Element => "element",
            NodeKind::Attribute => "attribute",
            NodeKind::Text => "text",
            NodeKind::Comment => "comment",
            NodeKind::ProcessingInstruction => "processing-instruction",
        }
    }

    /// Kinds that can own children.
    pub fn is_container(self) -> bool {
        matches!(self, NodeKind::Document | NodeKind::Element)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub kind: NodeKind,
    pub dist: usize,
    pub size: usize,
    pub asize: usize,
    pub name: Option<String>,
    pub value: Option<String>,
}

impl NodeRecord {
    pub fn leaf(kind: NodeKind, name: Option<String>, value: Option<String>) -> Self {
        Self {
            kind,
            dist: 0,
            size: 1,
            asize: 1,
            name,
            value,
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::leaf(NodeKind::Text, None, Some(value.into()))
    }
}

/// Navigation and mutation interface of a pre-order node store.
///
/// Navigation methods expect `pre < len()`; callers validate positions
/// before navigating. The structural methods are the low-level primitives the
/// update engine issues in descending position order.
pub trait NodeStore {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self, pre: Pre) -> NodeKind;

    fn size(&self, pre: Pre, kind: NodeKind) -> usize;

    fn parent(&self, pre: Pre, kind: NodeKind) -> Option<Pre>;

    fn attribute_size(&self, pre: Pre, kind: NodeKind) -> usize;

    fn name(&self, pre: Pre) -> Option<&str>;

    fn value(&self, pre: Pre) -> Option<&str>;

    fn id(&self, pre: Pre) -> NodeId;

    fn pre_of(&self, id: NodeId) -> Option<Pre> {
        (0..self.len()).find(|&pre| self.id(pre) == id)
    }

    /// Child positions of a container node in document order, attributes excluded.
    fn children(&self, pre: Pre) -> Vec<Pre> {
        let kind = self.kind(pre);
        let end = pre + self.size(pre, kind);
        let mut child = pre + self.attribute_size(pre, kind);
        let mut children = Vec::new();
        while child < end {
            children.push(child);
            child += self.size(child, self.kind(child));
        }
        children
    }

    /// Attribute positions of an element.
    fn attributes(&self, pre: Pre) -> std::ops::Range<Pre> {
        pre + 1..pre + self.attribute_size(pre, self.kind(pre))
    }

    fn delete(&mut self, pre: Pre, size: usize) -> Result<()>;

    fn insert(&mut self, pre: Pre, parent: Option<Pre>, clip: &DataClip) -> Result<()>;

    fn replace(&mut self, pre: Pre, clip: &DataClip) -> Result<()> {
        let kind = self.kind(pre);
        let size = self.size(pre, kind);
        let parent = self.parent(pre, kind);
        self.delete(pre, size)?;
        self.insert(pre, parent, clip)
    }

    fn update_value(&mut self, pre: Pre, value: &str) -> Result<()>;

    fn rename(&mut self, pre: Pre, name: &str) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn optimize(&mut self, _all: bool) -> Result<()> {
        Ok(())
    }
}

/// Identifier to position map, valid for one pass over an unmodified store.
#[derive(Debug, Default)]
pub struct IdMap {
    pres: HashMap<NodeId, Pre>,
}

impl IdMap {
    pub fn build<S: NodeStore + ?Sized>(store: &S) -> Self {
        let mut pres = HashMap::with_capacity(store.len());
        for pre in 0..store.len() {
            pres.insert(store.id(pre), pre);
        }
        Self { pres }
    }

    pub fn get(&self, id: NodeId) -> Option<Pre> {
        self.pres.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.pres.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pres.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemStore {
        let mut store = MemStore::new();
        let doc = Fragment::document(
            "doc0",
            vec![Fragment::element("n")
                .with_attribute("id", "0")
                .with_child(Fragment::element("a").with_child(Fragment::text("hi")))
                .with_child(Fragment::element("b"))],
        );
        store
            .insert(0, None, &DataClip::from_fragment(&doc))
            .unwrap();
        store
    }

    #[test]
    fn children_skip_attributes() {
        let store = sample();

        assert_eq!(store.children(1), vec![3, 5]);
        assert_eq!(store.attributes(1), 2..3);
    }

    #[test]
    fn id_map_resolves_after_shift() {
        let mut store = sample();
        let id_of_b = store.id(5);

        store.delete(3, 2).unwrap();
        let map = IdMap::build(&store);

        assert_eq!(map.get(id_of_b), Some(3));
        assert_eq!(store.pre_of(id_of_b), Some(3));
    }

    #[test]
    fn kind_names() {
        assert_eq!(NodeKind::ProcessingInstruction.to_string(), "processing-instruction");
        assert!(NodeKind::Document.is_container());
        assert!(!NodeKind::Attribute.is_container());
    }
}
