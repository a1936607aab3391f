//! # Staged Clips
//!
//! A `DataClip` is an owned run of node records waiting to be inserted into a
//! store. Its records use the store layout (pre-order, `dist`/`size`/`asize`),
//! relative to the clip itself: top-level records have `dist == 0` and get
//! their real parent distance when the clip is inserted.
//!
//! Clips are built once per primitive (or per merged group of primitives on
//! the same target) and then only read, so applying an atomic insert never
//! touches the payload a query still holds.

use std::convert::Infallible;

use eyre::Result;

use super::{Fragment, NodeKind, NodeRecord};
use crate::config::DEFAULT_CLIP_CAPACITY;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataClip {
    records: Vec<NodeRecord>,
    fragments: usize,
}

impl DataClip {
    pub fn new() -> Self {
        Self {
            records: Vec::with_capacity(DEFAULT_CLIP_CAPACITY),
            fragments: 0,
        }
    }

    /// Clip holding a single text node.
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            records: vec![NodeRecord::text(value)],
            fragments: 1,
        }
    }

    /// Copies a fragment as-is, without normalizing its content.
    pub fn from_fragment(fragment: &Fragment) -> Self {
        let mut clip = Self::new();
        if let Err(never) = clip.copy(fragment, None, &mut || Ok::<(), Infallible>(())) {
            match never {}
        }
        clip.fragments = 1;
        clip
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of top-level nodes.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    pub fn kind(&self, index: usize) -> NodeKind {
        self.records[index].kind
    }

    /// Positions of the top-level records.
    pub fn roots(&self) -> Vec<usize> {
        let mut roots = Vec::with_capacity(self.fragments);
        let mut index = 0;
        while index < self.records.len() {
            roots.push(index);
            index += self.records[index].size;
        }
        roots
    }

    /// Number of top-level attribute records.
    pub fn top_level_attributes(&self) -> usize {
        self.roots()
            .into_iter()
            .filter(|&i| self.records[i].kind == NodeKind::Attribute)
            .count()
    }

    /// Appends a fragment as a new top-level node. `poll` runs once per copied
    /// node and aborts the copy when it fails.
    pub fn push_fragment(
        &mut self,
        fragment: &Fragment,
        poll: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        self.copy(fragment, None, poll)?;
        self.fragments += 1;
        Ok(())
    }

    fn copy<E>(
        &mut self,
        fragment: &Fragment,
        parent: Option<usize>,
        poll: &mut dyn FnMut() -> Result<(), E>,
    ) -> Result<(), E> {
        poll()?;
        let index = self.records.len();
        let dist = parent.map(|p| index - p).unwrap_or(0);

        match fragment {
            Fragment::Document { path, children } => {
                self.records.push(NodeRecord {
                    dist,
                    ..NodeRecord::leaf(NodeKind::Document, Some(path.clone()), None)
                });
                for child in children {
                    self.copy(child, Some(index), poll)?;
                }
            }
            Fragment::Element {
                name,
                attributes,
                children,
            } => {
                self.records.push(NodeRecord {
                    dist,
                    asize: attributes.len() + 1,
                    ..NodeRecord::leaf(NodeKind::Element, Some(name.clone()), None)
                });
                for (attr_name, attr_value) in attributes {
                    poll()?;
                    let attr_index = self.records.len();
                    self.records.push(NodeRecord {
                        dist: attr_index - index,
                        ..NodeRecord::leaf(
                            NodeKind::Attribute,
                            Some(attr_name.clone()),
                            Some(attr_value.clone()),
                        )
                    });
                }
                for child in children {
                    self.copy(child, Some(index), poll)?;
                }
            }
            Fragment::Attribute { name, value } => {
                self.records.push(NodeRecord {
                    dist,
                    ..NodeRecord::leaf(NodeKind::Attribute, Some(name.clone()), Some(value.clone()))
                });
            }
            Fragment::Text(value) => {
                self.records.push(NodeRecord {
                    dist,
                    ..NodeRecord::text(value.clone())
                });
            }
            Fragment::Comment(value) => {
                self.records.push(NodeRecord {
                    dist,
                    ..NodeRecord::leaf(NodeKind::Comment, None, Some(value.clone()))
                });
            }
            Fragment::ProcessingInstruction { target, value } => {
                self.records.push(NodeRecord {
                    dist,
                    ..NodeRecord::leaf(
                        NodeKind::ProcessingInstruction,
                        Some(target.clone()),
                        Some(value.clone()),
                    )
                });
            }
        }

        self.records[index].size = self.records.len() - index;
        Ok(())
    }
}
