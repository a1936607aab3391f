//! # Atomic Update Cache
//!
//! Node-level primitives are translated into atomic updates addressed by
//! *snapshot* positions, i.e. positions in the store as it was before any
//! update of the snapshot ran. The cache orders them, checks them and drops
//! the ones made redundant by a destructive update.
//!
//! ## Ordering
//!
//! Atomic updates are sorted ascending by:
//!
//! 1. location
//! 2. class: inserts, then destructive updates (delete, replace), then value
//!    updates, then renames
//! 3. inserts only: deeper parent first (a top-level insert comes last)
//! 4. inserts only: attributes, as-first, after, before, into, as-last
//! 5. request order
//!
//! and applied in *reverse*: the update with the highest location runs first,
//! so no application ever shifts a location that is still to be used. Inserts
//! at one location are applied last-to-first, which puts the content of the
//! first sorted insert first in document order.
//!
//! ## Tree-Aware Pruning
//!
//! ```text
//! delete [5, 9)     covers locations 5..9
//! rename  at 7      dropped, inside the deleted subtree
//! update  at 5      dropped, targets the deleted node
//! insert  at 9      dropped when its parent lies in 5..9 (insert into)
//! insert  at 5      kept, inserts before the deleted node
//! ```
//!
//! ## Checks
//!
//! Two deletes of the same node collapse into one. Any other pair of
//! destructive updates on one node, and two value updates or two renames of
//! one node, raise `UpdateError::Internal`; the pending list never produces
//! them, so hitting one means the list is inconsistent.
//!
//! ## Text Adjacency
//!
//! After application, the new location of an update is its snapshot location
//! plus the shifts of every update sorted before it. [`text_candidates`]
//! returns the left position of each pair of records that may have become
//! adjacent texts, in descending order, so merging one pair never moves
//! another candidate.
//!
//! [`text_candidates`]: AtomicUpdateCache::text_candidates

use std::cmp::{Ordering, Reverse};

use eyre::Result;
use tracing::trace;

use super::node::InsertPosition;
use crate::error::UpdateError;
use crate::store::{DataClip, Pre};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtomicUpdate {
    Delete {
        location: Pre,
        size: usize,
        parent: Option<Pre>,
    },
    Insert {
        location: Pre,
        parent: Option<Pre>,
        position: InsertPosition,
        clip: DataClip,
    },
    Replace {
        location: Pre,
        size: usize,
        parent: Option<Pre>,
        clip: DataClip,
    },
    UpdateValue {
        location: Pre,
        value: String,
    },
    Rename {
        location: Pre,
        name: String,
    },
}

impl AtomicUpdate {
    pub fn location(&self) -> Pre {
        match self {
            AtomicUpdate::Delete { location, .. }
            | AtomicUpdate::Insert { location, .. }
            | AtomicUpdate::Replace { location, .. }
            | AtomicUpdate::UpdateValue { location, .. }
            | AtomicUpdate::Rename { location, .. } => *location,
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, AtomicUpdate::Delete { .. } | AtomicUpdate::Replace { .. })
    }

    /// Change of the store size caused by this update.
    pub fn shift(&self) -> isize {
        match self {
            AtomicUpdate::Delete { size, .. } => -(*size as isize),
            AtomicUpdate::Insert { clip, .. } => clip.len() as isize,
            AtomicUpdate::Replace { size, clip, .. } => clip.len() as isize - *size as isize,
            AtomicUpdate::UpdateValue { .. } | AtomicUpdate::Rename { .. } => 0,
        }
    }

    fn class(&self) -> u8 {
        match self {
            AtomicUpdate::Insert { .. } => 0,
            AtomicUpdate::Delete { .. } | AtomicUpdate::Replace { .. } => 1,
            AtomicUpdate::UpdateValue { .. } => 2,
            AtomicUpdate::Rename { .. } => 3,
        }
    }

    fn end(&self) -> Pre {
        match self {
            AtomicUpdate::Delete { location, size, .. }
            | AtomicUpdate::Replace { location, size, .. } => location + size,
            other => other.location() + 1,
        }
    }

    fn compare(&self, other: &AtomicUpdate) -> Ordering {
        self.location()
            .cmp(&other.location())
            .then_with(|| self.class().cmp(&other.class()))
            .then_with(|| match (self, other) {
                (
                    AtomicUpdate::Insert {
                        parent: p1,
                        position: r1,
                        ..
                    },
                    AtomicUpdate::Insert {
                        parent: p2,
                        position: r2,
                        ..
                    },
                ) => Reverse(*p1)
                    .cmp(&Reverse(*p2))
                    .then_with(|| r1.rank().cmp(&r2.rank())),
                _ => Ordering::Equal,
            })
    }
}

#[derive(Debug, Default)]
pub struct AtomicUpdateCache {
    updates: Vec<AtomicUpdate>,
    ordered: bool,
    pruned: usize,
}

impl AtomicUpdateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: AtomicUpdate) {
        self.updates.push(update);
        self.ordered = false;
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Number of updates dropped by tree-aware pruning.
    pub fn pruned(&self) -> usize {
        self.pruned
    }

    pub fn iter(&self) -> impl Iterator<Item = &AtomicUpdate> {
        self.updates.iter()
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Sorts, prunes and checks the cached updates. Calling it again without
    /// new updates is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        if self.ordered {
            return Ok(());
        }
        // stable: equal keys keep request order
        self.updates.sort_by(|a, b| a.compare(b));

        let mut kept: Vec<AtomicUpdate> = Vec::with_capacity(self.updates.len());
        let mut cover: Option<(Pre, Pre)> = None;
        for update in self.updates.drain(..) {
            if let Some((start, end)) = cover {
                let inside = match &update {
                    AtomicUpdate::Insert { parent, .. } => {
                        parent.is_some_and(|p| p >= start && p < end)
                    }
                    other => other.location() >= start && other.location() < end,
                };
                if inside {
                    if update.is_destructive() && update.location() == start {
                        let duplicate = matches!(
                            (kept.iter().rev().find(|u| u.is_destructive()), &update),
                            (Some(AtomicUpdate::Delete { size: s1, .. }), AtomicUpdate::Delete { size: s2, .. })
                                if s1 == s2
                        );
                        if !duplicate {
                            return Err(UpdateError::Internal(format!(
                                "multiple destructive updates at location {}",
                                start
                            ))
                            .into());
                        }
                        continue;
                    }
                    trace!(location = update.location(), "pruned atomic update");
                    self.pruned += 1;
                    continue;
                }
            }
            if update.is_destructive() {
                cover = Some((update.location(), update.end()));
            }
            kept.push(update);
        }

        for pair in kept.windows(2) {
            let same_node = pair[0].location() == pair[1].location();
            let clash = match (&pair[0], &pair[1]) {
                (AtomicUpdate::UpdateValue { .. }, AtomicUpdate::UpdateValue { .. }) => "value updates",
                (AtomicUpdate::Rename { .. }, AtomicUpdate::Rename { .. }) => "renames",
                _ => continue,
            };
            if same_node {
                return Err(UpdateError::Internal(format!(
                    "multiple {} at location {}",
                    clash,
                    pair[0].location()
                ))
                .into());
            }
        }

        self.updates = kept;
        self.ordered = true;
        Ok(())
    }

    /// Left positions of the record pairs to re-check for adjacent texts once
    /// the updates are applied, highest first. Expects `finish` to have run.
    pub fn text_candidates(&self) -> Vec<Pre> {
        let mut candidates = Vec::new();
        let mut shift: isize = 0;
        for update in &self.updates {
            let start = (update.location() as isize + shift).max(0) as Pre;
            match update {
                AtomicUpdate::Insert { clip, .. } | AtomicUpdate::Replace { clip, .. } => {
                    if start > 0 {
                        candidates.push(start - 1);
                    }
                    if !clip.is_empty() {
                        candidates.push(start + clip.len() - 1);
                    }
                }
                AtomicUpdate::Delete { .. } => {
                    if start > 0 {
                        candidates.push(start - 1);
                    }
                }
                AtomicUpdate::UpdateValue { .. } | AtomicUpdate::Rename { .. } => {}
            }
            shift += update.shift();
        }
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        candidates.dedup();
        candidates
    }

    /// Ordered updates, lowest location first. Apply them in reverse.
    pub fn into_updates(self) -> Vec<AtomicUpdate> {
        self.updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(location: Pre, parent: Option<Pre>, position: InsertPosition, n: usize) -> AtomicUpdate {
        let mut clip = DataClip::new();
        for i in 0..n {
            let mut poll = || -> Result<()> { Ok(()) };
            clip.push_fragment(&crate::store::Fragment::element(format!("n{}", i)), &mut poll)
                .unwrap();
        }
        AtomicUpdate::Insert {
            location,
            parent,
            position,
            clip,
        }
    }

    fn delete(location: Pre, size: usize) -> AtomicUpdate {
        AtomicUpdate::Delete {
            location,
            size,
            parent: Some(0),
        }
    }

    #[test]
    fn inserts_sort_before_destructive_and_value_updates() {
        let mut cache = AtomicUpdateCache::new();
        cache.push(AtomicUpdate::UpdateValue {
            location: 4,
            value: "v".into(),
        });
        cache.push(delete(4, 1));
        cache.push(insert(4, Some(1), InsertPosition::Before, 1));
        cache.push(delete(2, 1));

        cache.finish().unwrap();

        let locations: Vec<_> = cache.iter().map(|u| (u.location(), u.class())).collect();
        assert_eq!(locations, vec![(2, 1), (4, 0), (4, 1)]);
        assert_eq!(cache.pruned(), 1);
    }

    #[test]
    fn inserts_at_one_location_order_by_parent_then_rank() {
        let mut cache = AtomicUpdateCache::new();
        cache.push(insert(9, None, InsertPosition::After, 1));
        cache.push(insert(9, Some(1), InsertPosition::After, 1));
        cache.push(insert(9, Some(5), InsertPosition::AsLast, 1));
        cache.push(insert(9, Some(5), InsertPosition::Into, 1));

        cache.finish().unwrap();

        let order: Vec<_> = cache
            .iter()
            .map(|u| match u {
                AtomicUpdate::Insert {
                    parent, position, ..
                } => (*parent, *position),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            order,
            vec![
                (Some(5), InsertPosition::Into),
                (Some(5), InsertPosition::AsLast),
                (Some(1), InsertPosition::After),
                (None, InsertPosition::After),
            ]
        );
    }

    #[test]
    fn updates_inside_deleted_subtree_are_pruned() {
        let mut cache = AtomicUpdateCache::new();
        cache.push(delete(5, 4));
        cache.push(AtomicUpdate::Rename {
            location: 7,
            name: "x".into(),
        });
        cache.push(insert(9, Some(5), InsertPosition::Into, 1));
        cache.push(insert(9, Some(1), InsertPosition::After, 1));
        cache.push(insert(5, Some(1), InsertPosition::Before, 1));
        cache.push(delete(6, 1));

        cache.finish().unwrap();

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.pruned(), 3);
    }

    #[test]
    fn duplicate_deletes_collapse() {
        let mut cache = AtomicUpdateCache::new();
        cache.push(delete(3, 2));
        cache.push(delete(3, 2));

        cache.finish().unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.pruned(), 0);
    }

    #[test]
    fn conflicting_destructive_updates_are_internal_errors() {
        let mut cache = AtomicUpdateCache::new();
        cache.push(delete(3, 2));
        cache.push(AtomicUpdate::Replace {
            location: 3,
            size: 2,
            parent: Some(0),
            clip: DataClip::text("t"),
        });

        let err = cache.finish().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<UpdateError>(),
            Some(UpdateError::Internal(_))
        ));
    }

    #[test]
    fn double_value_update_is_internal_error() {
        let mut cache = AtomicUpdateCache::new();
        for value in ["a", "b"] {
            cache.push(AtomicUpdate::UpdateValue {
                location: 2,
                value: value.into(),
            });
        }

        assert!(cache.finish().is_err());
    }

    #[test]
    fn text_candidates_use_shifted_locations() {
        let mut cache = AtomicUpdateCache::new();
        cache.push(delete(2, 3));
        cache.push(insert(8, Some(1), InsertPosition::Before, 2));
        cache.push(AtomicUpdate::UpdateValue {
            location: 10,
            value: "v".into(),
        });

        cache.finish().unwrap();

        // delete leaves a gap at 2; the insert lands at 8 - 3 = 5 and spans 5..7
        assert_eq!(cache.text_candidates(), vec![6, 4, 1]);
    }
}
