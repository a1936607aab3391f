//! # Update Kinds
//!
//! `UpdateKind` is the closed set of primitive kinds. Its declaration order is
//! the kind priority: node-level kinds first, then database-level kinds in the
//! order they commit after all node-level atomic updates.
//!
//! ```text
//! node level      Delete < InsertAfter < InsertBefore < InsertInto
//!                 < InsertIntoAsFirst < InsertIntoAsLast < InsertAttributes
//!                 < ReplaceNode < ReplaceDocument < ReplaceValue < RenameNode
//! database level  Add < DeleteResource < Rename < StoreValue < StoreBinary
//!                 < Optimize < Flush < Put
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UpdateKind {
    Delete,
    InsertAfter,
    InsertBefore,
    InsertInto,
    InsertIntoAsFirst,
    InsertIntoAsLast,
    InsertAttributes,
    ReplaceNode,
    ReplaceDocument,
    ReplaceValue,
    RenameNode,
    Add,
    DeleteResource,
    Rename,
    StoreValue,
    StoreBinary,
    Optimize,
    Flush,
    Put,
}

impl UpdateKind {
    pub const ALL: [UpdateKind; 19] = [
        UpdateKind::Delete,
        UpdateKind::InsertAfter,
        UpdateKind::InsertBefore,
        UpdateKind::InsertInto,
        UpdateKind::InsertIntoAsFirst,
        UpdateKind::InsertIntoAsLast,
        UpdateKind::InsertAttributes,
        UpdateKind::ReplaceNode,
        UpdateKind::ReplaceDocument,
        UpdateKind::ReplaceValue,
        UpdateKind::RenameNode,
        UpdateKind::Add,
        UpdateKind::DeleteResource,
        UpdateKind::Rename,
        UpdateKind::StoreValue,
        UpdateKind::StoreBinary,
        UpdateKind::Optimize,
        UpdateKind::Flush,
        UpdateKind::Put,
    ];

    /// Position in the total kind order.
    pub fn priority(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            UpdateKind::Delete => "delete",
            UpdateKind::InsertAfter => "insert-after",
            UpdateKind::InsertBefore => "insert-before",
            UpdateKind::InsertInto => "insert-into",
            UpdateKind::InsertIntoAsFirst => "insert-into-as-first",
            UpdateKind::InsertIntoAsLast => "insert-into-as-last",
            UpdateKind::InsertAttributes => "insert-attributes",
            UpdateKind::ReplaceNode => "replace-node",
            UpdateKind::ReplaceDocument => "replace-document",
            UpdateKind::ReplaceValue => "replace-value",
            UpdateKind::RenameNode => "rename-node",
            UpdateKind::Add => "add",
            UpdateKind::DeleteResource => "delete-resource",
            UpdateKind::Rename => "rename",
            UpdateKind::StoreValue => "store-value",
            UpdateKind::StoreBinary => "store-binary",
            UpdateKind::Optimize => "optimize",
            UpdateKind::Flush => "flush",
            UpdateKind::Put => "put",
        }
    }

    /// Kinds addressed by a node position and applied through atomic updates.
    pub fn is_node_level(self) -> bool {
        self <= UpdateKind::RenameNode
    }

    pub fn is_insert(self) -> bool {
        matches!(
            self,
            UpdateKind::InsertAfter
                | UpdateKind::InsertBefore
                | UpdateKind::InsertInto
                | UpdateKind::InsertIntoAsFirst
                | UpdateKind::InsertIntoAsLast
                | UpdateKind::InsertAttributes
        )
    }

    /// Kinds whose repeated application is harmless, so a vanished target
    /// can be skipped.
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            UpdateKind::Delete | UpdateKind::DeleteResource | UpdateKind::Rename
        )
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_sorted_by_priority() {
        assert!(UpdateKind::ALL.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(UpdateKind::ALL[5].priority(), 5);
    }

    #[test]
    fn node_level_kinds_precede_database_kinds() {
        let split = UpdateKind::ALL
            .iter()
            .position(|k| !k.is_node_level())
            .unwrap();

        assert_eq!(UpdateKind::ALL[split], UpdateKind::Add);
        assert!(UpdateKind::ALL[split..].iter().all(|k| !k.is_node_level()));
    }

    #[test]
    fn display_uses_hyphenated_names() {
        assert_eq!(UpdateKind::InsertIntoAsFirst.to_string(), "insert-into-as-first");
        assert_eq!(UpdateKind::DeleteResource.to_string(), "delete-resource");
    }
}
