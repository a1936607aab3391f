//! # Fragments
//!
//! Owned node trees handed to update primitives as payload. The query layer
//! produces them either by constructing new nodes or by copying stored nodes
//! with [`Fragment::from_store`]; the update engine never keeps references
//! into the store for its payload.

use super::{NodeKind, NodeStore, Pre};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Document {
        path: String,
        children: Vec<Fragment>,
    },
    Element {
        name: String,
        attributes: Vec<(String, String)>,
        children: Vec<Fragment>,
    },
    Attribute {
        name: String,
        value: String,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        value: String,
    },
}

impl Fragment {
    pub fn document(path: impl Into<String>, children: Vec<Fragment>) -> Self {
        Fragment::Document {
            path: path.into(),
            children,
        }
    }

    pub fn element(name: impl Into<String>) -> Self {
        Fragment::Element {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Fragment::Attribute {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Fragment::Text(value.into())
    }

    pub fn comment(value: impl Into<String>) -> Self {
        Fragment::Comment(value.into())
    }

    pub fn processing_instruction(target: impl Into<String>, value: impl Into<String>) -> Self {
        Fragment::ProcessingInstruction {
            target: target.into(),
            value: value.into(),
        }
    }

    /// Adds an attribute to an element; other kinds are returned unchanged.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Fragment::Element { attributes, .. } = &mut self {
            attributes.push((name.into(), value.into()));
        }
        self
    }

    /// Appends a child to an element or document; other kinds are returned unchanged.
    pub fn with_child(mut self, child: Fragment) -> Self {
        match &mut self {
            Fragment::Element { children, .. } | Fragment::Document { children, .. } => {
                children.push(child)
            }
            _ => {}
        }
        self
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Fragment::Document { .. } => NodeKind::Document,
            Fragment::Element { .. } => NodeKind::Element,
            Fragment::Attribute { .. } => NodeKind::Attribute,
            Fragment::Text(_) => NodeKind::Text,
            Fragment::Comment(_) => NodeKind::Comment,
            Fragment::ProcessingInstruction { .. } => NodeKind::ProcessingInstruction,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Fragment::Element { name, .. } | Fragment::Attribute { name, .. } => Some(name),
            Fragment::ProcessingInstruction { target, .. } => Some(target),
            Fragment::Document { path, .. } => Some(path),
            Fragment::Text(_) | Fragment::Comment(_) => None,
        }
    }

    /// Number of store records this fragment occupies once inserted.
    pub fn node_count(&self) -> usize {
        match self {
            Fragment::Document { children, .. } => {
                1 + children.iter().map(Fragment::node_count).sum::<usize>()
            }
            Fragment::Element {
                attributes,
                children,
                ..
            } => 1 + attributes.len() + children.iter().map(Fragment::node_count).sum::<usize>(),
            _ => 1,
        }
    }

    /// Deep copy of a stored subtree.
    pub fn from_store<S: NodeStore + ?Sized>(store: &S, pre: Pre) -> Self {
        let kind = store.kind(pre);
        let name = store.name(pre).unwrap_or_default().to_string();
        let value = store.value(pre).unwrap_or_default().to_string();
        match kind {
            NodeKind::Document => Fragment::Document {
                path: name,
                children: store
                    .children(pre)
                    .into_iter()
                    .map(|child| Fragment::from_store(store, child))
                    .collect(),
            },
            NodeKind::Element => Fragment::Element {
                name,
                attributes: store
                    .attributes(pre)
                    .map(|attr| {
                        (
                            store.name(attr).unwrap_or_default().to_string(),
                            store.value(attr).unwrap_or_default().to_string(),
                        )
                    })
                    .collect(),
                children: store
                    .children(pre)
                    .into_iter()
                    .map(|child| Fragment::from_store(store, child))
                    .collect(),
            },
            NodeKind::Attribute => Fragment::Attribute { name, value },
            NodeKind::Text => Fragment::Text(value),
            NodeKind::Comment => Fragment::Comment(value),
            NodeKind::ProcessingInstruction => Fragment::ProcessingInstruction {
                target: name,
                value,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DataClip, MemStore};

    #[test]
    fn builder_methods_ignore_leaf_kinds() {
        let text = Fragment::text("x").with_attribute("a", "b").with_child(Fragment::text("y"));

        assert_eq!(text, Fragment::text("x"));
    }

    #[test]
    fn node_count_includes_attributes() {
        let fragment = Fragment::element("a")
            .with_attribute("x", "1")
            .with_attribute("y", "2")
            .with_child(Fragment::element("b").with_child(Fragment::text("t")));

        assert_eq!(fragment.node_count(), 5);
    }

    #[test]
    fn from_store_round_trips_subtree() {
        let original = Fragment::element("a")
            .with_attribute("x", "1")
            .with_child(Fragment::comment("c"))
            .with_child(Fragment::processing_instruction("p", "v"));
        let mut store = MemStore::new();
        store
            .insert(0, None, &DataClip::from_fragment(&Fragment::document("d", vec![original.clone()])))
            .unwrap();

        assert_eq!(Fragment::from_store(&store, 1), original);
    }
}
