//! Compact XML serialization of stored subtrees (no indentation, no XML
//! declaration). Documents serialize as the concatenation of their children.

use super::{NodeKind, NodeStore, Pre};

pub fn serialize<S: NodeStore + ?Sized>(store: &S, pre: Pre) -> String {
    let mut out = String::new();
    write_node(store, pre, &mut out);
    out
}

fn write_node<S: NodeStore + ?Sized>(store: &S, pre: Pre, out: &mut String) {
    let kind = store.kind(pre);
    let name = store.name(pre).unwrap_or_default();
    let value = store.value(pre).unwrap_or_default();
    match kind {
        NodeKind::Document => {
            for child in store.children(pre) {
                write_node(store, child, out);
            }
        }
        NodeKind::Element => {
            out.push('<');
            out.push_str(name);
            for attr in store.attributes(pre) {
                out.push(' ');
                out.push_str(store.name(attr).unwrap_or_default());
                out.push_str("=\"");
                escape(store.value(attr).unwrap_or_default(), true, out);
                out.push('"');
            }
            let children = store.children(pre);
            if children.is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for child in children {
                write_node(store, child, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        NodeKind::Attribute => {
            out.push_str(name);
            out.push_str("=\"");
            escape(value, true, out);
            out.push('"');
        }
        NodeKind::Text => escape(value, false, out),
        NodeKind::Comment => {
            out.push_str("<!--");
            out.push_str(value);
            out.push_str("-->");
        }
        NodeKind::ProcessingInstruction => {
            out.push_str("<?");
            out.push_str(name);
            if !value.is_empty() {
                out.push(' ');
                out.push_str(value);
            }
            out.push_str("?>");
        }
    }
}

fn escape(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DataClip, Fragment, MemStore};

    #[test]
    fn serializes_all_kinds() {
        let mut store = MemStore::new();
        let doc = Fragment::document(
            "d",
            vec![Fragment::element("a")
                .with_attribute("q", "x\"<y")
                .with_child(Fragment::text("1 & 2"))
                .with_child(Fragment::comment(" c "))
                .with_child(Fragment::processing_instruction("pi", ""))
                .with_child(Fragment::element("e"))],
        );
        store.insert(0, None, &DataClip::from_fragment(&doc)).unwrap();

        assert_eq!(
            serialize(&store, 0),
            "<a q=\"x&quot;&lt;y\">1 &amp; 2<!-- c --><?pi?><e/></a>"
        );
        assert_eq!(serialize(&store, 2), "q=\"x&quot;&lt;y\"");
    }
}
