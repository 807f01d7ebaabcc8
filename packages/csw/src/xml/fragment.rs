//! Cutting self-contained XML fragments out of a larger document.
//!
//! A record inside a GetRecords response usually relies on namespace
//! declarations made on the response root. Storing or re-publishing the raw
//! slice would leave those prefixes unbound, so every in-scope declaration
//! that the record's own start tag does not repeat is copied onto it.

use roxmltree::Node;

use super::utils::escape_xml;

/// Return the source text of `node` with all in-scope namespaces declared on its root.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use geoharvest_csw::xml::standalone_fragment;
///
/// let xml = r#"<r xmlns:a="urn:a"><a:item>1</a:item></r>"#;
/// let doc = Document::parse(xml).unwrap();
/// let item = doc.root_element().first_element_child().unwrap();
///
/// assert_eq!(standalone_fragment(item), r#"<a:item xmlns:a="urn:a">1</a:item>"#);
/// ```
pub fn standalone_fragment(node: Node<'_, '_>) -> String {
    let source = node.document().input_text();
    let fragment = &source[node.range()];

    let Some(tag_end) = start_tag_end(fragment) else {
        return fragment.to_string();
    };

    // Self-closing elements keep their slash after the new declarations.
    let insert_at = if fragment[..tag_end].ends_with('/') {
        tag_end - 1
    } else {
        tag_end
    };
    let start_tag = &fragment[..insert_at];

    let mut declarations = String::new();
    for ns in node.namespaces() {
        let attr = match ns.name() {
            Some("xml") => continue,
            Some(prefix) => format!("xmlns:{prefix}"),
            None => "xmlns".to_string(),
        };
        if declares(start_tag, &attr) {
            continue;
        }
        declarations.push(' ');
        declarations.push_str(&attr);
        declarations.push_str("=\"");
        declarations.push_str(&escape_xml(ns.uri()));
        declarations.push('"');
    }

    let mut out = String::with_capacity(fragment.len() + declarations.len());
    out.push_str(start_tag.trim_end());
    out.push_str(&declarations);
    out.push_str(&fragment[insert_at..]);
    out
}

/// Byte offset of the `>` that closes the first start tag, skipping quoted values.
pub(crate) fn start_tag_end(fragment: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, c) in fragment.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(idx),
            (None, _) => {}
        }
    }
    None
}

fn declares(start_tag: &str, attr: &str) -> bool {
    let needle = format!("{attr}=");
    start_tag.match_indices(&needle).any(|(idx, _)| {
        start_tag[..idx]
            .chars()
            .next_back()
            .is_some_and(char::is_whitespace)
    })
}
