//! XML utility functions for navigating and extracting data from DOM trees.
//!
//! Catalogue responses mix many namespaces (`csw`, `gmd`, `gco`, `srv`,
//! `dc`, ...) and servers disagree on prefixes, so all lookups here match on
//! the local name only.

use roxmltree::Node;

/// Get the tag name without namespace prefix.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use geoharvest_csw::xml::get_tag_name;
///
/// let xml = r#"<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"/>"#;
/// let doc = Document::parse(xml).unwrap();
/// assert_eq!(get_tag_name(doc.root_element()), "MD_Metadata");
/// ```
pub fn get_tag_name<'a>(node: Node<'a, '_>) -> &'a str {
    node.tag_name().name()
}

/// Check if a node is an element with the given local name.
pub fn has_tag(node: Node<'_, '_>, tag: &str) -> bool {
    node.is_element() && get_tag_name(node) == tag
}

/// Find the first child element with the given local name.
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use geoharvest_csw::xml::find_child;
///
/// let xml = r#"<root><child1/><child2/></root>"#;
/// let doc = Document::parse(xml).unwrap();
/// let root = doc.root_element();
///
/// assert!(find_child(root, "child1").is_some());
/// assert!(find_child(root, "missing").is_none());
/// ```
pub fn find_child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|child| has_tag(*child, tag))
}

/// Find all child elements with the given local name.
pub fn find_children<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(move |child| has_tag(*child, tag))
}

/// Get all element children of a node.
pub fn element_children<'a, 'input>(
    node: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

/// Find the first descendant element (including `node` itself) with the given local name.
pub fn find_descendant<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &str,
) -> Option<Node<'a, 'input>> {
    node.descendants().find(|n| has_tag(*n, tag))
}

/// Find all descendant elements with the given local name.
pub fn find_descendants<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.descendants().filter(move |n| has_tag(*n, tag))
}

/// Find a descendant element matching a path of local names.
///
/// A `*` segment matches any element child, which covers ISO choices such as
/// `identificationInfo/*` (`MD_DataIdentification` or `SV_ServiceIdentification`).
///
/// # Examples
/// ```
/// use roxmltree::Document;
/// use geoharvest_csw::xml::find_by_path;
///
/// let xml = r#"<a><b><c>1</c></b></a>"#;
/// let doc = Document::parse(xml).unwrap();
///
/// assert!(find_by_path(doc.root_element(), "b/c").is_some());
/// assert!(find_by_path(doc.root_element(), "*/c").is_some());
/// assert!(find_by_path(doc.root_element(), "x/c").is_none());
/// ```
pub fn find_by_path<'a, 'input>(node: Node<'a, 'input>, path: &str) -> Option<Node<'a, 'input>> {
    let mut current = node;
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current = if part == "*" {
            element_children(current).next()?
        } else {
            find_child(current, part)?
        };
    }
    Some(current)
}

/// Find all nodes matching a path, expanding every repeated segment.
///
/// Unlike [`find_by_path`], which follows only the first match per segment,
/// this returns every element reachable along the path.
pub fn find_all_by_path<'a, 'input>(node: Node<'a, 'input>, path: &str) -> Vec<Node<'a, 'input>> {
    let mut current = vec![node];
    for part in path.split('/').filter(|p| !p.is_empty()) {
        current = current
            .into_iter()
            .flat_map(|n| {
                element_children(n)
                    .filter(|child| part == "*" || get_tag_name(*child) == part)
                    .collect::<Vec<_>>()
            })
            .collect();
        if current.is_empty() {
            break;
        }
    }
    current
}

/// Get the text content of a node, trimmed.
pub fn get_text(node: Node<'_, '_>) -> String {
    node.text()
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Get the concatenated text of a node and all its descendants, trimmed.
pub fn get_deep_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Get the text of an ISO character-string property.
///
/// ISO 19139 wraps values in `gco:CharacterString`, `gmx:Anchor` or
/// `gco:LocalName`; this returns the first non-empty one, falling back to the
/// node's own text.
pub fn character_string(node: Node<'_, '_>) -> Option<String> {
    let text = element_children(node)
        .find(|child| {
            matches!(
                get_tag_name(*child),
                "CharacterString" | "Anchor" | "LocalName" | "URL" | "Date" | "DateTime" | "Decimal"
            )
        })
        .map(get_text)
        .unwrap_or_else(|| get_text(node));

    Some(text).filter(|t| !t.is_empty())
}

/// Resolve a path and return its ISO character-string value.
pub fn text_at<'a>(node: Node<'a, '_>, path: &str) -> Option<String> {
    find_by_path(node, path).and_then(character_string)
}

/// Get an attribute value by local name, ignoring its namespace.
///
/// Matches `xlink:href`, `uuidref` and `codeListValue` regardless of prefix.
pub fn get_attribute<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes()
        .find(|attr| attr.name() == name)
        .map(|attr| attr.value())
}

/// Parse an unsigned numeric attribute, defaulting to zero when absent.
pub fn numeric_attribute(node: Node<'_, '_>, name: &str) -> crate::error::Result<u64> {
    match get_attribute(node, name) {
        None => Ok(0),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| crate::error::CswError::InvalidAttribute {
                attribute: name.to_string(),
                value: value.to_string(),
            }),
    }
}

/// Escape text for inclusion in XML content or attribute values.
///
/// # Examples
/// ```
/// use geoharvest_csw::xml::escape_xml;
///
/// assert_eq!(escape_xml(r#"a < b & "c""#), "a &lt; b &amp; &quot;c&quot;");
/// ```
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Strip a leading `<?xml ...?>` declaration (and BOM) from a document.
pub fn strip_xml_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start_matches('\u{feff}').trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return trimmed[end + 2..].trim_start();
        }
    }
    trimmed
}
