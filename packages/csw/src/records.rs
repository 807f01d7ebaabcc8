//! GetRecords response parsing.

use roxmltree::{Document, Node};

use crate::error::{CswError, Result};
use crate::xml::{
    element_children, find_descendant, find_descendants, get_attribute, get_deep_text, get_text,
    has_tag, numeric_attribute, standalone_fragment,
};

/// Counters from a `csw:SearchResults` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchResults {
    pub matched: u64,
    pub returned: u64,
    /// `nextRecord`; zero when the server signals the end.
    pub next_record: u64,
}

/// One page of brief records: the counters and the `dc:identifier` values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BriefPage {
    pub results: SearchResults,
    pub identifiers: Vec<String>,
}

/// One page of full records, each serialized as a standalone document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordPage {
    pub results: SearchResults,
    pub records: Vec<String>,
}

/// Fail with [`CswError::ExceptionReport`] if the document is an OWS exception.
pub fn check_exception(doc: &Document<'_>) -> Result<()> {
    let root = doc.root_element();
    if has_tag(root, "ExceptionReport") {
        let text = find_descendants(root, "ExceptionText")
            .map(get_deep_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        let code = find_descendant(root, "Exception")
            .and_then(|e| get_attribute(e, "exceptionCode"))
            .unwrap_or("unknown");
        return Err(CswError::ExceptionReport(if text.is_empty() {
            code.to_string()
        } else {
            format!("{code}: {text}")
        }));
    }
    Ok(())
}

/// Locate the `SearchResults` element of a GetRecords response.
///
/// A response without it is treated as malformed.
pub fn search_results_node<'a, 'input>(doc: &'a Document<'input>) -> Result<Node<'a, 'input>> {
    check_exception(doc)?;
    find_descendant(doc.root_element(), "SearchResults").ok_or_else(|| CswError::MissingElement {
        element: "SearchResults".to_string(),
        context: doc.root_element().tag_name().name().to_string(),
    })
}

/// Read the counters of a `SearchResults` element.
pub fn search_results(node: Node<'_, '_>) -> Result<SearchResults> {
    Ok(SearchResults {
        matched: numeric_attribute(node, "numberOfRecordsMatched")?,
        returned: numeric_attribute(node, "numberOfRecordsReturned")?,
        next_record: numeric_attribute(node, "nextRecord")?,
    })
}

/// Records contained in a `SearchResults` element.
pub fn records<'a, 'input>(
    search_results: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    element_children(search_results)
}

/// Parse a `resultType=hits` response and return `numberOfRecordsMatched`.
pub fn parse_hits(xml: &str) -> Result<u64> {
    let doc = Document::parse(xml)?;
    let node = search_results_node(&doc)?;
    Ok(search_results(node)?.matched)
}

/// Parse a brief GetRecords response into identifiers.
pub fn parse_brief_page(xml: &str) -> Result<BriefPage> {
    let doc = Document::parse(xml)?;
    let node = search_results_node(&doc)?;
    let results = search_results(node)?;
    let identifiers = records(node)
        .filter_map(|record| {
            element_children(record)
                .find(|child| has_tag(*child, "identifier"))
                .map(get_text)
        })
        .filter(|id| !id.is_empty())
        .collect();

    Ok(BriefPage {
        results,
        identifiers,
    })
}

/// Parse a full GetRecords response into standalone record documents.
pub fn parse_record_page(xml: &str) -> Result<RecordPage> {
    let doc = Document::parse(xml)?;
    let node = search_results_node(&doc)?;
    Ok(RecordPage {
        results: search_results(node)?,
        records: records(node).map(standalone_fragment).collect(),
    })
}
