//! CSW-T (transactional CSW) documents.
//!
//! Building `Insert`/`Update`/`Delete` transactions, parsing the
//! `TransactionResponse`, and tagging records with traceability keywords
//! before they are published.

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};

use crate::config::{CSW_VERSION, FILTER_VERSION, NS_CSW, NS_GCO, NS_GMD, NS_GML, NS_OGC};
use crate::error::{CswError, Result};
use crate::filter::{source_marker, transaction_marker};
use crate::records::check_exception;
use crate::xml::{
    element_children, escape_xml, find_by_path, find_child, find_descendant, get_tag_name,
    get_text, strip_xml_declaration,
};

/// One operation inside a `csw:Transaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionAction {
    /// Insert a full ISO record.
    Insert(String),
    /// Replace the record with the same identifier.
    Update(String),
    /// Delete all records matching an OGC filter predicate.
    Delete { type_name: String, filter: String },
}

impl TransactionAction {
    /// Delete records of type `csw:Record` matching `filter`.
    pub fn delete(filter: impl Into<String>) -> Self {
        Self::Delete {
            type_name: "csw:Record".to_string(),
            filter: filter.into(),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert(_) => "Insert",
            Self::Update(_) => "Update",
            Self::Delete { .. } => "Delete",
        }
    }

    fn to_xml(&self) -> String {
        match self {
            Self::Insert(record) => {
                format!("  <csw:Insert>{}</csw:Insert>\n", strip_xml_declaration(record))
            }
            Self::Update(record) => {
                format!("  <csw:Update>{}</csw:Update>\n", strip_xml_declaration(record))
            }
            Self::Delete { type_name, filter } => format!(
                "  <csw:Delete typeName=\"{}\">\n    <csw:Constraint version=\"{FILTER_VERSION}\">\n      <ogc:Filter>{filter}</ogc:Filter>\n    </csw:Constraint>\n  </csw:Delete>\n",
                escape_xml(type_name)
            ),
        }
    }
}

/// Build a `csw:Transaction` document.
///
/// # Examples
/// ```
/// use geoharvest_csw::transaction::{build_transaction, TransactionAction};
///
/// let xml = build_transaction(&[TransactionAction::Insert("<gmd:MD_Metadata xmlns:gmd=\"http://www.isotc211.org/2005/gmd\"/>".into())]);
/// assert!(xml.contains("<csw:Insert><gmd:MD_Metadata"));
/// ```
pub fn build_transaction(actions: &[TransactionAction]) -> String {
    let body: String = actions.iter().map(TransactionAction::to_xml).collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<csw:Transaction xmlns:csw=\"{NS_CSW}\" xmlns:ogc=\"{NS_OGC}\" xmlns:gml=\"{NS_GML}\" service=\"CSW\" version=\"{CSW_VERSION}\">\n{body}</csw:Transaction>"
    )
}

/// Counters from a `csw:TransactionSummary`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionSummary {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl TransactionSummary {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }
}

/// Parse a `csw:TransactionResponse`.
///
/// An empty body, an `ExceptionReport` or a document without
/// `TransactionResponse` is an error.
pub fn parse_transaction_response(xml: &str) -> Result<TransactionSummary> {
    if xml.trim().is_empty() {
        return Err(CswError::EmptyResponse("transaction".to_string()));
    }
    let doc = Document::parse(xml)?;
    check_exception(&doc)?;

    let root = doc.root_element();
    let response =
        find_descendant(root, "TransactionResponse").ok_or_else(|| CswError::MissingElement {
            element: "TransactionResponse".to_string(),
            context: get_tag_name(root).to_string(),
        })?;

    let Some(summary) = find_descendant(response, "TransactionSummary") else {
        return Ok(TransactionSummary::default());
    };

    Ok(TransactionSummary {
        inserted: total(summary, "totalInserted")?,
        updated: total(summary, "totalUpdated")?,
        deleted: total(summary, "totalDeleted")?,
    })
}

fn total(summary: Node<'_, '_>, name: &str) -> Result<u64> {
    let Some(node) = find_child(summary, name) else {
        return Ok(0);
    };
    let text = get_text(node);
    if text.is_empty() {
        return Ok(0);
    }
    text.parse().map_err(|_| CswError::InvalidAttribute {
        attribute: name.to_string(),
        value: text,
    })
}

/// Elements of `MD_DataIdentification`/`SV_ServiceIdentification` that follow
/// `descriptiveKeywords` in ISO 19139 order.
const AFTER_KEYWORDS: &[&str] = &[
    "resourceSpecificUsage",
    "resourceConstraints",
    "aggregationInfo",
    "spatialRepresentationType",
    "spatialResolution",
    "language",
    "characterSet",
    "topicCategory",
    "environmentDescription",
    "extent",
    "supplementalInformation",
    "serviceType",
    "serviceTypeVersion",
    "accessProperties",
    "restrictions",
    "keywords",
    "coupledResource",
    "couplingType",
    "containsOperations",
    "operatesOn",
];

/// Add `transaction:<millis>` and `source:<id>` keywords to an ISO record.
///
/// The keywords go into a new `gmd:descriptiveKeywords` block of the
/// identification section, placed after existing keyword blocks to keep
/// schema order. Returns `Ok(None)` when the record has no identification
/// section to carry them.
pub fn inject_traceability(
    record_xml: &str,
    timestamp: DateTime<Utc>,
    source_id: &str,
) -> Result<Option<String>> {
    let doc = Document::parse(record_xml)?;
    let Some(identification) = find_by_path(doc.root_element(), "identificationInfo/*") else {
        return Ok(None);
    };
    let Some(offset) = insertion_offset(identification, record_xml) else {
        return Ok(None);
    };

    let block = keyword_block(
        identification,
        &[transaction_marker(timestamp), source_marker(source_id)],
    );

    let mut out = String::with_capacity(record_xml.len() + block.len());
    out.push_str(&record_xml[..offset]);
    out.push_str(&block);
    out.push_str(&record_xml[offset..]);
    Ok(Some(out))
}

fn insertion_offset(identification: Node<'_, '_>, source: &str) -> Option<usize> {
    let children: Vec<Node<'_, '_>> = element_children(identification).collect();

    if let Some(last) = children
        .iter()
        .rev()
        .find(|c| get_tag_name(**c) == "descriptiveKeywords")
    {
        return Some(last.range().end);
    }
    if let Some(next) = children
        .iter()
        .find(|c| AFTER_KEYWORDS.iter().any(|name| *name == get_tag_name(**c)))
    {
        return Some(next.range().start);
    }

    // No children to anchor on: insert before the closing tag.
    let range = identification.range();
    let fragment = &source[range.clone()];
    if fragment.trim_end().ends_with("/>") {
        return None;
    }
    fragment.rfind("</").map(|idx| range.start + idx)
}

fn keyword_block(identification: Node<'_, '_>, keywords: &[String]) -> String {
    let (gmd, gmd_decl) = prefix_for(identification, NS_GMD, "gmd");
    let (gco, gco_decl) = prefix_for(identification, NS_GCO, "gco");

    let mut block = format!("<{gmd}descriptiveKeywords{gmd_decl}><{gmd}MD_Keywords>");
    for keyword in keywords {
        block.push_str(&format!(
            "<{gmd}keyword><{gco}CharacterString{gco_decl}>{}</{gco}CharacterString></{gmd}keyword>",
            escape_xml(keyword)
        ));
    }
    block.push_str(&format!("</{gmd}MD_Keywords></{gmd}descriptiveKeywords>"));
    block
}

/// Qualified-name prefix (`"gmd:"`, or `""` for a default namespace) and an
/// inline declaration when the namespace is not in scope.
fn prefix_for(node: Node<'_, '_>, uri: &str, fallback: &str) -> (String, String) {
    match node.namespaces().find(|ns| ns.uri() == uri) {
        Some(ns) => match ns.name() {
            Some(prefix) => (format!("{prefix}:"), String::new()),
            None => (String::new(), String::new()),
        },
        None => (
            format!("{fallback}:"),
            format!(" xmlns:{fallback}=\"{uri}\""),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{find_all_by_path, find_descendants, text_at};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn keywords(xml: &str) -> Vec<String> {
        let doc = Document::parse(xml).unwrap();
        find_descendants(doc.root_element(), "keyword")
            .filter_map(|k| text_at(k, ""))
            .collect()
    }

    const RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco">
  <gmd:fileIdentifier><gco:CharacterString>abc</gco:CharacterString></gmd:fileIdentifier>
  <gmd:identificationInfo>
    <gmd:MD_DataIdentification>
      <gmd:abstract><gco:CharacterString>A</gco:CharacterString></gmd:abstract>
      <gmd:descriptiveKeywords><gmd:MD_Keywords><gmd:keyword><gco:CharacterString>existing</gco:CharacterString></gmd:keyword></gmd:MD_Keywords></gmd:descriptiveKeywords>
      <gmd:language><gco:CharacterString>dut</gco:CharacterString></gmd:language>
    </gmd:MD_DataIdentification>
  </gmd:identificationInfo>
</gmd:MD_Metadata>"#;

    #[test]
    fn test_inject_after_existing_keywords() {
        let tagged = inject_traceability(RECORD, ts(), "portal").unwrap().unwrap();
        assert_eq!(
            keywords(&tagged),
            vec!["existing", "transaction:1700000000000", "source:portal"]
        );

        let doc = Document::parse(&tagged).unwrap();
        let ident = find_by_path(doc.root_element(), "identificationInfo/*").unwrap();
        let order: Vec<&str> = element_children(ident).map(get_tag_name).collect();
        assert_eq!(
            order,
            vec!["abstract", "descriptiveKeywords", "descriptiveKeywords", "language"]
        );
    }

    #[test]
    fn test_inject_before_later_sibling() {
        let xml = r#"<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:srv="http://www.isotc211.org/2005/srv">
  <gmd:identificationInfo><srv:SV_ServiceIdentification>
    <gmd:abstract/>
    <srv:serviceType/>
  </srv:SV_ServiceIdentification></gmd:identificationInfo>
</gmd:MD_Metadata>"#;
        let tagged = inject_traceability(xml, ts(), "s").unwrap().unwrap();
        let doc = Document::parse(&tagged).unwrap();
        let ident = find_by_path(doc.root_element(), "identificationInfo/*").unwrap();
        let order: Vec<&str> = element_children(ident).map(get_tag_name).collect();
        assert_eq!(order, vec!["abstract", "descriptiveKeywords", "serviceType"]);
        // gco was not in scope and is declared inline.
        assert_eq!(keywords(&tagged), vec!["transaction:1700000000000", "source:s"]);
    }

    #[test]
    fn test_inject_into_empty_identification() {
        let xml = r#"<MD_Metadata xmlns="http://www.isotc211.org/2005/gmd"><identificationInfo><MD_DataIdentification></MD_DataIdentification></identificationInfo></MD_Metadata>"#;
        let tagged = inject_traceability(xml, ts(), "s").unwrap().unwrap();
        let doc = Document::parse(&tagged).unwrap();
        let kws = find_all_by_path(
            doc.root_element(),
            "identificationInfo/MD_DataIdentification/descriptiveKeywords/MD_Keywords/keyword",
        );
        assert_eq!(kws.len(), 2);
        assert_eq!(kws[0].tag_name().namespace(), Some(NS_GMD));
    }

    #[test]
    fn test_inject_without_identification() {
        let xml = r#"<gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd"/>"#;
        assert_eq!(inject_traceability(xml, ts(), "s").unwrap(), None);
    }

    #[test]
    fn test_build_insert_update_delete() {
        let xml = build_transaction(&[
            TransactionAction::Insert(RECORD.to_string()),
            TransactionAction::Update(RECORD.to_string()),
            TransactionAction::delete("<ogc:PropertyIsLike wildCard=\"%\" singleChar=\"_\" escapeChar=\"\\\"><ogc:PropertyName>AnyText</ogc:PropertyName><ogc:Literal>%x%</ogc:Literal></ogc:PropertyIsLike>"),
        ]);
        let doc = Document::parse(&xml).unwrap();
        let root = doc.root_element();
        assert_eq!(get_tag_name(root), "Transaction");
        let ops: Vec<&str> = element_children(root).map(get_tag_name).collect();
        assert_eq!(ops, vec!["Insert", "Update", "Delete"]);
        assert!(find_descendant(root, "Filter").is_some());
        assert_eq!(find_descendants(root, "MD_Metadata").count(), 2);
    }

    #[test]
    fn test_parse_transaction_response() {
        let xml = r#"<csw:TransactionResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2" version="2.0.2">
  <csw:TransactionSummary>
    <csw:totalInserted>2</csw:totalInserted>
    <csw:totalUpdated>1</csw:totalUpdated>
    <csw:totalDeleted>0</csw:totalDeleted>
  </csw:TransactionSummary>
</csw:TransactionResponse>"#;
        assert_eq!(
            parse_transaction_response(xml).unwrap(),
            TransactionSummary {
                inserted: 2,
                updated: 1,
                deleted: 0
            }
        );
    }

    #[test]
    fn test_parse_transaction_failures() {
        assert!(matches!(
            parse_transaction_response("  "),
            Err(CswError::EmptyResponse(_))
        ));
        assert!(matches!(
            parse_transaction_response("<other/>"),
            Err(CswError::MissingElement { .. })
        ));
        let report = r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows"><ows:Exception exceptionCode="NoApplicableCode"><ows:ExceptionText>denied</ows:ExceptionText></ows:Exception></ows:ExceptionReport>"#;
        assert!(matches!(
            parse_transaction_response(report),
            Err(CswError::ExceptionReport(_))
        ));
    }
}
