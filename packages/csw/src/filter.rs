//! OGC filter (1.1.0) predicate composition.
//!
//! Predicates are plain XML strings using the `ogc` prefix; the request
//! builder supplies the surrounding `<ogc:Filter>` and namespace
//! declarations.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::xml::escape_xml;

/// Queryable holding the record modification date.
pub const MODIFIED_PROPERTY: &str = "Modified";

/// Queryable distinguishing datasets from services.
pub const TYPE_PROPERTY: &str = "type";

/// Full-text queryable.
pub const ANY_TEXT_PROPERTY: &str = "AnyText";

/// `PropertyIsEqualTo` predicate.
pub fn property_is_equal_to(property: &str, literal: &str) -> String {
    format!(
        "<ogc:PropertyIsEqualTo><ogc:PropertyName>{}</ogc:PropertyName><ogc:Literal>{}</ogc:Literal></ogc:PropertyIsEqualTo>",
        escape_xml(property),
        escape_xml(literal)
    )
}

/// `PropertyIsLike` predicate with `%` as wildcard.
pub fn property_is_like(property: &str, pattern: &str) -> String {
    format!(
        "<ogc:PropertyIsLike wildCard=\"%\" singleChar=\"_\" escapeChar=\"\\\"><ogc:PropertyName>{}</ogc:PropertyName><ogc:Literal>{}</ogc:Literal></ogc:PropertyIsLike>",
        escape_xml(property),
        escape_xml(pattern)
    )
}

/// Records modified at or after `since`.
pub fn modified_since(since: DateTime<Utc>) -> String {
    format!(
        "<ogc:PropertyIsGreaterThanOrEqualTo><ogc:PropertyName>{MODIFIED_PROPERTY}</ogc:PropertyName><ogc:Literal>{}</ogc:Literal></ogc:PropertyIsGreaterThanOrEqualTo>",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Negate a predicate.
pub fn not(predicate: &str) -> String {
    format!("<ogc:Not>{predicate}</ogc:Not>")
}

/// Combine predicates with `ogc:And`.
///
/// Empty predicates are ignored; a single remaining predicate is returned
/// unwrapped, none at all yields `None`.
///
/// # Examples
/// ```
/// use geoharvest_csw::filter::and;
///
/// assert_eq!(and([None, Some("<a/>".to_string())]), Some("<a/>".to_string()));
/// assert_eq!(and([None, None]), None);
/// ```
pub fn and<I>(predicates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let parts: Vec<String> = predicates
        .into_iter()
        .flatten()
        .filter(|p| !p.trim().is_empty())
        .collect();

    match parts.len() {
        0 => None,
        1 => parts.into_iter().next(),
        _ => Some(format!("<ogc:And>{}</ogc:And>", parts.concat())),
    }
}

/// Keyword marking the harvest run that last touched a published record.
pub fn transaction_marker(timestamp: DateTime<Utc>) -> String {
    format!("transaction:{}", timestamp.timestamp_millis())
}

/// Keyword marking the source a published record was harvested from.
pub fn source_marker(source_id: &str) -> String {
    format!("source:{source_id}")
}

/// Records from `source_id` that the run at `timestamp` did not touch.
pub fn stale_records(source_id: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "<ogc:And>{}{}</ogc:And>",
        property_is_like(ANY_TEXT_PROPERTY, &format!("%{}%", source_marker(source_id))),
        not(&property_is_like(
            ANY_TEXT_PROPERTY,
            &format!("%{}%", transaction_marker(timestamp))
        ))
    )
}
