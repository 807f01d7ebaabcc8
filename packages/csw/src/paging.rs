//! Paging over GetRecords-style requests.
//!
//! A [`PageCursor`] is an immutable value: advancing it returns a new cursor,
//! and [`PagedRequest::request_for`] derives a fresh [`RequestSpec`] from a
//! template instead of mutating shared request state. Concurrent page tasks
//! therefore never observe each other's paging position.

use regex::Regex;

use crate::error::{CswError, Result};
use crate::request::{set_query_param, HttpMethod, RequestSpec};

/// Paging attribute used by CSW GetRecords.
pub const CSW_START_FIELD: &str = "startPosition";

/// Position of one page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageCursor {
    /// 1-based index of the first record of the window.
    pub position: u64,
    pub page_size: u32,
}

impl PageCursor {
    pub fn new(position: u64, page_size: u32) -> Self {
        Self {
            position,
            page_size,
        }
    }

    /// The cursor for the following, non-overlapping window.
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            position: self.position + u64::from(self.page_size),
            page_size: self.page_size,
        }
    }

    /// Exclusive end of the window.
    #[must_use]
    pub fn end(self) -> u64 {
        self.position + u64::from(self.page_size)
    }
}

/// Compute the page windows covering `[start, start + total)`.
///
/// Returns `ceil(total / page_size)` cursors with strictly increasing,
/// non-overlapping positions. A zero page size yields no windows.
///
/// # Examples
/// ```
/// use geoharvest_csw::paging::page_windows;
///
/// let starts: Vec<u64> = page_windows(1, 250, 100).iter().map(|c| c.position).collect();
/// assert_eq!(starts, vec![1, 101, 201]);
/// ```
pub fn page_windows(start: u64, total: u64, page_size: u32) -> Vec<PageCursor> {
    if page_size == 0 || total == 0 {
        return Vec::new();
    }
    let pages = total.div_ceil(u64::from(page_size));
    let mut cursor = PageCursor::new(start, page_size);
    let mut windows = Vec::with_capacity(usize::try_from(pages).unwrap_or_default());
    for _ in 0..pages {
        windows.push(cursor);
        cursor = cursor.next();
    }
    windows
}

/// A request template plus the name of its paging field.
#[derive(Debug, Clone)]
pub struct PagedRequest {
    template: RequestSpec,
    field_name: String,
    body_attribute: Regex,
}

impl PagedRequest {
    /// Create a paged request for an arbitrary paging field.
    pub fn new(template: RequestSpec, field_name: impl Into<String>) -> Result<Self> {
        let field_name = field_name.into();
        let body_attribute = Regex::new(&format!(r#"\b{}="[^"]*""#, regex::escape(&field_name)))
            .map_err(|e| CswError::InvalidOption(format!("paging field '{field_name}': {e}")))?;
        Ok(Self {
            template,
            field_name,
            body_attribute,
        })
    }

    /// Create a paged CSW GetRecords request (`startPosition`).
    pub fn csw(template: RequestSpec) -> Result<Self> {
        Self::new(template, CSW_START_FIELD)
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// Derive the request for one page window.
    ///
    /// `GET` requests get the paging query parameter replaced, `POST`
    /// requests get the paging attribute of the body rewritten.
    pub fn request_for(&self, cursor: PageCursor) -> RequestSpec {
        let mut request = self.template.clone();
        let position = cursor.position.to_string();
        match request.method {
            HttpMethod::Get => set_query_param(&mut request.url, &self.field_name, &position),
            HttpMethod::Post => {
                if let Some(body) = &request.body {
                    let replacement = format!(r#"{}="{position}""#, self.field_name);
                    let rewritten = self
                        .body_attribute
                        .replace(body, regex::NoExpand(&replacement))
                        .into_owned();
                    request.body = Some(rewritten);
                }
            }
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{query_param, CswRequestBuilder, GetRecordsQuery};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_page_windows_count_and_coverage() {
        let windows = page_windows(1, 250, 100);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], PageCursor::new(1, 100));
        assert_eq!(windows[2].position, 201);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end(), pair[1].position);
        }
    }

    #[test]
    fn test_page_windows_exact_multiple() {
        let windows = page_windows(1, 200, 100);
        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn test_page_windows_custom_start() {
        let starts: Vec<u64> = page_windows(11, 25, 10).iter().map(|c| c.position).collect();
        assert_eq!(starts, vec![11, 21, 31]);
    }

    #[test]
    fn test_page_windows_empty() {
        assert!(page_windows(1, 0, 100).is_empty());
        assert!(page_windows(1, 10, 0).is_empty());
    }

    #[test]
    fn test_request_for_get() {
        let builder = CswRequestBuilder::new("https://example.org/csw", HttpMethod::Get).unwrap();
        let paged = PagedRequest::csw(builder.get_records(&GetRecordsQuery::iso(100))).unwrap();

        let first = paged.request_for(PageCursor::new(1, 100));
        let second = paged.request_for(PageCursor::new(1, 100).next());

        assert_eq!(query_param(&first.url, "startPosition").as_deref(), Some("1"));
        assert_eq!(query_param(&second.url, "startPosition").as_deref(), Some("101"));
    }

    #[test]
    fn test_request_for_post() {
        let builder = CswRequestBuilder::new("https://example.org/csw", HttpMethod::Post).unwrap();
        let paged = PagedRequest::csw(builder.get_records(&GetRecordsQuery::iso(100))).unwrap();

        let request = paged.request_for(PageCursor::new(201, 100));
        let body = request.body.unwrap();
        let doc = roxmltree::Document::parse(&body).unwrap();
        assert_eq!(doc.root_element().attribute("startPosition"), Some("201"));
        assert_eq!(doc.root_element().attribute("maxRecords"), Some("100"));
    }

    #[test]
    fn test_template_is_not_mutated() {
        let builder = CswRequestBuilder::new("https://example.org/csw", HttpMethod::Post).unwrap();
        let template = builder.get_records(&GetRecordsQuery::iso(100));
        let paged = PagedRequest::csw(template.clone()).unwrap();
        let _ = paged.request_for(PageCursor::new(901, 100));
        assert_eq!(paged.request_for(PageCursor::new(1, 100)), template);
    }
}
