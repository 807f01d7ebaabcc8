//! CSW request construction.
//!
//! [`CswRequestBuilder`] turns a [`GetRecordsQuery`] into a transport-ready
//! [`RequestSpec`]: key-value query parameters for `GET`, a namespaced XML
//! document for `POST`. Both encodings carry the same paging, result type,
//! output schema, element set and filter, so callers never branch on the
//! HTTP method after construction.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{
    validate_service_url, CSW_VERSION, FILTER_VERSION, NS_CSW, NS_GMD, NS_GML, NS_OGC,
    OUTPUT_SCHEMA_ISO,
};
use crate::error::Result;
use crate::xml::escape_xml;

/// HTTP method used to talk to a catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// `resultType` of a GetRecords request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    /// Only `numberOfRecordsMatched`, no records.
    Hits,
    /// Records for the requested window.
    Results,
}

impl ResultType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hits => "hits",
            Self::Results => "results",
        }
    }
}

/// `ElementSetName` of a GetRecords request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSet {
    Brief,
    Summary,
    Full,
}

impl ElementSet {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Summary => "summary",
            Self::Full => "full",
        }
    }
}

/// Semantic content of a GetRecords request, independent of transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetRecordsQuery {
    pub result_type: ResultType,
    pub output_schema: String,
    pub element_set: ElementSet,
    /// 1-based index of the first record.
    pub start_position: u64,
    pub max_records: u32,
    /// OGC filter predicate (the content of `<ogc:Filter>`), if any.
    pub filter: Option<String>,
}

impl GetRecordsQuery {
    /// Full ISO 19139 records, first page.
    pub fn iso(max_records: u32) -> Self {
        Self {
            result_type: ResultType::Results,
            output_schema: OUTPUT_SCHEMA_ISO.to_string(),
            element_set: ElementSet::Full,
            start_position: 1,
            max_records,
            filter: None,
        }
    }

    /// Brief Dublin Core records, used to list identifiers of a catalogue.
    pub fn brief(max_records: u32) -> Self {
        Self {
            result_type: ResultType::Results,
            output_schema: NS_CSW.to_string(),
            element_set: ElementSet::Brief,
            start_position: 1,
            max_records,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn with_start_position(mut self, start_position: u64) -> Self {
        self.start_position = start_position;
        self
    }

    pub fn with_result_type(mut self, result_type: ResultType) -> Self {
        self.result_type = result_type;
        self
    }

    /// The `typeNames` matching the output schema.
    #[must_use]
    pub fn type_names(&self) -> &'static str {
        if self.output_schema == NS_GMD {
            "gmd:MD_Metadata"
        } else {
            "csw:Record"
        }
    }
}

/// A fully built HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: Url,
    pub body: Option<String>,
}

/// Builds CSW requests against one endpoint with one transport.
#[derive(Debug, Clone)]
pub struct CswRequestBuilder {
    endpoint: Url,
    method: HttpMethod,
}

impl CswRequestBuilder {
    pub fn new(endpoint: &str, method: HttpMethod) -> Result<Self> {
        Ok(Self {
            endpoint: validate_service_url(endpoint)?,
            method,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Build a GetRecords request.
    pub fn get_records(&self, query: &GetRecordsQuery) -> RequestSpec {
        match self.method {
            HttpMethod::Get => RequestSpec {
                method: HttpMethod::Get,
                url: self.get_records_url(query),
                body: None,
            },
            HttpMethod::Post => RequestSpec {
                method: HttpMethod::Post,
                url: self.endpoint.clone(),
                body: Some(get_records_body(query)),
            },
        }
    }

    /// Build the count request (`resultType=hits`) for a query.
    pub fn hits(&self, query: &GetRecordsQuery) -> RequestSpec {
        self.get_records(&query.clone().with_result_type(ResultType::Hits))
    }

    /// Build a GetCapabilities request for the catalogue itself.
    pub fn get_capabilities(&self) -> RequestSpec {
        let mut url = self.endpoint.clone();
        set_query_param(&mut url, "SERVICE", "CSW");
        set_query_param(&mut url, "REQUEST", "GetCapabilities");
        set_query_param(&mut url, "ACCEPTVERSIONS", CSW_VERSION);
        RequestSpec {
            method: HttpMethod::Get,
            url,
            body: None,
        }
    }

    /// Wrap a transaction document; CSW-T is POST-only.
    pub fn transaction(&self, body: String) -> RequestSpec {
        RequestSpec {
            method: HttpMethod::Post,
            url: self.endpoint.clone(),
            body: Some(body),
        }
    }

    fn get_records_url(&self, query: &GetRecordsQuery) -> Url {
        let mut url = self.endpoint.clone();
        set_query_param(&mut url, "SERVICE", "CSW");
        set_query_param(&mut url, "REQUEST", "GetRecords");
        set_query_param(&mut url, "VERSION", CSW_VERSION);
        set_query_param(&mut url, "resultType", query.result_type.as_str());
        set_query_param(&mut url, "outputSchema", &query.output_schema);
        set_query_param(&mut url, "typeNames", query.type_names());
        set_query_param(&mut url, "NAMESPACE", &namespace_param(query));
        set_query_param(&mut url, "ElementSetName", query.element_set.as_str());
        set_query_param(&mut url, "startPosition", &query.start_position.to_string());
        set_query_param(&mut url, "maxRecords", &query.max_records.to_string());
        if let Some(filter) = &query.filter {
            set_query_param(&mut url, "CONSTRAINTLANGUAGE", "FILTER");
            set_query_param(&mut url, "CONSTRAINT_LANGUAGE_VERSION", FILTER_VERSION);
            set_query_param(
                &mut url,
                "CONSTRAINT",
                &format!(
                    r#"<ogc:Filter xmlns:ogc="{NS_OGC}" xmlns:gml="{NS_GML}">{filter}</ogc:Filter>"#
                ),
            );
        }
        url
    }
}

/// Set a query parameter, replacing any existing value (case-insensitive key match).
pub fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.eq_ignore_ascii_case(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (k, v) in &retained {
        pairs.append_pair(k, v);
    }
    pairs.append_pair(key, value);
}

/// Read a query parameter (case-insensitive key match).
pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.into_owned())
}

fn namespace_param(query: &GetRecordsQuery) -> String {
    if query.output_schema == NS_GMD {
        format!("xmlns(gmd={NS_GMD})")
    } else {
        format!("xmlns(csw={NS_CSW})")
    }
}

fn get_records_body(query: &GetRecordsQuery) -> String {
    let constraint = query
        .filter
        .as_ref()
        .map(|filter| {
            format!(
                "\n    <csw:Constraint version=\"{FILTER_VERSION}\">\n      <ogc:Filter>{filter}</ogc:Filter>\n    </csw:Constraint>"
            )
        })
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<csw:GetRecords xmlns:csw="{NS_CSW}" xmlns:ogc="{NS_OGC}" xmlns:gmd="{NS_GMD}" xmlns:gml="{NS_GML}" service="CSW" version="{CSW_VERSION}" resultType="{result_type}" outputFormat="application/xml" outputSchema="{output_schema}" startPosition="{start}" maxRecords="{max}">
  <csw:Query typeNames="{type_names}">
    <csw:ElementSetName>{element_set}</csw:ElementSetName>{constraint}
  </csw:Query>
</csw:GetRecords>"#,
        result_type = query.result_type.as_str(),
        output_schema = escape_xml(&query.output_schema),
        start = query.start_position,
        max = query.max_records,
        type_names = query.type_names(),
        element_set = query.element_set.as_str(),
    )
}
