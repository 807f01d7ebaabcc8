//! Error types for the CSW client.
//!
//! `CswError` covers everything that can go wrong on the wire: transport
//! failures, malformed XML, OGC exception reports and responses that lack
//! the element a caller relies on.

use thiserror::Error;

/// Main error type for the CSW client library.
#[derive(Debug, Error)]
pub enum CswError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status that is not retried.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// All retry attempts were used up on transient failures.
    #[error("Request failed after {attempts} attempts: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    /// XML parsing failed.
    #[error("XML parsing failed: {0}")]
    XmlParse(#[from] roxmltree::Error),

    /// Missing required XML element.
    #[error("Missing required XML element: {element} in {context}")]
    MissingElement { element: String, context: String },

    /// A numeric attribute could not be read.
    #[error("Invalid value '{value}' for attribute {attribute}")]
    InvalidAttribute { attribute: String, value: String },

    /// The service returned an OGC `ExceptionReport`.
    #[error("Service exception: {0}")]
    ExceptionReport(String),

    /// The service returned an empty body where a document was expected.
    #[error("Empty response from {0}")]
    EmptyResponse(String),

    /// A URL could not be parsed.
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A request option is unusable (bad proxy, zero page size, ...).
    #[error("Invalid request option: {0}")]
    InvalidOption(String),
}

/// Result type alias for CSW operations.
pub type Result<T> = std::result::Result<T, CswError>;
