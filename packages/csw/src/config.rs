//! Protocol constants and validation functions for the CSW client.

use url::Url;

use crate::error::{CswError, Result};

/// CSW protocol version spoken by this client.
pub const CSW_VERSION: &str = "2.0.2";

/// OGC filter encoding version used inside `<csw:Constraint>`.
pub const FILTER_VERSION: &str = "1.1.0";

/// CSW 2.0.2 namespace.
pub const NS_CSW: &str = "http://www.opengis.net/cat/csw/2.0.2";

/// OGC filter namespace.
pub const NS_OGC: &str = "http://www.opengis.net/ogc";

/// ISO 19139 metadata namespace.
pub const NS_GMD: &str = "http://www.isotc211.org/2005/gmd";

/// ISO 19139 basic types namespace.
pub const NS_GCO: &str = "http://www.isotc211.org/2005/gco";

/// ISO 19119 service metadata namespace.
pub const NS_SRV: &str = "http://www.isotc211.org/2005/srv";

/// Dublin Core elements namespace (brief/summary records).
pub const NS_DC: &str = "http://purl.org/dc/elements/1.1/";

/// OWS common namespace (exception reports).
pub const NS_OWS: &str = "http://www.opengis.net/ows";

/// GML 3.2 namespace.
pub const NS_GML: &str = "http://www.opengis.net/gml/3.2";

/// XLink namespace (`xlink:href` on `srv:operatesOn`).
pub const NS_XLINK: &str = "http://www.w3.org/1999/xlink";

/// Output schema requesting full ISO 19139 records.
pub const OUTPUT_SCHEMA_ISO: &str = NS_GMD;

/// Output schema requesting Dublin Core `csw:Record` documents.
pub const OUTPUT_SCHEMA_CSW: &str = NS_CSW;

/// HTTP timeout in seconds.
///
/// Large GetRecords pages of full ISO records are slow on many catalogues.
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Maximum number of attempts for a single request.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default page size for GetRecords.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page size accepted; most catalogues cap well below this.
pub const MAX_PAGE_SIZE: u32 = 10_000;

/// Validate a service endpoint URL.
///
/// Only absolute `http`/`https` URLs are accepted.
///
/// # Examples
/// ```
/// use geoharvest_csw::config::validate_service_url;
///
/// assert!(validate_service_url("https://example.org/csw").is_ok());
/// assert!(validate_service_url("ftp://example.org/csw").is_err());
/// assert!(validate_service_url("not a url").is_err());
/// ```
pub fn validate_service_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|source| CswError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(CswError::InvalidOption(format!(
            "unsupported URL scheme '{other}' in {url}"
        ))),
    }
}

/// Validate a GetRecords page size.
///
/// # Examples
/// ```
/// use geoharvest_csw::config::validate_page_size;
///
/// assert!(validate_page_size(100).is_ok());
/// assert!(validate_page_size(0).is_err());
/// ```
pub fn validate_page_size(page_size: u32) -> Result<()> {
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(CswError::InvalidOption(format!(
            "page size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_service_url_valid() {
        assert!(validate_service_url("https://example.org/csw").is_ok());
        assert!(validate_service_url("http://localhost:8080/geonetwork/srv/eng/csw").is_ok());
    }

    #[test]
    fn test_validate_service_url_invalid() {
        assert!(validate_service_url("").is_err());
        assert!(validate_service_url("example.org/csw").is_err());
        assert!(validate_service_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_validate_page_size_bounds() {
        assert!(validate_page_size(1).is_ok());
        assert!(validate_page_size(MAX_PAGE_SIZE).is_ok());
        assert!(validate_page_size(MAX_PAGE_SIZE + 1).is_err());
    }
}
