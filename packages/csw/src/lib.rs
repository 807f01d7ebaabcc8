//! geoharvest CSW client library
//!
//! The wire layer of the harvester: building CSW 2.0.2 `GetRecords`
//! requests for either transport, paging over them with immutable cursors,
//! parsing search results and OGC capabilities documents, and publishing
//! records through CSW-T transactions.
//!
//! # Example
//!
//! ```no_run
//! use geoharvest_csw::{CswClient, GetRecordsQuery, HttpMethod, HttpOptions};
//!
//! # async fn run() -> geoharvest_csw::Result<()> {
//! let client = CswClient::new("https://example.org/csw", HttpMethod::Post, HttpOptions::default())?;
//! let total = client.hits(&GetRecordsQuery::iso(100)).await?;
//! println!("{total} records");
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod http;
pub mod paging;
pub mod records;
pub mod request;
pub mod transaction;
pub mod xml;

pub use capabilities::{CapabilityMap, OgcService};
pub use client::CswClient;
pub use error::{CswError, Result};
pub use geometry::Envelope;
pub use http::{Credentials, HttpOptions};
pub use paging::{page_windows, PageCursor, PagedRequest};
pub use records::{BriefPage, RecordPage, SearchResults};
pub use request::{CswRequestBuilder, GetRecordsQuery, HttpMethod, RequestSpec, ResultType};
pub use transaction::{TransactionAction, TransactionSummary};
