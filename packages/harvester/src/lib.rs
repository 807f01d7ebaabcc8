//! geoharvest - Harvest ISO 19139 metadata from CSW catalogues.
//!
//! This crate runs harvest jobs against CSW 2.0.2 catalogues: it pages
//! through the source, maps every record, stages the results in a storage
//! transaction, couples services with the datasets they serve, and commits
//! only when the run passes its coverage safety check.
//!
//! # Example
//!
//! ```
//! use geoharvest_harvester::settings::HarvestSettings;
//!
//! let settings = HarvestSettings::from_yaml_str(
//!     "source_id: pdok\nsource_url: https://example.org/csw\n",
//! ).unwrap();
//! assert_eq!(settings.max_records, 100);
//! assert!(settings.validate().is_ok());
//! ```
//!
//! # Architecture
//!
//! - [`settings`]: Job settings, defaults and validation
//! - [`model`]: Mapped records, couplings and catalogs
//! - [`error`]: Error types and Result alias
//! - [`mapper`]: ISO 19139 record mapping
//! - [`postprocess`]: Declarative post-processing steps
//! - [`limiter`]: Bounded concurrent fan-out
//! - [`storage`]: Transactional storage trait and local store
//! - [`index`]: Search index trait and bulk file index
//! - [`alert`]: Alert trait
//! - [`coupler`]: Dataset-service coupling via OGC capabilities
//! - [`publisher`]: CSW-T publishing to a second catalogue
//! - [`progress`]: Progress reporting
//! - [`summary`]: Run-scoped counters
//! - [`harvester`]: Harvest strategy and orchestration
//! - [`cli`]: Command-line interface

pub mod alert;
pub mod cli;
pub mod coupler;
pub mod error;
pub mod harvester;
pub mod index;
pub mod limiter;
pub mod mapper;
pub mod model;
pub mod postprocess;
pub mod progress;
pub mod publisher;
pub mod settings;
pub mod storage;
pub mod summary;

// Re-export commonly used items
pub use error::{HarvestError, Result};
pub use harvester::{CswHarvester, HarvestOrchestrator, HarvestOutcome, Harvester};
pub use settings::HarvestSettings;
pub use storage::{LocalStore, Storage};
pub use summary::Summary;
