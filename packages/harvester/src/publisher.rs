//! CSW-T publishing to a second catalogue.
//!
//! Every record of a run is tagged with traceability keywords and sent as
//! an `Update` when the target already holds its identifier, otherwise as an
//! `Insert`. After a full run, a filtered `Delete` removes records of this
//! source that the run did not touch. Failures are counted per record and
//! never abort the batch.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use geoharvest_csw::filter::stale_records;
use geoharvest_csw::transaction::inject_traceability;
use geoharvest_csw::{CswClient, HttpMethod, HttpOptions, TransactionAction, TransactionSummary};

use crate::error::Result;
use crate::limiter::ConcurrencyLimiter;
use crate::model::RecordEntity;
use crate::settings::PublishSettings;
use crate::summary::PublishStats;

/// Publishes harvested records to a CSW-T endpoint.
#[derive(Debug, Clone)]
pub struct CatalogPublisher {
    client: CswClient,
    source_id: String,
    page_size: u32,
    delete_stale: bool,
    limiter: ConcurrencyLimiter,
}

impl CatalogPublisher {
    pub fn new(
        settings: &PublishSettings,
        source_id: impl Into<String>,
        mut options: HttpOptions,
        limiter: ConcurrencyLimiter,
    ) -> Result<Self> {
        options.credentials = settings.credentials();
        Ok(Self {
            client: CswClient::new(&settings.url, HttpMethod::Post, options)?,
            source_id: source_id.into(),
            page_size: settings.page_size,
            delete_stale: settings.delete_stale,
            limiter,
        })
    }

    /// Publish `records` tagged with `timestamp`; on full runs also delete
    /// stale records of this source.
    pub async fn publish(
        &self,
        records: &[RecordEntity],
        timestamp: DateTime<Utc>,
        full: bool,
    ) -> PublishStats {
        let mut stats = PublishStats::default();

        let existing = match self.client.discover_identifiers(self.page_size).await {
            Ok(identifiers) => identifiers,
            Err(e) => {
                stats.failed = records.len() as u64;
                stats
                    .errors
                    .push(format!("identifier discovery failed: {e}"));
                return stats;
            }
        };
        tracing::info!(
            source = %self.source_id,
            existing = existing.len(),
            records = records.len(),
            "Publishing records"
        );

        let tasks = records
            .iter()
            .map(|record| self.publish_record(record, &existing, timestamp));
        for outcome in self.limiter.run_all(tasks).await {
            match outcome {
                Ok(summary) => {
                    stats.inserted += summary.inserted;
                    stats.updated += summary.updated;
                }
                Err(message) => {
                    tracing::warn!(source = %self.source_id, "{message}");
                    stats.failed += 1;
                    stats.errors.push(message);
                }
            }
        }

        if full && self.delete_stale {
            let delete = TransactionAction::delete(stale_records(&self.source_id, timestamp));
            match self.client.transaction(&[delete]).await {
                Ok(summary) => stats.deleted = summary.deleted,
                Err(e) => stats.errors.push(format!("stale record delete failed: {e}")),
            }
        }

        stats
    }

    async fn publish_record(
        &self,
        record: &RecordEntity,
        existing: &HashSet<String>,
        timestamp: DateTime<Utc>,
    ) -> std::result::Result<TransactionSummary, String> {
        let document =
            match inject_traceability(&record.original_document, timestamp, &self.source_id) {
                Ok(Some(tagged)) => tagged,
                Ok(None) => {
                    tracing::warn!(
                        record = %record.identifier,
                        "No identification section, publishing without traceability keywords"
                    );
                    record.original_document.clone()
                }
                Err(e) => {
                    tracing::warn!(record = %record.identifier, error = %e, "Traceability injection failed");
                    record.original_document.clone()
                }
            };

        let action = if existing.contains(&record.identifier) {
            TransactionAction::Update(document)
        } else {
            TransactionAction::Insert(document)
        };
        let kind = action.as_str();

        self.client
            .transaction(&[action])
            .await
            .map_err(|e| format!("{kind} of {} failed: {e}", record.identifier))
    }
}
