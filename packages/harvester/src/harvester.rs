//! Harvest orchestration.
//!
//! A run moves through a fixed sequence of phases:
//!
//! 1. open the storage transaction
//! 2. decide between incremental and full mode
//! 3. count the matching records
//! 4. fetch all pages through the concurrency limiter and stage every record
//! 5. (full mode) harvest service records in a second pass
//! 6. couple services with the datasets they operate on
//! 7. (full mode) check coverage against the warn and cancel thresholds
//! 8. roll back if any error was recorded
//! 9. publish to the CSW-T target, delete untouched records, commit, index
//!
//! How records are counted, fetched and mapped is delegated to a
//! [`Harvester`] strategy; [`CswHarvester`] is the CSW implementation.

use std::collections::HashSet;
use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use geoharvest_csw::filter;
use geoharvest_csw::records::parse_record_page;
use geoharvest_csw::{page_windows, CswClient, GetRecordsQuery, PageCursor, PagedRequest};

use crate::alert::{Alerter, TracingAlerter};
use crate::coupler::{CapabilityCache, Coupler, DocumentFetcher, HttpFetcher};
use crate::error::Result;
use crate::index::SearchIndex;
use crate::limiter::ConcurrencyLimiter;
use crate::mapper::{IsoRecordMapper, RecordOutcome};
use crate::model::RecordEntity;
use crate::progress::{HarvestEvent, ProgressReporter, SilentReporter};
use crate::publisher::CatalogPublisher;
use crate::settings::HarvestSettings;
use crate::storage::{Storage, TransactionToken};
use crate::summary::Summary;

/// How records of one source type are counted, fetched and mapped.
#[async_trait]
pub trait Harvester: Send + Sync {
    /// Number of records matching `filter`.
    async fn count(&self, filter: Option<&str>) -> Result<u64>;

    /// Raw records of one page window.
    async fn fetch_page(&self, filter: Option<&str>, cursor: PageCursor) -> Result<Vec<String>>;

    /// Map one raw record. Must not fail: problems become the outcome.
    fn map_record(&self, raw: &str, harvested_at: DateTime<Utc>) -> RecordOutcome;
}

/// [`Harvester`] for CSW 2.0.2 catalogues serving ISO 19139 records.
#[derive(Debug, Clone)]
pub struct CswHarvester {
    client: CswClient,
    query: GetRecordsQuery,
    mapper: IsoRecordMapper,
}

impl CswHarvester {
    pub fn new(settings: &HarvestSettings) -> Result<Self> {
        Ok(Self {
            client: CswClient::new(
                &settings.source_url,
                settings.http_method,
                settings.http_options(),
            )?,
            query: GetRecordsQuery::iso(settings.max_records),
            mapper: IsoRecordMapper::new(settings)?,
        })
    }

    fn query_with(&self, filter: Option<&str>) -> GetRecordsQuery {
        self.query.clone().with_filter(filter.map(str::to_string))
    }
}

#[async_trait]
impl Harvester for CswHarvester {
    async fn count(&self, filter: Option<&str>) -> Result<u64> {
        Ok(self.client.hits(&self.query_with(filter)).await?)
    }

    async fn fetch_page(&self, filter: Option<&str>, cursor: PageCursor) -> Result<Vec<String>> {
        let template = self.client.builder().get_records(&self.query_with(filter));
        let request = PagedRequest::csw(template)?.request_for(cursor);
        let body = self.client.send(&request).await?;
        let page = parse_record_page(&body)?;
        tracing::debug!(
            position = cursor.position,
            returned = page.results.returned,
            "Page received"
        );
        Ok(page.records)
    }

    fn map_record(&self, raw: &str, harvested_at: DateTime<Utc>) -> RecordOutcome {
        self.mapper.map(raw, harvested_at)
    }
}

/// Per-run staging state shared by the harvest passes.
struct Staging<'a> {
    harvested_at: DateTime<Utc>,
    collection_id: Option<&'a str>,
    staged: HashSet<String>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestOutcome {
    pub success: bool,
    /// The failure reason, or a note on a successful run.
    pub message: Option<String>,
    pub summary: Summary,
}

/// Drives one harvest run against a storage transaction.
pub struct HarvestOrchestrator<H, S> {
    settings: HarvestSettings,
    harvester: H,
    storage: Arc<S>,
    fetcher: Arc<dyn DocumentFetcher>,
    index: Option<Arc<dyn SearchIndex>>,
    alerter: Arc<dyn Alerter>,
    publisher: Option<CatalogPublisher>,
    reporter: Arc<dyn ProgressReporter>,
    force_full: bool,
}

impl<S: Storage> HarvestOrchestrator<CswHarvester, S> {
    /// Wire a CSW harvest from settings: HTTP fetcher for capabilities and
    /// a publisher when a target is configured.
    pub fn for_csw(settings: HarvestSettings, storage: Arc<S>) -> Result<Self> {
        let harvester = CswHarvester::new(&settings)?;
        let fetcher = Arc::new(HttpFetcher::new(settings.http_options())?);
        let publisher = settings
            .publish
            .as_ref()
            .map(|publish| {
                CatalogPublisher::new(
                    publish,
                    settings.source_id.clone(),
                    settings.http_options(),
                    ConcurrencyLimiter::new(settings.max_concurrent),
                )
            })
            .transpose()?;

        let mut orchestrator = Self::new(settings, harvester, storage, fetcher);
        orchestrator.publisher = publisher;
        Ok(orchestrator)
    }
}

impl<H: Harvester, S: Storage> HarvestOrchestrator<H, S> {
    pub fn new(
        settings: HarvestSettings,
        harvester: H,
        storage: Arc<S>,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Self {
        Self {
            settings,
            harvester,
            storage,
            fetcher,
            index: None,
            alerter: Arc::new(TracingAlerter),
            publisher: None,
            reporter: Arc::new(SilentReporter),
            force_full: false,
        }
    }

    pub fn with_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn with_publisher(mut self, publisher: CatalogPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Ignore the incremental setting for this run.
    pub fn with_force_full(mut self, force_full: bool) -> Self {
        self.force_full = force_full;
        self
    }

    pub fn settings(&self) -> &HarvestSettings {
        &self.settings
    }

    /// Run one harvest. Never returns an error: failures end in a rolled
    /// back transaction and an unsuccessful outcome.
    pub async fn run(&self) -> HarvestOutcome {
        let source = self.settings.source_id.clone();
        let mut summary = Summary::new(&source);

        let token = match self.storage.begin_transaction().await {
            Ok(token) => token,
            Err(e) => {
                let message = format!("failed to open transaction: {e}");
                summary.database_error(message.clone());
                return self.complete(summary, Err(message));
            }
        };
        tracing::info!(source = %source, transaction = %token.id, "Harvest started");

        match self.harvest(&token, &mut summary).await {
            Ok(()) => match self.storage.commit_transaction().await {
                Ok(()) => {
                    self.push_to_index(&mut summary).await;
                    let note = completion_note(&summary);
                    self.complete(summary, Ok(note))
                }
                Err(e) => {
                    let message = format!("commit failed: {e}");
                    summary.database_error(message.clone());
                    self.alert_failure(&message).await;
                    self.complete(summary, Err(message))
                }
            },
            Err(message) => {
                if let Err(e) = self.storage.rollback_transaction().await {
                    summary.database_error(format!("rollback failed: {e}"));
                }
                tracing::error!(source = %source, "Harvest rolled back: {message}");
                self.alert_failure(&message).await;
                self.complete(summary, Err(message))
            }
        }
    }

    /// Everything between opening and closing the transaction. An `Err`
    /// carries the single message reported for a rolled back run.
    async fn harvest(
        &self,
        token: &TransactionToken,
        summary: &mut Summary,
    ) -> std::result::Result<(), String> {
        let source = self.settings.source_id.as_str();
        let settings = self.effective_settings(summary).await?;
        let full = !summary.incremental;

        self.reporter.report(HarvestEvent::Started {
            source_id: source.to_string(),
            incremental: summary.incremental,
        });

        let collection_id = self.collection_id(summary).await?;
        let mut staging = Staging {
            harvested_at: token.timestamp,
            collection_id: collection_id.as_deref(),
            staged: HashSet::new(),
        };

        self.harvest_pass(
            &settings,
            settings.record_filter.as_deref(),
            &mut staging,
            summary,
        )
        .await?;

        if full && settings.services.enabled {
            self.reporter.report(HarvestEvent::Phase { name: "services" });
            let service_filter = filter::and([
                settings.record_filter.clone(),
                Some(settings.services.predicate()),
            ]);
            self.harvest_pass(&settings, service_filter.as_deref(), &mut staging, summary)
                .await?;
        }

        self.flush(summary).await?;

        if settings.coupling.enabled {
            self.reporter.report(HarvestEvent::Phase { name: "coupling" });
            self.couple(&settings, summary).await?;
            self.flush(summary).await?;
        }

        if full {
            self.check_coverage(token, summary).await?;
        }

        if let Some(message) = summary.first_error() {
            return Err(message.to_string());
        }

        if let Some(publisher) = &self.publisher {
            self.reporter.report(HarvestEvent::Phase { name: "publish" });
            self.publish(publisher, token, full, summary).await?;
        }

        if full {
            match self
                .storage
                .delete_non_fetched_datasets(source, token)
                .await
            {
                Ok(deleted) => summary.deleted = deleted,
                Err(e) => return Err(db_failure(summary, "deleting untouched records", e)),
            }
        }

        self.storage
            .mark_successful_run(source, token.timestamp)
            .await
            .map_err(|e| db_failure(summary, "recording the run", e))?;

        Ok(())
    }

    /// Settings for this run, with the incremental date filter applied
    /// when a previous successful run exists.
    async fn effective_settings(
        &self,
        summary: &mut Summary,
    ) -> std::result::Result<HarvestSettings, String> {
        if !self.settings.incremental || self.force_full {
            return Ok(self.settings.clone());
        }

        match self
            .storage
            .last_successful_run(&self.settings.source_id)
            .await
        {
            Ok(Some(since)) => {
                tracing::info!(source = %self.settings.source_id, %since, "Incremental harvest");
                summary.incremental = true;
                Ok(self.settings.with_modified_since(since))
            }
            Ok(None) => {
                tracing::info!(
                    source = %self.settings.source_id,
                    "No previous successful run, harvesting in full"
                );
                Ok(self.settings.clone())
            }
            Err(e) => Err(db_failure(summary, "reading the last run", e)),
        }
    }

    async fn collection_id(
        &self,
        summary: &mut Summary,
    ) -> std::result::Result<Option<String>, String> {
        let Some(catalog_id) = &self.settings.catalog_id else {
            return Ok(None);
        };
        match self.storage.get_catalog(catalog_id).await {
            Ok(Some(catalog)) => Ok(Some(catalog.id)),
            Ok(None) => {
                let message = format!("catalog {catalog_id} does not exist");
                summary.app_error(message.clone());
                Err(message)
            }
            Err(e) => Err(db_failure(summary, "loading the catalog", e)),
        }
    }

    /// Count, then fetch and stage every page of one filter.
    async fn harvest_pass(
        &self,
        settings: &HarvestSettings,
        filter: Option<&str>,
        staging: &mut Staging<'_>,
        summary: &mut Summary,
    ) -> std::result::Result<(), String> {
        let total = match self.harvester.count(filter).await {
            Ok(total) => total,
            Err(e) => {
                let message = format!("count request failed: {e}");
                summary.app_error(message.clone());
                return Err(message);
            }
        };

        let windows = page_windows(settings.start_position, total, settings.max_records);
        let pages = windows.len();
        tracing::info!(source = %settings.source_id, total, pages, "Records counted");
        self.reporter.report(HarvestEvent::Counted { total, pages });

        let limiter = ConcurrencyLimiter::new(settings.max_concurrent);
        let tasks = windows.into_iter().map(|cursor| async move {
            (cursor, self.harvester.fetch_page(filter, cursor).await)
        });
        let mut completed = pin!(limiter.stream(tasks));

        let mut current = 0;
        while let Some((cursor, result)) = completed.next().await {
            current += 1;
            match result {
                Ok(records) => {
                    for raw in &records {
                        self.stage_record(raw, staging, summary).await;
                    }
                }
                Err(e) => summary.app_error(format!(
                    "page at position {} failed: {e}",
                    cursor.position
                )),
            }
            self.reporter.report(HarvestEvent::PageCompleted {
                current,
                total: pages,
            });
        }
        Ok(())
    }

    async fn stage_record(
        &self,
        raw: &str,
        staging: &mut Staging<'_>,
        summary: &mut Summary,
    ) {
        match self.harvester.map_record(raw, staging.harvested_at) {
            RecordOutcome::Mapped {
                mut entity,
                warnings,
            } => {
                entity.collection_id = staging.collection_id.map(str::to_string);
                for warning in warnings {
                    summary.warn(warning);
                }
                let identifier = entity.identifier.clone();
                match self.storage.add_entity_to_bulk(*entity).await {
                    // The service pass may deliver records again.
                    Ok(()) => {
                        if staging.staged.insert(identifier) {
                            summary.num_docs += 1;
                        }
                    }
                    Err(e) => summary.database_error(format!("staging {identifier} failed: {e}")),
                }
            }
            RecordOutcome::Skipped {
                identifier,
                reason,
                warning,
            } => {
                tracing::debug!(record = %identifier, reason = %reason, "Record skipped");
                summary.skipped_docs += 1;
                if let Some(warning) = warning {
                    summary.warn(warning);
                }
            }
            RecordOutcome::Failed(e) => {
                summary.skipped_docs += 1;
                if e.is_storage() {
                    summary.database_error(e.to_string());
                } else {
                    summary.app_error(e.to_string());
                }
            }
        }
    }

    async fn flush(&self, summary: &mut Summary) -> std::result::Result<(), String> {
        match self.storage.send_bulk_data().await {
            Ok(flushed) => {
                tracing::debug!(flushed, "Bulk data sent");
                Ok(())
            }
            Err(e) => Err(db_failure(summary, "sending bulk data", e)),
        }
    }

    async fn couple(
        &self,
        settings: &HarvestSettings,
        summary: &mut Summary,
    ) -> std::result::Result<(), String> {
        let source = settings.source_id.as_str();
        let services = self
            .storage
            .get_services(source)
            .await
            .map_err(|e| db_failure(summary, "loading services", e))?;
        if services.is_empty() {
            return Ok(());
        }
        let datasets: HashSet<String> = self
            .storage
            .get_datasets(source)
            .await
            .map_err(|e| db_failure(summary, "loading datasets", e))?
            .into_iter()
            .map(|d| d.identifier)
            .collect();

        let coupler = Coupler::new(
            source,
            settings.coupling.clone(),
            Arc::clone(&self.fetcher),
            ConcurrencyLimiter::new(settings.max_concurrent),
        );
        let cache = CapabilityCache::new();
        let report = coupler.couple(&services, &datasets, &cache).await;

        for warning in report.warnings {
            summary.warn(warning);
        }
        for coupling in report.couplings {
            match self.storage.add_coupling_to_bulk(coupling).await {
                Ok(()) => summary.couplings += 1,
                Err(e) => summary.database_error(format!("staging coupling failed: {e}")),
            }
        }
        Ok(())
    }

    /// Coverage safety check of a full run.
    async fn check_coverage(
        &self,
        token: &TransactionToken,
        summary: &mut Summary,
    ) -> std::result::Result<(), String> {
        if summary.num_docs == 0 {
            let message = "no records harvested, keeping the existing records".to_string();
            summary.app_error(message.clone());
            return Err(message);
        }

        let percentage = self
            .storage
            .non_fetched_percentage(&self.settings.source_id, token)
            .await
            .map_err(|e| db_failure(summary, "computing coverage", e))?;
        summary.non_fetched_percentage = Some(percentage);

        let thresholds = self.settings.thresholds;
        if percentage > thresholds.cancel_percent {
            let message = format!(
                "{percentage:.1}% of the known records were not harvested (cancel threshold {}%)",
                thresholds.cancel_percent
            );
            summary.app_error(message.clone());
            return Err(message);
        }
        if percentage > thresholds.warn_percent {
            let message = format!(
                "{percentage:.1}% of the known records were not harvested (warn threshold {}%)",
                thresholds.warn_percent
            );
            summary.warn(message.clone());
            let subject = format!("Harvest of {} is incomplete", self.settings.source_id);
            if let Err(e) = self.alerter.send(&subject, &message).await {
                tracing::warn!(error = %e, "Alert could not be sent");
            }
        }
        Ok(())
    }

    /// Publish the records of this run. Publishing failures are counted,
    /// never fatal.
    async fn publish(
        &self,
        publisher: &CatalogPublisher,
        token: &TransactionToken,
        full: bool,
        summary: &mut Summary,
    ) -> std::result::Result<(), String> {
        let records = self
            .run_records(token.timestamp)
            .await
            .map_err(|e| db_failure(summary, "loading records to publish", e))?;

        let stats = publisher.publish(&records, token.timestamp, full).await;
        for error in &stats.errors {
            summary.warn(format!("publish: {error}"));
        }
        summary.publish = Some(stats);
        Ok(())
    }

    /// Records staged by the run identified by `timestamp`.
    async fn run_records(&self, timestamp: DateTime<Utc>) -> Result<Vec<RecordEntity>> {
        let source = &self.settings.source_id;
        let mut records = self.storage.get_datasets(source).await?;
        records.extend(self.storage.get_services(source).await?);
        records.retain(|r| r.dataset.harvested_at == timestamp);
        Ok(records)
    }

    async fn push_to_index(&self, summary: &mut Summary) {
        let Some(index) = &self.index else {
            return;
        };
        let source = &self.settings.source_id;

        let entities = async {
            let mut records = self.storage.get_datasets(source).await?;
            records.extend(self.storage.get_services(source).await?);
            let couplings = self.storage.get_couplings(source).await?;
            index.push(source, &records, &couplings).await
        };
        match entities.await {
            Ok(documents) => tracing::info!(source = %source, documents, "Index updated"),
            // Committed data stays committed; the next run pushes again.
            Err(e) => summary.warn(format!("index push failed: {e}")),
        }
    }

    async fn alert_failure(&self, message: &str) {
        let subject = format!("Harvest of {} failed", self.settings.source_id);
        if let Err(e) = self.alerter.send(&subject, message).await {
            tracing::warn!(error = %e, "Alert could not be sent");
        }
    }

    fn complete(
        &self,
        summary: Summary,
        result: std::result::Result<Option<String>, String>,
    ) -> HarvestOutcome {
        let (success, message) = match result {
            Ok(note) => (true, note),
            Err(message) => (false, Some(message)),
        };
        self.reporter.report(HarvestEvent::Completed {
            success,
            summary: Box::new(summary.clone()),
            message: message.clone(),
        });
        HarvestOutcome {
            success,
            message,
            summary,
        }
    }
}

fn db_failure(summary: &mut Summary, action: &str, error: impl std::fmt::Display) -> String {
    let message = format!("storage failed while {action}: {error}");
    summary.database_error(message.clone());
    message
}

/// Note attached to a successful run.
fn completion_note(summary: &Summary) -> Option<String> {
    if let Some(failed) = summary.publish.as_ref().map(|p| p.failed).filter(|f| *f > 0) {
        return Some(format!("{failed} record(s) could not be published"));
    }
    if !summary.warnings.is_empty() {
        return Some(format!(
            "completed with {} warning(s)",
            summary.warnings.len()
        ));
    }
    None
}
