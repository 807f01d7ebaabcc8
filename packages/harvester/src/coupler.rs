//! Dataset-service coupling.
//!
//! For each WFS/WMS distribution of a service record and each dataset the
//! service operates on, the coupler resolves the feature-type or layer names
//! serving that dataset from the service's capabilities document and emits a
//! [`CouplingEntity`]. Capabilities are fetched at most once per URL per run
//! through a [`CapabilityCache`] owned by the run.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use geoharvest_csw::capabilities::{capabilities_url, parse_capabilities};
use geoharvest_csw::geometry::{feature_collection_envelope, get_feature_url};
use geoharvest_csw::http::{create_client, send_text};
use geoharvest_csw::{CapabilityMap, Envelope, HttpMethod, HttpOptions, OgcService, RequestSpec};
use reqwest::Client;
use tokio::sync::OnceCell;
use url::Url;

use crate::error::Result;
use crate::limiter::ConcurrencyLimiter;
use crate::model::{CouplingEntity, Distribution, RecordEntity, ServiceType};
use crate::settings::CouplingSettings;

/// Fetches OGC documents (capabilities, feature collections).
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// [`DocumentFetcher`] over HTTP `GET` with retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    options: HttpOptions,
}

impl HttpFetcher {
    pub fn new(options: HttpOptions) -> Result<Self> {
        Ok(Self {
            client: create_client(&options)?,
            options,
        })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let request = RequestSpec {
            method: HttpMethod::Get,
            url: url.clone(),
            body: None,
        };
        Ok(send_text(&self.client, &request, &self.options).await?)
    }
}

type CachedCapabilities = std::result::Result<Arc<CapabilityMap>, String>;

/// Capabilities of every service seen during one run, keyed by
/// GetCapabilities URL.
///
/// Each key is fetched once; concurrent lookups of the same key wait for the
/// first fetch. Failures are cached as well.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<CachedCapabilities>>>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_fetch(
        &self,
        url: &Url,
        service: OgcService,
        fetcher: &dyn DocumentFetcher,
    ) -> CachedCapabilities {
        let cell = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(url.to_string()).or_default())
        };

        cell.get_or_init(|| async {
            tracing::debug!(url = %url, service = service.as_str(), "Fetching capabilities");
            let xml = fetcher.fetch(url).await.map_err(|e| e.to_string())?;
            parse_capabilities(&xml, service)
                .map(Arc::new)
                .map_err(|e| e.to_string())
        })
        .await
        .clone()
    }

    /// Number of distinct capabilities URLs seen.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a coupling pass.
#[derive(Debug, Default)]
pub struct CouplingReport {
    pub couplings: Vec<CouplingEntity>,
    pub warnings: Vec<String>,
}

struct CouplingJob {
    service_id: String,
    service_type: ServiceType,
    distribution: Distribution,
    dataset_identifier: String,
}

/// Resolves couplings for the services of one source.
pub struct Coupler {
    source_id: String,
    settings: CouplingSettings,
    fetcher: Arc<dyn DocumentFetcher>,
    limiter: ConcurrencyLimiter,
}

impl Coupler {
    pub fn new(
        source_id: impl Into<String>,
        settings: CouplingSettings,
        fetcher: Arc<dyn DocumentFetcher>,
        limiter: ConcurrencyLimiter,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            settings,
            fetcher,
            limiter,
        }
    }

    /// Couple `services` with the datasets they operate on.
    ///
    /// `known_datasets` only drives warnings: a coupling is emitted even
    /// for datasets this source does not hold.
    pub async fn couple(
        &self,
        services: &[RecordEntity],
        known_datasets: &HashSet<String>,
        cache: &CapabilityCache,
    ) -> CouplingReport {
        let mut report = CouplingReport::default();
        let mut jobs = Vec::new();

        for service in services {
            for distribution in &service.dataset.distributions {
                let Some(service_type) = distribution.service_type() else {
                    continue;
                };
                for dataset_identifier in &service.dataset.operates_on {
                    if !known_datasets.contains(dataset_identifier) {
                        report.warnings.push(format!(
                            "service {} operates on unknown dataset {dataset_identifier}",
                            service.identifier
                        ));
                    }
                    jobs.push(CouplingJob {
                        service_id: service.identifier.clone(),
                        service_type,
                        distribution: distribution.clone(),
                        dataset_identifier: dataset_identifier.clone(),
                    });
                }
            }
        }

        tracing::info!(source = %self.source_id, jobs = jobs.len(), "Coupling services");

        let tasks = jobs.into_iter().map(|job| self.resolve(job, cache));
        for (coupling, warnings) in self.limiter.run_all(tasks).await {
            report.couplings.push(coupling);
            report.warnings.extend(warnings);
        }
        report
    }

    async fn resolve(
        &self,
        job: CouplingJob,
        cache: &CapabilityCache,
    ) -> (CouplingEntity, Vec<String>) {
        let mut distribution = job.distribution;
        let service: OgcService = job.service_type.into();

        let names = match capabilities_url(&distribution.access_url, service) {
            Err(e) => {
                distribution.errors.push(format!("capabilities: {e}"));
                Vec::new()
            }
            Ok(url) => match cache.get_or_fetch(&url, service, self.fetcher.as_ref()).await {
                Ok(map) => self.select_names(&map, job.service_type, &job.dataset_identifier),
                Err(message) => {
                    distribution.errors.push(format!("capabilities: {message}"));
                    Vec::new()
                }
            },
        };

        if job.service_type == ServiceType::Wfs && self.settings.resolve_geometry {
            let geometry = self.resolve_geometry(&mut distribution, &names).await;
            distribution.geometry = geometry;
        }
        distribution.resolved_names = names;

        let warnings = distribution
            .errors
            .iter()
            .map(|e| {
                format!(
                    "coupling {} -> {}: {e}",
                    job.service_id, job.dataset_identifier
                )
            })
            .collect();

        let coupling = CouplingEntity {
            dataset_identifier: job.dataset_identifier,
            service_id: job.service_id,
            service_type: job.service_type,
            source: self.source_id.clone(),
            distribution,
        };
        (coupling, warnings)
    }

    /// Names linked to the dataset, or the configured defaults the service
    /// offers.
    fn select_names(
        &self,
        map: &CapabilityMap,
        service_type: ServiceType,
        dataset_identifier: &str,
    ) -> Vec<String> {
        if let Some(names) = map.names_for(dataset_identifier) {
            return names.to_vec();
        }
        let defaults = match service_type {
            ServiceType::Wfs => &self.settings.wfs_type_names,
            ServiceType::Wms => &self.settings.wms_layer_names,
        };
        defaults
            .iter()
            .filter(|name| map.all_names().contains(name))
            .cloned()
            .collect()
    }

    /// Union of the feature envelopes of every resolved type name.
    async fn resolve_geometry(
        &self,
        distribution: &mut Distribution,
        names: &[String],
    ) -> Option<Envelope> {
        let mut footprint: Option<Envelope> = None;
        for name in names {
            let envelope = match get_feature_url(
                &distribution.access_url,
                name,
                self.settings.max_features,
            ) {
                Ok(url) => match self.fetcher.fetch(&url).await {
                    Ok(xml) => feature_collection_envelope(&xml).map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                },
                Err(e) => Err(e.to_string()),
            };
            match envelope {
                Ok(Some(envelope)) => {
                    footprint = Some(match footprint {
                        Some(current) => current.union(envelope),
                        None => envelope,
                    });
                }
                Ok(None) => {}
                Err(message) => distribution.errors.push(format!("{name}: {message}")),
            }
        }
        footprint
    }
}
