//! Search index collaborator.
//!
//! After a commit the orchestrator pushes every committed entity of the
//! source in one call. Pushes are idempotent upserts keyed by
//! `<source>:<identifier>`, so a repeated push never duplicates documents.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{HarvestError, Result};
use crate::model::{CouplingEntity, RecordEntity};
use crate::storage::write_atomic;

/// Index name for record documents.
pub const RECORD_INDEX: &str = "geoharvest-records";

/// Index name for coupling documents.
pub const COUPLING_INDEX: &str = "geoharvest-couplings";

/// Receives committed entities.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Push all entities of `source`; returns the number of documents.
    async fn push(
        &self,
        source: &str,
        records: &[RecordEntity],
        couplings: &[CouplingEntity],
    ) -> Result<usize>;
}

/// The index document of a record.
pub fn record_document(record: &RecordEntity) -> Value {
    let dataset = &record.dataset;
    json!({
        "identifier": record.identifier,
        "source": record.source,
        "collection_id": record.collection_id,
        "type": dataset.kind.as_str(),
        "title": dataset.title,
        "description": dataset.description,
        "keywords": dataset.keywords,
        "service_type": dataset.service_type.map(|t| t.as_str()),
        "operates_on": dataset.operates_on,
        "distributions": dataset.distributions,
        "license": dataset.license,
        "contacts": dataset.contacts,
        "temporal": dataset.temporal,
        "geometry": dataset.bounding_box.map(|b| b.to_geojson()),
        "modified": dataset.modified,
        "harvested_at": dataset.harvested_at,
        "is_valid": dataset.is_valid,
        "quality_notes": dataset.quality_notes,
    })
}

/// The index document of a coupling.
pub fn coupling_document(coupling: &CouplingEntity) -> Value {
    json!({
        "dataset_identifier": coupling.dataset_identifier,
        "service_id": coupling.service_id,
        "service_type": coupling.service_type.as_str(),
        "source": coupling.source,
        "access_url": coupling.distribution.access_url,
        "names": coupling.distribution.resolved_names,
        "geometry": coupling.distribution.geometry.map(|g| g.to_geojson()),
        "errors": coupling.distribution.errors,
    })
}

/// Render entities as an Elasticsearch bulk request body.
pub fn bulk_body(records: &[RecordEntity], couplings: &[CouplingEntity]) -> Result<String> {
    let mut body = String::new();
    let mut push_pair = |index: &str, id: String, document: Value| -> Result<()> {
        let action = json!({ "index": { "_index": index, "_id": id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&document)?);
        body.push('\n');
        Ok(())
    };

    for record in records {
        push_pair(
            RECORD_INDEX,
            format!("{}:{}", record.source, record.identifier),
            record_document(record),
        )?;
    }
    for coupling in couplings {
        push_pair(
            COUPLING_INDEX,
            format!("{}:{}", coupling.source, coupling.id()),
            coupling_document(coupling),
        )?;
    }
    Ok(body)
}

/// Writes one bulk NDJSON file per source into a directory.
#[derive(Debug, Clone)]
pub struct BulkFileIndex {
    dir: PathBuf,
}

impl BulkFileIndex {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{source}.ndjson"))
    }
}

#[async_trait]
impl SearchIndex for BulkFileIndex {
    async fn push(
        &self,
        source: &str,
        records: &[RecordEntity],
        couplings: &[CouplingEntity],
    ) -> Result<usize> {
        let body = bulk_body(records, couplings)?;
        let path = self.path_for(source);
        write_atomic(&path, &body)
            .await
            .map_err(|e| HarvestError::Index(format!("{}: {e}", path.display())))?;

        let documents = records.len() + couplings.len();
        tracing::info!(source, documents, path = %path.display(), "Index bulk file written");
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Distribution, MappedDataset, ServiceType};
    use chrono::Utc;
    use geoharvest_csw::Envelope;
    use tempfile::tempdir;

    fn record(id: &str) -> RecordEntity {
        let mut dataset = MappedDataset::new(id, Utc::now());
        dataset.title = format!("Title {id}");
        dataset.bounding_box = Some(Envelope::new(3.0, 50.0, 7.0, 53.0));
        RecordEntity {
            identifier: id.to_string(),
            source: "geo".to_string(),
            collection_id: None,
            dataset,
            original_document: String::new(),
        }
    }

    #[test]
    fn test_bulk_body_pairs_actions_and_documents() {
        let coupling = CouplingEntity {
            dataset_identifier: "a".to_string(),
            service_id: "svc".to_string(),
            service_type: ServiceType::Wfs,
            source: "geo".to_string(),
            distribution: Distribution {
                access_url: "https://example.org/wfs".to_string(),
                resolved_names: vec!["plu:SpatialPlan".to_string()],
                ..Distribution::default()
            },
        };
        let body = bulk_body(&[record("a"), record("b")], &[coupling]).unwrap();
        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0]["index"]["_id"], "geo:a");
        assert_eq!(lines[1]["title"], "Title a");
        assert_eq!(lines[1]["geometry"]["type"], "Polygon");
        assert_eq!(lines[4]["index"]["_index"], COUPLING_INDEX);
        assert_eq!(lines[5]["service_type"], "WFS");
        assert_eq!(lines[5]["names"][0], "plu:SpatialPlan");
    }

    #[tokio::test]
    async fn test_bulk_file_index_overwrites() {
        let dir = tempdir().unwrap();
        let index = BulkFileIndex::new(dir.path());

        assert_eq!(index.push("geo", &[record("a"), record("b")], &[]).await.unwrap(), 2);
        assert_eq!(index.push("geo", &[record("a")], &[]).await.unwrap(), 1);

        let content = std::fs::read_to_string(index.path_for("geo")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
