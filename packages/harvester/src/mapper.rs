//! ISO 19139 record mapping.
//!
//! Turns one `gmd:MD_Metadata` document into a [`RecordEntity`]. Mapping is
//! synchronous and total: every input ends in exactly one
//! [`RecordOutcome`], and problems with the source data become validity
//! notes or skip reasons rather than errors.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use geoharvest_csw::capabilities::identifier_from_url;
use geoharvest_csw::xml::{
    character_string, find_all_by_path, find_by_path, find_child, find_children, get_attribute,
    get_tag_name, has_tag, text_at,
};
use geoharvest_csw::Envelope;
use roxmltree::{Document, Node};

use crate::error::{HarvestError, Result};
use crate::model::{
    Contact, Distribution, License, MappedDataset, RecordEntity, RecordKind, ServiceType,
    TemporalExtent,
};
use crate::postprocess::PostProcessor;
use crate::settings::HarvestSettings;

/// Result of mapping one record.
#[derive(Debug)]
pub enum RecordOutcome {
    /// Mapped and ready to stage; `warnings` describe validity problems.
    Mapped {
        entity: Box<RecordEntity>,
        warnings: Vec<String>,
    },
    /// Deliberately excluded from persistence. A `warning` is set when the
    /// skip is a data problem the run should report.
    Skipped {
        identifier: String,
        reason: String,
        warning: Option<String>,
    },
    /// The record could not be read at all.
    Failed(HarvestError),
}

/// Maps ISO records for one source.
#[derive(Debug, Clone)]
pub struct IsoRecordMapper {
    source_id: String,
    allowed_ids: HashSet<String>,
    blocked_ids: HashSet<String>,
    mandatory_keywords: Vec<String>,
    post_processor: PostProcessor,
}

impl IsoRecordMapper {
    pub fn new(settings: &HarvestSettings) -> Result<Self> {
        Ok(Self {
            source_id: settings.source_id.clone(),
            allowed_ids: settings.allowed_ids.iter().cloned().collect(),
            blocked_ids: settings.blocked_ids.iter().cloned().collect(),
            mandatory_keywords: settings.mandatory_keywords.clone(),
            post_processor: PostProcessor::compile(&settings.post_processing)?,
        })
    }

    /// Map one standalone record document.
    pub fn map(&self, raw: &str, harvested_at: DateTime<Utc>) -> RecordOutcome {
        let doc = match Document::parse(raw) {
            Ok(doc) => doc,
            Err(e) => {
                return RecordOutcome::Failed(HarvestError::Mapping {
                    identifier: None,
                    message: format!("malformed record: {e}"),
                })
            }
        };
        let root = doc.root_element();

        if !has_tag(root, "MD_Metadata") {
            return RecordOutcome::Failed(HarvestError::Mapping {
                identifier: None,
                message: format!("unexpected record element <{}>", get_tag_name(root)),
            });
        }

        let Some(identifier) = text_at(root, "fileIdentifier") else {
            return RecordOutcome::Failed(HarvestError::Mapping {
                identifier: None,
                message: "record has no fileIdentifier".to_string(),
            });
        };

        // Cheap id checks before any field extraction.
        if let Some(reason) = self.id_filter(&identifier) {
            return RecordOutcome::Skipped {
                identifier,
                reason,
                warning: None,
            };
        }

        let mut dataset = map_iso_record(root, &identifier, harvested_at);

        if !self.mandatory_keywords.is_empty()
            && !self.mandatory_keywords.iter().any(|k| dataset.has_keyword(k))
        {
            let reason = format!(
                "none of the mandatory keywords present ({})",
                self.mandatory_keywords.join(", ")
            );
            return RecordOutcome::Skipped {
                warning: Some(format!("{identifier}: {reason}")),
                reason,
                identifier,
            };
        }

        check_validity(&mut dataset);
        self.post_processor.apply(&mut dataset);

        let warnings = dataset
            .quality_notes
            .iter()
            .map(|note| format!("{identifier}: {note}"))
            .collect();

        RecordOutcome::Mapped {
            entity: Box::new(RecordEntity {
                identifier,
                source: self.source_id.clone(),
                collection_id: None,
                dataset,
                original_document: raw.to_string(),
            }),
            warnings,
        }
    }

    fn id_filter(&self, identifier: &str) -> Option<String> {
        if self.blocked_ids.contains(identifier) {
            return Some("identifier is blocked".to_string());
        }
        if !self.allowed_ids.is_empty() && !self.allowed_ids.contains(identifier) {
            return Some("identifier is not in the allow list".to_string());
        }
        None
    }
}

fn check_validity(dataset: &mut MappedDataset) {
    if dataset.title.is_empty() {
        dataset.invalidate("missing title");
    }
    if dataset.description.is_none() {
        dataset.invalidate("missing abstract");
    }
    if dataset.distributions.is_empty() {
        dataset.invalidate("no distributions");
    }
}

/// Extract all fields of an `MD_Metadata` element.
pub fn map_iso_record(
    root: Node<'_, '_>,
    identifier: &str,
    harvested_at: DateTime<Utc>,
) -> MappedDataset {
    let mut dataset = MappedDataset::new(identifier, harvested_at);

    dataset.kind = find_by_path(root, "hierarchyLevel/MD_ScopeCode")
        .map(|code| {
            get_attribute(code, "codeListValue")
                .map(str::to_string)
                .unwrap_or_else(|| code.text().unwrap_or_default().to_string())
        })
        .map(|code| RecordKind::from_scope_code(&code))
        .unwrap_or_default();
    dataset.modified = text_at(root, "dateStamp");
    dataset.distributions = distributions(root);

    let Some(ident) = find_by_path(root, "identificationInfo/*") else {
        return dataset;
    };

    dataset.title = text_at(ident, "citation/CI_Citation/title").unwrap_or_default();
    dataset.description = text_at(ident, "abstract");
    dataset.keywords = keywords(ident);
    dataset.resource_identifiers = find_all_by_path(ident, "citation/CI_Citation/identifier/*/code")
        .into_iter()
        .filter_map(character_string)
        .collect();
    dataset.operates_on = operates_on(ident);
    dataset.bounding_box = bounding_box(ident);
    dataset.temporal = temporal_extent(ident);
    dataset.license = license(ident);
    dataset.contacts = contacts(ident);

    if dataset.is_service() {
        dataset.service_type = dataset
            .distributions
            .iter()
            .find_map(Distribution::service_type)
            .or_else(|| text_at(ident, "serviceType").and_then(|t| service_type_from_name(&t)));
    }

    dataset
}

fn service_type_from_name(name: &str) -> Option<ServiceType> {
    match name.trim().to_ascii_lowercase().as_str() {
        "download" | "wfs" | "ogc:wfs" => Some(ServiceType::Wfs),
        "view" | "wms" | "ogc:wms" => Some(ServiceType::Wms),
        _ => None,
    }
}

fn keywords(ident: Node<'_, '_>) -> Vec<String> {
    let mut seen = HashSet::new();
    find_all_by_path(ident, "descriptiveKeywords/MD_Keywords/keyword")
        .into_iter()
        .chain(find_all_by_path(ident, "keywords/MD_Keywords/keyword"))
        .filter_map(character_string)
        .filter(|k| seen.insert(k.to_lowercase()))
        .collect()
}

fn distributions(root: Node<'_, '_>) -> Vec<Distribution> {
    let format = find_all_by_path(
        root,
        "distributionInfo/MD_Distribution/distributionFormat/MD_Format/name",
    )
    .into_iter()
    .find_map(character_string);

    find_all_by_path(
        root,
        "distributionInfo/MD_Distribution/transferOptions/MD_DigitalTransferOptions/onLine/CI_OnlineResource",
    )
    .into_iter()
    .filter_map(|resource| {
        let access_url = text_at(resource, "linkage")?;
        Some(Distribution {
            access_url,
            format: format.clone(),
            protocol: text_at(resource, "protocol"),
            name: text_at(resource, "name"),
            description: text_at(resource, "description"),
            ..Distribution::default()
        })
    })
    .collect()
}

fn operates_on(ident: Node<'_, '_>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for node in find_children(ident, "operatesOn") {
        let id = get_attribute(node, "uuidref")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| get_attribute(node, "href").and_then(identifier_from_url));
        if let Some(id) = id {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

fn bounding_box(ident: Node<'_, '_>) -> Option<Envelope> {
    find_all_by_path(ident, "extent/EX_Extent/geographicElement/EX_GeographicBoundingBox")
        .into_iter()
        .filter_map(|bbox| {
            let value = |name: &str| text_at(bbox, name).and_then(|v| v.parse::<f64>().ok());
            Some(Envelope::new(
                value("westBoundLongitude")?,
                value("southBoundLatitude")?,
                value("eastBoundLongitude")?,
                value("northBoundLatitude")?,
            ))
        })
        .reduce(Envelope::union)
}

fn temporal_extent(ident: Node<'_, '_>) -> Option<TemporalExtent> {
    let extent = find_all_by_path(
        ident,
        "extent/EX_Extent/temporalElement/EX_TemporalExtent/extent",
    )
    .into_iter()
    .next()?;

    if let Some(period) = find_child(extent, "TimePeriod") {
        let extent = TemporalExtent {
            start: text_at(period, "beginPosition"),
            end: text_at(period, "endPosition"),
        };
        return Some(extent).filter(|e| e.start.is_some() || e.end.is_some());
    }
    find_by_path(extent, "TimeInstant/timePosition")
        .and_then(character_string)
        .map(|instant| TemporalExtent {
            start: Some(instant.clone()),
            end: Some(instant),
        })
}

fn license(ident: Node<'_, '_>) -> Option<License> {
    find_all_by_path(ident, "resourceConstraints/MD_LegalConstraints/otherConstraints")
        .into_iter()
        .find_map(|constraint| {
            let text = character_string(constraint)?;
            let anchor_url = find_child(constraint, "Anchor")
                .and_then(|a| get_attribute(a, "href"))
                .map(str::to_string);
            Some(parse_license(&text, anchor_url))
        })
}

/// Read a licence from `otherConstraints`: a JSON `{id, url, name}` object
/// or free text.
fn parse_license(text: &str, anchor_url: Option<String>) -> License {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(text) {
        let field = |key: &str| map.get(key).and_then(|v| v.as_str()).map(str::to_string);
        return License {
            id: field("id"),
            url: field("url").or(anchor_url),
            text: field("name"),
        };
    }
    let url = anchor_url.or_else(|| {
        text.split_whitespace()
            .find(|word| word.starts_with("http://") || word.starts_with("https://"))
            .map(str::to_string)
    });
    License {
        id: None,
        url,
        text: Some(text.to_string()),
    }
}

fn contacts(ident: Node<'_, '_>) -> Vec<Contact> {
    find_all_by_path(ident, "pointOfContact/CI_ResponsibleParty")
        .into_iter()
        .map(|party| Contact {
            organisation: text_at(party, "organisationName"),
            email: text_at(
                party,
                "contactInfo/CI_Contact/address/CI_Address/electronicMailAddress",
            ),
            role: find_by_path(party, "role/CI_RoleCode")
                .and_then(|r| get_attribute(r, "codeListValue"))
                .map(str::to_string),
        })
        .filter(|c| c.organisation.is_some() || c.email.is_some())
        .collect()
}
