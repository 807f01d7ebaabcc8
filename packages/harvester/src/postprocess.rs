//! Declarative post-processing of mapped records.
//!
//! Sources often need small corrections (a missing licence, a keyword that
//! marks records for a portal, a typo in titles). These are expressed as a
//! typed list of steps in the harvest settings and applied in order to every
//! mapped record.
//!
//! ```yaml
//! post_processing:
//!   - step: add_keyword
//!     keyword: opendata
//!   - step: replace
//!     field: title
//!     pattern: "^Bestemmingsplan "
//!     replacement: ""
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};
use crate::model::{License, MappedDataset};

/// Text field a `replace` step operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextField {
    Title,
    Description,
}

/// One post-processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PostProcessStep {
    /// Add a keyword unless already present.
    AddKeyword { keyword: String },
    /// Remove a keyword (case-insensitive).
    RemoveKeyword { keyword: String },
    /// Set the licence, optionally only when the record has none.
    SetLicense {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        only_if_missing: bool,
    },
    /// Regex replacement on a text field.
    Replace {
        field: TextField,
        pattern: String,
        replacement: String,
    },
    /// Flag records without a keyword as invalid.
    MarkInvalidWithoutKeyword { keyword: String },
}

#[derive(Debug, Clone)]
enum CompiledStep {
    AddKeyword(String),
    RemoveKeyword(String),
    SetLicense {
        license: License,
        only_if_missing: bool,
    },
    Replace {
        field: TextField,
        pattern: Regex,
        replacement: String,
    },
    MarkInvalidWithoutKeyword(String),
}

/// A compiled, ready-to-apply list of steps.
#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    steps: Vec<CompiledStep>,
}

impl PostProcessor {
    /// Compile steps, rejecting invalid regular expressions.
    pub fn compile(steps: &[PostProcessStep]) -> Result<Self> {
        let steps = steps
            .iter()
            .enumerate()
            .map(|(idx, step)| -> Result<CompiledStep> {
                Ok(match step {
                    PostProcessStep::AddKeyword { keyword } => {
                        CompiledStep::AddKeyword(keyword.clone())
                    }
                    PostProcessStep::RemoveKeyword { keyword } => {
                        CompiledStep::RemoveKeyword(keyword.clone())
                    }
                    PostProcessStep::SetLicense {
                        id,
                        url,
                        text,
                        only_if_missing,
                    } => CompiledStep::SetLicense {
                        license: License {
                            id: id.clone(),
                            url: url.clone(),
                            text: text.clone(),
                        },
                        only_if_missing: *only_if_missing,
                    },
                    PostProcessStep::Replace {
                        field,
                        pattern,
                        replacement,
                    } => CompiledStep::Replace {
                        field: *field,
                        pattern: Regex::new(pattern).map_err(|e| {
                            HarvestError::InvalidSettings(format!(
                                "post_processing[{idx}]: invalid pattern '{pattern}': {e}"
                            ))
                        })?,
                        replacement: replacement.clone(),
                    },
                    PostProcessStep::MarkInvalidWithoutKeyword { keyword } => {
                        CompiledStep::MarkInvalidWithoutKeyword(keyword.clone())
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply all steps in order.
    pub fn apply(&self, dataset: &mut MappedDataset) {
        for step in &self.steps {
            match step {
                CompiledStep::AddKeyword(keyword) => {
                    if !dataset.has_keyword(keyword) {
                        dataset.keywords.push(keyword.clone());
                    }
                }
                CompiledStep::RemoveKeyword(keyword) => {
                    dataset.keywords.retain(|k| !k.eq_ignore_ascii_case(keyword));
                }
                CompiledStep::SetLicense {
                    license,
                    only_if_missing,
                } => {
                    if !*only_if_missing || dataset.license.is_none() {
                        dataset.license = Some(license.clone());
                    }
                }
                CompiledStep::Replace {
                    field,
                    pattern,
                    replacement,
                } => match field {
                    TextField::Title => {
                        dataset.title = pattern
                            .replace_all(&dataset.title, replacement.as_str())
                            .into_owned();
                    }
                    TextField::Description => {
                        if let Some(description) = &dataset.description {
                            dataset.description = Some(
                                pattern
                                    .replace_all(description, replacement.as_str())
                                    .into_owned(),
                            );
                        }
                    }
                },
                CompiledStep::MarkInvalidWithoutKeyword(keyword) => {
                    if !dataset.has_keyword(keyword) {
                        dataset.invalidate(format!("missing keyword '{keyword}'"));
                    }
                }
            }
        }
    }
}
