//! Source column → destination field mapping.
//!
//! A mapping file holds one `source=destination` pair per line. A destination
//! list (`Name=Name,Description`) copies one column into several fields, and a
//! quoted source (`"Partner"=Type`) sends the same constant on every row.

use crate::domain::model::{OperationKind, TableRow};
use crate::utils::error::{LoaderError, Result};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

pub const ID_FIELD: &str = "Id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingSource {
    Column(String),
    Constant(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MappingEntry {
    source: MappingSource,
    destinations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    entries: Vec<MappingEntry>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LoaderError::io(path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut mapping = Self::new();

        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| LoaderError::MappingError {
                message: format!("line {}: expected source=destination, got '{}'", idx + 1, line),
            })?;

            let key = key.trim();
            let source = match key.strip_prefix('"').and_then(|k| k.strip_suffix('"')) {
                Some(constant) => MappingSource::Constant(constant.to_string()),
                None if key.is_empty() => {
                    return Err(LoaderError::MappingError {
                        message: format!("line {}: empty source column", idx + 1),
                    })
                }
                None => MappingSource::Column(key.to_string()),
            };

            let destinations: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .collect();

            mapping.entries.push(MappingEntry {
                source,
                destinations,
            });
        }

        Ok(mapping)
    }

    /// Maps every source column onto the destination field with the same name,
    /// ignoring ASCII case. With no destination list the mapping is the identity.
    pub fn auto_match(source_columns: &[String], destination_fields: &[String]) -> Self {
        let entries = source_columns
            .iter()
            .filter_map(|column| {
                let destination = if destination_fields.is_empty() {
                    Some(column.clone())
                } else {
                    destination_fields
                        .iter()
                        .find(|field| field.eq_ignore_ascii_case(column))
                        .cloned()
                };
                destination.map(|d| MappingEntry {
                    source: MappingSource::Column(column.clone()),
                    destinations: vec![d],
                })
            })
            .collect();

        Self { entries }
    }

    /// Binds `destination` to `source` alone.
    ///
    /// Returns the fields previously bound to `source`, so a caller showing the
    /// unused destination fields can offer them again. Any other column bound to
    /// `destination` loses it.
    pub fn put_mapping(&mut self, source: &str, destination: &str) -> Vec<String> {
        for entry in &mut self.entries {
            if !matches!(&entry.source, MappingSource::Column(c) if c == source) {
                entry
                    .destinations
                    .retain(|d| !d.eq_ignore_ascii_case(destination));
            }
        }

        let column = MappingSource::Column(source.to_string());
        match self.entries.iter_mut().find(|e| e.source == column) {
            Some(entry) => std::mem::replace(&mut entry.destinations, vec![destination.to_string()])
                .into_iter()
                .filter(|d| !d.eq_ignore_ascii_case(destination))
                .collect(),
            None => {
                self.entries.push(MappingEntry {
                    source: column,
                    destinations: vec![destination.to_string()],
                });
                Vec::new()
            }
        }
    }

    pub fn remove_mapping(&mut self, source: &str) -> Vec<String> {
        let column = MappingSource::Column(source.to_string());
        match self.entries.iter().position(|e| e.source == column) {
            Some(idx) => self.entries.remove(idx).destinations,
            None => Vec::new(),
        }
    }

    pub fn destinations_for(&self, source: &str) -> &[String] {
        self.entries
            .iter()
            .find(|e| matches!(&e.source, MappingSource::Column(c) if c == source))
            .map(|e| e.destinations.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.destinations.is_empty())
    }

    /// Produces the ordered column → field table for one input header.
    pub fn resolve(&self, source_columns: &[String]) -> Result<ResolvedMapping> {
        let mut fields = Vec::new();
        let mut sources = Vec::new();
        let mut seen = HashSet::new();

        for entry in &self.entries {
            let value_source = match &entry.source {
                MappingSource::Column(name) => {
                    match source_columns.iter().position(|c| c == name) {
                        Some(idx) => ValueSource::Column(idx),
                        None => {
                            if !entry.destinations.is_empty() {
                                tracing::warn!(
                                    "⚠️ Mapped column '{}' is not in the input file, skipping",
                                    name
                                );
                            }
                            continue;
                        }
                    }
                }
                MappingSource::Constant(value) => ValueSource::Constant(value.clone()),
            };

            for destination in &entry.destinations {
                if !seen.insert(destination.to_ascii_lowercase()) {
                    return Err(LoaderError::MappingError {
                        message: format!("destination field '{}' is mapped more than once", destination),
                    });
                }
                fields.push(destination.clone());
                sources.push(value_source.clone());
            }
        }

        Ok(ResolvedMapping {
            fields: fields.into(),
            sources,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ValueSource {
    Column(usize),
    Constant(String),
}

/// A mapping bound to a concrete input header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMapping {
    fields: Arc<[String]>,
    sources: Vec<ValueSource>,
}

impl ResolvedMapping {
    pub fn destination_fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.eq_ignore_ascii_case(name))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Source rows must come from the header this mapping was resolved against.
    pub fn map_row(&self, row: &TableRow) -> TableRow {
        let values = self
            .sources
            .iter()
            .map(|source| match source {
                ValueSource::Column(idx) => row.values().get(*idx).cloned().unwrap_or_default(),
                ValueSource::Constant(value) => value.clone(),
            })
            .collect();
        TableRow::from_shared(Arc::clone(&self.fields), values)
    }

    pub fn validate_for(&self, operation: OperationKind, external_id_field: Option<&str>) -> Result<()> {
        if self.is_empty() && !operation.is_extract() {
            return Err(LoaderError::MappingError {
                message: "no input column is mapped to a destination field".to_string(),
            });
        }

        match operation {
            OperationKind::Update | OperationKind::Delete if !self.has_field(ID_FIELD) => {
                Err(LoaderError::MappingError {
                    message: format!("{} requires a column mapped to '{}'", operation, ID_FIELD),
                })
            }
            OperationKind::Upsert => {
                let field = external_id_field.unwrap_or(ID_FIELD);
                if self.has_field(field) {
                    Ok(())
                } else {
                    Err(LoaderError::MappingError {
                        message: format!("upsert requires a column mapped to external id '{}'", field),
                    })
                }
            }
            _ => Ok(()),
        }
    }
}
