//! Schema registry
//!
//! Column definitions for the archive tables, keyed by logical schema name.
//! The warehouse adapter creates tables from these definitions and the
//! orchestrator checks records against them before loading.

use crate::error::{ArchiveError, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Timestamp,
    Integer,
    Float,
    Boolean,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Nullable,
    Required,
    Repeated,
}

/// One column declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FieldMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSchema {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            mode: None,
            description: None,
        }
    }

    pub fn with_mode(mut self, mode: FieldMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn is_required(&self) -> bool {
        self.mode == Some(FieldMode::Required)
    }
}

fn metrics_fields(identity_mode: FieldMode) -> Vec<FieldSchema> {
    vec![
        FieldSchema::new("id", FieldType::String)
            .with_mode(identity_mode)
            .describe("Original leaf key in the metrics tree"),
        FieldSchema::new("companyId", FieldType::String)
            .with_mode(identity_mode)
            .describe("Company that owns the monitored user"),
        FieldSchema::new("userId", FieldType::String)
            .with_mode(identity_mode)
            .describe("Monitored user"),
        FieldSchema::new("metricsType", FieldType::String)
            .with_mode(identity_mode)
            .describe("Event category, `type/subType` when nested"),
        FieldSchema::new("timestamp", FieldType::Timestamp)
            .with_mode(identity_mode)
            .describe("Event time taken from the leaf key"),
        FieldSchema::new("rawData", FieldType::String)
            .with_mode(FieldMode::Nullable)
            .describe("Leaf payload as JSON text"),
    ]
}

static REGISTRY: Lazy<BTreeMap<&'static str, Vec<FieldSchema>>> = Lazy::new(|| {
    let mut registry = BTreeMap::new();
    registry.insert("metrics", metrics_fields(FieldMode::Nullable));
    registry.insert("metrics_strict", metrics_fields(FieldMode::Required));
    registry
});

/// Look up a schema by logical name
pub fn get_schema(name: &str) -> Result<&'static [FieldSchema]> {
    REGISTRY
        .get(name)
        .map(|fields| fields.as_slice())
        .ok_or_else(|| ArchiveError::UnknownSchema(name.to_string()))
}

pub fn available_schemas() -> Vec<&'static str> {
    REGISTRY.keys().copied().collect()
}

pub fn field_names(schema: &[FieldSchema]) -> Vec<&str> {
    schema.iter().map(|f| f.name.as_str()).collect()
}

/// Mismatch between a record's populated fields and a declared schema
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDrift {
    pub missing_in_data: Vec<String>,
    pub extra_in_data: Vec<String>,
}

impl SchemaDrift {
    pub fn is_empty(&self) -> bool {
        self.missing_in_data.is_empty() && self.extra_in_data.is_empty()
    }
}

pub fn detect_drift(schema: &[FieldSchema], present: &[&str]) -> SchemaDrift {
    let declared = field_names(schema);
    SchemaDrift {
        missing_in_data: declared
            .iter()
            .filter(|name| !present.contains(*name))
            .map(|name| name.to_string())
            .collect(),
        extra_in_data: present
            .iter()
            .filter(|name| !declared.contains(*name))
            .map(|name| name.to_string())
            .collect(),
    }
}
