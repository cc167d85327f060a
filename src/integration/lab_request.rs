//! Lab-request collaborator boundary
//!
//! The analyzer link only ever reads a lab request's id and writes a narrow
//! patch: the component map, the status, and import bookkeeping. Everything
//! else on the record belongs to the surrounding system.

use crate::error::{AnalyzerError, Result};
use crate::protocol::ComponentMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::debug;

/// Opaque lab-request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabRequestId(String);

impl LabRequestId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        LabRequestId(id.into())
    }

    /// Identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LabRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LabRequestId {
    fn from(id: &str) -> Self {
        LabRequestId::new(id)
    }
}

impl From<String> for LabRequestId {
    fn from(id: String) -> Self {
        LabRequestId(id)
    }
}

/// Processing status of a lab request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabRequestStatus {
    /// Waiting for results
    #[default]
    Pending,
    /// Sample is being processed
    InProgress,
    /// Analyzer results have been written to the request
    ResultsImported,
    /// Results verified and released
    Completed,
}

/// The fields of a lab request this crate reads back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabRequestRecord {
    /// Request id
    pub id: LabRequestId,
    /// Component values keyed by canonical name
    #[serde(default)]
    pub components: ComponentMap,
    /// Processing status
    #[serde(default)]
    pub status: LabRequestStatus,
    /// When analyzer results were last written
    #[serde(default)]
    pub results_imported_at: Option<DateTime<Utc>>,
    /// Whether the current components came from real hardware
    #[serde(default)]
    pub imported_from_analyzer: bool,
}

impl LabRequestRecord {
    /// A fresh pending request with no components
    pub fn pending(id: impl Into<LabRequestId>) -> Self {
        LabRequestRecord {
            id: id.into(),
            components: ComponentMap::new(),
            status: LabRequestStatus::Pending,
            results_imported_at: None,
            imported_from_analyzer: false,
        }
    }

    /// Apply a patch; absent fields are left untouched
    pub fn apply(&mut self, patch: LabRequestPatch) {
        if let Some(components) = patch.components {
            self.components = components;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(imported_at) = patch.results_imported_at {
            self.results_imported_at = imported_at;
        }
        if let Some(imported) = patch.imported_from_analyzer {
            self.imported_from_analyzer = imported;
        }
    }
}

/// The complete write surface against a lab request
///
/// `None` leaves a field untouched. `components` replaces the whole map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabRequestPatch {
    /// Replacement component map
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentMap>,
    /// New status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LabRequestStatus>,
    /// Import time; `Some(None)` clears it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_imported_at: Option<Option<DateTime<Utc>>>,
    /// Hardware-import marker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_from_analyzer: Option<bool>,
}

impl LabRequestPatch {
    /// Overwrite components and mark results as imported
    pub fn import(components: ComponentMap, from_analyzer: bool, at: DateTime<Utc>) -> Self {
        LabRequestPatch {
            components: Some(components),
            status: Some(LabRequestStatus::ResultsImported),
            results_imported_at: Some(Some(at)),
            imported_from_analyzer: Some(from_analyzer),
        }
    }

    /// Empty the components and return the request to pending
    pub fn clear() -> Self {
        LabRequestPatch {
            components: Some(ComponentMap::new()),
            status: Some(LabRequestStatus::Pending),
            results_imported_at: Some(None),
            imported_from_analyzer: Some(false),
        }
    }
}

/// Storage for lab requests, implemented by the surrounding system
#[async_trait]
pub trait LabRequestStore: Send + Sync {
    /// Fetch a request, `None` if it does not exist
    async fn get(&self, id: &LabRequestId) -> Result<Option<LabRequestRecord>>;

    /// Apply a patch to an existing request
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Persistence`] - Unknown id or rejected write
    async fn update(&self, id: &LabRequestId, patch: LabRequestPatch) -> Result<()>;
}

/// Process-local store, used for demos and tests
#[derive(Debug, Default)]
pub struct InMemoryLabRequestStore {
    records: RwLock<HashMap<LabRequestId, LabRequestRecord>>,
}

impl InMemoryLabRequestStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub async fn insert(&self, record: LabRequestRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl LabRequestStore for InMemoryLabRequestStore {
    async fn get(&self, id: &LabRequestId) -> Result<Option<LabRequestRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update(&self, id: &LabRequestId, patch: LabRequestPatch) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| AnalyzerError::Persistence(format!("lab request {} not found", id)))?;
        record.apply(patch);
        debug!(lab_request_id = %id, status = ?record.status, "Lab request updated");
        Ok(())
    }
}
