//! Integration orchestrator
//!
//! [`AnalyzerIntegration`] is the surface the rest of the HMIS calls. It
//! drives one [`AnalyzerTransport`], decodes and maps replies, and writes
//! results back through a [`LabRequestStore`]. Both collaborators are
//! injected, so tests run against fakes.
//!
//! # Example
//!
//! ```no_run
//! use bc10_analyzer::integration::{AnalyzerIntegration, InMemoryLabRequestStore, LabRequestId};
//! use bc10_analyzer::io::{AnalyzerEndpoint, TransportConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryLabRequestStore::new());
//!     let integration = AnalyzerIntegration::connect_to(
//!         AnalyzerEndpoint::bc10("192.168.1.50")?,
//!         TransportConfig::from_env()?,
//!         store,
//!     )?;
//!
//!     integration.initialize().await;
//!     let lab_request = LabRequestId::from("LR-1001");
//!     if let Some(outcome) = integration.request_cbc_result("CBC001", Some(&lab_request)).await? {
//!         println!("{} components", outcome.result.components.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod http_store;
pub mod lab_request;

pub use http_store::HttpLabRequestStore;
pub use lab_request::{
    InMemoryLabRequestStore, LabRequestId, LabRequestPatch, LabRequestRecord, LabRequestStatus,
    LabRequestStore,
};

use crate::diagnostics;
use crate::error::Result;
use crate::io::{
    AnalyzerEndpoint, AnalyzerTransport, ConnectionStatus, TransportClient, TransportConfig,
};
use crate::protocol::{AnalyzerResult, ComponentMap, QueryMessage};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to the write-back of a fetched result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum PersistenceOutcome {
    /// No lab request was given
    NotRequested,
    /// Components were written to the lab request
    Saved,
    /// The write failed; the result is still valid
    Failed(String),
}

impl PersistenceOutcome {
    /// Whether the write-back failed
    pub fn is_failed(&self) -> bool {
        matches!(self, PersistenceOutcome::Failed(_))
    }
}

/// A fetched result together with its write-back outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchOutcome {
    /// Decoded and mapped result
    pub result: AnalyzerResult,
    /// Write-back outcome
    pub persistence: PersistenceOutcome,
}

/// Orchestrates analyzer queries and lab-request write-back
pub struct AnalyzerIntegration {
    transport: Arc<dyn AnalyzerTransport>,
    store: Arc<dyn LabRequestStore>,
}

impl AnalyzerIntegration {
    /// Create an orchestrator over existing collaborators
    pub fn new(transport: Arc<dyn AnalyzerTransport>, store: Arc<dyn LabRequestStore>) -> Self {
        AnalyzerIntegration { transport, store }
    }

    /// Create an orchestrator with a [`TransportClient`] for `endpoint`
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Http`](crate::error::AnalyzerError::Http) - HTTP client could not be built
    pub fn connect_to(
        endpoint: AnalyzerEndpoint,
        config: TransportConfig,
        store: Arc<dyn LabRequestStore>,
    ) -> Result<Self> {
        let transport = TransportClient::new(endpoint, config)?;
        Ok(Self::new(Arc::new(transport), store))
    }

    /// Best-effort connectivity check
    ///
    /// An unreachable analyzer is a normal operating state, so this never
    /// fails; the returned status says whether the analyzer answered.
    pub async fn initialize(&self) -> ConnectionStatus {
        match self.transport.connect().await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Analyzer not reachable, continuing disconnected");
                self.transport.connection_status()
            }
        }
    }

    /// Fetch the CBC result for `sample_id` from the analyzer
    ///
    /// Returns `Ok(None)` when the analyzer answered with nothing usable:
    /// an undecodable reply, a non-CBC panel, or a result for a different
    /// sample. When `lab_request` is given, the components are written to
    /// it and the request is marked as imported; a failed write is reported
    /// in [`FetchOutcome::persistence`] and does not discard the result.
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Validation`](crate::error::AnalyzerError::Validation) - Empty or malformed sample id
    /// - [`AnalyzerError::Busy`](crate::error::AnalyzerError::Busy) - Another fetch is in flight
    /// - [`AnalyzerError::Transport`](crate::error::AnalyzerError::Transport) - Every strategy failed
    pub async fn request_cbc_result(
        &self,
        sample_id: &str,
        lab_request: Option<&LabRequestId>,
    ) -> Result<Option<FetchOutcome>> {
        let query = QueryMessage::new(sample_id)?;
        debug!(sample_id = %query.sample_id, "Requesting CBC result");

        let reply = self.transport.request(&query).await?;

        let result = match reply.decode() {
            Ok(result) => result,
            Err(e) => {
                warn!(sample_id = %query.sample_id, error = %e, "Analyzer reply carried no result");
                return Ok(None);
            }
        };

        if !result.is_cbc() {
            info!(
                sample_id = %query.sample_id,
                test_code = %result.test_code,
                "Ignoring non-CBC result"
            );
            return Ok(None);
        }
        if result.sample_id != query.sample_id {
            warn!(
                requested = %query.sample_id,
                received = %result.sample_id,
                "Analyzer answered for a different sample"
            );
            return Ok(None);
        }

        info!(
            sample_id = %result.sample_id,
            components = result.components.len(),
            "CBC result received"
        );

        let persistence = self.persist(lab_request, &result, true).await;
        Ok(Some(FetchOutcome { result, persistence }))
    }

    /// Produce a simulated result without touching the analyzer
    ///
    /// The result carries [`ResultSource::Simulated`](crate::protocol::ResultSource::Simulated).
    /// When written to a lab request, the request is marked as not imported
    /// from the analyzer.
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Validation`](crate::error::AnalyzerError::Validation) - Empty sample id
    pub async fn mock_request_result(
        &self,
        sample_id: &str,
        lab_request: Option<&LabRequestId>,
    ) -> Result<FetchOutcome> {
        let result = diagnostics::simulate_cbc(sample_id)?;
        info!(sample_id = %result.sample_id, "Generated simulated CBC result");
        let persistence = self.persist(lab_request, &result, false).await;
        Ok(FetchOutcome { result, persistence })
    }

    async fn persist(
        &self,
        lab_request: Option<&LabRequestId>,
        result: &AnalyzerResult,
        from_analyzer: bool,
    ) -> PersistenceOutcome {
        let Some(id) = lab_request else {
            return PersistenceOutcome::NotRequested;
        };

        let patch = LabRequestPatch::import(result.component_map(), from_analyzer, Utc::now());
        match self.store.update(id, patch).await {
            Ok(()) => {
                info!(
                    lab_request_id = %id,
                    sample_id = %result.sample_id,
                    "Results saved to lab request"
                );
                PersistenceOutcome::Saved
            }
            Err(e) => {
                error!(
                    lab_request_id = %id,
                    sample_id = %result.sample_id,
                    error = %e,
                    "Failed to save results to lab request"
                );
                PersistenceOutcome::Failed(e.to_string())
            }
        }
    }

    /// Replace the lab request's components with `components`
    ///
    /// Prior components are discarded, never merged. The request's status
    /// and import bookkeeping are left as they are.
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Persistence`](crate::error::AnalyzerError::Persistence) - Store rejected the write
    pub async fn save_component_values(
        &self,
        lab_request: &LabRequestId,
        components: &ComponentMap,
    ) -> Result<()> {
        let patch = LabRequestPatch {
            components: Some(components.clone()),
            ..Default::default()
        };
        self.store.update(lab_request, patch).await?;
        debug!(
            lab_request_id = %lab_request,
            components = components.len(),
            "Component values saved"
        );
        Ok(())
    }

    /// Empty the lab request's components and return it to pending
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Persistence`](crate::error::AnalyzerError::Persistence) - Store rejected the write
    pub async fn clear_component_values(&self, lab_request: &LabRequestId) -> Result<()> {
        self.store.update(lab_request, LabRequestPatch::clear()).await?;
        info!(lab_request_id = %lab_request, "Component values cleared");
        Ok(())
    }

    /// Last observed analyzer connectivity
    pub fn connection_status(&self) -> ConnectionStatus {
        self.transport.connection_status()
    }

    /// Release analyzer connections; safe to call at any time
    pub async fn disconnect(&self) {
        self.transport.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnalyzerError, StrategyAttempt, TransportFailure};
    use crate::mapping::Flag;
    use crate::protocol::{ComponentValue, RawReply, ReplyPayload, ResultSource};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Transport that answers every request with the same scripted reply
    struct ScriptedTransport {
        reply: Option<String>,
        requests: AtomicUsize,
        connected: AtomicBool,
    }

    impl ScriptedTransport {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                reply: Some(text.to_string()),
                requests: AtomicUsize::new(0),
                connected: AtomicBool::new(false),
            })
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(ScriptedTransport {
                reply: None,
                requests: AtomicUsize::new(0),
                connected: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl AnalyzerTransport for ScriptedTransport {
        async fn connect(&self) -> Result<ConnectionStatus> {
            if self.reply.is_none() {
                return Err(AnalyzerError::Transport(TransportFailure {
                    attempts: vec![StrategyAttempt {
                        strategy: "relay-socket".into(),
                        reason: "connection refused".into(),
                    }],
                }));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(self.connection_status())
        }

        async fn request(&self, _query: &QueryMessage) -> Result<ReplyPayload> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(text) => Ok(ReplyPayload::Wire(RawReply::new(text.clone().into_bytes()))),
                None => Err(AnalyzerError::Transport(TransportFailure {
                    attempts: vec![
                        StrategyAttempt {
                            strategy: "relay-socket".into(),
                            reason: "no reply within 10000 ms".into(),
                        },
                        StrategyAttempt {
                            strategy: "http-poll".into(),
                            reason: "status 503".into(),
                        },
                    ],
                })),
            }
        }

        fn connection_status(&self) -> ConnectionStatus {
            ConnectionStatus {
                connected: self.connected.load(Ordering::SeqCst),
                host: "10.0.0.5".into(),
                port: 5100,
            }
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Store whose writes always fail
    struct RejectingStore;

    #[async_trait]
    impl LabRequestStore for RejectingStore {
        async fn get(&self, _id: &LabRequestId) -> Result<Option<LabRequestRecord>> {
            Ok(None)
        }

        async fn update(&self, _id: &LabRequestId, _patch: LabRequestPatch) -> Result<()> {
            Err(AnalyzerError::Persistence("database offline".into()))
        }
    }

    const CBC001_REPLY: &str = "MSH|^~\\&|BC-10|MINDRAY|||20260105093000||ORU^R01|1|P|2.3.1\r\
        PID|1||CBC001\r\
        OBX|WBC|7.2|10^9/L|N\r\
        OBX|HGB|13.8|g/dL|N\r\
        OBX|PLT|285|10^9/L|N";

    async fn store_with(id: &str) -> Arc<InMemoryLabRequestStore> {
        let store = Arc::new(InMemoryLabRequestStore::new());
        store.insert(LabRequestRecord::pending(id)).await;
        store
    }

    fn value(v: &str) -> ComponentValue {
        ComponentValue {
            value: v.to_string(),
            unit: "g/dL".to_string(),
            flag: Flag::Normal,
        }
    }

    #[tokio::test]
    async fn test_fetch_and_persist() {
        let store = store_with("LR-1").await;
        let integration =
            AnalyzerIntegration::new(ScriptedTransport::replying(CBC001_REPLY), store.clone());
        let id = LabRequestId::from("LR-1");

        let outcome = integration
            .request_cbc_result("CBC001", Some(&id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.persistence, PersistenceOutcome::Saved);
        assert_eq!(outcome.result.source, ResultSource::Analyzer);
        let names: Vec<_> = outcome
            .result
            .components
            .iter()
            .map(|c| c.canonical_name.as_str())
            .collect();
        assert_eq!(names, vec!["WBC", "HGB", "PLT"]);

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, LabRequestStatus::ResultsImported);
        assert!(record.imported_from_analyzer);
        assert!(record.results_imported_at.is_some());
        assert_eq!(record.components["PLT"].value, "285");
    }

    #[tokio::test]
    async fn test_fetch_without_lab_request() {
        let integration = AnalyzerIntegration::new(
            ScriptedTransport::replying(CBC001_REPLY),
            Arc::new(InMemoryLabRequestStore::new()),
        );
        let outcome = integration.request_cbc_result("CBC001", None).await.unwrap().unwrap();
        assert_eq!(outcome.persistence, PersistenceOutcome::NotRequested);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_result() {
        let integration = AnalyzerIntegration::new(
            ScriptedTransport::replying(CBC001_REPLY),
            Arc::new(RejectingStore),
        );
        let outcome = integration
            .request_cbc_result("CBC001", Some(&LabRequestId::from("LR-9")))
            .await
            .unwrap()
            .unwrap();

        assert!(outcome.persistence.is_failed());
        assert!(matches!(
            &outcome.persistence,
            PersistenceOutcome::Failed(r) if r.contains("database offline")
        ));
        assert_eq!(outcome.result.components.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_sample_id_never_reaches_transport() {
        let transport = ScriptedTransport::replying(CBC001_REPLY);
        let integration =
            AnalyzerIntegration::new(transport.clone(), Arc::new(InMemoryLabRequestStore::new()));

        let err = integration.request_cbc_result("  ", None).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Validation(_)));
        assert_eq!(transport.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_surfaced_not_mocked() {
        let store = store_with("LR-2").await;
        let integration = AnalyzerIntegration::new(ScriptedTransport::unreachable(), store.clone());
        let id = LabRequestId::from("LR-2");

        let err = integration.request_cbc_result("CBC001", Some(&id)).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("relay-socket"));
        assert!(text.contains("http-poll"));

        // Nothing was written
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record, LabRequestRecord::pending("LR-2"));
    }

    #[tokio::test]
    async fn test_undecodable_reply_is_no_result() {
        let integration = AnalyzerIntegration::new(
            ScriptedTransport::replying("garbage without segments"),
            Arc::new(InMemoryLabRequestStore::new()),
        );
        assert!(integration.request_cbc_result("CBC001", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_sample_is_no_result() {
        let integration = AnalyzerIntegration::new(
            ScriptedTransport::replying(CBC001_REPLY),
            Arc::new(InMemoryLabRequestStore::new()),
        );
        assert!(integration.request_cbc_result("CBC002", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = store_with("LR-3").await;
        let integration = AnalyzerIntegration::new(ScriptedTransport::unreachable(), store.clone());
        let id = LabRequestId::from("LR-3");

        let first: ComponentMap = [
            ("WBC".to_string(), value("6.0")),
            ("HGB".to_string(), value("12.0")),
        ]
        .into_iter()
        .collect();
        let second: ComponentMap = [("PLT".to_string(), value("300"))].into_iter().collect();

        integration.save_component_values(&id, &first).await.unwrap();
        integration.save_component_values(&id, &second).await.unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.components, second);
    }

    #[tokio::test]
    async fn test_clear_resets_any_state() {
        let store = store_with("LR-4").await;
        let integration =
            AnalyzerIntegration::new(ScriptedTransport::replying(CBC001_REPLY), store.clone());
        let id = LabRequestId::from("LR-4");

        integration.request_cbc_result("CBC001", Some(&id)).await.unwrap();
        integration.clear_component_values(&id).await.unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert!(record.components.is_empty());
        assert_eq!(record.status, LabRequestStatus::Pending);
        assert!(!record.imported_from_analyzer);
        assert!(record.results_imported_at.is_none());
    }

    #[tokio::test]
    async fn test_clear_unknown_request_fails() {
        let integration = AnalyzerIntegration::new(
            ScriptedTransport::unreachable(),
            Arc::new(InMemoryLabRequestStore::new()),
        );
        let err = integration
            .clear_component_values(&LabRequestId::from("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_mock_is_marked_and_deterministic() {
        let store = store_with("LR-5").await;
        let transport = ScriptedTransport::unreachable();
        let integration = AnalyzerIntegration::new(transport.clone(), store.clone());
        let id = LabRequestId::from("LR-5");

        let a = integration.mock_request_result("CBC001", Some(&id)).await.unwrap();
        let b = integration.mock_request_result("CBC001", None).await.unwrap();

        assert_eq!(a.result.source, ResultSource::Simulated);
        assert_eq!(a.result.components, b.result.components);
        assert_eq!(a.persistence, PersistenceOutcome::Saved);
        assert_eq!(transport.requests.load(Ordering::SeqCst), 0);

        let record = store.get(&id).await.unwrap().unwrap();
        assert!(!record.imported_from_analyzer);
        assert_eq!(record.components.len(), 20);
    }

    #[tokio::test]
    async fn test_initialize_tolerates_unreachable_analyzer() {
        let integration = AnalyzerIntegration::new(
            ScriptedTransport::unreachable(),
            Arc::new(InMemoryLabRequestStore::new()),
        );
        let status = integration.initialize().await;
        assert!(!status.connected);
        assert_eq!(status.port, 5100);
    }

    #[tokio::test]
    async fn test_status_and_disconnect_pass_through() {
        let integration = AnalyzerIntegration::new(
            ScriptedTransport::replying(CBC001_REPLY),
            Arc::new(InMemoryLabRequestStore::new()),
        );
        assert!(integration.initialize().await.connected);
        assert!(integration.connection_status().connected);

        integration.disconnect().await;
        integration.disconnect().await;
        assert!(!integration.connection_status().connected);
    }

    #[test]
    fn test_persistence_outcome_json() {
        let json = serde_json::to_value(PersistenceOutcome::Failed("x".into())).unwrap();
        assert_eq!(json, serde_json::json!({"state": "failed", "reason": "x"}));
        let json = serde_json::to_value(PersistenceOutcome::Saved).unwrap();
        assert_eq!(json, serde_json::json!({"state": "saved"}));
    }
}
