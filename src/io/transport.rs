//! Analyzer transport client
//!
//! Owns the lifecycle of one logical exchange with the analyzer:
//!
//! ```text
//! Idle -> Connecting -> Connected -> AwaitingReply -> Idle
//! ```
//!
//! Any failure returns the client to `Idle`. A client runs at most one
//! exchange at a time; a second request while one is in flight is rejected
//! with [`AnalyzerError::Busy`] because the instrument protocol has no way
//! to correlate concurrent replies.
//!
//! # Example
//!
//! ```no_run
//! use bc10_analyzer::io::{AnalyzerEndpoint, TransportClient, TransportConfig};
//! use bc10_analyzer::protocol::QueryMessage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = AnalyzerEndpoint::bc10("192.168.1.50")?;
//!     let client = TransportClient::new(endpoint, TransportConfig::default())?;
//!
//!     let reply = client.request(&QueryMessage::new("CBC001")?).await?;
//!     println!("{:?}", reply.decode()?);
//!     Ok(())
//! }
//! ```

use crate::error::{AnalyzerError, Result, StrategyAttempt, TransportFailure};
use crate::io::config::{AnalyzerEndpoint, TransportConfig, TransportMode, DEFAULT_PROBE_TIMEOUT};
use crate::io::http_poll::HttpPollStrategy;
use crate::io::socket::SocketStrategy;
use crate::io::strategy::ExchangeStrategy;
use crate::protocol::{QueryMessage, ReplyPayload};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Capacity of the transport event channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Exchange state of a transport client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ClientState {
    /// No exchange in progress
    Idle = 0,
    /// Establishing a connection for the current strategy
    Connecting = 1,
    /// Connection established, query not yet sent
    Connected = 2,
    /// Query sent, waiting for the single reply
    AwaitingReply = 3,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ClientState::Connecting,
            2 => ClientState::Connected,
            3 => ClientState::AwaitingReply,
            _ => ClientState::Idle,
        }
    }
}

/// Last observed connectivity
///
/// Not a promise about the next exchange; requests re-verify connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Whether the last probe reached the analyzer
    pub connected: bool,
    /// Analyzer host
    pub host: String,
    /// Analyzer port
    pub port: u16,
}

/// Notification published by a transport client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connectivity probe succeeded
    Connected {
        /// Strategy that reached the analyzer
        via: TransportMode,
    },
    /// The client released its connections
    Disconnected,
    /// A reply arrived for a query
    ReplyReceived {
        /// Queried sample
        sample_id: String,
        /// Strategy that produced the reply
        via: TransportMode,
    },
    /// A strategy failed and the client moved on
    StrategyFailed {
        /// Strategy that failed
        strategy: TransportMode,
        /// Failure description
        reason: String,
    },
}

/// The seam the integration layer drives
///
/// [`TransportClient`] is the production implementation; tests substitute
/// their own.
#[async_trait]
pub trait AnalyzerTransport: Send + Sync {
    /// Probe connectivity and record the outcome
    async fn connect(&self) -> Result<ConnectionStatus>;

    /// Send one query and wait for its reply
    async fn request(&self, query: &QueryMessage) -> Result<ReplyPayload>;

    /// Last observed connectivity, without network traffic
    fn connection_status(&self) -> ConnectionStatus;

    /// Release held connections; idempotent
    async fn disconnect(&self);
}

/// Resets the client state to `Idle` when an exchange ends, however it ends
struct IdleGuard<'a>(&'a AtomicU8);

impl Drop for IdleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(ClientState::Idle as u8, Ordering::SeqCst);
    }
}

/// Transport client for one analyzer
pub struct TransportClient {
    endpoint: AnalyzerEndpoint,
    strategies: Mutex<Vec<Box<dyn ExchangeStrategy>>>,
    probe_timeout: Duration,
    state: AtomicU8,
    connected: AtomicBool,
    events: broadcast::Sender<TransportEvent>,
}

impl TransportClient {
    /// Create a client with the strategies implied by the endpoint's mode
    ///
    /// - `RelaySocket`: relay socket, then HTTP
    /// - `DirectSocket`: analyzer socket, then HTTP
    /// - `HttpPoll`: HTTP only
    ///
    /// No connection is opened until [`connect`](Self::connect) or
    /// [`request`](Self::request).
    pub fn new(endpoint: AnalyzerEndpoint, config: TransportConfig) -> Result<Self> {
        let http: Box<dyn ExchangeStrategy> = Box::new(HttpPollStrategy::new(
            &endpoint.http_base_url(),
            config.http_timeout,
        )?);

        let strategies = match endpoint.transport_mode() {
            TransportMode::RelaySocket => vec![
                Box::new(SocketStrategy::relay(&config.relay_addr, config.relay_timeout))
                    as Box<dyn ExchangeStrategy>,
                http,
            ],
            TransportMode::DirectSocket => vec![
                Box::new(SocketStrategy::direct(endpoint.address(), config.relay_timeout))
                    as Box<dyn ExchangeStrategy>,
                http,
            ],
            TransportMode::HttpPoll => vec![http],
        };

        Ok(Self::with_strategies(endpoint, strategies).with_probe_timeout(config.probe_timeout))
    }

    /// Create a client with an explicit strategy list, tried in order
    pub fn with_strategies(
        endpoint: AnalyzerEndpoint,
        strategies: Vec<Box<dyn ExchangeStrategy>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        TransportClient {
            endpoint,
            strategies: Mutex::new(strategies),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            state: AtomicU8::new(ClientState::Idle as u8),
            connected: AtomicBool::new(false),
            events,
        }
    }

    /// Cap each strategy's connectivity probe at `timeout`
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Analyzer this client talks to
    pub fn endpoint(&self) -> &AnalyzerEndpoint {
        &self.endpoint
    }

    /// Current exchange state
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Subscribe to transport events
    ///
    /// Slow subscribers miss old events rather than stalling the exchange.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn publish(&self, event: TransportEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Probe each strategy in order until one reaches the analyzer
    ///
    /// This and [`disconnect`](Self::disconnect) are the only operations
    /// that change the reported `connected` flag.
    ///
    /// Waits for an in-flight exchange to finish before probing.
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Transport`] - No strategy reached the analyzer
    pub async fn connect(&self) -> Result<ConnectionStatus> {
        let mut strategies = self.strategies.lock().await;
        let _idle = IdleGuard(&self.state);
        let mut attempts = Vec::new();

        for strategy in strategies.iter_mut() {
            let mode = strategy.mode();
            let budget = strategy.timeout().min(self.probe_timeout);
            self.set_state(ClientState::Connecting);

            let outcome = tokio::time::timeout(budget, strategy.probe()).await;
            let reason = match outcome {
                Ok(Ok(())) => {
                    self.connected.store(true, Ordering::SeqCst);
                    info!(
                        host = %self.endpoint.host(),
                        port = self.endpoint.port(),
                        via = %mode,
                        "Analyzer reachable"
                    );
                    self.publish(TransportEvent::Connected { via: mode });
                    return Ok(self.connection_status());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no answer within {} ms", budget.as_millis()),
            };

            strategy.release().await;
            debug!(via = %mode, reason = %reason, "Connectivity probe failed");
            attempts.push(StrategyAttempt {
                strategy: mode.name().to_string(),
                reason,
            });
        }

        self.connected.store(false, Ordering::SeqCst);
        Err(AnalyzerError::Transport(TransportFailure { attempts }))
    }

    /// Send one query and wait for its reply, falling through strategies
    ///
    /// Each strategy gets its own deadline covering connect, send and
    /// receive. A failed strategy is never retried within the same call.
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Busy`] - Another exchange is in flight on this client
    /// - [`AnalyzerError::Transport`] - Every strategy failed
    pub async fn request(&self, query: &QueryMessage) -> Result<ReplyPayload> {
        let mut strategies = self.strategies.try_lock().map_err(|_| AnalyzerError::Busy)?;
        let _idle = IdleGuard(&self.state);
        let frame = query.encode();
        let mut attempts = Vec::new();

        for strategy in strategies.iter_mut() {
            let mode = strategy.mode();
            let budget = strategy.timeout();

            let attempt = async {
                self.set_state(ClientState::Connecting);
                strategy.open().await?;
                self.set_state(ClientState::Connected);
                self.set_state(ClientState::AwaitingReply);
                strategy.exchange(query, &frame).await
            };

            let reason = match tokio::time::timeout(budget, attempt).await {
                Ok(Ok(reply)) => {
                    info!(sample_id = %query.sample_id, via = %mode, "Analyzer replied");
                    self.publish(TransportEvent::ReplyReceived {
                        sample_id: query.sample_id.clone(),
                        via: mode,
                    });
                    return Ok(reply);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no reply within {} ms", budget.as_millis()),
            };

            strategy.release().await;
            self.set_state(ClientState::Idle);
            warn!(
                sample_id = %query.sample_id,
                strategy = %mode,
                reason = %reason,
                "Transport strategy failed"
            );
            self.publish(TransportEvent::StrategyFailed {
                strategy: mode,
                reason: reason.clone(),
            });
            attempts.push(StrategyAttempt {
                strategy: mode.name().to_string(),
                reason,
            });
        }

        Err(AnalyzerError::Transport(TransportFailure { attempts }))
    }

    /// Last observed connectivity, without network traffic
    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.connected.load(Ordering::SeqCst),
            host: self.endpoint.host().to_string(),
            port: self.endpoint.port(),
        }
    }

    /// Release held connections and return to `Idle`
    ///
    /// Safe to call repeatedly and before any connection was made.
    pub async fn disconnect(&self) {
        let mut strategies = self.strategies.lock().await;
        for strategy in strategies.iter_mut() {
            strategy.release().await;
        }
        self.set_state(ClientState::Idle);
        if self.connected.swap(false, Ordering::SeqCst) {
            info!(host = %self.endpoint.host(), "Disconnected from analyzer");
        }
        self.publish(TransportEvent::Disconnected);
    }
}

#[async_trait]
impl AnalyzerTransport for TransportClient {
    async fn connect(&self) -> Result<ConnectionStatus> {
        TransportClient::connect(self).await
    }

    async fn request(&self, query: &QueryMessage) -> Result<ReplyPayload> {
        TransportClient::request(self, query).await
    }

    fn connection_status(&self) -> ConnectionStatus {
        TransportClient::connection_status(self)
    }

    async fn disconnect(&self) {
        TransportClient::disconnect(self).await
    }
}
