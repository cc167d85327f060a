//! Analyzer endpoint and transport configuration

use crate::error::{AnalyzerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// LIS port the BC-10 listens on out of the box
pub const DEFAULT_ANALYZER_PORT: u16 = 5100;

/// Local relay address; the relay bridges to the analyzer separately
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:8765";

/// How long the socket strategies wait for a reply
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the HTTP strategy waits for a reply
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(8);

/// How long a connectivity probe may take per strategy
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// How a client reaches the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Raw MLLP socket straight to the analyzer
    DirectSocket,
    /// MLLP socket to the local relay process
    RelaySocket,
    /// JSON request/reply against the analyzer's HTTP endpoint
    HttpPoll,
}

impl TransportMode {
    /// Stable name used in logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            TransportMode::DirectSocket => "direct-socket",
            TransportMode::RelaySocket => "relay-socket",
            TransportMode::HttpPoll => "http-poll",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address of one analyzer
///
/// Immutable per client; point a client elsewhere by constructing a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerEndpoint {
    host: String,
    port: u16,
    transport_mode: TransportMode,
}

impl AnalyzerEndpoint {
    /// Create an endpoint
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Config`] - Empty host or port 0
    ///
    /// # Examples
    ///
    /// ```
    /// use bc10_analyzer::io::{AnalyzerEndpoint, TransportMode};
    ///
    /// let endpoint = AnalyzerEndpoint::new("192.168.1.50", 5100, TransportMode::RelaySocket)?;
    /// assert_eq!(endpoint.address(), "192.168.1.50:5100");
    ///
    /// assert!(AnalyzerEndpoint::new("", 5100, TransportMode::HttpPoll).is_err());
    /// # Ok::<(), bc10_analyzer::AnalyzerError>(())
    /// ```
    pub fn new(host: impl Into<String>, port: u16, transport_mode: TransportMode) -> Result<Self> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(AnalyzerError::Config("analyzer host must not be empty".to_string()));
        }
        if host.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(AnalyzerError::Config(format!("invalid analyzer host {:?}", host)));
        }
        if port == 0 {
            return Err(AnalyzerError::Config("analyzer port must not be 0".to_string()));
        }
        Ok(AnalyzerEndpoint {
            host,
            port,
            transport_mode,
        })
    }

    /// BC-10 on its default LIS port, reached through the local relay
    pub fn bc10(host: impl Into<String>) -> Result<Self> {
        Self::new(host, DEFAULT_ANALYZER_PORT, TransportMode::RelaySocket)
    }

    /// Analyzer host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Analyzer port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Preferred transport
    pub fn transport_mode(&self) -> TransportMode {
        self.transport_mode
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL of the analyzer's HTTP endpoint
    pub fn http_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Transport tuning
///
/// # Examples
///
/// ```
/// use bc10_analyzer::io::TransportConfig;
/// use std::time::Duration;
///
/// let config = TransportConfig::default()
///     .with_relay_addr("127.0.0.1:9000")
///     .with_timeouts(Duration::from_secs(5), Duration::from_secs(4));
/// assert_eq!(config.relay_addr, "127.0.0.1:9000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Address of the local relay process
    pub relay_addr: String,
    /// Reply deadline for socket strategies
    pub relay_timeout: Duration,
    /// Reply deadline for the HTTP strategy
    pub http_timeout: Duration,
    /// Deadline per strategy for connectivity probes
    pub probe_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl TransportConfig {
    /// Defaults overridden by `BC10_RELAY_ADDR`, `BC10_RELAY_TIMEOUT_MS`
    /// and `BC10_HTTP_TIMEOUT_MS`
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Config`] - A timeout variable is not a number
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("BC10_RELAY_ADDR").filter(|a| !a.trim().is_empty()) {
            config.relay_addr = addr.trim().to_string();
        }
        if let Some(ms) = lookup("BC10_RELAY_TIMEOUT_MS") {
            config.relay_timeout = parse_millis("BC10_RELAY_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("BC10_HTTP_TIMEOUT_MS") {
            config.http_timeout = parse_millis("BC10_HTTP_TIMEOUT_MS", &ms)?;
        }

        Ok(config)
    }

    /// Use a different relay address
    pub fn with_relay_addr(mut self, addr: impl Into<String>) -> Self {
        self.relay_addr = addr.into();
        self
    }

    /// Override both reply deadlines
    pub fn with_timeouts(mut self, relay: Duration, http: Duration) -> Self {
        self.relay_timeout = relay;
        self.http_timeout = http;
        self
    }

    /// Override the probe deadline
    pub fn with_probe_timeout(mut self, probe: Duration) -> Self {
        self.probe_timeout = probe;
        self
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(AnalyzerError::Config(format!(
            "{} must be a positive number of milliseconds, got {:?}",
            key, raw
        ))),
    }
}
