//! Mindray BC-10 hematology analyzer link for an HMIS
//!
//! This library queries a BC-10 analyzer for complete blood count (CBC)
//! results, normalizes the instrument's parameter codes, and writes the
//! values back to the lab request that ordered them.
//!
//! # Features
//!
//! - **Bit-exact wire codec** - MLLP framed, segment-delimited query and reply messages
//! - **Ordered transport strategies** - Relay socket first, HTTP poll second, each with its own deadline
//! - **One exchange at a time** - Concurrent requests on a client are rejected, never interleaved
//! - **Fixed parameter vocabulary** - Instrument codes map to canonical names; unknown codes are dropped
//! - **Explicit diagnostics** - Simulated panels only through a dedicated entry point, marked as such
//!
//! # Quick Start
//!
//! ```no_run
//! use bc10_analyzer::integration::{AnalyzerIntegration, InMemoryLabRequestStore, LabRequestId};
//! use bc10_analyzer::io::{AnalyzerEndpoint, TransportConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> bc10_analyzer::Result<()> {
//! let integration = AnalyzerIntegration::connect_to(
//!     AnalyzerEndpoint::bc10("192.168.1.50")?,
//!     TransportConfig::default(),
//!     Arc::new(InMemoryLabRequestStore::new()),
//! )?;
//!
//! let status = integration.initialize().await;
//! println!("analyzer connected: {}", status.connected);
//!
//! match integration.request_cbc_result("CBC001", Some(&LabRequestId::from("LR-17"))).await? {
//!     Some(outcome) => {
//!         for c in &outcome.result.components {
//!             println!("{} = {} {} ({})", c.canonical_name, c.value, c.unit, c.flag);
//!         }
//!     }
//!     None => println!("no CBC result for this sample"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ## Module Structure
//!
//! - **`protocol`** - Pure codec, no I/O
//!   - `frame` - MLLP start/end block framing
//!   - `segment` - Segment and field splitting
//!   - `query` / `reply` - Query encoding and reply decoding
//!   - `result` - `AnalyzerResult` and its components
//!
//! - **`mapping`** - Parameter table, aliases, reference ranges and flags
//!
//! - **`io`** - Network I/O layer
//!   - `TransportClient` - State machine over ordered exchange strategies
//!   - `SocketStrategy` / `HttpPollStrategy` - Relay socket and HTTP endpoint
//!   - `AnalyzerEndpoint` / `TransportConfig` - Addresses and deadlines
//!
//! - **`integration`** - `AnalyzerIntegration` orchestrator and the
//!   lab-request store boundary
//!
//! - **`diagnostics`** - Deterministic simulated CBC panels
//!
//! - **`error`** - Error handling
//!   - `AnalyzerError` - Unified error type for all operations
//!   - `Result<T>` - Type alias for `Result<T, AnalyzerError>`
//!
//! ## Error Policy
//!
//! 1. **Validation** and **transport** failures are returned to the caller
//! 2. Undecodable or non-matching replies are `Ok(None)`, not errors
//! 3. Write-back failures are reported next to the result, never instead of it
//! 4. Nothing retries automatically; a retry is a new call
//!
//! # Logging
//!
//! The library emits [`tracing`] events and never installs a subscriber.
//! The `bc10-query` binary installs `tracing-subscriber` with `RUST_LOG`
//! filtering.

pub mod diagnostics;
pub mod error;
pub mod integration;
pub mod io;
pub mod mapping;
pub mod protocol;

pub use error::{AnalyzerError, Result};
