//! Exchange strategy abstraction
//!
//! A strategy is one way of getting a query to the analyzer and one reply
//! back. The transport client tries its strategies in order and stops at the
//! first one that produces a reply.

use crate::error::Result;
use crate::io::config::TransportMode;
use crate::protocol::{QueryMessage, ReplyPayload};
use async_trait::async_trait;
use std::time::Duration;

/// One way of exchanging a query for a reply
///
/// Implementations own their connection handle. The transport client
/// serializes all calls, so implementations never see concurrent use.
#[async_trait]
pub trait ExchangeStrategy: Send {
    /// Which transport this strategy implements
    fn mode(&self) -> TransportMode;

    /// Deadline covering [`open`](Self::open) plus [`exchange`](Self::exchange)
    fn timeout(&self) -> Duration;

    /// Establish the connection if one is needed and not already held
    async fn open(&mut self) -> Result<()>;

    /// Send the framed query and wait for exactly one reply
    async fn exchange(&mut self, query: &QueryMessage, frame: &[u8]) -> Result<ReplyPayload>;

    /// Check that the far side is reachable without sending a query
    async fn probe(&mut self) -> Result<()>;

    /// Drop any held connection; must be safe to call when nothing is held
    async fn release(&mut self);
}
