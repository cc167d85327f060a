//! Network I/O for talking to the BC-10
//!
//! Provides the transport client, its exchange strategies (relay socket,
//! direct socket, HTTP), and endpoint configuration.

pub mod config;
pub mod http_poll;
pub mod socket;
pub mod strategy;
pub mod transport;

pub use config::{AnalyzerEndpoint, TransportConfig, TransportMode};
pub use http_poll::HttpPollStrategy;
pub use socket::SocketStrategy;
pub use strategy::ExchangeStrategy;
pub use transport::{
    AnalyzerTransport, ClientState, ConnectionStatus, TransportClient, TransportEvent,
};
