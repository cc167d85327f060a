//! MLLP socket strategy
//!
//! Used both for the local relay process and for a direct analyzer socket.
//! The connection is opened once and held between exchanges. A held
//! connection is checked before reuse: if the peer closed it, sent bytes
//! nobody asked for, or an earlier exchange was abandoned mid-flight, it is
//! dropped and a fresh one is opened, so a late reply is never read as the
//! answer to the next query.

use crate::error::{AnalyzerError, Result};
use crate::io::config::TransportMode;
use crate::io::strategy::ExchangeStrategy;
use crate::protocol::frame::{self, MAX_FRAME_SIZE};
use crate::protocol::{QueryMessage, RawReply, ReplyPayload};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

/// MLLP-over-TCP exchange strategy
pub struct SocketStrategy {
    mode: TransportMode,
    addr: String,
    timeout: Duration,
    stream: Option<TcpStream>,
    /// Set while a query is written but its reply not yet read
    in_flight: bool,
}

impl SocketStrategy {
    /// Strategy talking to the local relay process
    pub fn relay(addr: impl Into<String>, timeout: Duration) -> Self {
        Self::with_mode(TransportMode::RelaySocket, addr, timeout)
    }

    /// Strategy talking to the analyzer's own socket
    pub fn direct(addr: impl Into<String>, timeout: Duration) -> Self {
        Self::with_mode(TransportMode::DirectSocket, addr, timeout)
    }

    fn with_mode(mode: TransportMode, addr: impl Into<String>, timeout: Duration) -> Self {
        SocketStrategy {
            mode,
            addr: addr.into(),
            timeout,
            stream: None,
            in_flight: false,
        }
    }

    /// Remote address this strategy connects to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether a connection is currently held
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Drop the held connection if it can no longer be trusted
    async fn discard_if_stale(&mut self) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        let Some(reason) = stale_reason(stream, self.in_flight) else {
            return;
        };

        debug!(addr = %self.addr, mode = %self.mode, reason, "Dropping stale analyzer socket");
        self.release().await;
    }
}

/// Why a held connection must not be reused, if it must not
///
/// Nothing is owed to us between exchanges, so any readable byte or EOF
/// means the connection is out of step with the query/reply cycle.
fn stale_reason(stream: &TcpStream, in_flight: bool) -> Option<&'static str> {
    if in_flight {
        return Some("previous exchange was abandoned");
    }

    let mut buf = [0u8; 1];
    match stream.try_read(&mut buf) {
        Ok(0) => Some("peer closed the connection"),
        Ok(_) => Some("unsolicited bytes pending"),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => None,
        Err(_) => Some("socket error"),
    }
}

#[async_trait]
impl ExchangeStrategy for SocketStrategy {
    fn mode(&self) -> TransportMode {
        self.mode
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn open(&mut self) -> Result<()> {
        self.discard_if_stale().await;
        if self.stream.is_some() {
            return Ok(());
        }

        info!(addr = %self.addr, mode = %self.mode, "Connecting to analyzer socket");
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        info!(
            local_addr = %stream.local_addr()?,
            remote_addr = %self.addr,
            mode = %self.mode,
            "Connected to analyzer socket"
        );
        self.stream = Some(stream);
        Ok(())
    }

    async fn exchange(&mut self, query: &QueryMessage, frame: &[u8]) -> Result<ReplyPayload> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            AnalyzerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "socket strategy used before open",
            ))
        })?;

        debug!(
            sample_id = %query.sample_id,
            mode = %self.mode,
            size = frame.len(),
            "Sending query"
        );
        self.in_flight = true;
        stream.write_all(frame).await?;
        stream.flush().await?;

        let payload = read_frame(stream, MAX_FRAME_SIZE).await?;
        self.in_flight = false;
        debug!(
            sample_id = %query.sample_id,
            mode = %self.mode,
            size = payload.len(),
            "Received reply frame"
        );

        Ok(ReplyPayload::Wire(RawReply::new(payload)))
    }

    async fn probe(&mut self) -> Result<()> {
        self.open().await
    }

    async fn release(&mut self) {
        self.in_flight = false;
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(addr = %self.addr, mode = %self.mode, "Released analyzer socket");
        }
    }
}

/// Read exactly one MLLP frame
///
/// Bytes following the frame trailer are discarded; the protocol allows one
/// reply per query.
///
/// # Errors
///
/// - [`AnalyzerError::Io`] - Peer closed the connection before the trailer
/// - [`AnalyzerError::FrameTooLarge`] - More than `max` bytes without a trailer
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max: usize) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(1024);

    loop {
        if let Some(end) = frame::frame_end(&buf) {
            if end < buf.len() {
                trace!(discarded = buf.len() - end, "Discarding bytes after reply frame");
            }
            buf.truncate(end);
            return Ok(buf.freeze());
        }

        if buf.len() > max {
            return Err(AnalyzerError::FrameTooLarge {
                size: buf.len(),
                max,
            });
        }

        let n = reader.read_buf(&mut buf).await?;
        trace!(bytes_read = n, buffered = buf.len(), "Read from analyzer socket");
        if n == 0 {
            return Err(AnalyzerError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before end of frame",
            )));
        }
    }
}
