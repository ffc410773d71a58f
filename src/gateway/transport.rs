//! Edge-bridge TCP transport
//!
//! Owns the single outbound TCP connection to the edge bridge. The command
//! pipeline worker is the only task that touches this type; exclusivity of
//! the byte stream is ownership, not locking.
//!
//! Reconnection policy lives in the pipeline; the transport only reports
//! that the link is down and opens a fresh socket when asked. Failure
//! classification on read/write:
//!
//! - peer closed / reset: socket is dropped, next `ensure_connected` reopens
//! - ACK deadline exceeded: socket is kept, surfaced as [`TransportError::Timeout`]
//! - other I/O: socket is dropped, next `ensure_connected` reopens

use super::frame::Frame;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to edge bridge")]
    NotConnected,

    #[error("connect to {addr} failed: {reason}")]
    ConnectFailed { addr: String, reason: String },

    #[error("deadline exceeded waiting for ACK")]
    Timeout,

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("I/O error: {0}")]
    Io(String),
}

/// Classify a socket error: connection-level failures force a reopen,
/// everything else is a plain I/O failure (which also forces a reopen, but
/// is reported distinctly).
fn classify(err: std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => TransportError::PeerClosed,
        _ => TransportError::Io(err.to_string()),
    }
}

/// Exclusive owner of the byte stream to the edge bridge.
pub struct Transport {
    host: String,
    port: u16,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl Transport {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout,
            stream: None,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open the socket if it is not already open.
    ///
    /// Disables send coalescing (the bridge parses frames by leading-byte
    /// grammar, so a delayed partial write would corrupt framing) and
    /// enables keepalive to detect a dead access point.
    pub async fn ensure_connected(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let addr = self.addr();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: "connect timeout".to_string(),
            })?
            .map_err(|e| TransportError::ConnectFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        stream.set_nodelay(true).map_err(classify)?;

        let sock_ref = socket2::SockRef::from(&stream);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(30))
            .with_interval(Duration::from_secs(10));
        let _ = sock_ref.set_tcp_keepalive(&keepalive);

        tracing::info!(address = %addr, "Connected to edge bridge");
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Write the entire frame in one call. A frame is never split across
    /// writes; with Nagle disabled it leaves the host as a single segment.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        match stream.write_all(frame.as_bytes()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close();
                Err(classify(e))
            }
        }
    }

    /// Read one byte with a deadline.
    ///
    /// Timeout keeps the socket open (the ACK may simply be late); a zero
    /// read means the peer closed and the socket is dropped.
    pub async fn read_byte(&mut self, deadline: Duration) -> Result<u8, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = [0u8; 1];

        match tokio::time::timeout(deadline, stream.read(&mut buf)).await {
            Err(_) => Err(TransportError::Timeout),
            Ok(Ok(0)) => {
                self.close();
                Err(TransportError::PeerClosed)
            }
            Ok(Ok(_)) => Ok(buf[0]),
            Ok(Err(e)) => {
                self.close();
                Err(classify(e))
            }
        }
    }

    /// Non-blocking read of any residual bytes (stale ACKs from an earlier
    /// exchange that timed out after the peer eventually answered).
    /// Returns the number of bytes discarded.
    pub fn drain(&mut self) -> usize {
        let Some(stream) = self.stream.as_mut() else {
            return 0;
        };

        let mut drained = 0usize;
        let mut buf = [0u8; 64];
        let mut dead = false;
        loop {
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    // Peer closed; drop the socket below.
                    dead = true;
                    break;
                }
                Ok(n) => {
                    drained += n;
                    tracing::debug!(bytes = n, data = ?&buf[..n], "Drained stale bytes");
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Error draining socket");
                    dead = true;
                    break;
                }
            }
        }
        if dead {
            self.close();
        }
        drained
    }

    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Edge bridge socket closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::frame::LampId;
    use tokio::net::TcpListener;

    async fn local_pair() -> (Transport, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = Transport::new("127.0.0.1", addr.port(), Duration::from_secs(1));
        transport.ensure_connected().await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        (transport, peer)
    }

    #[tokio::test]
    async fn connect_write_and_ack() {
        let (mut transport, mut peer) = local_pair().await;
        assert!(transport.is_connected());

        let frame = Frame::lamp(LampId::new(1).unwrap(), true, false);
        transport.write_frame(&frame).await.unwrap();

        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"Ab");

        peer.write_all(b"K").await.unwrap();
        let byte = transport.read_byte(Duration::from_millis(500)).await.unwrap();
        assert_eq!(byte, b'K');
    }

    #[tokio::test]
    async fn read_deadline_keeps_the_socket() {
        let (mut transport, _peer) = local_pair().await;

        let err = transport
            .read_byte(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn peer_close_drops_the_socket() {
        let (mut transport, peer) = local_pair().await;
        drop(peer);

        let err = transport
            .read_byte(Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::PeerClosed));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn drain_discards_stale_bytes() {
        let (mut transport, mut peer) = local_pair().await;

        peer.write_all(b"KKx").await.unwrap();
        // Give the bytes time to land in the receive buffer.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(transport.drain(), 3);
        assert_eq!(transport.drain(), 0);
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn ensure_connected_fails_without_listener() {
        // Port 1 is essentially never listening locally.
        let mut transport = Transport::new("127.0.0.1", 1, Duration::from_millis(300));
        let err = transport.ensure_connected().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectFailed { .. }));
        assert!(!transport.is_connected());
    }
}
