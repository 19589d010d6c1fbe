//! Shared integration-test harness for Nexo: a raw frame-level TCP client
//! that speaks the wire protocol directly, the way `rt-test-utils` gives
//! the forwarding suite a `MockWsClient` instead of every integration test
//! hand-rolling its own WebSocket handshake.
//!
//! This crate deliberately depends on nothing but `nexo-protocol` and
//! `tokio` -- it knows how to frame bytes on a socket, not how to start a
//! server. Tests bring their own server (typically `nexo_server::bootstrap::spawn`).

use std::collections::VecDeque;
use std::net::SocketAddr;

use nexo_protocol::{decode_frame, encode_request, DecodeOutcome, Frame, DEFAULT_MAX_PAYLOAD_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A raw connection to a Nexo broker, correlating requests to responses by
/// id and queuing any push frames that arrive out of band so a test can
/// drain them with [`NexoClient::next_push`].
pub struct NexoClient {
    stream: TcpStream,
    read_buf: Vec<u8>,
    next_id: u32,
    pending_pushes: VecDeque<(u8, Vec<u8>)>,
}

impl NexoClient {
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, read_buf: Vec::with_capacity(4096), next_id: 1, pending_pushes: VecDeque::new() })
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = if self.next_id == u32::MAX { 1 } else { self.next_id + 1 };
        id
    }

    /// Sends a request and waits for the response carrying the same id,
    /// queuing any push frames observed in the meantime.
    pub async fn request(&mut self, opcode: u8, payload: &[u8]) -> std::io::Result<(u8, Vec<u8>)> {
        let id = self.alloc_id();
        self.stream.write_all(&encode_request(id, opcode, payload)).await?;
        loop {
            match self.decode_next().await? {
                Frame::Response { id: rid, status, body } if rid == id => return Ok((status, body)),
                Frame::Response { .. } => {} // a stale/unmatched reply; spec says it's simply dropped
                Frame::Push { push_kind, body, .. } => self.pending_pushes.push_back((push_kind, body)),
                Frame::Request { .. } => {} // the server never sends these
            }
        }
    }

    /// Sends a request without waiting for its reply; the server's reply
    /// (if any) is left to accumulate in the socket buffer and discarded by
    /// whichever `decode_next` call gets to it next, matching the "server
    /// reply for fire-and-forget sends is discarded on arrival" contract.
    pub async fn send_fire_and_forget(&mut self, opcode: u8, payload: &[u8]) -> std::io::Result<()> {
        let id = self.alloc_id();
        self.stream.write_all(&encode_request(id, opcode, payload)).await
    }

    /// Returns the next push frame, either already queued from a prior
    /// `request` call or read fresh off the socket.
    pub async fn next_push(&mut self) -> std::io::Result<(u8, Vec<u8>)> {
        if let Some(push) = self.pending_pushes.pop_front() {
            return Ok(push);
        }
        loop {
            match self.decode_next().await? {
                Frame::Push { push_kind, body, .. } => return Ok((push_kind, body)),
                Frame::Response { .. } | Frame::Request { .. } => {}
            }
        }
    }

    async fn decode_next(&mut self) -> std::io::Result<Frame> {
        loop {
            match decode_frame(&self.read_buf, DEFAULT_MAX_PAYLOAD_LEN) {
                DecodeOutcome::Decoded(frame, consumed) => {
                    self.read_buf.drain(..consumed);
                    return Ok(frame);
                }
                DecodeOutcome::NeedMore => {
                    let mut chunk = [0u8; 4096];
                    let n = self.stream.read(&mut chunk).await?;
                    if n == 0 {
                        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed"));
                    }
                    self.read_buf.extend_from_slice(&chunk[..n]);
                }
                DecodeOutcome::Error(e) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
                }
            }
        }
    }

    /// Closes the write half, simulating an abrupt client disconnect so
    /// tests can exercise the server's `on_disconnect` fan-out.
    pub async fn disconnect(mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexo_protocol::opcodes::{status, OP_ECHO};
    use tokio::net::TcpListener;

    /// A minimal loopback echo server, just enough to exercise the client
    /// without depending on the full nexo-server crate (which depends on
    /// this crate for its own tests -- pulling it in here would cycle).
    async fn spawn_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            loop {
                match decode_frame(&buf, DEFAULT_MAX_PAYLOAD_LEN) {
                    DecodeOutcome::Decoded(Frame::Request { id, payload, .. }, consumed) => {
                        buf.drain(..consumed);
                        let reply = nexo_protocol::encode_response(id, status::DATA, &payload);
                        if socket.write_all(&reply).await.is_err() {
                            break;
                        }
                    }
                    DecodeOutcome::NeedMore => {
                        let mut chunk = [0u8; 4096];
                        let Ok(n) = socket.read(&mut chunk).await else { break };
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                    _ => break,
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn request_correlates_response_by_id() {
        let addr = spawn_echo_server().await;
        let mut client = NexoClient::connect(addr).await.unwrap();
        let (status, body) = client.request(OP_ECHO, b"ping").await.unwrap();
        assert_eq!(status, status::DATA);
        assert_eq!(body, b"ping");

        let (status, body) = client.request(OP_ECHO, b"pong").await.unwrap();
        assert_eq!(status, status::DATA);
        assert_eq!(body, b"pong");
    }
}
