//! TCP connection multiplexer (C2).
//!
//! One reader task and one writer task per accepted connection. The reader
//! grows a buffer until `nexo_protocol::decode_frame` can carve a complete
//! frame out of it, then spawns the request as its own task so replies on
//! one connection may complete out of order (spec §5(i)); the writer
//! drains the connection's [`OutboundQueue`] and is the only task that
//! touches the socket's write half.

use std::sync::Arc;

use nexo_protocol::{decode_frame, encode_response, opcodes::status, DecodeOutcome, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::dispatch::{self, Brokers};
use crate::outbound::OutboundQueue;
use crate::registry::ConnectionRegistry;

/// Accepts connections until `shutdown` fires, spawning a
/// [`handle_connection`] task for each.
pub async fn accept_loop(
    listener: TcpListener,
    brokers: Arc<Brokers>,
    registry: Arc<ConnectionRegistry>,
    max_payload_len: u32,
    writer_queue_capacity: usize,
    shutdown: broadcast::Sender<()>,
) {
    loop {
        let mut shutdown_rx = shutdown.subscribe();
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        tracing::debug!(%addr, "accepted connection");
                        let brokers = brokers.clone();
                        let registry = registry.clone();
                        let shutdown_rx = shutdown.subscribe();
                        tokio::spawn(async move {
                            handle_connection(socket, brokers, registry, max_payload_len, writer_queue_capacity, shutdown_rx).await;
                        });
                    }
                    Err(err) => tracing::warn!(%err, "accept failed"),
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("tcp accept loop shutting down");
                break;
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    brokers: Arc<Brokers>,
    registry: Arc<ConnectionRegistry>,
    max_payload_len: u32,
    writer_queue_capacity: usize,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (mut read_half, mut write_half) = socket.into_split();
    let outbound = Arc::new(OutboundQueue::new(writer_queue_capacity));
    let conn_id = registry.register(outbound.clone()).await;

    let writer = tokio::spawn({
        let outbound = outbound.clone();
        async move {
            while let Some(frame) = outbound.recv().await {
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        }
    });

    let mut buf = Vec::with_capacity(4096);
    let mut read_buf = [0u8; 4096];
    'reader: loop {
        tokio::select! {
            read = read_half.read(&mut read_buf) => {
                match read {
                    Ok(0) => break 'reader,
                    Ok(n) => buf.extend_from_slice(&read_buf[..n]),
                    Err(err) => {
                        tracing::debug!(conn_id, %err, "read error");
                        break 'reader;
                    }
                }
            }
            _ = shutdown.recv() => {
                break 'reader;
            }
        }

        loop {
            match decode_frame(&buf, max_payload_len) {
                DecodeOutcome::Decoded(frame, consumed) => {
                    buf.drain(..consumed);
                    if let Frame::Request { id, opcode, payload } = frame {
                        let brokers = brokers.clone();
                        let registry = registry.clone();
                        let outbound = outbound.clone();
                        tokio::spawn(async move {
                            let (status, body) = dispatch::dispatch(&brokers, &registry, conn_id, opcode, &payload).await;
                            outbound.send(encode_response(id, status, &body)).await;
                        });
                    }
                }
                DecodeOutcome::NeedMore => break,
                DecodeOutcome::Error(e) => {
                    tracing::debug!(conn_id, %e, "malformed frame, closing connection");
                    let mut w = nexo_protocol::PayloadWriter::new();
                    w.write_string(&e.to_string());
                    outbound.send(encode_response(0, status::ERR, &w.into_bytes())).await;
                    buf.clear();
                    break 'reader;
                }
            }
        }
    }

    dispatch::on_disconnect(&brokers, conn_id).await;
    registry.deregister(conn_id).await;
    let _ = writer.await;
}
