//! One logical TCP stream tunnelled through the relay.
//!
//! A session owns two tasks: an event loop draining its bounded inbound
//! queue, and a read loop on the origin socket emitting sequence-numbered
//! chunks. A session holds at most one live origin connection; switching
//! address closes the previous socket before the next dial. Exactly one
//! terminal `TcpConnection{Closed}` is emitted per closed transition,
//! whichever side observes it first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use spac_core::defaults;
use spac_core::event::{ConnStatus, Event, HttpRequestEvent, SessionEvent};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Synthetic reply for a successful CONNECT dial.
pub const RESP_ESTABLISHED: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";
/// Synthetic reply when the origin dial failed.
pub const RESP_UNAVAILABLE: &[u8] = b"HTTP/1.1 503 ServiceUnavailable\r\n\r\n";

/// Table-side handle to a running session.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    inbound: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Idempotent close: cancels both session tasks.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Queue an inbound event; false once the session task is gone. The
    /// queue is bounded, so a flooding sender blocks here instead of
    /// ballooning memory.
    pub async fn deliver(&self, ev: Event) -> bool {
        self.inbound.send(ev).await.is_ok()
    }
}

/// Spawn the event-loop task for a new session.
pub(crate) fn spawn_session(
    id: u32,
    user: String,
    outbound: mpsc::Sender<SessionEvent>,
) -> SessionHandle {
    let (inbound_tx, inbound_rx) = mpsc::channel(defaults::DEFAULT_SESSION_QUEUE);
    let cancel = CancellationToken::new();
    let task = SessionTask {
        id,
        user,
        outbound,
        addr: String::new(),
        conn: None,
        terminal: Arc::new(AtomicBool::new(false)),
    };
    tokio::spawn(task.run(inbound_rx, cancel.clone()));
    SessionHandle { inbound: inbound_tx, cancel }
}

/// Write side of the live origin connection.
struct ConnHandle {
    writer: OwnedWriteHalf,
    read_cancel: CancellationToken,
}

struct SessionTask {
    id: u32,
    user: String,
    outbound: mpsc::Sender<SessionEvent>,
    /// Current (or last) origin address.
    addr: String,
    conn: Option<ConnHandle>,
    /// Set once the terminal close event has been emitted.
    terminal: Arc<AtomicBool>,
}

impl SessionTask {
    async fn run(mut self, mut inbound: mpsc::Receiver<Event>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ev = inbound.recv() => match ev {
                    None => break,
                    Some(ev) => {
                        if !self.handle(ev).await {
                            break;
                        }
                    }
                }
            }
        }
        debug!(session = self.id, user = %self.user, "session closed");
        self.close_conn_silently();
    }

    /// Returns false when the session must be destroyed.
    async fn handle(&mut self, ev: Event) -> bool {
        match ev {
            Event::HttpRequest(req) => self.handle_request(req).await,
            Event::TcpChunk { content, .. } => self.handle_chunk(content).await,
            // Login and connection-control events are consumed by the
            // multiplexer before they reach a session.
            other => {
                debug!(session = self.id, event = ?other, "ignoring control event");
                true
            }
        }
    }

    async fn handle_request(&mut self, req: HttpRequestEvent) -> bool {
        let connect = req.method.eq_ignore_ascii_case("CONNECT");
        let host = req.header("Host").unwrap_or_default();
        let addr = dial_addr(host, connect);

        if let Err(e) = self.ensure_conn(&addr).await {
            debug!(session = self.id, addr = %addr, error = %e, "origin dial failed");
            self.send_chunk(Bytes::from_static(RESP_UNAVAILABLE)).await;
            self.emit_closed().await;
            return false;
        }

        if connect {
            self.send_chunk(Bytes::from_static(RESP_ESTABLISHED)).await;
            return true;
        }

        let mut wire = Vec::new();
        req.write_to(&mut wire);
        self.write_origin(&wire).await
    }

    async fn handle_chunk(&mut self, content: Bytes) -> bool {
        if self.conn.is_none() {
            debug!(session = self.id, "chunk for a session with no origin connection");
            self.emit_closed().await;
            return false;
        }
        self.write_origin(&content).await
    }

    /// Write to the origin socket, destroying the session on failure.
    async fn write_origin(&mut self, data: &[u8]) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            self.emit_closed().await;
            return false;
        };
        if let Err(e) = conn.writer.write_all(data).await {
            warn!(session = self.id, addr = %self.addr, error = %e, "origin write failed");
            self.close_conn_silently();
            self.emit_closed().await;
            return false;
        }
        true
    }

    /// Ensure a live connection to `addr`, reconnecting when the address
    /// changed. The old socket is fully released before the new dial.
    async fn ensure_conn(&mut self, addr: &str) -> std::io::Result<()> {
        if self.conn.is_some() {
            if self.addr == addr {
                return Ok(());
            }
            self.close_conn_silently();
        }

        self.addr = addr.to_string();
        debug!(session = self.id, addr = %addr, "connecting to origin");
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();

        let read_cancel = CancellationToken::new();
        self.terminal.store(false, Ordering::SeqCst);
        tokio::spawn(read_loop(
            read_half,
            self.id,
            self.addr.clone(),
            self.outbound.clone(),
            read_cancel.clone(),
            Arc::clone(&self.terminal),
        ));
        self.conn = Some(ConnHandle { writer, read_cancel });
        Ok(())
    }

    /// Drop the origin connection without emitting a terminal event.
    fn close_conn_silently(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.read_cancel.cancel();
        }
    }

    async fn send_chunk(&self, content: Bytes) {
        let ev = SessionEvent {
            session: self.id,
            event: Event::TcpChunk { content, sequence: 0 },
        };
        let _ = self.outbound.send(ev).await;
    }

    /// Emit the terminal close event, at most once per closed transition.
    async fn emit_closed(&self) {
        if !self.terminal.swap(true, Ordering::SeqCst) {
            let ev = SessionEvent {
                session: self.id,
                event: Event::TcpConnection {
                    status: ConnStatus::Closed,
                    addr: self.addr.clone(),
                },
            };
            let _ = self.outbound.send(ev).await;
        }
    }
}

/// Default the port by method when the `Host` header has none.
fn dial_addr(host: &str, connect: bool) -> String {
    if host.contains(':') {
        host.to_string()
    } else if connect {
        format!("{host}:443")
    } else {
        format!("{host}:80")
    }
}

/// Pump origin bytes into the user's outbound channel.
///
/// Every non-empty read becomes a `TcpChunk` with a strictly increasing
/// sequence number from 0, so the far side can restore ordering across HTTP
/// batches. EOF and read errors emit the terminal close event; a deliberate
/// cancel (reconnect or session close) exits silently.
async fn read_loop(
    mut reader: OwnedReadHalf,
    session: u32,
    addr: String,
    outbound: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    terminal: Arc<AtomicBool>,
) {
    let mut sequence: u32 = 0;
    let mut buf = vec![0u8; defaults::DEFAULT_READ_CHUNK];
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            res = reader.read(&mut buf) => match res {
                Ok(0) => break,
                Ok(n) => {
                    let ev = SessionEvent {
                        session,
                        event: Event::TcpChunk {
                            content: Bytes::copy_from_slice(&buf[..n]),
                            sequence,
                        },
                    };
                    sequence += 1;
                    if outbound.send(ev).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(session, addr = %addr, error = %e, "origin read failed");
                    break;
                }
            }
        }
    }
    if !terminal.swap(true, Ordering::SeqCst) {
        let ev = SessionEvent {
            session,
            event: Event::TcpConnection { status: ConnStatus::Closed, addr },
        };
        let _ = outbound.send(ev).await;
    }
}
