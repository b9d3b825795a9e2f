//! The session multiplexer behind `POST /invoke`.
//!
//! One HTTP batch carries framed events from many logical sessions of one
//! user. The inbound phase decodes and routes them; the outbound phase
//! drains that user's event channel into the response, bounded by a
//! 100 ms window and a 16 KiB budget, waiting on the channel and the
//! deadline simultaneously rather than polling a ticker.
//!
//! All session-table edits happen under one mutex; a session is never
//! visible after its close completes, and events for a stale id are
//! silently skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use spac_core::defaults;
use spac_core::event::{ConnStatus, Event, EventCodec, SessionEvent, Wrapping};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::{SessionHandle, spawn_session};

/// Demultiplexes event batches onto per-user session tables.
pub struct SessionMux {
    codec: Arc<dyn EventCodec>,
    users: Mutex<HashMap<String, UserEntry>>,
}

struct UserEntry {
    sessions: HashMap<u32, SessionHandle>,
    outbound_tx: mpsc::Sender<SessionEvent>,
    /// Taken by the active long-poll; concurrent polls from one user
    /// serialize here.
    outbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SessionEvent>>>,
}

impl UserEntry {
    fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(defaults::DEFAULT_SESSION_QUEUE);
        Self {
            sessions: HashMap::new(),
            outbound_tx,
            outbound_rx: Arc::new(tokio::sync::Mutex::new(outbound_rx)),
        }
    }
}

impl SessionMux {
    pub fn new(codec: Arc<dyn EventCodec>) -> Self {
        Self {
            codec,
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one `POST /invoke` batch: route the inbound events, then
    /// drain the user's outbound channel into the response body.
    pub async fn handle_invoke(&self, user: &str, body: Bytes) -> Bytes {
        self.ingest(user, body).await;
        self.drain(user).await
    }

    /// Number of live sessions for a user.
    pub fn session_count(&self, user: &str) -> usize {
        self.users.lock().get(user).map_or(0, |e| e.sessions.len())
    }

    async fn ingest(&self, user: &str, body: Bytes) {
        let mut buf = BytesMut::from(&body[..]);
        loop {
            match self.codec.decode(&mut buf) {
                Ok(None) => break,
                Ok(Some(sev)) => self.dispatch(user, sev).await,
                Err(e) => {
                    // Frames are independent: keep what already routed,
                    // drop the remainder of this batch.
                    warn!(user, error = %e, discarded = buf.len(), "event decode failed");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, user: &str, sev: SessionEvent) {
        match sev.event {
            Event::UserLogin { .. } => {
                debug!(user, "user login, dropping existing sessions");
                self.close_user(user);
            }
            Event::TcpConnection { status: ConnStatus::Closed, .. } => {
                self.remove_session(user, sev.session);
            }
            Event::TcpConnection { .. } => {}
            event => {
                let handle = self.session(user, sev.session);
                if !handle.deliver(event).await {
                    debug!(user, session = sev.session, "session task gone, dropping event");
                    self.remove_session(user, sev.session);
                }
            }
        }
    }

    /// Look up a session, creating it lazily on first sight of its id.
    fn session(&self, user: &str, id: u32) -> SessionHandle {
        let mut users = self.users.lock();
        let entry = users.entry(user.to_string()).or_insert_with(UserEntry::new);
        entry
            .sessions
            .entry(id)
            .or_insert_with(|| spawn_session(id, user.to_string(), entry.outbound_tx.clone()))
            .clone()
    }

    fn session_exists(&self, user: &str, id: u32) -> bool {
        self.users
            .lock()
            .get(user)
            .is_some_and(|e| e.sessions.contains_key(&id))
    }

    fn remove_session(&self, user: &str, id: u32) {
        let handle = {
            let mut users = self.users.lock();
            users.get_mut(user).and_then(|e| e.sessions.remove(&id))
        };
        if let Some(handle) = handle {
            debug!(user, session = id, "session removed");
            handle.close();
        }
    }

    /// Close every session of a user and drop the outbound channel.
    fn close_user(&self, user: &str) {
        let entry = self.users.lock().remove(user);
        if let Some(entry) = entry {
            debug!(user, sessions = entry.sessions.len(), "closing all user sessions");
            for handle in entry.sessions.values() {
                handle.close();
            }
            // Dropping the entry releases the table's sender; the channel
            // closes once the cancelled session tasks exit.
        }
    }

    /// Long-poll drain: stop at the deadline or once the buffer is full.
    async fn drain(&self, user: &str) -> Bytes {
        let rx = {
            let mut users = self.users.lock();
            let entry = users.entry(user.to_string()).or_insert_with(UserEntry::new);
            Arc::clone(&entry.outbound_rx)
        };
        let mut rx = rx.lock().await;

        let mut out = BytesMut::new();
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(defaults::DEFAULT_POLL_WINDOW_MS);
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => break,
                ev = rx.recv() => {
                    let Some(sev) = ev else { break };
                    let keep = match &sev.event {
                        Event::TcpConnection { status: ConnStatus::Closed, .. } => {
                            // Terminal events still reach the client; the
                            // table entry goes away here.
                            self.remove_session(user, sev.session);
                            true
                        }
                        _ => self.session_exists(user, sev.session),
                    };
                    if !keep {
                        continue;
                    }
                    let wrapping = match &sev.event {
                        Event::TcpChunk { .. } => Wrapping::sealed(true),
                        _ => Wrapping::sealed(false),
                    };
                    if let Err(e) = self.codec.encode(&mut out, &sev, wrapping) {
                        warn!(user, session = sev.session, error = %e, "event encode failed");
                    }
                    if out.len() >= defaults::DEFAULT_POLL_BUDGET {
                        break;
                    }
                }
            }
        }
        out.freeze()
    }
}

impl std::fmt::Debug for SessionMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let users = self.users.lock();
        f.debug_struct("SessionMux")
            .field("users", &users.len())
            .field(
                "sessions",
                &users.values().map(|e| e.sessions.len()).sum::<usize>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Instant;

    use spac_core::event::{FrameCodec, HttpRequestEvent};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn mux() -> SessionMux {
        SessionMux::new(Arc::new(FrameCodec))
    }

    fn batch(events: Vec<SessionEvent>) -> Bytes {
        let codec = FrameCodec;
        let mut buf = BytesMut::new();
        for ev in &events {
            codec.encode(&mut buf, ev, Wrapping::plain()).unwrap();
        }
        buf.freeze()
    }

    fn decode_all(body: Bytes) -> Vec<SessionEvent> {
        let codec = FrameCodec;
        let mut buf = BytesMut::from(&body[..]);
        let mut events = Vec::new();
        while let Some(ev) = codec.decode(&mut buf).unwrap() {
            events.push(ev);
        }
        events
    }

    fn connect_event(session: u32, addr: SocketAddr) -> SessionEvent {
        SessionEvent {
            session,
            event: Event::HttpRequest(HttpRequestEvent {
                method: "CONNECT".into(),
                url: addr.to_string(),
                headers: vec![("Host".into(), addr.to_string())],
                body: Bytes::new(),
            }),
        }
    }

    async fn holding_origin() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        addr
    }

    #[tokio::test]
    async fn empty_poll_returns_within_window() {
        let mux = mux();
        let start = Instant::now();
        let body = mux.handle_invoke("alice", Bytes::new()).await;
        let elapsed = start.elapsed();
        assert!(body.is_empty());
        assert!(elapsed >= Duration::from_millis(80), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "poll overran: {elapsed:?}");
    }

    #[tokio::test]
    async fn connect_batch_round_trips() {
        let mux = mux();
        let origin = holding_origin().await;

        let body = mux
            .handle_invoke("alice", batch(vec![connect_event(1, origin)]))
            .await;
        let events = decode_all(body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].session, 1);
        match &events[0].event {
            Event::TcpChunk { content, .. } => {
                assert_eq!(&content[..], crate::session::RESP_ESTABLISHED);
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        assert_eq!(mux.session_count("alice"), 1);
    }

    #[tokio::test]
    async fn dial_failure_emits_503_then_closed_and_removes_session() {
        let mux = mux();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let refused = listener.local_addr().unwrap();
        drop(listener);

        let body = mux
            .handle_invoke("alice", batch(vec![connect_event(1, refused)]))
            .await;
        let events = decode_all(body);
        assert_eq!(events.len(), 2);
        match &events[0].event {
            Event::TcpChunk { content, .. } => {
                assert_eq!(&content[..], crate::session::RESP_UNAVAILABLE);
            }
            other => panic!("expected 503 chunk, got {other:?}"),
        }
        assert!(matches!(
            events[1].event,
            Event::TcpConnection { status: ConnStatus::Closed, .. }
        ));
        assert_eq!(mux.session_count("alice"), 0);
    }

    #[tokio::test]
    async fn decode_error_keeps_earlier_frames() {
        let mux = mux();
        let origin = holding_origin().await;

        let mut body = BytesMut::from(&batch(vec![connect_event(1, origin)])[..]);
        body.extend_from_slice(b"\x00\x00\x00\x06garbage-that-is-not-a-frame");

        let response = mux.handle_invoke("alice", body.freeze()).await;
        let events = decode_all(response);
        // The valid frame before the garbage was still routed.
        assert_eq!(events.len(), 1);
        assert_eq!(mux.session_count("alice"), 1);
    }

    #[tokio::test]
    async fn inbound_close_event_removes_session() {
        let mux = mux();
        let origin = holding_origin().await;
        mux.handle_invoke("alice", batch(vec![connect_event(1, origin)])).await;
        assert_eq!(mux.session_count("alice"), 1);

        mux.handle_invoke(
            "alice",
            batch(vec![SessionEvent {
                session: 1,
                event: Event::TcpConnection {
                    status: ConnStatus::Closed,
                    addr: String::new(),
                },
            }]),
        )
        .await;
        assert_eq!(mux.session_count("alice"), 0);
    }

    #[tokio::test]
    async fn user_login_drops_every_session() {
        let mux = mux();
        let origin_a = holding_origin().await;
        let origin_b = holding_origin().await;
        mux.handle_invoke(
            "alice",
            batch(vec![connect_event(1, origin_a), connect_event(2, origin_b)]),
        )
        .await;
        assert_eq!(mux.session_count("alice"), 2);

        let body = mux
            .handle_invoke(
                "alice",
                batch(vec![SessionEvent {
                    session: 0,
                    event: Event::UserLogin { user: "alice".into() },
                }]),
            )
            .await;
        assert_eq!(mux.session_count("alice"), 0);

        // Nothing further is emitted for the dropped sessions.
        let events = decode_all(body);
        assert!(events.is_empty(), "unexpected events after login: {events:?}");
        let body = mux.handle_invoke("alice", Bytes::new()).await;
        assert!(decode_all(body).is_empty());
    }

    #[tokio::test]
    async fn users_are_isolated() {
        let mux = mux();
        let origin = holding_origin().await;
        mux.handle_invoke("alice", batch(vec![connect_event(1, origin)])).await;

        let body = mux.handle_invoke("bob", Bytes::new()).await;
        assert!(decode_all(body).is_empty());
        assert_eq!(mux.session_count("alice"), 1);
        assert_eq!(mux.session_count("bob"), 0);
    }

    #[tokio::test]
    async fn origin_data_is_drained_in_sequence() {
        let mux = mux();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for payload in [&b"alpha"[..], b"beta", b"gamma"] {
                stream.write_all(payload).await.unwrap();
                stream.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let first = mux.handle_invoke("alice", batch(vec![connect_event(1, addr)])).await;

        // Poll until the origin close arrives, collecting data-chunk
        // sequences. The synthetic 200 reply is filtered out by content.
        let mut sequences = Vec::new();
        let mut closed = false;
        let mut body = first;
        for _ in 0..50 {
            for ev in decode_all(body) {
                match ev.event {
                    Event::TcpChunk { content, sequence } => {
                        if &content[..] != crate::session::RESP_ESTABLISHED {
                            sequences.push(sequence);
                        }
                    }
                    Event::TcpConnection { status: ConnStatus::Closed, .. } => closed = true,
                    _ => {}
                }
            }
            if closed {
                break;
            }
            body = mux.handle_invoke("alice", Bytes::new()).await;
        }
        assert!(closed, "origin close never surfaced");
        let expected: Vec<u32> = (0..sequences.len() as u32).collect();
        assert_eq!(sequences, expected);
        assert!(!sequences.is_empty());
    }
}
