//! FIX session engine.
//!
//! One TCP connection to a counterparty: HMAC-SHA256 logon, sequence
//! discipline both directions, resend serving from the sent-store,
//! heartbeat/test-request, reconnect with exponential backoff. The rest
//! of the engine talks to the session through `send_app_message` /
//! `send_fields` and an mpsc event stream.
//!
//! Single-writer rule: the outbound sequence counter and sent-store are
//! mutated only inside `transmit`, which serializes on the writer lock,
//! so bytes hit the socket in sequence order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::Serialize;
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::fix::message::{self as fix, msg_type, tag, FixMessage, APPL_VER_ID};
use crate::fix::store::{SentStore, StoredMessage};

/// Inbound frames processed between cooperative yields, so a burst
/// cannot starve the rest of the runtime.
const MAX_FRAMES_PER_TICK: usize = 50;

/// Sent-store cleanup period.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Session failure taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    ConnectTimeout,
    ConnectError(String),
    LogonTimeout,
    LogonRejected(String),
    NotConnected,
    WriteFailure(String),
    Closed,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectTimeout => write!(f, "TCP connect timed out"),
            Self::ConnectError(e) => write!(f, "connect failed: {}", e),
            Self::LogonTimeout => write!(f, "no logon response before deadline"),
            Self::LogonRejected(e) => write!(f, "logon rejected: {}", e),
            Self::NotConnected => write!(f, "session is not connected"),
            Self::WriteFailure(e) => write!(f, "socket write failed: {}", e),
            Self::Closed => write!(f, "session is closed"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Events published to the session's consumer.
#[derive(Debug)]
pub enum SessionEvent {
    LoggedOn,
    /// An in-order application message. `raw` carries the exact frame
    /// bytes for consumers that re-walk repeating groups.
    Message { msg: FixMessage, raw: Vec<u8> },
    Sent { seq: u64, msg_type: String },
    Reject { ref_seq: Option<u64>, text: Option<String> },
    ResendCompleted { begin: u64, end: u64, resent: u64, skipped: u64, requested: u64 },
    Disconnected { reason: String },
}

#[derive(Debug, Default)]
pub struct SessionStats {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub framing_drops: AtomicU64,
    pub duplicates_dropped: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub resends_served: AtomicU64,
    pub reconnects: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub framing_drops: u64,
    pub duplicates_dropped: u64,
    pub gaps_detected: u64,
    pub resends_served: u64,
    pub reconnects: u64,
}

impl SessionStats {
    fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            framing_drops: self.framing_drops.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            resends_served: self.resends_served.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

struct SessionState {
    next_seq_out: u64,
    expected_seq_in: u64,
    connected: bool,
    logged_on: bool,
    last_recv_at: Instant,
    sent_store: SentStore,
    logon_waiter: Option<oneshot::Sender<Result<(), SessionError>>>,
    disconnect_reason: Option<String>,
    /// Whether the dropped connection had completed logon; reconnect is
    /// only scheduled for established sessions.
    reconnect_wanted: bool,
}

pub struct FixSession {
    config: SessionConfig,
    state: Mutex<SessionState>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Bumped on every connection change; tasks bound to a stale epoch
    /// exit at their next check.
    epoch: AtomicU64,
    intentional: AtomicBool,
    closed: AtomicBool,
    disconnect_notify: Notify,
    stats: SessionStats,
    /// Weak self-reference so `&self` methods can spawn tasks.
    self_ref: OnceLock<Weak<FixSession>>,
}

impl FixSession {
    pub fn new(config: SessionConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            config,
            state: Mutex::new(SessionState {
                next_seq_out: 1,
                expected_seq_in: 1,
                connected: false,
                logged_on: false,
                last_recv_at: Instant::now(),
                sent_store: SentStore::new(),
                logon_waiter: None,
                disconnect_reason: None,
                reconnect_wanted: false,
            }),
            writer: AsyncMutex::new(None),
            events,
            epoch: AtomicU64::new(0),
            intentional: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            disconnect_notify: Notify::new(),
            stats: SessionStats::default(),
            self_ref: OnceLock::new(),
        });
        session.self_ref.set(Arc::downgrade(&session)).ok();
        tokio::spawn(Arc::clone(&session).supervise());
        (session, rx)
    }

    fn arc(&self) -> Arc<FixSession> {
        self.self_ref
            .get()
            .and_then(|weak| weak.upgrade())
            .expect("self reference installed in new()")
    }

    pub fn is_logged_on(&self) -> bool {
        self.state.lock().logged_on
    }

    /// Sequence number of the last message written, 0 before any send.
    pub fn last_seq_out(&self) -> u64 {
        self.state.lock().next_seq_out - 1
    }

    pub fn stats(&self) -> SessionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Establishes TCP, performs the authenticated logon handshake, and
    /// resolves once 35=A is received. Sequence numbers reset to 1 on
    /// both sides (141=Y).
    pub async fn connect(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.intentional.store(false, Ordering::SeqCst);
        self.establish().await
    }

    async fn establish(&self) -> Result<(), SessionError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| SessionError::ConnectTimeout)?
        .map_err(|e| SessionError::ConnectError(e.to_string()))?;
        stream.set_nodelay(true).ok();
        let (rd, wr) = stream.into_split();

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (logon_tx, logon_rx) = oneshot::channel();
        {
            let mut st = self.state.lock();
            st.next_seq_out = 1;
            st.expected_seq_in = 1;
            st.connected = true;
            st.logged_on = false;
            st.last_recv_at = Instant::now();
            st.sent_store.clear();
            st.logon_waiter = Some(logon_tx);
        }
        *self.writer.lock().await = Some(wr);

        tokio::spawn(self.arc().read_loop(rd, epoch));

        self.send_logon().await?;

        match timeout(Duration::from_millis(self.config.logon_timeout_ms), logon_rx).await {
            Err(_) => {
                self.abort_connect().await;
                Err(SessionError::LogonTimeout)
            }
            Ok(Err(_)) => {
                // Waiter dropped without an answer: connection died
                self.abort_connect().await;
                Err(SessionError::ConnectError("connection lost during logon".into()))
            }
            Ok(Ok(Err(e))) => {
                self.abort_connect().await;
                Err(e)
            }
            Ok(Ok(Ok(()))) => {
                info!(counterparty = %self.config.target_comp_id, "FIX session logged on");
                tokio::spawn(self.arc().heartbeat_loop(epoch));
                tokio::spawn(self.arc().liveness_loop(epoch));
                tokio::spawn(self.arc().cleanup_loop(epoch));
                Ok(())
            }
        }
    }

    async fn abort_connect(&self) {
        {
            let mut st = self.state.lock();
            st.connected = false;
            st.logged_on = false;
            st.logon_waiter = None;
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.writer.lock().await = None;
    }

    /// Sends Logout if logged on, closes the socket and suppresses
    /// reconnection. The session cannot be reused afterwards.
    pub async fn disconnect(&self) {
        self.intentional.store(true, Ordering::SeqCst);
        let logged_on = self.state.lock().logged_on;
        if logged_on {
            if let Err(e) = self.transmit(|seq, time| self.admin_fields(msg_type::LOGOUT, seq, time)).await {
                debug!("logout send failed: {}", e);
            }
        }
        self.closed.store(true, Ordering::SeqCst);
        {
            let mut st = self.state.lock();
            st.connected = false;
            st.logged_on = false;
            st.sent_store.evict(
                Duration::from_millis(self.config.message_retention_ms),
                self.config.max_stored_messages,
            );
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *self.writer.lock().await = None;
        self.disconnect_notify.notify_one();
        info!(counterparty = %self.config.target_comp_id, "FIX session closed");
    }

    /// Serializes the message with the session header, assigns the next
    /// outbound sequence number, stores the raw bytes and writes to the
    /// socket. Resolves after the bytes are flushed.
    pub async fn send_app_message(&self, msg: FixMessage) -> Result<u64, SessionError> {
        self.transmit(move |seq, time| {
            let mut m = msg.clone();
            m.set(tag::SENDER_COMP_ID, &self.config.sender_comp_id);
            m.set(tag::TARGET_COMP_ID, &self.config.target_comp_id);
            m.set(tag::MSG_SEQ_NUM, seq);
            m.set(tag::SENDING_TIME, time);
            let mt = m.msg_type().unwrap_or_default().to_string();
            (mt, m.ordered_fields())
        })
        .await
    }

    /// Sends a body given as an explicit field list, emitted verbatim
    /// after the session header. This is the path for repeating-group
    /// bodies (35=V), where duplicate tags are required on the wire.
    pub async fn send_fields(&self, body: Vec<(u32, String)>) -> Result<u64, SessionError> {
        self.transmit(move |seq, time| {
            let mt = body
                .iter()
                .find(|(t, _)| *t == tag::MSG_TYPE)
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            let mut fields = self.header_fields(&mt, seq, time);
            for (t, v) in &body {
                match *t {
                    tag::MSG_TYPE
                    | tag::SENDER_COMP_ID
                    | tag::TARGET_COMP_ID
                    | tag::MSG_SEQ_NUM
                    | tag::SENDING_TIME => {}
                    _ => fields.push((*t, v.clone())),
                }
            }
            (mt, fields)
        })
        .await
    }

    fn header_fields(&self, mt: &str, seq: u64, sending_time: &str) -> Vec<(u32, String)> {
        vec![
            (tag::MSG_TYPE, mt.to_string()),
            (tag::SENDER_COMP_ID, self.config.sender_comp_id.clone()),
            (tag::TARGET_COMP_ID, self.config.target_comp_id.clone()),
            (tag::MSG_SEQ_NUM, seq.to_string()),
            (tag::SENDING_TIME, sending_time.to_string()),
        ]
    }

    fn admin_fields(&self, mt: &str, seq: u64, sending_time: &str) -> (String, Vec<(u32, String)>) {
        (mt.to_string(), self.header_fields(mt, seq, sending_time))
    }

    async fn send_logon(&self) -> Result<u64, SessionError> {
        self.transmit(|seq, time| {
            let signature = logon_signature(
                time,
                msg_type::LOGON,
                seq,
                &self.config.sender_comp_id,
                &self.config.target_comp_id,
                &self.config.api_key,
                &self.config.api_secret,
            );
            let mut fields = self.header_fields(msg_type::LOGON, seq, time);
            fields.push((tag::ENCRYPT_METHOD, "0".to_string()));
            fields.push((tag::HEART_BT_INT, self.config.heartbeat_interval_secs.to_string()));
            fields.push((tag::RESET_SEQ_NUM_FLAG, "Y".to_string()));
            fields.push((tag::USERNAME, self.config.api_key.clone()));
            fields.push((tag::PASSWORD, signature));
            fields.push((tag::DEFAULT_APPL_VER_ID, APPL_VER_ID.to_string()));
            (msg_type::LOGON.to_string(), fields)
        })
        .await
    }

    async fn send_heartbeat(&self, test_req_id: Option<String>) -> Result<u64, SessionError> {
        self.transmit(move |seq, time| {
            let mut fields = self.header_fields(msg_type::HEARTBEAT, seq, time);
            if let Some(id) = &test_req_id {
                fields.push((tag::TEST_REQ_ID, id.clone()));
            }
            (msg_type::HEARTBEAT.to_string(), fields)
        })
        .await
    }

    async fn send_resend_request(&self, begin: u64, end: u64) -> Result<u64, SessionError> {
        self.transmit(move |seq, time| {
            let mut fields = self.header_fields(msg_type::RESEND_REQUEST, seq, time);
            fields.push((tag::BEGIN_SEQ_NO, begin.to_string()));
            fields.push((tag::END_SEQ_NO, end.to_string()));
            (msg_type::RESEND_REQUEST.to_string(), fields)
        })
        .await
    }

    /// Single choke point for outbound traffic: the writer lock
    /// serializes sequence assignment and socket order.
    async fn transmit<F>(&self, build: F) -> Result<u64, SessionError>
    where
        F: FnOnce(u64, &str) -> (String, Vec<(u32, String)>),
    {
        let mut wguard = self.writer.lock().await;
        let writer = wguard.as_mut().ok_or(SessionError::NotConnected)?;
        let sending_time = fix::now_timestamp();
        let (seq, mt, raw) = {
            let mut st = self.state.lock();
            if !st.connected {
                return Err(SessionError::NotConnected);
            }
            let seq = st.next_seq_out;
            let (mt, fields) = build(seq, &sending_time);
            let raw = fix::encode_fields(&fields);
            st.next_seq_out += 1;
            st.sent_store.insert(StoredMessage {
                seq,
                fields,
                raw: raw.clone(),
                sent_at: Instant::now(),
            });
            (seq, mt, raw)
        };

        let result: std::io::Result<()> = async {
            writer.write_all(&raw).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            *wguard = None;
            drop(wguard);
            self.handle_disconnect(&format!("write failure: {}", e));
            return Err(SessionError::WriteFailure(e.to_string()));
        }
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.events.send(SessionEvent::Sent { seq, msg_type: mt }).ok();
        Ok(seq)
    }

    // === Inbound path ===

    async fn read_loop(self: Arc<Self>, mut rd: OwnedReadHalf, epoch: u64) {
        let mut buf: Vec<u8> = Vec::with_capacity(16 * 1024);
        let mut chunk = vec![0u8; 8192];
        loop {
            if self.closed.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            match rd.read(&mut chunk).await {
                Ok(0) => {
                    if self.epoch.load(Ordering::SeqCst) == epoch {
                        self.handle_disconnect("peer closed connection");
                    }
                    return;
                }
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    self.drain_frames(&mut buf, epoch).await;
                }
                Err(e) => {
                    if self.epoch.load(Ordering::SeqCst) == epoch {
                        self.handle_disconnect(&format!("read error: {}", e));
                    }
                    return;
                }
            }
        }
    }

    async fn drain_frames(&self, buf: &mut Vec<u8>, epoch: u64) {
        let mut processed = 0usize;
        while let Some(frame) = fix::next_frame(buf) {
            self.handle_frame(frame).await;
            processed += 1;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            if processed % MAX_FRAMES_PER_TICK == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    async fn handle_frame(&self, frame: Vec<u8>) {
        self.state.lock().last_recv_at = Instant::now();
        let msg = match fix::decode(&frame) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping inbound frame: {}", e);
                self.stats.framing_drops.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        let seq = msg.seq_num().unwrap_or(0);
        let expected = self.state.lock().expected_seq_in;
        if seq < expected {
            debug!(seq, expected, "dropping duplicate message");
            self.stats.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if seq > expected {
            warn!(seq, expected, "sequence gap, requesting resend");
            self.stats.gaps_detected.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.send_resend_request(expected, seq - 1).await {
                warn!("resend request failed: {}", e);
            }
            return;
        }
        self.state.lock().expected_seq_in += 1;
        self.dispatch(msg, frame).await;
    }

    async fn dispatch(&self, msg: FixMessage, raw: Vec<u8>) {
        match msg.msg_type() {
            Some(msg_type::LOGON) => {
                let waiter = {
                    let mut st = self.state.lock();
                    st.logged_on = true;
                    st.logon_waiter.take()
                };
                if let Some(w) = waiter {
                    w.send(Ok(())).ok();
                }
                self.events.send(SessionEvent::LoggedOn).ok();
            }
            Some(msg_type::HEARTBEAT) => {
                // Liveness already recorded on frame receipt
            }
            Some(msg_type::TEST_REQUEST) => {
                let id = msg.get(tag::TEST_REQ_ID).map(|s| s.to_string());
                if let Err(e) = self.send_heartbeat(id).await {
                    warn!("test-request response failed: {}", e);
                }
            }
            Some(msg_type::RESEND_REQUEST) => {
                self.serve_resend(&msg).await;
            }
            Some(msg_type::REJECT) => {
                let text = msg.get(tag::TEXT).map(|s| s.to_string());
                let waiter = self.state.lock().logon_waiter.take();
                if let Some(w) = waiter {
                    w.send(Err(SessionError::LogonRejected(
                        text.clone().unwrap_or_else(|| "session-level reject".into()),
                    )))
                    .ok();
                    return;
                }
                warn!(ref_seq = ?msg.get_u64(tag::REF_SEQ_NUM), text = ?text, "session-level reject");
                self.events
                    .send(SessionEvent::Reject { ref_seq: msg.get_u64(tag::REF_SEQ_NUM), text })
                    .ok();
            }
            Some(msg_type::LOGOUT) => {
                let waiter = self.state.lock().logon_waiter.take();
                if let Some(w) = waiter {
                    w.send(Err(SessionError::LogonRejected(
                        msg.get(tag::TEXT).unwrap_or("logout during logon").to_string(),
                    )))
                    .ok();
                    return;
                }
                self.handle_disconnect("counterparty logout");
            }
            _ => {
                self.events.send(SessionEvent::Message { msg, raw }).ok();
            }
        }
    }

    /// Serves an inbound 35=2 from the sent-store. Stored messages are
    /// replayed with their original sequence numbers, PossDupFlag set
    /// and SendingTime refreshed; tag 122 is deliberately omitted for
    /// counterparty compatibility.
    async fn serve_resend(&self, msg: &FixMessage) {
        let begin = msg.get_u64(tag::BEGIN_SEQ_NO).unwrap_or(0);
        let mut end = msg.get_u64(tag::END_SEQ_NO).unwrap_or(0);
        let last_sent = self.last_seq_out();
        if end == 0 {
            end = last_sent;
        }
        if begin < 1 || end < begin {
            warn!(begin, end, "ignoring invalid resend range");
            return;
        }

        let mut resent = 0u64;
        let mut skipped = 0u64;
        let mut wguard = self.writer.lock().await;
        for seq in begin..=end {
            let rebuilt = {
                let st = self.state.lock();
                st.sent_store.get(seq).map(|m| m.fields.clone())
            };
            let mut fields = match rebuilt {
                Some(f) => f,
                None => {
                    warn!(seq, "resend requested for seq not in store, skipping");
                    skipped += 1;
                    continue;
                }
            };
            let now = fix::now_timestamp();
            for f in fields.iter_mut() {
                if f.0 == tag::SENDING_TIME {
                    f.1 = now.clone();
                }
            }
            match fields.iter().position(|f| f.0 == tag::SENDING_TIME) {
                Some(pos) => fields.insert(pos + 1, (tag::POSS_DUP_FLAG, "Y".to_string())),
                None => fields.push((tag::POSS_DUP_FLAG, "Y".to_string())),
            }
            let raw = fix::encode_fields(&fields);
            let writer = match wguard.as_mut() {
                Some(w) => w,
                None => return,
            };
            let result: std::io::Result<()> = async {
                writer.write_all(&raw).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = result {
                *wguard = None;
                drop(wguard);
                self.handle_disconnect(&format!("write failure during resend: {}", e));
                return;
            }
            resent += 1;
        }
        drop(wguard);

        self.stats.resends_served.fetch_add(resent, Ordering::Relaxed);
        info!(begin, end, resent, skipped, "resend request served");
        self.events
            .send(SessionEvent::ResendCompleted {
                begin,
                end,
                resent,
                skipped,
                requested: end - begin + 1,
            })
            .ok();
    }

    // === Failure handling and reconnection ===

    /// Tears the connection down and wakes the supervisor. Idempotent
    /// per connection.
    fn handle_disconnect(&self, reason: &str) {
        let should_notify = {
            let mut st = self.state.lock();
            if !st.connected {
                return;
            }
            st.connected = false;
            st.reconnect_wanted = st.logged_on;
            st.logged_on = false;
            st.disconnect_reason = Some(reason.to_string());
            if let Some(w) = st.logon_waiter.take() {
                w.send(Err(SessionError::ConnectError(reason.to_string()))).ok();
            }
            st.sent_store.evict(
                Duration::from_millis(self.config.message_retention_ms),
                self.config.max_stored_messages,
            );
            true
        };
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if should_notify {
            warn!(reason, "FIX transport down");
            self.disconnect_notify.notify_one();
        }
    }

    async fn supervise(self: Arc<Self>) {
        loop {
            self.disconnect_notify.notified().await;
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            let (reason, reconnect_wanted) = {
                let mut st = self.state.lock();
                if st.connected {
                    // Stale wakeup from an already-replaced connection
                    continue;
                }
                (
                    st.disconnect_reason.take().unwrap_or_else(|| "unknown".into()),
                    st.reconnect_wanted,
                )
            };
            *self.writer.lock().await = None;
            self.events.send(SessionEvent::Disconnected { reason }).ok();
            if self.intentional.load(Ordering::SeqCst) || !reconnect_wanted {
                continue;
            }
            self.reconnect_with_backoff().await;
        }
    }

    /// Exponential backoff: initial · 2^(attempt−1), capped, for up to
    /// the configured number of attempts. Each attempt is a fresh
    /// session; logon resets sequence numbers on both sides.
    async fn reconnect_with_backoff(&self) {
        for attempt in 1..=self.config.max_reconnect_attempts {
            if self.closed.load(Ordering::SeqCst) || self.intentional.load(Ordering::SeqCst) {
                return;
            }
            let delay = self
                .config
                .initial_reconnect_delay_ms
                .saturating_mul(1u64 << (attempt - 1).min(31))
                .min(self.config.max_reconnect_delay_ms);
            info!(attempt, delay_ms = delay, "scheduling FIX reconnect");
            tokio::time::sleep(Duration::from_millis(delay)).await;
            match self.establish().await {
                Ok(()) => {
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(attempt, "FIX session re-established");
                    return;
                }
                Err(e) => warn!(attempt, "reconnect attempt failed: {}", e),
            }
        }
        error!(
            attempts = self.config.max_reconnect_attempts,
            "reconnect attempts exhausted, session stays down"
        );
        self.events
            .send(SessionEvent::Disconnected { reason: "reconnect attempts exhausted".into() })
            .ok();
    }

    // === Periodic tasks, bound to one connection epoch ===

    async fn heartbeat_loop(self: Arc<Self>, epoch: u64) {
        let period = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            if self.closed.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            if !self.state.lock().logged_on {
                continue;
            }
            if let Err(e) = self.send_heartbeat(None).await {
                debug!("heartbeat send failed: {}", e);
            }
        }
    }

    async fn liveness_loop(self: Arc<Self>, epoch: u64) {
        let limit = Duration::from_secs(self.config.heartbeat_interval_secs.max(1) * 2);
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if self.closed.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            let stale = {
                let st = self.state.lock();
                st.logged_on && st.last_recv_at.elapsed() > limit
            };
            if stale {
                warn!("no inbound traffic within 2x heartbeat interval");
                self.handle_disconnect("heartbeat timeout");
                return;
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>, epoch: u64) {
        let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.closed.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            let evicted = self.state.lock().sent_store.evict(
                Duration::from_millis(self.config.message_retention_ms),
                self.config.max_stored_messages,
            );
            if evicted > 0 {
                debug!(evicted, "sent-store cleanup");
            }
        }
    }
}

/// Logon MAC: HMAC-SHA256 over the exact concatenation
/// sendingTime ∥ msgType ∥ seqNum ∥ senderCompId ∥ targetCompId ∥
/// username, keyed by the API secret, base64 encoded.
pub fn logon_signature(
    sending_time: &str,
    mt: &str,
    seq: u64,
    sender_comp_id: &str,
    target_comp_id: &str,
    username: &str,
    api_secret: &str,
) -> String {
    let payload = format!(
        "{}{}{}{}{}{}",
        sending_time, mt, seq, sender_comp_id, target_comp_id, username
    );
    let mut mac = Hmac::<Sha256>::new_from_slice(api_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}
