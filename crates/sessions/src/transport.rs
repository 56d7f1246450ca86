//! The per-session (or per-exchange) streaming channel.
//!
//! State machine for stateful transports:
//!
//! ```text
//! Uninitialized → Initializing → Active → Closing → Closed
//! ```
//!
//! Stateless transports are created `Active`, carry no event log, and are
//! closed by the request that created them.  `Closed` is terminal.
//!
//! All request handling for one transport runs through [`Transport::exclusive`],
//! which serializes handlers and aborts them when the transport's
//! cancellation token fires.  Event emission and stream attachment share one
//! short critical section so a reconnecting consumer sees every event
//! exactly once: either in its replay batch or on its live channel.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_core::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use mr_domain::config::SessionsConfig;

use crate::event_log::{EventEntry, EventLog, Replay};
use crate::session_id::SessionId;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State & errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Uninitialized,
    Initializing,
    Active,
    Closing,
    Closed,
}

impl TransportState {
    pub fn is_closing_or_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }

    fn accepts_traffic(self) -> bool {
        matches!(self, Self::Initializing | Self::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("invalid transport transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: TransportState,
        to: TransportState,
    },

    #[error("transport is not ready ({0:?})")]
    NotReady(TransportState),

    #[error("transport has no event log")]
    NotResumable,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Open-transport accounting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Counts transports that have not yet reached `Closed`.
#[derive(Debug, Clone, Default)]
pub struct OpenTransports(Arc<AtomicUsize>);

impl OpenTransports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    state: TransportState,
    log: Option<EventLog>,
    /// Live channel of the attached stream, if any.
    consumer: Option<mpsc::Sender<EventEntry>>,
    /// Highest seq handed to a consumer, either live or via replay.
    delivered_through: u64,
    /// Protocol-level session attributes (negotiated version, log level).
    attributes: serde_json::Map<String, Value>,
}

pub struct Transport {
    session_id: Option<SessionId>,
    created_at: DateTime<Utc>,
    inner: Mutex<Inner>,
    /// Serializes request handling for this transport.
    request_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    stream_buffer: usize,
    open: OpenTransports,
}

impl Transport {
    fn new(
        session_id: Option<SessionId>,
        state: TransportState,
        log: Option<EventLog>,
        parent: &CancellationToken,
        stream_buffer: usize,
        open: OpenTransports,
    ) -> Self {
        open.acquire();
        Self {
            session_id,
            created_at: Utc::now(),
            inner: Mutex::new(Inner {
                state,
                log,
                consumer: None,
                delivered_through: 0,
                attributes: serde_json::Map::new(),
            }),
            request_lock: tokio::sync::Mutex::new(()),
            cancel: parent.child_token(),
            stream_buffer: stream_buffer.max(1),
            open,
        }
    }

    /// `None` for stateless transports.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    pub fn is_resumable(&self) -> bool {
        self.inner.lock().log.is_some()
    }

    /// Sequence id of the newest logged event.
    pub fn last_event_id(&self) -> Option<u64> {
        self.inner.lock().log.as_ref().map(EventLog::last_seq)
    }

    pub fn has_consumer(&self) -> bool {
        self.inner.lock().consumer.is_some()
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.inner.lock().attributes.get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().attributes.insert(key.into(), value);
    }

    /// Fires when the transport starts closing or the process shuts down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn session_label(&self) -> &str {
        self.session_id.as_ref().map_or("stateless", SessionId::as_str)
    }

    // ── State transitions ───────────────────────────────────────────

    fn transition(&self, from: TransportState, to: TransportState) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.state == from {
            inner.state = to;
            tracing::debug!(session_id = %self.session_label(), ?from, ?to, "transport transition");
            Ok(())
        } else if inner.state.is_closing_or_closed() {
            Err(TransportError::Closed)
        } else {
            Err(TransportError::InvalidTransition {
                from: inner.state,
                to,
            })
        }
    }

    /// `Uninitialized → Initializing`, on receipt of the initialize message.
    pub fn begin_initialize(&self) -> Result<(), TransportError> {
        self.transition(TransportState::Uninitialized, TransportState::Initializing)
    }

    /// `Initializing → Active`, once the session id is assigned.
    pub fn activate(&self) -> Result<(), TransportError> {
        self.transition(TransportState::Initializing, TransportState::Active)
    }

    fn mark_closed(&self, inner: &mut Inner) {
        if inner.state != TransportState::Closed {
            inner.state = TransportState::Closed;
            inner.consumer = None;
            self.open.release();
        }
    }

    /// Graceful close: `→ Closing`, cancel in-flight work, wait for the
    /// running handler (if any) to release the transport, then `→ Closed`.
    pub async fn close(&self) -> Result<(), TransportError> {
        {
            let mut inner = self.inner.lock();
            if inner.state.is_closing_or_closed() {
                return Err(TransportError::Closed);
            }
            inner.state = TransportState::Closing;
            inner.consumer = None;
        }
        self.cancel.cancel();
        tracing::debug!(session_id = %self.session_label(), "transport closing");

        let _guard = self.request_lock.lock().await;
        self.mark_closed(&mut self.inner.lock());
        tracing::debug!(session_id = %self.session_label(), "transport closed");
        Ok(())
    }

    /// Force the transport to `Closed` without waiting.  Returns `false` if
    /// it was already closed.
    pub fn abort(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == TransportState::Closed {
            return false;
        }
        self.mark_closed(&mut inner);
        drop(inner);
        self.cancel.cancel();
        true
    }

    // ── Request handling ────────────────────────────────────────────

    /// Run `fut` with exclusive access to this transport.
    ///
    /// Concurrent callers queue in arrival order.  The future is dropped
    /// and `Closed` returned if the transport is cancelled while it runs.
    pub async fn exclusive<F, T>(&self, fut: F) -> Result<T, TransportError>
    where
        F: Future<Output = T>,
    {
        let _guard = self.request_lock.lock().await;
        let state = self.state();
        if state.is_closing_or_closed() || self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if !state.accepts_traffic() {
            return Err(TransportError::NotReady(state));
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Closed),
            out = fut => Ok(out),
        }
    }

    #[cfg(test)]
    pub(crate) async fn hold_request_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.request_lock.lock().await
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Record a server-originated event and push it to the attached stream.
    ///
    /// Returns the assigned sequence id, or `None` when the transport has no
    /// event log (stateless) and the event is dropped.
    pub fn emit(&self, payload: Value) -> Result<Option<u64>, TransportError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.state.is_closing_or_closed() {
            return Err(TransportError::Closed);
        }
        if !inner.state.accepts_traffic() {
            return Err(TransportError::NotReady(inner.state));
        }

        let Some(log) = inner.log.as_mut() else {
            tracing::debug!("stateless transport has no event log, dropping server event");
            return Ok(None);
        };
        let seq = log.append(payload.clone());

        if let Some(tx) = inner.consumer.as_ref() {
            match tx.try_send(EventEntry { seq, payload }) {
                Ok(()) => inner.delivered_through = seq,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        session_id = %self.session_label(),
                        seq,
                        "stream consumer lagging, detaching (event kept for replay)"
                    );
                    inner.consumer = None;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        session_id = %self.session_label(),
                        seq,
                        "stream consumer disconnected, detaching"
                    );
                    inner.consumer = None;
                }
            }
        }

        Ok(Some(seq))
    }

    /// Attach a stream consumer.
    ///
    /// With `last_event_id = Some(n)` every retained event with `seq > n` is
    /// replayed first.  Without it, events never handed to any consumer are
    /// replayed.  Attaching replaces (and thereby ends) any previously
    /// attached stream.
    pub fn subscribe(&self, last_event_id: Option<u64>) -> Result<Subscription, TransportError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.state {
            TransportState::Active => {}
            s if s.is_closing_or_closed() => return Err(TransportError::Closed),
            s => return Err(TransportError::NotReady(s)),
        }
        let log = inner.log.as_ref().ok_or(TransportError::NotResumable)?;

        let cursor = last_event_id.unwrap_or(inner.delivered_through);
        if cursor > log.last_seq() {
            tracing::warn!(
                session_id = %self.session_label(),
                last_event_id = cursor,
                head = log.last_seq(),
                "resume cursor is ahead of the event log"
            );
        }
        let replay = log.replay_after(cursor);
        if replay.missed > 0 {
            tracing::warn!(
                session_id = %self.session_label(),
                last_event_id = cursor,
                evicted = replay.missed,
                "events after resume cursor were evicted from the log"
            );
        }

        let (tx, rx) = mpsc::channel(self.stream_buffer);
        if inner.consumer.replace(tx).is_some() {
            tracing::debug!(session_id = %self.session_label(), "replacing attached stream consumer");
        }
        inner.delivered_through = log.last_seq();

        Ok(Subscription {
            replay,
            live: rx,
            cancel: self.cancel.clone(),
        })
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.inner.get_mut().state != TransportState::Closed {
            self.open.release();
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An attached stream: replay batch followed by live events.
pub struct Subscription {
    replay: Replay,
    live: mpsc::Receiver<EventEntry>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn replayed(&self) -> &[EventEntry] {
        &self.replay.entries
    }

    pub fn missed(&self) -> u64 {
        self.replay.missed
    }

    /// Yields the replay batch, then live events until the consumer is
    /// replaced or the transport is cancelled.
    pub fn into_stream(self) -> impl Stream<Item = EventEntry> + Send + 'static {
        let Subscription {
            replay,
            mut live,
            cancel,
        } = self;

        async_stream::stream! {
            for entry in replay.entries {
                yield entry;
            }
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    next = live.recv() => next,
                };
                match next {
                    Some(entry) => yield entry,
                    None => break,
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds transports wired to the shutdown token and open-transport counter.
#[derive(Clone)]
pub struct TransportFactory {
    max_events: usize,
    stream_buffer: usize,
    root: CancellationToken,
    open: OpenTransports,
}

impl TransportFactory {
    pub fn new(config: &SessionsConfig, root: CancellationToken, open: OpenTransports) -> Self {
        Self {
            max_events: config.max_events,
            stream_buffer: config.stream_buffer,
            root,
            open,
        }
    }

    /// A resumable transport for a new session, in `Uninitialized`.
    pub fn stateful(&self, session_id: SessionId) -> Arc<Transport> {
        Arc::new(Transport::new(
            Some(session_id),
            TransportState::Uninitialized,
            Some(EventLog::new(self.max_events)),
            &self.root,
            self.stream_buffer,
            self.open.clone(),
        ))
    }

    /// A one-shot transport with no event log, already `Active`.
    pub fn stateless(&self) -> Arc<Transport> {
        Arc::new(Transport::new(
            None,
            TransportState::Active,
            None,
            &self.root,
            self.stream_buffer,
            self.open.clone(),
        ))
    }

    pub fn open_transports(&self) -> &OpenTransports {
        &self.open
    }
}

/// Aborts the wrapped transport when dropped, whether the owning request
/// completed or its future was cancelled by a client disconnect.
pub struct AbortOnDrop(Arc<Transport>);

impl AbortOnDrop {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self(transport)
    }
}

impl std::ops::Deref for AbortOnDrop {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.0
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.0.abort() {
            tracing::debug!("stateless transport closed");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
