//! Integration test: drives sessions through the registry, transports and
//! lifecycle manager exactly the way the HTTP router does, and checks the
//! delivery guarantees a reconnecting client relies on:
//! - a fresh stream sees events from sequence 1
//! - reconnecting with `Last-Event-ID` replays nothing twice and drops nothing
//! - replay racing concurrent emission still yields a gapless sequence
//! - concurrent initializations never share a session id
//! - sessions are isolated from each other
//! - stateless exchanges leave nothing behind
//! - shutdown closes every session and empties the registry

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use mr_domain::config::{SessionsConfig, ShutdownConfig};
use mr_sessions::{
    AbortOnDrop, LifecycleManager, OpenTransports, RegistryError, SessionId, SessionRegistry,
    Transport, TransportFactory, TransportState,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ── Harness ─────────────────────────────────────────────────────────────

struct Harness {
    registry: Arc<SessionRegistry>,
    factory: TransportFactory,
    lifecycle: LifecycleManager,
}

impl Harness {
    fn new() -> Self {
        let root = CancellationToken::new();
        let open = OpenTransports::new();
        let registry = Arc::new(SessionRegistry::new(open.clone()));
        let factory = TransportFactory::new(&SessionsConfig::default(), root.clone(), open);
        let lifecycle =
            LifecycleManager::new(registry.clone(), root, &ShutdownConfig { close_timeout_ms: 1000 });
        Self {
            registry,
            factory,
            lifecycle,
        }
    }

    /// Reserve → initialize → activate → commit, as a POST initialize does.
    async fn initialize(&self) -> (SessionId, Arc<Transport>) {
        let reservation = self.registry.reserve().unwrap();
        let transport = self.factory.stateful(reservation.id().clone());
        transport.begin_initialize().unwrap();
        transport.exclusive(async {}).await.unwrap();
        transport.activate().unwrap();
        let id = reservation.commit(transport.clone()).unwrap();
        (id, transport)
    }
}

async fn next_seq<S>(stream: &mut S) -> u64
where
    S: futures_util::Stream<Item = mr_sessions::EventEntry> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("stream stalled")
        .expect("stream ended")
        .seq
}

// ── Scenario A: fresh stream starts at sequence 1 ───────────────────────

#[tokio::test]
async fn fresh_stream_delivers_from_sequence_one() {
    let h = Harness::new();
    let (id, _) = h.initialize().await;

    let transport = h.registry.lookup(id.as_str()).unwrap();
    let mut stream = Box::pin(transport.subscribe(None).unwrap().into_stream());

    for i in 0..3 {
        transport.emit(json!({ "n": i })).unwrap();
    }
    assert_eq!(next_seq(&mut stream).await, 1);
    assert_eq!(next_seq(&mut stream).await, 2);
    assert_eq!(next_seq(&mut stream).await, 3);
}

// ── Scenario B: reconnect after 5, continue live from 6 ─────────────────

#[tokio::test]
async fn reconnect_with_last_event_id_resumes_without_duplicates() {
    let h = Harness::new();
    let (id, transport) = h.initialize().await;

    {
        let mut stream = Box::pin(transport.subscribe(None).unwrap().into_stream());
        for i in 0..5 {
            transport.emit(json!(i)).unwrap();
        }
        for expected in 1..=5 {
            assert_eq!(next_seq(&mut stream).await, expected);
        }
        // Client disconnects here.
    }

    let transport = h.registry.lookup(id.as_str()).unwrap();
    let sub = transport.subscribe(Some(5)).unwrap();
    assert!(sub.replayed().is_empty());
    let mut stream = Box::pin(sub.into_stream());

    transport.emit(json!(5)).unwrap();
    assert_eq!(next_seq(&mut stream).await, 6);
}

#[tokio::test]
async fn reconnect_replays_events_missed_while_detached() {
    let h = Harness::new();
    let (_, transport) = h.initialize().await;

    drop(transport.subscribe(None).unwrap());
    transport.emit(json!("a")).unwrap();
    transport.emit(json!("b")).unwrap();
    transport.emit(json!("c")).unwrap();

    let mut stream = Box::pin(transport.subscribe(Some(1)).unwrap().into_stream());
    assert_eq!(next_seq(&mut stream).await, 2);
    assert_eq!(next_seq(&mut stream).await, 3);
}

// ── Replay racing emission ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replay_racing_emission_is_gapless_and_duplicate_free() {
    let h = Harness::new();
    let (_, transport) = h.initialize().await;
    for i in 0..20 {
        transport.emit(json!(i)).unwrap();
    }

    let producer = {
        let transport = transport.clone();
        tokio::spawn(async move {
            for i in 20..200 {
                transport.emit(json!(i)).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut stream = Box::pin(transport.subscribe(Some(10)).unwrap().into_stream());
    producer.await.unwrap();

    let mut seen = Vec::new();
    while seen.last() != Some(&200) {
        seen.push(next_seq(&mut stream).await);
    }
    assert_eq!(seen, (11..=200).collect::<Vec<u64>>());
}

// ── Concurrent initialization ───────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_initializations_get_distinct_ids() {
    let h = Arc::new(Harness::new());
    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.initialize().await.0 })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        assert!(ids.insert(task.await.unwrap()));
    }
    assert_eq!(h.registry.len(), 32);
}

// ── Isolation ───────────────────────────────────────────────────────────

#[tokio::test]
async fn sessions_do_not_observe_each_other() {
    let h = Harness::new();
    let (x, tx) = h.initialize().await;
    let (y, ty) = h.initialize().await;

    tx.emit(json!("for x")).unwrap();
    tx.emit(json!("for x")).unwrap();
    assert_eq!(ty.last_event_id(), Some(0));

    h.registry.terminate(x.as_str()).await.unwrap();
    assert_eq!(tx.state(), TransportState::Closed);
    assert_eq!(ty.state(), TransportState::Active);
    assert!(h.registry.lookup(y.as_str()).is_ok());
}

#[tokio::test]
async fn terminating_unknown_session_leaves_registry_untouched() {
    let h = Harness::new();
    let (id, _) = h.initialize().await;

    assert!(matches!(
        h.registry.terminate("S9").await,
        Err(RegistryError::NotFound(_))
    ));
    assert_eq!(h.registry.ids(), vec![id]);
}

// ── Stateless leak check ────────────────────────────────────────────────

#[tokio::test]
async fn stateless_exchange_leaves_nothing_open() {
    let h = Harness::new();
    let open = h.registry.open_transports().clone();

    let out = {
        let transport = AbortOnDrop::new(h.factory.stateless());
        assert_eq!(transport.emit(json!("progress")).unwrap(), None);
        transport.exclusive(async { 42 }).await.unwrap()
    };
    assert_eq!(out, 42);

    // Disconnect mid-request: the handler future is dropped.
    let transport = h.factory.stateless();
    let guarded = AbortOnDrop::new(transport.clone());
    let handler = tokio::spawn(async move {
        guarded.exclusive(std::future::pending::<()>()).await
    });
    tokio::task::yield_now().await;
    handler.abort();
    let _ = handler.await;

    assert_eq!(transport.state(), TransportState::Closed);
    drop(transport);
    assert_eq!(open.count(), 0);
    assert!(h.registry.is_empty());
}

// ── Scenario D: shutdown closes everything ──────────────────────────────

#[tokio::test]
async fn shutdown_closes_active_sessions_and_empties_registry() {
    let h = Harness::new();
    let (_, s1) = h.initialize().await;
    let (_, s2) = h.initialize().await;
    let mut stream = Box::pin(s1.subscribe(None).unwrap().into_stream());

    let report = h.lifecycle.shutdown().await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.closed.len(), 2);
    assert_eq!(s1.state(), TransportState::Closed);
    assert_eq!(s2.state(), TransportState::Closed);
    assert!(h.registry.is_empty());
    assert!(stream.next().await.is_none());
    assert_eq!(h.registry.open_transports().count(), 0);
}
