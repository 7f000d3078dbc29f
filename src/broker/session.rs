//! Session engine: the per-connection streaming loop
//!
//! A session authenticates with the shared secret, reads one subscription
//! frame, then multiplexes three concerns in a single loop: round-robin lease
//! dispatch across its sources, inbound report/notice handling polled with a
//! short timeout so dispatch is never starved, and an idle backoff when every
//! subscribed pool is empty.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use super::codec::{seal_record, PayloadCodec};
use super::pool::PoolManager;
use super::protocol::{ClientFrame, InitFrame, LoadedSource, ServerFrame, Subscription};
use super::refill::{RefillCoordinator, RefillOutcome};
use super::registry::{ConnectionRegistry, Outbound, SessionHandle, SESSION_BUFFER_SIZE};
use super::scheduler::LeaseScheduler;
use crate::cache::LeaseCache;
use crate::error::{LessorError, Result};
use crate::models::ProxyRecord;
use crate::repository::LeaseStore;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Consecutive malformed frames tolerated before the session is closed
const MAX_MALFORMED_FRAMES: u32 = 5;

/// How a streaming session establishes its subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// `/ws/proxies`: a bare `{"source_ids": [...]}` frame; the sources are
    /// loaded from the store before streaming starts
    LoadSources,
    /// `/ws/proxy_multi`: a `{"action": "start", "source_ids": [...]}` frame
    StartFrame,
}

/// Everything a session needs from the application
#[derive(Clone)]
pub struct SessionDeps {
    pub pools: Arc<PoolManager>,
    pub registry: Arc<ConnectionRegistry>,
    pub scheduler: LeaseScheduler,
    pub refill: Arc<RefillCoordinator>,
    pub store: Arc<dyn LeaseStore>,
    pub cache: Option<Arc<dyn LeaseCache>>,
    pub codec: Arc<PayloadCodec>,
    pub secret: String,
    pub inbound_poll: Duration,
    pub idle_wait: Duration,
}

/// What the loop should do after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// A `request_proxy` hint arrived: dispatch immediately
    Hint,
    Disconnected,
}

/// Drive one streaming session to completion
pub async fn handle_session(
    socket: WebSocket,
    deps: SessionDeps,
    token: Option<String>,
    kind: SessionKind,
) {
    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();

    if !token
        .as_deref()
        .map_or(false, |presented| token_matches(presented, &deps.secret))
    {
        warn!(session_id = session_id, "Rejected session with invalid token");
        let _ = send_direct(
            &mut sink,
            &ServerFrame::Error {
                message: LessorError::AuthenticationFailed.to_string(),
            },
        )
        .await;
        close(&mut sink, close_code::POLICY).await;
        return;
    }

    let subscription = match read_subscription(&mut stream, kind).await {
        Ok(subscription) => subscription,
        Err(e) => {
            debug!(session_id = session_id, error = %e, "Rejected malformed subscription");
            let _ = send_direct(
                &mut sink,
                &ServerFrame::Error {
                    message: e.to_string(),
                },
            )
            .await;
            close(&mut sink, close_code::POLICY).await;
            return;
        }
    };

    info!(session_id = session_id, key = %subscription.key(), "Session subscribed");

    match kind {
        SessionKind::LoadSources => {
            let loaded = load_sources(&deps, subscription.ids()).await;
            let frame = ServerFrame::SourcesLoaded {
                message: format!("Loaded proxies from {} sources", loaded.len()),
                loaded_sources: loaded,
            };
            if !send_direct(&mut sink, &frame).await {
                return;
            }
        }
        SessionKind::StartFrame => {
            for &source_id in subscription.ids() {
                deps.pools.ensure(source_id);
                if deps.pools.is_empty(source_id) {
                    deps.refill.refill(source_id).await;
                }
            }
        }
    }

    let (tx, rx) = mpsc::channel(SESSION_BUFFER_SIZE);
    deps.registry
        .attach(subscription.key(), SessionHandle::new(session_id, tx.clone()));

    let writer = tokio::spawn(write_loop(sink, rx));

    let mut session = Session {
        id: session_id,
        subscription,
        cursor: 0,
        malformed: 0,
        deps,
        tx,
    };
    session.run(&mut stream).await;

    session
        .deps
        .registry
        .detach(session.subscription.key(), session_id);
    drop(session); // drops the sender so the writer drains and exits
    let _ = writer.await;

    info!(session_id = session_id, "Session closed");
}

struct Session {
    id: u64,
    subscription: Subscription,
    cursor: usize,
    malformed: u32,
    deps: SessionDeps,
    tx: mpsc::Sender<Outbound>,
}

impl Session {
    async fn run(&mut self, stream: &mut SplitStream<WebSocket>) {
        loop {
            match self.poll_inbound(stream).await {
                Flow::Disconnected => return,
                Flow::Continue | Flow::Hint => {}
            }

            if !self.dispatch_tick(stream).await {
                return;
            }
        }
    }

    /// Poll one inbound frame with a short timeout so dispatch keeps flowing
    async fn poll_inbound(&mut self, stream: &mut SplitStream<WebSocket>) -> Flow {
        match timeout(self.deps.inbound_poll, stream.next()).await {
            Err(_) => Flow::Continue, // nothing inbound within the poll window
            Ok(None) => Flow::Disconnected,
            Ok(Some(Err(e))) => {
                debug!(session_id = self.id, error = %e, "Session transport error");
                Flow::Disconnected
            }
            Ok(Some(Ok(message))) => self.handle_message(message).await,
        }
    }

    async fn handle_message(&mut self, message: Message) -> Flow {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    self.malformed = 0;
                    self.handle_frame(frame).await
                }
                Err(e) => {
                    self.malformed += 1;
                    debug!(session_id = self.id, error = %e, "Malformed inbound frame");

                    let flow = self
                        .send(ServerFrame::Error {
                            message: format!("Unrecognized frame: {e}"),
                        })
                        .await;
                    if flow == Flow::Disconnected {
                        return Flow::Disconnected;
                    }

                    if self.malformed >= MAX_MALFORMED_FRAMES {
                        warn!(
                            session_id = self.id,
                            "Closing session after repeated malformed frames"
                        );
                        let _ = self.tx.send(Outbound::Close(close_code::POLICY)).await;
                        return Flow::Disconnected;
                    }
                    Flow::Continue
                }
            },
            Message::Close(_) => Flow::Disconnected,
            // Ping/pong are answered by the transport layer
            _ => Flow::Continue,
        }
    }

    async fn handle_frame(&mut self, frame: ClientFrame) -> Flow {
        match frame {
            // The subscription is fixed at session start; a repeated start
            // frame is treated as a dispatch hint
            ClientFrame::Start { .. } => Flow::Hint,
            ClientFrame::RequestProxy => Flow::Hint,
            ClientFrame::ReportProxy {
                proxy_id,
                status_code,
            } => self.handle_report(proxy_id, status_code).await,
            ClientFrame::ProxyTaken {
                proxy_id,
                usage_interval,
            } => {
                self.handle_proxy_taken(proxy_id, usage_interval).await;
                Flow::Continue
            }
        }
    }

    /// Persist a usage report and acknowledge it
    async fn handle_report(&mut self, proxy_id: i64, status_code: i32) -> Flow {
        let (success, message) = match self.deps.store.insert_report(proxy_id, status_code).await {
            Ok(()) => (true, "Report saved successfully".to_string()),
            Err(e) => {
                warn!(
                    session_id = self.id,
                    proxy_id = proxy_id,
                    error = %e,
                    "Failed to store usage report"
                );
                (false, e.to_string())
            }
        };

        self.send(ServerFrame::ReportAcknowledged {
            proxy_id,
            success,
            message,
        })
        .await
    }

    /// Relay an advisory proxy-in-use notice to every peer of the source
    async fn handle_proxy_taken(&self, proxy_id: i64, usage_interval: i64) {
        let Some(source_id) = self.resolve_source(proxy_id).await else {
            debug!(
                session_id = self.id,
                proxy_id = proxy_id,
                "Cannot resolve source for proxy_taken notice"
            );
            return;
        };

        let delivered =
            self.deps
                .registry
                .broadcast_source(source_id, Some(self.id), |key| ServerFrame::ProxyInUse {
                    proxy_id,
                    usage_interval,
                    key: key.to_string(),
                });

        debug!(
            session_id = self.id,
            proxy_id = proxy_id,
            source_id = source_id,
            peers = delivered,
            "Relayed proxy-in-use notice"
        );
    }

    /// Resolve a proxy's source: cache point key, then pool scan, then store
    async fn resolve_source(&self, proxy_id: i64) -> Option<i64> {
        if let Some(cache) = &self.deps.cache {
            if let Ok(Some(record)) = cache.get_by_id(proxy_id).await {
                return Some(record.source_id);
            }
        }

        if let Some(source_id) = self.deps.pools.source_of(proxy_id) {
            return Some(source_id);
        }

        match self.deps.store.source_of(proxy_id).await {
            Ok(source_id) => source_id,
            Err(e) => {
                debug!(proxy_id = proxy_id, error = %e, "Source lookup failed");
                None
            }
        }
    }

    /// One dispatch tick. Returns false when the session must terminate.
    async fn dispatch_tick(&mut self, stream: &mut SplitStream<WebSocket>) -> bool {
        if let Some((source_id, record)) = self.next_lease() {
            let usage_interval = record.usage_interval;
            let frame = ServerFrame::ProxyAvailable {
                source_id: Some(source_id.to_string()),
                proxy: seal_record(&self.deps.codec, record.clone()),
                key: self.subscription.key().to_string(),
                usage_interval,
            };

            if self.tx.send(Outbound::Frame(frame)).await.is_err() {
                // The writer is gone: restore the popped record and bail out
                debug!(
                    session_id = self.id,
                    proxy_id = record.id,
                    "Restoring lease after failed dispatch"
                );
                self.deps.pools.push_front(source_id, record);
                return false;
            }

            self.deps.scheduler.schedule_return(
                source_id,
                record,
                Duration::from_secs(usage_interval.max(0) as u64),
            );
            return true;
        }

        // Every subscribed pool is empty: refill, else announce waiting
        let mut refilled = false;
        for &source_id in self.subscription.ids() {
            if self.deps.pools.is_empty(source_id)
                && matches!(
                    self.deps.refill.refill(source_id).await,
                    RefillOutcome::Filled(_)
                )
            {
                refilled = true;
            }
        }
        if refilled {
            return true;
        }

        let waiting = ServerFrame::Waiting {
            message: "No proxies available, waiting...".to_string(),
            key: self.subscription.key().to_string(),
        };
        if self.send(waiting).await == Flow::Disconnected {
            return false;
        }

        self.idle(stream).await
    }

    /// Rotate left-to-right over the subscribed sources, popping at most one
    /// record per tick
    fn next_lease(&mut self) -> Option<(i64, ProxyRecord)> {
        let ids = self.subscription.ids();
        for offset in 0..ids.len() {
            let idx = (self.cursor + offset) % ids.len();
            let source_id = ids[idx];
            if let Some(record) = self.deps.pools.pop(source_id) {
                self.cursor = (idx + 1) % ids.len();
                return Some((source_id, record));
            }
        }
        None
    }

    /// Idle for the configured wait while continuing to poll inbound frames.
    /// Returns false when the session must terminate.
    async fn idle(&mut self, stream: &mut SplitStream<WebSocket>) -> bool {
        let deadline = Instant::now() + self.deps.idle_wait;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }

            let window = (deadline - now).min(self.deps.inbound_poll);
            match timeout(window, stream.next()).await {
                Err(_) => {}
                Ok(None) => return false,
                Ok(Some(Err(_))) => return false,
                Ok(Some(Ok(message))) => match self.handle_message(message).await {
                    Flow::Disconnected => return false,
                    Flow::Hint => return true,
                    Flow::Continue => {}
                },
            }
        }
    }

    /// Queue a frame to the writer; `Disconnected` means the writer is gone
    async fn send(&self, frame: ServerFrame) -> Flow {
        if self.tx.send(Outbound::Frame(frame)).await.is_err() {
            Flow::Disconnected
        } else {
            Flow::Continue
        }
    }
}

/// Writer task: drains the outbound queue into the socket
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                let payload = match serde_json::to_string(&frame) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!(error = %e, "Failed to serialize outbound frame");
                        close(&mut sink, close_code::ERROR).await;
                        return;
                    }
                };
                if sink.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            Outbound::Close(code) => {
                close(&mut sink, code).await;
                return;
            }
        }
    }

    let _ = sink.close().await;
}

/// Read the subscription frame that opens a session
async fn read_subscription(
    stream: &mut SplitStream<WebSocket>,
    kind: SessionKind,
) -> Result<Subscription> {
    let text = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | None => {
                return Err(LessorError::InvalidFrame(
                    "connection closed before start frame".to_string(),
                ))
            }
            Some(Ok(_)) => continue, // ping/pong before the start frame
            Some(Err(e)) => return Err(LessorError::InvalidFrame(e.to_string())),
        }
    };

    let values = match kind {
        SessionKind::StartFrame => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Start { source_ids }) => source_ids,
            Ok(_) => {
                return Err(LessorError::InvalidFrame(
                    "Invalid start message".to_string(),
                ))
            }
            Err(_) => {
                return Err(LessorError::InvalidFrame(
                    "Invalid start message".to_string(),
                ))
            }
        },
        SessionKind::LoadSources => serde_json::from_str::<InitFrame>(&text)
            .map_err(|e| LessorError::InvalidFrame(e.to_string()))?
            .source_ids,
    };

    Subscription::from_values(&values)
}

/// Load or refresh the requested sources from the store into the cache and
/// the pools, reporting how many records each source yielded
async fn load_sources(deps: &SessionDeps, source_ids: &[i64]) -> Vec<LoadedSource> {
    let mut loaded = Vec::new();

    for &source_id in source_ids {
        deps.pools.ensure(source_id);

        let records = match deps.store.records_for_source(source_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(source_id = source_id, error = %e, "Failed to load source from store");
                continue;
            }
        };
        if records.is_empty() {
            continue;
        }

        if let Some(cache) = &deps.cache {
            if let Err(e) = cache.refresh_source(source_id, &records).await {
                debug!(source_id = source_id, error = %e, "Failed to mirror source into warm cache");
            }
        }

        let count = records.len();
        if deps.pools.is_empty(source_id) {
            deps.pools.refill(source_id, records);
        }

        loaded.push(LoadedSource {
            source_id: source_id.to_string(),
            proxy_count: count,
        });
    }

    loaded
}

/// Constant-time comparison of the presented token against the shared secret
fn token_matches(presented: &str, secret: &str) -> bool {
    let (a, b) = (presented.as_bytes(), secret.as_bytes());
    if secret.is_empty() || a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn send_direct(sink: &mut SplitSink<WebSocket, Message>, frame: &ServerFrame) -> bool {
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "Failed to serialize frame");
            return false;
        }
    };
    sink.send(Message::Text(payload)).await.is_ok()
}

async fn close(sink: &mut SplitSink<WebSocket, Message>, code: u16) {
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: "".into(),
        })))
        .await;
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LeaseCache;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    fn record(id: i64, source_id: i64) -> ProxyRecord {
        ProxyRecord {
            id,
            credential: format!("10.0.0.{}:3128", id),
            source_id,
            priority: 0,
            blocked: false,
            provider_id: None,
            provider_name: None,
            updated_at: None,
            usage_interval: 30,
        }
    }

    /// Store fake recording inserted reports
    #[derive(Default)]
    struct FakeStore {
        known: Vec<i64>,
        reports: SyncMutex<Vec<(i64, i32)>>,
        sources: DashMap<i64, i64>,
    }

    #[async_trait]
    impl LeaseStore for FakeStore {
        async fn fetch_unblocked(&self, _source_id: i64, _limit: i64) -> Result<Vec<ProxyRecord>> {
            Ok(Vec::new())
        }

        async fn insert_report(&self, proxy_id: i64, status_code: i32) -> Result<()> {
            if !self.known.contains(&proxy_id) {
                return Err(LessorError::ProxyNotFound { id: proxy_id });
            }
            self.reports.lock().push((proxy_id, status_code));
            Ok(())
        }

        async fn source_of(&self, proxy_id: i64) -> Result<Option<i64>> {
            Ok(self.sources.get(&proxy_id).map(|s| *s))
        }

        async fn records_for_source(&self, _source_id: i64) -> Result<Vec<ProxyRecord>> {
            Ok(Vec::new())
        }
    }

    /// Cache fake serving point lookups only
    #[derive(Default)]
    struct FakeCache {
        points: DashMap<i64, ProxyRecord>,
    }

    #[async_trait]
    impl LeaseCache for FakeCache {
        async fn take_source(&self, _source_id: i64) -> Result<Vec<ProxyRecord>> {
            Ok(Vec::new())
        }

        async fn store_batch(&self, _records: &[ProxyRecord], _ttl: Duration) -> Result<()> {
            Ok(())
        }

        async fn refresh_source(&self, _source_id: i64, _records: &[ProxyRecord]) -> Result<()> {
            Ok(())
        }

        async fn get_by_id(&self, proxy_id: i64) -> Result<Option<ProxyRecord>> {
            Ok(self.points.get(&proxy_id).map(|r| r.value().clone()))
        }
    }

    struct Fixture {
        session: Session,
        rx: mpsc::Receiver<Outbound>,
        store: Arc<FakeStore>,
        registry: Arc<ConnectionRegistry>,
        pools: Arc<PoolManager>,
    }

    fn fixture(subscribed: &[i64], store: FakeStore, cache: FakeCache) -> Fixture {
        let pools = Arc::new(PoolManager::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(store);
        let cache = Arc::new(cache);
        let (scheduler, _worker) = LeaseScheduler::new(pools.clone());

        let config = crate::config::BrokerConfig {
            refill_batch_size: 10,
            cache_ttl_secs: 360,
            refill_backoff_secs: 0,
            inbound_poll_ms: 100,
            idle_wait_secs: 1,
        };
        let refill = Arc::new(RefillCoordinator::new(
            pools.clone(),
            store.clone() as Arc<dyn LeaseStore>,
            Some(cache.clone() as Arc<dyn LeaseCache>),
            &config,
        ));

        let deps = SessionDeps {
            pools: pools.clone(),
            registry: registry.clone(),
            scheduler,
            refill,
            store: store.clone() as Arc<dyn LeaseStore>,
            cache: Some(cache as Arc<dyn LeaseCache>),
            codec: Arc::new(PayloadCodec::new("secret")),
            secret: "secret".to_string(),
            inbound_poll: Duration::from_millis(100),
            idle_wait: Duration::from_secs(1),
        };

        let values: Vec<serde_json::Value> = subscribed.iter().map(|id| json!(id)).collect();
        let subscription = Subscription::from_values(&values).unwrap();

        let (tx, rx) = mpsc::channel(SESSION_BUFFER_SIZE);
        let session = Session {
            id: 1,
            subscription,
            cursor: 0,
            malformed: 0,
            deps,
            tx,
        };

        Fixture {
            session,
            rx,
            store,
            registry,
            pools,
        }
    }

    #[test]
    fn test_token_matches() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("Secret", "secret"));
        assert!(!token_matches("secret2", "secret"));
        assert!(!token_matches("", "secret"));
        // An unset secret rejects every token
        assert!(!token_matches("", ""));
        assert!(!token_matches("anything", ""));
    }

    #[tokio::test]
    async fn test_next_lease_rotates_across_sources() {
        let mut fx = fixture(&[1, 2], FakeStore::default(), FakeCache::default());
        fx.pools.push(1, record(10, 1));
        fx.pools.push(1, record(11, 1));
        fx.pools.push(2, record(20, 2));

        let (source, first) = fx.session.next_lease().unwrap();
        assert_eq!((source, first.id), (1, 10));

        let (source, second) = fx.session.next_lease().unwrap();
        assert_eq!((source, second.id), (2, 20));

        // Source 2 is empty now; rotation wraps back to source 1
        let (source, third) = fx.session.next_lease().unwrap();
        assert_eq!((source, third.id), (1, 11));

        assert!(fx.session.next_lease().is_none());
    }

    #[tokio::test]
    async fn test_report_round_trip_ack() {
        let store = FakeStore {
            known: vec![42],
            ..FakeStore::default()
        };
        let mut fx = fixture(&[1], store, FakeCache::default());

        let flow = fx
            .session
            .handle_frame(ClientFrame::ReportProxy {
                proxy_id: 42,
                status_code: 429,
            })
            .await;
        assert_eq!(flow, Flow::Continue);

        assert_eq!(*fx.store.reports.lock(), vec![(42, 429)]);
        match fx.rx.recv().await {
            Some(Outbound::Frame(ServerFrame::ReportAcknowledged {
                proxy_id,
                success,
                message,
            })) => {
                assert_eq!(proxy_id, 42);
                assert!(success);
                assert_eq!(message, "Report saved successfully");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_report_unknown_proxy_is_nacked() {
        let mut fx = fixture(&[1], FakeStore::default(), FakeCache::default());

        fx.session
            .handle_frame(ClientFrame::ReportProxy {
                proxy_id: 999999,
                status_code: 200,
            })
            .await;

        assert!(fx.store.reports.lock().is_empty());
        match fx.rx.recv().await {
            Some(Outbound::Frame(ServerFrame::ReportAcknowledged {
                success, message, ..
            })) => {
                assert!(!success);
                assert_eq!(message, "Proxy with ID 999999 does not exist");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_proxy_taken_notifies_peers_only() {
        let cache = FakeCache::default();
        cache.points.insert(9, record(9, 1));
        let mut fx = fixture(&[1], FakeStore::default(), cache);

        let (peer_tx, mut peer_rx) = mpsc::channel(SESSION_BUFFER_SIZE);
        fx.registry.attach("1,2", SessionHandle::new(7, peer_tx));
        let (other_tx, mut other_rx) = mpsc::channel(SESSION_BUFFER_SIZE);
        fx.registry.attach("2", SessionHandle::new(8, other_tx));

        fx.session
            .handle_frame(ClientFrame::ProxyTaken {
                proxy_id: 9,
                usage_interval: 30,
            })
            .await;

        match peer_rx.recv().await {
            Some(Outbound::Frame(ServerFrame::ProxyInUse {
                proxy_id,
                usage_interval,
                key,
            })) => {
                assert_eq!(proxy_id, 9);
                assert_eq!(usage_interval, 30);
                assert_eq!(key, "1,2");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // A session subscribed elsewhere hears nothing
        assert!(other_rx.try_recv().is_err());
        // Neither does the reporter itself
        assert!(fx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_proxy_taken_resolves_source_from_store() {
        let store = FakeStore::default();
        store.sources.insert(9, 1);
        let mut fx = fixture(&[1], store, FakeCache::default());

        let (peer_tx, mut peer_rx) = mpsc::channel(SESSION_BUFFER_SIZE);
        fx.registry.attach("1", SessionHandle::new(7, peer_tx));

        fx.session
            .handle_frame(ClientFrame::ProxyTaken {
                proxy_id: 9,
                usage_interval: 15,
            })
            .await;

        assert!(matches!(
            peer_rx.recv().await,
            Some(Outbound::Frame(ServerFrame::ProxyInUse { proxy_id: 9, .. }))
        ));
    }

    #[tokio::test]
    async fn test_request_proxy_is_a_hint() {
        let mut fx = fixture(&[1], FakeStore::default(), FakeCache::default());

        let flow = fx.session.handle_frame(ClientFrame::RequestProxy).await;
        assert_eq!(flow, Flow::Hint);
    }
}
