//! Connection registry: live streaming sessions grouped by subscription key
//!
//! Broadcast iteration snapshots the handle list before sending so a
//! concurrent detach cannot skip a peer, and no lock is held across a send.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::protocol::{key_contains_source, ServerFrame};

/// Maximum frames buffered per session connection
pub const SESSION_BUFFER_SIZE: usize = 256;

/// Messages a session's writer task accepts
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(ServerFrame),
    Close(u16),
}

/// Result of queueing a frame to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Delivered,
    /// Buffer full: the frame was dropped, the session stays attached
    Dropped,
    /// The session's writer is gone
    Disconnected,
}

/// Handle to a live streaming session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    tx: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    pub fn new(id: u64, tx: mpsc::Sender<Outbound>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a frame without blocking. Broadcast frames are advisory, so a
    /// full buffer drops the frame rather than stalling the broadcaster.
    pub fn try_send(&self, frame: ServerFrame) -> SendStatus {
        match self.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => SendStatus::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(session_id = self.id, "Session buffer full, dropping broadcast frame");
                SendStatus::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendStatus::Disconnected,
        }
    }
}

/// Registry of live sessions keyed by subscription
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Vec<SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Add a session under its subscription key
    pub fn attach(&self, key: &str, handle: SessionHandle) {
        let mut entry = self.connections.entry(key.to_string()).or_default();
        entry.push(handle);
        info!(
            key = key,
            connections = entry.len(),
            "Session attached to registry"
        );
    }

    /// Remove a session; empty keys are dropped
    pub fn detach(&self, key: &str, session_id: u64) {
        let remove_key = if let Some(mut entry) = self.connections.get_mut(key) {
            entry.retain(|handle| handle.id != session_id);
            info!(
                key = key,
                remaining = entry.len(),
                "Session detached from registry"
            );
            entry.is_empty()
        } else {
            false
        };

        if remove_key {
            self.connections.remove_if(key, |_, handles| handles.is_empty());
        }
    }

    /// Number of sessions attached under exactly `key`
    pub fn connection_count(&self, key: &str) -> usize {
        self.connections
            .get(key)
            .map(|handles| handles.len())
            .unwrap_or(0)
    }

    /// Broadcast a frame to every session under exactly `key`.
    /// Returns the number of sessions the frame was queued to.
    pub fn broadcast(&self, key: &str, frame: ServerFrame) -> usize {
        let snapshot: Vec<SessionHandle> = self
            .connections
            .get(key)
            .map(|handles| handles.clone())
            .unwrap_or_default();

        let mut delivered = 0;
        for handle in snapshot {
            match handle.try_send(frame.clone()) {
                SendStatus::Delivered => delivered += 1,
                SendStatus::Dropped => {}
                SendStatus::Disconnected => self.detach(key, handle.id),
            }
        }
        delivered
    }

    /// Sessions whose subscription set contains `source_id`, excluding one
    /// sender, paired with their registry key
    pub fn peers_for_source(
        &self,
        source_id: i64,
        exclude: Option<u64>,
    ) -> Vec<(String, SessionHandle)> {
        let mut peers = Vec::new();
        for entry in self.connections.iter() {
            if !key_contains_source(entry.key(), source_id) {
                continue;
            }
            for handle in entry.value() {
                if Some(handle.id) == exclude {
                    continue;
                }
                peers.push((entry.key().clone(), handle.clone()));
            }
        }
        peers
    }

    /// Broadcast to every peer subscribed to `source_id`, excluding the
    /// sender. The frame is built per peer so it can carry the recipient's
    /// own subscription key.
    pub fn broadcast_source<F>(&self, source_id: i64, exclude: Option<u64>, make: F) -> usize
    where
        F: Fn(&str) -> ServerFrame,
    {
        let peers = self.peers_for_source(source_id, exclude);

        let mut delivered = 0;
        for (key, handle) in peers {
            match handle.try_send(make(&key)) {
                SendStatus::Delivered => delivered += 1,
                SendStatus::Dropped => {}
                SendStatus::Disconnected => self.detach(&key, handle.id),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting(key: &str) -> ServerFrame {
        ServerFrame::Waiting {
            message: "No proxies available, waiting...".to_string(),
            key: key.to_string(),
        }
    }

    fn session(id: u64) -> (SessionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER_SIZE);
        (SessionHandle::new(id, tx), rx)
    }

    #[tokio::test]
    async fn test_attach_detach_counts() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = session(1);
        let (b, _rx_b) = session(2);

        registry.attach("1,2", a);
        registry.attach("1,2", b);
        assert_eq!(registry.connection_count("1,2"), 2);

        registry.detach("1,2", 1);
        assert_eq!(registry.connection_count("1,2"), 1);

        registry.detach("1,2", 2);
        assert_eq!(registry.connection_count("1,2"), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_session_under_key() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = session(1);
        let (b, mut rx_b) = session(2);

        registry.attach("1", a);
        registry.attach("1", b);

        let delivered = registry.broadcast("1", waiting("1"));
        assert_eq!(delivered, 2);

        assert!(matches!(
            rx_a.recv().await,
            Some(Outbound::Frame(ServerFrame::Waiting { .. }))
        ));
        assert!(matches!(
            rx_b.recv().await,
            Some(Outbound::Frame(ServerFrame::Waiting { .. }))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_detaches_disconnected_sessions() {
        let registry = ConnectionRegistry::new();
        let (a, rx_a) = session(1);
        registry.attach("1", a);

        drop(rx_a);
        let delivered = registry.broadcast("1", waiting("1"));

        assert_eq!(delivered, 0);
        assert_eq!(registry.connection_count("1"), 0);
    }

    #[tokio::test]
    async fn test_peers_for_source_matches_subscription_sets() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = session(1);
        let (b, _rx_b) = session(2);
        let (c, _rx_c) = session(3);

        registry.attach("1", a);
        registry.attach("1,2", b);
        registry.attach("2", c);

        let mut peer_ids: Vec<u64> = registry
            .peers_for_source(1, None)
            .into_iter()
            .map(|(_, handle)| handle.id())
            .collect();
        peer_ids.sort_unstable();
        assert_eq!(peer_ids, vec![1, 2]);

        let peer_ids: Vec<u64> = registry
            .peers_for_source(1, Some(1))
            .into_iter()
            .map(|(_, handle)| handle.id())
            .collect();
        assert_eq!(peer_ids, vec![2]);
    }

    #[tokio::test]
    async fn test_broadcast_source_carries_recipient_key() {
        let registry = ConnectionRegistry::new();
        let (reporter, mut reporter_rx) = session(1);
        let (peer, mut peer_rx) = session(2);

        registry.attach("1", reporter);
        registry.attach("1,2", peer);

        let delivered = registry.broadcast_source(1, Some(1), |key| ServerFrame::ProxyInUse {
            proxy_id: 9,
            usage_interval: 30,
            key: key.to_string(),
        });
        assert_eq!(delivered, 1);

        match peer_rx.recv().await {
            Some(Outbound::Frame(ServerFrame::ProxyInUse { proxy_id, key, .. })) => {
                assert_eq!(proxy_id, 9);
                assert_eq!(key, "1,2");
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // The reporter must not receive its own notice
        assert!(reporter_rx.try_recv().is_err());
    }
}
