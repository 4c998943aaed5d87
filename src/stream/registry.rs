//! Connection registry for the stream server.
//!
//! # Responsibilities
//! - Enforce the connection ceiling (compare-exchange, never exceeded)
//! - Hand out incrementing ids and per-connection outbound queues
//! - Fan messages out to one or all connections
//! - Relay inbound client messages to subscribers, uninterpreted
//!
//! # Design Decisions
//! - A `ConnectionGuard` owns the slot; dropping it deregisters the connection
//! - Outbound queues are bounded; a full queue drops the message for that
//!   connection instead of stalling the sender
//! - `close_all` drops every outbound sender, which ends each connection task

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::sync::mpsc::error::TrySendError;

use crate::observability::metrics;

/// Server-assigned connection id, unique per server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    WebSocket,
    Sse,
}

impl ConnectionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionKind::WebSocket => "websocket",
            ConnectionKind::Sse => "sse",
        }
    }
}

/// Snapshot of one registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub kind: ConnectionKind,
    pub peer: SocketAddr,
    pub connected_at: Instant,
}

/// Message received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub connection: ConnectionId,
    pub payload: Payload,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("Outbound queue for {0} is full")]
    QueueFull(ConnectionId),

    #[error("Connection {0} is closing")]
    Closed(ConnectionId),
}

#[derive(Debug)]
struct Slot {
    info: ConnectionInfo,
    outbound: mpsc::Sender<String>,
}

/// All live stream connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    slots: DashMap<ConnectionId, Slot>,
    active: AtomicUsize,
    next_id: AtomicU64,
    max_connections: usize,
    queue_capacity: usize,
    inbound: broadcast::Sender<InboundMessage>,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize, queue_capacity: usize) -> Arc<Self> {
        let queue_capacity = queue_capacity.max(1);
        let (inbound, _) = broadcast::channel(queue_capacity);
        Arc::new(Self {
            slots: DashMap::new(),
            active: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            max_connections,
            queue_capacity,
            inbound,
        })
    }

    /// Register a connection, or `None` when at the ceiling.
    pub fn try_register(
        self: &Arc<Self>,
        kind: ConnectionKind,
        peer: SocketAddr,
    ) -> Option<(ConnectionGuard, mpsc::Receiver<String>)> {
        let mut current = self.active.load(Ordering::Relaxed);
        loop {
            if current >= self.max_connections {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbound, rx) = mpsc::channel(self.queue_capacity);
        let info = ConnectionInfo {
            id,
            kind,
            peer,
            connected_at: Instant::now(),
        };
        self.slots.insert(id, Slot { info, outbound });
        metrics::set_stream_connections(current + 1);
        tracing::debug!(connection = %id, kind = kind.as_str(), peer = %peer, "Stream connection registered");

        Some((
            ConnectionGuard {
                registry: Arc::clone(self),
                id,
            },
            rx,
        ))
    }

    /// Queue `message` for every connection; returns how many accepted it.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut delivered = 0;
        for slot in self.slots.iter() {
            match slot.outbound.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(connection = %slot.info.id, "Dropping broadcast for slow connection");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    pub fn send(&self, id: ConnectionId, message: impl Into<String>) -> Result<(), StreamError> {
        let slot = self
            .slots
            .get(&id)
            .ok_or(StreamError::UnknownConnection(id))?;
        slot.outbound.try_send(message.into()).map_err(|err| match err {
            TrySendError::Full(_) => StreamError::QueueFull(id),
            TrySendError::Closed(_) => StreamError::Closed(id),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Live connections ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self.slots.iter().map(|slot| slot.info.clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Receive every inbound client message from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    pub(crate) fn publish_inbound(&self, connection: ConnectionId, payload: Payload) {
        // No subscribers is fine.
        let _ = self.inbound.send(InboundMessage {
            connection,
            payload,
        });
    }

    /// Drop every outbound queue so all connection tasks finish.
    pub fn close_all(&self) {
        let open = self.slots.len();
        self.slots.clear();
        if open > 0 {
            tracing::info!(connections = open, "Closing stream connections");
        }
    }

    fn deregister(&self, id: ConnectionId) {
        self.slots.remove(&id);
        let remaining = self.active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::set_stream_connections(remaining);
        tracing::debug!(connection = %id, remaining, "Stream connection closed");
    }
}

/// Owns one connection slot until dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

/// Application handle onto a running stream server.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    registry: Arc<ConnectionRegistry>,
}

impl StreamHandle {
    pub(crate) fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn broadcast(&self, message: &str) -> usize {
        self.registry.broadcast(message)
    }

    pub fn send(&self, id: ConnectionId, message: impl Into<String>) -> Result<(), StreamError> {
        self.registry.send(id, message)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry.connections()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.registry.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn refuses_past_ceiling_and_readmits_after_disconnect() {
        let registry = ConnectionRegistry::new(2, 8);
        let (a, _rx_a) = registry.try_register(ConnectionKind::WebSocket, peer()).unwrap();
        let (_b, _rx_b) = registry.try_register(ConnectionKind::Sse, peer()).unwrap();
        assert!(registry.try_register(ConnectionKind::WebSocket, peer()).is_none());
        assert_eq!(registry.connection_count(), 2);

        drop(a);
        assert_eq!(registry.connection_count(), 1);
        let (c, _rx_c) = registry.try_register(ConnectionKind::WebSocket, peer()).unwrap();
        assert_eq!(c.id().to_string(), "conn-3");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let registry = ConnectionRegistry::new(10, 8);
        let (_a, mut rx_a) = registry.try_register(ConnectionKind::WebSocket, peer()).unwrap();
        let (_b, mut rx_b) = registry.try_register(ConnectionKind::Sse, peer()).unwrap();

        assert_eq!(registry.broadcast("hello"), 2);
        assert_eq!(rx_a.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn send_targets_one_connection() {
        let registry = ConnectionRegistry::new(10, 1);
        let (a, mut rx_a) = registry.try_register(ConnectionKind::WebSocket, peer()).unwrap();

        registry.send(a.id(), "one").unwrap();
        assert_eq!(registry.send(a.id(), "two"), Err(StreamError::QueueFull(a.id())));
        assert_eq!(rx_a.recv().await.as_deref(), Some("one"));

        let gone = a.id();
        drop(a);
        assert_eq!(registry.send(gone, "x"), Err(StreamError::UnknownConnection(gone)));
    }

    #[tokio::test]
    async fn close_all_ends_outbound_queues() {
        let registry = ConnectionRegistry::new(10, 8);
        let (_a, mut rx) = registry.try_register(ConnectionKind::Sse, peer()).unwrap();
        registry.close_all();
        assert!(rx.recv().await.is_none());
        assert!(registry.connections().is_empty());
    }

    #[tokio::test]
    async fn inbound_messages_reach_subscribers() {
        let registry = ConnectionRegistry::new(10, 8);
        let mut inbound = registry.subscribe();
        let (a, _rx) = registry.try_register(ConnectionKind::WebSocket, peer()).unwrap();
        registry.publish_inbound(a.id(), Payload::Text("hi".into()));

        let message = inbound.recv().await.unwrap();
        assert_eq!(message.connection, a.id());
        assert_eq!(message.payload, Payload::Text("hi".into()));
    }
}
