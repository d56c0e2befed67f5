//! Stream sessions and the relay-wide registry
//!
//! A session exists from the moment a recorder connects until its socket
//! closes. Each listener owns a bounded queue; publishing never waits on a
//! slow listener, it skips it for that frame.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::protocol::{StreamId, StreamInfo};

#[derive(Default)]
struct Listeners {
    senders: HashMap<u64, mpsc::Sender<Bytes>>,
    /// Set once the recorder is gone; no sender is added after that
    closed: bool,
}

/// One recorder and its current listeners
pub struct StreamSession {
    id: StreamId,
    created_at: DateTime<Utc>,
    listeners: RwLock<Listeners>,
    next_listener_id: AtomicU64,
    queue_frames: usize,
    frames_relayed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl StreamSession {
    fn new(id: StreamId, queue_frames: usize) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            listeners: RwLock::new(Listeners::default()),
            next_listener_id: AtomicU64::new(0),
            queue_frames: queue_frames.max(1),
            frames_relayed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Register a listener. It sees only frames published from now on.
    ///
    /// On a closed session the subscription is already finished: its first
    /// `recv` returns `None`.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_frames);
        let listener_id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut listeners = self.listeners.write();
            if listeners.closed {
                tracing::debug!("Stream {} closed before listener {} joined", self.id, listener_id);
            } else {
                listeners.senders.insert(listener_id, tx);
                tracing::info!("Listener {} joined stream {}", listener_id, self.id);
            }
        }

        Subscription {
            listener_id,
            session: self.clone(),
            frames: rx,
        }
    }

    fn unsubscribe(&self, listener_id: u64) {
        if self.listeners.write().senders.remove(&listener_id).is_some() {
            tracing::info!("Listener {} left stream {}", listener_id, self.id);
        }
    }

    /// Queue one encoded frame for every listener. Returns how many took it.
    pub fn publish(&self, frame: Bytes) -> usize {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut gone = Vec::new();
        {
            let listeners = self.listeners.read();
            for (id, tx) in listeners.senders.iter() {
                match tx.try_send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Listener {} on {} is behind, frame dropped", id, self.id);
                    }
                    Err(TrySendError::Closed(_)) => gone.push(*id),
                }
            }
        }

        if !gone.is_empty() {
            let mut listeners = self.listeners.write();
            for id in gone {
                listeners.senders.remove(&id);
            }
        }

        delivered
    }

    /// Drop every listener queue, ending their subscriptions
    fn close(&self) {
        let mut listeners = self.listeners.write();
        listeners.closed = true;
        listeners.senders.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().senders.len()
    }

    pub fn frames_relayed(&self) -> u64 {
        self.frames_relayed.load(Ordering::Relaxed)
    }

    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            stream_id: self.id.clone(),
            created_at: self.created_at,
            listeners: self.listener_count(),
            frames_relayed: self.frames_relayed(),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A listener's view of a stream. Unsubscribes on drop.
pub struct Subscription {
    listener_id: u64,
    session: Arc<StreamSession>,
    frames: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub fn listener_id(&self) -> u64 {
        self.listener_id
    }

    pub fn stream_id(&self) -> &StreamId {
        self.session.id()
    }

    /// Next frame, or `None` once the recorder is gone
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.session.unsubscribe(self.listener_id);
    }
}

/// All live streams on this relay
pub struct SessionRegistry {
    streams: DashMap<StreamId, Arc<StreamSession>>,
    queue_frames: usize,
}

impl SessionRegistry {
    pub fn new(queue_frames: usize) -> Self {
        Self {
            streams: DashMap::new(),
            queue_frames,
        }
    }

    /// Allocate a session with a fresh identifier
    pub fn open_stream(&self) -> Arc<StreamSession> {
        loop {
            let id = StreamId::generate();
            if self.streams.contains_key(&id) {
                continue;
            }
            let session = Arc::new(StreamSession::new(id.clone(), self.queue_frames));
            self.streams.insert(id.clone(), session.clone());
            tracing::info!("Stream {} opened", id);
            return session;
        }
    }

    /// Remove a session and disconnect its listeners
    pub fn close_stream(&self, id: &StreamId) -> Option<Arc<StreamSession>> {
        let (_, session) = self.streams.remove(id)?;
        session.close();
        tracing::info!("Stream {} closed after {} frames", id, session.frames_relayed());
        Some(session)
    }

    pub fn get(&self, id: &StreamId) -> Option<Arc<StreamSession>> {
        self.streams.get(id).map(|entry| entry.value().clone())
    }

    pub fn subscribe(&self, id: &StreamId) -> Option<Subscription> {
        self.get(id).map(|session| session.subscribe())
    }

    pub fn list(&self) -> Vec<StreamInfo> {
        let mut streams: Vec<StreamInfo> = self.streams.iter().map(|entry| entry.value().info()).collect();
        streams.sort_by_key(|info| info.created_at);
        streams
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn listener_count(&self) -> usize {
        self.streams.iter().map(|entry| entry.value().listener_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_only_sees_later_frames() {
        let registry = SessionRegistry::new(8);
        let session = registry.open_stream();

        assert_eq!(session.publish(Bytes::from_static(b"early")), 0);

        let mut sub = registry.subscribe(session.id()).unwrap();
        assert_eq!(session.publish(Bytes::from_static(b"one")), 1);
        assert_eq!(session.publish(Bytes::from_static(b"two")), 1);

        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(session.frames_relayed(), 3);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let registry = SessionRegistry::new(1);
        let session = registry.open_stream();
        let mut sub = session.subscribe();

        assert_eq!(session.publish(Bytes::from_static(b"a")), 1);
        assert_eq!(session.publish(Bytes::from_static(b"b")), 0);
        assert_eq!(session.info().frames_dropped, 1);
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"a"));
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let registry = SessionRegistry::new(4);
        let session = registry.open_stream();
        let id = session.id().clone();
        let mut sub = registry.subscribe(&id).unwrap();

        assert!(registry.close_stream(&id).is_some());
        assert!(sub.recv().await.is_none());
        assert!(registry.get(&id).is_none());
        assert!(registry.subscribe(&id).is_none());
        assert!(registry.close_stream(&id).is_none());
    }

    #[tokio::test]
    async fn test_subscribe_after_close_finishes_immediately() {
        let registry = SessionRegistry::new(4);
        let session = registry.open_stream();
        let id = session.id().clone();

        // Session looked up just before the recorder went away
        let retained = registry.get(&id).unwrap();
        registry.close_stream(&id);
        assert!(registry.get(&id).is_none());

        let mut sub = retained.subscribe();
        assert_eq!(retained.listener_count(), 0);
        assert_eq!(retained.publish(Bytes::from_static(b"late")), 0);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = SessionRegistry::new(4);
        let session = registry.open_stream();

        let sub = session.subscribe();
        let _other = session.subscribe();
        assert_eq!(registry.listener_count(), 2);

        drop(sub);
        assert_eq!(session.listener_count(), 1);
        assert_eq!(registry.list()[0].listeners, 1);
    }
}
