// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Real-time fan-out.
//!
//! The gateway publishes one small JSON notification per appended entry on a
//! [`NotificationChannel`]. A single [`Broadcaster`] loop subscribes to it and
//! writes every notification to all registered observer sessions, in
//! registration order. Writes never wait: each session has its own bounded
//! queue, and a session whose queue is full or gone fails that write alone.
//! A failing session is not removed; sessions leave the registry only when
//! their transport goes away.
//!
//! Nothing is buffered for late observers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use conduit_log::EntryId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::FanoutConfig;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub entry_id: EntryId,
    pub produced_at_ms: u64,
    pub received_at_ms: u64,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session closed")]
    Closed,
    #[error("session queue full")]
    Full,
}

/// Shared channel between the gateway (publisher) and the broadcaster.
#[derive(Clone)]
pub struct NotificationChannel {
    tx: broadcast::Sender<String>,
}

impl NotificationChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a notification. Returns how many subscribers got it; zero
    /// subscribers is not an error.
    pub fn publish(&self, notification: &Notification) -> usize {
        match serde_json::to_string(notification) {
            Ok(raw) => self.publish_raw(raw),
            Err(e) => {
                tracing::warn!("Failed to encode notification {:?}: {}", notification, e);
                0
            }
        }
    }

    pub fn publish_raw(&self, raw: String) -> usize {
        self.tx.send(raw).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

/// Transport side of one observer session. Implementations must not block.
pub trait SessionSink: Send + Sync {
    fn try_write(&self, frame: &str) -> Result<(), SessionError>;
}

/// Session backed by a bounded mpsc queue drained by the SSE response.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl SessionSink for ChannelSink {
    fn try_write(&self, frame: &str) -> Result<(), SessionError> {
        self.tx.try_send(frame.to_owned()).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::Full,
            TrySendError::Closed(_) => SessionError::Closed,
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct Broadcaster {
    sessions: Mutex<BTreeMap<SessionId, Arc<dyn SessionSink>>>,
    next_id: AtomicU64,
    session_buffer: usize,
}

impl Broadcaster {
    pub fn new(config: &FanoutConfig) -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            session_buffer: config.session_buffer.max(1),
        }
    }

    /// Register a sink. Ids increase, so map order is registration order.
    pub fn register(&self, sink: Arc<dyn SessionSink>) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut sessions = self.lock_sessions();
            sessions.insert(id, sink);
            sessions.len()
        };
        metrics::gauge!("conduit_live_sessions", count as f64);
        tracing::info!("Observer session {} connected ({} live)", id, count);
        id
    }

    /// Open a queue-backed session. The session is removed when the returned
    /// handle is dropped.
    pub fn subscribe(self: &Arc<Self>) -> LiveSession {
        let (tx, rx) = mpsc::channel(self.session_buffer);
        let id = self.register(Arc::new(ChannelSink::new(tx)));
        LiveSession {
            guard: SessionGuard {
                broadcaster: Arc::clone(self),
                id,
            },
            frames: rx,
        }
    }

    pub fn unsubscribe(&self, id: SessionId) -> bool {
        let (removed, count) = {
            let mut sessions = self.lock_sessions();
            let removed = sessions.remove(&id).is_some();
            (removed, sessions.len())
        };
        if removed {
            metrics::gauge!("conduit_live_sessions", count as f64);
            tracing::info!("Observer session {} disconnected ({} live)", id, count);
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Write one message to every session without waiting on any of them.
    ///
    /// A message that decodes as a [`Notification`] is re-encoded; anything
    /// else is forwarded unchanged.
    pub fn broadcast(&self, raw: &str) -> BroadcastReport {
        let frame = match serde_json::from_str::<Notification>(raw) {
            Ok(n) => serde_json::to_string(&n).unwrap_or_else(|_| raw.to_owned()),
            Err(e) => {
                tracing::debug!("Forwarding undecodable notification as-is: {}", e);
                raw.to_owned()
            }
        };

        let targets: Vec<(SessionId, Arc<dyn SessionSink>)> = self
            .lock_sessions()
            .iter()
            .map(|(id, sink)| (*id, Arc::clone(sink)))
            .collect();

        let mut report = BroadcastReport::default();
        for (id, sink) in targets {
            match sink.try_write(&frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    metrics::increment_counter!("conduit_fanout_write_failures_total");
                    tracing::warn!("Write to observer session {} failed: {}", id, e);
                }
            }
        }
        report
    }

    /// Drop every session, ending their streams.
    pub fn close_all(&self) {
        let closed = {
            let mut sessions = self.lock_sessions();
            let n = sessions.len();
            sessions.clear();
            n
        };
        metrics::gauge!("conduit_live_sessions", 0.0);
        if closed > 0 {
            tracing::info!("Closed {} observer sessions", closed);
        }
    }

    /// Run the single broadcast loop until cancelled or the channel closes.
    pub fn spawn(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<String>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Fan-out broadcaster started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(raw) => {
                            self.broadcast(&raw);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Fan-out lagged, skipped {} notifications", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            self.close_all();
            tracing::info!("Fan-out broadcaster stopped");
        })
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, BTreeMap<SessionId, Arc<dyn SessionSink>>> {
        // A poisoned registry still holds valid sessions.
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Removes its session from the registry on drop.
pub struct SessionGuard {
    broadcaster: Arc<Broadcaster>,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

pub struct LiveSession {
    guard: SessionGuard,
    frames: mpsc::Receiver<String>,
}

impl LiveSession {
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    pub fn into_parts(self) -> (SessionGuard, mpsc::Receiver<String>) {
        (self.guard, self.frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct RecordingSink {
        frames: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
            })
        }

        fn frames(&self) -> Vec<String> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl SessionSink for RecordingSink {
        fn try_write(&self, frame: &str) -> Result<(), SessionError> {
            self.frames.lock().unwrap().push(frame.to_owned());
            Ok(())
        }
    }

    struct FailingSink;

    impl SessionSink for FailingSink {
        fn try_write(&self, _frame: &str) -> Result<(), SessionError> {
            Err(SessionError::Closed)
        }
    }

    fn config() -> FanoutConfig {
        FanoutConfig {
            channel_capacity: 16,
            session_buffer: 4,
            ..FanoutConfig::default()
        }
    }

    fn notification(id: u64) -> Notification {
        Notification {
            entry_id: EntryId(id),
            produced_at_ms: 10,
            received_at_ms: 11,
        }
    }

    #[tokio::test]
    async fn test_failing_session_does_not_block_others() {
        let broadcaster = Broadcaster::new(&config());
        let first = RecordingSink::new();
        let third = RecordingSink::new();

        broadcaster.register(first.clone());
        let failing = broadcaster.register(Arc::new(FailingSink));
        broadcaster.register(third.clone());

        let raw = serde_json::to_string(&notification(1)).unwrap();
        let report = broadcaster.broadcast(&raw);

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1 });
        assert_eq!(first.frames(), vec![raw.clone()]);
        assert_eq!(third.frames(), vec![raw]);
        // Failed sessions stay registered
        assert_eq!(broadcaster.session_count(), 3);
        assert!(broadcaster.unsubscribe(failing));
    }

    #[tokio::test]
    async fn test_full_session_queue_fails_only_that_write() {
        let broadcaster = Arc::new(Broadcaster::new(&config()));
        let stalled = broadcaster.subscribe();
        let live = RecordingSink::new();
        broadcaster.register(live.clone());

        for _ in 0..4 {
            assert_eq!(broadcaster.broadcast("x"), BroadcastReport { delivered: 2, failed: 0 });
        }
        assert_eq!(broadcaster.broadcast("x"), BroadcastReport { delivered: 1, failed: 1 });
        assert_eq!(live.frames().len(), 5);
        assert_eq!(broadcaster.session_count(), 2);
        drop(stalled);
    }

    #[tokio::test]
    async fn test_stalled_session_does_not_starve_healthy_ones() {
        let broadcaster = Arc::new(Broadcaster::new(&config()));
        let channel = NotificationChannel::new(config().channel_capacity);
        let token = CancellationToken::new();
        let handle = broadcaster.clone().spawn(channel.subscribe(), token.clone());

        // Never drained
        let stalled = broadcaster.subscribe();
        let healthy = RecordingSink::new();
        broadcaster.register(healthy.clone());

        for id in 1..=100 {
            channel.publish(&notification(id));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        for _ in 0..200 {
            if healthy.frames().len() == 100 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let frames = healthy.frames();
        assert_eq!(frames.len(), 100);
        let last: Notification = serde_json::from_str(&frames[99]).unwrap();
        assert_eq!(last.entry_id, EntryId(100));

        // The stalled session kept only what its queue could hold
        let (_guard, mut queue) = stalled.into_parts();
        let mut queued = 0;
        while queue.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, config().session_buffer);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_message_forwarded_raw() {
        let broadcaster = Broadcaster::new(&config());
        let sink = RecordingSink::new();
        broadcaster.register(sink.clone());

        broadcaster.broadcast("not json {");
        assert_eq!(sink.frames(), vec!["not json {".to_string()]);
    }

    #[tokio::test]
    async fn test_dropping_live_session_unsubscribes() {
        let broadcaster = Arc::new(Broadcaster::new(&config()));
        let session = broadcaster.subscribe();
        assert_eq!(broadcaster.session_count(), 1);

        drop(session);
        assert_eq!(broadcaster.session_count(), 0);
    }

    #[tokio::test]
    async fn test_loop_delivers_published_notifications() {
        let broadcaster = Arc::new(Broadcaster::new(&config()));
        let channel = NotificationChannel::new(16);
        let token = CancellationToken::new();
        let handle = broadcaster.clone().spawn(channel.subscribe(), token.clone());

        let mut session = broadcaster.subscribe();
        channel.publish(&notification(1));

        let frame = tokio::time::timeout(Duration::from_secs(1), session.next_frame())
            .await
            .unwrap()
            .unwrap();
        let decoded: Notification = serde_json::from_str(&frame).unwrap();
        assert_eq!(decoded, notification(1));

        token.cancel();
        handle.await.unwrap();
        assert_eq!(broadcaster.session_count(), 0);
        // Registry cleared, so the session's queue has no sender left
        assert!(session.next_frame().await.is_none());
    }
}
