//! Owner notification channel
//!
//! Lock holders queue paused/resumed/stopped signals without waiting; a
//! single worker task delivers them to each owner's remote callback in the
//! order they were queued. Delivery failures are logged and counted, never
//! reported back to the code that queued the message.

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::traits::VirtualDisplayCallback;
use super::types::OwnerToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallbackMessage {
    Paused,
    Resumed,
    Stopped,
}

struct Envelope {
    token: OwnerToken,
    target: Arc<dyn VirtualDisplayCallback>,
    message: CallbackMessage,
}

/// Delivery counters shared by the dispatcher handles and the worker
#[derive(Debug, Default)]
pub struct DeliveryHealth {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryHealth {
    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages the remote end refused
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Messages queued after the worker had already gone away
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> DeliverySummary {
        DeliverySummary {
            delivered: self.delivered(),
            failed: self.failed(),
            dropped: self.dropped(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl std::fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} delivered, {} failed, {} dropped",
            self.delivered, self.failed, self.dropped
        )
    }
}

/// Sending half of the notification channel
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    health: Arc<DeliveryHealth>,
}

/// Receiving half; owns the delivery loop
pub struct NotificationWorker {
    rx: mpsc::UnboundedReceiver<Envelope>,
    health: Arc<DeliveryHealth>,
}

/// Create a dispatcher and the worker that will drain it
pub fn channel() -> (NotificationDispatcher, NotificationWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let health = Arc::new(DeliveryHealth::default());
    (
        NotificationDispatcher {
            tx,
            health: health.clone(),
        },
        NotificationWorker { rx, health },
    )
}

impl NotificationDispatcher {
    /// Create the channel and run its worker on the current tokio runtime
    pub fn spawn(cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (dispatcher, worker) = channel();
        let handle = tokio::spawn(worker.run(cancel));
        (dispatcher, handle)
    }

    pub fn health(&self) -> Arc<DeliveryHealth> {
        self.health.clone()
    }

    fn post(&self, envelope: Envelope) {
        let token = envelope.token;
        let message = envelope.message;
        if self.tx.send(envelope).is_err() {
            warn!("Notification worker is gone, dropping {:?} for {}", message, token);
            self.health.record_dropped();
        }
    }
}

impl NotificationWorker {
    pub fn health(&self) -> Arc<DeliveryHealth> {
        self.health.clone()
    }

    /// Deliver messages until cancelled or every dispatcher is dropped.
    ///
    /// On cancellation whatever is already queued is still delivered.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Notification worker started");
        loop {
            tokio::select! {
                biased;
                envelope = self.rx.recv() => match envelope {
                    Some(envelope) => self.deliver(envelope).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    self.flush().await;
                    break;
                }
            }
        }
        info!("Notification worker stopped: {}", self.health.summary());
    }

    /// Deliver everything queued so far; returns how many messages were handled
    pub async fn flush(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            self.deliver(envelope).await;
            handled += 1;
        }
        handled
    }

    async fn deliver(&self, envelope: Envelope) {
        let result = match envelope.message {
            CallbackMessage::Paused => envelope.target.on_paused().await,
            CallbackMessage::Resumed => envelope.target.on_resumed().await,
            CallbackMessage::Stopped => envelope.target.on_stopped().await,
        };

        match result {
            Ok(()) => {
                debug!("Delivered {:?} to {}", envelope.message, envelope.token);
                self.health.record_delivered();
            }
            Err(e) => {
                warn!(
                    "Failed to notify {} of virtual display event {:?}: {}",
                    envelope.token, envelope.message, e
                );
                self.health.record_failed();
            }
        }
    }
}

/// Per-device handle onto the notification channel
#[derive(Clone)]
pub struct OwnerCallback {
    token: OwnerToken,
    target: Arc<dyn VirtualDisplayCallback>,
    dispatcher: NotificationDispatcher,
}

impl OwnerCallback {
    pub fn new(
        token: OwnerToken,
        target: Arc<dyn VirtualDisplayCallback>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            token,
            target,
            dispatcher,
        }
    }

    pub fn dispatch_paused(&self) {
        self.dispatch(CallbackMessage::Paused);
    }

    pub fn dispatch_resumed(&self) {
        self.dispatch(CallbackMessage::Resumed);
    }

    pub fn dispatch_stopped(&self) {
        self.dispatch(CallbackMessage::Stopped);
    }

    fn dispatch(&self, message: CallbackMessage) {
        self.dispatcher.post(Envelope {
            token: self.token,
            target: self.target.clone(),
            message,
        });
    }
}

impl std::fmt::Debug for OwnerCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerCallback")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RecordingCallback;

    #[tokio::test]
    async fn test_messages_delivered_in_order() {
        let (dispatcher, mut worker) = channel();
        let target = Arc::new(RecordingCallback::new());
        let callback = OwnerCallback::new(OwnerToken::new(), target.clone(), dispatcher);

        callback.dispatch_paused();
        callback.dispatch_resumed();
        callback.dispatch_paused();
        callback.dispatch_stopped();

        // Nothing is delivered until the worker runs
        assert!(target.messages().is_empty());

        assert_eq!(worker.flush().await, 4);
        assert_eq!(
            target.messages(),
            vec![
                CallbackMessage::Paused,
                CallbackMessage::Resumed,
                CallbackMessage::Paused,
                CallbackMessage::Stopped,
            ]
        );
        assert_eq!(worker.health().delivered(), 4);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_swallowed() {
        let (dispatcher, mut worker) = channel();
        let dead = Arc::new(RecordingCallback::new());
        dead.set_dead(true);
        let alive = Arc::new(RecordingCallback::new());

        OwnerCallback::new(OwnerToken::new(), dead.clone(), dispatcher.clone()).dispatch_stopped();
        OwnerCallback::new(OwnerToken::new(), alive.clone(), dispatcher).dispatch_stopped();

        assert_eq!(worker.flush().await, 2);
        assert!(dead.messages().is_empty());
        assert_eq!(alive.messages(), vec![CallbackMessage::Stopped]);

        let summary = worker.health().summary();
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_post_after_worker_gone_is_dropped() {
        let (dispatcher, worker) = channel();
        drop(worker);

        let target = Arc::new(RecordingCallback::new());
        let callback = OwnerCallback::new(OwnerToken::new(), target.clone(), dispatcher.clone());
        callback.dispatch_resumed();

        assert_eq!(dispatcher.health().dropped(), 1);
        assert!(target.messages().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_flushes_queue() {
        let cancel = CancellationToken::new();
        let (dispatcher, worker) = channel();
        let target = Arc::new(RecordingCallback::new());
        let callback = OwnerCallback::new(OwnerToken::new(), target.clone(), dispatcher);

        callback.dispatch_paused();
        callback.dispatch_stopped();
        cancel.cancel();

        worker.run(cancel).await;
        assert_eq!(
            target.messages(),
            vec![CallbackMessage::Paused, CallbackMessage::Stopped]
        );
    }
}
