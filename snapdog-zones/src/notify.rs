//! Zone state-changed notification dispatch
//!
//! Zone commands hand their change events to a bounded queue and return
//! immediately. A single dispatch task drains the queue, persists each
//! snapshot and forwards it to the [`EventPublisher`]. Failures in either
//! step are logged and never reach the command caller.
//!
//! Zones enqueue after releasing their lock, so two changes to one zone can
//! arrive out of order. The dispatcher drops a snapshot whose timestamp is
//! older than the last one it delivered for that zone.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::model::{ZoneIndex, ZoneStateChanged};
use crate::services::{EventPublisher, PersistentStateStore, ServiceResult};

/// Non-blocking sender half handed to every zone
#[derive(Debug, Clone)]
pub struct ZoneNotifier {
    sender: mpsc::Sender<ZoneStateChanged>,
}

impl ZoneNotifier {
    /// Queue a notification without waiting
    ///
    /// A full queue drops the event with a warning; the next change for the
    /// same zone carries the complete snapshot anyway.
    pub fn notify(&self, event: ZoneStateChanged) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    "Notification queue full, dropping state change for {}",
                    event.zone_index
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(
                    "Notification dispatcher closed, dropping state change for {}",
                    event.zone_index
                );
            }
        }
    }

    /// A notifier whose events go nowhere, for zones built in isolation
    pub fn detached() -> Self {
        let (sender, _receiver) = mpsc::channel(1);
        Self { sender }
    }
}

/// Publisher that only logs, for setups without a downstream consumer
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: ZoneStateChanged) -> ServiceResult<()> {
        tracing::debug!(
            "{} is {} (volume {}, muted {})",
            event.zone_index,
            event.state.playback_state,
            event.state.volume,
            event.state.mute
        );
        Ok(())
    }
}

/// Handle to the running dispatch task
pub struct NotificationDispatcher {
    close: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    /// Spawn the dispatch task
    ///
    /// `store` is optional: without one, snapshots are only published.
    pub fn spawn(
        publisher: Arc<dyn EventPublisher>,
        store: Option<Arc<dyn PersistentStateStore>>,
        buffer: usize,
    ) -> (ZoneNotifier, NotificationDispatcher) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let close = CancellationToken::new();
        let task = tokio::spawn(dispatch_loop(receiver, publisher, store, close.clone()));

        (
            ZoneNotifier { sender },
            NotificationDispatcher {
                close,
                task: Mutex::new(Some(task)),
            },
        )
    }

    /// Stop accepting notifications, deliver what is queued, then stop
    pub async fn shutdown(&self) {
        self.close.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("Notification dispatcher task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

async fn dispatch_loop(
    mut receiver: mpsc::Receiver<ZoneStateChanged>,
    publisher: Arc<dyn EventPublisher>,
    store: Option<Arc<dyn PersistentStateStore>>,
    close: CancellationToken,
) {
    tracing::debug!("Notification dispatcher started");
    let mut delivery = Delivery {
        publisher,
        store,
        latest: HashMap::new(),
    };

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => delivery.deliver(event).await,
                None => break,
            },
            _ = close.cancelled() => {
                receiver.close();
                let mut drained = 0usize;
                while let Some(event) = receiver.recv().await {
                    delivery.deliver(event).await;
                    drained += 1;
                }
                tracing::debug!("Notification dispatcher drained {} pending events", drained);
                break;
            }
        }
    }

    tracing::debug!("Notification dispatcher stopped");
}

struct Delivery {
    publisher: Arc<dyn EventPublisher>,
    store: Option<Arc<dyn PersistentStateStore>>,
    /// Timestamp of the last snapshot delivered per zone
    latest: HashMap<ZoneIndex, DateTime<Utc>>,
}

impl Delivery {
    async fn deliver(&mut self, event: ZoneStateChanged) {
        let zone = event.zone_index;
        let stamp = event.state.timestamp_utc;
        if self.latest.get(&zone).is_some_and(|latest| stamp < *latest) {
            tracing::debug!("Skipping out-of-order state change for {}", zone);
            return;
        }
        self.latest.insert(zone, stamp);

        if let Some(store) = self.store.as_deref() {
            if let Err(e) = store.save_zone_state(&event.state).await {
                tracing::warn!("Failed to persist state for {}: {}", zone, e);
            }
        }

        if let Err(e) = self.publisher.publish(event).await {
            tracing::warn!("Failed to publish state change for {}: {}", zone, e);
        }
    }
}
