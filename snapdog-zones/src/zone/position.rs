//! Position tracking while a zone plays
//!
//! Two producers feed the same snapshot: a fixed-interval timer that polls
//! the player status, and the player's own event stream for updates between
//! ticks. Both merge through `ZoneInner::observe`, where the newest
//! observation wins regardless of arrival order.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::machine::ZoneInner;
use crate::model::{PlayerEvent, PositionUpdate, ZoneIndex};

pub(super) struct PositionTracker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PositionTracker {
    pub(super) fn spawn(
        zone: Weak<ZoneInner>,
        index: ZoneIndex,
        events: broadcast::Receiver<PlayerEvent>,
        period: Duration,
        parent: &CancellationToken,
    ) -> Self {
        let cancel = parent.child_token();
        let handle = tokio::spawn(track_position(zone, index, events, period, cancel.clone()));
        Self { cancel, handle }
    }

    /// Signal the task to stop without waiting for it
    pub(super) fn stop(self) {
        self.cancel.cancel();
    }

    /// Signal the task to stop and wait until it has exited
    pub(super) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Position tracker ended abnormally: {}", e);
        }
    }

    pub(super) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

async fn track_position(
    zone: Weak<ZoneInner>,
    index: ZoneIndex,
    mut events: broadcast::Receiver<PlayerEvent>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately
    ticker.tick().await;

    let mut events_open = true;
    tracing::debug!("Position tracking started for {}", index);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                let Some(zone) = zone.upgrade() else { break };
                zone.refresh_from_player(&cancel).await;
            }

            event = events.recv(), if events_open => match event {
                Ok(event) if event.zone() == index => {
                    let Some(zone) = zone.upgrade() else { break };
                    zone.observe(&PositionUpdate::from_event(&event), true);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("{} skipped {} player events", index, skipped);
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("Player event stream for {} closed", index);
                    events_open = false;
                }
            },
        }
    }

    tracing::debug!("Position tracking stopped for {}", index);
}
