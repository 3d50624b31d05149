//! Topology reconciler
//!
//! Keeps the audio backend's grouping in line with the zone model. A pass
//! reads the client assignments and the backend topology once, then plans
//! and applies corrections zone by zone:
//!
//! ```text
//! clients ──┐
//!           ├─► DesiredZone ─► plan_zone ─► [Correction] ─► backend
//! topology ─┘                      ▲                          │
//!                                  └──── local topology ◄─────┘
//! ```
//!
//! Passes run on a timer and on demand. Both go through a single-flight
//! gate: a request arriving while a pass is running returns immediately,
//! since the running pass already works from fresh data.

mod plan;

pub use plan::{
    converged_group, plan_zone, select_target, Correction, DesiredClient, DesiredZone,
    StreamClaims, ZonePlan,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Result, ServiceError, ZoneError};
use crate::model::{GroupId, Topology, ZoneIndex};
use crate::registry::ZoneRegistry;
use crate::services::{cancellable, AudioGroupBackend, ClientDirectory, ServiceResult};
use crate::zone::ZoneStateMachine;

/// Result of reconciling one zone
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneSyncOutcome {
    /// Already correct, no backend calls issued
    Converged { group: GroupId },
    /// Corrected with this many backend calls
    Corrected { group: GroupId, calls: usize },
    /// No clients with a backend id are assigned
    SkippedNoClients,
    /// Will be retried on the next pass
    Failed(ReconcileError),
}

impl ZoneSyncOutcome {
    pub fn calls(&self) -> usize {
        match self {
            ZoneSyncOutcome::Corrected { calls, .. } => *calls,
            _ => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ZoneSyncOutcome::Failed(_))
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// The gate was busy; no work was done
    pub skipped: bool,
    /// The pass could not read its inputs
    pub failure: Option<ReconcileError>,
    /// Per-zone outcomes in index order
    pub zones: Vec<(ZoneIndex, ZoneSyncOutcome)>,
}

impl PassReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    fn failed(error: ReconcileError) -> Self {
        Self {
            failure: Some(error),
            ..Default::default()
        }
    }

    pub fn outcome(&self, zone: ZoneIndex) -> Option<&ZoneSyncOutcome> {
        self.zones
            .iter()
            .find(|(index, _)| *index == zone)
            .map(|(_, outcome)| outcome)
    }

    /// Backend calls issued during the pass
    pub fn total_calls(&self) -> usize {
        self.zones.iter().map(|(_, outcome)| outcome.calls()).sum()
    }

    pub fn failed_zones(&self) -> Vec<ZoneIndex> {
        self.zones
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(index, _)| *index)
            .collect()
    }
}

/// Converges backend group topology towards the zone model
#[derive(Clone)]
pub struct TopologyReconciler {
    inner: Arc<ReconcilerInner>,
}

struct ReconcilerInner {
    registry: Arc<ZoneRegistry>,
    backend: Arc<dyn AudioGroupBackend>,
    clients: Arc<dyn ClientDirectory>,
    config: ReconcilerConfig,
    gate: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    passes: AtomicU64,
}

impl TopologyReconciler {
    pub fn new(
        registry: Arc<ZoneRegistry>,
        backend: Arc<dyn AudioGroupBackend>,
        clients: Arc<dyn ClientDirectory>,
        config: ReconcilerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ReconcilerInner {
                registry,
                backend,
                clients,
                config,
                gate: Arc::new(tokio::sync::Mutex::new(())),
                cancel,
                loop_task: Mutex::new(None),
                passes: AtomicU64::new(0),
            }),
        }
    }

    /// Run one pass over every zone, unless a pass is already running
    pub async fn ensure_all_zones_converged(&self) -> PassReport {
        let Ok(_guard) = self.inner.gate.try_lock() else {
            tracing::debug!("Reconciliation already in progress, skipping pass");
            return PassReport::skipped();
        };
        self.inner.run_pass(None).await
    }

    /// Reconcile a single zone against fresh data
    ///
    /// Waits for a running pass to finish instead of skipping.
    pub async fn synchronize_zone(&self, index: ZoneIndex) -> Result<ZoneSyncOutcome> {
        self.inner.registry.get(index).await?;

        let _guard = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => {
                return Err(ZoneError::Service(ServiceError::Cancelled));
            }
            guard = self.inner.gate.lock() => guard,
        };

        let report = self.inner.run_pass(Some(index)).await;
        if let Some(outcome) = report.outcome(index) {
            return Ok(outcome.clone());
        }
        match report.failure {
            Some(failure) => Ok(ZoneSyncOutcome::Failed(failure)),
            None => Err(ZoneError::ZoneNotFound(index)),
        }
    }

    /// Start a pass in the background
    ///
    /// Returns `false` if a pass is already running; that pass reads fresh
    /// data and covers this request.
    pub fn trigger_immediate_regrouping(&self) -> bool {
        let Ok(guard) = self.inner.gate.clone().try_lock_owned() else {
            tracing::debug!("Regrouping requested while a pass is running");
            return false;
        };

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = guard;
            let report = inner.run_pass(None).await;
            tracing::debug!(
                "Immediate regrouping finished with {} backend calls",
                report.total_calls()
            );
        });
        true
    }

    /// Start the periodic loop; the first pass runs immediately
    pub fn start(&self) {
        if !self.inner.config.enabled {
            tracing::info!("Topology reconciler disabled by configuration");
            return;
        }

        let mut task = self.inner.loop_task.lock();
        if task.is_some() {
            return;
        }

        let reconciler = self.clone();
        *task = Some(tokio::spawn(async move { reconciler.run_loop().await }));
        tracing::info!(
            "Topology reconciler started (interval {:?})",
            self.inner.config.interval()
        );
    }

    async fn run_loop(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.ensure_all_zones_converged().await;
                    if !report.skipped && report.failure.is_none() {
                        tracing::trace!(
                            "Periodic pass: {} zones, {} calls",
                            report.zones.len(),
                            report.total_calls()
                        );
                    }
                }
            }
        }

        tracing::debug!("Topology reconciler loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .loop_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Number of passes started so far
    pub fn pass_count(&self) -> u64 {
        self.inner.passes.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait for any running pass to finish
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let task = self.inner.loop_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Topology reconciler loop ended abnormally: {}", e);
            }
        }
        let _idle = self.inner.gate.lock().await;
        tracing::debug!("Topology reconciler shut down");
    }
}

impl ReconcilerInner {
    async fn run_pass(&self, only: Option<ZoneIndex>) -> PassReport {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let zones = self.registry.zones().await;
        let claims = StreamClaims::new(zones.iter().map(|z| (z.index(), z.stream_id())));

        let clients = match cancellable(&self.cancel, self.clients.all_clients()).await {
            Ok(clients) => clients,
            Err(e) => {
                let error = ReconcileError::DirectoryUnavailable(e);
                tracing::warn!("Reconciliation pass {} aborted: {}", pass, error);
                return PassReport::failed(error);
            }
        };
        let mut topology = match cancellable(&self.cancel, self.backend.topology()).await {
            Ok(topology) => topology,
            Err(e) => {
                let error = ReconcileError::BackendUnavailable(e);
                tracing::warn!("Reconciliation pass {} aborted: {}", pass, error);
                return PassReport::failed(error);
            }
        };

        let mut report = PassReport::default();
        for zone in zones
            .iter()
            .filter(|z| only.map_or(true, |index| z.index() == index))
        {
            if self.cancel.is_cancelled() {
                break;
            }

            let desired =
                DesiredZone::from_clients(zone.index(), zone.name(), zone.stream_id(), &clients);
            let outcome = self.sync_zone(zone, &desired, &mut topology, &claims).await;

            match &outcome {
                ZoneSyncOutcome::Failed(e) => {
                    tracing::warn!("{} not converged: {}", zone.index(), e);
                }
                ZoneSyncOutcome::Corrected { group, calls } => {
                    tracing::info!(
                        "{} converged onto group {} with {} backend calls",
                        zone.index(),
                        group,
                        calls
                    );
                }
                _ => {}
            }
            report.zones.push((zone.index(), outcome));
        }

        tracing::debug!(
            "Reconciliation pass {} done: {} zones, {} calls, {} failed",
            pass,
            report.zones.len(),
            report.total_calls(),
            report.failed_zones().len()
        );
        report
    }

    async fn sync_zone(
        &self,
        zone: &ZoneStateMachine,
        desired: &DesiredZone,
        topology: &mut Topology,
        claims: &StreamClaims,
    ) -> ZoneSyncOutcome {
        let plan = match plan_zone(desired, topology, claims, self.config.sync_client_names) {
            Ok(plan) => plan,
            Err(e) => return ZoneSyncOutcome::Failed(e),
        };

        match plan {
            ZonePlan::Skip => ZoneSyncOutcome::SkippedNoClients,
            ZonePlan::Converged { group } => {
                self.record_group(zone, &group).await;
                ZoneSyncOutcome::Converged { group }
            }
            ZonePlan::Correct {
                group,
                corrections,
                displaced,
            } => {
                if let Some(other) = displaced {
                    tracing::warn!(
                        "{} takes over group {} which carries the stream of {}",
                        zone.index(),
                        group,
                        other
                    );
                }

                let mut calls = 0;
                for correction in &corrections {
                    if let Err(source) = self.apply(correction).await {
                        return ZoneSyncOutcome::Failed(ReconcileError::Correction {
                            zone: zone.index(),
                            source,
                        });
                    }
                    correction.apply_to(topology);
                    calls += 1;
                }

                self.record_group(zone, &group).await;
                ZoneSyncOutcome::Corrected { group, calls }
            }
        }
    }

    async fn apply(&self, correction: &Correction) -> ServiceResult<()> {
        tracing::debug!("Applying {:?}", correction);
        let call = async {
            match correction {
                Correction::SetStream { group, stream } => {
                    self.backend.set_group_stream(group, stream).await
                }
                Correction::SetName { group, name } => self.backend.set_group_name(group, name).await,
                Correction::SetClients { group, clients } => {
                    self.backend.set_group_clients(group, clients).await
                }
                Correction::SetClientName { client, name } => {
                    self.backend.set_client_name(client, name).await
                }
            }
        };
        cancellable(&self.cancel, call).await
    }

    async fn record_group(&self, zone: &ZoneStateMachine, group: &GroupId) {
        if let Err(e) = zone.set_group_id(Some(group.clone())).await {
            tracing::debug!("Could not record group {} for {}: {}", group, zone.index(), e);
        }
    }
}
