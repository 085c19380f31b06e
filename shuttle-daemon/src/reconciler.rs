//! Periodic full reconcile.
//!
//! Every interval the reconciler asks the engine for a bidirectional pass.
//! A tick that finds the previous pass still running is skipped and counted;
//! passes never queue up and never overlap. The same gate guards on-demand
//! passes requested over the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

use shuttle_sync::{PassSummary, SyncEngine};

use crate::error::DaemonError;

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// At most one holder at a time; entering never blocks.
#[derive(Debug, Default)]
pub struct TickGate {
    busy: AtomicBool,
}

/// Held for the duration of one pass; releases the gate on drop.
#[derive(Debug)]
pub struct PassGuard {
    gate: Arc<TickGate>,
}

impl TickGate {
    pub fn try_enter(self: &Arc<Self>) -> Option<PassGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard { gate: self.clone() })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PassRecord {
    pub trigger: &'static str,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u128,
    pub summary: PassSummary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcilerStatus {
    pub interval_secs: u64,
    pub running: bool,
    pub passes: u64,
    pub skipped_ticks: u64,
    pub failed_passes: u64,
    pub last_pass: Option<PassRecord>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Reconciler {
    engine: Arc<SyncEngine>,
    interval: Duration,
    gate: Arc<TickGate>,
    status: Arc<RwLock<ReconcilerStatus>>,
}

impl Reconciler {
    pub fn new(engine: Arc<SyncEngine>, interval: Duration) -> Self {
        let status = ReconcilerStatus {
            interval_secs: interval.as_secs(),
            ..ReconcilerStatus::default()
        };
        Self {
            engine,
            interval,
            gate: Arc::new(TickGate::default()),
            status: Arc::new(RwLock::new(status)),
        }
    }

    pub async fn status(&self) -> ReconcilerStatus {
        let mut status = self.status.read().await.clone();
        status.running = self.gate.is_busy();
        status
    }

    /// Tick until shutdown. The first pass starts immediately.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    let Some(guard) = self.gate.try_enter() else {
                        self.status.write().await.skipped_ticks += 1;
                        tracing::debug!("reconcile tick skipped, previous pass still running");
                        continue;
                    };
                    let this = self.clone();
                    tokio::spawn(async move {
                        let _guard = guard;
                        // Failures are recorded in the status.
                        let _ = this.execute("timer").await;
                    });
                }
            }
        }
        Ok(())
    }

    /// Run one pass now unless one is already running.
    pub async fn run_now(&self) -> Result<PassSummary, DaemonError> {
        let _guard = self.gate.try_enter().ok_or(DaemonError::PassInProgress)?;
        self.execute("request").await
    }

    async fn execute(&self, trigger: &'static str) -> Result<PassSummary, DaemonError> {
        let started = Instant::now();
        let engine = self.engine.clone();
        let joined = tokio::task::spawn_blocking(move || engine.reconcile()).await;

        let result = match joined {
            Ok(Ok(reports)) => Ok(PassSummary::from_reports(&reports)),
            Ok(Err(err)) => {
                tracing::warn!(trigger, error = %err, "reconcile pass failed");
                Err(DaemonError::Sync(err))
            }
            Err(err) => {
                tracing::error!(trigger, error = %err, "reconcile pass aborted");
                Err(DaemonError::Protocol(format!("reconcile task join failure: {err}")))
            }
        };

        let mut status = self.status.write().await;
        match &result {
            Ok(summary) => {
                status.passes += 1;
                status.last_pass = Some(PassRecord {
                    trigger,
                    finished_at: Utc::now(),
                    duration_ms: started.elapsed().as_millis(),
                    summary: summary.clone(),
                });
            }
            Err(_) => status.failed_passes += 1,
        }
        result
    }
}
