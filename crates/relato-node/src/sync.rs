//! Sync coordinator
//!
//! Drains locally authored pending records to the remote incident service
//! whenever the network is available. Peer-received records never appear
//! in the drain: the store excludes `NeverSync` rows at the query level
//! and [`mark_synced`](crate::store::IncidentStore::mark_synced) rejects
//! them as a second line of defense.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relato_core::{Result, SyncError};
use tokio::sync::watch;

use crate::remote::{RemoteIncidentService, SubmitOutcome};
use crate::store::IncidentStore;

/// What one drain pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Pending records the pass tried to submit.
    pub attempted: u32,
    /// Records the remote service accepted.
    pub synced: u32,
    /// Records the service rejected or that failed mid-submit.
    pub failed: u32,
}

/// Drives reconciliation between the local store and the remote service.
pub struct SyncCoordinator<S> {
    store: Arc<IncidentStore>,
    service: S,
    network_available: AtomicBool,
}

impl<S: RemoteIncidentService> SyncCoordinator<S> {
    pub fn new(store: Arc<IncidentStore>, service: S) -> Self {
        Self {
            store,
            service,
            network_available: AtomicBool::new(true),
        }
    }

    /// The remote service this coordinator drains into.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Whether the coordinator currently believes the service is reachable.
    pub fn is_network_available(&self) -> bool {
        self.network_available.load(Ordering::SeqCst)
    }

    /// Flip the connectivity flag, e.g. from an OS connectivity callback.
    /// Draining resumes on the next pass after the flag goes up.
    pub fn set_network_available(&self, available: bool) {
        let was = self.network_available.swap(available, Ordering::SeqCst);
        if was != available {
            tracing::info!("network availability changed: {}", available);
        }
    }

    /// One drain pass: submit pending records oldest first.
    ///
    /// An `Unreachable` error aborts the pass immediately and marks the
    /// network down; the untouched remainder stays pending for the next
    /// pass. A `Rejected` outcome counts the record as failed but keeps
    /// draining, so one bad record cannot dam the queue.
    pub async fn drain_pending(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        if !self.is_network_available() {
            tracing::debug!("skipping drain, network unavailable");
            return Ok(report);
        }

        let pending = self.store.list_pending_sync()?;
        if pending.is_empty() {
            return Ok(report);
        }
        tracing::info!("draining {} pending incident(s)", pending.len());

        for incident in pending {
            report.attempted += 1;
            match self.service.submit(&incident).await {
                Ok(SubmitOutcome::Accepted { remote_id }) => {
                    self.store.mark_synced(incident.id, Some(remote_id))?;
                    report.synced += 1;
                }
                Ok(SubmitOutcome::Rejected { reason }) => {
                    tracing::warn!("incident {} rejected: {}", incident.id, reason);
                    report.failed += 1;
                }
                Err(SyncError::Unreachable(reason)) => {
                    tracing::warn!("remote unreachable, aborting drain: {}", reason);
                    self.set_network_available(false);
                    report.failed += 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!("incident {} failed to sync: {}", incident.id, e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "drain complete: {} attempted, {} synced, {} failed",
            report.attempted,
            report.synced,
            report.failed
        );
        Ok(report)
    }

    /// Periodic drain loop. Runs until the shutdown signal fires.
    ///
    /// Each tick optimistically assumes connectivity has returned; an
    /// unreachable service turns it back off until the next tick.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::info!("sync coordinator shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.set_network_available(true);
                    if let Err(e) = self.drain_pending().await {
                        tracing::warn!("drain pass failed: {}", e);
                    }
                }
            }
        }
    }
}
