//! Periodic cache resync.
//!
//! Runs a full branch resync on an interval and services reconciliation
//! requests (failed publish cache writes, deferred webhook paths) as they
//! arrive on the broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{CacheReconciler, ReconcileRequest};

pub struct ResyncScheduler {
    reconciler: Arc<CacheReconciler>,
    branch: String,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl ResyncScheduler {
    pub fn new(reconciler: Arc<CacheReconciler>, branch: impl Into<String>, interval: Duration) -> Self {
        Self {
            reconciler,
            branch: branch.into(),
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the loop on a background thread with its own runtime.
    pub fn start(&self, mut requests: broadcast::Receiver<ReconcileRequest>) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = Arc::clone(&self.shutdown);
        let branch = self.branch.clone();
        let interval = self.interval;

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to start resync runtime: {}", e);
                    return;
                }
            };

            rt.block_on(async {
                let mut timer = tokio::time::interval(interval);
                timer.tick().await; // skip immediate first tick

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let request = tokio::select! {
                        _ = timer.tick() => ReconcileRequest::Branch { branch: branch.clone() },
                        received = requests.recv() => match received {
                            Ok(request) => request,
                            Err(RecvError::Lagged(skipped)) => {
                                log::warn!("Dropped {} reconcile requests; running a full resync", skipped);
                                ReconcileRequest::Branch { branch: branch.clone() }
                            }
                            Err(RecvError::Closed) => break,
                        },
                    };

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    match reconciler.handle(&request).await {
                        Ok(report) if report.changed() > 0 => {
                            log::info!("Resync {:?}: {} entries changed", request, report.changed());
                        }
                        Ok(_) => {}
                        Err(e) => log::error!("Resync {:?} failed: {}", request, e),
                    }
                }
            });
        })
    }

    /// Signals the loop to stop after its current run.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
