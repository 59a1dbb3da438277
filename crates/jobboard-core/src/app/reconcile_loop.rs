//! ReconcileLoop - `JobQueueReconciler::reconcile` の定期実行
//!
//! # フロー
//! 1. 次の tick を待つ（初回は即時）
//! 2. 全 site を reconcile して結果をログに出す
//! 3. stats を subscriber に配信する
//!
//! 失敗した sweep はログに出して次の tick で再試行する。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::domain::ReconcileStats;
use crate::ports::KeyedStore;
use crate::queue::JobQueueReconciler;

/// ReconcileLoop handle.
/// - `request_shutdown()` で停止（実行中の sweep は最後まで走る）
/// - `shutdown_and_join()` で task の終了まで待てる
pub struct ReconcileLoop {
    shutdown_tx: watch::Sender<bool>,
    stats_rx: watch::Receiver<Option<ReconcileStats>>,
    join: JoinHandle<()>,
}

impl ReconcileLoop {
    pub fn spawn<S>(reconciler: JobQueueReconciler<S>, interval: Duration) -> Self
    where
        S: KeyedStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stats_tx, stats_rx) = watch::channel(None);

        let join = tokio::spawn(async move {
            run(reconciler, interval, shutdown_rx, stats_tx).await;
        });

        Self {
            shutdown_tx,
            stats_rx,
            join,
        }
    }

    /// Latest successful sweep; `None` until the first one completes.
    pub fn subscribe(&self) -> watch::Receiver<Option<ReconcileStats>> {
        self.stats_rx.clone()
    }

    pub fn request_shutdown(&self) {
        // the loop may already have exited
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn run<S: KeyedStore>(
    reconciler: JobQueueReconciler<S>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    stats_tx: watch::Sender<Option<ReconcileStats>>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped counts as shutdown
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        match reconciler.reconcile().await {
            Ok(stats) => {
                for site in &stats.sites {
                    info!(
                        site = %site.site,
                        workers = site.workers.len(),
                        reclaimed = site.reclaimed,
                        claimed = site.claimed,
                        capacity = site.capacity,
                        available = site.available,
                        "reconciled"
                    );
                }
                stats_tx.send_replace(Some(stats));
            }
            Err(e) => warn!(error = %e, "reconcile failed"),
        }
    }
}
