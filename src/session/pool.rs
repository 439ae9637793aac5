//! The fixed-width pool of session slots
//!
//! A pool owns one tokio task per configured simulated user. Each slot runs
//! sessions back to back: when one session's duration expires, the slot
//! immediately starts a fresh one with a new fingerprint, so the number of
//! live users stays constant for the whole run.
//!
//! Shutdown is two-phase: a broadcast signal plus a shared stop flag ask every
//! slot to drain, and slots still alive after the grace period are aborted.
//! The flag is needed because a broadcast message is consumed by whichever
//! `recv` happens to be polling; the flag is what stops a slot from starting
//! its next session.

use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, Target};
use crate::error::ValidationError;
use crate::metrics::MetricsAggregator;
use crate::session::limiter::InflightLimiter;
use crate::session::runner::SessionRunner;
use crate::sitemap::Sitemap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A running set of session slots plus the machinery to stop them
pub struct SessionPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
    stop_flag: Arc<AtomicBool>,
    limiter: Arc<InflightLimiter>,
    active: Arc<AtomicUsize>,
}

impl SessionPool {
    /// Spawn one slot task per configured simulated user
    pub fn spawn(
        config: Arc<EngineConfig>,
        sitemap: Arc<Sitemap>,
        dispatcher: Arc<dyn Dispatcher>,
        metrics: Arc<MetricsAggregator>,
    ) -> Result<Self, ValidationError> {
        let target = Target::from_config(&config)?;
        let limiter = Arc::new(InflightLimiter::new(config.rate_limit));
        let (shutdown_tx, _) = broadcast::channel(1);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let next_id = Arc::new(AtomicU64::new(1));

        let slots = config.simulated_users;
        let mut handles = Vec::with_capacity(slots);
        for slot in 0..slots {
            // Subscribe before the task starts so no signal can be missed.
            let mut shutdown_rx = shutdown_tx.subscribe();
            let config = Arc::clone(&config);
            let sitemap = Arc::clone(&sitemap);
            let dispatcher = Arc::clone(&dispatcher);
            let metrics = Arc::clone(&metrics);
            let limiter = Arc::clone(&limiter);
            let stop_flag = Arc::clone(&stop_flag);
            let active = Arc::clone(&active);
            let next_id = Arc::clone(&next_id);
            let target = target.clone();

            handles.push(tokio::spawn(async move {
                while !stop_flag.load(Ordering::Acquire) {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    let runner = SessionRunner::new(
                        id,
                        Arc::clone(&config),
                        Arc::clone(&sitemap),
                        target.clone(),
                        Arc::clone(&dispatcher),
                        Arc::clone(&limiter),
                        Arc::clone(&metrics),
                    );
                    active.fetch_add(1, Ordering::AcqRel);
                    runner.run(&mut shutdown_rx).await;
                    active.fetch_sub(1, Ordering::AcqRel);
                }
                tracing::debug!(slot, "session slot drained");
            }));
        }

        tracing::info!(
            sessions = slots,
            rate_limit = limiter.capacity(),
            target = %config.target_url,
            "session pool started"
        );
        Ok(Self {
            handles,
            shutdown_tx,
            stop_flag,
            limiter,
            active,
        })
    }

    /// Sessions currently between start and finish
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stop every slot, waiting at most `grace` before aborting stragglers
    pub async fn shutdown(self, grace: Duration) {
        self.stop_flag.store(true, Ordering::Release);
        // No receivers is fine: every slot has already exited.
        let _ = self.shutdown_tx.send(());
        self.limiter.close();

        let deadline = Instant::now() + grace;
        let mut aborted = 0usize;
        for mut handle in self.handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            tracing::warn!(aborted, "session slots exceeded the grace period");
        }
        tracing::info!("session pool stopped");
    }
}
