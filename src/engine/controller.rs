//! The run controller behind the control plane's start/stop/status verbs

use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, HttpDispatcher};
use crate::engine::EngineState;
use crate::error::EngineError;
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::session::SessionPool;
use crate::sitemap::Sitemap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// How long a stop waits for sessions to drain before aborting them
const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Owns at most one running traffic simulation and its lifecycle
///
/// The controller is the engine's single entry point: `start`, `stop`,
/// `update`, `current_metrics`, and `state` are each safe to call from any
/// task at any time. `state` and `current_metrics` never block on a running
/// start or stop.
pub struct EngineController {
    state: RwLock<EngineState>,
    // Serializes start/stop; held across the drain await.
    pool: tokio::sync::Mutex<Option<SessionPool>>,
    metrics: Mutex<Arc<MetricsAggregator>>,
    config: Mutex<Option<Arc<EngineConfig>>>,
    grace: Duration,
}

impl Default for EngineController {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineController {
    /// A controller with no run in progress
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState::Stopped),
            pool: tokio::sync::Mutex::new(None),
            metrics: Mutex::new(Arc::new(MetricsAggregator::new())),
            config: Mutex::new(None),
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Override the stop grace period
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Start a run against the real HTTP transport
    pub async fn start(&self, config: EngineConfig, sitemap: Sitemap) -> Result<(), EngineError> {
        config.validate()?;
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(&config)?);
        self.start_with_dispatcher(config, sitemap, dispatcher)
            .await
    }

    /// Start a run over a caller-supplied transport
    pub async fn start_with_dispatcher(
        &self,
        config: EngineConfig,
        sitemap: Sitemap,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<(), EngineError> {
        config.validate()?;
        sitemap.validate()?;

        let mut pool_slot = self.pool.lock().await;
        if pool_slot.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        self.set_state(EngineState::Initializing);

        let config = Arc::new(config);
        let sitemap = Arc::new(sitemap);
        let metrics = Arc::new(MetricsAggregator::new());

        let pool = match SessionPool::spawn(
            Arc::clone(&config),
            sitemap,
            dispatcher,
            Arc::clone(&metrics),
        ) {
            Ok(pool) => pool,
            Err(error) => {
                self.set_state(EngineState::Stopped);
                return Err(error.into());
            }
        };

        *pool_slot = Some(pool);
        *self
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = metrics;
        *self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(config);
        self.set_state(EngineState::Running);
        Ok(())
    }

    /// Stop the current run, if any; idempotent
    ///
    /// Returns once every session has drained or the grace period has passed
    /// and the stragglers were aborted.
    pub async fn stop(&self) {
        let mut pool_slot = self.pool.lock().await;
        let Some(pool) = pool_slot.take() else {
            self.set_state(EngineState::Stopped);
            return;
        };
        self.set_state(EngineState::Stopping);
        pool.shutdown(self.grace).await;
        self.set_state(EngineState::Stopped);
    }

    /// Stage a new configuration for the next run
    ///
    /// Rejected unless the engine is fully stopped; a live run never picks up
    /// configuration changes.
    pub fn update(&self, config: EngineConfig) -> Result<(), EngineError> {
        if self.state() != EngineState::Stopped {
            return Err(EngineError::RejectedWhileRunning);
        }
        config.validate()?;
        *self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(config));
        Ok(())
    }

    /// The most recently started or staged configuration
    pub fn stored_config(&self) -> Option<Arc<EngineConfig>> {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the current (or last) run's metrics
    pub fn current_metrics(&self) -> MetricsSnapshot {
        let metrics = Arc::clone(
            &self
                .metrics
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        metrics.snapshot(self.state())
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        *self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::info!(from = ?*state, to = ?next, "engine state change");
            *state = next;
        }
    }
}
