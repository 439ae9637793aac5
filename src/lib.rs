//! Configurable HTTP traffic simulation engine
//!
//! The engine drives a fixed population of simulated users against a single
//! target. Each user runs sessions of random duration, optionally logging in
//! first, then issuing requests drawn from a declarative sitemap with
//! per-session browser or API-client fingerprints. A global in-flight cap
//! bounds pressure on the target and a shared aggregator exposes run metrics.
//!
//! [`EngineController`] is the entry point:
//!
//! ```no_run
//! use trafficgen::{EngineConfig, EngineController, Sitemap};
//!
//! # async fn run(config: EngineConfig, sitemap: Sitemap) -> Result<(), trafficgen::EngineError> {
//! let engine = EngineController::new();
//! engine.start(config, sitemap).await?;
//! let snapshot = engine.current_metrics();
//! println!("rps: {}", snapshot.rps);
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod session;
pub mod sitemap;
pub mod vars;

pub use auth::{AuthFlowExecutor, CredentialContext};
pub use config::EngineConfig;
pub use dispatch::{Dispatcher, HttpDispatcher, Outcome, SimRequest, Target};
pub use engine::{EngineController, EngineState};
pub use error::{AuthError, DispatchError, EngineError, ValidationError};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use sitemap::Sitemap;
pub use vars::VariableResolver;
