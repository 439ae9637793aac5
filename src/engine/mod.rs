//! Engine lifecycle: the externally visible state machine and its controller

mod controller;

pub use controller::EngineController;

use serde::{Deserialize, Serialize};

/// Externally visible lifecycle of the engine
///
/// Transitions are strictly `Stopped -> Initializing -> Running ->
/// Stopping -> Stopped`; there is no pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// A start was accepted; the pool is being assembled
    Initializing,
    /// Sessions are generating traffic
    Running,
    /// A stop was accepted; sessions are draining
    Stopping,
    /// No run in progress
    Stopped,
}
