//! Session scheduling: the per-user runner, the slot pool, and the shared
//! in-flight cap

pub mod limiter;
pub mod pool;
pub mod runner;

pub use limiter::InflightLimiter;
pub use pool::SessionPool;
pub use runner::{SessionRunner, SessionState, SessionStateHandle};

#[cfg(test)]
mod tests;
