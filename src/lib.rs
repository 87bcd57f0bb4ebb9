pub mod core;
pub mod logging;

pub use crate::core::config::Config;
pub use crate::core::runs::{DispatchGate, ResumeSweep, RunOrchestrator};
pub use crate::core::store::SqliteStore;
