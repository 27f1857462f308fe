// Library crate - exports the signal engine, its data types and local feeds

pub mod types;
pub mod config;
pub mod signal_core;
pub mod feeds;
pub mod engine;

// Re-export commonly used types
pub use types::*;
pub use config::EngineConfig;
pub use engine::{CycleReport, EngineEvent, InstrumentReport, MacroContext, SignalEngine};
