//! Formula engine lifecycle for sheetmend workbooks.
//!
//! The cell/sheet model stays the source of truth; each workbook gets a
//! derived, rebuildable engine projection that is created lazily, bracketed
//! by suspend/resume around batches, and evicted when idle.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod instance;
pub mod manager;

pub use clock::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use config::EngineConfig;
pub use engine::{EngineFactory, FormualizerEngine, FormualizerFactory, FormulaEngine};
pub use error::EngineError;
pub use instance::{EngineInstance, EvaluationState, ResyncReport, SyncFailure};
pub use manager::{EngineHandle, EngineManager, SweeperHandle};
