//! Chunk-continuation analysis: the engine seam, the feeding driver, and the
//! built-in signature engine.

pub mod driver;
pub mod engine;
pub mod offset;
pub mod probe;
mod types;

pub use driver::{AnalyzerDriver, DriverError, DriverOptions, DriverState};
pub use engine::{AnalysisEngine, ContinueStatus, EngineError, EngineFactory};
pub use offset::{NO_SEEK, SeekHalvesError, combine_seek_halves, split_seek_offset};
pub use probe::ProbeEngine;
pub use types::{AnalysisDiagnostics, AnalyzeRequest, AnalyzeResult, Format};
