use thiserror::Error;

use super::offset::{SeekHalvesError, combine_seek_halves};
use super::types::Format;

/// Errors raised by an analysis engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine initialisation failed: {0}")]
    Init(String),
    #[error("engine rejected data: {0}")]
    Data(String),
    #[error("engine has not been finalized")]
    NotFinalized,
    #[error("{format} rendering failed: {message}")]
    Render { format: Format, message: String },
    /// The engine ran out of its CPU/memory allowance
    #[error("analysis resource budget exceeded: {0}")]
    ResourceExhausted(String),
}

/// Status word returned by `continue_buffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContinueStatus(pub u8);

impl ContinueStatus {
    pub const ACCEPTED: u8 = 0x01;
    pub const FILLED: u8 = 0x02;
    pub const UPDATED: u8 = 0x04;
    /// Enough data consumed; stop feeding
    pub const FINALIZED: u8 = 0x08;

    pub fn accepted() -> Self {
        Self(Self::ACCEPTED)
    }

    pub fn enough_data() -> Self {
        Self(Self::ACCEPTED | Self::FILLED | Self::FINALIZED)
    }

    pub fn is_enough_data(&self) -> bool {
        self.0 & Self::FINALIZED != 0
    }
}

/// Chunk-continuation analysis engine.
///
/// Calls arrive strictly in order from one thread: `init_buffer`, then any number of
/// `continue_buffer` / seek queries (with `init_buffer` again after every seek), then
/// `finalize`, then one `render` per requested format.
pub trait AnalysisEngine: Send {
    /// Short identifier used in diagnostics
    fn name(&self) -> &str;

    /// Engine option hook, e.g. `File_FileName`
    fn set_option(&mut self, _key: &str, _value: &str) {}

    fn init_buffer(&mut self, size: u64, offset: u64) -> Result<(), EngineError>;

    fn continue_buffer(&mut self, chunk: &[u8]) -> Result<ContinueStatus, EngineError>;

    /// Pending seek as `(low, high)` signed 32-bit words; `(-1, -1)` when none
    fn seek_target_halves(&mut self) -> (i32, i32);

    /// Pending seek as an absolute offset
    fn seek_target(&mut self) -> Result<Option<u64>, SeekHalvesError> {
        let (low, high) = self.seek_target_halves();
        combine_seek_halves(low, high)
    }

    fn finalize(&mut self) -> Result<(), EngineError>;

    /// Render the finalized result. May reconfigure the engine's output setting.
    fn render(&mut self, format: Format) -> Result<String, EngineError>;
}

/// Creates one fresh engine per analysis
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn AnalysisEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn AnalysisEngine>, EngineError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn AnalysisEngine>, EngineError> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enough_data_bit() {
        assert!(!ContinueStatus::accepted().is_enough_data());
        assert!(ContinueStatus::enough_data().is_enough_data());
        assert!(ContinueStatus(ContinueStatus::FINALIZED).is_enough_data());
        assert!(!ContinueStatus(ContinueStatus::FILLED | ContinueStatus::UPDATED).is_enough_data());
    }
}
