//! Chunk-feeding protocol around an [`AnalysisEngine`].

use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use super::engine::{AnalysisEngine, EngineError};
use super::offset::SeekHalvesError;
use super::types::{AnalysisDiagnostics, AnalyzeRequest, AnalyzeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    Feeding,
    SeekRequested,
    Finalizing,
    Done,
    Failed,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Init => "init",
            DriverState::Feeding => "feeding",
            DriverState::SeekRequested => "seek_requested",
            DriverState::Finalizing => "finalizing",
            DriverState::Done => "done",
            DriverState::Failed => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("engine failed while {}: {source}", state.as_str())]
    Engine {
        state: DriverState,
        #[source]
        source: EngineError,
    },

    #[error("engine requested seek to {offset} outside of [0, {size})")]
    SeekOutOfRange { offset: u64, size: u64 },

    #[error("engine reported an unusable seek position: {0}")]
    InvalidSeek(#[from] SeekHalvesError),

    #[error("analysis exceeded its budget of {max_steps} engine steps")]
    BudgetExceeded { max_steps: u32 },

    #[error("analysis resource budget exceeded: {0}")]
    ResourceExhausted(String),

    #[error("no requested format could be rendered")]
    NoFormatRendered {
        format_errors: std::collections::BTreeMap<String, String>,
    },

    #[error("no output formats requested")]
    NoFormats,
}

impl DriverError {
    fn engine(state: DriverState, source: EngineError) -> Self {
        match source {
            EngineError::ResourceExhausted(message) => DriverError::ResourceExhausted(message),
            source => DriverError::Engine { state, source },
        }
    }

    /// True when a retry on a lighter input might succeed
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            DriverError::BudgetExceeded { .. } | DriverError::ResourceExhausted(_)
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    pub chunk_size: usize,
    pub max_steps: u32,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            max_steps: 100_000,
        }
    }
}

/// Feeds an in-memory buffer into an engine, honoring its seek requests.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerDriver {
    options: DriverOptions,
}

impl AnalyzerDriver {
    pub fn new(options: DriverOptions) -> Self {
        Self {
            options: DriverOptions {
                chunk_size: options.chunk_size.max(1),
                max_steps: options.max_steps.max(1),
            },
        }
    }

    pub fn options(&self) -> DriverOptions {
        self.options
    }

    pub fn analyze(
        &self,
        engine: &mut dyn AnalysisEngine,
        request: &AnalyzeRequest,
    ) -> Result<AnalyzeResult, DriverError> {
        if request.formats.is_empty() {
            return Err(DriverError::NoFormats);
        }

        let started = Instant::now();
        let mut session = Session::new(&self.options, request);

        let outcome = session.run(engine);
        let mut diagnostics = session.diagnostics;
        diagnostics.engine = engine.name().to_string();
        diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(err) = outcome {
            warn!(
                filename = %request.filename,
                steps = diagnostics.steps,
                error = %err,
                "Analysis failed"
            );
            return Err(err);
        }

        let mut results_by_format = std::collections::BTreeMap::new();
        for format in &request.formats {
            match engine.render(*format) {
                Ok(rendered) => {
                    results_by_format.insert(format.as_str().to_string(), rendered);
                }
                Err(EngineError::ResourceExhausted(message)) => {
                    return Err(DriverError::ResourceExhausted(message));
                }
                Err(err) => {
                    warn!(format = %format, error = %err, "Format rendering failed");
                    diagnostics
                        .format_errors
                        .insert(format.as_str().to_string(), err.to_string());
                }
            }
        }

        if results_by_format.is_empty() {
            return Err(DriverError::NoFormatRendered {
                format_errors: diagnostics.format_errors,
            });
        }

        debug!(
            filename = %request.filename,
            steps = diagnostics.steps,
            seeks = diagnostics.seeks,
            bytes_fed = diagnostics.bytes_fed,
            "Analysis completed"
        );

        Ok(AnalyzeResult {
            results_by_format,
            diagnostics,
        })
    }
}

/// Mutable state of one feeding run
struct Session<'a> {
    options: &'a DriverOptions,
    buffer: &'a [u8],
    size: u64,
    filename: &'a str,
    state: DriverState,
    cursor: u64,
    last_chunk_len: u64,
    diagnostics: AnalysisDiagnostics,
}

impl<'a> Session<'a> {
    fn new(options: &'a DriverOptions, request: &'a AnalyzeRequest) -> Self {
        Self {
            options,
            buffer: &request.buffer,
            size: request.declared_size,
            filename: &request.filename,
            state: DriverState::Init,
            cursor: 0,
            last_chunk_len: 0,
            diagnostics: AnalysisDiagnostics::default(),
        }
    }

    /// Readable bytes end at whichever comes first: the buffer or the declared size.
    fn available_end(&self) -> u64 {
        (self.buffer.len() as u64).min(self.size)
    }

    fn run(&mut self, engine: &mut dyn AnalysisEngine) -> Result<(), DriverError> {
        let result = self.step_until_done(engine);
        if result.is_err() {
            self.state = DriverState::Failed;
        }
        self.diagnostics.final_offset = self.cursor;
        result
    }

    fn step_until_done(&mut self, engine: &mut dyn AnalysisEngine) -> Result<(), DriverError> {
        loop {
            match self.state {
                DriverState::Init => {
                    engine.set_option("File_FileName", self.filename);
                    engine
                        .init_buffer(self.size, 0)
                        .map_err(|e| DriverError::engine(DriverState::Init, e))?;
                    self.cursor = 0;
                    self.state = DriverState::Feeding;
                }
                DriverState::Feeding => self.feed(engine)?,
                DriverState::SeekRequested => self.resolve_seek(engine)?,
                DriverState::Finalizing => {
                    engine
                        .finalize()
                        .map_err(|e| DriverError::engine(DriverState::Finalizing, e))?;
                    self.state = DriverState::Done;
                }
                DriverState::Done => return Ok(()),
                DriverState::Failed => unreachable!("failed sessions return early"),
            }
        }
    }

    fn feed(&mut self, engine: &mut dyn AnalysisEngine) -> Result<(), DriverError> {
        let end = self.available_end();
        if self.cursor >= end {
            self.state = DriverState::Finalizing;
            return Ok(());
        }

        if self.diagnostics.steps >= self.options.max_steps {
            return Err(DriverError::BudgetExceeded {
                max_steps: self.options.max_steps,
            });
        }

        let chunk_end = end.min(self.cursor + self.options.chunk_size as u64);
        let chunk = &self.buffer[self.cursor as usize..chunk_end as usize];

        self.diagnostics.steps += 1;
        self.diagnostics.bytes_fed += chunk.len() as u64;
        self.last_chunk_len = chunk.len() as u64;

        let status = engine
            .continue_buffer(chunk)
            .map_err(|e| DriverError::engine(DriverState::Feeding, e))?;

        self.state = if status.is_enough_data() {
            DriverState::Finalizing
        } else {
            DriverState::SeekRequested
        };
        Ok(())
    }

    fn resolve_seek(&mut self, engine: &mut dyn AnalysisEngine) -> Result<(), DriverError> {
        match engine.seek_target()? {
            None => self.cursor += self.last_chunk_len,
            Some(offset) => {
                if offset >= self.size {
                    return Err(DriverError::SeekOutOfRange {
                        offset,
                        size: self.size,
                    });
                }
                engine
                    .init_buffer(self.size, offset)
                    .map_err(|e| DriverError::engine(DriverState::SeekRequested, e))?;
                self.diagnostics.seeks += 1;
                self.cursor = offset;
            }
        }
        self.state = DriverState::Feeding;
        Ok(())
    }
}
