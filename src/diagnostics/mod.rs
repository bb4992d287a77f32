//! Per-request diagnostics
//!
//! Components publish typed [`DiagnosticEvent`]s into an explicit
//! [`RequestContext`]. Subscribers fold them into the context; the owning
//! [`RequestScope`] writes one redacted, tail-sampled record when it goes out of scope.

mod bus;
mod context;
pub mod redact;
mod sampling;
mod scope;

pub use bus::{
    ArchiveHint, ContextRecorder, DiagnosticEvent, DiagnosticSubscriber, DiagnosticsBus,
    TokenSummary, VerificationSummary,
};
pub use context::{HttpMetadata, RequestContext, Severity};
pub use sampling::{SampleDecision, TailSampler};
pub use scope::{REQUEST_LOG_TARGET, RequestLogger, RequestScope};
