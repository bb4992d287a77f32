//! HTTP surface: the public gateway and the analyzer service.

pub mod delegate;
pub mod error;
pub mod gateway;
pub mod grant;
pub mod models;
pub mod rate_limit;
mod server;
pub mod services;
pub mod state;
pub mod turnstile;
pub(crate) mod utils;
pub mod validation;

pub use delegate::{Delegate, DelegateError, DelegateOutcome, LocalDelegate, RpcDelegate};
pub use error::{AnalyzeError, ErrorCode};
pub use server::{analyzer_router, gateway_router, run_analyzer, run_gateway};
pub use state::AppState;
