pub mod analyzer;
pub mod api;
pub mod config;
pub mod diagnostics;
pub mod fetch;
pub mod humanize;
pub mod observability;
pub mod server;
