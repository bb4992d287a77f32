use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Output rendering requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    Xml,
    Html,
    Text,
}

impl Format {
    pub const ALL: [Format; 4] = [Format::Json, Format::Xml, Format::Html, Format::Text];

    /// Case-insensitive; `object` is accepted as an alias of `json`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" | "object" => Some(Format::Json),
            "xml" => Some(Format::Xml),
            "html" => Some(Format::Html),
            "text" | "txt" => Some(Format::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Xml => "xml",
            Format::Html => "html",
            Format::Text => "text",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to one analysis run
#[derive(Debug, Clone, bon::Builder)]
pub struct AnalyzeRequest {
    /// Fetched prefix of the file; may be shorter than `declared_size`
    pub buffer: Bytes,
    pub declared_size: u64,
    #[builder(into)]
    pub filename: String,
    /// Ordered, duplicate-free
    pub formats: Vec<Format>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDiagnostics {
    /// Per-format rendering failures, keyed by format identifier
    #[serde(default)]
    pub format_errors: BTreeMap<String, String>,
    #[serde(default)]
    pub steps: u32,
    #[serde(default)]
    pub seeks: u32,
    #[serde(default)]
    pub bytes_fed: u64,
    #[serde(default)]
    pub final_offset: u64,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub engine: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    pub results_by_format: BTreeMap<String, String>,
    pub diagnostics: AnalysisDiagnostics,
}
