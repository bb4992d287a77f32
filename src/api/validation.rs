use serde_json::Value;
use thiserror::Error;

use crate::analyzer::Format;
use crate::config::AnalyzerConfig;
use crate::fetch::validate_url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Invalid JSON body. Expected an object payload.")]
    NotAnObject,
    #[error("Invalid JSON body.")]
    InvalidJson,
    #[error("Invalid URL provided.")]
    InvalidUrl,
    #[error("format must be a string or an array of strings.")]
    InvalidFormatType,
    #[error("At least one format is required.")]
    NoFormats,
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// A validated analyze call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeInput {
    pub url: String,
    pub formats: Vec<Format>,
}

/// Format identifiers the deployment accepts and falls back to
#[derive(Debug, Clone)]
pub struct FormatPolicy {
    supported: Vec<Format>,
    defaults: Vec<Format>,
}

impl FormatPolicy {
    pub fn new(supported: Vec<Format>, defaults: Vec<Format>) -> Self {
        Self {
            supported,
            defaults,
        }
    }

    /// Config is validated at load, so unknown names are skipped here.
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let parse_all = |names: &[String]| names.iter().filter_map(|n| Format::parse(n)).collect();
        Self::new(parse_all(&config.supported_formats), parse_all(&config.default_formats))
    }

    pub fn supported(&self) -> &[Format] {
        &self.supported
    }

    /// Resolve requested names, keeping first-appearance order and dropping duplicates.
    /// `None` means the caller did not ask for anything and receives the defaults.
    pub fn resolve<S: AsRef<str>>(&self, requested: Option<&[S]>) -> Result<Vec<Format>, InputError> {
        let Some(requested) = requested else {
            return Ok(self.defaults.clone());
        };

        let mut formats = Vec::with_capacity(requested.len());
        for name in requested {
            let name = name.as_ref();
            let format = Format::parse(name)
                .filter(|f| self.supported.contains(f))
                .ok_or_else(|| InputError::UnsupportedFormat(name.trim().to_string()))?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }

        if formats.is_empty() {
            return Err(InputError::NoFormats);
        }
        Ok(formats)
    }
}

fn checked_url(raw: &str) -> Result<String, InputError> {
    let trimmed = raw.trim();
    validate_url(trimmed).map_err(|_| InputError::InvalidUrl)?;
    Ok(trimmed.to_string())
}

/// `POST` body: `{"url": "...", "format": "json" | ["json", "text"]}`
pub fn parse_body(body: &[u8], policy: &FormatPolicy) -> Result<AnalyzeInput, InputError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| InputError::InvalidJson)?;
    let Value::Object(object) = value else {
        return Err(InputError::NotAnObject);
    };

    let url = object
        .get("url")
        .and_then(Value::as_str)
        .ok_or(InputError::InvalidUrl)
        .and_then(checked_url)?;

    let requested: Option<Vec<String>> = match object.get("format") {
        None | Some(Value::Null) => None,
        Some(Value::String(single)) => Some(vec![single.clone()]),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or(InputError::InvalidFormatType)?,
        ),
        Some(_) => return Err(InputError::InvalidFormatType),
    };

    let formats = policy.resolve(requested.as_deref())?;
    Ok(AnalyzeInput { url, formats })
}

/// Legacy query form: `?url=...&format=json&format=text` (comma lists accepted)
pub fn parse_query(query: Option<&str>, policy: &FormatPolicy) -> Result<AnalyzeInput, InputError> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let url = pairs
        .iter()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.as_str())
        .ok_or(InputError::InvalidUrl)
        .and_then(checked_url)?;

    let requested: Vec<String> = pairs
        .iter()
        .filter(|(k, _)| k == "format")
        .flat_map(|(_, v)| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();

    let has_format_param = pairs.iter().any(|(k, _)| k == "format");
    let formats = policy.resolve(has_format_param.then_some(requested.as_slice()))?;
    Ok(AnalyzeInput { url, formats })
}
