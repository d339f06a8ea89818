//! Configuration system (layered: env > config file > defaults).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::DEFAULT_REPORT_PAYLOAD_CHARS;
use crate::engine::DEFAULT_MAX_CONSECUTIVE_MISTAKES;
use crate::error::CadenceError;
use crate::parser::{DEFAULT_WRITE_CONTENT_PARAM, DEFAULT_WRITE_TOOL};
use crate::types::{ExecutionOptions, DEFAULT_MAX_CONCURRENCY};

const MAX_CONCURRENCY_ENV: &str = "CADENCE_MAX_CONCURRENCY";
const CONTINUE_ON_ERROR_ENV: &str = "CADENCE_CONTINUE_ON_ERROR";
const TIMEOUT_MS_ENV: &str = "CADENCE_TIMEOUT_MS";
const WRITE_TOOL_ENV: &str = "CADENCE_WRITE_TOOL";
const WRITE_CONTENT_PARAM_ENV: &str = "CADENCE_WRITE_CONTENT_PARAM";
const REPORT_PAYLOAD_CHARS_ENV: &str = "CADENCE_REPORT_PAYLOAD_CHARS";
const MAX_CONSECUTIVE_MISTAKES_ENV: &str = "CADENCE_MAX_CONSECUTIVE_MISTAKES";

/// Engine and parser settings.
///
/// Resolution order:
/// 1. `CADENCE_*` environment variables (after loading `.env`)
/// 2. The TOML config file (`~/.cadence/config.toml` unless given explicitly)
/// 3. Built-in defaults
///
/// Unparsable environment values are ignored and the lower layer wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_concurrency: usize,
    pub continue_on_error: bool,
    pub timeout_ms: Option<u64>,
    /// Tool whose content parameter may contain its own closing tag.
    pub write_tool_name: String,
    pub write_content_param: String,
    pub report_payload_chars: usize,
    pub max_consecutive_mistakes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            continue_on_error: false,
            timeout_ms: None,
            write_tool_name: DEFAULT_WRITE_TOOL.to_string(),
            write_content_param: DEFAULT_WRITE_CONTENT_PARAM.to_string(),
            report_payload_chars: DEFAULT_REPORT_PAYLOAD_CHARS,
            max_consecutive_mistakes: DEFAULT_MAX_CONSECUTIVE_MISTAKES,
        }
    }
}

impl EngineConfig {
    /// Load every layer. An explicit `path` must exist; the default file is
    /// optional.
    pub fn load(path: Option<&Path>) -> Result<Self, CadenceError> {
        let mut config = match path {
            Some(path) => Self::load_file(path)?,
            None => Self::load_file_if_exists(&Self::default_path())?,
        };
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file. Missing keys keep their defaults.
    pub fn load_file(path: &Path) -> Result<Self, CadenceError> {
        let raw = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn load_file_if_exists(path: &Path) -> Result<Self, CadenceError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".cadence"))
            .unwrap_or_else(|| PathBuf::from(".cadence"))
            .join("config.toml")
    }

    /// Overlay values found through `lookup` (normally the process environment).
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(MAX_CONCURRENCY_ENV).and_then(|v| parse_positive_usize(&v)) {
            self.max_concurrency = value;
        }
        if let Some(value) = lookup(CONTINUE_ON_ERROR_ENV).and_then(|v| parse_bool(&v)) {
            self.continue_on_error = value;
        }
        if let Some(value) = lookup(TIMEOUT_MS_ENV).and_then(|v| parse_positive_usize(&v)) {
            self.timeout_ms = Some(value as u64);
        }
        if let Some(value) = lookup(WRITE_TOOL_ENV).and_then(non_empty) {
            self.write_tool_name = value;
        }
        if let Some(value) = lookup(WRITE_CONTENT_PARAM_ENV).and_then(non_empty) {
            self.write_content_param = value;
        }
        if let Some(value) = lookup(REPORT_PAYLOAD_CHARS_ENV).and_then(|v| parse_positive_usize(&v)) {
            self.report_payload_chars = value;
        }
        if let Some(value) = lookup(MAX_CONSECUTIVE_MISTAKES_ENV).and_then(|v| parse_positive_usize(&v)) {
            self.max_consecutive_mistakes = value;
        }
    }

    /// Per-run options derived from this config.
    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            max_concurrency: self.max_concurrency.max(1),
            continue_on_error: self.continue_on_error,
            timeout_ms: self.timeout_ms,
        }
    }
}

fn parse_positive_usize(value: &str) -> Option<usize> {
    let parsed = value.trim().parse::<usize>().ok()?;
    if parsed == 0 {
        None
    } else {
        Some(parsed)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
