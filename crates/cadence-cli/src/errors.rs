//! CLI-specific error formatting for user-facing messages.

use cadence::error::CadenceError;

/// Map a [`CadenceError`] to a user-facing help string with actionable guidance.
pub fn format_error_help(err: &CadenceError) -> String {
    match err {
        CadenceError::ConfigFile(inner) => {
            format!("Config file is not valid TOML: {inner}. Check the file passed with --config or ~/.cadence/config.toml")
        }
        CadenceError::Configuration(msg) => {
            format!("Configuration error: {msg}. Check your .env or CADENCE_* variables")
        }
        CadenceError::Io(inner) => format!("Could not read input: {inner}"),
        CadenceError::Timeout(ms) => {
            format!("Run timed out after {ms}ms. Raise --timeout-ms or CADENCE_TIMEOUT_MS")
        }
        other => format!("{other}"),
    }
}
