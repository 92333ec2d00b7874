//! Environment variable parsing with type safety.
//!
//! Overrides are optional: every getter returns `None` when the variable is
//! unset so callers only replace values that were actually provided.
//! Invalid values are collected instead of failing fast so all problems are
//! reported at once.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

enum Lookup {
    Process,
    Fixed(HashMap<String, String>),
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    lookup: Lookup,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    /// Create a parser over the process environment with the ITR_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "ITR_",
            lookup: Lookup::Process,
            errors: Vec::new(),
        }
    }

    /// Create a parser over a fixed set of variables (full names, prefix
    /// included).
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prefix: "ITR_",
            lookup: Lookup::Fixed(
                vars.into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            errors: Vec::new(),
        }
    }

    /// Check if any errors occurred.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, var_name: &str) -> Option<String> {
        match &self.lookup {
            Lookup::Process => env::var(var_name).ok(),
            Lookup::Fixed(vars) => vars.get(var_name).cloned(),
        }
    }

    /// Get a string override. Empty values count as unset.
    pub fn get_string(&mut self, name: &str) -> Option<String> {
        let var_name = self.var_name(name);
        self.raw(&var_name).filter(|value| !value.trim().is_empty())
    }

    /// Get a u64 override with range validation.
    pub fn get_u64_range(&mut self, name: &str, min: u64, max: u64) -> Option<u64> {
        let var_name = self.var_name(name);
        let value = self.raw(&var_name)?;
        match value.trim().parse::<u64>() {
            Ok(n) if n >= min && n <= max => Some(n),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var_name,
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                None
            }
            Err(_) => {
                self.errors.push(EnvError::InvalidValue {
                    var: var_name,
                    expected: "unsigned 64-bit integer".to_string(),
                    value,
                });
                None
            }
        }
    }

    /// Get a path override with ~ expansion.
    pub fn get_path(&mut self, name: &str) -> Option<PathBuf> {
        let value = self.get_string(name)?;
        Some(expand_home(&value))
    }

    /// Get a log level override with validation.
    pub fn get_log_level(&mut self, name: &str) -> Option<String> {
        let var_name = self.var_name(name);
        let value = self.raw(&var_name)?;
        let lower = value.trim().to_lowercase();
        match lower.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Some(lower),
            _ => {
                self.errors.push(EnvError::InvalidLogLevel {
                    var: var_name,
                    value,
                });
                None
            }
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(value)
}
