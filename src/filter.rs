//! Label filter expressions.
//!
//! A filter is a single required-label expression: the empty string matches
//! every pod, `key` requires the key to be present, and `key=value` requires
//! an exact match. The filter is evaluated against a pod's labels when the
//! pod first appears; later label changes never start or stop tracking.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Error raised for a malformed filter expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid label filter {0:?}: key must not be empty")]
pub struct FilterParseError(String);

/// Predicate over a pod's label set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LabelFilter {
    /// Matches every pod.
    #[default]
    All,
    /// Matches pods carrying the key, whatever its value.
    HasKey(String),
    /// Matches pods carrying the key with exactly this value.
    Equals(String, String),
}

impl LabelFilter {
    /// Evaluate the filter against a label set.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self {
            Self::All => true,
            Self::HasKey(key) => labels.contains_key(key),
            Self::Equals(key, value) => labels.get(key).is_some_and(|v| v == value),
        }
    }
}

impl FromStr for LabelFilter {
    type Err = FilterParseError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Ok(Self::All);
        }
        match expr.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    return Err(FilterParseError(expr.to_string()));
                }
                Ok(Self::Equals(key.to_string(), value.trim().to_string()))
            }
            None => Ok(Self::HasKey(expr.to_string())),
        }
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "<all>"),
            Self::HasKey(key) => write!(f, "{key}"),
            Self::Equals(key, value) => write!(f, "{key}={value}"),
        }
    }
}
