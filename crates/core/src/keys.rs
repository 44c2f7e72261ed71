//! Normalized string keys for registry lookup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum allowed length for a [`StepKey`].
const STEP_KEY_MAX_LEN: usize = 64;

/// Errors from constructing a [`StepKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepKeyError {
    /// The input was empty or contained only whitespace.
    #[error("step key cannot be empty or whitespace")]
    Empty,
    /// The normalized key contains characters other than `a-z`, `0-9` and `_`.
    #[error("step key contains invalid characters (only a-z, 0-9 and _ allowed)")]
    InvalidCharacters,
    /// The normalized key exceeds [`STEP_KEY_MAX_LEN`] characters.
    #[error("step key exceeds maximum length of {STEP_KEY_MAX_LEN} characters")]
    TooLong,
}

/// A normalized, validated identifier for a step implementation.
///
/// Step keys are how workflow definitions refer to executable steps in the
/// engine's registry. Two definitions written by different hands should
/// resolve to the same implementation, so the key is aggressively
/// normalized:
///
/// - Leading/trailing whitespace is trimmed.
/// - The string is lowercased.
/// - Whitespace and hyphens are replaced with underscores.
/// - Consecutive underscores are collapsed to one.
/// - Leading/trailing underscores are stripped.
///
/// After normalization the key must be non-empty, contain only `a-z`, `0-9`
/// and `_`, and be at most 64 characters long.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepKey(String);

impl StepKey {
    /// Create a new `StepKey`, normalizing and validating the input.
    pub fn new(raw: &str) -> Result<Self, StepKeyError> {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_whitespace() || c == '-' {
                    '_'
                } else {
                    c
                }
            })
            .collect();

        // Collapse consecutive underscores and strip leading/trailing ones.
        let collapsed = collapse_underscores(&normalized);

        if collapsed.is_empty() {
            return Err(StepKeyError::Empty);
        }
        if !collapsed
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(StepKeyError::InvalidCharacters);
        }
        if collapsed.len() > STEP_KEY_MAX_LEN {
            return Err(StepKeyError::TooLong);
        }

        Ok(Self(collapsed))
    }

    /// Return the inner string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Collapse runs of underscores and trim leading/trailing underscores.
fn collapse_underscores(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_underscore = true; // treat start as "previous was _" to skip leading
    for c in s.chars() {
        if c == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(c);
            prev_underscore = false;
        }
    }
    // Strip trailing underscore.
    if out.ends_with('_') {
        out.pop();
    }
    out
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StepKey {
    type Err = StepKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for StepKey {
    type Error = StepKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<StepKey> for String {
    fn from(key: StepKey) -> Self {
        key.0
    }
}

impl AsRef<str> for StepKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
