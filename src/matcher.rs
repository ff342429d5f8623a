use std::fmt;

use regex::Regex;

use crate::error::{PurgeError, PurgeResult};

/// Predicate over an annotation's fully qualified class name.
#[derive(Clone, Debug)]
pub(crate) enum Matcher {
    /// Ordinal string equality.
    Literal(String),
    /// Whole-string regular expression match.
    Regex { pattern: String, regex: Regex },
}

impl Matcher {
    pub(crate) fn literal(name: impl Into<String>) -> Self {
        Matcher::Literal(name.into())
    }

    /// Compile `pattern` so that it must match the entire candidate.
    pub(crate) fn regex(pattern: impl Into<String>) -> PurgeResult<Self> {
        let pattern = pattern.into();
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            PurgeError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            }
        })?;
        Ok(Matcher::Regex { pattern, regex })
    }

    pub(crate) fn matches(&self, candidate: &str) -> bool {
        match self {
            Matcher::Literal(name) => name == candidate,
            Matcher::Regex { regex, .. } => regex.is_match(candidate),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Literal(name) => write!(f, "name:{name}"),
            Matcher::Regex { pattern, .. } => write!(f, "regexp:{pattern}"),
        }
    }
}
