//! Query value types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Translator output: the fixed reference query for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedQuery(String);

impl NormalizedQuery {
    /// Returns `None` for blank text
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The query string submitted to the literature source.
///
/// Replaced wholesale every iteration; equality is byte equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchQuery(String);

impl SearchQuery {
    /// Returns `None` for blank text
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Start from the normalized question verbatim
    pub(crate) fn from_normalized(query: &NormalizedQuery) -> Self {
        Self(query.0.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whitespace-separated terms
    pub fn terms(&self) -> Vec<&str> {
        self.0.split_whitespace().collect()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_queries_rejected() {
        assert!(SearchQuery::new("   ").is_none());
        assert!(NormalizedQuery::new("").is_none());
    }

    #[test]
    fn test_queries_are_trimmed() {
        let q = SearchQuery::new("  glioma TTFields \n").unwrap();
        assert_eq!(q.as_str(), "glioma TTFields");
        assert_eq!(q.terms(), vec!["glioma", "TTFields"]);
    }
}
