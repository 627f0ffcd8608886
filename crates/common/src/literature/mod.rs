//! Literature source abstraction
//!
//! A literature source executes a database query and returns one bounded
//! page of matching documents, ordered by relevance. The only production
//! implementation talks to PubMed through NCBI E-utilities.

mod pubmed;

pub use pubmed::PubMedSource;

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single fetched document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Database identifier (PMID for PubMed)
    pub id: String,

    /// Title and abstract text
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Documents returned by one search call, ordered by relevance
///
/// Identifiers and texts live in the same [`Document`] so they cannot
/// drift out of step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSet {
    pub documents: Vec<Document>,

    /// Total hits reported by the database, when known
    pub total_matches: Option<u64>,
}

impl DocumentSet {
    pub fn new(documents: Vec<Document>, total_matches: Option<u64>) -> Self {
        Self {
            documents,
            total_matches,
        }
    }

    /// No matches, or a failed call
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Identifiers in relevance order
    pub fn ids(&self) -> Vec<&str> {
        self.documents.iter().map(|d| d.id.as_str()).collect()
    }
}

/// Trait for literature databases
#[async_trait]
pub trait LiteratureSource: Send + Sync {
    /// Run `query` and fetch one page of documents.
    ///
    /// No matches is `Ok` with an empty set. Transport or parse failures
    /// are errors; implementations must not retry internally.
    async fn search(&self, query: &str) -> Result<DocumentSet>;

    /// Short name used in logs and metrics
    fn name(&self) -> &str;
}
