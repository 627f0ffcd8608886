//! MedSearch Common Library
//!
//! Shared code for the MedSearch gateway and CLI including:
//! - Configuration management
//! - Error types and handling
//! - Metrics and observability
//! - Oracle (text generation) client abstraction
//! - PubMed literature source
//! - The query refinement engine

pub mod config;
pub mod errors;
pub mod literature;
pub mod metrics;
pub mod oracle;
pub mod refinement;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use literature::{Document, DocumentSet, LiteratureSource, PubMedSource};
pub use oracle::Oracle;
pub use refinement::{
    build_refinement_loop, create_refinement_loop, LoopResult, LoopStatus, RefinementLoop, RefinementOutcome,
    RefinementRequest,
};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
