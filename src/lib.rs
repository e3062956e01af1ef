pub mod builder;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod metadata;
mod metrics;
pub mod saliency;
pub mod server;
pub mod service;
pub mod utils;

pub use builder::{BuildSummary, IndexBuilder};
pub use config::Opts;
pub use error::{Error, ErrorKind, Result};
pub use index::VectorIndex;
pub use metadata::MetadataRecord;
pub use service::{AppContext, ExplanationService, SearchService};
