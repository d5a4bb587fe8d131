//! tubevault library
//!
//! Turns a video URL into an audio file and a cover image stored on pCloud,
//! returning shareable links. Modules are exposed for the binary and for tests.

pub mod config;
pub mod error;
pub mod extractor;
pub mod namespace;
pub mod pipeline;
pub mod publisher;
pub mod server;
pub mod storage;
pub mod temp_resources;
pub mod thumbnail;

// Re-export commonly used types for convenience
pub use error::PipelineError;
pub use pipeline::{PipelineOrchestrator, PipelineResult, SourceRequest};
pub use server::{run_server, RequestsLoggingLevel};
