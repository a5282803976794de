//! Shared data models for the vgrab download pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Content keys derived from source URLs
//! - Trim windows
//! - Cache entries and blob references
//! - Request/response envelopes and the pipeline capability set

pub mod capabilities;
pub mod entry;
pub mod key;
pub mod request;
pub mod window;

pub use capabilities::Capabilities;
pub use entry::{BlobReference, CacheEntry};
pub use key::{ContentKey, SourceUrlError};
pub use request::{ErrorResponse, PipelineRequest, PipelineResponse};
pub use window::{TrimWindow, WindowError};
