//! # ringvault-shared
//!
//! Shared utilities, result types, and error handling for the
//! ringvault workspace.
//!
//! This crate provides foundational types used across all other
//! crates:
//!
//! - Result and error envelope types
//! - Request context, cancellation, and the bounded worker pool
//! - Retry with bounded backoff
//! - MD5 digest helpers in the manifest encoding
//!
//! ## Design Principles
//!
//! 1. **No workspace dependencies** - only external crates
//! 2. **Serde-compatible** - public error types support serialization

#![deny(clippy::unwrap_used)]

pub mod concurrency;
pub mod digest;
pub mod errors;
pub mod result;
pub mod retry;

pub use concurrency::{
    CancellationToken, CorrelationId, RequestContext, WorkerPool, DEFAULT_POOL_WORKERS,
};
pub use digest::{hashes_match, md5_base64, md5_base64_file, DIGEST_BLOCK_SIZE};
pub use errors::{ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata};
pub use result::Result;
pub use retry::{retry_async, Backoff, RetryPolicy};

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
