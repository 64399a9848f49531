//! Tamper-evident, expiring on-disk credential cache.
//!
//! One record per (working context, server origin) pair, stored as
//! `<root>/<identifier>.json` where the identifier is
//! `sha256(sha256(context) + sha256(origin))`. A record is the JSON array
//! `[credential, issued_at_millis, server_origin, signature]` and the
//! signature is an unkeyed SHA-256 over the first three elements. It detects
//! corruption and casual tampering, nothing stronger.
//!
//! Reads are self-cleaning: any record that fails a storage, shape,
//! integrity, or expiry check is deleted and reported as a miss.

mod cache;
mod clock;
mod credential;
mod record;

pub use cache::TokenCache;
pub use clock::{Clock, SystemClock};
pub use credential::{Credential, TokenType, UnknownTokenType};
pub use record::{record_identifier, sha256_hex};

use thiserror::Error;

/// Error type for token cache operations.
///
/// Integrity failures never appear here; they are logged and become a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache root could not be resolved
    #[error("Token cache configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for token cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
