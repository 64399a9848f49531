//! HTTP request execution with a closed error taxonomy.
//!
//! [`RequestExecutor`] performs one HTTP call against a configured base
//! origin and classifies the outcome:
//!
//! - no response: [`RequestError::Transport`]
//! - non-2xx response: [`RequestError::Http`]
//! - 2xx response whose body is not the expected JSON: [`RequestError::Decode`]
//! - a path that would leave the configured origin: [`RequestError::InvalidPath`]
//!
//! Every network error carries a [`RequestSummary`] with the authorization
//! value redacted. The executor never retries and imposes no timeouts.

mod error;
mod executor;
mod redact;

pub use error::{ApiError, HttpErrorBody, RequestError, RequestResult, RequestSummary};
pub use executor::{authorization_header, ExecutorConfig, RequestBody, RequestExecutor, USER_AGENT};
pub use redact::{redact_header_value, redact_json};

pub use reqwest::Method;
