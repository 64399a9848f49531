//! Request error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Redacted description of the request that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    pub method: String,
    pub url: String,
    /// Header pairs with credential values replaced.
    pub headers: Vec<(String, String)>,
    /// Serialized body with sensitive fields replaced.
    pub body: Option<String>,
}

impl RequestSummary {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for RequestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Structured error payload returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Body of a non-2xx response: always the raw text, plus the parsed API
/// error when the body had that shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpErrorBody {
    pub raw: String,
    pub api: Option<ApiError>,
}

impl HttpErrorBody {
    pub fn parse(raw: String) -> Self {
        let api = serde_json::from_str::<ApiError>(&raw).ok();
        Self { raw, api }
    }
}

impl fmt::Display for HttpErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.api {
            Some(ApiError {
                code: Some(code),
                message,
                ..
            }) => write!(f, "{code}: {message}"),
            Some(ApiError { message, .. }) => f.write_str(message),
            None if self.raw.is_empty() => f.write_str("<empty body>"),
            None => f.write_str(&self.raw),
        }
    }
}

/// Error type for request execution.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The path would send the request somewhere other than the configured origin
    #[error("path {path:?} is not allowed for origin {origin}")]
    InvalidPath { path: String, origin: String },

    /// No response was received
    #[error("request failed before a response arrived ({request}): {source}")]
    Transport {
        request: RequestSummary,
        #[source]
        source: reqwest::Error,
    },

    /// A response arrived with a non-2xx status
    #[error("HTTP {status} from {request}: {body}")]
    Http {
        status: u16,
        body: HttpErrorBody,
        request: RequestSummary,
    },

    /// A 2xx response whose body is not the expected shape
    #[error("could not decode response from {request}: {source}")]
    Decode {
        body: String,
        request: RequestSummary,
        #[source]
        source: serde_json::Error,
    },
}

impl RequestError {
    /// Summary of the request, absent for configuration errors.
    pub fn request(&self) -> Option<&RequestSummary> {
        match self {
            RequestError::InvalidPath { .. } => None,
            RequestError::Transport { request, .. }
            | RequestError::Http { request, .. }
            | RequestError::Decode { request, .. } => Some(request),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether a caller-level retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RequestError::Transport { .. } => true,
            RequestError::Http { status, .. } => *status == 429 || *status >= 500,
            RequestError::InvalidPath { .. } | RequestError::Decode { .. } => false,
        }
    }
}

/// Result type for request execution.
pub type RequestResult<T> = Result<T, RequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RequestSummary {
        RequestSummary {
            method: "GET".to_string(),
            url: "https://api.example/v1/usage".to_string(),
            headers: vec![("authorization".to_string(), "Bearer [REDACTED]".to_string())],
            body: None,
        }
    }

    #[test]
    fn api_error_body_is_parsed() {
        let body = HttpErrorBody::parse(
            r#"{"status":402,"code":"over_quota","message":"Usage limit reached"}"#.to_string(),
        );
        assert_eq!(body.api.as_ref().unwrap().status, Some(402));
        assert_eq!(body.to_string(), "over_quota: Usage limit reached");
    }

    #[test]
    fn raw_error_body_is_kept() {
        let body = HttpErrorBody::parse("<html>Bad Gateway</html>".to_string());
        assert!(body.api.is_none());
        assert_eq!(body.to_string(), "<html>Bad Gateway</html>");
        assert_eq!(HttpErrorBody::parse(String::new()).to_string(), "<empty body>");
    }

    #[test]
    fn http_error_display_and_helpers() {
        let err = RequestError::Http {
            status: 503,
            body: HttpErrorBody::parse(r#"{"message":"down"}"#.to_string()),
            request: summary(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP 503 from GET https://api.example/v1/usage: down"
        );
        assert_eq!(err.status(), Some(503));
        assert!(err.is_transient());
        assert_eq!(
            err.request().unwrap().header("Authorization"),
            Some("Bearer [REDACTED]")
        );
    }

    #[test]
    fn invalid_path_is_not_transient() {
        let err = RequestError::InvalidPath {
            path: "//evil.example/x".to_string(),
            origin: "https://api.example".to_string(),
        };
        assert!(!err.is_transient());
        assert!(err.request().is_none());
    }
}
