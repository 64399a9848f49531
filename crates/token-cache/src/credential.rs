//! Credential issued by the login server.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Authorization scheme a token is presented with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Basic,
    Bearer,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Basic => "basic",
            TokenType::Bearer => "bearer",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A token type string the runtime does not know how to present.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported token type: {0}")]
pub struct UnknownTokenType(pub String);

impl FromStr for TokenType {
    type Err = UnknownTokenType;

    /// Case-insensitive, so `Bearer` from the server maps to `bearer`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(TokenType::Basic),
            "bearer" => Ok(TokenType::Bearer),
            _ => Err(UnknownTokenType(s.to_string())),
        }
    }
}

/// An access credential. Never mutated after issue.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credential {
    pub access_token: String,
    pub token_type: TokenType,
    /// Lifetime in seconds, counted from the moment the record was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            access_token: access_token.into(),
            token_type,
            expires_in: None,
            refresh_token: None,
            scope: None,
        }
    }

    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self::new(access_token, TokenType::Bearer)
    }

    pub fn basic(access_token: impl Into<String>) -> Self {
        Self::new(access_token, TokenType::Basic)
    }

    pub fn with_expires_in(mut self, seconds: i64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Whether the credential has lapsed at `now_millis` given when it was issued.
    ///
    /// The exact boundary instant is still valid.
    pub fn is_expired(&self, issued_at_millis: i64, now_millis: i64) -> bool {
        match self.expires_in {
            Some(seconds) => {
                let deadline = issued_at_millis.saturating_add(seconds.saturating_mul(1000));
                now_millis > deadline
            }
            None => false,
        }
    }
}

// Token material stays out of logs and panic messages.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
