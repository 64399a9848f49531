//! On-disk record format and integrity signature.

use crate::Credential;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a string.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Stable file stem for a (context, origin) pair.
pub fn record_identifier(context: &str, server_origin: &str) -> String {
    sha256_hex(&(sha256_hex(context) + &sha256_hex(server_origin)))
}

/// A decoded `[credential, issued_at_millis, server_origin, signature]` record.
#[derive(Debug)]
pub(crate) struct CachedRecord {
    pub credential: Credential,
    pub issued_at_millis: i64,
    pub server_origin: String,
}

/// Why a stored record was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Rejection {
    Shape(&'static str),
    OriginMismatch,
    SignatureMismatch,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Shape(detail) => write!(f, "malformed record: {detail}"),
            Rejection::OriginMismatch => f.write_str("server origin mismatch"),
            Rejection::SignatureMismatch => f.write_str("integrity signature mismatch"),
        }
    }
}

/// Signature over the canonical JSON of the first three record elements.
///
/// Computed from `serde_json::Value` so that key order on disk does not matter.
fn sign(credential: &Value, issued_at_millis: i64, server_origin: &str) -> String {
    let payload = Value::Array(vec![
        credential.clone(),
        Value::from(issued_at_millis),
        Value::from(server_origin),
    ]);
    sha256_hex(&payload.to_string())
}

impl CachedRecord {
    pub fn encode(&self) -> serde_json::Result<String> {
        let credential = serde_json::to_value(&self.credential)?;
        let signature = sign(&credential, self.issued_at_millis, &self.server_origin);
        let record = Value::Array(vec![
            credential,
            Value::from(self.issued_at_millis),
            Value::from(self.server_origin.as_str()),
            Value::from(signature),
        ]);
        serde_json::to_string(&record)
    }

    /// Decode and verify a record read for `expected_origin`.
    pub fn decode(raw: &str, expected_origin: &str) -> Result<Self, Rejection> {
        let value: Value =
            serde_json::from_str(raw).map_err(|_| Rejection::Shape("not valid JSON"))?;

        let elements = match value {
            Value::Array(elements) if elements.len() == 4 => elements,
            _ => return Err(Rejection::Shape("expected a 4-element array")),
        };

        let issued_at_millis = elements[1]
            .as_i64()
            .ok_or(Rejection::Shape("issued_at is not an integer"))?;
        let server_origin = elements[2]
            .as_str()
            .ok_or(Rejection::Shape("server origin is not a string"))?;
        let signature = elements[3]
            .as_str()
            .ok_or(Rejection::Shape("signature is not a string"))?;

        if server_origin != expected_origin {
            return Err(Rejection::OriginMismatch);
        }

        if sign(&elements[0], issued_at_millis, server_origin) != signature {
            return Err(Rejection::SignatureMismatch);
        }

        let credential: Credential = serde_json::from_value(elements[0].clone())
            .map_err(|_| Rejection::Shape("credential has the wrong fields"))?;

        Ok(Self {
            credential,
            issued_at_millis,
            server_origin: server_origin.to_string(),
        })
    }
}
