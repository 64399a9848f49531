//! Credential redaction for diagnostics.

use observability::{is_sensitive_key, REDACTED};
use serde_json::Value;

/// Redact a header value when the header carries credentials.
///
/// The auth scheme survives so diagnostics still show which one was used:
/// `Bearer tok_123` becomes `Bearer [REDACTED]`.
pub fn redact_header_value(name: &str, value: &str) -> String {
    if !is_sensitive_key(name) {
        return value.to_string();
    }
    match value.split_once(' ') {
        Some((scheme, _)) => format!("{scheme} {REDACTED}"),
        None => REDACTED.to_string(),
    }
}

/// Copy of `value` with every sensitive key's value replaced, at any depth.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let inner = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_json(inner)
                    };
                    (key.clone(), inner)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

/// Encoded form body with sensitive fields replaced.
pub(crate) fn redact_form(fields: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in fields {
        if is_sensitive_key(key) {
            serializer.append_pair(key, REDACTED);
        } else {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Response text for logging: JSON bodies are redacted, anything else passes.
pub(crate) fn redact_body_text(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => redact_json(&value).to_string(),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn authorization_keeps_scheme() {
        assert_eq!(
            redact_header_value("Authorization", "Bearer tok_123"),
            "Bearer [REDACTED]"
        );
        assert_eq!(
            redact_header_value("authorization", "Basic dG9rOg=="),
            "Basic [REDACTED]"
        );
        assert_eq!(redact_header_value("authorization", "opaque"), REDACTED);
        assert_eq!(
            redact_header_value("user-agent", "tollgate-client/0.1.0"),
            "tollgate-client/0.1.0"
        );
    }

    #[test]
    fn nested_json_is_redacted() {
        let body = json!({
            "access_token": "tok",
            "token_type": "bearer",
            "nested": [{ "refresh_token": "ref", "count": 3 }]
        });

        let redacted = redact_json(&body);

        assert_eq!(redacted["access_token"], REDACTED);
        assert_eq!(redacted["token_type"], "bearer");
        assert_eq!(redacted["nested"][0]["refresh_token"], REDACTED);
        assert_eq!(redacted["nested"][0]["count"], 3);
    }

    #[test]
    fn form_and_text_bodies() {
        let form = redact_form(&[
            ("client_id".to_string(), "abc".to_string()),
            ("password".to_string(), "hunter2".to_string()),
        ]);
        assert_eq!(form, "client_id=abc&password=%5BREDACTED%5D");

        assert!(!redact_body_text(r#"{"access_token":"tok"}"#).contains("tok\""));
        assert_eq!(redact_body_text("plain text"), "plain text");
    }
}
