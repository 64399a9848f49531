//! HTTP request executor.

use crate::error::{HttpErrorBody, RequestError, RequestResult, RequestSummary};
use crate::redact::{redact_body_text, redact_form, redact_header_value, redact_json};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use token_cache::{Credential, TokenType};
use tracing::{debug, info};
use url::Url;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("tollgate-client/", env!("CARGO_PKG_VERSION"));

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// `application/x-www-form-urlencoded` fields, in order.
    Form(Vec<(String, String)>),
}

impl RequestBody {
    pub fn form<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Encoded bytes, content type, and the redacted text for diagnostics.
    fn encode(&self) -> (Vec<u8>, &'static str, String) {
        match self {
            RequestBody::Json(value) => (
                value.to_string().into_bytes(),
                CONTENT_TYPE_JSON,
                redact_json(value).to_string(),
            ),
            RequestBody::Form(fields) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter())
                    .finish();
                (encoded.into_bytes(), CONTENT_TYPE_FORM, redact_form(fields))
            }
        }
    }
}

/// `Authorization` header value for a credential.
pub fn authorization_header(credential: &Credential) -> String {
    match credential.token_type {
        TokenType::Basic => format!(
            "Basic {}",
            STANDARD.encode(format!("{}:", credential.access_token))
        ),
        TokenType::Bearer => format!("Bearer {}", credential.access_token),
    }
}

/// Executor settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub base_url: Url,
    pub credential: Option<Credential>,
    /// Log every request and response (redacted).
    pub debug: bool,
}

impl ExecutorConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            credential: None,
            debug: false,
        }
    }

    pub fn with_credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Performs HTTP calls against one base origin.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    http: reqwest::Client,
    config: ExecutorConfig,
}

impl RequestExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.config.credential.as_ref()
    }

    /// Same origin and settings, different credential.
    pub fn with_credential(&self, credential: Option<Credential>) -> Self {
        Self {
            http: self.http.clone(),
            config: self.config.clone().with_credential(credential),
        }
    }

    /// Perform a request and parse the response as arbitrary JSON.
    ///
    /// An empty 2xx body yields `Value::Null`.
    pub async fn execute(
        &self,
        path: &str,
        method: Method,
        body: Option<RequestBody>,
    ) -> RequestResult<Value> {
        let (text, request) = self.send(path, method, body).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|source| RequestError::Decode {
            body: text,
            request,
            source,
        })
    }

    /// Perform a request and decode the response into `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        path: &str,
        method: Method,
        body: Option<RequestBody>,
    ) -> RequestResult<T> {
        let (text, request) = self.send(path, method, body).await?;
        serde_json::from_str(&text).map_err(|source| RequestError::Decode {
            body: text,
            request,
            source,
        })
    }

    /// Join `path` onto the base URL, refusing anything that leaves its origin.
    fn resolve(&self, path: &str) -> RequestResult<Url> {
        let base = &self.config.base_url;
        let invalid = || RequestError::InvalidPath {
            path: path.to_string(),
            origin: base.origin().ascii_serialization(),
        };

        if !path.starts_with('/') {
            return Err(invalid());
        }
        let url = base.join(path).map_err(|_| invalid())?;
        if url.origin() != base.origin() {
            return Err(invalid());
        }
        Ok(url)
    }

    async fn send(
        &self,
        path: &str,
        method: Method,
        body: Option<RequestBody>,
    ) -> RequestResult<(String, RequestSummary)> {
        let url = self.resolve(path)?;

        let mut headers: Vec<(String, String)> = vec![
            ("user-agent".to_string(), USER_AGENT.to_string()),
            ("accept".to_string(), CONTENT_TYPE_JSON.to_string()),
        ];
        if let Some(credential) = &self.config.credential {
            headers.push(("authorization".to_string(), authorization_header(credential)));
        }

        let (payload, summary_body) = match body.as_ref().map(RequestBody::encode) {
            Some((bytes, content_type, redacted)) => {
                headers.push(("content-type".to_string(), content_type.to_string()));
                headers.push(("content-length".to_string(), bytes.len().to_string()));
                (Some(bytes), Some(redacted))
            }
            None => (None, None),
        };

        let request = RequestSummary {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers
                .iter()
                .map(|(name, value)| (name.clone(), redact_header_value(name, value)))
                .collect(),
            body: summary_body,
        };

        if self.config.debug {
            info!(
                method = %request.method,
                url = %request.url,
                headers = ?request.headers,
                body = ?request.body,
                "http request"
            );
        }

        let mut builder = self.http.request(method, url);
        for (name, value) in &headers {
            // reqwest derives content-length from the body itself.
            if name != "content-length" {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(payload) = payload {
            builder = builder.body(payload);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(source) => {
                debug!(request = %request, error = %source, "transport failure");
                return Err(RequestError::Transport { request, source });
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(source) => return Err(RequestError::Transport { request, source }),
        };

        if self.config.debug {
            info!(
                url = %request.url,
                status = status.as_u16(),
                body = %redact_body_text(&text),
                "http response"
            );
        }

        if !status.is_success() {
            return Err(RequestError::Http {
                status: status.as_u16(),
                body: HttpErrorBody::parse(text),
                request,
            });
        }

        Ok((text, request))
    }
}
