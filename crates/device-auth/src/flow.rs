//! Device login handshake and token polling.

use crate::error::{DeviceAuthError, DeviceAuthResult};
use crate::fsm::{DeviceLoginInput, DeviceLoginMachine, DeviceLoginStatus};
use request_executor::{Method, RequestBody, RequestError, RequestExecutor};
use retry_backoff::{Backoff, CancelSignal, WaitOutcome};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use token_cache::{Credential, TokenCache, TokenType};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Endpoint that issues device and user codes.
pub const DEVICE_CODE_PATH: &str = "/v1/device/code";
/// Endpoint polled for the token.
pub const DEVICE_TOKEN_PATH: &str = "/v1/device/token";
/// Grant type sent with every poll.
pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Interval the server grows the poll period by on `slow_down`.
const SLOW_DOWN_STEP: u64 = 5;
/// Poll period when the server does not declare one.
const DEFAULT_INTERVAL: u64 = 5;
/// Shortest poll period accepted from the server.
const MIN_INTERVAL: u64 = 1;

/// What the user needs to approve the login, plus what polling needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Lifetime of the device code, in seconds.
    pub expires_in: u64,
    /// Poll period, in seconds.
    pub interval: u64,
    /// Correlation identifier generated for this login.
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PollResponse {
    Token(TokenResponse),
    Error(PollError),
}

/// Drives one device login at a time against the login server.
pub struct DeviceAuthFlow {
    executor: RequestExecutor,
    cache: TokenCache,
    credential_origin: String,
    interval_unit: Duration,
    /// Paces polls; releases early when the caller's signal fires.
    backoff: Backoff,
    fsm: Mutex<DeviceLoginMachine>,
}

impl DeviceAuthFlow {
    /// `executor` points at the login server; any credential it carries is
    /// dropped. Approved credentials are cached under `credential_origin`.
    pub fn new(
        executor: &RequestExecutor,
        cache: TokenCache,
        credential_origin: impl Into<String>,
    ) -> Self {
        Self {
            executor: executor.with_credential(None),
            cache,
            credential_origin: credential_origin.into(),
            interval_unit: Duration::from_secs(1),
            backoff: Backoff::default(),
            fsm: Mutex::new(DeviceLoginMachine::new()),
        }
    }

    /// Length of one server-declared second. Tests shrink it.
    pub fn with_interval_unit(mut self, unit: Duration) -> Self {
        self.interval_unit = unit;
        self
    }

    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.backoff = Backoff::default().with_cancel_signal(signal);
        self
    }

    pub fn status(&self) -> DeviceLoginStatus {
        DeviceLoginStatus::from(self.lock_fsm().state())
    }

    /// Request a device code. Starts a fresh login, discarding any previous one.
    pub async fn init_login(&self) -> DeviceAuthResult<DeviceAuthorization> {
        *self.lock_fsm() = DeviceLoginMachine::new();

        let client_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .executor
            .execute_as::<DeviceCodeResponse>(
                DEVICE_CODE_PATH,
                Method::POST,
                Some(RequestBody::form([("client_id", client_id.as_str())])),
            )
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.fail();
                return Err(e.into());
            }
        };

        self.transition(&DeviceLoginInput::CodeIssued)?;

        let authorization = DeviceAuthorization {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_uri: response.verification_uri,
            verification_uri_complete: response.verification_uri_complete,
            expires_in: response.expires_in,
            interval: response
                .interval
                .unwrap_or(DEFAULT_INTERVAL)
                .max(MIN_INTERVAL),
            client_id,
        };

        info!(
            client_id = %authorization.client_id,
            verification_uri = %authorization.verification_uri,
            expires_in = authorization.expires_in,
            interval = authorization.interval,
            "device code issued"
        );

        Ok(authorization)
    }

    /// Poll until the user approves or denies, then persist the credential
    /// for `context`.
    pub async fn await_login(
        &self,
        context: &str,
        authorization: &DeviceAuthorization,
    ) -> DeviceAuthResult<Credential> {
        if self.status() != DeviceLoginStatus::AwaitingAuthorization {
            return Err(DeviceAuthError::InvalidStateTransition(format!(
                "cannot poll for a token in state {:?}",
                self.status()
            )));
        }

        let result = self.poll_until_done(context, authorization).await;
        match &result {
            Ok(_) => {}
            Err(DeviceAuthError::Denied) => {
                let _ = self.transition(&DeviceLoginInput::AccessDenied);
            }
            Err(_) => self.fail(),
        }
        result
    }

    async fn poll_until_done(
        &self,
        context: &str,
        authorization: &DeviceAuthorization,
    ) -> DeviceAuthResult<Credential> {
        let lifetime = self.interval_unit.saturating_mul(to_u32(authorization.expires_in));
        let started = Instant::now();
        let mut interval = authorization.interval;

        loop {
            let wait = self.interval_unit.saturating_mul(to_u32(interval));
            if let WaitOutcome::Cancelled = self.backoff.wait_for(wait).await {
                info!(client_id = %authorization.client_id, "device login cancelled");
                return Err(DeviceAuthError::Cancelled);
            }

            if started.elapsed() >= lifetime {
                warn!(client_id = %authorization.client_id, "device code expired before approval");
                return Err(DeviceAuthError::Expired(lifetime));
            }

            match self.poll_once(authorization).await? {
                PollResponse::Token(token) => {
                    let credential = into_credential(token)?;
                    self.cache
                        .set(context, &self.credential_origin, &credential)?;
                    self.transition(&DeviceLoginInput::Authorized)?;
                    info!(
                        client_id = %authorization.client_id,
                        token_type = %credential.token_type,
                        "device login approved"
                    );
                    return Ok(credential);
                }
                PollResponse::Error(error) => match error.error.as_str() {
                    "authorization_pending" => {
                        self.transition(&DeviceLoginInput::Pending)?;
                    }
                    "slow_down" => {
                        interval = interval.saturating_add(SLOW_DOWN_STEP);
                        self.transition(&DeviceLoginInput::SlowDown)?;
                        debug!(interval, "server asked to slow down");
                    }
                    "access_denied" => return Err(DeviceAuthError::Denied),
                    _ => {
                        return Err(DeviceAuthError::Failed {
                            code: error.error,
                            description: error.error_description,
                        })
                    }
                },
            }
        }
    }

    /// One token poll. Protocol errors arrive as non-2xx responses with an
    /// `{error}` body; any other failure is surfaced unchanged.
    async fn poll_once(&self, authorization: &DeviceAuthorization) -> DeviceAuthResult<PollResponse> {
        let body = RequestBody::form([
            ("client_id", authorization.client_id.as_str()),
            ("device_code", authorization.device_code.as_str()),
            ("grant_type", DEVICE_CODE_GRANT_TYPE),
        ]);

        match self
            .executor
            .execute_as::<PollResponse>(DEVICE_TOKEN_PATH, Method::POST, Some(body))
            .await
        {
            Ok(response) => Ok(response),
            Err(RequestError::Http { status, body, request }) => {
                match serde_json::from_str::<PollError>(&body.raw) {
                    Ok(error) => Ok(PollResponse::Error(error)),
                    Err(_) => Err(RequestError::Http {
                        status,
                        body,
                        request,
                    }
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn transition(&self, input: &DeviceLoginInput) -> DeviceAuthResult<DeviceLoginStatus> {
        let mut fsm = self.lock_fsm();
        let old_status = DeviceLoginStatus::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            DeviceAuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_status = DeviceLoginStatus::from(fsm.state());
        drop(fsm);

        if old_status != new_status {
            debug!(from = ?old_status, to = ?new_status, "device login state changed");
        }
        Ok(new_status)
    }

    fn fail(&self) {
        let _ = self.transition(&DeviceLoginInput::Failure);
    }

    fn lock_fsm(&self) -> MutexGuard<'_, DeviceLoginMachine> {
        self.fsm
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn into_credential(token: TokenResponse) -> DeviceAuthResult<Credential> {
    let token_type = token
        .token_type
        .parse::<TokenType>()
        .map_err(|unknown| DeviceAuthError::UnsupportedTokenType(unknown.0))?;

    Ok(Credential {
        access_token: token.access_token,
        token_type,
        expires_in: token.expires_in,
        refresh_token: token.refresh_token,
        scope: token.scope,
    })
}

fn to_u32(seconds: u64) -> u32 {
    u32::try_from(seconds).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::ScriptedServer;
    use request_executor::ExecutorConfig;
    use retry_backoff::CancelSource;
    use serde_json::json;
    use tempfile::TempDir;

    const CONTEXT: &str = "org:acme";
    const UNIT: Duration = Duration::from_millis(10);

    struct Harness {
        server: ScriptedServer,
        cache: TokenCache,
        flow: DeviceAuthFlow,
        _dir: TempDir,
    }

    impl Harness {
        async fn start(script: Vec<(u16, serde_json::Value)>) -> Self {
            let server = ScriptedServer::start(
                script
                    .into_iter()
                    .map(|(status, body)| (status, body.to_string()))
                    .collect(),
            )
            .await;
            let dir = tempfile::tempdir().unwrap();
            let cache = TokenCache::new(dir.path().join("tokens"));
            let executor = RequestExecutor::new(
                ExecutorConfig::new(server.base_url.clone())
                    .with_credential(Some(Credential::bearer("stale_token"))),
            );
            let flow = DeviceAuthFlow::new(&executor, cache.clone(), server.base_url.as_str())
                .with_interval_unit(UNIT);
            Self {
                server,
                cache,
                flow,
                _dir: dir,
            }
        }

        fn origin(&self) -> &str {
            self.server.base_url.as_str()
        }
    }

    fn code_response() -> (u16, serde_json::Value) {
        (
            200,
            json!({
                "device_code": "dev_123",
                "user_code": "WDJB-MJHT",
                "verification_uri": "https://tollgate.dev/device",
                "expires_in": 600,
                "interval": 1
            }),
        )
    }

    fn poll_error(code: &str) -> (u16, serde_json::Value) {
        (400, json!({ "error": code }))
    }

    fn token(token_type: &str) -> (u16, serde_json::Value) {
        (
            200,
            json!({
                "access_token": "tok_device_abc",
                "token_type": token_type,
                "expires_in": 3600,
                "scope": "usage:read"
            }),
        )
    }

    #[tokio::test]
    async fn init_login_requests_a_code_without_credentials() {
        let harness = Harness::start(vec![code_response()]).await;

        let authorization = harness.flow.init_login().await.unwrap();

        assert_eq!(authorization.device_code, "dev_123");
        assert_eq!(authorization.user_code, "WDJB-MJHT");
        assert_eq!(authorization.interval, 1);
        assert!(uuid::Uuid::parse_str(&authorization.client_id).is_ok());
        assert_eq!(harness.flow.status(), DeviceLoginStatus::AwaitingAuthorization);

        let requests = harness.server.recorded();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, DEVICE_CODE_PATH);
        assert_eq!(
            requests[0].body,
            format!("client_id={}", authorization.client_id)
        );
        assert!(!requests[0].has_authorization);
    }

    #[tokio::test]
    async fn each_login_gets_a_fresh_client_id() {
        let harness = Harness::start(vec![code_response()]).await;
        let first = harness.flow.init_login().await.unwrap();
        let second = harness.flow.init_login().await.unwrap();
        assert_ne!(first.client_id, second.client_id);
    }

    #[tokio::test]
    async fn missing_interval_defaults_to_five_seconds() {
        let harness = Harness::start(vec![(
            200,
            json!({
                "device_code": "dev_123",
                "user_code": "WDJB-MJHT",
                "verification_uri": "https://tollgate.dev/device",
                "expires_in": 600
            }),
        )])
        .await;

        let authorization = harness.flow.init_login().await.unwrap();
        assert_eq!(authorization.interval, 5);
    }

    #[tokio::test]
    async fn zero_interval_is_raised_to_one_second() {
        let harness = Harness::start(vec![
            (
                200,
                json!({
                    "device_code": "dev_123",
                    "user_code": "WDJB-MJHT",
                    "verification_uri": "https://tollgate.dev/device",
                    "expires_in": 600,
                    "interval": 0
                }),
            ),
            poll_error("authorization_pending"),
            poll_error("authorization_pending"),
            token("bearer"),
        ])
        .await;

        let authorization = harness.flow.init_login().await.unwrap();
        assert_eq!(authorization.interval, MIN_INTERVAL);
        harness.flow.await_login(CONTEXT, &authorization).await.unwrap();

        let requests = harness.server.recorded();
        let polls: Vec<_> = requests
            .iter()
            .filter(|r| r.path == DEVICE_TOKEN_PATH)
            .collect();
        assert_eq!(polls.len(), 3);
        for pair in polls.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= UNIT);
        }
    }

    #[tokio::test]
    async fn pending_then_slow_down_then_success() {
        let harness = Harness::start(vec![
            code_response(),
            poll_error("authorization_pending"),
            poll_error("slow_down"),
            token("Bearer"),
        ])
        .await;

        let authorization = harness.flow.init_login().await.unwrap();
        let credential = harness.flow.await_login(CONTEXT, &authorization).await.unwrap();

        assert_eq!(credential.access_token, "tok_device_abc");
        assert_eq!(credential.token_type, TokenType::Bearer);
        assert_eq!(credential.expires_in, Some(3600));
        assert_eq!(harness.flow.status(), DeviceLoginStatus::Succeeded);
        assert_eq!(harness.cache.get(CONTEXT, harness.origin()), Some(credential));

        let requests = harness.server.recorded();
        let polls: Vec<_> = requests
            .iter()
            .filter(|r| r.path == DEVICE_TOKEN_PATH)
            .collect();
        assert_eq!(polls.len(), 3);
        for poll in &polls {
            assert!(poll.body.contains(&format!("client_id={}", authorization.client_id)));
            assert!(poll.body.contains("device_code=dev_123"));
            assert!(poll.body.contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code"
            ));
            assert!(!poll.has_authorization);
        }

        // After slow_down the period grows from 1 to 6 units.
        let after_slow_down = polls[2].at - polls[1].at;
        assert!(after_slow_down >= UNIT * 6, "{after_slow_down:?}");
    }

    #[tokio::test]
    async fn access_denied_stores_nothing() {
        let harness = Harness::start(vec![code_response(), poll_error("access_denied")]).await;

        let authorization = harness.flow.init_login().await.unwrap();
        let err = harness
            .flow
            .await_login(CONTEXT, &authorization)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceAuthError::Denied));
        assert_eq!(harness.flow.status(), DeviceLoginStatus::Denied);
        assert_eq!(harness.cache.get(CONTEXT, harness.origin()), None);
    }

    #[tokio::test]
    async fn unsupported_token_type_stores_nothing() {
        let harness = Harness::start(vec![code_response(), token("mac")]).await;

        let authorization = harness.flow.init_login().await.unwrap();
        let err = harness
            .flow
            .await_login(CONTEXT, &authorization)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceAuthError::UnsupportedTokenType(ref t) if t == "mac"));
        assert_eq!(harness.flow.status(), DeviceLoginStatus::Failed);
        assert!(!harness.cache.record_path(CONTEXT, harness.origin()).exists());
    }

    #[tokio::test]
    async fn other_error_codes_fail() {
        let harness = Harness::start(vec![code_response(), poll_error("invalid_grant")]).await;

        let authorization = harness.flow.init_login().await.unwrap();
        let err = harness
            .flow
            .await_login(CONTEXT, &authorization)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceAuthError::Failed { ref code, .. } if code == "invalid_grant"));
        assert_eq!(harness.flow.status(), DeviceLoginStatus::Failed);
    }

    #[tokio::test]
    async fn unparsable_error_body_surfaces_request_error() {
        let harness = Harness::start(vec![code_response()]).await;
        let authorization = harness.flow.init_login().await.unwrap();

        let raw = ScriptedServer::start(vec![(502, "<html>bad gateway</html>".to_string())]).await;
        let executor = RequestExecutor::new(ExecutorConfig::new(raw.base_url.clone()));
        let flow = DeviceAuthFlow::new(&executor, harness.cache.clone(), raw.base_url.as_str())
            .with_interval_unit(UNIT);
        flow.transition(&DeviceLoginInput::CodeIssued).unwrap();

        let err = flow.await_login(CONTEXT, &authorization).await.unwrap_err();

        match err {
            DeviceAuthError::Request(RequestError::Http { status, body, .. }) => {
                assert_eq!(status, 502);
                assert_eq!(body.raw, "<html>bad gateway</html>");
            }
            other => panic!("expected Request(Http), got {other:?}"),
        }
        assert_eq!(raw.recorded().len(), 1);
    }

    #[tokio::test]
    async fn polling_stops_when_code_expires() {
        let harness = Harness::start(vec![
            (
                200,
                json!({
                    "device_code": "dev_123",
                    "user_code": "WDJB-MJHT",
                    "verification_uri": "https://tollgate.dev/device",
                    "expires_in": 3,
                    "interval": 1
                }),
            ),
            poll_error("authorization_pending"),
        ])
        .await;

        let authorization = harness.flow.init_login().await.unwrap();
        let err = harness
            .flow
            .await_login(CONTEXT, &authorization)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceAuthError::Expired(lifetime) if lifetime == UNIT * 3));
        assert_eq!(harness.flow.status(), DeviceLoginStatus::Failed);
        let polls = harness
            .server
            .recorded()
            .iter()
            .filter(|r| r.path == DEVICE_TOKEN_PATH)
            .count();
        assert!(polls <= 2, "polled {polls} times");
    }

    #[tokio::test]
    async fn cancelled_login_stops_polling() {
        let harness = Harness::start(vec![code_response(), poll_error("authorization_pending")]).await;
        let source = CancelSource::new();
        let flow = DeviceAuthFlow::new(
            &RequestExecutor::new(ExecutorConfig::new(harness.server.base_url.clone())),
            harness.cache.clone(),
            harness.origin(),
        )
        .with_interval_unit(UNIT)
        .with_cancel_signal(source.signal());

        let authorization = flow.init_login().await.unwrap();
        source.cancel();

        let err = flow.await_login(CONTEXT, &authorization).await.unwrap_err();
        assert!(matches!(err, DeviceAuthError::Cancelled));
        assert_eq!(flow.status(), DeviceLoginStatus::Failed);
    }

    #[tokio::test]
    async fn await_without_init_is_rejected() {
        let harness = Harness::start(vec![code_response()]).await;
        let authorization = DeviceAuthorization {
            device_code: "dev".to_string(),
            user_code: "CODE".to_string(),
            verification_uri: "https://tollgate.dev/device".to_string(),
            verification_uri_complete: None,
            expires_in: 60,
            interval: 1,
            client_id: "client".to_string(),
        };

        let err = harness
            .flow
            .await_login(CONTEXT, &authorization)
            .await
            .unwrap_err();

        assert!(matches!(err, DeviceAuthError::InvalidStateTransition(_)));
        assert!(harness.server.recorded().is_empty());
    }

    #[tokio::test]
    async fn failed_code_request_marks_login_failed() {
        let harness = Harness::start(vec![(500, json!({ "message": "down" }))]).await;

        let err = harness.flow.init_login().await.unwrap_err();

        assert!(matches!(
            err,
            DeviceAuthError::Request(RequestError::Http { status: 500, .. })
        ));
        assert_eq!(harness.flow.status(), DeviceLoginStatus::Failed);
    }
}
