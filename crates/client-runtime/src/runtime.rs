use crate::RuntimeResult;
use device_auth::{DeviceAuthFlow, DeviceAuthorization, DeviceLoginStatus};
use request_executor::{ExecutorConfig, RequestExecutor};
use retry_backoff::CancelSignal;
use runtime_config_and_utils::{Config, Paths};
use serde::Serialize;
use sidecar_supervisor::{LifecycleHooks, SidecarConfig, SidecarSupervisor};
use std::sync::Arc;
use std::time::Duration;
use token_cache::{Credential, TokenCache, TokenType};
use tracing::{debug, info};
use url::Url;

/// Shared client state.
///
/// Cloning is cheap; clones share the sidecar and the cache.
#[derive(Clone, Debug)]
pub struct ClientRuntime {
    config: Arc<Config>,
    cache: TokenCache,
    supervisor: SidecarSupervisor,
    login_origin: Url,
    credential_origin: String,
    login_interval_unit: Duration,
}

/// What `status` reports for a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub context: String,
    pub origin: String,
    pub logged_in: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Endpoint requests currently go to, if one is known without spawning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub live_mode: bool,
}

/// A device login whose code has been issued and is waiting for approval.
pub struct PendingLogin {
    flow: DeviceAuthFlow,
    authorization: DeviceAuthorization,
}

impl PendingLogin {
    /// Codes and URL to show the user.
    pub fn authorization(&self) -> &DeviceAuthorization {
        &self.authorization
    }

    pub fn status(&self) -> DeviceLoginStatus {
        self.flow.status()
    }

    /// Poll until the user decides, then cache the credential for `context`.
    pub async fn await_login(&self, context: &str) -> RuntimeResult<Credential> {
        Ok(self.flow.await_login(context, &self.authorization).await?)
    }
}

impl ClientRuntime {
    /// Build the runtime from loaded configuration.
    ///
    /// Nothing is spawned here; the sidecar starts on the first request.
    pub fn new(config: Config, paths: &Paths, hooks: Arc<dyn LifecycleHooks>) -> RuntimeResult<Self> {
        let api_origin = config.api_origin()?;
        let sidecar = SidecarConfig::new(&config.sidecar_binary)
            .with_env(config.sidecar_env())
            .with_external_endpoint(api_origin)
            .with_ready_timeout(config.sidecar_ready_timeout());
        let supervisor = SidecarSupervisor::new(sidecar, hooks);

        Self::with_parts(config, TokenCache::from_paths(paths), supervisor)
    }

    /// Assemble from already-built parts.
    pub fn with_parts(
        config: Config,
        cache: TokenCache,
        supervisor: SidecarSupervisor,
    ) -> RuntimeResult<Self> {
        let login_origin = config.web_origin()?;
        let credential_origin = login_origin.origin().ascii_serialization();

        debug!(
            login_origin = %login_origin,
            external_api = supervisor.config().external_endpoint.is_some(),
            live_mode = config.live_mode,
            "client runtime configured"
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            supervisor,
            login_origin,
            credential_origin,
            login_interval_unit: Duration::from_secs(1),
        })
    }

    /// Length of one server-declared polling second. Tests shrink it.
    pub fn with_login_interval_unit(mut self, unit: Duration) -> Self {
        self.login_interval_unit = unit;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    pub fn supervisor(&self) -> &SidecarSupervisor {
        &self.supervisor
    }

    /// Origin under which credentials are cached.
    pub fn credential_origin(&self) -> &str {
        &self.credential_origin
    }

    /// An executor against a ready endpoint, carrying the cached credential
    /// for `context` if there is one.
    pub async fn ready_client(&self, context: &str) -> RuntimeResult<RequestExecutor> {
        let endpoint = self.supervisor.ensure_ready().await?;
        let credential = self.cache.get(context, &self.credential_origin);
        debug!(
            context,
            endpoint = %endpoint,
            authenticated = credential.is_some(),
            "client ready"
        );

        Ok(RequestExecutor::new(
            ExecutorConfig::new(endpoint)
                .with_credential(credential)
                .with_debug(self.config.debug),
        ))
    }

    /// Request a device code from the login server.
    pub async fn start_login(&self, cancel: Option<CancelSignal>) -> RuntimeResult<PendingLogin> {
        let executor = RequestExecutor::new(
            ExecutorConfig::new(self.login_origin.clone()).with_debug(self.config.debug),
        );
        let mut flow = DeviceAuthFlow::new(&executor, self.cache.clone(), &self.credential_origin)
            .with_interval_unit(self.login_interval_unit);
        if let Some(signal) = cancel {
            flow = flow.with_cancel_signal(signal);
        }

        let authorization = flow.init_login().await?;
        Ok(PendingLogin {
            flow,
            authorization,
        })
    }

    /// Forget the cached credential for `context`. Returns whether one existed.
    pub fn logout(&self, context: &str) -> RuntimeResult<bool> {
        let removed = self.cache.delete(context, &self.credential_origin)?;
        info!(context, removed, "logged out");
        Ok(removed)
    }

    pub fn status(&self, context: &str) -> AuthStatus {
        let credential = self.cache.get(context, &self.credential_origin);
        let endpoint = self
            .supervisor
            .config()
            .external_endpoint
            .clone()
            .or_else(|| self.supervisor.endpoint());

        AuthStatus {
            context: context.to_string(),
            origin: self.credential_origin.clone(),
            logged_in: credential.is_some(),
            token_type: credential.as_ref().map(|c| c.token_type),
            scope: credential.and_then(|c| c.scope),
            endpoint: endpoint.map(String::from),
            live_mode: self.config.live_mode,
        }
    }

    /// Stop the sidecar if one is running.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
