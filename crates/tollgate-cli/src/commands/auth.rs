//! Authentication commands.

use crate::output::{self, OutputFormat};
use anyhow::Result;
use client_runtime::ClientRuntime;
use retry_backoff::CancelSource;
use serde_json::json;
use tracing::debug;

/// Log in with a device code.
pub async fn login(runtime: &ClientRuntime, context: &str, format: &OutputFormat) -> Result<()> {
    if runtime.status(context).logged_in {
        output::print_success(&format!("Already logged in for context '{}'", context), format);
        return Ok(());
    }

    let cancel = CancelSource::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received; cancelling login");
            on_interrupt.cancel();
        }
    });

    let pending = runtime.start_login(Some(cancel.signal())).await?;
    let authorization = pending.authorization();

    match format {
        OutputFormat::Text => {
            println!("To log in, open the following URL and enter the code:");
            println!();
            output::print_row("URL", &authorization.verification_uri);
            output::print_row("Code", &authorization.user_code);
            if let Some(complete) = &authorization.verification_uri_complete {
                output::print_row("Direct link", complete);
            }
            println!();
            println!("Waiting for approval...");
        }
        OutputFormat::Json => output::print_json(&json!({
            "status": "pending",
            "verification_uri": authorization.verification_uri,
            "verification_uri_complete": authorization.verification_uri_complete,
            "user_code": authorization.user_code,
            "expires_in": authorization.expires_in,
        })),
    }

    let result = pending.await_login(context).await;
    interrupt.abort();
    let credential = result?;

    output::print_success(
        &format!(
            "Logged in for context '{}' ({} token)",
            context, credential.token_type
        ),
        format,
    );
    Ok(())
}

/// Forget the cached credential.
pub fn logout(runtime: &ClientRuntime, context: &str, format: &OutputFormat) -> Result<()> {
    if runtime.logout(context)? {
        output::print_success("Logged out successfully", format);
    } else {
        output::print_success(&format!("Not logged in for context '{}'", context), format);
    }
    Ok(())
}

/// Show authentication status.
pub fn status(runtime: &ClientRuntime, context: &str, format: &OutputFormat) -> Result<()> {
    let status = runtime.status(context);

    match format {
        OutputFormat::Text => {
            output::print_row("Context", &status.context);
            output::print_row("Login server", &status.origin);
            output::print_row(
                "Auth",
                if status.logged_in { "logged in" } else { "not logged in" },
            );
            if let Some(token_type) = status.token_type {
                output::print_row("Token type", token_type.as_str());
            }
            if let Some(scope) = &status.scope {
                output::print_row("Scope", scope);
            }
            output::print_row(
                "Endpoint",
                status.endpoint.as_deref().unwrap_or("local sidecar (not started)"),
            );
            output::print_row("Mode", if status.live_mode { "live" } else { "test" });
        }
        OutputFormat::Json => output::print_json(&status),
    }
    Ok(())
}
