//! Raw API requests.

use crate::output;
use anyhow::{Context, Result};
use client_runtime::{ClientRuntime, RuntimeError};
use request_executor::{Method, RequestBody};
use serde_json::Value;

/// Send a GET request and print the JSON response.
pub async fn get(
    runtime: &ClientRuntime,
    context: &str,
    path: &str,
) -> Result<()> {
    let value = send(runtime, context, path, Method::GET, None).await?;
    output::print_json(&value);
    Ok(())
}

/// Send a POST request with an optional JSON body and print the response.
pub async fn post(
    runtime: &ClientRuntime,
    context: &str,
    path: &str,
    json: Option<&str>,
) -> Result<()> {
    let body = json
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--json is not valid JSON")?
        .map(RequestBody::Json);

    let value = send(runtime, context, path, Method::POST, body).await?;
    output::print_json(&value);
    Ok(())
}

async fn send(
    runtime: &ClientRuntime,
    context: &str,
    path: &str,
    method: Method,
    body: Option<RequestBody>,
) -> Result<Value, RuntimeError> {
    let client = runtime.ready_client(context).await?;
    Ok(client.execute(path, method, body).await?)
}
