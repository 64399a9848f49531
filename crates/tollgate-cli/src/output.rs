//! Output formatting for the CLI.

use clap::ValueEnum;
use client_runtime::RuntimeError;
use request_executor::RequestSummary;
use serde::Serialize;
use serde_json::json;

/// Output format.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a JSON value, pretty in both formats.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to render output: {}", e),
    }
}

/// Print a success message.
pub fn print_success(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", message),
        OutputFormat::Json => print_json(&json!({ "status": "success", "message": message })),
    }
}

/// Print an error message.
pub fn print_error(message: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => eprintln!("Error: {}", message),
        OutputFormat::Json => {
            eprintln!("{}", json!({ "status": "error", "message": message }));
        }
    }
}

/// Print a command failure, with the redacted request when one was sent.
pub fn print_failure(error: &anyhow::Error, format: &OutputFormat) {
    let request = error
        .downcast_ref::<RuntimeError>()
        .and_then(RuntimeError::request_error)
        .and_then(|e| e.request());

    match format {
        OutputFormat::Text => {
            eprintln!("Error: {}", error);
            if let Some(request) = request {
                eprintln!();
                print_request(request);
            }
        }
        OutputFormat::Json => {
            let mut body = json!({ "status": "error", "message": error.to_string() });
            if let Some(request) = request {
                body["request"] = request_json(request);
            }
            eprintln!("{}", body);
        }
    }
}

fn print_request(request: &RequestSummary) {
    eprintln!("Request:  {}", request);
    for (name, value) in &request.headers {
        eprintln!("  {:<16} {}", format!("{}:", name), value);
    }
    if let Some(body) = &request.body {
        eprintln!("Body:     {}", body);
    }
}

fn request_json(request: &RequestSummary) -> serde_json::Value {
    let headers: serde_json::Map<String, serde_json::Value> = request
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), json!(value)))
        .collect();

    json!({
        "method": request.method,
        "url": request.url,
        "headers": headers,
        "body": request.body,
    })
}

/// Print a table row.
pub fn print_row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{}:", label), value);
}
