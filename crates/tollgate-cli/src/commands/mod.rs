//! CLI command implementations.

mod api;
mod auth;

pub use api::{get, post};
pub use auth::{login, logout, status};
