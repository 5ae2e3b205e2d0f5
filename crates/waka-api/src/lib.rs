//! HTTP + WebSocket transport over the execution core.
//!
//! Routes (all behind the token gate):
//! - `POST /exec` submit a command
//! - `GET /exec/out` WebSocket: output replay, live lines, final status
//! - `GET /health` state snapshot

mod error;
pub use error::ApiError;

mod auth;

mod http;
pub use http::{ApiState, HttpApi};

mod ws;

pub use axum;
