//! Observability setup shared by the termbridge binaries.
//!
//! - **Logging**: human-readable or JSON output via `tracing-subscriber`
//! - **Request IDs**: axum middleware that tags every HTTP request with an
//!   `X-Request-Id` and a tracing span

pub mod logging;
pub mod request_id;
