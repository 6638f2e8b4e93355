//! Session bridge between browser terminals and server-side PTYs.
//!
//! Each WebSocket connection gets one [`session::Session`], a small state
//! machine that starts the configured CLI on the first Enter, relays its
//! output, forwards keystrokes and resizes, and offers a restart after the
//! process exits.
//!
//! Key modules:
//! - [`protocol`] — JSON frames, banners, size clamping, UTF-8 reassembly
//! - [`session`] — the per-connection state machine
//! - [`registry`] — read-only view of live sessions
//! - [`terminal_ws`] — axum WebSocket driver
//! - [`http_api`] — router, health and session listing

pub mod http_api;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod terminal_ws;
