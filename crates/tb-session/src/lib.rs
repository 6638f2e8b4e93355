//! Pseudo-terminal processes for termbridge sessions.
//!
//! [`pty`] defines the capability the session bridge is written against
//! ([`pty::PtySpawner`] / [`pty::PtyProcess`]); [`pty_pool`] is the native
//! implementation backed by `portable-pty`, with a cap on concurrent PTYs.

pub mod pty;
pub mod pty_pool;

pub use pty::{PtyError, PtyEvent, PtyProcess, PtySpawner, TermSize};
pub use pty_pool::{CommandSpec, PtyHandle, PtyPool};
