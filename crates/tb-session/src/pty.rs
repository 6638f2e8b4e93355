use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("pty pool is at capacity ({max})")]
    AtCapacity { max: usize },

    #[error("pty spawn failed: {0}")]
    SpawnFailed(String),

    #[error("pty I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty input channel closed")]
    Closed,

    #[error("pty internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PtyError>;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl TermSize {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl std::fmt::Display for TermSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Something the PTY reported. A process delivers any number of `Output`
/// events followed by exactly one `Exited`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// Bytes from a single read of the PTY master.
    Output(Vec<u8>),
    /// The child has terminated, for whatever reason.
    Exited { code: Option<u32> },
}

/// A running process attached to a pseudo-terminal.
///
/// Dropping the value terminates the process; events still queued in
/// [`PtyProcess::events`] receivers are discarded along with it.
pub trait PtyProcess: Send {
    fn id(&self) -> Uuid;

    /// Queue bytes for the process's stdin. Never blocks.
    fn write(&self, data: &[u8]) -> Result<()>;

    fn resize(&self, size: TermSize) -> Result<()>;

    /// Ask the process to stop. The `Exited` event still follows.
    fn terminate(&self) -> Result<()>;

    /// Receiver for this process's output and exit notification.
    fn events(&self) -> flume::Receiver<PtyEvent>;
}

/// Launches PTY processes. Injected into the session bridge so the state
/// machine can run against fakes.
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, size: TermSize) -> Result<Box<dyn PtyProcess>>;
}
