use std::collections::HashSet;
use std::io::{Read as IoRead, Write as IoWrite};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pty::{PtyError, PtyEvent, PtyProcess, PtySpawner, Result, TermSize};

const READ_CHUNK: usize = 4096;
const CHANNEL_DEPTH: usize = 256;

fn lock_or_recover<'a, T: ?Sized>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!("{what} lock was poisoned, recovering");
        e.into_inner()
    })
}

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

/// The program every PTY in a pool runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Value of `TERM` in the child environment.
    pub term: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            term: "xterm-256color".to_string(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn to_builder(&self) -> CommandBuilder {
        let mut command = CommandBuilder::new(&self.program);
        command.args(&self.args);
        if let Some(cwd) = &self.cwd {
            command.cwd(cwd);
        }
        for (k, v) in &self.env {
            command.env(k, v);
        }
        command.env("TERM", &self.term);
        command
    }
}

// ---------------------------------------------------------------------------
// PtyHandle
// ---------------------------------------------------------------------------

/// A single PTY process with channel-based I/O.
///
/// A reader thread turns each read of the master into a [`PtyEvent::Output`]
/// and, once the master reports EOF, reaps the child and sends
/// [`PtyEvent::Exited`]. A writer thread drains queued stdin bytes.
pub struct PtyHandle {
    pub id: Uuid,
    events: flume::Receiver<PtyEvent>,
    writer: flume::Sender<Vec<u8>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    master: Mutex<Box<dyn MasterPty + Send>>,
    exited: Arc<AtomicBool>,
    pool: Arc<Mutex<HashSet<Uuid>>>,
}

impl PtyHandle {
    /// Whether the reader thread has observed the child exit.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }
}

impl PtyProcess for PtyHandle {
    fn id(&self) -> Uuid {
        self.id
    }

    fn write(&self, data: &[u8]) -> Result<()> {
        self.writer
            .send(data.to_vec())
            .map_err(|_| PtyError::Closed)
    }

    fn resize(&self, size: TermSize) -> Result<()> {
        let master = lock_or_recover(&self.master, "master");
        master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Internal(format!("resize failed: {e}")))?;
        debug!(pty_id = %self.id, cols = size.cols, rows = size.rows, "PTY resized");
        Ok(())
    }

    fn terminate(&self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        let mut killer = lock_or_recover(&self.killer, "killer");
        killer.kill()?;
        info!(pty_id = %self.id, "terminated PTY process");
        Ok(())
    }

    fn events(&self) -> flume::Receiver<PtyEvent> {
        self.events.clone()
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            debug!(pty_id = %self.id, "terminate on drop failed: {e}");
        }
        lock_or_recover(&self.pool, "PtyPool").remove(&self.id);
        debug!(pty_id = %self.id, "released PTY handle from pool");
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("id", &self.id)
            .field("exited", &self.has_exited())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PtyPool
// ---------------------------------------------------------------------------

/// Spawns [`CommandSpec`] inside PTYs, up to a configured number at once.
pub struct PtyPool {
    spec: CommandSpec,
    max_ptys: usize,
    handles: Arc<Mutex<HashSet<Uuid>>>,
}

impl PtyPool {
    pub fn new(spec: CommandSpec, max_ptys: usize) -> Self {
        info!(max_ptys, program = %spec.program, "creating PtyPool");
        Self {
            spec,
            max_ptys,
            handles: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Number of live handles. A handle counts until it is dropped.
    pub fn active_count(&self) -> usize {
        lock_or_recover(&self.handles, "PtyPool").len()
    }

    /// Spawn the pool's command in a new PTY of the given size.
    pub fn spawn_handle(&self, size: TermSize) -> Result<PtyHandle> {
        let handle_id = Uuid::new_v4();
        {
            let mut handles = lock_or_recover(&self.handles, "PtyPool");
            if handles.len() >= self.max_ptys {
                return Err(PtyError::AtCapacity { max: self.max_ptys });
            }
            handles.insert(handle_id);
        }

        match self.open(handle_id, size) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                lock_or_recover(&self.handles, "PtyPool").remove(&handle_id);
                Err(e)
            }
        }
    }

    fn open(&self, handle_id: Uuid, size: TermSize) -> Result<PtyHandle> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;

        let mut child = pair
            .slave
            .spawn_command(self.spec.to_builder())
            .map_err(|e| PtyError::SpawnFailed(format!("{}: {e}", self.spec.program)))?;
        // The master only sees EOF once every slave descriptor is closed.
        drop(pair.slave);

        debug!(pty_id = %handle_id, program = %self.spec.program, %size, "spawned PTY process");

        let killer = child.clone_killer();
        let exited = Arc::new(AtomicBool::new(false));

        // -- output reader + exit watcher --
        let (event_tx, event_rx) = flume::bounded::<PtyEvent>(CHANNEL_DEPTH);
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        let reader_exited = exited.clone();
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if event_tx.send(PtyEvent::Output(buf[..n].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // Linux reports EIO on the master once the child is gone.
                        debug!(pty_id = %handle_id, "pty reader finished: {e}");
                        break;
                    }
                }
            }
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code()),
                Err(e) => {
                    warn!(pty_id = %handle_id, "failed to reap PTY child: {e}");
                    None
                }
            };
            reader_exited.store(true, Ordering::Release);
            debug!(pty_id = %handle_id, ?code, "PTY process exited");
            let _ = event_tx.send(PtyEvent::Exited { code });
        });

        // -- stdin writer --
        // Unbounded: a child that stops reading stdin must not stall `write`.
        let (write_tx, write_rx) = flume::unbounded::<Vec<u8>>();
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::SpawnFailed(e.to_string()))?;
        std::thread::spawn(move || {
            while let Ok(data) = write_rx.recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        });

        Ok(PtyHandle {
            id: handle_id,
            events: event_rx,
            writer: write_tx,
            killer: Mutex::new(killer),
            master: Mutex::new(pair.master),
            exited,
            pool: self.handles.clone(),
        })
    }
}

impl PtySpawner for PtyPool {
    fn spawn(&self, size: TermSize) -> Result<Box<dyn PtyProcess>> {
        Ok(Box::new(self.spawn_handle(size)?))
    }
}

impl std::fmt::Debug for PtyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyPool")
            .field("program", &self.spec.program)
            .field("max_ptys", &self.max_ptys)
            .field("active_count", &self.active_count())
            .finish()
    }
}
