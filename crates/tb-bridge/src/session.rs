use std::sync::Arc;

use serde::Serialize;
use tb_session::{PtyEvent, PtyProcess, PtySpawner, TermSize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{
    spawn_failed_banner, ClientFrame, ServerFrame, SizePolicy, Utf8Decoder, CLEAR_SCREEN,
    EXIT_BANNER, START_BANNER,
};

fn is_start_key(data: &str) -> bool {
    data.contains(['\r', '\n'])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Connected, waiting for the first Enter.
    AwaitingStart,
    /// A PTY process is live.
    Running,
    /// The process ended (or failed to start); Enter starts a new one.
    Exited,
}

/// Bridge state for one browser connection.
///
/// Events go in through [`Session::handle_frame`] and
/// [`Session::handle_pty_event`]; frames to send back come out. The caller
/// serializes all events for a session, so nothing here locks.
pub struct Session {
    id: Uuid,
    state: SessionState,
    pending_size: TermSize,
    policy: SizePolicy,
    spawner: Arc<dyn PtySpawner>,
    pty: Option<Box<dyn PtyProcess>>,
    decoder: Utf8Decoder,
    spawn_count: u32,
}

impl Session {
    pub fn new(spawner: Arc<dyn PtySpawner>, policy: SizePolicy, initial_size: TermSize) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::AwaitingStart,
            pending_size: initial_size,
            policy,
            spawner,
            pty: None,
            decoder: Utf8Decoder::default(),
            spawn_count: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Most recent size reported by the browser, or the initial size.
    pub fn pending_size(&self) -> TermSize {
        self.pending_size
    }

    /// How many processes this session has started.
    pub fn spawn_count(&self) -> u32 {
        self.spawn_count
    }

    /// Identity and event receiver of the live PTY, if there is one.
    pub fn pty_events(&self) -> Option<(Uuid, flume::Receiver<PtyEvent>)> {
        self.pty.as_ref().map(|pty| (pty.id(), pty.events()))
    }

    /// Whether handling `frame` would launch the CLI. Launching opens a PTY
    /// and forks, so callers on an async runtime run such frames off-thread.
    pub fn starts_process(&self, frame: &ClientFrame) -> bool {
        self.pty.is_none() && matches!(frame, ClientFrame::Input(data) if is_start_key(data))
    }

    /// Frames to send as soon as the channel opens.
    pub fn open(&mut self) -> Vec<ServerFrame> {
        debug!(session_id = %self.id, "session opened");
        vec![ServerFrame::output(START_BANNER)]
    }

    pub fn handle_frame(&mut self, frame: ClientFrame) -> Vec<ServerFrame> {
        match frame {
            ClientFrame::Input(data) => self.handle_input(data),
            ClientFrame::Resize { cols, rows } => {
                let size = self.policy.clamp(&cols, &rows);
                self.pending_size = size;
                if let Some(pty) = &self.pty {
                    if let Err(e) = pty.resize(size) {
                        warn!(session_id = %self.id, %size, "PTY resize failed: {e}");
                    }
                }
                debug!(session_id = %self.id, cols = size.cols, rows = size.rows, "terminal resized");
                Vec::new()
            }
            ClientFrame::Raw(bytes) => {
                match &self.pty {
                    Some(pty) => self.write_to_pty(pty.as_ref(), &bytes),
                    None => debug!(
                        session_id = %self.id,
                        bytes = bytes.len(),
                        "discarding unframed input, no process running"
                    ),
                }
                Vec::new()
            }
        }
    }

    /// Apply an event from the PTY identified by `pty_id`. Events from any
    /// other PTY are stale and ignored.
    pub fn handle_pty_event(&mut self, pty_id: Uuid, event: PtyEvent) -> Vec<ServerFrame> {
        if self.pty.as_ref().map(|p| p.id()) != Some(pty_id) {
            debug!(session_id = %self.id, %pty_id, "ignoring event from stale PTY");
            return Vec::new();
        }

        match event {
            PtyEvent::Output(bytes) => {
                let text = self.decoder.decode(&bytes);
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![ServerFrame::output(text)]
                }
            }
            PtyEvent::Exited { code } => {
                self.pty = None;
                self.state = SessionState::Exited;
                info!(session_id = %self.id, %pty_id, ?code, "CLI exited");

                let mut frames = Vec::with_capacity(2);
                let tail = self.decoder.finish();
                if !tail.is_empty() {
                    frames.push(ServerFrame::output(tail));
                }
                frames.push(ServerFrame::output(EXIT_BANNER));
                frames
            }
        }
    }

    /// Tear down on channel close, terminating any live process.
    pub fn close(mut self) {
        if let Some(pty) = self.pty.take() {
            if let Err(e) = pty.terminate() {
                debug!(session_id = %self.id, "terminate on close failed: {e}");
            }
            info!(session_id = %self.id, pty_id = %pty.id(), "terminated CLI on disconnect");
        }
        debug!(session_id = %self.id, "session closed");
    }

    fn handle_input(&mut self, data: String) -> Vec<ServerFrame> {
        if let Some(pty) = &self.pty {
            self.write_to_pty(pty.as_ref(), data.as_bytes());
            return Vec::new();
        }
        if is_start_key(&data) {
            self.start()
        } else {
            debug!(session_id = %self.id, state = ?self.state, "discarding input before start");
            Vec::new()
        }
    }

    fn start(&mut self) -> Vec<ServerFrame> {
        let mut frames = vec![ServerFrame::output(CLEAR_SCREEN)];
        let size = self.pending_size;
        match self.spawner.spawn(size) {
            Ok(pty) => {
                self.spawn_count += 1;
                info!(
                    session_id = %self.id,
                    pty_id = %pty.id(),
                    cols = size.cols,
                    rows = size.rows,
                    spawn_count = self.spawn_count,
                    "CLI started"
                );
                self.decoder = Utf8Decoder::default();
                self.pty = Some(pty);
                self.state = SessionState::Running;
            }
            Err(e) => {
                warn!(session_id = %self.id, "failed to start CLI: {e}");
                self.state = SessionState::Exited;
                frames.push(ServerFrame::output(spawn_failed_banner(&e.to_string())));
            }
        }
        frames
    }

    fn write_to_pty(&self, pty: &dyn PtyProcess, data: &[u8]) {
        if let Err(e) = pty.write(data) {
            warn!(session_id = %self.id, pty_id = %pty.id(), "PTY write failed: {e}");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending_size", &self.pending_size)
            .field("spawn_count", &self.spawn_count)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tb_session::PtyError;

    #[derive(Default)]
    struct Record {
        spawns: Vec<TermSize>,
        writes: Vec<Vec<u8>>,
        resizes: Vec<TermSize>,
        terminated: Vec<Uuid>,
        live: usize,
        max_live: usize,
    }

    #[derive(Default)]
    struct FakeSpawner {
        record: Arc<Mutex<Record>>,
        senders: Mutex<Vec<(Uuid, flume::Sender<PtyEvent>)>>,
        fail: AtomicBool,
    }

    impl FakeSpawner {
        fn record(&self) -> std::sync::MutexGuard<'_, Record> {
            self.record.lock().unwrap()
        }

        fn last_sender(&self) -> flume::Sender<PtyEvent> {
            self.senders.lock().unwrap().last().unwrap().1.clone()
        }
    }

    struct FakePty {
        id: Uuid,
        record: Arc<Mutex<Record>>,
        events: flume::Receiver<PtyEvent>,
    }

    impl PtySpawner for FakeSpawner {
        fn spawn(&self, size: TermSize) -> tb_session::pty::Result<Box<dyn PtyProcess>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PtyError::SpawnFailed("no such file".into()));
            }
            let (tx, rx) = flume::unbounded();
            let id = Uuid::new_v4();
            self.senders.lock().unwrap().push((id, tx));
            {
                let mut rec = self.record();
                rec.spawns.push(size);
                rec.live += 1;
                rec.max_live = rec.max_live.max(rec.live);
            }
            Ok(Box::new(FakePty { id, record: self.record.clone(), events: rx }))
        }
    }

    impl PtyProcess for FakePty {
        fn id(&self) -> Uuid {
            self.id
        }
        fn write(&self, data: &[u8]) -> tb_session::pty::Result<()> {
            self.record.lock().unwrap().writes.push(data.to_vec());
            Ok(())
        }
        fn resize(&self, size: TermSize) -> tb_session::pty::Result<()> {
            self.record.lock().unwrap().resizes.push(size);
            Ok(())
        }
        fn terminate(&self) -> tb_session::pty::Result<()> {
            self.record.lock().unwrap().terminated.push(self.id);
            Ok(())
        }
        fn events(&self) -> flume::Receiver<PtyEvent> {
            self.events.clone()
        }
    }

    impl Drop for FakePty {
        fn drop(&mut self) {
            self.record.lock().unwrap().live -= 1;
        }
    }

    fn session() -> (Session, Arc<FakeSpawner>) {
        let spawner = Arc::new(FakeSpawner::default());
        let session = Session::new(spawner.clone(), SizePolicy::default(), TermSize::new(100, 30));
        (session, spawner)
    }

    fn input(text: &str) -> ClientFrame {
        ClientFrame::Input(text.to_string())
    }

    fn resize(cols: serde_json::Value, rows: serde_json::Value) -> ClientFrame {
        ClientFrame::Resize { cols, rows }
    }

    fn outputs(frames: &[ServerFrame]) -> Vec<&str> {
        frames
            .iter()
            .map(|ServerFrame::Output { data }| data.as_str())
            .collect()
    }

    /// Run the session's current PTY to exit.
    fn exit_current(session: &mut Session) -> Vec<ServerFrame> {
        let (pty_id, _) = session.pty_events().expect("no live pty");
        session.handle_pty_event(pty_id, PtyEvent::Exited { code: Some(0) })
    }

    #[test]
    fn open_sends_start_banner() {
        let (mut s, _) = session();
        assert_eq!(outputs(&s.open()), vec![START_BANNER]);
        assert_eq!(s.state(), SessionState::AwaitingStart);
        assert_eq!(s.pending_size(), TermSize::new(100, 30));
    }

    #[test]
    fn input_without_newline_is_gated() {
        let (mut s, spawner) = session();
        for text in ["a", "ls", "\x1b[A", ""] {
            assert!(s.handle_frame(input(text)).is_empty());
        }
        assert_eq!(s.state(), SessionState::AwaitingStart);
        assert!(spawner.record().spawns.is_empty());
        assert!(spawner.record().writes.is_empty());

        s.handle_frame(input("\n"));
        exit_current(&mut s);
        assert!(s.handle_frame(input("q")).is_empty());
        assert_eq!(s.state(), SessionState::Exited);
        assert_eq!(spawner.record().spawns.len(), 1);
    }

    #[test]
    fn carriage_return_starts_cli_after_clearing_screen() {
        let (mut s, spawner) = session();
        let frames = s.handle_frame(input("\r"));
        assert_eq!(outputs(&frames), vec![CLEAR_SCREEN]);
        assert_eq!(s.state(), SessionState::Running);
        assert_eq!(spawner.record().spawns, vec![TermSize::new(100, 30)]);
        // The starting keystroke is not forwarded.
        assert!(spawner.record().writes.is_empty());
    }

    #[test]
    fn only_one_pty_per_session() {
        let (mut s, spawner) = session();
        s.handle_frame(input("\n"));
        s.handle_frame(input("\n"));
        s.handle_frame(input("again\r\n"));
        let rec = spawner.record();
        assert_eq!(rec.spawns.len(), 1);
        assert_eq!(rec.max_live, 1);
        assert_eq!(rec.writes, vec![b"\n".to_vec(), b"again\r\n".to_vec()]);
    }

    #[test]
    fn resize_before_start_is_applied_at_spawn() {
        let (mut s, spawner) = session();
        assert!(s.handle_frame(resize(json!(120), json!(40))).is_empty());
        assert_eq!(s.pending_size(), TermSize::new(120, 40));
        assert!(spawner.record().resizes.is_empty());

        s.handle_frame(input("\r"));
        assert_eq!(spawner.record().spawns, vec![TermSize::new(120, 40)]);
    }

    #[test]
    fn resize_is_clamped_and_forwarded_while_running() {
        let (mut s, spawner) = session();
        s.handle_frame(input("\n"));

        s.handle_frame(resize(json!(5), json!(2)));
        s.handle_frame(resize(json!("x"), json!(40)));
        assert_eq!(
            spawner.record().resizes,
            vec![TermSize::new(20, 10), TermSize::new(80, 40)]
        );
        assert_eq!(s.pending_size(), TermSize::new(80, 40));
    }

    #[test]
    fn output_relayed_in_order_one_frame_per_event() {
        let (mut s, spawner) = session();
        s.handle_frame(input("\n"));
        let (pty_id, rx) = s.pty_events().unwrap();
        let tx = spawner.last_sender();
        for chunk in ["a", "b", "c"] {
            tx.send(PtyEvent::Output(chunk.as_bytes().to_vec())).unwrap();
        }

        let mut relayed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            relayed.extend(s.handle_pty_event(pty_id, event));
        }
        assert_eq!(outputs(&relayed), vec!["a", "b", "c"]);
    }

    #[test]
    fn exit_then_newline_restarts_with_stored_size() {
        let (mut s, spawner) = session();
        s.handle_frame(resize(json!(90), json!(33)));
        s.handle_frame(input("\n"));
        let first = s.pty_events().unwrap().0;

        let frames = exit_current(&mut s);
        assert_eq!(outputs(&frames), vec![EXIT_BANNER]);
        assert_eq!(s.state(), SessionState::Exited);
        assert!(s.pty_events().is_none());
        assert_eq!(spawner.record().live, 0);

        s.handle_frame(resize(json!(132), json!(43)));
        let frames = s.handle_frame(input("\n"));
        assert_eq!(outputs(&frames), vec![CLEAR_SCREEN]);
        assert_eq!(s.state(), SessionState::Running);
        assert_ne!(s.pty_events().unwrap().0, first);
        assert_eq!(
            spawner.record().spawns,
            vec![TermSize::new(90, 33), TermSize::new(132, 43)]
        );
        assert_eq!(s.spawn_count(), 2);
    }

    #[test]
    fn running_input_is_written_verbatim_without_synthesized_output() {
        let (mut s, spawner) = session();
        s.handle_frame(input("\n"));
        let frames = s.handle_frame(input("ls\n"));
        assert!(frames.is_empty());
        assert_eq!(spawner.record().writes, vec![b"ls\n".to_vec()]);
    }

    #[test]
    fn only_newline_input_without_a_pty_starts_a_process() {
        let (mut s, _) = session();
        assert!(s.starts_process(&input("\r")));
        assert!(s.starts_process(&input("ls\n")));
        assert!(!s.starts_process(&input("ls")));
        assert!(!s.starts_process(&ClientFrame::Raw(b"\n".to_vec())));
        assert!(!s.starts_process(&resize(80.into(), 24.into())));

        s.handle_frame(input("\n"));
        assert!(!s.starts_process(&input("\n")));

        exit_current(&mut s);
        assert!(s.starts_process(&input("\n")));
    }

    #[test]
    fn raw_frames_pass_through_only_while_running() {
        let (mut s, spawner) = session();
        assert!(s.handle_frame(ClientFrame::Raw(b"early\n".to_vec())).is_empty());
        assert_eq!(s.state(), SessionState::AwaitingStart);
        assert!(spawner.record().spawns.is_empty());

        s.handle_frame(input("\n"));
        s.handle_frame(ClientFrame::Raw(b"not json".to_vec()));
        assert_eq!(spawner.record().writes, vec![b"not json".to_vec()]);
    }

    #[test]
    fn spawn_failure_reports_and_allows_retry() {
        let (mut s, spawner) = session();
        spawner.fail.store(true, Ordering::SeqCst);

        let frames = s.handle_frame(input("\r"));
        let texts = outputs(&frames);
        assert_eq!(texts[0], CLEAR_SCREEN);
        assert!(texts[1].contains("Failed to start CLI"), "got {texts:?}");
        assert!(texts[1].contains("no such file"));
        assert_eq!(s.state(), SessionState::Exited);
        assert!(s.pty_events().is_none());

        spawner.fail.store(false, Ordering::SeqCst);
        s.handle_frame(input("\r"));
        assert_eq!(s.state(), SessionState::Running);
    }

    #[test]
    fn stale_pty_events_are_ignored() {
        let (mut s, _) = session();
        s.handle_frame(input("\n"));
        let frames = s.handle_pty_event(Uuid::new_v4(), PtyEvent::Output(b"ghost".to_vec()));
        assert!(frames.is_empty());
        let frames = s.handle_pty_event(Uuid::new_v4(), PtyEvent::Exited { code: None });
        assert!(frames.is_empty());
        assert_eq!(s.state(), SessionState::Running);
    }

    #[test]
    fn exit_flushes_partial_utf8_before_banner() {
        let (mut s, _) = session();
        s.handle_frame(input("\n"));
        let (pty_id, _) = s.pty_events().unwrap();
        assert!(s.handle_pty_event(pty_id, PtyEvent::Output(vec![b'x', 0xe2])).len() == 1);
        let frames = s.handle_pty_event(pty_id, PtyEvent::Exited { code: Some(1) });
        assert_eq!(outputs(&frames), vec!["\u{FFFD}", EXIT_BANNER]);
    }

    #[test]
    fn close_terminates_live_pty() {
        let (mut s, spawner) = session();
        s.handle_frame(input("\n"));
        let (pty_id, _) = s.pty_events().unwrap();
        s.close();
        let rec = spawner.record();
        assert_eq!(rec.terminated, vec![pty_id]);
        assert_eq!(rec.live, 0);
    }

    #[test]
    fn close_without_pty_is_quiet() {
        let (s, spawner) = session();
        s.close();
        assert!(spawner.record().terminated.is_empty());
    }

    #[test]
    fn scenario_resize_then_enter() {
        let (mut s, spawner) = session();
        assert_eq!(outputs(&s.open()), vec!["\r\n[Press Enter to start]\r\n"]);

        assert!(s.handle_frame(ClientFrame::decode_text(r#"{"type":"resize","cols":120,"rows":40}"#)).is_empty());
        assert_eq!(s.pending_size(), TermSize::new(120, 40));

        let frames = s.handle_frame(ClientFrame::decode_text(r#"{"type":"input","data":"\r"}"#));
        assert_eq!(outputs(&frames), vec![CLEAR_SCREEN]);
        assert_eq!(spawner.record().spawns, vec![TermSize::new(120, 40)]);
        assert_eq!(s.state(), SessionState::Running);
    }
}
