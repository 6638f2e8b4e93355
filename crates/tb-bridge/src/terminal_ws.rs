use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tb_session::{PtyEvent, TermSize};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::http_api::BridgeState;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::registry::SessionInfo;
use crate::session::{Session, SessionState};

/// GET /ws — one bridge session per WebSocket connection.
pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_terminal_ws(socket, state))
}

enum Wake {
    Socket(Option<Result<Message, axum::Error>>),
    Pty(Uuid, PtyEvent),
}

/// Wait for the live PTY's next event; never resolves when there is none.
async fn next_pty_event(pty: Option<(Uuid, flume::Receiver<PtyEvent>)>) -> (Uuid, PtyEvent) {
    match pty {
        Some((id, rx)) => match rx.recv_async().await {
            Ok(event) => (id, event),
            // Reader gone without reporting; treat as an exit.
            Err(_) => (id, PtyEvent::Exited { code: None }),
        },
        None => std::future::pending().await,
    }
}

/// Send frames in order. A closed channel makes this a no-op.
async fn send_frames(sink: &mut SplitSink<WebSocket, Message>, frames: Vec<ServerFrame>) {
    for frame in frames {
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("failed to encode output frame: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!("dropping frame for closed channel: {e}");
        }
    }
}

/// Apply a client frame. Frames that launch the CLI run on the blocking pool;
/// `None` means that task panicked and took the session with it.
async fn apply_frame(
    mut session: Session,
    frame: ClientFrame,
) -> Option<(Session, Vec<ServerFrame>)> {
    if !session.starts_process(&frame) {
        let frames = session.handle_frame(frame);
        return Some((session, frames));
    }
    let span = tracing::Span::current();
    let launch = tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let frames = session.handle_frame(frame);
        (session, frames)
    });
    match launch.await {
        Ok(done) => Some(done),
        Err(e) => {
            warn!("CLI launch task failed: {e}");
            None
        }
    }
}

fn snapshot(session: &Session) -> (SessionState, TermSize, u32) {
    (session.state(), session.pending_size(), session.spawn_count())
}

/// Drive one session until its channel closes.
pub async fn handle_terminal_ws(socket: WebSocket, state: Arc<BridgeState>) {
    let mut session = Session::new(state.spawner.clone(), state.size_policy, state.initial_size);
    let session_id = session.id();
    let span = tracing::info_span!("session", %session_id);

    async move {
        let (mut ws_sender, mut ws_receiver) = socket.split();

        state
            .sessions
            .write()
            .await
            .register(SessionInfo::from_session(&session, Utc::now()));
        info!("terminal connected");

        let frames = session.open();
        send_frames(&mut ws_sender, frames).await;

        loop {
            let before = snapshot(&session);
            let wake = tokio::select! {
                msg = ws_receiver.next() => Wake::Socket(msg),
                (pty_id, event) = next_pty_event(session.pty_events()) => Wake::Pty(pty_id, event),
            };

            let frames = match wake {
                Wake::Socket(Some(Ok(msg))) => {
                    let frame = match msg {
                        Message::Text(text) => ClientFrame::decode_text(text.as_str()),
                        Message::Binary(data) => ClientFrame::from_binary(&data),
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    match apply_frame(session, frame).await {
                        Some((applied, frames)) => {
                            session = applied;
                            frames
                        }
                        None => {
                            state.sessions.write().await.unregister(&session_id);
                            return;
                        }
                    }
                }
                Wake::Socket(Some(Err(e))) => {
                    debug!("terminal socket error: {e}");
                    break;
                }
                Wake::Socket(None) => break,
                Wake::Pty(pty_id, event) => session.handle_pty_event(pty_id, event),
            };

            send_frames(&mut ws_sender, frames).await;

            if snapshot(&session) != before {
                state.sessions.write().await.update(&session);
            }
        }

        session.close();
        state.sessions.write().await.unregister(&session_id);
        info!("terminal disconnected");
    }
    .instrument(span)
    .await
}
