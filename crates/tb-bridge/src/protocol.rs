use serde::{Deserialize, Serialize};
use serde_json::Value;
use tb_core::config::TerminalConfig;
use tb_session::TermSize;

// ---------------------------------------------------------------------------
// Literals sent by the bridge itself
// ---------------------------------------------------------------------------

pub const START_BANNER: &str = "\r\n[Press Enter to start]\r\n";
pub const EXIT_BANNER: &str = "\r\n[CLI exited. Press Enter to restart]\r\n";
/// RIS: full terminal reset, clearing screen and scrollback.
pub const CLEAR_SCREEN: &str = "\x1bc";

pub fn spawn_failed_banner(reason: &str) -> String {
    format!("\r\n[Failed to start CLI: {reason}. Press Enter to retry]\r\n")
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsIncoming {
    Input {
        data: String,
    },
    Resize {
        #[serde(default)]
        cols: Value,
        #[serde(default)]
        rows: Value,
    },
}

/// A decoded browser-to-server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Keystrokes typed in the terminal.
    Input(String),
    /// Viewport change. Values are kept as sent and clamped by the session.
    Resize { cols: Value, rows: Value },
    /// Anything that is not one of the shapes above, passed through as
    /// literal terminal input when a process is running.
    Raw(Vec<u8>),
}

impl ClientFrame {
    pub fn decode_text(text: &str) -> Self {
        match serde_json::from_str::<WsIncoming>(text) {
            Ok(WsIncoming::Input { data }) => ClientFrame::Input(data),
            Ok(WsIncoming::Resize { cols, rows }) => ClientFrame::Resize { cols, rows },
            Err(_) => ClientFrame::Raw(text.as_bytes().to_vec()),
        }
    }

    pub fn from_binary(bytes: &[u8]) -> Self {
        ClientFrame::Raw(bytes.to_vec())
    }
}

/// A server-to-browser frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Output { data: String },
}

impl ServerFrame {
    pub fn output(data: impl Into<String>) -> Self {
        ServerFrame::Output { data: data.into() }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Size clamping
// ---------------------------------------------------------------------------

/// Fallback and floor values applied to browser-reported sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePolicy {
    pub default_cols: u16,
    pub default_rows: u16,
    pub min_cols: u16,
    pub min_rows: u16,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self::from(&TerminalConfig::default())
    }
}

impl From<&TerminalConfig> for SizePolicy {
    fn from(cfg: &TerminalConfig) -> Self {
        Self {
            default_cols: cfg.default_cols,
            default_rows: cfg.default_rows,
            min_cols: cfg.min_cols,
            min_rows: cfg.min_rows,
        }
    }
}

impl SizePolicy {
    /// Turn raw `cols`/`rows` values into a usable size.
    ///
    /// Numbers and numeric strings are accepted and floored. Missing,
    /// non-numeric, zero or non-finite values become the default. The result
    /// is never below the minimums.
    pub fn clamp(&self, cols: &Value, rows: &Value) -> TermSize {
        TermSize {
            cols: coerce_dimension(cols, self.default_cols, self.min_cols),
            rows: coerce_dimension(rows, self.default_rows, self.min_rows),
        }
    }
}

fn coerce_dimension(value: &Value, fallback: u16, floor: u16) -> u16 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let n = match parsed {
        Some(n) if n.is_finite() && n != 0.0 => n.floor(),
        _ => f64::from(fallback),
    };
    n.max(f64::from(floor)).min(f64::from(u16::MAX)) as u16
}

// ---------------------------------------------------------------------------
// Output decoding
// ---------------------------------------------------------------------------

/// Incremental UTF-8 decoder for PTY output.
///
/// A character split across two reads is held back until its remaining bytes
/// arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial sequence, e.g. when the process exits.
    pub fn finish(&mut self) -> String {
        let tail = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&tail).into_owned()
    }
}
