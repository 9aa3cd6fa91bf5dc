//! Line framing for the serial byte stream.
//!
//! The modem talks in CRLF-terminated lines, except for two multi-line
//! payloads (an SMS body after `+CMGR:`, an HTTP body after `+HTTPREAD:`)
//! that carry no length and are terminated by a literal `OK` sentinel line.

/// Sentinel line closing a raw-capture payload.
const SENTINEL: &str = "OK\r\n";

/// Raw-capture sub-modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Normal line-at-a-time framing.
    #[default]
    Off,
    /// Accumulating an SMS body.
    SmsBody,
    /// Accumulating an HTTP response body.
    HttpBody,
}

/// A completed unit of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A single line, CR/LF stripped.
    Line(String),
    /// A complete SMS body captured up to the sentinel.
    SmsBody(String),
    /// A complete HTTP body captured up to the sentinel.
    HttpBody(String),
}

/// Incremental line assembler.
///
/// Bytes are pushed one at a time; a [`Chunk`] comes out whenever a line (or,
/// in capture mode, a whole payload) completes. While capturing, CR is kept
/// in the working line so the sentinel compare sees the literal `OK\r\n`.
#[derive(Debug, Default)]
pub struct LineAssembler {
    line: String,
    payload: String,
    capture: CaptureMode,
}

impl LineAssembler {
    /// Creates a new assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the active capture mode.
    #[must_use]
    pub const fn capture(&self) -> CaptureMode {
        self.capture
    }

    /// Switches into SMS body capture. The next lines accumulate into the
    /// payload until the sentinel.
    pub fn begin_sms_capture(&mut self) {
        self.capture = CaptureMode::SmsBody;
        self.payload.clear();
    }

    /// Switches into HTTP body capture.
    pub fn begin_http_capture(&mut self) {
        self.capture = CaptureMode::HttpBody;
        self.payload.clear();
    }

    /// Discards any partial line and leaves capture mode.
    pub fn clear(&mut self) {
        self.line.clear();
        self.payload.clear();
        self.capture = CaptureMode::Off;
    }

    /// Pushes one byte, returning a completed chunk if this byte finished one.
    pub fn push(&mut self, byte: u8) -> Option<Chunk> {
        // The modem speaks Latin-1; a byte maps straight to its code point.
        let ch = char::from(byte);
        match ch {
            '\n' => {
                if self.capture == CaptureMode::Off {
                    if self.line.is_empty() {
                        return None;
                    }
                    return Some(Chunk::Line(std::mem::take(&mut self.line)));
                }
                self.line.push('\n');
                let line = std::mem::take(&mut self.line);
                if line == SENTINEL {
                    let mode = std::mem::take(&mut self.capture);
                    let payload = std::mem::take(&mut self.payload);
                    let payload = payload.trim_end_matches(['\r', '\n']).to_owned();
                    return Some(match mode {
                        CaptureMode::SmsBody => Chunk::SmsBody(payload),
                        _ => Chunk::HttpBody(payload),
                    });
                }
                self.payload.push_str(&line);
                None
            }
            '\r' => {
                if self.capture != CaptureMode::Off {
                    self.line.push('\r');
                }
                None
            }
            _ => {
                self.line.push(ch);
                None
            }
        }
    }
}
