//! response.rs
//! Acknowledgement stream sent back over the serial link.
//!
//! Every response is one line, prefixed by its class:
//! - `C:<line>` echo of a received command line
//! - `M:<text>` informational message
//! - `E100:<code>` channel code not recognised

use std::{fmt, io::Write};

use log::error;

pub const UNSUPPORTED_SERVO: u16 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Echo(String),
    Message(String),
    Error { code: u16, detail: String },
}

impl Response {
    pub fn unsupported(channel_code: &str) -> Self {
        Response::Error {
            code: UNSUPPORTED_SERVO,
            detail: channel_code.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Echo(line) => write!(f, "C:{}", line),
            Response::Message(text) => write!(f, "M:{}", text),
            Response::Error { code, detail } => write!(f, "E{}:{}", code, detail),
        }
    }
}

/// Destination for responses. Emitting never fails from the caller's view.
pub trait ResponseSink {
    fn emit(&mut self, response: Response);
}

impl ResponseSink for Vec<Response> {
    fn emit(&mut self, response: Response) {
        self.push(response);
    }
}

/// Writes each response as a `\n`-terminated line.
pub struct LineWriter<W: Write> {
    inner: W,
    failures: u64,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, failures: 0 }
    }

    /// Consecutive write errors since the last successful line.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> ResponseSink for LineWriter<W> {
    fn emit(&mut self, response: Response) {
        let result = writeln!(self.inner, "{}", response).and_then(|_| self.inner.flush());
        if let Err(e) = result {
            // Logged once per run of consecutive failures.
            if self.failures == 0 {
                error!("[Response] write failed: {}", e);
            }
            self.failures += 1;
        } else {
            self.failures = 0;
        }
    }
}
