//! Event trace of controller decisions.
//!
//! `record()` pushes onto a bounded lock-free queue and never blocks the control
//! loop (events are dropped silently when the queue is full). A background
//! exporter drains the queue into a CSV file until [`EventRecorder::finish`].

use std::{
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use serde::Serialize;

use crate::protocol::parser::ChannelCode;

const EVENT_QUEUE_CAPACITY: usize = 4_096;
const EXPORTER_POLL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A channel was moved.
    Applied {
        ts_ms: u64,
        code: ChannelCode,
        angle: u8,
        pulse: u16,
        relative: bool,
    },
    /// A token named no known channel.
    Unsupported { ts_ms: u64, code: String },
    /// The watchdog switched a channel off.
    Idle { ts_ms: u64, code: ChannelCode },
    /// A line overflowed the assembly buffer.
    Truncated { ts_ms: u64, kept: usize },
}

#[derive(Debug, Serialize)]
struct EventRow {
    ts_ms: u64,
    event: &'static str,
    code: String,
    angle: Option<u8>,
    pulse: Option<u16>,
    detail: String,
}

impl Event {
    fn to_row(&self) -> EventRow {
        match self {
            Event::Applied { ts_ms, code, angle, pulse, relative } => EventRow {
                ts_ms: *ts_ms,
                event: "applied",
                code: code.to_string(),
                angle: Some(*angle),
                pulse: Some(*pulse),
                detail: if *relative { "relative" } else { "absolute" }.to_string(),
            },
            Event::Unsupported { ts_ms, code } => EventRow {
                ts_ms: *ts_ms,
                event: "unsupported",
                code: code.clone(),
                angle: None,
                pulse: None,
                detail: String::new(),
            },
            Event::Idle { ts_ms, code } => EventRow {
                ts_ms: *ts_ms,
                event: "idle",
                code: code.to_string(),
                angle: None,
                pulse: None,
                detail: String::new(),
            },
            Event::Truncated { ts_ms, kept } => EventRow {
                ts_ms: *ts_ms,
                event: "truncated",
                code: String::new(),
                angle: None,
                pulse: None,
                detail: format!("kept={}", kept),
            },
        }
    }
}

#[derive(Clone)]
pub struct EventRecorder {
    queue: Arc<ArrayQueue<Event>>,
    dropped: Arc<AtomicU64>,
    stopping: Arc<AtomicBool>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
            dropped: Arc::new(AtomicU64::new(0)),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn record(&self, event: Event) {
        if self.queue.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Removes and returns everything queued so far.
    pub fn drain(&self) -> Vec<Event> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    /// Spawns the CSV exporter. It runs until [`finish`](Self::finish) and the queue is empty.
    pub fn start_exporter(&self, output_csv: PathBuf) -> JoinHandle<()> {
        let recorder = self.clone();

        thread::spawn(move || {
            let file = match File::create(&output_csv) {
                Ok(f) => f,
                Err(e) => {
                    error!("[Trace] cannot create {}: {}", output_csv.display(), e);
                    return;
                }
            };
            let mut writer = Writer::from_writer(BufWriter::new(file));
            let mut written = 0u64;

            loop {
                match recorder.queue.pop() {
                    Some(event) => {
                        if let Err(e) = writer.serialize(event.to_row()) {
                            error!("[Trace] write failed: {}", e);
                            break;
                        }
                        written += 1;
                    }
                    None => {
                        if recorder.stopping.load(Ordering::Acquire) && recorder.queue.is_empty() {
                            break;
                        }
                        let _ = writer.flush();
                        thread::sleep(Duration::from_millis(EXPORTER_POLL_MS));
                    }
                }
            }

            if let Err(e) = writer.flush() {
                error!("[Trace] flush failed: {}", e);
            }
            debug!("[Trace] exporter wrote {} events to {}", written, output_csv.display());
        })
    }

    /// Stops the exporter once the queue is drained and waits for it.
    pub fn finish(&self, exporter: JoinHandle<()>) {
        self.stopping.store(true, Ordering::Release);
        if exporter.join().is_err() {
            error!("[Trace] exporter thread panicked");
        }
    }
}
