//! transport.rs
//! Serial byte source feeding the control loop without ever blocking it.
//!
//! A reader thread pulls bytes from stdin or a serial port and forwards them in
//! chunks through a bounded crossbeam channel. The control loop only calls
//! [`ByteSource::poll`], which drains whatever has arrived with `try_recv`.

use std::{
    collections::VecDeque,
    io::{ErrorKind, Read},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{bounded, Receiver, TryRecvError};
use log::{debug, error, info};
use serialport::SerialPort;

const CHUNK_SIZE: usize = 64;
const CHANNEL_CAPACITY: usize = 256;
pub const DEFAULT_BAUD: u32 = 115_200;
const SERIAL_READ_TIMEOUT_MS: u64 = 50;

pub struct ByteSource {
    rx: Receiver<Vec<u8>>,
    handle: Option<JoinHandle<()>>,
    closed: bool,
}

impl ByteSource {
    /// Starts the reader thread. The source closes when `reader` hits end of input
    /// or a non-transient error.
    pub fn spawn<R>(name: &str, mut reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = bounded::<Vec<u8>>(CHANNEL_CAPACITY);
        let thread_name = format!("reader-{}", name);
        let label = name.to_string();

        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            let mut buf = [0u8; CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => {
                        info!("[Transport] {} reached end of input", label);
                        break;
                    }
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            debug!("[Transport] control loop gone, {} reader stopping", label);
                            break;
                        }
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                        continue;
                    }
                    Err(e) => {
                        error!("[Transport] {} read failed: {}", label, e);
                        break;
                    }
                }
            }
        });

        let handle = match handle {
            Ok(h) => Some(h),
            Err(e) => {
                error!("[Transport] failed to spawn reader thread: {}", e);
                None
            }
        };
        // Without a reader the channel sender is already gone and the source reads as closed.
        Self { rx, handle, closed: false }
    }

    /// Moves every chunk received so far into `pending`. Returns the number of bytes added.
    pub fn poll(&mut self, pending: &mut VecDeque<u8>) -> usize {
        let mut added = 0;
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => {
                    added += chunk.len();
                    pending.extend(chunk);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        added
    }

    /// True once the reader finished and every chunk was handed out.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("[Transport] reader thread panicked");
            }
        }
    }
}

/// Opens a serial device for the command link.
pub fn open_serial(path: &str, baud: u32) -> Result<Box<dyn SerialPort>, serialport::Error> {
    let port = serialport::new(path, baud)
        .timeout(Duration::from_millis(SERIAL_READ_TIMEOUT_MS))
        .open()?;
    info!("[Transport] opened {} @ {} bps", path, baud);
    Ok(port)
}
