//! Sink worker threads.
//!
//! Each sink owns one thread fed through a bounded crossbeam channel. A full
//! channel blocks the caller, it never drops a record. [`SinkWorker::close`]
//! queues a close marker behind every pending record and joins the thread, so
//! it returns only once the writer has seen everything sent before it.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::logger::{BoxedWriter, SinkKind};

const QUEUE_CAPACITY: usize = 8192;

enum Command {
    Record(Vec<u8>),
    Flush(Sender<()>),
    Close,
}

pub(crate) struct SinkWorker {
    kind: SinkKind,
    tx: Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SinkWorker {
    pub(crate) fn spawn(kind: SinkKind, writer: BoxedWriter) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let handle = std::thread::Builder::new()
            .name(format!("spanlog-{kind}"))
            .spawn(move || run(kind, writer, rx))?;
        Ok(Self { kind, tx, handle: Mutex::new(Some(handle)) })
    }

    pub(crate) fn kind(&self) -> SinkKind {
        self.kind
    }

    pub(crate) fn send(&self, line: Vec<u8>) {
        if self.tx.send(Command::Record(line)).is_err() {
            eprintln!("spanlog: {} sink is closed, record dropped", self.kind);
        }
    }

    /// Block until every record sent so far has been written and flushed.
    pub(crate) fn flush(&self) {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.tx.send(Command::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Drain the queue, flush the writer and stop the thread. Idempotent.
    pub(crate) fn close(&self) {
        let Some(handle) = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let _ = self.tx.send(Command::Close);
        if handle.join().is_err() {
            eprintln!("spanlog: {} sink thread panicked", self.kind);
        }
    }
}

fn run(kind: SinkKind, mut writer: BoxedWriter, rx: Receiver<Command>) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Record(line) => {
                if let Err(e) = writer.write_all(&line) {
                    eprintln!("spanlog: {kind} sink write failed: {e}");
                }
            }
            Command::Flush(ack) => {
                if let Err(e) = writer.flush() {
                    eprintln!("spanlog: {kind} sink flush failed: {e}");
                }
                let _ = ack.send(());
            }
            Command::Close => break,
        }
    }
    if let Err(e) = writer.flush() {
        eprintln!("spanlog: {kind} sink flush failed: {e}");
    }
}
