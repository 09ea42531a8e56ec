//! Background job execution with a streamed log queue.
//!
//! A job runs on its own thread. Log lines (through [`QueueWriter`]) and the
//! final result travel over one channel, so the foreground thread can print
//! progress while it waits. The job always reports [`WorkerEvent::Finished`],
//! even when it returns an error or panics.

use std::any::Any;
use std::io::{self, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug)]
pub enum WorkerEvent<T> {
    Log(String),
    /// Job result; errors and panics are rendered to text.
    Finished(Result<T, String>),
}

/// Channel shared by the log writer and a worker.
pub struct EventQueue<T> {
    sender: Sender<WorkerEvent<T>>,
    receiver: Receiver<WorkerEvent<T>>,
}

impl<T: Send + 'static> EventQueue<T> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    /// A `MakeWriter` that turns every formatted log line into [`WorkerEvent::Log`].
    pub fn writer(&self) -> QueueWriter<T> {
        QueueWriter {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Send + 'static> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on a running job.
pub struct Worker<T> {
    events: Receiver<WorkerEvent<T>>,
    handle: Option<JoinHandle<()>>,
}

/// Run `job` on a new thread, reporting through `queue`.
pub fn spawn_worker<T, F>(queue: EventQueue<T>, job: F) -> io::Result<Worker<T>>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let EventQueue { sender, receiver } = queue;
    let handle = thread::Builder::new()
        .name("symphony-worker".to_string())
        .spawn(move || {
            let result = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(format!("{err:#}")),
                Err(payload) => Err(format!("worker panicked: {}", panic_message(&*payload))),
            };
            // The receiver may already be gone; nothing left to tell.
            let _ = sender.send(WorkerEvent::Finished(result));
        })?;
    Ok(Worker {
        events: receiver,
        handle: Some(handle),
    })
}

impl<T> Worker<T> {
    /// Feed every log line to `on_log` until the job finishes, then return its result.
    pub fn wait_with<L: FnMut(&str)>(mut self, mut on_log: L) -> Result<T, String> {
        let result = loop {
            match self.events.recv() {
                Ok(WorkerEvent::Log(line)) => on_log(&line),
                Ok(WorkerEvent::Finished(result)) => break result,
                Err(_) => break Err("worker exited without reporting".to_string()),
            }
        };
        while let Ok(WorkerEvent::Log(line)) = self.events.try_recv() {
            on_log(&line);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Log writer feeding a worker's event queue.
pub struct QueueWriter<T> {
    sender: Sender<WorkerEvent<T>>,
}

impl<T> Clone for QueueWriter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<'a, T: Send + 'static> MakeWriter<'a> for QueueWriter<T> {
    type Writer = QueueLine<T>;

    fn make_writer(&'a self) -> Self::Writer {
        QueueLine {
            sender: self.sender.clone(),
            buf: Vec::new(),
        }
    }
}

/// Buffers one formatted event and sends its lines on drop.
pub struct QueueLine<T> {
    sender: Sender<WorkerEvent<T>>,
    buf: Vec<u8>,
}

impl<T> Write for QueueLine<T> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T> Drop for QueueLine<T> {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            if self.sender.send(WorkerEvent::Log(line.to_string())).is_err() {
                break;
            }
        }
    }
}
