use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{trace, warn};

use super::State;

/// Codes for errors and warnings posted by elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CoreError {
    Failed = 1,
    StateChange = 4,
    Pad = 5,
    Negotiation = 7,
    MissingPlugin = 12,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: CoreError,
    pub message: String,
    pub debug: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    Create,
    Enter,
    Leave,
    Destroy,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MessageKind {
    Eos,
    Warning(ErrorDetail),
    Error(ErrorDetail),
    StateChanged {
        old: State,
        new: State,
        pending: Option<State>,
    },
    /// A streaming thread was created, entered or left
    StreamStatus { status: StreamStatus, owner: String },
    /// Latency of an element changed; the pipeline should recalculate
    Latency,
    MissingElement { factory: String },
}

/// A notification posted by an element.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Name of the posting element
    pub src: String,
    pub kind: MessageKind,
}

impl Message {
    pub fn new(src: &str, kind: MessageKind) -> Self {
        Self {
            src: src.to_owned(),
            kind,
        }
    }

    pub fn error(src: &str, code: CoreError, message: &str, debug: Option<String>) -> Self {
        Self::new(
            src,
            MessageKind::Error(ErrorDetail {
                code,
                message: message.to_owned(),
                debug,
            }),
        )
    }

    pub fn warning(src: &str, code: CoreError, message: &str, debug: Option<String>) -> Self {
        Self::new(
            src,
            MessageKind::Warning(ErrorDetail {
                code,
                message: message.to_owned(),
                debug,
            }),
        )
    }

    pub fn state_changed(src: &str, old: State, new: State, target: State) -> Self {
        Self::new(
            src,
            MessageKind::StateChanged {
                old,
                new,
                pending: (new != target).then_some(target),
            },
        )
    }

    pub fn stream_status(src: &str, status: StreamStatus, owner: &str) -> Self {
        Self::new(
            src,
            MessageKind::StreamStatus {
                status,
                owner: owner.to_owned(),
            },
        )
    }

    pub fn missing_element(src: &str, factory: &str) -> Self {
        Self::new(
            src,
            MessageKind::MissingElement {
                factory: factory.to_owned(),
            },
        )
    }
}

struct Watch {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Watch {
    fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }
}

/// Asynchronous message channel of a pipeline.
///
/// Elements post from whichever thread they run on. Messages are either
/// popped by the application or dispatched to a watch running on its own
/// thread.
#[derive(Clone)]
pub struct Bus {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    watch: Arc<Mutex<Option<Watch>>>,
}

impl Bus {
    const WATCH_POLL: Duration = Duration::from_millis(50);

    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            watch: Arc::new(Mutex::new(None)),
        }
    }

    pub fn post(&self, message: Message) -> bool {
        trace!(src = %message.src, kind = ?message.kind, "bus post");
        self.tx.send(message).is_ok()
    }

    pub fn pop(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    pub fn timed_pop(&self, timeout: Duration) -> Option<Message> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Wait up to `timeout` for a message matching `filter`, discarding others.
    pub fn timed_pop_filtered<F>(&self, timeout: Duration, mut filter: F) -> Option<Message>
    where
        F: FnMut(&Message) -> bool,
    {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            let message = self.rx.recv_timeout(remaining).ok()?;
            if filter(&message) {
                return Some(message);
            }
        }
    }

    pub fn has_watch(&self) -> bool {
        self.watch.lock().is_some()
    }

    /// Dispatch every message to `handler` on a dedicated thread until the
    /// handler breaks or the watch is removed. Only one watch may be active.
    pub fn add_watch<F>(&self, name: &str, mut handler: F) -> bool
    where
        F: FnMut(&Message) -> ControlFlow<()> + Send + 'static,
    {
        let mut watch = self.watch.lock();
        if watch.is_some() {
            warn!(bus = %name, "bus already has a watch");
            return false;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let rx = self.rx.clone();
        let thread_stop = stop.clone();
        let spawned = thread::Builder::new()
            .name(format!("{name}-bus"))
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    match rx.recv_timeout(Self::WATCH_POLL) {
                        Ok(message) => {
                            if handler(&message).is_break() {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        match spawned {
            Ok(thread) => {
                *watch = Some(Watch { stop, thread });
                true
            }
            Err(e) => {
                warn!(bus = %name, "failed to spawn bus watch: {e}");
                false
            }
        }
    }

    /// Stop the watch thread. Called from the watch itself, the thread is
    /// left to finish on its own.
    pub fn remove_watch(&self) {
        let Some(watch) = self.watch.lock().take() else {
            return;
        };
        watch.stop.store(true, Ordering::Release);
        if watch.thread_id() != thread::current().id() {
            let _ = watch.thread.join();
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
