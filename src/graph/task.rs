use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, ReentrantMutex};
use tracing::{debug, trace, warn};

use super::bus::StreamStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Stopped,
    Started,
    Paused,
}

/// What one run of the loop body achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Iteration {
    /// Work was done; run again immediately
    Continue,
    /// Nothing to do; back off before the next run
    Idle,
}

type LoopFn = Box<dyn Fn() -> Iteration + Send + Sync>;
type StatusFn = Box<dyn Fn(StreamStatus) + Send + Sync>;

struct TaskInner {
    name: String,
    state: Mutex<TaskState>,
    wake: Condvar,
    /// Held for every iteration, and by whoever changes the task state
    stream_lock: Arc<ReentrantMutex<()>>,
    idle_backoff: Duration,
    body: LoopFn,
    status: Option<StatusFn>,
}

impl TaskInner {
    fn notify(&self, status: StreamStatus) {
        if let Some(f) = &self.status {
            f(status);
        }
    }

    fn run(&self) {
        self.notify(StreamStatus::Enter);
        loop {
            {
                let mut state = self.state.lock();
                while *state == TaskState::Paused {
                    self.wake.wait(&mut state);
                }
                if *state == TaskState::Stopped {
                    break;
                }
            }

            let iteration = {
                let _stream = self.stream_lock.lock();
                // state may have changed while we waited for the lock
                if *self.state.lock() != TaskState::Started {
                    continue;
                }
                (self.body)()
            };

            if iteration == Iteration::Idle {
                let mut state = self.state.lock();
                if *state == TaskState::Started {
                    self.wake.wait_for(&mut state, self.idle_backoff);
                }
            }
        }
        self.notify(StreamStatus::Leave);
        trace!(task = %self.name, "task loop exited");
    }
}

/// A dedicated thread that runs a loop body repeatedly while started.
///
/// The body runs with the stream lock held, and state changes take the same
/// lock, so a state change never overlaps an iteration. Idle back-off
/// happens outside the lock.
pub struct StreamingTask {
    inner: Arc<TaskInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingTask {
    pub fn new<F>(
        name: &str,
        stream_lock: Arc<ReentrantMutex<()>>,
        idle_backoff: Duration,
        body: F,
    ) -> Self
    where
        F: Fn() -> Iteration + Send + Sync + 'static,
    {
        Self::build(name, stream_lock, idle_backoff, Box::new(body), None)
    }

    /// Like [`StreamingTask::new`], reporting thread enter and leave through
    /// `status`.
    pub fn with_status<F, S>(
        name: &str,
        stream_lock: Arc<ReentrantMutex<()>>,
        idle_backoff: Duration,
        body: F,
        status: S,
    ) -> Self
    where
        F: Fn() -> Iteration + Send + Sync + 'static,
        S: Fn(StreamStatus) + Send + Sync + 'static,
    {
        Self::build(
            name,
            stream_lock,
            idle_backoff,
            Box::new(body),
            Some(Box::new(status)),
        )
    }

    fn build(
        name: &str,
        stream_lock: Arc<ReentrantMutex<()>>,
        idle_backoff: Duration,
        body: LoopFn,
        status: Option<StatusFn>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                name: name.to_owned(),
                state: Mutex::new(TaskState::Stopped),
                wake: Condvar::new(),
                stream_lock,
                idle_backoff,
                body,
                status,
            }),
            thread: Mutex::new(None),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state.lock()
    }

    fn set_state(&self, state: TaskState) {
        let _stream = self.inner.stream_lock.lock();
        *self.inner.state.lock() = state;
        self.inner.wake.notify_all();
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.thread.lock().as_ref().map(|h| h.thread().id())
    }

    /// Start or resume the loop, spawning its thread on first use.
    pub fn start(&self) -> bool {
        self.set_state(TaskState::Started);

        let mut thread = self.thread.lock();
        if thread.is_some() {
            return true;
        }

        let inner = self.inner.clone();
        inner.notify(StreamStatus::Create);
        match thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || inner.run())
        {
            Ok(handle) => {
                debug!(task = %self.inner.name, "task started");
                *thread = Some(handle);
                true
            }
            Err(e) => {
                warn!(task = %self.inner.name, "failed to spawn task thread: {e}");
                *self.inner.state.lock() = TaskState::Stopped;
                false
            }
        }
    }

    /// Suspend the loop after the current iteration.
    pub fn pause(&self) {
        self.set_state(TaskState::Paused);
    }

    /// Stop the loop and wait for its thread to exit.
    ///
    /// Returns once no iteration can be running. Must not be called with the
    /// stream lock held, nor from the loop body itself.
    pub fn join(&self) -> bool {
        if self.thread_id() == Some(thread::current().id()) {
            warn!(task = %self.inner.name, "cannot join a task from its own thread");
            return false;
        }

        self.set_state(TaskState::Stopped);
        let handle = self.thread.lock().take();
        let Some(handle) = handle else {
            return true;
        };
        let joined = handle.join().is_ok();
        self.inner.notify(StreamStatus::Destroy);
        debug!(task = %self.inner.name, joined, "task joined");
        joined
    }
}

impl Drop for StreamingTask {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting_task(count: &Arc<AtomicUsize>, lock: &Arc<ReentrantMutex<()>>) -> StreamingTask {
        let count = count.clone();
        StreamingTask::new("test-task", lock.clone(), Duration::from_millis(1), move || {
            count.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            Iteration::Continue
        })
    }

    #[test]
    fn no_iterations_after_join() {
        let count = Arc::new(AtomicUsize::new(0));
        let lock = Arc::new(ReentrantMutex::new(()));
        let task = counting_task(&count, &lock);

        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(task.start());
        while count.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(task.join());

        let after = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after);
        assert_eq!(task.state(), TaskState::Stopped);

        // joining twice is harmless
        assert!(task.join());
    }

    #[test]
    fn holding_the_stream_lock_blocks_iterations() {
        let count = Arc::new(AtomicUsize::new(0));
        let lock = Arc::new(ReentrantMutex::new(()));
        let task = counting_task(&count, &lock);

        let guard = lock.lock();
        assert!(task.start());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        drop(guard);

        while count.load(Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        task.join();
    }

    #[test]
    fn idle_iterations_back_off() {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let task = StreamingTask::new(
            "idle-task",
            Arc::new(ReentrantMutex::new(())),
            Duration::from_millis(50),
            move || {
                inner.fetch_add(1, Ordering::SeqCst);
                Iteration::Idle
            },
        );
        task.start();
        thread::sleep(Duration::from_millis(120));
        task.join();
        assert!(count.load(Ordering::SeqCst) <= 4);
    }
}
