//! Thread boundary between an upstream producer and downstream consumers.
//!
//! `chain` enqueues into a bounded channel and returns; a forwarding thread
//! pushes buffers downstream in order. When the queue is full, `chain` blocks
//! until space frees up or the queue is flushed.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::expect_u64;
use crate::buffer::Buffer;
use crate::error::Result;
use crate::graph::{
    Element, ElementImpl, FlowReturn, Message, PadSpec, PropertyValue, StateChange,
    StateChangeReturn, StreamStatus,
};

const POLL: Duration = Duration::from_millis(20);

struct Running {
    tx: Sender<Buffer>,
    flushing: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

pub struct Queue {
    max_size_buffers: Mutex<u64>,
    running: Mutex<Option<Running>>,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            max_size_buffers: Mutex::new(200),
            running: Mutex::new(None),
        }
    }
}

impl Queue {
    fn start(&self, element: &Element) -> bool {
        let capacity = *self.max_size_buffers.lock() as usize;
        let (tx, rx) = if capacity == 0 { unbounded() } else { bounded(capacity) };
        let flushing = Arc::new(AtomicBool::new(false));

        let weak = element.downgrade();
        let thread_flushing = flushing.clone();
        let name = element.name().to_owned();
        let spawned = thread::Builder::new()
            .name(format!("{name}:src"))
            .spawn(move || {
                if let Some(element) = weak.upgrade() {
                    element.post_message(Message::stream_status(&name, StreamStatus::Enter, &name));
                }
                forward(&weak, &rx, &thread_flushing);
                if let Some(element) = weak.upgrade() {
                    element.post_message(Message::stream_status(&name, StreamStatus::Leave, &name));
                }
            });

        match spawned {
            Ok(thread) => {
                *self.running.lock() = Some(Running {
                    tx,
                    flushing,
                    thread,
                });
                true
            }
            Err(e) => {
                warn!(element = %element.name(), "failed to spawn queue thread: {e}");
                false
            }
        }
    }

    fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.flushing.store(true, Ordering::Release);
        drop(running.tx);
        let _ = running.thread.join();
    }
}

fn forward(weak: &crate::graph::WeakElement, rx: &Receiver<Buffer>, flushing: &AtomicBool) {
    loop {
        match rx.recv_timeout(POLL) {
            Ok(buffer) => {
                let Some(element) = weak.upgrade() else {
                    return;
                };
                match element.push("src", buffer) {
                    FlowReturn::Ok => {}
                    FlowReturn::Flushing if flushing.load(Ordering::Acquire) => return,
                    ret => trace!(element = %element.name(), ?ret, "downstream refused buffer"),
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if flushing.load(Ordering::Acquire) {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

impl ElementImpl for Queue {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink"), PadSpec::src("src")]
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
        match transition {
            StateChange::ReadyToPaused => {
                if !self.start(element) {
                    return StateChangeReturn::Failure;
                }
            }
            StateChange::PausedToReady => self.stop(),
            _ => {}
        }
        StateChangeReturn::Success
    }

    fn chain(&self, _element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        // never block while holding our own lock
        let (tx, flushing) = match &*self.running.lock() {
            Some(running) => (running.tx.clone(), running.flushing.clone()),
            None => return FlowReturn::Flushing,
        };

        let mut buffer = buffer;
        loop {
            if flushing.load(Ordering::Acquire) {
                return FlowReturn::Flushing;
            }
            match tx.send_timeout(buffer, POLL) {
                Ok(()) => return FlowReturn::Ok,
                Err(SendTimeoutError::Timeout(b)) => buffer = b,
                Err(SendTimeoutError::Disconnected(_)) => return FlowReturn::Flushing,
            }
        }
    }

    fn set_property(&self, element: &Element, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "max-size-buffers" => {
                let max = expect_u64(name, &value)?;
                debug!(element = %element.name(), max, "max-size-buffers");
                *self.max_size_buffers.lock() = max;
                Ok(())
            }
            _ => Err(crate::error::Error::UnknownProperty {
                element: element.name().to_owned(),
                property: name.to_owned(),
            }),
        }
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "max-size-buffers" => Some(PropertyValue::UInt(*self.max_size_buffers.lock())),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::fakesink::FakeSink;
    use crate::graph::{Pipeline, State};

    #[test]
    fn forwards_in_order() {
        let pipeline = Pipeline::new("queue-test");
        let queue = Element::new("queue", "q", Queue::default());
        let sink = Element::new("fakesink", "sink", FakeSink::default());
        pipeline.add_many(&[&queue, &sink]).unwrap();
        queue.link(&sink).unwrap();
        queue.set_property("max-size-buffers", 1u64).unwrap();
        pipeline.set_state(State::Playing);

        for i in 0..5 {
            assert_eq!(queue.chain("sink", Buffer::from_samples(vec![i as f32])), FlowReturn::Ok);
        }
        let fake = sink.imp_as::<FakeSink>().unwrap();
        assert!(fake.wait_for(5, Duration::from_secs(2)));
        let firsts: Vec<f32> = fake.received().iter().map(|b| b.samples()[0]).collect();
        assert_eq!(firsts, [0.0, 1.0, 2.0, 3.0, 4.0]);

        pipeline.set_state(State::Null);
        assert_eq!(queue.chain("sink", Buffer::silence(1)), FlowReturn::Flushing);
    }
}
