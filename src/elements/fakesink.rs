use std::any::Any;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::expect_u64;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::graph::{Element, ElementImpl, FlowReturn, PadSpec, PropertyValue};

#[derive(Default)]
struct Received {
    count: usize,
    recent: VecDeque<Buffer>,
}

/// Sink that accepts everything. Keeps the most recent buffers around for
/// inspection.
pub struct FakeSink {
    keep: Mutex<usize>,
    received: Mutex<Received>,
    arrived: Condvar,
}

impl Default for FakeSink {
    fn default() -> Self {
        Self {
            keep: Mutex::new(64),
            received: Mutex::new(Received::default()),
            arrived: Condvar::new(),
        }
    }
}

impl FakeSink {
    /// Buffers received so far.
    pub fn count(&self) -> usize {
        self.received.lock().count
    }

    /// The retained buffers, oldest first.
    pub fn received(&self) -> Vec<Buffer> {
        self.received.lock().recent.iter().cloned().collect()
    }

    /// Wait until at least `count` buffers arrived.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut received = self.received.lock();
        while received.count < count {
            if self.arrived.wait_until(&mut received, deadline).timed_out() {
                return received.count >= count;
            }
        }
        true
    }
}

impl ElementImpl for FakeSink {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink")]
    }

    fn chain(&self, _element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        let keep = *self.keep.lock();
        let mut received = self.received.lock();
        received.count += 1;
        if keep > 0 {
            if received.recent.len() == keep {
                received.recent.pop_front();
            }
            received.recent.push_back(buffer);
        }
        self.arrived.notify_all();
        FlowReturn::Ok
    }

    fn set_property(&self, element: &Element, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "keep-buffers" => {
                *self.keep.lock() = expect_u64(name, &value)? as usize;
                Ok(())
            }
            _ => Err(Error::UnknownProperty {
                element: element.name().to_owned(),
                property: name.to_owned(),
            }),
        }
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "keep-buffers" => Some(PropertyValue::UInt(*self.keep.lock() as u64)),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
