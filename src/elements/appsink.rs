//! Hands buffers from the pipeline to application code.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::trace;

use super::{expect_bool, expect_u64};
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::graph::{
    Element, ElementImpl, FlowReturn, PadSpec, PropertyValue, StateChange, StateChangeReturn,
};

const POLL: Duration = Duration::from_millis(20);

struct Channel {
    tx: Sender<Buffer>,
    rx: Receiver<Buffer>,
    flushing: Arc<AtomicBool>,
}

struct Settings {
    max_buffers: u64,
    drop: bool,
}

/// Sink whose buffers are pulled by the application with [`AppSink::pull`].
///
/// At most `max-buffers` are held (0 means unbounded). When full, `drop`
/// discards the oldest buffer; otherwise the streaming thread waits.
pub struct AppSink {
    settings: Mutex<Settings>,
    channel: Mutex<Option<Channel>>,
}

impl Default for AppSink {
    fn default() -> Self {
        Self {
            settings: Mutex::new(Settings {
                max_buffers: 0,
                drop: false,
            }),
            channel: Mutex::new(None),
        }
    }
}

impl AppSink {
    /// Take the oldest buffer, waiting up to `timeout` for one to arrive.
    pub fn pull(&self, timeout: Duration) -> Option<Buffer> {
        let rx = self.channel.lock().as_ref()?.rx.clone();
        rx.recv_timeout(timeout).ok()
    }

    /// Buffers waiting to be pulled.
    pub fn queued(&self) -> usize {
        self.channel.lock().as_ref().map_or(0, |c| c.rx.len())
    }

    fn open(&self) {
        let settings = self.settings.lock();
        let (tx, rx) = match settings.max_buffers {
            0 => unbounded(),
            n => bounded(n as usize),
        };
        *self.channel.lock() = Some(Channel {
            tx,
            rx,
            flushing: Arc::new(AtomicBool::new(false)),
        });
    }

    fn close(&self) {
        if let Some(channel) = self.channel.lock().take() {
            channel.flushing.store(true, Ordering::Release);
        }
    }
}

impl ElementImpl for AppSink {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink")]
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeReturn {
        match transition {
            StateChange::ReadyToPaused => self.open(),
            StateChange::PausedToReady => self.close(),
            _ => {}
        }
        StateChangeReturn::Success
    }

    fn chain(&self, element: &Element, _pad: &str, buffer: Buffer) -> FlowReturn {
        let drop_oldest = self.settings.lock().drop;
        let (tx, rx, flushing) = match &*self.channel.lock() {
            Some(c) => (c.tx.clone(), c.rx.clone(), c.flushing.clone()),
            None => return FlowReturn::Flushing,
        };

        let mut buffer = buffer;
        loop {
            if flushing.load(Ordering::Acquire) {
                return FlowReturn::Flushing;
            }
            if drop_oldest {
                match tx.try_send(buffer) {
                    Ok(()) => return FlowReturn::Ok,
                    Err(TrySendError::Full(b)) => {
                        trace!(element = %element.name(), "full, dropping oldest buffer");
                        let _ = rx.try_recv();
                        buffer = b;
                    }
                    Err(TrySendError::Disconnected(_)) => return FlowReturn::Flushing,
                }
            } else {
                match tx.send_timeout(buffer, POLL) {
                    Ok(()) => return FlowReturn::Ok,
                    Err(SendTimeoutError::Timeout(b)) => buffer = b,
                    Err(SendTimeoutError::Disconnected(_)) => return FlowReturn::Flushing,
                }
            }
        }
    }

    fn set_property(&self, element: &Element, name: &str, value: PropertyValue) -> Result<()> {
        let mut settings = self.settings.lock();
        match name {
            "max-buffers" => settings.max_buffers = expect_u64(name, &value)?,
            "drop" => settings.drop = expect_bool(name, &value)?,
            _ => {
                return Err(Error::UnknownProperty {
                    element: element.name().to_owned(),
                    property: name.to_owned(),
                })
            }
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        let settings = self.settings.lock();
        match name {
            "max-buffers" => Some(PropertyValue::UInt(settings.max_buffers)),
            "drop" => Some(PropertyValue::Bool(settings.drop)),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
