//! Built-in elements.
//!
//! | factory        | role                                                  |
//! |----------------|-------------------------------------------------------|
//! | `queue`        | thread boundary with a bounded buffer count           |
//! | `capsfilter`   | pins the format flowing through it                    |
//! | `audioconvert` | layout and channel-count conversion                   |
//! | `deinterleave` | splits a multichannel stream into mono pads           |
//! | `interleave`   | merges mono request pads into one stream              |
//! | `appsink`      | hands buffers to application code                     |
//! | `wavenc`       | raw audio to a streaming RIFF/WAVE container          |
//! | `wavparse`     | RIFF/WAVE container back to raw audio                 |
//! | `audiotestsrc` | live sine source                                      |
//! | `fakesink`     | discards (and counts) buffers                         |
//! | `autoaudiosrc` | default capture device (`cpal_device` feature)        |
//! | `autoaudiosink`| default playback device (`cpal_device` feature)       |

pub mod appsink;
pub mod audioconvert;
pub mod capsfilter;
pub mod deinterleave;
pub mod fakesink;
pub mod interleave;
pub mod queue;
pub mod testsrc;
pub mod wav;

#[cfg(feature = "cpal_device")]
pub mod cpal_sink;
#[cfg(feature = "cpal_device")]
pub mod cpal_src;

use crate::error::{Error, Result};
use crate::graph::{Element, PropertyValue, Registry};

/// Register every built-in element with `registry`.
pub fn register_builtins(registry: &Registry) {
    registry.register("queue", |name| Element::new("queue", name, queue::Queue::default()));
    registry.register("capsfilter", |name| {
        Element::new("capsfilter", name, capsfilter::CapsFilter::default())
    });
    registry.register("audioconvert", |name| {
        Element::new("audioconvert", name, audioconvert::AudioConvert::default())
    });
    registry.register("deinterleave", |name| {
        Element::new("deinterleave", name, deinterleave::Deinterleave::default())
    });
    registry.register("interleave", |name| {
        Element::new("interleave", name, interleave::Interleave::default())
    });
    registry.register("appsink", |name| Element::new("appsink", name, appsink::AppSink::default()));
    registry.register("wavenc", |name| Element::new("wavenc", name, wav::WavEnc::default()));
    registry.register("wavparse", |name| Element::new("wavparse", name, wav::WavParse::default()));
    registry.register("audiotestsrc", |name| {
        Element::new("audiotestsrc", name, testsrc::AudioTestSrc::default())
    });
    registry.register("fakesink", |name| Element::new("fakesink", name, fakesink::FakeSink::default()));

    #[cfg(feature = "cpal_device")]
    {
        registry.register("autoaudiosrc", |name| {
            Element::new("autoaudiosrc", name, cpal_src::CpalSrc::default())
        });
        registry.register("autoaudiosink", |name| {
            Element::new("autoaudiosink", name, cpal_sink::CpalSink::default())
        });
    }
}

pub(crate) fn invalid(property: &str, reason: &str) -> Error {
    Error::InvalidProperty {
        property: property.to_owned(),
        reason: reason.to_owned(),
    }
}

pub(crate) fn expect_u64(property: &str, value: &PropertyValue) -> Result<u64> {
    value.as_u64().ok_or_else(|| invalid(property, "expected a non-negative integer"))
}

pub(crate) fn expect_i64(property: &str, value: &PropertyValue) -> Result<i64> {
    value.as_i64().ok_or_else(|| invalid(property, "expected an integer"))
}

pub(crate) fn expect_f64(property: &str, value: &PropertyValue) -> Result<f64> {
    value.as_f64().ok_or_else(|| invalid(property, "expected a number"))
}

pub(crate) fn expect_bool(property: &str, value: &PropertyValue) -> Result<bool> {
    value.as_bool().ok_or_else(|| invalid(property, "expected a boolean"))
}
