use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::invalid;
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::error::{Error, Result};
use crate::graph::{Element, ElementImpl, FlowReturn, PadSpec, PropertyValue};

/// Restricts the stream to one format.
///
/// Buffers without caps are stamped with the filter caps; buffers with
/// incompatible caps are refused as not negotiated.
#[derive(Default)]
pub struct CapsFilter {
    caps: Mutex<Option<Arc<Caps>>>,
}

impl ElementImpl for CapsFilter {
    fn static_pads(&self) -> Vec<PadSpec> {
        vec![PadSpec::sink("sink"), PadSpec::src("src")]
    }

    fn chain(&self, element: &Element, _pad: &str, mut buffer: Buffer) -> FlowReturn {
        let caps = self.caps.lock().clone();
        if let Some(caps) = caps {
            if !buffer.stamp_caps(&caps) {
                warn!(
                    element = %element.name(),
                    "buffer caps {:?} do not match {}",
                    buffer.caps().map(ToString::to_string),
                    caps
                );
                return FlowReturn::NotNegotiated;
            }
        }
        element.push("src", buffer)
    }

    fn set_property(&self, element: &Element, name: &str, value: PropertyValue) -> Result<()> {
        match name {
            "caps" => {
                let caps = value
                    .as_caps()
                    .cloned()
                    .ok_or_else(|| invalid(name, "expected caps"))?;
                element.set_pad_caps("sink", caps.clone());
                element.set_pad_caps("src", caps.clone());
                *self.caps.lock() = Some(Arc::new(caps));
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
            "caps" => self.caps.lock().as_deref().cloned().map(PropertyValue::Caps),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{AudioCaps, ChannelPosition};
    use crate::elements::fakesink::FakeSink;
    use crate::graph::{Pipeline, State};

    #[test]
    fn stamps_and_refuses() {
        let pipeline = Pipeline::new("capsfilter-test");
        let filter = Element::new("capsfilter", "filter", CapsFilter::default());
        let sink = Element::new("fakesink", "sink", FakeSink::default());
        pipeline.add_many(&[&filter, &sink]).unwrap();
        filter.link(&sink).unwrap();

        let left = Caps::from(AudioCaps::mono(44100.0, ChannelPosition::FrontLeft));
        filter.set_property("caps", left.clone()).unwrap();
        assert!(filter.set_property("caps", 3u64).is_err());
        pipeline.set_state(State::Playing);

        assert_eq!(filter.chain("sink", Buffer::silence(8)), FlowReturn::Ok);
        let right = Arc::new(Caps::from(AudioCaps::mono(44100.0, ChannelPosition::FrontRight)));
        assert_eq!(
            filter.chain("sink", Buffer::silence(8).with_caps(right)),
            FlowReturn::NotNegotiated
        );

        let fake = sink.imp_as::<FakeSink>().unwrap();
        assert_eq!(fake.count(), 1);
        assert_eq!(fake.received()[0].caps(), Some(&left));
    }
}
