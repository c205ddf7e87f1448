//! Reacting to pipeline bus messages.

use std::ops::ControlFlow;

use tracing::{debug, error, info, trace, warn};

use crate::graph::{Message, MessageKind, Pipeline, WeakPipeline};

/// Logs what a pipeline reports and keeps its latency up to date.
///
/// Runs on the bus watch thread. Nothing here blocks or fails the pipeline:
/// errors are logged and the watch keeps going.
#[derive(Clone)]
pub struct BusMessageHandler {
    label: String,
    pipeline: WeakPipeline,
}

impl BusMessageHandler {
    pub fn new(label: &str, pipeline: &Pipeline) -> Self {
        Self {
            label: label.to_owned(),
            pipeline: pipeline.downgrade(),
        }
    }

    /// Install a handler as the watch of `pipeline`'s bus.
    pub fn attach(label: &str, pipeline: &Pipeline) -> bool {
        let mut handler = Self::new(label, pipeline);
        pipeline
            .bus()
            .add_watch(&format!("{label}-{}", pipeline.name()), move |message| {
                handler.handle(message)
            })
    }

    pub fn handle(&mut self, message: &Message) -> ControlFlow<()> {
        let label = self.label.as_str();
        let src = message.src.as_str();
        match &message.kind {
            MessageKind::Eos => trace!(label, src, "end of stream"),
            MessageKind::Warning(detail) => warn!(
                label,
                src,
                code = ?detail.code,
                debug = detail.debug.as_deref().unwrap_or(""),
                "{}",
                detail.message
            ),
            MessageKind::Error(detail) => error!(
                label,
                src,
                code = ?detail.code,
                debug = detail.debug.as_deref().unwrap_or(""),
                "{}",
                detail.message
            ),
            MessageKind::StateChanged { old, new, pending } => debug!(
                label,
                src,
                "state changed {} -> {} (pending {})",
                old.name(),
                new.name(),
                pending.map_or("none", |s| s.name())
            ),
            MessageKind::StreamStatus { status, owner } => {
                debug!(label, src, owner = %owner, ?status, "stream status")
            }
            MessageKind::Latency => {
                if let Some(pipeline) = self.pipeline.upgrade() {
                    info!(label, src, "recalculating latency");
                    pipeline.recalculate_latency();
                }
            }
            MessageKind::MissingElement { factory } => {
                warn!(label, src, factory = %factory, "missing element")
            }
        }
        ControlFlow::Continue(())
    }
}
