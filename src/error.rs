//! Error types for the pipeline graph.
//!
//! These errors are returned by the graph API (linking, properties, state
//! changes). The bridge components built on top of it - the live-input
//! pipeline, the Web Audio source element and the output device - never hand
//! them to their callers: they log and degrade into availability flags.

use thiserror::Error;

use crate::graph::StateChange;

/// Errors raised while assembling or driving a pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no element factory named '{0}'")]
    MissingElement(String),

    #[error("failed to link {src}:{src_pad} to {sink}:{sink_pad}: {reason}")]
    LinkFailed {
        src: String,
        src_pad: String,
        sink: String,
        sink_pad: String,
        reason: String,
    },

    #[error("no pad '{pad}' on element '{element}'")]
    NoSuchPad { element: String, pad: String },

    #[error("state change {transition:?} failed on '{element}'")]
    StateChange {
        element: String,
        transition: StateChange,
    },

    #[error("element '{element}' has no property '{property}'")]
    UnknownProperty { element: String, property: String },

    #[error("invalid value for property '{property}': {reason}")]
    InvalidProperty { property: String, reason: String },

    #[error("caps error: {0}")]
    Caps(String),

    #[error("resource '{0}' not found")]
    Resource(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for Error {
    fn from(e: hound::Error) -> Self {
        Error::Decode(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias for the graph API
pub type Result<T> = std::result::Result<T, Error>;
