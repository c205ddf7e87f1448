//! In-process pipeline graph.
//!
//! This is the framework layer the bridge is assembled from: [`Element`]s with
//! named pads, [`Pipeline`]s that own elements and walk them through state
//! changes, a [`Bus`] for asynchronous notifications, and a process-wide
//! [`Registry`] of element factories.
//!
//! Elements move through four states:
//!
//! ```text
//! Null <-> Ready <-> Paused <-> Playing
//! ```
//!
//! Data only flows into elements that are at least `Paused`.

mod bin;
mod bus;
mod element;
mod query;
mod registry;
mod task;

pub use bin::{Pipeline, WeakPipeline};
pub use bus::{Bus, CoreError, ErrorDetail, Message, MessageKind, StreamStatus};
pub use element::{
    ChildProxy, Element, ElementImpl, LinkCheck, PadSpec, SignalHandlerId, WeakElement,
};
pub use query::Query;
pub use registry::Registry;
pub use task::{Iteration, StreamingTask, TaskState};

use crate::caps::Caps;

/// Lifecycle state of an element or pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Null,
    Ready,
    Paused,
    Playing,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        }
    }

    /// The adjacent transition that moves `self` one step towards `target`.
    pub fn next_transition(self, target: State) -> Option<StateChange> {
        use State::*;
        match (self, target) {
            (a, b) if a == b => None,
            (Null, _) => Some(StateChange::NullToReady),
            (Ready, Null) => Some(StateChange::ReadyToNull),
            (Ready, _) => Some(StateChange::ReadyToPaused),
            (Paused, Playing) => Some(StateChange::PausedToPlaying),
            (Paused, _) => Some(StateChange::PausedToReady),
            (Playing, _) => Some(StateChange::PlayingToPaused),
        }
    }
}

/// One step between adjacent states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateChange {
    NullToReady,
    ReadyToPaused,
    PausedToPlaying,
    PlayingToPaused,
    PausedToReady,
    ReadyToNull,
}

impl StateChange {
    pub fn current(self) -> State {
        match self {
            StateChange::NullToReady => State::Null,
            StateChange::ReadyToPaused => State::Ready,
            StateChange::PausedToPlaying => State::Paused,
            StateChange::PlayingToPaused => State::Playing,
            StateChange::PausedToReady => State::Paused,
            StateChange::ReadyToNull => State::Ready,
        }
    }

    pub fn next(self) -> State {
        match self {
            StateChange::NullToReady => State::Ready,
            StateChange::ReadyToPaused => State::Paused,
            StateChange::PausedToPlaying => State::Playing,
            StateChange::PlayingToPaused => State::Paused,
            StateChange::PausedToReady => State::Ready,
            StateChange::ReadyToNull => State::Null,
        }
    }

    #[inline]
    pub fn is_upward(self) -> bool {
        self.next() > self.current()
    }
}

/// Outcome of a state transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateChangeReturn {
    Success,
    Async,
    /// Live sources cannot produce data in `Paused`
    NoPreroll,
    Failure,
}

impl StateChangeReturn {
    #[inline]
    pub fn is_failure(self) -> bool {
        self == StateChangeReturn::Failure
    }
}

/// Result of handing one buffer to a pad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowReturn {
    Ok,
    NotLinked,
    NotNegotiated,
    Flushing,
    Eos,
    Error,
}

impl FlowReturn {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == FlowReturn::Ok
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PadDirection {
    Src,
    Sink,
}

/// Value of an element property.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Caps(Caps),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view of any numeric value that is non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            PropertyValue::UInt(v) => Some(v),
            PropertyValue::Int(v) if v >= 0 => Some(v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            PropertyValue::Int(v) => Some(v),
            PropertyValue::UInt(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            PropertyValue::Float(v) => Some(v),
            PropertyValue::Int(v) => Some(v as f64),
            PropertyValue::UInt(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_caps(&self) -> Option<&Caps> {
        match self {
            PropertyValue::Caps(c) => Some(c),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::UInt(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_owned())
    }
}

impl From<Caps> for PropertyValue {
    fn from(v: Caps) -> Self {
        PropertyValue::Caps(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_walk_one_step() {
        assert_eq!(State::Null.next_transition(State::Playing), Some(StateChange::NullToReady));
        assert_eq!(State::Ready.next_transition(State::Playing), Some(StateChange::ReadyToPaused));
        assert_eq!(State::Paused.next_transition(State::Playing), Some(StateChange::PausedToPlaying));
        assert_eq!(State::Playing.next_transition(State::Null), Some(StateChange::PlayingToPaused));
        assert_eq!(State::Paused.next_transition(State::Null), Some(StateChange::PausedToReady));
        assert_eq!(State::Ready.next_transition(State::Null), Some(StateChange::ReadyToNull));
        assert_eq!(State::Paused.next_transition(State::Paused), None);
    }

    #[test]
    fn property_coercions() {
        assert_eq!(PropertyValue::Int(5).as_u64(), Some(5));
        assert_eq!(PropertyValue::Int(-5).as_u64(), None);
        assert_eq!(PropertyValue::UInt(7).as_f64(), Some(7.0));
        assert_eq!(PropertyValue::from("x").as_bool(), None);
    }
}
