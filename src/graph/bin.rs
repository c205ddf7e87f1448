use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, info, warn};

use super::bus::{Bus, Message};
use super::element::{Element, WeakElement};
use super::query::Query;
use super::{PadDirection, State, StateChangeReturn};
use crate::error::{Error, Result};

struct BinInner {
    name: String,
    elements: RwLock<Vec<Element>>,
    state: Mutex<State>,
    target: Mutex<State>,
    state_lock: ReentrantMutex<()>,
    bus: Bus,
    /// Composite element whose internals this bin holds
    owner: RwLock<Option<WeakElement>>,
    latency: Mutex<Option<Duration>>,
}

impl Drop for BinInner {
    fn drop(&mut self) {
        self.bus.remove_watch();
    }
}

/// A container of elements driven through state changes together.
///
/// Cloning yields another handle to the same pipeline.
#[derive(Clone)]
pub struct Pipeline(Arc<BinInner>);

#[derive(Clone)]
pub struct WeakPipeline(Weak<BinInner>);

impl WeakPipeline {
    pub fn upgrade(&self) -> Option<Pipeline> {
        self.0.upgrade().map(Pipeline)
    }
}

impl Pipeline {
    pub fn new(name: &str) -> Self {
        Pipeline(Arc::new(BinInner {
            name: name.to_owned(),
            elements: RwLock::new(Vec::new()),
            state: Mutex::new(State::Null),
            target: Mutex::new(State::Null),
            state_lock: ReentrantMutex::new(()),
            bus: Bus::new(),
            owner: RwLock::new(None),
            latency: Mutex::new(None),
        }))
    }

    /// A bin holding the internals of `owner`. Its messages are forwarded to
    /// the pipeline `owner` lives in.
    pub fn new_internal(name: &str, owner: &Element) -> Self {
        let bin = Self::new(name);
        *bin.0.owner.write() = Some(owner.downgrade());
        bin
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn bus(&self) -> &Bus {
        &self.0.bus
    }

    pub fn downgrade(&self) -> WeakPipeline {
        WeakPipeline(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Pipeline) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Post a message from one of our elements.
    pub fn post(&self, message: Message) -> bool {
        let owner = self.0.owner.read().as_ref().and_then(WeakElement::upgrade);
        match owner {
            Some(owner) if owner.has_parent() => owner.post_message(message),
            _ => self.0.bus.post(message),
        }
    }

    // ---- children ----

    pub fn add(&self, element: &Element) -> Result<()> {
        if element.has_parent() {
            return Err(Error::LinkFailed {
                src: element.name().to_owned(),
                src_pad: String::new(),
                sink: self.name().to_owned(),
                sink_pad: String::new(),
                reason: "element already has a parent".into(),
            });
        }
        let mut elements = self.0.elements.write();
        if elements.iter().any(|e| e.name() == element.name()) {
            return Err(Error::LinkFailed {
                src: element.name().to_owned(),
                src_pad: String::new(),
                sink: self.name().to_owned(),
                sink_pad: String::new(),
                reason: "name already taken in this pipeline".into(),
            });
        }
        element.set_parent(Some(self.downgrade()));
        elements.push(element.clone());
        debug!(pipeline = %self.name(), element = %element.name(), "added element");
        Ok(())
    }

    pub fn add_many(&self, elements: &[&Element]) -> Result<()> {
        for element in elements {
            self.add(element)?;
        }
        Ok(())
    }

    /// Remove `element`, unlinking it and shutting it down.
    pub fn remove(&self, element: &Element) -> bool {
        let removed = {
            let mut elements = self.0.elements.write();
            let before = elements.len();
            elements.retain(|e| !e.ptr_eq(element));
            elements.len() != before
        };
        if removed {
            element.unlink_all();
            element.set_state(State::Null);
            element.set_parent(None);
        }
        removed
    }

    pub fn elements(&self) -> Vec<Element> {
        self.0.elements.read().clone()
    }

    pub fn by_name(&self, name: &str) -> Option<Element> {
        self.0.elements.read().iter().find(|e| e.name() == name).cloned()
    }

    // ---- state ----

    pub fn current_state(&self) -> State {
        *self.0.state.lock()
    }

    /// State the pipeline is heading to. Children added later sync to it.
    pub fn target_state(&self) -> State {
        *self.0.target.lock()
    }

    /// Elements ordered for a state change. Upward changes start at the
    /// sinks so nothing pushes into an element that is not ready for data;
    /// downward changes start at the sources.
    fn ordered_elements(&self, upward: bool) -> Vec<Element> {
        let elements = self.elements();
        let mut graph = DiGraphMap::<usize, ()>::new();
        for index in 0..elements.len() {
            graph.add_node(index);
        }
        for (index, element) in elements.iter().enumerate() {
            for peer in element.downstream() {
                if let Some(peer_index) = elements.iter().position(|e| e.ptr_eq(&peer)) {
                    graph.add_edge(index, peer_index, ());
                }
            }
        }

        let mut order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(_) => {
                warn!(pipeline = %self.name(), "element graph has a cycle, using insertion order");
                (0..elements.len()).collect()
            }
        };
        if upward {
            order.reverse();
        }
        order.into_iter().map(|i| elements[i].clone()).collect()
    }

    /// Walk every child to `target`, one adjacent transition at a time.
    ///
    /// Returns `NoPreroll` when stopping in `Paused` with a live source.
    pub fn set_state(&self, target: State) -> StateChangeReturn {
        let _guard = self.0.state_lock.lock();
        *self.0.target.lock() = target;
        let mut last = StateChangeReturn::Success;

        while let Some(transition) = self.current_state().next_transition(target) {
            let mut step = StateChangeReturn::Success;
            for element in self.ordered_elements(transition.is_upward()) {
                match element.set_state(transition.next()) {
                    StateChangeReturn::Failure => {
                        warn!(
                            pipeline = %self.name(),
                            element = %element.name(),
                            ?transition,
                            "child failed to change state"
                        );
                        *self.0.target.lock() = self.current_state();
                        return StateChangeReturn::Failure;
                    }
                    StateChangeReturn::NoPreroll => step = StateChangeReturn::NoPreroll,
                    _ => {}
                }
            }

            *self.0.state.lock() = transition.next();
            self.post(Message::state_changed(
                self.name(),
                transition.current(),
                transition.next(),
                target,
            ));
            last = step;
        }

        last
    }

    // ---- latency ----

    /// Ask the sinks, which forward upstream, and fold the answers.
    pub fn query(&self, query: &mut Query) -> bool {
        match query {
            Query::Latency { .. } => {
                let mut answered = false;
                for element in self.elements() {
                    if !element.pad_names(PadDirection::Src).is_empty() {
                        continue;
                    }
                    let mut answer = Query::latency();
                    if element.query(&mut answer) {
                        query.merge_latency(&answer);
                        answered = true;
                    }
                }
                answered
            }
            Query::Caps { .. } => self.elements().iter().any(|e| e.query(query)),
        }
    }

    /// Re-query the pipeline latency and distribute it to every element.
    pub fn recalculate_latency(&self) -> bool {
        let mut query = Query::latency();
        if !self.query(&mut query) {
            debug!(pipeline = %self.name(), "latency query unanswered");
            return false;
        }
        let Query::Latency { live, min, max } = query else {
            return false;
        };

        info!(pipeline = %self.name(), live, ?min, ?max, "configured latency");
        *self.0.latency.lock() = Some(min);
        for element in self.elements() {
            element.set_latency(min);
        }
        true
    }

    /// Latency selected by the last recalculation.
    pub fn latency(&self) -> Option<Duration> {
        *self.0.latency.lock()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name())
            .field("state", &self.current_state())
            .field("elements", &self.0.elements.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;
    use crate::graph::bus::MessageKind;
    use crate::graph::{ElementImpl, PadSpec, StateChange};

    /// Records the transitions it goes through into a shared log.
    struct Recorder {
        log: Arc<Mutex<Vec<(String, StateChange)>>>,
        fail_on: Option<StateChange>,
        src: bool,
        sink: bool,
    }

    impl ElementImpl for Recorder {
        fn static_pads(&self) -> Vec<PadSpec> {
            let mut pads = Vec::new();
            if self.sink {
                pads.push(PadSpec::sink("sink"));
            }
            if self.src {
                pads.push(PadSpec::src("src"));
            }
            pads
        }

        fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
            self.log.lock().push((element.name().to_owned(), transition));
            if Some(transition) == self.fail_on {
                return StateChangeReturn::Failure;
            }
            StateChangeReturn::Success
        }

        fn query(&self, _element: &Element, query: &mut Query) -> bool {
            if let Query::Latency { live, min, .. } = query {
                if !self.sink {
                    *live = true;
                    *min = Duration::from_millis(30);
                    return true;
                }
            }
            false
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn chain(log: &Arc<Mutex<Vec<(String, StateChange)>>>, fail_on: Option<StateChange>) -> Pipeline {
        let pipeline = Pipeline::new("test");
        let make = |name: &str, src, sink| {
            Element::new(
                "recorder",
                name,
                Recorder {
                    log: log.clone(),
                    fail_on: if name == "mid" { fail_on } else { None },
                    src,
                    sink,
                },
            )
        };
        let source = make("source", true, false);
        let mid = make("mid", true, true);
        let sink = make("sink", false, true);
        // added in an order unrelated to the data flow
        pipeline.add_many(&[&mid, &sink, &source]).unwrap();
        Element::link_many(&[&source, &mid, &sink]).unwrap();
        pipeline
    }

    #[test]
    fn upward_changes_start_at_sinks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = chain(&log, None);
        assert_eq!(pipeline.set_state(State::Ready), StateChangeReturn::Success);
        let names: Vec<String> = log.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, ["sink", "mid", "source"]);

        log.lock().clear();
        pipeline.set_state(State::Null);
        let names: Vec<String> = log.lock().iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, ["source", "mid", "sink"]);
    }

    #[test]
    fn failure_stops_the_walk() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = chain(&log, Some(StateChange::ReadyToPaused));
        assert_eq!(pipeline.set_state(State::Playing), StateChangeReturn::Failure);
        assert_eq!(pipeline.current_state(), State::Ready);
        assert_eq!(pipeline.target_state(), State::Ready);
    }

    #[test]
    fn state_changes_are_posted() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = chain(&log, None);
        pipeline.set_state(State::Ready);
        let posted = pipeline.bus().timed_pop_filtered(Duration::from_secs(1), |m| m.src == "test");
        assert!(matches!(
            posted.map(|m| m.kind),
            Some(MessageKind::StateChanged { old: State::Null, new: State::Ready, .. })
        ));
    }

    #[test]
    fn latency_is_answered_upstream() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = chain(&log, None);
        assert!(pipeline.recalculate_latency());
        assert_eq!(pipeline.latency(), Some(Duration::from_millis(30)));
    }

    #[test]
    fn remove_unlinks() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = chain(&log, None);
        let mid = pipeline.by_name("mid").unwrap();
        assert!(pipeline.remove(&mid));
        assert!(!pipeline.by_name("source").unwrap().is_linked("src"));
        assert!(mid.parent().is_none());
    }
}
