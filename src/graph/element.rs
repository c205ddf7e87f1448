use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, trace, warn};

use super::bin::{Pipeline, WeakPipeline};
use super::bus::{CoreError, Message};
use super::query::Query;
use super::{FlowReturn, PadDirection, PropertyValue, State, StateChange, StateChangeReturn};
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::error::{Error, Result};

/// Behaviour of one kind of element.
///
/// Implementations are shared between the thread that drives state changes
/// and the streaming threads that push data, so every hook takes `&self` and
/// keeps its mutable state behind its own locks. Hooks are never called with
/// a graph lock held, which leaves implementations free to call back into the
/// [`Element`] they are given.
pub trait ElementImpl: Send + Sync + 'static {
    /// Pads that exist for the whole lifetime of the element.
    fn static_pads(&self) -> Vec<PadSpec> {
        Vec::new()
    }

    /// Second construction phase, run once the element handle exists.
    fn constructed(&self, _element: &Element) {}

    fn change_state(&self, _element: &Element, _transition: StateChange) -> StateChangeReturn {
        StateChangeReturn::Success
    }

    /// Receive a buffer on one of the element's sink pads.
    fn chain(&self, _element: &Element, _pad: &str, _buffer: Buffer) -> FlowReturn {
        FlowReturn::NotLinked
    }

    /// Answer `query`. Returning `false` falls back to the default handling.
    fn query(&self, _element: &Element, _query: &mut Query) -> bool {
        false
    }

    fn set_property(&self, element: &Element, name: &str, _value: PropertyValue) -> Result<()> {
        Err(Error::UnknownProperty {
            element: element.name().to_owned(),
            property: name.to_owned(),
        })
    }

    fn property(&self, _name: &str) -> Option<PropertyValue> {
        None
    }

    /// Create a pad from a request template such as `sink_%u`.
    fn request_pad(&self, _element: &Element, _template: &str) -> Option<PadSpec> {
        None
    }

    /// Pipeline-wide latency chosen after a latency recalculation.
    fn set_latency(&self, _element: &Element, _latency: Duration) {}

    fn child_proxy(&self) -> Option<&dyn ChildProxy> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Access to the properties of internal child objects, such as the device
/// wrapped by an audio sink.
pub trait ChildProxy: Send + Sync {
    fn children_count(&self) -> usize;

    fn set_child_property(&self, index: usize, name: &str, value: PropertyValue) -> Result<()>;

    fn child_property(&self, index: usize, name: &str) -> Option<PropertyValue>;
}

/// Description of a pad to create.
#[derive(Clone, Debug, PartialEq)]
pub struct PadSpec {
    pub name: String,
    pub direction: PadDirection,
    pub caps: Option<Caps>,
}

impl PadSpec {
    pub fn src(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: PadDirection::Src,
            caps: None,
        }
    }

    pub fn sink(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: PadDirection::Sink,
            caps: None,
        }
    }

    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = Some(caps);
        self
    }
}

/// How strictly [`Element::link_pads`] checks the two pads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkCheck {
    Nothing,
    /// Refuse the link if both pads carry caps that cannot intersect
    Caps,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SignalHandlerId(u64);

impl SignalHandlerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SignalHandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type PadAddedFn = Arc<dyn Fn(&Element, &str) + Send + Sync>;
type NoMorePadsFn = Arc<dyn Fn(&Element) + Send + Sync>;

#[derive(Clone)]
struct PeerRef {
    element: Weak<ElementInner>,
    pad: String,
}

struct Pad {
    name: String,
    direction: PadDirection,
    caps: Option<Arc<Caps>>,
    peer: Option<PeerRef>,
}

impl Pad {
    fn from_spec(spec: PadSpec) -> Self {
        Self {
            name: spec.name,
            direction: spec.direction,
            caps: spec.caps.map(Arc::new),
            peer: None,
        }
    }
}

pub(crate) struct ElementInner {
    name: String,
    factory: String,
    imp: Box<dyn ElementImpl>,
    state: Mutex<State>,
    state_lock: ReentrantMutex<()>,
    pads: RwLock<Vec<Pad>>,
    parent: RwLock<Option<WeakPipeline>>,
    pad_added: Mutex<Vec<(SignalHandlerId, PadAddedFn)>>,
    no_more_pads: Mutex<Vec<(SignalHandlerId, NoMorePadsFn)>>,
}

/// Reference-counted handle to an element.
#[derive(Clone)]
pub struct Element(Arc<ElementInner>);

#[derive(Clone)]
pub struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(Element)
    }
}

impl Element {
    /// Build an element around `imp`, then run its second construction phase.
    pub fn new<T: ElementImpl>(factory: &str, name: &str, imp: T) -> Element {
        let pads = imp.static_pads().into_iter().map(Pad::from_spec).collect();
        let element = Element(Arc::new(ElementInner {
            name: name.to_owned(),
            factory: factory.to_owned(),
            imp: Box::new(imp),
            state: Mutex::new(State::Null),
            state_lock: ReentrantMutex::new(()),
            pads: RwLock::new(pads),
            parent: RwLock::new(None),
            pad_added: Mutex::new(Vec::new()),
            no_more_pads: Mutex::new(Vec::new()),
        }));
        element.0.imp.constructed(&element);
        element
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn factory_name(&self) -> &str {
        &self.0.factory
    }

    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Element) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Downcast to the concrete implementation.
    pub fn imp_as<T: ElementImpl>(&self) -> Option<&T> {
        self.0.imp.as_any().downcast_ref::<T>()
    }

    pub fn child_proxy(&self) -> Option<&dyn ChildProxy> {
        self.0.imp.child_proxy()
    }

    // ---- state ----

    pub fn current_state(&self) -> State {
        *self.0.state.lock()
    }

    /// Walk the element to `target` one adjacent transition at a time.
    ///
    /// Stops at the first failing transition, leaving the element in the last
    /// state it reached. Otherwise returns the result of the last transition.
    pub fn set_state(&self, target: State) -> StateChangeReturn {
        let _guard = self.0.state_lock.lock();
        let mut last = StateChangeReturn::Success;

        while let Some(transition) = self.current_state().next_transition(target) {
            last = self.0.imp.change_state(self, transition);
            if last.is_failure() {
                warn!(element = %self.name(), ?transition, "state change failed");
                return StateChangeReturn::Failure;
            }

            *self.0.state.lock() = transition.next();
            trace!(element = %self.name(), ?transition, "state changed");
            self.post_message(Message::state_changed(
                self.name(),
                transition.current(),
                transition.next(),
                target,
            ));
        }

        match last {
            StateChangeReturn::Async => StateChangeReturn::Success,
            other => other,
        }
    }

    /// Move to the parent's target state.
    pub fn sync_state_with_parent(&self) -> bool {
        let Some(parent) = self.parent() else {
            return false;
        };
        !self.set_state(parent.target_state()).is_failure()
    }

    // ---- hierarchy & messages ----

    pub fn parent(&self) -> Option<Pipeline> {
        self.0.parent.read().as_ref().and_then(WeakPipeline::upgrade)
    }

    pub(crate) fn has_parent(&self) -> bool {
        self.parent().is_some()
    }

    pub(crate) fn set_parent(&self, parent: Option<WeakPipeline>) {
        *self.0.parent.write() = parent;
    }

    /// Post `message` on the bus of the enclosing pipeline.
    pub fn post_message(&self, message: Message) -> bool {
        match self.parent() {
            Some(parent) => parent.post(message),
            None => false,
        }
    }

    pub fn post_error(&self, code: CoreError, text: &str, debug: Option<String>) -> bool {
        self.post_message(Message::error(self.name(), code, text, debug))
    }

    pub fn post_warning(&self, code: CoreError, text: &str, debug: Option<String>) -> bool {
        self.post_message(Message::warning(self.name(), code, text, debug))
    }

    // ---- properties ----

    pub fn set_property(&self, name: &str, value: impl Into<PropertyValue>) -> Result<()> {
        self.0.imp.set_property(self, name, value.into())
    }

    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.0.imp.property(name)
    }

    pub fn set_latency(&self, latency: Duration) {
        self.0.imp.set_latency(self, latency)
    }

    // ---- pads ----

    pub fn has_pad(&self, name: &str) -> bool {
        self.0.pads.read().iter().any(|p| p.name == name)
    }

    pub fn pad_names(&self, direction: PadDirection) -> Vec<String> {
        self.0
            .pads
            .read()
            .iter()
            .filter(|p| p.direction == direction)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn pad_caps(&self, name: &str) -> Option<Arc<Caps>> {
        self.0
            .pads
            .read()
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.caps.clone())
    }

    pub fn set_pad_caps(&self, name: &str, caps: Caps) -> bool {
        match self.0.pads.write().iter_mut().find(|p| p.name == name) {
            Some(pad) => {
                pad.caps = Some(Arc::new(caps));
                true
            }
            None => false,
        }
    }

    pub fn is_linked(&self, pad: &str) -> bool {
        self.peer(pad).is_some()
    }

    /// Element on the other side of `pad`, with the name of its pad.
    pub fn peer(&self, pad: &str) -> Option<(Element, String)> {
        let peer = self
            .0
            .pads
            .read()
            .iter()
            .find(|p| p.name == pad)
            .and_then(|p| p.peer.clone())?;
        peer.element.upgrade().map(|inner| (Element(inner), peer.pad))
    }

    /// Caps carried by the pad linked to our `pad`.
    pub fn peer_caps(&self, pad: &str) -> Option<Arc<Caps>> {
        let (peer, peer_pad) = self.peer(pad)?;
        peer.pad_caps(&peer_pad)
    }

    /// Elements linked to our source pads.
    pub fn downstream(&self) -> Vec<Element> {
        self.0
            .pads
            .read()
            .iter()
            .filter(|p| p.direction == PadDirection::Src)
            .filter_map(|p| p.peer.as_ref()?.element.upgrade().map(Element))
            .collect()
    }

    /// Add a pad and announce it to `pad-added` handlers.
    pub fn add_pad(&self, spec: PadSpec) -> Result<()> {
        let name = spec.name.clone();
        {
            let mut pads = self.0.pads.write();
            if pads.iter().any(|p| p.name == name) {
                return Err(Error::LinkFailed {
                    src: self.name().to_owned(),
                    src_pad: name,
                    sink: String::new(),
                    sink_pad: String::new(),
                    reason: "pad already exists".into(),
                });
            }
            pads.push(Pad::from_spec(spec));
        }

        debug!(element = %self.name(), pad = %name, "pad added");
        let handlers: Vec<PadAddedFn> =
            self.0.pad_added.lock().iter().map(|(_, f)| f.clone()).collect();
        for handler in handlers {
            handler(self, &name);
        }
        Ok(())
    }

    /// Ask the element for a new pad from `template`. Returns the pad name.
    pub fn request_pad(&self, template: &str) -> Option<String> {
        let spec = self.0.imp.request_pad(self, template)?;
        let name = spec.name.clone();
        self.add_pad(spec).ok()?;
        Some(name)
    }

    /// Announce that no further pads will be added.
    pub fn no_more_pads(&self) {
        let handlers: Vec<NoMorePadsFn> =
            self.0.no_more_pads.lock().iter().map(|(_, f)| f.clone()).collect();
        for handler in handlers {
            handler(self);
        }
    }

    pub fn connect_pad_added<F>(&self, f: F) -> SignalHandlerId
    where
        F: Fn(&Element, &str) + Send + Sync + 'static,
    {
        let id = SignalHandlerId::next();
        self.0.pad_added.lock().push((id, Arc::new(f)));
        id
    }

    pub fn connect_no_more_pads<F>(&self, f: F) -> SignalHandlerId
    where
        F: Fn(&Element) + Send + Sync + 'static,
    {
        let id = SignalHandlerId::next();
        self.0.no_more_pads.lock().push((id, Arc::new(f)));
        id
    }

    pub fn disconnect(&self, id: SignalHandlerId) {
        self.0.pad_added.lock().retain(|(i, _)| *i != id);
        self.0.no_more_pads.lock().retain(|(i, _)| *i != id);
    }

    fn first_unlinked(&self, direction: PadDirection) -> Option<String> {
        self.0
            .pads
            .read()
            .iter()
            .find(|p| p.direction == direction && p.peer.is_none())
            .map(|p| p.name.clone())
    }

    fn link_error(&self, src_pad: &str, sink: &Element, sink_pad: &str, reason: &str) -> Error {
        Error::LinkFailed {
            src: self.name().to_owned(),
            src_pad: src_pad.to_owned(),
            sink: sink.name().to_owned(),
            sink_pad: sink_pad.to_owned(),
            reason: reason.to_owned(),
        }
    }

    /// Link one of our source pads to one of `sink`'s sink pads.
    ///
    /// A missing `src_pad` picks the first unlinked source pad. A missing
    /// `sink_pad` picks the first unlinked sink pad, or requests a new one
    /// from the `sink_%u` template.
    pub fn link_pads(
        &self,
        src_pad: Option<&str>,
        sink: &Element,
        sink_pad: Option<&str>,
        check: LinkCheck,
    ) -> Result<()> {
        if self.ptr_eq(sink) {
            return Err(self.link_error("", sink, "", "cannot link an element to itself"));
        }

        let src_name = match src_pad {
            Some(name) => name.to_owned(),
            None => self
                .first_unlinked(PadDirection::Src)
                .ok_or_else(|| self.link_error("", sink, "", "no free source pad"))?,
        };
        let sink_name = match sink_pad {
            Some(name) => name.to_owned(),
            None => match sink.first_unlinked(PadDirection::Sink) {
                Some(name) => name,
                None => sink
                    .request_pad("sink_%u")
                    .ok_or_else(|| self.link_error(&src_name, sink, "", "no free sink pad"))?,
            },
        };

        let src_caps = {
            let pads = self.0.pads.read();
            let pad = pads
                .iter()
                .find(|p| p.name == src_name && p.direction == PadDirection::Src)
                .ok_or_else(|| Error::NoSuchPad {
                    element: self.name().to_owned(),
                    pad: src_name.clone(),
                })?;
            if pad.peer.is_some() {
                return Err(self.link_error(&src_name, sink, &sink_name, "source pad already linked"));
            }
            pad.caps.clone()
        };
        let sink_caps = {
            let pads = sink.0.pads.read();
            let pad = pads
                .iter()
                .find(|p| p.name == sink_name && p.direction == PadDirection::Sink)
                .ok_or_else(|| Error::NoSuchPad {
                    element: sink.name().to_owned(),
                    pad: sink_name.clone(),
                })?;
            if pad.peer.is_some() {
                return Err(self.link_error(&src_name, sink, &sink_name, "sink pad already linked"));
            }
            pad.caps.clone()
        };

        if check == LinkCheck::Caps {
            if let (Some(a), Some(b)) = (&src_caps, &sink_caps) {
                if !a.can_intersect(b) {
                    return Err(self.link_error(&src_name, sink, &sink_name, "incompatible caps"));
                }
            }
        }

        if let Some(pad) = self.0.pads.write().iter_mut().find(|p| p.name == src_name) {
            pad.peer = Some(PeerRef {
                element: Arc::downgrade(&sink.0),
                pad: sink_name.clone(),
            });
        }
        if let Some(pad) = sink.0.pads.write().iter_mut().find(|p| p.name == sink_name) {
            pad.peer = Some(PeerRef {
                element: Arc::downgrade(&self.0),
                pad: src_name.clone(),
            });
        }

        trace!("linked {}:{} -> {}:{}", self.name(), src_name, sink.name(), sink_name);
        Ok(())
    }

    /// Link with automatic pad selection and caps checking.
    pub fn link(&self, sink: &Element) -> Result<()> {
        self.link_pads(None, sink, None, LinkCheck::Caps)
    }

    /// Link each element to the next one.
    pub fn link_many(elements: &[&Element]) -> Result<()> {
        for pair in elements.windows(2) {
            pair[0].link(pair[1])?;
        }
        Ok(())
    }

    /// Break every link touching this element.
    pub(crate) fn unlink_all(&self) {
        let peers: Vec<(Element, String)> = {
            let mut pads = self.0.pads.write();
            pads.iter_mut()
                .filter_map(|p| {
                    let peer = p.peer.take()?;
                    peer.element.upgrade().map(|e| (Element(e), peer.pad))
                })
                .collect()
        };
        for (peer, pad) in peers {
            if let Some(p) = peer.0.pads.write().iter_mut().find(|p| p.name == pad) {
                p.peer = None;
            }
        }
    }

    // ---- data flow ----

    /// Receive a buffer on `pad`. Elements below `Paused` refuse data.
    pub fn chain(&self, pad: &str, buffer: Buffer) -> FlowReturn {
        if self.current_state() < State::Paused {
            return FlowReturn::Flushing;
        }
        self.0.imp.chain(self, pad, buffer)
    }

    /// Push a buffer out of our source `pad` to its peer.
    pub fn push(&self, pad: &str, buffer: Buffer) -> FlowReturn {
        match self.peer(pad) {
            Some((peer, peer_pad)) => peer.chain(&peer_pad, buffer),
            None => FlowReturn::NotLinked,
        }
    }

    /// Run `query` against the element, falling back to default handling.
    ///
    /// The default answers caps queries from the first source pad with caps
    /// and forwards everything else upstream.
    pub fn query(&self, query: &mut Query) -> bool {
        if self.0.imp.query(self, query) {
            return true;
        }
        self.default_query(query)
    }

    fn default_query(&self, query: &mut Query) -> bool {
        match query {
            Query::Caps { result } => {
                let caps = self
                    .0
                    .pads
                    .read()
                    .iter()
                    .filter(|p| p.direction == PadDirection::Src)
                    .find_map(|p| p.caps.clone());
                match caps {
                    Some(caps) => {
                        *result = Some((*caps).clone());
                        true
                    }
                    None => false,
                }
            }
            Query::Latency { .. } => {
                for pad in self.pad_names(PadDirection::Sink) {
                    if let Some((upstream, _)) = self.peer(&pad) {
                        if upstream.query(query) {
                            return true;
                        }
                    }
                }
                false
            }
        }
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name())
            .field("factory", &self.factory_name())
            .field("state", &self.current_state())
            .finish()
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}
