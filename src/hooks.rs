//! Hooks runtime.
//!
//! A function component receives a [`RenderCx`] for the duration of one
//! render. Hooks are methods on it, so they cannot be called outside a render,
//! and every render-scoped pointer (cursor, hook lists, effect ring) lives in
//! the context value and is released on every exit path.
//!
//! The context carries a [`HooksDispatcher`] chosen once per render: `Mount`
//! when the fiber has no committed counterpart, `Update` otherwise. On update,
//! each hook call advances a cursor through the previous render's hook list
//! and fails with a typed error if the list runs out or the kinds disagree.
//!
//! ```ignore
//! let counter = Component::new("Counter", |cx, _props| {
//!     let (count, set_count) = cx.use_state(0)?;
//!     cx.use_effect(move || { log(count); None }, Some(deps![count]))?;
//!     Ok(h("button").on("click", move || set_count.update(|n| n + 1)).child(count).build())
//! });
//! ```

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::arena::{
    EffectArena, EffectDestroy, EffectId, EffectRing, FiberArena, FiberId, FiberProps,
    FiberState, FiberType, WorkTag,
};
use crate::element::Node;
use crate::error::{RenderError, Result};
use crate::flags::{Flags, HookEffectTags};
use crate::lane::{Lane, Lanes, NO_LANE};
use crate::transition::{BatchConfig, StartTransition};
use crate::update_queue::{Action, SharedQueue, StateValue, UpdateRing, process_update_queue};

/// Where dispatched updates go: the root that owns the hook.
pub(crate) trait UpdateSink {
    /// Lane for an update dispatched right now.
    fn request_update_lane(&self) -> Lane;
    /// Record pending work at `lane` and make sure a render is scheduled.
    fn schedule_update(&self, lane: Lane);
    /// The root's batch configuration.
    fn batch_config(&self) -> &BatchConfig;
}

/// Which hook implementations a render uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HooksDispatcher {
    /// First render of a fiber: hooks allocate fresh state.
    Mount,
    /// Re-render: hooks read the previous render's list in call order.
    Update,
}

// ============================================================================
// Hook storage
// ============================================================================

#[derive(Clone)]
pub(crate) enum Hook {
    State(StateHook),
    Effect(EffectId),
    Ref(Rc<dyn Any>),
    Transition(StartTransition),
}

impl Hook {
    fn kind(&self) -> &'static str {
        match self {
            Hook::State(_) => "use_state",
            Hook::Effect(_) => "use_effect",
            Hook::Ref(_) => "use_ref",
            Hook::Transition(_) => "use_transition",
        }
    }
}

/// State plus the queue feeding it. Also used for the root's element state.
#[derive(Clone)]
pub(crate) struct StateHook {
    pub(crate) memoized_state: StateValue,
    pub(crate) base_state: StateValue,
    pub(crate) base_queue: UpdateRing,
    pub(crate) queue: Rc<SharedQueue>,
}

impl StateHook {
    pub(crate) fn new(initial: StateValue) -> Self {
        Self::with_queue(initial, SharedQueue::new())
    }

    pub(crate) fn with_queue(initial: StateValue, queue: Rc<SharedQueue>) -> Self {
        Self {
            memoized_state: initial.clone(),
            base_state: initial,
            base_queue: UpdateRing::new(),
            queue,
        }
    }

    /// Fold pending updates into the base queue and process it at `render_lane`.
    ///
    /// `self` is the work-in-progress copy of `current`. The merged queue is
    /// also stored on `current`, so a render that is thrown away still leaves
    /// the updates where the next attempt will find them. Returns the lanes
    /// of the updates skipped at `render_lane`.
    pub(crate) fn reduce(&mut self, current: Option<&mut StateHook>, render_lane: Lane) -> Lanes {
        let pending = self.queue.take_pending();
        if !pending.is_empty() {
            self.base_queue.append(pending);
            if let Some(current) = current {
                current.base_queue = self.base_queue.clone();
            }
        }
        if self.base_queue.is_empty() {
            return NO_LANE;
        }
        let processed = process_update_queue(&self.base_state, &self.base_queue, render_lane);
        self.memoized_state = processed.memoized_state;
        self.base_state = processed.base_state;
        self.base_queue = processed.base_queue;
        processed.skipped_lanes
    }
}

// ============================================================================
// Public hook values
// ============================================================================

/// Enqueues updates for one `use_state` hook.
pub struct Dispatch<S> {
    queue: Rc<SharedQueue>,
    sink: Weak<dyn UpdateSink>,
    _state: PhantomData<fn(S)>,
}

impl<S> Clone for Dispatch<S> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            sink: self.sink.clone(),
            _state: PhantomData,
        }
    }
}

impl<S> fmt::Debug for Dispatch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatch")
    }
}

impl<S: 'static> Dispatch<S> {
    fn new(queue: Rc<SharedQueue>, sink: Weak<dyn UpdateSink>) -> Self {
        Self {
            queue,
            sink,
            _state: PhantomData,
        }
    }

    /// Enqueue an action and schedule a render for it.
    pub fn dispatch(&self, action: impl Into<Action<S>>) {
        let Some(sink) = self.sink.upgrade() else {
            tracing::warn!("dispatch on an unmounted root ignored");
            return;
        };
        let lane = sink.request_update_lane();
        self.queue.enqueue(action.into().erase(), lane);
        sink.schedule_update(lane);
    }

    /// Replace the state.
    pub fn set(&self, value: S) {
        self.dispatch(Action::Replace(value));
    }

    /// Compute the next state from the previous one.
    pub fn update(&self, f: impl Fn(&S) -> S + 'static) {
        self.dispatch(Action::update(f));
    }
}

/// A mutable box that survives re-renders. Returned by [`RenderCx::use_ref`].
pub struct MutableRef<T>(Rc<RefCell<T>>);

impl<T> Clone for MutableRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> MutableRef<T> {
    /// Borrow the value.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Borrow the value mutably.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    /// Replace the value, returning the old one.
    pub fn replace(&self, value: T) -> T {
        self.0.replace(value)
    }

    /// Whether two refs are the same box.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> MutableRef<T> {
    /// A copy of the value.
    pub fn get(&self) -> T {
        self.0.borrow().clone()
    }
}

trait DepValue {
    fn as_any(&self) -> &dyn Any;
    fn same(&self, other: &dyn DepValue) -> bool;
}

impl<T: PartialEq + 'static> DepValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same(&self, other: &dyn DepValue) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }
}

/// Dependency snapshot of an effect.
///
/// Two snapshots are equal when they have the same length and every
/// position holds values of the same type that compare equal.
#[derive(Clone, Default)]
pub struct Deps(Vec<Rc<dyn DepValue>>);

impl Deps {
    /// An empty snapshot: the effect runs on mount only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a dependency.
    pub fn with(mut self, value: impl PartialEq + 'static) -> Self {
        self.0.push(Rc::new(value));
        self
    }

    /// Number of dependencies.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no dependencies.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn same_as(&self, prev: &Deps) -> bool {
        self.0.len() == prev.0.len()
            && self
                .0
                .iter()
                .zip(&prev.0)
                .all(|(next, prev)| next.same(&**prev))
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Deps(len = {})", self.0.len())
    }
}

/// Build a [`Deps`] snapshot from a list of values.
#[macro_export]
macro_rules! deps {
    ($($value:expr),* $(,)?) => {
        $crate::Deps::new()$(.with($value))*
    };
}

/// Wrap a cleanup closure as the return value of an effect.
pub fn cleanup(f: impl FnOnce() + 'static) -> Option<EffectDestroy> {
    Some(Box::new(f))
}

// ============================================================================
// Render context
// ============================================================================

/// The render-scoped context handed to a function component.
pub struct RenderCx<'a> {
    dispatcher: HooksDispatcher,
    component: &'a str,
    render_lane: Lane,
    hooks: Vec<Hook>,
    current_hooks: &'a mut [Hook],
    cursor: usize,
    effects: &'a mut EffectArena,
    effect_ring: EffectRing,
    flags: Flags,
    skipped_lanes: Lanes,
    sink: Weak<dyn UpdateSink>,
}

struct RenderOutput {
    hooks: Vec<Hook>,
    effect_ring: EffectRing,
    flags: Flags,
    skipped_lanes: Lanes,
}

fn kind_mismatch(component: &str, index: usize, expected: &'static str, found: &'static str) -> RenderError {
    RenderError::HookKindMismatch {
        component: component.to_owned(),
        index,
        expected,
        found,
    }
}

impl<'a> RenderCx<'a> {
    /// Which hook implementations this render uses.
    pub fn dispatcher(&self) -> HooksDispatcher {
        self.dispatcher
    }

    /// The lane being rendered.
    pub fn render_lane(&self) -> Lane {
        self.render_lane
    }

    /// Local state, initialised to `initial` on mount.
    pub fn use_state<S: Clone + 'static>(&mut self, initial: S) -> Result<(S, Dispatch<S>)> {
        self.use_state_with(move || initial)
    }

    /// Local state, initialised lazily by `init` on mount.
    pub fn use_state_with<S: Clone + 'static>(
        &mut self,
        init: impl FnOnce() -> S,
    ) -> Result<(S, Dispatch<S>)> {
        let state = match self.dispatcher {
            HooksDispatcher::Mount => StateHook::new(Rc::new(init())),
            HooksDispatcher::Update => {
                let index = self.advance()?;
                let lane = self.render_lane;
                match &mut self.current_hooks[index] {
                    Hook::State(current) => {
                        let mut state = current.clone();
                        self.skipped_lanes |= state.reduce(Some(current), lane);
                        state
                    }
                    other => {
                        let found = other.kind();
                        return Err(kind_mismatch(self.component, index, "use_state", found));
                    }
                }
            }
        };

        let Some(value) = state.memoized_state.downcast_ref::<S>().cloned() else {
            return Err(kind_mismatch(
                self.component,
                self.hooks.len(),
                "use_state",
                "use_state of another type",
            ));
        };
        let dispatch = Dispatch::new(state.queue.clone(), self.sink.clone());
        self.hooks.push(Hook::State(state));
        Ok((value, dispatch))
    }

    /// Register a passive effect.
    ///
    /// With `deps` of `None` the effect runs after every commit. Otherwise it
    /// runs on mount and whenever the snapshot differs from the previous one.
    pub fn use_effect(
        &mut self,
        create: impl FnOnce() -> Option<EffectDestroy> + 'static,
        deps: Option<Deps>,
    ) -> Result<()> {
        let passive = HookEffectTags::PASSIVE;
        let id = match self.dispatcher {
            HooksDispatcher::Mount => {
                self.flags |= Flags::PASSIVE_EFFECT;
                self.effects.push_effect(
                    &mut self.effect_ring,
                    passive | HookEffectTags::HAS_EFFECT,
                    Box::new(create),
                    Rc::default(),
                    deps,
                )
            }
            HooksDispatcher::Update => {
                let index = self.advance()?;
                let prev = match &self.current_hooks[index] {
                    Hook::Effect(id) => *id,
                    other => {
                        return Err(kind_mismatch(self.component, index, "use_effect", other.kind()));
                    }
                };
                let (destroy, unchanged) = match self.effects.get(prev) {
                    Some(record) => {
                        let unchanged = match (&deps, &record.deps) {
                            (Some(next), Some(prev)) => next.same_as(prev),
                            _ => false,
                        };
                        (record.destroy.clone(), unchanged)
                    }
                    None => (Rc::default(), false),
                };
                let tags = if unchanged {
                    cov_mark::hit!(effect_deps_unchanged);
                    passive
                } else {
                    self.flags |= Flags::PASSIVE_EFFECT;
                    passive | HookEffectTags::HAS_EFFECT
                };
                self.effects
                    .push_effect(&mut self.effect_ring, tags, Box::new(create), destroy, deps)
            }
        };
        self.hooks.push(Hook::Effect(id));
        Ok(())
    }

    /// A mutable box allocated on mount and returned unchanged afterwards.
    pub fn use_ref<T: 'static>(&mut self, initial: T) -> Result<MutableRef<T>> {
        let cell: Rc<RefCell<T>> = match self.dispatcher {
            HooksDispatcher::Mount => Rc::new(RefCell::new(initial)),
            HooksDispatcher::Update => {
                let index = self.advance()?;
                let stored = match &self.current_hooks[index] {
                    Hook::Ref(stored) => stored.clone(),
                    other => {
                        return Err(kind_mismatch(self.component, index, "use_ref", other.kind()));
                    }
                };
                match stored.downcast::<RefCell<T>>() {
                    Ok(cell) => cell,
                    Err(_) => {
                        return Err(kind_mismatch(
                            self.component,
                            index,
                            "use_ref",
                            "use_ref of another type",
                        ));
                    }
                }
            }
        };
        self.hooks.push(Hook::Ref(cell.clone()));
        Ok(MutableRef(cell))
    }

    /// A pending flag plus a function that runs updates as a transition.
    pub fn use_transition(&mut self) -> Result<(bool, StartTransition)> {
        let (is_pending, set_pending) = self.use_state(false)?;
        let start = match self.dispatcher {
            HooksDispatcher::Mount => StartTransition::new(set_pending, self.sink.clone()),
            HooksDispatcher::Update => {
                let index = self.advance()?;
                match &self.current_hooks[index] {
                    Hook::Transition(start) => start.clone(),
                    other => {
                        return Err(kind_mismatch(
                            self.component,
                            index,
                            "use_transition",
                            other.kind(),
                        ));
                    }
                }
            }
        };
        self.hooks.push(Hook::Transition(start.clone()));
        Ok((is_pending, start))
    }

    /// Move the update cursor to the next recorded hook.
    fn advance(&mut self) -> Result<usize> {
        let index = self.cursor;
        if index >= self.current_hooks.len() {
            return Err(RenderError::TooManyHooks {
                component: self.component.to_owned(),
                previous: self.current_hooks.len(),
            });
        }
        self.cursor += 1;
        Ok(index)
    }

    fn finish(self) -> Result<RenderOutput> {
        if self.dispatcher == HooksDispatcher::Update && self.cursor != self.current_hooks.len() {
            return Err(RenderError::TooFewHooks {
                component: self.component.to_owned(),
                rendered: self.cursor,
                previous: self.current_hooks.len(),
            });
        }
        Ok(RenderOutput {
            hooks: self.hooks,
            effect_ring: self.effect_ring,
            flags: self.flags,
            skipped_lanes: self.skipped_lanes,
        })
    }
}

/// Run the function component at `wip` and store its hooks on the fiber.
pub(crate) fn render_with_hooks<I: Clone>(
    fibers: &mut FiberArena<I>,
    effects: &mut EffectArena,
    wip: FiberId,
    render_lane: Lane,
    sink: &Weak<dyn UpdateSink>,
) -> Result<Node> {
    let fiber = &fibers[wip];
    let (component, props) = match (&fiber.element_type, &fiber.pending_props) {
        (FiberType::Component(component), FiberProps::Element(props)) => {
            (component.clone(), props.clone())
        }
        _ => {
            return Err(RenderError::UnexpectedFiber {
                tag: WorkTag::FunctionComponent,
                detail: "function component without a render function",
            });
        }
    };

    let current = fiber.alternate;
    let mut previous = None;
    if let Some(current) = current {
        match std::mem::take(&mut fibers[current].memoized_state) {
            FiberState::Hooks(hooks) => previous = Some(hooks),
            other => fibers[current].memoized_state = other,
        }
    }
    let dispatcher = if previous.is_some() {
        HooksDispatcher::Update
    } else {
        HooksDispatcher::Mount
    };
    tracing::trace!(component = component.name(), ?dispatcher, "render component");

    let mut current_hooks = previous.unwrap_or_default();
    let result = {
        let mut cx = RenderCx {
            dispatcher,
            component: component.name(),
            render_lane,
            hooks: Vec::new(),
            current_hooks: &mut current_hooks,
            cursor: 0,
            effects,
            effect_ring: EffectRing::default(),
            flags: Flags::empty(),
            skipped_lanes: NO_LANE,
            sink: sink.clone(),
        };
        match component.render(&mut cx, &props) {
            Ok(children) => cx.finish().map(|output| (children, output)),
            Err(err) => Err(err),
        }
    };

    // The committed hook list goes back in place whether or not the render
    // succeeded; it may now hold merged base queues.
    if let (Some(current), HooksDispatcher::Update) = (current, dispatcher) {
        fibers[current].memoized_state = FiberState::Hooks(current_hooks);
    }

    let (children, output) = result?;
    let fiber = &mut fibers[wip];
    fiber.memoized_state = FiberState::Hooks(output.hooks);
    fiber.effect_ring = output.effect_ring;
    fiber.flags |= output.flags;
    fiber.lanes |= output.skipped_lanes;
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deps_compare_by_value_and_type() {
        assert!(deps![1, "a"].same_as(&deps![1, "a"]));
        assert!(!deps![1, "a"].same_as(&deps![2, "a"]));
        assert!(!deps![1].same_as(&deps![1, 2]));
        // Same value, different type.
        assert!(!deps![1i32].same_as(&deps![1i64]));
        assert!(Deps::new().same_as(&deps![]));
    }

    #[test]
    fn mutable_ref_is_shared_between_clones() {
        let a = MutableRef(Rc::new(RefCell::new(1)));
        let b = a.clone();
        *b.borrow_mut() += 1;
        assert_eq!(a.get(), 2);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.replace(5), 2);
        assert_eq!(b.get(), 5);
    }
}
