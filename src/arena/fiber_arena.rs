// Fiber arena - storage for the double-buffered work tree
//
// Every fiber lives in one slab owned by its root and is addressed by FiberId.
// Tree links are handles, not pointers:
// - child   = the owning edge (a fiber belongs to its parent's child list)
// - parent  = non-owning back-reference ("return")
// - sibling = non-owning link to the next child of the same parent
// - alternate = non-owning cross-reference to the counterpart in the other buffer
//
// The current tree and the work-in-progress tree share one slab. A fiber and
// its alternate are two slots; create_work_in_progress recycles the alternate
// slot instead of allocating when one exists. Slots that are no longer
// reachable from the current tree are released by commit::collect_garbage.

use std::ops::{Index, IndexMut};
use std::rc::Rc;

use slab::Slab;

use crate::element::{Component, Element, ElementType, HostRef, Key, Node, Props};
use crate::flags::Flags;
use crate::hooks::{Hook, StateHook};
use crate::lane::{Lanes, NO_LANE};

use super::EffectRing;

/// Handle of a fiber inside its root's arena.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct FiberId(u32);

impl FiberId {
    /// Create a FiberId from a raw index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What kind of unit of UI a fiber represents.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum WorkTag {
    /// A function component.
    FunctionComponent,
    /// The root of a mounted tree.
    HostRoot,
    /// A host element.
    HostComponent,
    /// A host text node.
    HostText,
    /// A fragment.
    Fragment,
}

/// The type a fiber was created from.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum FiberType {
    None,
    Host(Rc<str>),
    Component(Component),
}

impl FiberType {
    fn from_element(element_type: &ElementType) -> Self {
        match element_type {
            ElementType::Host(tag) => Self::Host(tag.clone()),
            ElementType::Component(component) => Self::Component(component.clone()),
        }
    }

    pub(crate) fn matches(&self, element_type: &ElementType) -> bool {
        match (self, element_type) {
            (Self::Host(a), ElementType::Host(b)) => a == b,
            (Self::Component(a), ElementType::Component(b)) => a == b,
            _ => false,
        }
    }
}

/// Props a fiber renders with, shaped by its tag.
#[derive(Clone, Debug)]
pub(crate) enum FiberProps {
    Root,
    Element(Rc<Props>),
    Text(Rc<str>),
    Children(Vec<Node>),
}

/// Per-tag persistent state.
#[derive(Clone, Default)]
pub(crate) enum FiberState {
    #[default]
    Empty,
    Hooks(Vec<Hook>),
    Root(StateHook),
}

pub(crate) struct Fiber<I> {
    pub(crate) tag: WorkTag,
    pub(crate) key: Option<Key>,
    pub(crate) element_type: FiberType,
    pub(crate) pending_props: FiberProps,
    pub(crate) memoized_props: Option<FiberProps>,
    pub(crate) state_node: Option<I>,
    pub(crate) host_ref: Option<HostRef>,

    pub(crate) parent: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,

    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) deletions: Vec<FiberId>,
    pub(crate) alternate: Option<FiberId>,
    /// Lanes of hook updates skipped by this fiber's last render. The root's
    /// pending lanes decide what renders next; this is kept for traces.
    pub(crate) lanes: Lanes,

    pub(crate) memoized_state: FiberState,
    pub(crate) effect_ring: EffectRing,
}

impl<I> Fiber<I> {
    pub(crate) fn new(tag: WorkTag, pending_props: FiberProps, key: Option<Key>) -> Self {
        Self {
            tag,
            key,
            element_type: FiberType::None,
            pending_props,
            memoized_props: None,
            state_node: None,
            host_ref: None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: Vec::new(),
            alternate: None,
            lanes: NO_LANE,
            memoized_state: FiberState::Empty,
            effect_ring: EffectRing::default(),
        }
    }

    /// Whether this fiber owns a host instance.
    pub(crate) fn is_host(&self) -> bool {
        matches!(self.tag, WorkTag::HostComponent | WorkTag::HostText)
    }
}

/// Slab of fibers belonging to one root.
pub(crate) struct FiberArena<I> {
    slab: Slab<Fiber<I>>,
}

impl<I> Default for FiberArena<I> {
    fn default() -> Self {
        Self { slab: Slab::new() }
    }
}

impl<I: Clone> FiberArena<I> {
    pub(crate) fn insert(&mut self, fiber: Fiber<I>) -> FiberId {
        FiberId::new(self.slab.insert(fiber) as u32)
    }

    pub(crate) fn get(&self, id: FiberId) -> Option<&Fiber<I>> {
        self.slab.get(id.index())
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: FiberId) -> bool {
        self.slab.contains(id.index())
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    /// Keep only the fibers for which `keep` returns true.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(FiberId) -> bool) {
        self.slab
            .retain(|index, _| keep(FiberId::new(index as u32)));
    }

    /// The children of `parent`, following the sibling chain.
    pub(crate) fn children(&self, parent: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut next = self[parent].child;
        while let Some(id) = next {
            out.push(id);
            next = self[id].sibling;
        }
        out
    }

    pub(crate) fn create_host_root(&mut self, state: StateHook) -> FiberId {
        let mut fiber = Fiber::new(WorkTag::HostRoot, FiberProps::Root, None);
        fiber.memoized_state = FiberState::Root(state);
        self.insert(fiber)
    }

    /// Pair `current` with a work-in-progress copy, recycling the alternate
    /// slot when one exists.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending_props: FiberProps,
    ) -> FiberId {
        let existing = self[current].alternate;
        let wip = match existing {
            Some(wip) => {
                let fiber = &mut self[wip];
                fiber.pending_props = pending_props;
                fiber.flags = Flags::empty();
                fiber.subtree_flags = Flags::empty();
                fiber.deletions.clear();
                wip
            }
            None => {
                let source = &self[current];
                let mut fiber = Fiber::new(source.tag, pending_props, source.key.clone());
                fiber.state_node = source.state_node.clone();
                fiber.alternate = Some(current);
                let wip = self.insert(fiber);
                self[current].alternate = Some(wip);
                wip
            }
        };

        let source = &self[current];
        let element_type = source.element_type.clone();
        let child = source.child;
        let memoized_props = source.memoized_props.clone();
        let lanes = source.lanes;
        let host_ref = source.host_ref.clone();
        let effect_ring = source.effect_ring;
        // Hook lists are rebuilt by every render; only the root carries its
        // state across through the copy.
        let memoized_state = match &source.memoized_state {
            FiberState::Root(state) => FiberState::Root(state.clone()),
            _ => FiberState::Empty,
        };

        let fiber = &mut self[wip];
        fiber.element_type = element_type;
        fiber.child = child;
        fiber.memoized_props = memoized_props;
        fiber.lanes = lanes;
        fiber.host_ref = host_ref;
        fiber.effect_ring = effect_ring;
        fiber.memoized_state = memoized_state;
        wip
    }

    pub(crate) fn create_from_element(&mut self, element: &Element, lanes: Lanes) -> FiberId {
        let tag = match element.element_type {
            ElementType::Host(_) => WorkTag::HostComponent,
            ElementType::Component(_) => WorkTag::FunctionComponent,
        };
        let mut fiber = Fiber::new(
            tag,
            FiberProps::Element(element.props.clone()),
            element.key.clone(),
        );
        fiber.element_type = FiberType::from_element(&element.element_type);
        fiber.host_ref = element.host_ref.clone();
        fiber.lanes = lanes;
        self.insert(fiber)
    }

    pub(crate) fn create_from_text(&mut self, content: Rc<str>, lanes: Lanes) -> FiberId {
        let mut fiber = Fiber::new(WorkTag::HostText, FiberProps::Text(content), None);
        fiber.lanes = lanes;
        self.insert(fiber)
    }

    pub(crate) fn create_from_fragment(
        &mut self,
        children: Vec<Node>,
        key: Option<Key>,
        lanes: Lanes,
    ) -> FiberId {
        let mut fiber = Fiber::new(WorkTag::Fragment, FiberProps::Children(children), key);
        fiber.lanes = lanes;
        self.insert(fiber)
    }
}

impl<I> Index<FiberId> for FiberArena<I> {
    type Output = Fiber<I>;

    fn index(&self, id: FiberId) -> &Fiber<I> {
        &self.slab[id.index()]
    }
}

impl<I> IndexMut<FiberId> for FiberArena<I> {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber<I> {
        &mut self.slab[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::h;

    fn element(node: Node) -> Element {
        match node {
            Node::Element(element) => element,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn work_in_progress_pairs_and_recycles_alternate() {
        let mut arena: FiberArena<u32> = FiberArena::default();
        let div = element(h("div").attr("id", "a").build());
        let current = arena.create_from_element(&div, Lanes::DEFAULT);
        arena[current].state_node = Some(7);

        let wip = arena.create_work_in_progress(current, FiberProps::Root);
        assert_eq!(arena[wip].alternate, Some(current));
        assert_eq!(arena[current].alternate, Some(wip));
        assert_eq!(arena[wip].state_node, Some(7));
        assert_eq!(arena.len(), 2);

        arena[wip].flags |= Flags::PLACEMENT;
        arena[wip].deletions.push(current);

        // The second pass reuses the same slot and clears stale effects.
        let again = arena.create_work_in_progress(current, FiberProps::Root);
        assert_eq!(again, wip);
        assert!(arena[again].flags.is_empty());
        assert!(arena[again].deletions.is_empty());
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn fibers_from_elements_carry_key_and_type() {
        let mut arena: FiberArena<u32> = FiberArena::default();
        let li = element(h("li").key("k1").build());
        let id = arena.create_from_element(&li, Lanes::SYNC);
        assert_eq!(arena[id].tag, WorkTag::HostComponent);
        assert_eq!(arena[id].key, Some(Key::from("k1")));
        assert!(arena[id].element_type.matches(li.element_type()));
        assert_eq!(arena[id].lanes, Lanes::SYNC);

        let text = arena.create_from_text("hi".into(), NO_LANE);
        assert!(arena[text].is_host());
        let fragment = arena.create_from_fragment(Vec::new(), None, NO_LANE);
        assert!(!arena[fragment].is_host());
    }

    #[test]
    fn retain_releases_unkept_slots() {
        let mut arena: FiberArena<u32> = FiberArena::default();
        let a = arena.create_from_text("a".into(), NO_LANE);
        let b = arena.create_from_text("b".into(), NO_LANE);
        arena.retain(|id| id == a);
        assert!(arena.contains(a));
        assert!(!arena.contains(b));
        assert!(arena.get(b).is_none());
    }
}
