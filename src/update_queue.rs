//! Pending state transitions.
//!
//! Updates for one queue live in a circular ring: the ring keeps a pointer to
//! its last update, and `last.next` is the first. Enqueueing relinks the tail
//! in O(1). Processing walks from `last.next` until it cycles back.
//!
//! Each ring owns its slots, so slot keys are only meaningful inside one ring.
//! Appending one ring to another therefore re-pushes the appended updates in
//! order, which is O(n) in the appended ring rather than a two-pointer splice.
//!
//! Rendering at a lane that does not cover an update skips it. Skipped updates
//! (and every update after the first skip) are copied into a base queue, and
//! the base state is frozen at the first skip, so a later render that covers
//! the skipped lane replays them from the right starting point.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use slab::Slab;

use crate::lane::{Lane, Lanes, NO_LANE};

/// Type-erased state value.
pub(crate) type StateValue = Rc<dyn Any>;

/// Type-erased action: maps the previous state to the next one.
pub(crate) type ErasedAction = Rc<dyn Fn(&StateValue) -> StateValue>;

/// A state transition: a replacement value or a function of the previous state.
pub enum Action<S> {
    /// Replace the state.
    Replace(S),
    /// Compute the next state from the previous one.
    Update(Rc<dyn Fn(&S) -> S>),
}

impl<S: 'static> Action<S> {
    /// Build an [`Action::Update`] from a closure.
    pub fn update(f: impl Fn(&S) -> S + 'static) -> Self {
        Self::Update(Rc::new(f))
    }

    pub(crate) fn erase(self) -> ErasedAction {
        match self {
            Action::Replace(value) => {
                let value: StateValue = Rc::new(value);
                Rc::new(move |_: &StateValue| value.clone())
            }
            // The queue is only ever fed actions of its own state type, so the
            // downcast cannot fail; fall back to the previous state if it does.
            Action::Update(f) => Rc::new(move |prev: &StateValue| -> StateValue {
                match prev.downcast_ref::<S>() {
                    Some(prev) => Rc::new(f(prev)),
                    None => prev.clone(),
                }
            }),
        }
    }
}

impl<S> From<S> for Action<S> {
    fn from(value: S) -> Self {
        Action::Replace(value)
    }
}

#[derive(Clone)]
pub(crate) struct Update {
    pub(crate) action: ErasedAction,
    pub(crate) lane: Lane,
    next: usize,
}

/// A circular ring of updates.
///
/// Slots live in a private slab; `last` names the tail, and following `next`
/// from any slot visits every update exactly once before returning.
#[derive(Clone, Default)]
pub(crate) struct UpdateRing {
    slots: Slab<Update>,
    last: Option<usize>,
}

impl UpdateRing {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.last.is_none()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Append an update after the current tail.
    pub(crate) fn push(&mut self, action: ErasedAction, lane: Lane) {
        let key = self.slots.vacant_key();
        let next = match self.last {
            None => key,
            Some(tail) => self.slots[tail].next,
        };
        self.slots.insert(Update { action, lane, next });
        if let Some(tail) = self.last {
            self.slots[tail].next = key;
        }
        self.last = Some(key);
    }

    /// Add every update of `other` after the current tail, keeping order.
    pub(crate) fn append(&mut self, other: UpdateRing) {
        // Slot keys are ring-local, so the other ring's updates are relinked
        // one by one rather than by swapping two boundary pointers.
        for update in other.iter() {
            self.push(update.action.clone(), update.lane);
        }
    }

    /// Iterate from the first update (`last.next`) around to the tail.
    pub(crate) fn iter(&self) -> RingIter<'_> {
        RingIter {
            ring: self,
            next: self.last.map(|tail| self.slots[tail].next),
            remaining: self.slots.len(),
        }
    }
}

impl fmt::Debug for UpdateRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|update| update.lane))
            .finish()
    }
}

pub(crate) struct RingIter<'a> {
    ring: &'a UpdateRing,
    next: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for RingIter<'a> {
    type Item = &'a Update;

    fn next(&mut self) -> Option<&'a Update> {
        if self.remaining == 0 {
            return None;
        }
        let key = self.next?;
        let update = &self.ring.slots[key];
        self.remaining -= 1;
        self.next = Some(update.next);
        Some(update)
    }
}

/// The queue a `dispatch` handle enqueues into.
///
/// Shared by the current and work-in-progress copies of a hook, so updates
/// dispatched between renders are visible to whichever copy renders next.
#[derive(Default)]
pub(crate) struct SharedQueue {
    pending: RefCell<UpdateRing>,
}

impl SharedQueue {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn enqueue(&self, action: ErasedAction, lane: Lane) {
        self.pending.borrow_mut().push(action, lane);
    }

    pub(crate) fn take_pending(&self) -> UpdateRing {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }
}

/// Result of running a ring of updates at a render lane.
pub(crate) struct ProcessedQueue {
    pub(crate) memoized_state: StateValue,
    pub(crate) base_state: StateValue,
    pub(crate) base_queue: UpdateRing,
    /// Lanes of the updates left in `base_queue` for a later render.
    pub(crate) skipped_lanes: Lanes,
}

/// Apply every update in `ring` covered by `render_lane`, in order.
pub(crate) fn process_update_queue(
    base_state: &StateValue,
    ring: &UpdateRing,
    render_lane: Lane,
) -> ProcessedQueue {
    let mut new_state = base_state.clone();
    let mut new_base_state = base_state.clone();
    let mut new_base_queue = UpdateRing::new();
    let mut skipped_lanes = NO_LANE;

    for update in ring.iter() {
        if !render_lane.is_subset(update.lane) {
            cov_mark::hit!(update_skipped_for_lane);
            skipped_lanes |= update.lane;
            if new_base_queue.is_empty() {
                new_base_state = new_state.clone();
            }
            new_base_queue.push(update.action.clone(), update.lane);
        } else {
            if !new_base_queue.is_empty() {
                // Must be replayed after the skipped update, whatever lane renders next.
                new_base_queue.push(update.action.clone(), NO_LANE);
            }
            new_state = (update.action)(&new_state);
        }
    }

    if new_base_queue.is_empty() {
        new_base_state = new_state.clone();
    }

    ProcessedQueue {
        memoized_state: new_state,
        base_state: new_base_state,
        base_queue: new_base_queue,
        skipped_lanes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(value: i32) -> StateValue {
        Rc::new(value)
    }

    fn read(value: &StateValue) -> i32 {
        *value.downcast_ref::<i32>().expect("i32 state")
    }

    fn add(n: i32) -> ErasedAction {
        Action::update(move |prev: &i32| prev + n).erase()
    }

    fn ring_of(updates: &[(ErasedAction, Lane)]) -> UpdateRing {
        let mut ring = UpdateRing::new();
        for (action, lane) in updates {
            ring.push(action.clone(), *lane);
        }
        ring
    }

    #[test]
    fn ring_is_circular_and_ordered() {
        let ring = ring_of(&[
            (add(1), Lanes::SYNC),
            (add(2), Lanes::DEFAULT),
            (add(3), Lanes::TRANSITION),
        ]);
        assert_eq!(ring.len(), 3);

        // Following `next` from the tail three times lands back on the tail.
        let tail = ring.last.expect("non-empty");
        let mut cursor = tail;
        for _ in 0..ring.len() {
            cursor = ring.slots[cursor].next;
        }
        assert_eq!(cursor, tail);

        let lanes: Vec<_> = ring.iter().map(|u| u.lane).collect();
        assert_eq!(lanes, vec![Lanes::SYNC, Lanes::DEFAULT, Lanes::TRANSITION]);
    }

    #[test]
    fn single_update_ring_points_at_itself() {
        let ring = ring_of(&[(add(1), Lanes::SYNC)]);
        let tail = ring.last.expect("non-empty");
        assert_eq!(ring.slots[tail].next, tail);
        assert_eq!(ring.iter().count(), 1);
    }

    #[test]
    fn updates_apply_left_to_right() {
        let ring = ring_of(&[
            (add(2), Lanes::DEFAULT),
            (add(-2), Lanes::DEFAULT),
            (add(2), Lanes::DEFAULT),
        ]);
        let processed = process_update_queue(&state(0), &ring, Lanes::DEFAULT);
        assert_eq!(read(&processed.memoized_state), 2);
        assert_eq!(read(&processed.base_state), 2);
        assert!(processed.base_queue.is_empty());
    }

    #[test]
    fn replace_ignores_previous_state() {
        let ring = ring_of(&[
            (add(5), Lanes::SYNC),
            (Action::Replace(10).erase(), Lanes::SYNC),
            (add(1), Lanes::SYNC),
        ]);
        let processed = process_update_queue(&state(0), &ring, Lanes::SYNC);
        assert_eq!(read(&processed.memoized_state), 11);
    }

    #[test]
    fn skipped_update_freezes_base_state_and_replays() {
        cov_mark::check!(update_skipped_for_lane);
        let ring = ring_of(&[
            (add(1), Lanes::SYNC),
            (add(10), Lanes::DEFAULT),
            (add(100), Lanes::SYNC),
        ]);

        let first = process_update_queue(&state(0), &ring, Lanes::SYNC);
        // Sync render sees 0 + 1 + 100, skipping the default update.
        assert_eq!(read(&first.memoized_state), 101);
        // Replay starts right before the skipped update.
        assert_eq!(read(&first.base_state), 1);
        let lanes: Vec<_> = first.base_queue.iter().map(|u| u.lane).collect();
        assert_eq!(lanes, vec![Lanes::DEFAULT, NO_LANE]);
        assert_eq!(first.skipped_lanes, Lanes::DEFAULT);

        let second = process_update_queue(&first.base_state, &first.base_queue, Lanes::DEFAULT);
        assert_eq!(read(&second.memoized_state), 111);
        assert!(second.base_queue.is_empty());
        assert!(second.skipped_lanes.is_empty());
    }

    #[test]
    fn append_keeps_base_updates_first() {
        let mut base = ring_of(&[(add(1), Lanes::DEFAULT)]);
        let pending = ring_of(&[(add(2), Lanes::SYNC), (add(3), Lanes::SYNC)]);
        base.append(pending);

        let lanes: Vec<_> = base.iter().map(|u| u.lane).collect();
        assert_eq!(lanes, vec![Lanes::DEFAULT, Lanes::SYNC, Lanes::SYNC]);
        assert_eq!(base.iter().count(), base.len());
    }

    #[test]
    fn push_after_append_links_new_tail_to_head() {
        let mut base = ring_of(&[(add(1), Lanes::DEFAULT)]);
        base.append(ring_of(&[(add(10), Lanes::SYNC)]));
        base.push(add(100), Lanes::TRANSITION);

        let tail = base.last.expect("non-empty");
        assert_eq!(base.slots[tail].lane, Lanes::TRANSITION);
        // Walking `next` from the tail visits every slot once before closing.
        let mut cursor = base.slots[tail].next;
        let mut lanes = Vec::new();
        while lanes.len() < base.len() {
            lanes.push(base.slots[cursor].lane);
            cursor = base.slots[cursor].next;
        }
        assert_eq!(cursor, base.slots[tail].next);
        assert_eq!(lanes, vec![Lanes::DEFAULT, Lanes::SYNC, Lanes::TRANSITION]);

        let all = Lanes::DEFAULT | Lanes::SYNC | Lanes::TRANSITION;
        let processed = process_update_queue(&state(0), &base, all);
        assert_eq!(read(&processed.memoized_state), 111);
    }

    #[test]
    fn shared_queue_hands_out_pending_once() {
        let queue = SharedQueue::new();
        queue.enqueue(add(1), Lanes::DEFAULT);
        queue.enqueue(add(1), Lanes::DEFAULT);
        assert_eq!(queue.pending_len(), 2);

        let taken = queue.take_pending();
        assert_eq!(taken.len(), 2);
        assert!(queue.take_pending().is_empty());
    }
}
