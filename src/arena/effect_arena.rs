// Effect arena - storage for passive effect records
//
// Each `use_effect` call pushes one EffectRecord per render. The records of a
// fiber form a circular ring threaded through `next`: the fiber keeps the tail
// (EffectRing::last) and `last.next` is the first effect in call order.
//
// Rings stay valid after the fiber that produced them is deleted, because the
// commit pipeline queues ring tails (not fibers) for the passive flush.
//
// The cleanup returned by a create callback lives in a DestroySlot that is
// shared by every record of the same hook, so a record pushed by an abandoned
// render never strands the cleanup of the committed one.

use std::cell::RefCell;
use std::rc::Rc;

use slab::Slab;

use crate::flags::HookEffectTags;
use crate::hooks::Deps;

/// Handle of an effect record.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EffectId(u32);

impl EffectId {
    /// Create an EffectId from a raw index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Convert to usize for slab indexing
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Cleanup returned by an effect's create callback.
pub type EffectDestroy = Box<dyn FnOnce()>;

pub(crate) type EffectCreate = Box<dyn FnOnce() -> Option<EffectDestroy>>;

pub(crate) type DestroySlot = Rc<RefCell<Option<EffectDestroy>>>;

pub(crate) struct EffectRecord {
    pub(crate) tags: HookEffectTags,
    pub(crate) create: Option<EffectCreate>,
    pub(crate) destroy: DestroySlot,
    pub(crate) deps: Option<Deps>,
    next: EffectId,
}

/// Tail pointer of a fiber's effect ring.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct EffectRing {
    pub(crate) last: Option<EffectId>,
}

#[derive(Default)]
pub(crate) struct EffectArena {
    slab: Slab<EffectRecord>,
}

impl EffectArena {
    /// Append a record to `ring` and return its id.
    pub(crate) fn push_effect(
        &mut self,
        ring: &mut EffectRing,
        tags: HookEffectTags,
        create: EffectCreate,
        destroy: DestroySlot,
        deps: Option<Deps>,
    ) -> EffectId {
        let id = EffectId::new(self.slab.vacant_key() as u32);
        let next = match ring.last {
            None => id,
            Some(last) => self.slab[last.index()].next,
        };
        self.slab.insert(EffectRecord {
            tags,
            create: Some(create),
            destroy,
            deps,
            next,
        });
        if let Some(last) = ring.last {
            self.slab[last.index()].next = id;
        }
        ring.last = Some(id);
        id
    }

    pub(crate) fn get(&self, id: EffectId) -> Option<&EffectRecord> {
        self.slab.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: EffectId) -> Option<&mut EffectRecord> {
        self.slab.get_mut(id.index())
    }

    /// Ids of a ring in call order, starting from `last.next`.
    pub(crate) fn ring(&self, ring: EffectRing) -> Vec<EffectId> {
        let Some(last) = ring.last else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let Some(first) = self.get(last).map(|record| record.next) else {
            return out;
        };
        let mut cursor = first;
        loop {
            let Some(record) = self.get(cursor) else {
                break;
            };
            out.push(cursor);
            if cursor == last || out.len() > self.slab.len() {
                break;
            }
            cursor = record.next;
        }
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    /// Keep only the records for which `keep` returns true.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(EffectId) -> bool) {
        self.slab
            .retain(|index, _| keep(EffectId::new(index as u32)));
    }

    #[cfg(test)]
    pub(crate) fn next_of(&self, id: EffectId) -> Option<EffectId> {
        self.get(id).map(|record| record.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EffectCreate {
        Box::new(|| None)
    }

    #[test]
    fn ring_is_circular_in_call_order() {
        let mut arena = EffectArena::default();
        let mut ring = EffectRing::default();
        let a = arena.push_effect(&mut ring, HookEffectTags::PASSIVE, noop(), Rc::default(), None);
        assert_eq!(arena.next_of(a), Some(a));

        let b = arena.push_effect(&mut ring, HookEffectTags::PASSIVE, noop(), Rc::default(), None);
        let c = arena.push_effect(&mut ring, HookEffectTags::PASSIVE, noop(), Rc::default(), None);

        assert_eq!(ring.last, Some(c));
        assert_eq!(arena.next_of(c), Some(a));
        assert_eq!(arena.next_of(a), Some(b));
        assert_eq!(arena.next_of(b), Some(c));
        assert_eq!(arena.ring(ring), vec![a, b, c]);
    }

    #[test]
    fn empty_ring_has_no_members() {
        let arena = EffectArena::default();
        assert!(arena.ring(EffectRing::default()).is_empty());
    }

    #[test]
    fn separate_rings_do_not_mix() {
        let mut arena = EffectArena::default();
        let mut first = EffectRing::default();
        let mut second = EffectRing::default();
        let a = arena.push_effect(&mut first, HookEffectTags::PASSIVE, noop(), Rc::default(), None);
        let b = arena.push_effect(&mut second, HookEffectTags::PASSIVE, noop(), Rc::default(), None);
        let c = arena.push_effect(&mut first, HookEffectTags::PASSIVE, noop(), Rc::default(), None);

        assert_eq!(arena.ring(first), vec![a, c]);
        assert_eq!(arena.ring(second), vec![b]);

        arena.retain(|id| id != b);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.ring(first), vec![a, c]);
    }
}
