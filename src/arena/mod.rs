// Arena-based storage for fibers and effect records
//
// This module provides two arenas, both owned by a root:
// - Fiber arena: stores Fiber nodes of the current and work-in-progress trees
// - Effect arena: stores EffectRecords threaded into per-fiber circular rings
//
// FiberId and EffectId are lightweight newtypes that index into the slabs.
// Only parent->child is an owning edge; every other link is a handle.

pub mod effect_arena;
pub mod fiber_arena;

pub use effect_arena::{EffectDestroy, EffectId};
pub(crate) use effect_arena::{DestroySlot, EffectArena, EffectCreate, EffectRing};

pub use fiber_arena::{FiberId, WorkTag};
#[cfg(test)]
pub(crate) use fiber_arena::Fiber;
pub(crate) use fiber_arena::{FiberArena, FiberProps, FiberState, FiberType};
