#![deny(missing_docs)]

//! A fiber reconciliation engine with priority lanes and hooks.
//!
//! Application code describes UI as a tree of [`Node`]s. The engine diffs
//! each new description against the last committed one and applies the
//! smallest set of mutations to a host tree through [`HostConfig`]. Work is
//! split into units that can be interrupted between fibers, and every update
//! carries a priority [`Lane`] that decides when it is rendered.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::rc::Rc;
//! use fiberlane::{Component, ManualScheduler, MemoryHost, component, create_root, h};
//!
//! let counter = Component::new("Counter", |cx, _props| {
//!     let (count, set_count) = cx.use_state(0)?;
//!     Ok(h("button")
//!         .on("click", move || set_count.update(|n| n + 1))
//!         .child(count)
//!         .build())
//! });
//!
//! let host = Rc::new(MemoryHost::new());
//! let scheduler = Rc::new(ManualScheduler::new());
//! let container = host.create_container();
//! let root = create_root(host.clone(), scheduler.clone(), container);
//!
//! root.render(component(&counter));
//! scheduler.flush_all();
//! assert_eq!(host.to_markup(container), "<button>0</button>");
//! ```
//!
//! # Core Types
//!
//! - [`Root`] - A mounted tree. [`Root::render`] schedules a new element tree.
//! - [`Component`] - A named render function taking a [`RenderCx`].
//! - [`RenderCx`] - Hooks: [`use_state`](RenderCx::use_state),
//!   [`use_effect`](RenderCx::use_effect), [`use_ref`](RenderCx::use_ref) and
//!   [`use_transition`](RenderCx::use_transition).
//! - [`Lanes`] - Priority bitset. Lower bits are more urgent.
//! - [`Scheduler`] - The cooperative task scheduler the engine runs on;
//!   [`ManualScheduler`] is a deterministic implementation.
//! - [`HostConfig`] - The rendering target; [`MemoryHost`] keeps everything
//!   in memory.
//!
//! # Priorities
//!
//! ```ignore
//! // Sync: flushed from the next host microtask, never time sliced.
//! scheduler.run_with_priority(PriorityLevel::Immediate, || set_text.set("hi".into()));
//! host.flush_microtasks();
//!
//! // Transition: rendered after everything more urgent.
//! let (is_pending, start) = cx.use_transition()?;
//! start.start(|| set_tab.set(Tab::Posts));
//! ```
//!
//! # Effects
//!
//! ```ignore
//! cx.use_effect(
//!     move || {
//!         subscribe(id);
//!         cleanup(move || unsubscribe(id))
//!     },
//!     Some(deps![id]),
//! )?;
//! ```
//!
//! Effects run after commit from a scheduled task. Within one flush every
//! cleanup runs before any effect body.

pub(crate) mod arena;
mod begin_work;
mod child_reconciler;
mod commit;
mod complete_work;
mod element;
mod error;
mod flags;
mod hash;
mod hooks;
mod host;
mod lane;
mod memory_host;
mod root;
mod scheduler;
mod sync_queue;
mod transition;
mod update_queue;
mod work_loop;

// Entry points
pub use root::{
    DEFAULT_LABEL, DEFAULT_TIME_SLICING, Root, RootOptions, create_root, create_root_with_options,
};

// Element descriptors
pub use element::{
    Component, Element, ElementBuilder, ElementType, Fragment, Handler, HostRef, Key, Node,
    PropValue, Props, RenderFn, component, h,
};

// Hooks
pub use hooks::{Deps, Dispatch, HooksDispatcher, MutableRef, RenderCx, cleanup};
pub use transition::StartTransition;
pub use update_queue::Action;

// Priorities and scheduling
pub use flags::Flags;
pub use lane::{Lane, Lanes, NO_LANE, lanes_to_scheduler_priority, scheduler_priority_to_lane};
pub use scheduler::{
    CallbackHandle, DEFAULT_SLICE_BUDGET, ManualScheduler, PriorityLevel, Scheduler, Task,
};

// Hosts
pub use host::HostConfig;
pub use memory_host::{HostOp, MemoryHost, MemoryNodeId, event_priority};

// Diagnostics
pub use arena::{EffectDestroy, FiberId, WorkTag};
pub use commit::CommitStats;
pub use error::{RenderError, Result};
