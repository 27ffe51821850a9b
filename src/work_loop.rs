//! Work loop and scheduler bridge.
//!
//! Each mounted root owns a [`RootShared`]: the engine state behind a
//! `RefCell`, plus the pieces that must stay reachable while that state is
//! borrowed (batch config, sync queue, deferred lanes).
//!
//! Sync-lane work is batched through the sync queue and flushed from one
//! host microtask. Every other lane is rendered by a single yieldable task
//! on the scheduler. When a more urgent lane shows up, the scheduled task is
//! cancelled and replaced. A render that yields keeps its work tree and
//! resumes it if the next run is for the same lane, otherwise it restarts.
//!
//! Updates dispatched while the state is borrowed (from inside a render)
//! cannot reach the root directly. Their lanes are parked in
//! `deferred_lanes` and re-applied as soon as the borrow is released.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::arena::{EffectArena, FiberArena, FiberId, FiberProps};
use crate::begin_work::begin_work;
use crate::commit::{CommitStats, PassiveWork, PendingPassiveEffects, commit_root};
use crate::complete_work::complete_work;
use crate::element::Node;
use crate::error::{RenderError, Result};
use crate::hooks::{StateHook, UpdateSink};
use crate::host::HostConfig;
use crate::lane::{Lane, Lanes, NO_LANE, lanes_to_scheduler_priority, scheduler_priority_to_lane};
use crate::root::RootOptions;
use crate::scheduler::{CallbackHandle, PriorityLevel, Scheduler, Task};
use crate::sync_queue::SyncTaskQueue;
use crate::transition::BatchConfig;
use crate::update_queue::{Action, SharedQueue};

/// How a call to `render_root` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootExit {
    Completed,
    Yielded,
}

pub(crate) struct RootInner<H: HostConfig> {
    /// The last committed tree.
    pub(crate) current: FiberId,
    pub(crate) finished_work: Option<FiberId>,
    pub(crate) finished_lane: Lane,
    pub(crate) pending_lanes: Lanes,
    /// Lanes updated while a render at that lane was in progress.
    pub(crate) interleaved_lanes: Lanes,
    pub(crate) pending_passive: PendingPassiveEffects,
    pub(crate) callback_node: Option<CallbackHandle>,
    pub(crate) callback_priority: Lane,

    pub(crate) fibers: FiberArena<H::Instance>,
    pub(crate) effects: EffectArena,

    pub(crate) work_in_progress: Option<FiberId>,
    pub(crate) wip_root: Option<FiberId>,
    pub(crate) wip_root_render_lane: Lane,

    pub(crate) root_does_have_passive_effects: bool,
    pub(crate) last_error: Option<RenderError>,
    pub(crate) last_commit: Option<CommitStats>,
    sink: Weak<dyn UpdateSink>,
}

impl<H: HostConfig> RootInner<H> {
    fn mark_root_updated(&mut self, lane: Lane) {
        self.pending_lanes |= lane;
        if self.work_in_progress.is_some() && self.wip_root_render_lane.intersects(lane) {
            self.interleaved_lanes |= lane;
        }
    }
}

pub(crate) struct RootShared<H: HostConfig> {
    host: Rc<H>,
    scheduler: Rc<dyn Scheduler>,
    pub(crate) options: RootOptions,
    pub(crate) inner: RefCell<RootInner<H>>,
    root_queue: Rc<SharedQueue>,
    batch_config: BatchConfig,
    sync_queue: SyncTaskQueue,
    sync_flush_scheduled: Cell<bool>,
    deferred_lanes: Cell<Lanes>,
    this: Weak<Self>,
}

impl<H: HostConfig> RootShared<H> {
    pub(crate) fn new(
        host: Rc<H>,
        scheduler: Rc<dyn Scheduler>,
        container: H::Instance,
        options: RootOptions,
    ) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let sink: Weak<dyn UpdateSink> = this.clone();
            let root_queue = SharedQueue::new();
            let mut fibers = FiberArena::default();
            let current = fibers.create_host_root(StateHook::with_queue(
                Rc::new(Node::Empty),
                root_queue.clone(),
            ));
            fibers[current].state_node = Some(container);

            Self {
                host,
                scheduler,
                options,
                inner: RefCell::new(RootInner {
                    current,
                    finished_work: None,
                    finished_lane: NO_LANE,
                    pending_lanes: NO_LANE,
                    interleaved_lanes: NO_LANE,
                    pending_passive: PendingPassiveEffects::default(),
                    callback_node: None,
                    callback_priority: NO_LANE,
                    fibers,
                    effects: EffectArena::default(),
                    work_in_progress: None,
                    wip_root: None,
                    wip_root_render_lane: NO_LANE,
                    root_does_have_passive_effects: false,
                    last_error: None,
                    last_commit: None,
                    sink,
                }),
                root_queue,
                batch_config: BatchConfig::default(),
                sync_queue: SyncTaskQueue::default(),
                sync_flush_scheduled: Cell::new(false),
                deferred_lanes: Cell::new(NO_LANE),
                this: this.clone(),
            }
        })
    }

    /// Queue `element` as the root's new child tree.
    pub(crate) fn update_container(&self, element: Node) {
        let lane = self.request_update_lane();
        tracing::debug!(root = %self.options.label, ?lane, "root update requested");
        self.root_queue.enqueue(Action::Replace(element).erase(), lane);
        self.schedule_update(lane);
    }

    fn ensure_root_is_scheduled(&self, inner: &mut RootInner<H>) {
        let next_lane = inner.pending_lanes.highest_priority();
        let existing = inner.callback_node;

        if next_lane.is_empty() {
            if let Some(handle) = existing {
                self.scheduler.cancel_callback(handle);
            }
            inner.callback_node = None;
            inner.callback_priority = NO_LANE;
            return;
        }
        if inner.callback_priority == next_lane {
            tracing::trace!(root = %self.options.label, ?next_lane, "callback already scheduled");
            return;
        }
        if let Some(handle) = existing {
            cov_mark::hit!(scheduled_callback_replaced);
            tracing::debug!(
                root = %self.options.label,
                previous = ?inner.callback_priority,
                ?next_lane,
                "cancelling scheduled render for a different lane"
            );
            self.scheduler.cancel_callback(handle);
        }

        let callback_node = if next_lane == Lanes::SYNC {
            tracing::debug!(root = %self.options.label, "scheduling sync render");
            self.schedule_sync_callback();
            None
        } else {
            let priority = lanes_to_scheduler_priority(next_lane);
            tracing::debug!(root = %self.options.label, ?next_lane, ?priority, "scheduling concurrent render");
            Some(self.scheduler.schedule_callback(priority, self.concurrent_task()))
        };
        inner.callback_node = callback_node;
        inner.callback_priority = next_lane;
    }

    fn schedule_sync_callback(&self) {
        let root = self.this.clone();
        self.sync_queue.schedule(Box::new(move || {
            if let Some(root) = root.upgrade() {
                root.perform_sync_work_on_root();
            }
        }));
        if !self.sync_flush_scheduled.replace(true) {
            let root = self.this.clone();
            self.host.schedule_microtask(Box::new(move || {
                if let Some(root) = root.upgrade() {
                    root.flush_sync_callbacks();
                }
            }));
        }
    }

    fn flush_sync_callbacks(&self) {
        self.sync_flush_scheduled.set(false);
        self.sync_queue.flush();
    }

    fn concurrent_task(&self) -> Task {
        let root = self.this.clone();
        Task::new(move |did_timeout| {
            root.upgrade()
                .and_then(|root| root.perform_concurrent_work_on_root(did_timeout))
        })
    }

    fn schedule_passive_flush(&self) {
        let root = self.this.clone();
        tracing::trace!(root = %self.options.label, "scheduling passive effect flush");
        self.scheduler.schedule_callback(
            PriorityLevel::Normal,
            Task::new(move |_| {
                if let Some(root) = root.upgrade() {
                    root.flush_passive_effects();
                    root.drain_deferred();
                }
                None
            }),
        );
    }

    fn perform_sync_work_on_root(&self) {
        self.flush_passive_effects();
        {
            let mut inner = self.inner.borrow_mut();
            let lane = inner.pending_lanes.highest_priority();
            if lane != Lanes::SYNC {
                // Sync work was already done; pick up whatever is left.
                self.ensure_root_is_scheduled(&mut inner);
            } else {
                match self.render_root(&mut inner, lane, false) {
                    Ok(_) => {
                        self.commit(&mut inner);
                        self.ensure_root_is_scheduled(&mut inner);
                    }
                    // Not rescheduled until a new update arrives.
                    Err(err) => self.handle_render_error(&mut inner, err),
                }
            }
        }
        self.drain_deferred();
    }

    fn perform_concurrent_work_on_root(&self, did_timeout: bool) -> Option<Task> {
        let original_callback = self.inner.borrow().callback_node;
        if self.flush_passive_effects() && self.inner.borrow().callback_node != original_callback {
            cov_mark::hit!(passive_flush_replaced_callback);
            return None;
        }

        let exit = {
            let mut inner = self.inner.borrow_mut();
            let lane = inner.pending_lanes.highest_priority();
            if lane.is_empty() {
                self.ensure_root_is_scheduled(&mut inner);
                return None;
            }
            let time_slice = self.options.time_slicing && !did_timeout && lane != Lanes::SYNC;
            match self.render_root(&mut inner, lane, time_slice) {
                Ok(RootExit::Yielded) => {
                    tracing::trace!(root = %self.options.label, ?lane, "render yielded");
                    RootExit::Yielded
                }
                Ok(RootExit::Completed) => {
                    self.commit(&mut inner);
                    self.ensure_root_is_scheduled(&mut inner);
                    RootExit::Completed
                }
                Err(err) => {
                    self.handle_render_error(&mut inner, err);
                    RootExit::Completed
                }
            }
        };
        self.drain_deferred();

        let still_scheduled =
            original_callback.is_some() && self.inner.borrow().callback_node == original_callback;
        (exit == RootExit::Yielded && still_scheduled).then(|| self.concurrent_task())
    }

    fn render_root(&self, inner: &mut RootInner<H>, lane: Lane, time_slice: bool) -> Result<RootExit> {
        if inner.work_in_progress.is_none() || inner.wip_root_render_lane != lane {
            if inner.work_in_progress.is_some() {
                cov_mark::hit!(render_restarted_for_new_lane);
                tracing::debug!(
                    root = %self.options.label,
                    previous = ?inner.wip_root_render_lane,
                    ?lane,
                    "discarding in-progress render"
                );
            }
            prepare_fresh_stack(inner, lane);
        } else {
            cov_mark::hit!(render_resumed);
        }
        tracing::debug!(root = %self.options.label, ?lane, time_slice, "render");

        while let Some(unit) = inner.work_in_progress {
            if time_slice && self.scheduler.should_yield() {
                return Ok(RootExit::Yielded);
            }
            self.perform_unit_of_work(inner, unit)?;
        }

        inner.finished_work = inner.wip_root.take();
        inner.finished_lane = lane;
        inner.wip_root_render_lane = NO_LANE;
        Ok(RootExit::Completed)
    }

    fn perform_unit_of_work(&self, inner: &mut RootInner<H>, unit: FiberId) -> Result<()> {
        tracing::trace!(
            fiber = ?unit,
            tag = ?inner.fibers[unit].tag,
            lanes = ?inner.fibers[unit].lanes,
            "begin"
        );
        let next = begin_work(
            &mut inner.fibers,
            &mut inner.effects,
            &inner.sink,
            unit,
            inner.wip_root_render_lane,
        )?;
        let fiber = &mut inner.fibers[unit];
        fiber.memoized_props = Some(fiber.pending_props.clone());

        match next {
            Some(child) => inner.work_in_progress = Some(child),
            None => self.complete_unit_of_work(inner, unit)?,
        }
        Ok(())
    }

    fn complete_unit_of_work(&self, inner: &mut RootInner<H>, unit: FiberId) -> Result<()> {
        let mut node = unit;
        loop {
            complete_work(&*self.host, &mut inner.fibers, node)?;
            if inner.wip_root == Some(node) {
                inner.work_in_progress = None;
                return Ok(());
            }
            let fiber = &inner.fibers[node];
            if let Some(sibling) = fiber.sibling {
                inner.work_in_progress = Some(sibling);
                return Ok(());
            }
            match fiber.parent {
                Some(parent) => node = parent,
                None => {
                    inner.work_in_progress = None;
                    return Ok(());
                }
            }
        }
    }

    fn commit(&self, inner: &mut RootInner<H>) {
        if commit_root(&*self.host, inner) {
            self.schedule_passive_flush();
        }
    }

    fn handle_render_error(&self, inner: &mut RootInner<H>, err: RenderError) {
        tracing::error!(
            root = %self.options.label,
            lane = ?inner.wip_root_render_lane,
            error = %err,
            "render failed, discarding work in progress"
        );
        inner.work_in_progress = None;
        inner.wip_root = None;
        inner.wip_root_render_lane = NO_LANE;
        inner.interleaved_lanes = NO_LANE;
        if let Some(handle) = inner.callback_node.take() {
            self.scheduler.cancel_callback(handle);
        }
        inner.callback_priority = NO_LANE;
        inner.last_error = Some(err);
    }

    /// Run queued passive effects. Returns whether anything ran.
    ///
    /// Callbacks run with the root state released, so effects may dispatch.
    pub(crate) fn flush_passive_effects(&self) -> bool {
        let work = {
            let mut inner = self.inner.borrow_mut();
            inner.root_does_have_passive_effects = false;
            if inner.pending_passive.is_empty() {
                return false;
            }
            let pending = std::mem::take(&mut inner.pending_passive);
            PassiveWork::collect(&mut inner.effects, pending)
        };
        if work.is_empty() {
            return false;
        }
        work.run();
        true
    }

    fn drain_deferred(&self) {
        let lanes = self.deferred_lanes.replace(NO_LANE);
        if !lanes.is_empty() {
            tracing::trace!(root = %self.options.label, ?lanes, "applying deferred updates");
            self.schedule_update(lanes);
        }
    }
}

fn prepare_fresh_stack<H: HostConfig>(inner: &mut RootInner<H>, lane: Lane) {
    inner.finished_work = None;
    inner.finished_lane = NO_LANE;
    let wip = inner
        .fibers
        .create_work_in_progress(inner.current, FiberProps::Root);
    inner.wip_root = Some(wip);
    inner.work_in_progress = Some(wip);
    inner.wip_root_render_lane = lane;
    inner.interleaved_lanes = NO_LANE;
}

impl<H: HostConfig> UpdateSink for RootShared<H> {
    fn request_update_lane(&self) -> Lane {
        if self.batch_config.in_transition() {
            return Lanes::TRANSITION;
        }
        scheduler_priority_to_lane(self.scheduler.current_priority_level())
    }

    fn schedule_update(&self, lane: Lane) {
        match self.inner.try_borrow_mut() {
            Ok(mut inner) => {
                inner.mark_root_updated(lane);
                self.ensure_root_is_scheduled(&mut inner);
            }
            Err(_) => {
                cov_mark::hit!(update_deferred_while_rendering);
                tracing::trace!(root = %self.options.label, ?lane, "root busy, deferring update");
                self.deferred_lanes.set(self.deferred_lanes.get() | lane);
            }
        }
    }

    fn batch_config(&self) -> &BatchConfig {
        &self.batch_config
    }
}
