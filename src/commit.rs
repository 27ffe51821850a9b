//! Commit pipeline.
//!
//! Applies a finished work tree to the host in one synchronous pass:
//!
//! 1. mutation: placements, host updates and deletions, per fiber in that
//!    order, children before parents; old refs are detached here
//! 2. the double-buffer swap (`current = finished`)
//! 3. layout: new refs are attached to their host instances
//! 4. arena collection of everything no longer reachable
//!
//! Passive effects are only queued here. They run later through
//! [`PassiveWork`], which calls every destroy before any create.

use crate::arena::{
    DestroySlot, EffectArena, EffectCreate, EffectDestroy, EffectRing, FiberArena, FiberId,
    FiberProps, WorkTag,
};
use crate::flags::{Flags, HookEffectTags};
use crate::hash::FastHashSet;
use crate::host::HostConfig;
use crate::lane::{Lane, NO_LANE};
use crate::work_loop::RootInner;

/// Summary of one commit, see [`Root::last_commit`](crate::Root::last_commit).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// The lane that was committed.
    pub lane: Lane,
    /// Fibers inserted or moved in the host tree.
    pub placements: usize,
    /// Host instances whose props or text were updated.
    pub updates: usize,
    /// Subtrees removed.
    pub deletions: usize,
    /// Fibers whose passive effects were queued to re-run.
    pub passive_effects: usize,
    /// Arena slots released after the commit.
    pub fibers_released: usize,
}

/// Effect rings waiting for the passive flush.
#[derive(Default)]
pub(crate) struct PendingPassiveEffects {
    pub(crate) unmount: Vec<EffectRing>,
    pub(crate) update: Vec<EffectRing>,
}

impl PendingPassiveEffects {
    pub(crate) fn is_empty(&self) -> bool {
        self.unmount.is_empty() && self.update.is_empty()
    }
}

/// Commit `inner.finished_work`. Returns `true` if a passive flush needs to
/// be scheduled.
pub(crate) fn commit_root<H: HostConfig>(host: &H, inner: &mut RootInner<H>) -> bool {
    let Some(finished) = inner.finished_work.take() else {
        return false;
    };
    let lane = std::mem::replace(&mut inner.finished_lane, NO_LANE);

    inner.pending_lanes.mark_finished(lane);
    // Updates that arrived for this lane after their fiber was rendered.
    let interleaved = std::mem::take(&mut inner.interleaved_lanes);
    if !interleaved.is_empty() {
        cov_mark::hit!(interleaved_lane_kept_pending);
        inner.pending_lanes |= interleaved;
    }
    inner.callback_node = None;
    inner.callback_priority = NO_LANE;

    let root_flags = inner.fibers[finished].flags | inner.fibers[finished].subtree_flags;
    let mut schedule_passive = false;
    if root_flags.intersects(Flags::PASSIVE_MASK) && !inner.root_does_have_passive_effects {
        cov_mark::hit!(passive_flush_scheduled);
        inner.root_does_have_passive_effects = true;
        schedule_passive = true;
    }

    let mut stats = CommitStats {
        lane,
        ..CommitStats::default()
    };
    if root_flags.intersects(Flags::MUTATION_MASK | Flags::PASSIVE_MASK) {
        commit_mutation_effects(host, inner, finished, &mut stats);
    } else {
        cov_mark::hit!(commit_without_mutations);
    }

    inner.current = finished;

    if root_flags.intersects(Flags::LAYOUT_MASK) {
        commit_layout_effects(&mut inner.fibers, finished);
    }

    stats.fibers_released = collect_garbage(
        &mut inner.fibers,
        &mut inner.effects,
        inner.current,
        &inner.pending_passive,
    );
    tracing::debug!(
        ?lane,
        placements = stats.placements,
        updates = stats.updates,
        deletions = stats.deletions,
        passive = stats.passive_effects,
        "committed"
    );
    inner.last_commit = Some(stats);
    schedule_passive
}

/// Fibers under `root` whose subtree carries `mask`, children before parents.
fn flagged_post_order<I: Clone>(fibers: &FiberArena<I>, root: FiberId, mask: Flags) -> Vec<FiberId> {
    let mut out = Vec::new();
    let mut next = Some(root);
    'descend: while let Some(id) = next {
        let fiber = &fibers[id];
        if fiber.subtree_flags.intersects(mask) {
            if let Some(child) = fiber.child {
                next = Some(child);
                continue;
            }
        }
        let mut cursor = id;
        loop {
            out.push(cursor);
            if cursor == root {
                break 'descend;
            }
            if let Some(sibling) = fibers[cursor].sibling {
                next = Some(sibling);
                continue 'descend;
            }
            match fibers[cursor].parent {
                Some(parent) => cursor = parent,
                None => break 'descend,
            }
        }
    }
    out
}

fn commit_mutation_effects<H: HostConfig>(
    host: &H,
    inner: &mut RootInner<H>,
    finished: FiberId,
    stats: &mut CommitStats,
) {
    let mask = Flags::MUTATION_MASK | Flags::PASSIVE_MASK;
    for id in flagged_post_order(&inner.fibers, finished, mask) {
        let flags = inner.fibers[id].flags;
        if !flags.intersects(mask) {
            continue;
        }

        if flags.contains(Flags::PLACEMENT) {
            commit_placement(host, &inner.fibers, id);
            inner.fibers[id].flags.remove(Flags::PLACEMENT);
            stats.placements += 1;
        }
        if flags.contains(Flags::UPDATE) {
            commit_update(host, &inner.fibers, id);
            inner.fibers[id].flags.remove(Flags::UPDATE);
            stats.updates += 1;
        }
        if flags.contains(Flags::CHILD_DELETION) {
            let deletions = std::mem::take(&mut inner.fibers[id].deletions);
            for child in deletions {
                commit_deletion(host, inner, id, child);
                stats.deletions += 1;
            }
            inner.fibers[id].flags.remove(Flags::CHILD_DELETION);
        }
        if flags.contains(Flags::REF) {
            if let Some(current) = inner.fibers[id].alternate {
                if let Some(old_ref) = &inner.fibers[current].host_ref {
                    old_ref.detach();
                }
            }
        }
        if flags.contains(Flags::PASSIVE_EFFECT) {
            let ring = inner.fibers[id].effect_ring;
            inner.pending_passive.update.push(ring);
            inner.fibers[id].flags.remove(Flags::PASSIVE_EFFECT);
            stats.passive_effects += 1;
        }
    }
}

fn commit_layout_effects<I: Clone + 'static>(fibers: &mut FiberArena<I>, finished: FiberId) {
    for id in flagged_post_order(fibers, finished, Flags::LAYOUT_MASK) {
        let fiber = &mut fibers[id];
        if !fiber.flags.contains(Flags::REF) {
            continue;
        }
        fiber.flags.remove(Flags::REF);
        if let (Some(host_ref), Some(instance)) = (&fiber.host_ref, &fiber.state_node) {
            host_ref.attach(instance.clone());
        }
    }
}

/// Instance of the nearest host ancestor, starting at `start`.
fn host_parent<I: Clone>(fibers: &FiberArena<I>, start: Option<FiberId>) -> Option<I> {
    let mut next = start;
    while let Some(id) = next {
        let fiber = &fibers[id];
        match fiber.tag {
            WorkTag::HostComponent | WorkTag::HostRoot => return fiber.state_node.clone(),
            _ => next = fiber.parent,
        }
    }
    None
}

/// The first host instance after `id` in host order that is already in place.
fn host_sibling<I: Clone>(fibers: &FiberArena<I>, id: FiberId) -> Option<I> {
    let mut node = id;
    'siblings: loop {
        while fibers[node].sibling.is_none() {
            match fibers[node].parent {
                Some(parent)
                    if !matches!(fibers[parent].tag, WorkTag::HostComponent | WorkTag::HostRoot) =>
                {
                    node = parent;
                }
                _ => return None,
            }
        }
        node = fibers[node].sibling?;

        while !fibers[node].is_host() {
            // A node that is itself being placed is not a stable anchor.
            if fibers[node].flags.contains(Flags::PLACEMENT) {
                continue 'siblings;
            }
            match fibers[node].child {
                Some(child) => node = child,
                None => continue 'siblings,
            }
        }
        if !fibers[node].flags.contains(Flags::PLACEMENT) {
            return fibers[node].state_node.clone();
        }
    }
}

fn commit_placement<H: HostConfig>(host: &H, fibers: &FiberArena<H::Instance>, id: FiberId) {
    let Some(parent) = host_parent(fibers, fibers[id].parent) else {
        tracing::warn!(fiber = ?id, "placement without a host parent");
        return;
    };
    let before = host_sibling(fibers, id);
    insert_or_append(host, fibers, id, before.as_ref(), &parent);
}

fn insert_or_append<H: HostConfig>(
    host: &H,
    fibers: &FiberArena<H::Instance>,
    id: FiberId,
    before: Option<&H::Instance>,
    parent: &H::Instance,
) {
    let fiber = &fibers[id];
    if fiber.is_host() {
        if let Some(instance) = &fiber.state_node {
            match before {
                Some(before) => host.insert_child_to_container(parent, instance, before),
                None => host.append_child_to_container(parent, instance),
            }
        }
        return;
    }
    let mut child = fiber.child;
    while let Some(id) = child {
        insert_or_append(host, fibers, id, before, parent);
        child = fibers[id].sibling;
    }
}

fn commit_update<H: HostConfig>(host: &H, fibers: &FiberArena<H::Instance>, id: FiberId) {
    let fiber = &fibers[id];
    let Some(instance) = &fiber.state_node else {
        return;
    };
    match (&fiber.tag, &fiber.memoized_props) {
        (WorkTag::HostComponent, Some(FiberProps::Element(props))) => {
            host.commit_update(instance, props)
        }
        (WorkTag::HostText, Some(FiberProps::Text(content))) => {
            host.commit_text_update(instance, content)
        }
        _ => {}
    }
}

/// Tear down the committed subtree at `child`, a former child of `parent`.
fn commit_deletion<H: HostConfig>(
    host: &H,
    inner: &mut RootInner<H>,
    parent: FiberId,
    child: FiberId,
) {
    let mut top_level_hosts = Vec::new();
    let mut stack = vec![(child, false)];
    while let Some((id, inside_host)) = stack.pop() {
        let fiber = &inner.fibers[id];
        match fiber.tag {
            WorkTag::FunctionComponent if fiber.effect_ring.last.is_some() => {
                inner.pending_passive.unmount.push(fiber.effect_ring);
            }
            WorkTag::HostComponent => {
                if let Some(host_ref) = &fiber.host_ref {
                    host_ref.detach();
                }
            }
            _ => {}
        }
        if fiber.is_host() && !inside_host {
            if let Some(instance) = &fiber.state_node {
                top_level_hosts.push(instance.clone());
            }
        }
        let inside_host = inside_host || fiber.is_host();
        for grandchild in inner.fibers.children(id).into_iter().rev() {
            stack.push((grandchild, inside_host));
        }
    }

    match host_parent(&inner.fibers, Some(parent)) {
        Some(host_parent) => {
            for instance in &top_level_hosts {
                host.remove_child(&host_parent, instance);
            }
        }
        None => tracing::warn!(fiber = ?child, "deletion without a host parent"),
    }
    inner.fibers[child].parent = None;
}

/// Release fibers and effect records that the committed tree can no longer
/// reach. Returns the number of fiber slots released.
///
/// A live fiber keeps its alternate. Both keep every record of their effect
/// rings, and queued passive rings are kept until they have been flushed.
pub(crate) fn collect_garbage<I: Clone>(
    fibers: &mut FiberArena<I>,
    effects: &mut EffectArena,
    current: FiberId,
    pending: &PendingPassiveEffects,
) -> usize {
    let mut live_fibers = FastHashSet::default();
    let mut stack = vec![current];
    while let Some(id) = stack.pop() {
        if !live_fibers.insert(id) {
            continue;
        }
        let fiber = &fibers[id];
        if let Some(alternate) = fiber.alternate {
            live_fibers.insert(alternate);
        }
        stack.extend(fiber.child);
        stack.extend(fiber.sibling);
    }

    let mut live_effects = FastHashSet::default();
    for &id in &live_fibers {
        if let Some(fiber) = fibers.get(id) {
            live_effects.extend(effects.ring(fiber.effect_ring));
        }
    }
    for &ring in pending.unmount.iter().chain(&pending.update) {
        live_effects.extend(effects.ring(ring));
    }

    let before = fibers.len();
    fibers.retain(|id| live_fibers.contains(&id));
    let released = before - fibers.len();
    let effects_before = effects.len();
    effects.retain(|id| live_effects.contains(&id));
    tracing::trace!(
        fibers = released,
        effects = effects_before - effects.len(),
        "released unreachable arena slots"
    );
    released
}

/// Destroy and create callbacks taken out of the effect arena, ready to run
/// without any engine state borrowed.
#[derive(Default)]
pub(crate) struct PassiveWork {
    unmount: Vec<EffectDestroy>,
    destroy: Vec<EffectDestroy>,
    create: Vec<(EffectCreate, DestroySlot)>,
}

impl PassiveWork {
    pub(crate) fn collect(effects: &mut EffectArena, pending: PendingPassiveEffects) -> Self {
        let mut work = Self::default();
        for ring in pending.unmount {
            for id in effects.ring(ring) {
                let Some(record) = effects.get_mut(id) else {
                    continue;
                };
                if !record.tags.contains(HookEffectTags::PASSIVE) {
                    continue;
                }
                if let Some(destroy) = record.destroy.borrow_mut().take() {
                    work.unmount.push(destroy);
                }
            }
        }
        for ring in pending.update {
            for id in effects.ring(ring) {
                let Some(record) = effects.get_mut(id) else {
                    continue;
                };
                if !record
                    .tags
                    .contains(HookEffectTags::PASSIVE | HookEffectTags::HAS_EFFECT)
                {
                    continue;
                }
                record.tags.remove(HookEffectTags::HAS_EFFECT);
                if let Some(destroy) = record.destroy.borrow_mut().take() {
                    work.destroy.push(destroy);
                }
                if let Some(create) = record.create.take() {
                    work.create.push((create, record.destroy.clone()));
                }
            }
        }
        work
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.unmount.is_empty() && self.destroy.is_empty() && self.create.is_empty()
    }

    /// Run unmount destroys, then update destroys, then creates.
    pub(crate) fn run(self) {
        tracing::trace!(
            unmount = self.unmount.len(),
            destroy = self.destroy.len(),
            create = self.create.len(),
            "flushing passive effects"
        );
        for destroy in self.unmount {
            destroy();
        }
        for destroy in self.destroy {
            destroy();
        }
        for (create, slot) in self.create {
            let destroy = create();
            *slot.borrow_mut() = destroy;
        }
    }
}
