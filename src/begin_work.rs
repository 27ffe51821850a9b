//! The top-down half of the render walk.

use std::rc::Weak;

use crate::arena::{EffectArena, FiberArena, FiberId, FiberProps, FiberState, WorkTag};
use crate::child_reconciler::{MOUNT_CHILD_FIBERS, RECONCILE_CHILD_FIBERS};
use crate::element::Node;
use crate::error::{RenderError, Result};
use crate::flags::Flags;
use crate::hooks::{UpdateSink, render_with_hooks};
use crate::lane::{Lane, NO_LANE};

/// Compute the children of `wip` and return its first child, if any.
pub(crate) fn begin_work<I: Clone>(
    fibers: &mut FiberArena<I>,
    effects: &mut EffectArena,
    sink: &Weak<dyn UpdateSink>,
    wip: FiberId,
    render_lane: Lane,
) -> Result<Option<FiberId>> {
    fibers[wip].lanes = NO_LANE;

    let next_children = match fibers[wip].tag {
        WorkTag::HostRoot => update_host_root(fibers, wip, render_lane)?,
        WorkTag::FunctionComponent => render_with_hooks(fibers, effects, wip, render_lane, sink)?,
        WorkTag::HostComponent => update_host_component(fibers, wip)?,
        WorkTag::Fragment => match &fibers[wip].pending_props {
            FiberProps::Children(children) => Node::List(children.clone()),
            _ => {
                return Err(RenderError::UnexpectedFiber {
                    tag: WorkTag::Fragment,
                    detail: "fragment without a child list",
                });
            }
        },
        WorkTag::HostText => return Ok(None),
    };

    reconcile_children(fibers, wip, &next_children, render_lane);
    Ok(fibers[wip].child)
}

fn update_host_root<I: Clone>(
    fibers: &mut FiberArena<I>,
    wip: FiberId,
    render_lane: Lane,
) -> Result<Node> {
    let FiberState::Root(mut state) = std::mem::take(&mut fibers[wip].memoized_state) else {
        return Err(RenderError::UnexpectedFiber {
            tag: WorkTag::HostRoot,
            detail: "host root without element state",
        });
    };

    let current = fibers[wip].alternate;
    let current_state = match current {
        Some(current) => match &mut fibers[current].memoized_state {
            FiberState::Root(current_state) => Some(current_state),
            _ => None,
        },
        None => None,
    };
    state.reduce(current_state, render_lane);

    let children = state
        .memoized_state
        .downcast_ref::<Node>()
        .cloned()
        .unwrap_or_default();
    fibers[wip].memoized_state = FiberState::Root(state);
    Ok(children)
}

fn update_host_component<I: Clone>(fibers: &mut FiberArena<I>, wip: FiberId) -> Result<Node> {
    let fiber = &fibers[wip];
    let FiberProps::Element(props) = &fiber.pending_props else {
        return Err(RenderError::UnexpectedFiber {
            tag: WorkTag::HostComponent,
            detail: "host component without element props",
        });
    };
    let children = props.children_node();

    let ref_changed = match fiber.alternate {
        None => fiber.host_ref.is_some(),
        Some(current) => fibers[current].host_ref != fiber.host_ref,
    };
    if ref_changed {
        fibers[wip].flags |= Flags::REF;
    }
    Ok(children)
}

fn reconcile_children<I: Clone>(
    fibers: &mut FiberArena<I>,
    wip: FiberId,
    next_children: &Node,
    render_lane: Lane,
) {
    let child = match fibers[wip].alternate {
        Some(current) => {
            let current_child = fibers[current].child;
            RECONCILE_CHILD_FIBERS.reconcile_child_fibers(
                fibers,
                wip,
                current_child,
                next_children,
                render_lane,
            )
        }
        None => {
            MOUNT_CHILD_FIBERS.reconcile_child_fibers(fibers, wip, None, next_children, render_lane)
        }
    };
    fibers[wip].child = child;
}
