//! The bottom-up half of the render walk.
//!
//! Host fibers get their instances here. A fiber mounting for the first time
//! builds its instance off-tree and adopts every host instance below it, so
//! a new subtree reaches the host tree with a single placement at its top.

use crate::arena::{FiberArena, FiberId, FiberProps, FiberType, WorkTag};
use crate::error::{RenderError, Result};
use crate::flags::Flags;
use crate::host::HostConfig;

pub(crate) fn complete_work<H: HostConfig>(
    host: &H,
    fibers: &mut FiberArena<H::Instance>,
    wip: FiberId,
) -> Result<()> {
    match fibers[wip].tag {
        WorkTag::HostComponent => complete_host_component(host, fibers, wip)?,
        WorkTag::HostText => complete_host_text(host, fibers, wip)?,
        WorkTag::HostRoot | WorkTag::FunctionComponent | WorkTag::Fragment => {}
    }
    bubble_properties(fibers, wip);
    Ok(())
}

fn complete_host_component<H: HostConfig>(
    host: &H,
    fibers: &mut FiberArena<H::Instance>,
    wip: FiberId,
) -> Result<()> {
    let fiber = &fibers[wip];
    let (FiberType::Host(tag), FiberProps::Element(props)) =
        (&fiber.element_type, &fiber.pending_props)
    else {
        return Err(RenderError::UnexpectedFiber {
            tag: WorkTag::HostComponent,
            detail: "host component without a tag or element props",
        });
    };

    match (fiber.alternate, fiber.state_node.is_some()) {
        (Some(current), true) => {
            let changed = match &fibers[current].memoized_props {
                Some(FiberProps::Element(old)) => !old.attrs_eq(props),
                _ => true,
            };
            if changed {
                fibers[wip].flags |= Flags::UPDATE;
            }
        }
        _ => {
            let instance = host.create_instance(tag, props);
            append_all_children(host, fibers, &instance, wip);
            fibers[wip].state_node = Some(instance);
        }
    }
    Ok(())
}

fn complete_host_text<H: HostConfig>(
    host: &H,
    fibers: &mut FiberArena<H::Instance>,
    wip: FiberId,
) -> Result<()> {
    let fiber = &fibers[wip];
    let FiberProps::Text(content) = &fiber.pending_props else {
        return Err(RenderError::UnexpectedFiber {
            tag: WorkTag::HostText,
            detail: "text fiber without text content",
        });
    };

    match (fiber.alternate, fiber.state_node.is_some()) {
        (Some(current), true) => {
            let changed = match &fibers[current].memoized_props {
                Some(FiberProps::Text(old)) => old != content,
                _ => true,
            };
            if changed {
                fibers[wip].flags |= Flags::UPDATE;
            }
        }
        _ => {
            let instance = host.create_text_instance(content);
            fibers[wip].state_node = Some(instance);
        }
    }
    Ok(())
}

/// Append the nearest host instances below `wip` to `parent`.
fn append_all_children<H: HostConfig>(
    host: &H,
    fibers: &FiberArena<H::Instance>,
    parent: &H::Instance,
    wip: FiberId,
) {
    let mut next = fibers[wip].child;
    while let Some(node) = next {
        let fiber = &fibers[node];
        if fiber.is_host() {
            if let Some(instance) = &fiber.state_node {
                host.append_initial_child(parent, instance);
            }
        } else if let Some(child) = fiber.child {
            next = Some(child);
            continue;
        }

        // Climb until a sibling is found or we are back at `wip`.
        let mut cursor = node;
        next = loop {
            if let Some(sibling) = fibers[cursor].sibling {
                break Some(sibling);
            }
            match fibers[cursor].parent {
                Some(parent) if parent != wip => cursor = parent,
                _ => break None,
            }
        };
    }
}

/// Fold the children's flags into `subtree_flags`.
fn bubble_properties<I: Clone>(fibers: &mut FiberArena<I>, wip: FiberId) {
    let mut subtree_flags = Flags::empty();
    let mut next = fibers[wip].child;
    while let Some(child) = next {
        let fiber = &mut fibers[child];
        subtree_flags |= fiber.subtree_flags | fiber.flags;
        fiber.parent = Some(wip);
        next = fiber.sibling;
    }
    fibers[wip].subtree_flags |= subtree_flags;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Fiber;
    use crate::child_reconciler::MOUNT_CHILD_FIBERS;
    use crate::element::{Node, h};
    use crate::lane::Lanes;
    use crate::memory_host::MemoryHost;

    #[test]
    fn mount_builds_subtree_off_tree() {
        let host = MemoryHost::new();
        let mut fibers = FiberArena::default();
        let parent = fibers.insert(Fiber::new(WorkTag::Fragment, FiberProps::Root, None));
        let node = h("ul")
            .child(h("li").child("a"))
            .child(Node::fragment([h("li").child("b").build()]))
            .build();
        let ul = MOUNT_CHILD_FIBERS
            .reconcile_child_fibers(&mut fibers, parent, None, &node, Lanes::DEFAULT)
            .expect("ul");

        // Walk the subtree by hand, completing leaves first.
        fn complete_subtree(host: &MemoryHost, fibers: &mut FiberArena<crate::MemoryNodeId>, id: FiberId) {
            let props = match &fibers[id].pending_props {
                FiberProps::Element(props) => Some(props.children_node()),
                FiberProps::Children(children) => Some(Node::List(children.clone())),
                _ => None,
            };
            if let Some(children) = props {
                let first = MOUNT_CHILD_FIBERS.reconcile_child_fibers(
                    fibers,
                    id,
                    None,
                    &children,
                    Lanes::DEFAULT,
                );
                fibers[id].child = first;
                for child in fibers.children(id) {
                    complete_subtree(host, fibers, child);
                }
            }
            complete_work(host, fibers, id).expect("completes");
        }
        complete_subtree(&host, &mut fibers, ul);

        let instance = fibers[ul].state_node.expect("ul instance");
        assert_eq!(host.to_markup(instance), "<ul><li>a</li><li>b</li></ul>");
        assert!(fibers[ul].subtree_flags.is_empty());
    }

    #[test]
    fn subtree_flags_bubble_from_children() {
        let host = MemoryHost::new();
        let mut fibers: FiberArena<crate::MemoryNodeId> = FiberArena::default();
        let parent = fibers.insert(Fiber::new(WorkTag::Fragment, FiberProps::Root, None));
        let child = fibers.insert(Fiber::new(WorkTag::Fragment, FiberProps::Root, None));
        fibers[parent].child = Some(child);
        fibers[child].flags = Flags::PLACEMENT;
        fibers[child].subtree_flags = Flags::PASSIVE_EFFECT;

        complete_work(&host, &mut fibers, parent).expect("completes");
        assert_eq!(
            fibers[parent].subtree_flags,
            Flags::PLACEMENT | Flags::PASSIVE_EFFECT
        );
        assert_eq!(fibers[child].parent, Some(parent));
    }
}
