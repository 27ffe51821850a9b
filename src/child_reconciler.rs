//! Child reconciliation.
//!
//! Diffs the previous child fibers of a node against its new child
//! descriptors, reusing fibers whose key and type match and recording
//! insertions, moves and deletions as flags.
//!
//! The same algorithm runs in two modes. Updates on the live tree track side
//! effects. First mounts of a detached subtree do not: the subtree's root is
//! placed once and everything under it is built off-tree.

use crate::arena::{FiberArena, FiberId, FiberProps, WorkTag};
use crate::element::{Element, Fragment, Key, Node};
use crate::flags::Flags;
use crate::hash::{FastHashBuilder, FastIndexMap};
use crate::lane::Lanes;

/// Lookup key of an old child: its explicit key, or its position if unkeyed.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum MapKey {
    Key(Key),
    Index(usize),
}

impl MapKey {
    fn new(key: Option<&Key>, index: usize) -> Self {
        match key {
            Some(key) => Self::Key(key.clone()),
            None => Self::Index(index),
        }
    }
}

type ExistingChildren = FastIndexMap<MapKey, FiberId>;

pub(crate) struct ChildReconciler {
    track_side_effects: bool,
}

/// Reconciler for updates of a committed subtree.
pub(crate) const RECONCILE_CHILD_FIBERS: ChildReconciler = ChildReconciler {
    track_side_effects: true,
};

/// Reconciler for subtrees being mounted for the first time.
pub(crate) const MOUNT_CHILD_FIBERS: ChildReconciler = ChildReconciler {
    track_side_effects: false,
};

impl ChildReconciler {
    /// Reconcile `new_child` against the children starting at
    /// `current_first_child` and return the first new child fiber.
    pub(crate) fn reconcile_child_fibers<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_child: &Node,
        lanes: Lanes,
    ) -> Option<FiberId> {
        match new_child {
            Node::Fragment(Fragment {
                key: None,
                children,
            }) => {
                cov_mark::hit!(unkeyed_top_level_fragment_unwrapped);
                self.reconcile_children_array(
                    fibers,
                    return_fiber,
                    current_first_child,
                    children,
                    lanes,
                )
            }
            Node::Fragment(fragment) => {
                let fiber = self.reconcile_single_fragment(
                    fibers,
                    return_fiber,
                    current_first_child,
                    fragment,
                    lanes,
                );
                Some(self.place_single_child(fibers, fiber))
            }
            Node::Element(element) => {
                let fiber = self.reconcile_single_element(
                    fibers,
                    return_fiber,
                    current_first_child,
                    element,
                    lanes,
                );
                Some(self.place_single_child(fibers, fiber))
            }
            Node::Text(content) => {
                let fiber = self.reconcile_single_text_node(
                    fibers,
                    return_fiber,
                    current_first_child,
                    content,
                    lanes,
                );
                Some(self.place_single_child(fibers, fiber))
            }
            Node::List(children) => self.reconcile_children_array(
                fibers,
                return_fiber,
                current_first_child,
                children,
                lanes,
            ),
            Node::Empty => {
                self.delete_remaining_children(fibers, return_fiber, current_first_child);
                None
            }
        }
    }

    fn delete_child<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        return_fiber: FiberId,
        child: FiberId,
    ) {
        if !self.track_side_effects {
            return;
        }
        let parent = &mut fibers[return_fiber];
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining_children<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        return_fiber: FiberId,
        first: Option<FiberId>,
    ) {
        if !self.track_side_effects {
            return;
        }
        let mut next = first;
        while let Some(child) = next {
            next = fibers[child].sibling;
            self.delete_child(fibers, return_fiber, child);
        }
    }

    /// Recycle `fiber` as a fresh single child with new props.
    fn use_fiber<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        fiber: FiberId,
        pending_props: FiberProps,
    ) -> FiberId {
        let clone = fibers.create_work_in_progress(fiber, pending_props);
        let wip = &mut fibers[clone];
        wip.index = 0;
        wip.sibling = None;
        clone
    }

    fn place_single_child<I: Clone>(&self, fibers: &mut FiberArena<I>, fiber: FiberId) -> FiberId {
        if self.track_side_effects && fibers[fiber].alternate.is_none() {
            fibers[fiber].flags |= Flags::PLACEMENT;
        }
        fiber
    }

    fn reconcile_single_element<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        element: &Element,
        lanes: Lanes,
    ) -> FiberId {
        let mut current = current_first_child;
        while let Some(child) = current {
            let sibling = fibers[child].sibling;
            if fibers[child].key == element.key {
                if fibers[child].element_type.matches(&element.element_type) {
                    let existing =
                        self.use_fiber(fibers, child, FiberProps::Element(element.props.clone()));
                    let fiber = &mut fibers[existing];
                    fiber.parent = Some(return_fiber);
                    fiber.host_ref = element.host_ref.clone();
                    self.delete_remaining_children(fibers, return_fiber, sibling);
                    return existing;
                }
                cov_mark::hit!(single_element_type_changed);
                self.delete_remaining_children(fibers, return_fiber, Some(child));
                break;
            }
            self.delete_child(fibers, return_fiber, child);
            current = sibling;
        }

        let fiber = fibers.create_from_element(element, lanes);
        fibers[fiber].parent = Some(return_fiber);
        fiber
    }

    fn reconcile_single_fragment<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        fragment: &Fragment,
        lanes: Lanes,
    ) -> FiberId {
        let mut current = current_first_child;
        while let Some(child) = current {
            let sibling = fibers[child].sibling;
            if fibers[child].key == fragment.key {
                if fibers[child].tag == WorkTag::Fragment {
                    let existing = self.use_fiber(
                        fibers,
                        child,
                        FiberProps::Children(fragment.children.clone()),
                    );
                    fibers[existing].parent = Some(return_fiber);
                    self.delete_remaining_children(fibers, return_fiber, sibling);
                    return existing;
                }
                self.delete_remaining_children(fibers, return_fiber, Some(child));
                break;
            }
            self.delete_child(fibers, return_fiber, child);
            current = sibling;
        }

        let fiber =
            fibers.create_from_fragment(fragment.children.clone(), fragment.key.clone(), lanes);
        fibers[fiber].parent = Some(return_fiber);
        fiber
    }

    fn reconcile_single_text_node<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        content: &std::rc::Rc<str>,
        lanes: Lanes,
    ) -> FiberId {
        if let Some(child) = current_first_child {
            if fibers[child].tag == WorkTag::HostText {
                let sibling = fibers[child].sibling;
                let existing = self.use_fiber(fibers, child, FiberProps::Text(content.clone()));
                fibers[existing].parent = Some(return_fiber);
                self.delete_remaining_children(fibers, return_fiber, sibling);
                return existing;
            }
        }
        self.delete_remaining_children(fibers, return_fiber, current_first_child);
        let fiber = fibers.create_from_text(content.clone(), lanes);
        fibers[fiber].parent = Some(return_fiber);
        fiber
    }

    fn reconcile_children_array<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_children: &[Node],
        lanes: Lanes,
    ) -> Option<FiberId> {
        // Index of the rightmost reused old fiber seen so far.
        let mut last_placed_index = 0;
        let mut first_new: Option<FiberId> = None;
        let mut last_new: Option<FiberId> = None;

        let mut existing = ExistingChildren::with_hasher(FastHashBuilder);
        let mut current = current_first_child;
        while let Some(child) = current {
            let fiber = &fibers[child];
            existing.insert(MapKey::new(fiber.key.as_ref(), fiber.index), child);
            current = fiber.sibling;
        }

        for (index, child) in new_children.iter().enumerate() {
            let Some(new_fiber) =
                self.update_from_map(fibers, &mut existing, index, child, lanes)
            else {
                continue;
            };

            let fiber = &mut fibers[new_fiber];
            fiber.index = index;
            fiber.parent = Some(return_fiber);
            let alternate = fiber.alternate;

            match last_new {
                None => first_new = Some(new_fiber),
                Some(prev) => fibers[prev].sibling = Some(new_fiber),
            }
            last_new = Some(new_fiber);

            if !self.track_side_effects {
                continue;
            }
            match alternate {
                Some(current) => {
                    let old_index = fibers[current].index;
                    if old_index < last_placed_index {
                        cov_mark::hit!(keyed_child_moved);
                        fibers[new_fiber].flags |= Flags::PLACEMENT;
                    } else {
                        last_placed_index = old_index;
                    }
                }
                None => fibers[new_fiber].flags |= Flags::PLACEMENT,
            }
        }

        let mut leftover: Vec<FiberId> = existing.into_values().collect();
        leftover.sort_by_key(|&child| fibers[child].index);
        for child in leftover {
            self.delete_child(fibers, return_fiber, child);
        }

        first_new
    }

    fn update_from_map<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        existing: &mut ExistingChildren,
        index: usize,
        child: &Node,
        lanes: Lanes,
    ) -> Option<FiberId> {
        match child {
            Node::Text(content) => {
                let key = MapKey::Index(index);
                if let Some(&before) = existing.get(&key) {
                    if fibers[before].tag == WorkTag::HostText {
                        existing.swap_remove(&key);
                        return Some(self.use_fiber(
                            fibers,
                            before,
                            FiberProps::Text(content.clone()),
                        ));
                    }
                }
                Some(fibers.create_from_text(content.clone(), lanes))
            }
            Node::Element(element) => {
                let key = MapKey::new(element.key.as_ref(), index);
                if let Some(&before) = existing.get(&key) {
                    if fibers[before].element_type.matches(&element.element_type) {
                        existing.swap_remove(&key);
                        let reused = self.use_fiber(
                            fibers,
                            before,
                            FiberProps::Element(element.props.clone()),
                        );
                        fibers[reused].host_ref = element.host_ref.clone();
                        return Some(reused);
                    }
                }
                Some(fibers.create_from_element(element, lanes))
            }
            Node::Fragment(fragment) => Some(self.update_fragment(
                fibers,
                existing,
                MapKey::new(fragment.key.as_ref(), index),
                fragment.children.clone(),
                fragment.key.clone(),
                lanes,
            )),
            // A nested array behaves like an unkeyed fragment at its position.
            Node::List(children) => Some(self.update_fragment(
                fibers,
                existing,
                MapKey::Index(index),
                children.clone(),
                None,
                lanes,
            )),
            Node::Empty => None,
        }
    }

    fn update_fragment<I: Clone>(
        &self,
        fibers: &mut FiberArena<I>,
        existing: &mut ExistingChildren,
        map_key: MapKey,
        children: Vec<Node>,
        key: Option<Key>,
        lanes: Lanes,
    ) -> FiberId {
        if let Some(&before) = existing.get(&map_key) {
            if fibers[before].tag == WorkTag::Fragment {
                existing.swap_remove(&map_key);
                return self.use_fiber(fibers, before, FiberProps::Children(children));
            }
        }
        fibers.create_from_fragment(children, key, lanes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Fiber, FiberProps};
    use crate::element::h;

    fn keyed_list(keys: &[&str]) -> Node {
        Node::list(keys.iter().map(|k| h("li").key(*k).child(*k).build()))
    }

    /// Mount `node` under a fresh parent and pretend it was committed.
    fn committed_parent(fibers: &mut FiberArena<u32>, node: &Node) -> (FiberId, FiberId) {
        let parent = fibers.insert(Fiber::new(WorkTag::HostComponent, FiberProps::Root, None));
        let first =
            MOUNT_CHILD_FIBERS.reconcile_child_fibers(fibers, parent, None, node, Lanes::DEFAULT);
        fibers[parent].child = first;
        let wip = fibers.create_work_in_progress(parent, FiberProps::Root);
        (parent, wip)
    }

    fn keys_and_flags(fibers: &FiberArena<u32>, first: Option<FiberId>) -> Vec<(String, bool, bool)> {
        let mut out = Vec::new();
        let mut next = first;
        while let Some(id) = next {
            let fiber = &fibers[id];
            out.push((
                fiber.key.as_ref().map(|k| k.as_str().to_owned()).unwrap_or_default(),
                fiber.flags.contains(Flags::PLACEMENT),
                fiber.alternate.is_some(),
            ));
            next = fiber.sibling;
        }
        out
    }

    #[test]
    fn mount_does_not_track_effects() {
        let mut fibers: FiberArena<u32> = FiberArena::default();
        let (parent, _) = committed_parent(&mut fibers, &keyed_list(&["a", "b"]));
        let first = fibers[parent].child;
        assert_eq!(
            keys_and_flags(&fibers, first),
            vec![
                ("a".to_owned(), false, false),
                ("b".to_owned(), false, false)
            ]
        );
        assert!(fibers[parent].deletions.is_empty());
    }

    #[test]
    fn reversing_keys_reuses_all_and_moves_two() {
        cov_mark::check_count!(keyed_child_moved, 2);
        let mut fibers: FiberArena<u32> = FiberArena::default();
        let (parent, wip) = committed_parent(&mut fibers, &keyed_list(&["1", "2", "3"]));
        let old_first = fibers[parent].child;

        let first = RECONCILE_CHILD_FIBERS.reconcile_child_fibers(
            &mut fibers,
            wip,
            old_first,
            &keyed_list(&["3", "2", "1"]),
            Lanes::DEFAULT,
        );

        // "3" advances the watermark; "2" and "1" sit before it in the old list.
        assert_eq!(
            keys_and_flags(&fibers, first),
            vec![
                ("3".to_owned(), false, true),
                ("2".to_owned(), true, true),
                ("1".to_owned(), true, true)
            ]
        );
        assert!(fibers[wip].deletions.is_empty());
    }

    #[test]
    fn moving_first_key_to_end_flags_only_it() {
        let mut fibers: FiberArena<u32> = FiberArena::default();
        let (parent, wip) = committed_parent(&mut fibers, &keyed_list(&["1", "2", "3"]));
        let old_first = fibers[parent].child;

        let first = RECONCILE_CHILD_FIBERS.reconcile_child_fibers(
            &mut fibers,
            wip,
            old_first,
            &keyed_list(&["2", "3", "1"]),
            Lanes::DEFAULT,
        );
        assert_eq!(
            keys_and_flags(&fibers, first),
            vec![
                ("2".to_owned(), false, true),
                ("3".to_owned(), false, true),
                ("1".to_owned(), true, true)
            ]
        );
    }

    #[test]
    fn unmatched_old_children_are_deleted_in_order() {
        let mut fibers: FiberArena<u32> = FiberArena::default();
        let (parent, wip) = committed_parent(&mut fibers, &keyed_list(&["a", "b", "c", "d"]));
        let old = fibers.children(parent);

        let first = RECONCILE_CHILD_FIBERS.reconcile_child_fibers(
            &mut fibers,
            wip,
            Some(old[0]),
            &keyed_list(&["c", "e"]),
            Lanes::DEFAULT,
        );
        assert_eq!(
            keys_and_flags(&fibers, first),
            vec![("c".to_owned(), false, true), ("e".to_owned(), true, false)]
        );
        assert_eq!(fibers[wip].deletions, vec![old[0], old[1], old[3]]);
        assert!(fibers[wip].flags.contains(Flags::CHILD_DELETION));
    }

    #[test]
    fn single_element_type_change_deletes_rest() {
        cov_mark::check!(single_element_type_changed);
        let mut fibers: FiberArena<u32> = FiberArena::default();
        let (parent, wip) = committed_parent(&mut fibers, &keyed_list(&["x", "y"]));
        let old = fibers.children(parent);

        let replacement = h("section").key("x").build();
        let first = RECONCILE_CHILD_FIBERS
            .reconcile_child_fibers(&mut fibers, wip, Some(old[0]), &replacement, Lanes::DEFAULT)
            .expect("new child");
        assert!(fibers[first].alternate.is_none());
        assert!(fibers[first].flags.contains(Flags::PLACEMENT));
        assert_eq!(fibers[wip].deletions, old);
    }

    #[test]
    fn single_text_reuses_text_fiber() {
        let mut fibers: FiberArena<u32> = FiberArena::default();
        let (parent, wip) = committed_parent(&mut fibers, &Node::text("a"));
        let old = fibers[parent].child;

        let first = RECONCILE_CHILD_FIBERS
            .reconcile_child_fibers(&mut fibers, wip, old, &Node::text("b"), Lanes::DEFAULT)
            .expect("text child");
        assert_eq!(fibers[first].alternate, old);
        assert!(!fibers[first].flags.contains(Flags::PLACEMENT));
        assert!(fibers[wip].deletions.is_empty());
    }

    #[test]
    fn unkeyed_fragment_is_treated_as_list() {
        cov_mark::check!(unkeyed_top_level_fragment_unwrapped);
        let mut fibers: FiberArena<u32> = FiberArena::default();
        let parent = fibers.insert(Fiber::new(WorkTag::HostComponent, FiberProps::Root, None));
        let node = Node::fragment([Node::text("a"), Node::text("b")]);
        let first = MOUNT_CHILD_FIBERS
            .reconcile_child_fibers(&mut fibers, parent, None, &node, Lanes::DEFAULT)
            .expect("children");
        assert_eq!(fibers[first].tag, WorkTag::HostText);
        assert!(fibers[first].sibling.is_some());
    }

    #[test]
    fn empty_child_deletes_everything() {
        let mut fibers: FiberArena<u32> = FiberArena::default();
        let (parent, wip) = committed_parent(&mut fibers, &keyed_list(&["a", "b"]));
        let old = fibers.children(parent);
        let first = RECONCILE_CHILD_FIBERS.reconcile_child_fibers(
            &mut fibers,
            wip,
            Some(old[0]),
            &Node::Empty,
            Lanes::DEFAULT,
        );
        assert!(first.is_none());
        assert_eq!(fibers[wip].deletions, old);
    }
}
