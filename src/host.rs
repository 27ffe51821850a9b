//! The host contract.
//!
//! The engine never touches a platform tree directly. Every instance is
//! created and mutated through a [`HostConfig`], and all mutations happen
//! during the commit phase, in tree order.

use crate::element::Props;

/// Capability interface implemented by a rendering target.
pub trait HostConfig: 'static {
    /// Handle to a host node owned by the host.
    type Instance: Clone + 'static;

    /// Create an element instance with its initial attributes.
    fn create_instance(&self, tag: &str, props: &Props) -> Self::Instance;

    /// Create a text instance.
    fn create_text_instance(&self, content: &str) -> Self::Instance;

    /// Append `child` to `parent` while building a detached subtree.
    fn append_initial_child(&self, parent: &Self::Instance, child: &Self::Instance);

    /// Append `child` to the end of `parent`, or move it there if present.
    fn append_child_to_container(&self, parent: &Self::Instance, child: &Self::Instance);

    /// Insert `child` into `parent` just before `before`.
    fn insert_child_to_container(
        &self,
        parent: &Self::Instance,
        child: &Self::Instance,
        before: &Self::Instance,
    );

    /// Remove `child` from `parent`.
    fn remove_child(&self, parent: &Self::Instance, child: &Self::Instance);

    /// Apply new attributes to an element instance.
    fn commit_update(&self, instance: &Self::Instance, props: &Props);

    /// Replace the content of a text instance.
    fn commit_text_update(&self, instance: &Self::Instance, content: &str);

    /// Run `task` after the current synchronous work finishes.
    fn schedule_microtask(&self, task: Box<dyn FnOnce()>);
}
