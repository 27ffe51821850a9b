//! Public entry points: creating a root and rendering into it.

use std::fmt;
use std::rc::Rc;

use crate::commit::CommitStats;
use crate::element::Node;
use crate::error::RenderError;
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::scheduler::Scheduler;
use crate::work_loop::RootShared;

/// Default [`RootOptions::label`].
pub const DEFAULT_LABEL: &str = "root";

/// Default [`RootOptions::time_slicing`].
pub const DEFAULT_TIME_SLICING: bool = true;

/// Per-root configuration.
///
/// # Example
/// ```ignore
/// let options = RootOptions::new().label("sidebar").time_slicing(false);
/// let root = create_root_with_options(host, scheduler, container, options);
/// ```
#[derive(Clone, Debug)]
pub struct RootOptions {
    pub(crate) label: Rc<str>,
    pub(crate) time_slicing: bool,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.into(),
            time_slicing: DEFAULT_TIME_SLICING,
        }
    }
}

impl RootOptions {
    /// Options with every default applied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Name attached to this root's log records.
    pub fn label(mut self, label: &str) -> Self {
        self.label = label.into();
        self
    }

    /// Whether non-sync renders check [`Scheduler::should_yield`] between
    /// units of work. When disabled, they still run as scheduled tasks but
    /// always render to completion.
    pub fn time_slicing(mut self, enabled: bool) -> Self {
        self.time_slicing = enabled;
        self
    }
}

/// A mounted tree.
pub struct Root<H: HostConfig> {
    pub(crate) shared: Rc<RootShared<H>>,
}

impl<H: HostConfig> Root<H> {
    /// Replace the tree rendered into the container.
    ///
    /// The update takes the lane of the scheduler's current priority, or the
    /// transition lane inside [`StartTransition::start`](crate::StartTransition::start),
    /// and is rendered once the scheduler (or, for sync work, the host's
    /// microtask queue) runs.
    pub fn render(&self, element: impl Into<Node>) {
        self.shared.update_container(element.into());
    }

    /// Take the error that aborted the most recent failed render.
    pub fn take_error(&self) -> Option<RenderError> {
        self.shared.inner.borrow_mut().last_error.take()
    }

    /// Statistics of the most recent commit.
    pub fn last_commit(&self) -> Option<CommitStats> {
        self.shared.inner.borrow().last_commit
    }

    /// Lanes with work not yet committed.
    pub fn pending_lanes(&self) -> Lanes {
        self.shared.inner.borrow().pending_lanes
    }

    /// The label this root logs with.
    pub fn label(&self) -> &str {
        &self.shared.options.label
    }
}

impl<H: HostConfig> fmt::Debug for Root<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("label", &self.label())
            .field("pending_lanes", &self.pending_lanes())
            .finish_non_exhaustive()
    }
}

/// Mount a root into `container` with default [`RootOptions`].
pub fn create_root<H: HostConfig>(
    host: Rc<H>,
    scheduler: Rc<dyn Scheduler>,
    container: H::Instance,
) -> Root<H> {
    create_root_with_options(host, scheduler, container, RootOptions::default())
}

/// Mount a root into `container`.
pub fn create_root_with_options<H: HostConfig>(
    host: Rc<H>,
    scheduler: Rc<dyn Scheduler>,
    container: H::Instance,
    options: RootOptions,
) -> Root<H> {
    tracing::debug!(root = %options.label, "creating root");
    Root {
        shared: RootShared::new(host, scheduler, container, options),
    }
}
