//! Transition scoping.
//!
//! While a transition scope is open, every update dispatched to the root is
//! tagged with the transition lane instead of the lane derived from the
//! scheduler's current priority.

use std::cell::Cell;
use std::fmt;
use std::rc::Weak;

use crate::hooks::{Dispatch, UpdateSink};

/// Per-root batch configuration read when picking an update's lane.
#[derive(Default)]
pub(crate) struct BatchConfig {
    transition: Cell<bool>,
}

impl BatchConfig {
    pub(crate) fn in_transition(&self) -> bool {
        self.transition.get()
    }

    /// Open a transition scope that is closed when the guard drops.
    pub(crate) fn enter_transition(&self) -> TransitionGuard<'_> {
        let prev = self.transition.replace(true);
        TransitionGuard { config: self, prev }
    }
}

/// RAII guard that restores the previous transition state even on panic.
pub(crate) struct TransitionGuard<'a> {
    config: &'a BatchConfig,
    prev: bool,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.config.transition.set(self.prev);
    }
}

/// Starts a transition. Returned by [`RenderCx::use_transition`](crate::RenderCx::use_transition).
///
/// # Example
/// ```ignore
/// let (is_pending, start) = cx.use_transition()?;
/// let on_click = move || start.start(|| set_tab.set(Tab::Posts));
/// ```
#[derive(Clone)]
pub struct StartTransition {
    set_pending: Dispatch<bool>,
    sink: Weak<dyn UpdateSink>,
}

impl StartTransition {
    pub(crate) fn new(set_pending: Dispatch<bool>, sink: Weak<dyn UpdateSink>) -> Self {
        Self { set_pending, sink }
    }

    /// Run `f` with every update it dispatches tagged as a transition.
    ///
    /// The pending flag turns on at the current lane and back off inside the
    /// transition, so `is_pending` is `true` until the transition commits.
    pub fn start(&self, f: impl FnOnce()) {
        self.set_pending.set(true);
        let Some(sink) = self.sink.upgrade() else {
            tracing::warn!("transition started on an unmounted root");
            f();
            return;
        };
        let _guard = sink.batch_config().enter_transition();
        f();
        self.set_pending.set(false);
    }
}

impl fmt::Debug for StartTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StartTransition")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_previous_state() {
        let config = BatchConfig::default();
        assert!(!config.in_transition());
        {
            let _outer = config.enter_transition();
            assert!(config.in_transition());
            {
                let _inner = config.enter_transition();
                assert!(config.in_transition());
            }
            assert!(config.in_transition());
        }
        assert!(!config.in_transition());
    }

    #[test]
    fn guard_restores_on_panic() {
        let config = BatchConfig::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = config.enter_transition();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(!config.in_transition());
    }
}
