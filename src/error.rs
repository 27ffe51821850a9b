//! Render errors.

use crate::arena::WorkTag;

/// Everything that can abort a render.
///
/// All variants are fatal for the render pass that produced them: the work
/// tree is discarded and the next update starts from a fresh stack.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A component called more hooks than it did in its previous render.
    #[error("component `{component}` rendered more hooks than the {previous} of its previous render")]
    TooManyHooks {
        /// Component name.
        component: String,
        /// Hook count of the previous render.
        previous: usize,
    },

    /// A component called fewer hooks than it did in its previous render.
    #[error("component `{component}` rendered {rendered} hooks, previous render had {previous}")]
    TooFewHooks {
        /// Component name.
        component: String,
        /// Hook count of this render.
        rendered: usize,
        /// Hook count of the previous render.
        previous: usize,
    },

    /// The hook at a position is not the kind the call asked for.
    #[error("component `{component}` called {expected} at hook {index}, previous render had {found}")]
    HookKindMismatch {
        /// Component name.
        component: String,
        /// Position in the hook list.
        index: usize,
        /// The hook the call expected.
        expected: &'static str,
        /// The hook that was recorded.
        found: &'static str,
    },

    /// A fiber's payload does not match its tag.
    #[error("fiber tagged {tag:?} is malformed: {detail}")]
    UnexpectedFiber {
        /// Tag of the fiber.
        tag: WorkTag,
        /// What was wrong.
        detail: &'static str,
    },

    /// Application render code failed.
    #[error("component `{component}` failed to render")]
    Component {
        /// Component name.
        component: String,
        /// The error returned by the component.
        #[source]
        source: anyhow::Error,
    },
}

impl RenderError {
    /// Wrap an application error raised while rendering `component`.
    pub fn component(component: &str, source: impl Into<anyhow::Error>) -> Self {
        Self::Component {
            component: component.to_owned(),
            source: source.into(),
        }
    }

    /// Whether this error comes from hook order validation.
    pub fn is_hook_mismatch(&self) -> bool {
        matches!(
            self,
            Self::TooManyHooks { .. } | Self::TooFewHooks { .. } | Self::HookKindMismatch { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = RenderError> = std::result::Result<T, E>;
