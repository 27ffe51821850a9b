//! Side-effect flags recorded on fibers during render and consumed by commit.

use bitflags::bitflags;

bitflags! {
    /// Work a fiber needs from the commit pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u16 {
        /// Insert (or move) the fiber's host nodes into the host parent.
        const PLACEMENT = 1 << 0;
        /// Push new props or text content to the host instance.
        const UPDATE = 1 << 1;
        /// One or more children listed in `deletions` must be torn down.
        const CHILD_DELETION = 1 << 2;
        /// The fiber has passive effects to run after commit.
        const PASSIVE_EFFECT = 1 << 3;
        /// The host ref changed and must be detached and reattached.
        const REF = 1 << 4;

        /// Flags handled by the mutation pass.
        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::REF.bits();
        /// Flags handled by the layout pass after the tree swap.
        const LAYOUT_MASK = Self::REF.bits();
        /// Flags that require a passive effect flush.
        const PASSIVE_MASK = Self::PASSIVE_EFFECT.bits() | Self::CHILD_DELETION.bits();
    }
}

bitflags! {
    /// Tags carried by an effect record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HookEffectTags: u8 {
        /// The effect needs to run during this commit.
        const HAS_EFFECT = 1 << 0;
        /// A `use_effect` effect, flushed after commit.
        const PASSIVE = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_cover_their_flags() {
        assert!(Flags::MUTATION_MASK.contains(Flags::PLACEMENT | Flags::UPDATE));
        assert!(Flags::MUTATION_MASK.contains(Flags::CHILD_DELETION));
        assert!(!Flags::MUTATION_MASK.intersects(Flags::PASSIVE_EFFECT));
        assert!(Flags::PASSIVE_MASK.contains(Flags::CHILD_DELETION));
        assert!(Flags::LAYOUT_MASK.contains(Flags::REF));
    }
}
