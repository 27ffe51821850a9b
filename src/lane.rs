//! Priority lanes.
//!
//! A lane is one bit of a fixed-width set. Lower bit positions are higher
//! priority, so isolating the lowest set bit (`lanes & -lanes`) yields the most
//! urgent pending lane. Several pending priorities combine with bitwise OR.

use bitflags::bitflags;

use crate::scheduler::PriorityLevel;

bitflags! {
    /// A set of priority lanes.
    ///
    /// A single-bit value is referred to as a [`Lane`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lanes: u32 {
        /// Discrete, user-visible work that must never be time sliced.
        const SYNC = 1 << 0;
        /// Continuous input such as drags or scrolls.
        const INPUT_CONTINUOUS = 1 << 1;
        /// Ordinary updates.
        const DEFAULT = 1 << 2;
        /// Updates issued inside `StartTransition::start`.
        const TRANSITION = 1 << 3;
        /// Work that only runs when nothing else is pending.
        const IDLE = 1 << 30;
    }
}

/// A single lane. Same representation as [`Lanes`], holding at most one bit.
pub type Lane = Lanes;

/// The empty lane.
pub const NO_LANE: Lane = Lanes::empty();

impl Lanes {
    /// Combine two lane sets.
    #[inline]
    pub fn merge(self, other: Lanes) -> Lanes {
        self | other
    }

    /// The highest priority lane contained in this set, or [`NO_LANE`].
    #[inline]
    pub fn highest_priority(self) -> Lane {
        let bits = self.bits();
        Lanes::from_bits_retain(bits & bits.wrapping_neg())
    }

    /// Whether every bit of `candidate` is present in `self`.
    ///
    /// This is how the work loop decides if an update scheduled at `candidate`
    /// is covered by the lane being rendered. The empty lane is covered by
    /// every render.
    #[inline]
    pub fn is_subset(self, candidate: Lanes) -> bool {
        self.bits() & candidate.bits() == candidate.bits()
    }

    /// Remove finished lanes from a pending set.
    #[inline]
    pub fn mark_finished(&mut self, finished: Lanes) {
        self.remove(finished);
    }
}

/// Map a lane set to the scheduler priority of its most urgent lane.
pub fn lanes_to_scheduler_priority(lanes: Lanes) -> PriorityLevel {
    let lane = lanes.highest_priority();
    if lane == Lanes::SYNC {
        PriorityLevel::Immediate
    } else if lane == Lanes::INPUT_CONTINUOUS {
        PriorityLevel::UserBlocking
    } else if lane == Lanes::DEFAULT {
        PriorityLevel::Normal
    } else {
        PriorityLevel::Idle
    }
}

/// Map a scheduler priority level back to the lane updates issued under it use.
pub fn scheduler_priority_to_lane(priority: PriorityLevel) -> Lane {
    match priority {
        PriorityLevel::Immediate => Lanes::SYNC,
        PriorityLevel::UserBlocking => Lanes::INPUT_CONTINUOUS,
        PriorityLevel::Normal => Lanes::DEFAULT,
        PriorityLevel::Low | PriorityLevel::Idle => Lanes::IDLE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_isolates_lowest_bit() {
        let pending = Lanes::DEFAULT | Lanes::TRANSITION | Lanes::SYNC;
        assert_eq!(pending.highest_priority(), Lanes::SYNC);

        let pending = Lanes::IDLE | Lanes::TRANSITION;
        assert_eq!(pending.highest_priority(), Lanes::TRANSITION);

        assert_eq!(NO_LANE.highest_priority(), NO_LANE);
    }

    #[test]
    fn subset_checks_candidate_bits() {
        let render = Lanes::SYNC | Lanes::DEFAULT;
        assert!(render.is_subset(Lanes::SYNC));
        assert!(render.is_subset(Lanes::DEFAULT));
        assert!(!render.is_subset(Lanes::TRANSITION));
        assert!(!render.is_subset(Lanes::SYNC | Lanes::TRANSITION));
        // Re-applied updates carry no lane and are always covered.
        assert!(Lanes::TRANSITION.is_subset(NO_LANE));
    }

    #[test]
    fn mark_finished_clears_consumed_bits() {
        let mut pending = Lanes::SYNC.merge(Lanes::DEFAULT);
        pending.mark_finished(Lanes::SYNC);
        assert_eq!(pending, Lanes::DEFAULT);
        pending.mark_finished(Lanes::DEFAULT);
        assert!(pending.is_empty());
    }

    #[test]
    fn priority_table_round_trips_named_lanes() {
        for lane in [Lanes::SYNC, Lanes::INPUT_CONTINUOUS, Lanes::DEFAULT] {
            assert_eq!(
                scheduler_priority_to_lane(lanes_to_scheduler_priority(lane)),
                lane
            );
        }
        assert_eq!(
            lanes_to_scheduler_priority(Lanes::TRANSITION),
            PriorityLevel::Idle
        );
        assert_eq!(scheduler_priority_to_lane(PriorityLevel::Low), Lanes::IDLE);
    }
}
