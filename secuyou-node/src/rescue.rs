//! Rescue policy for an indeterminate bolt position
//!
//! When the lock reports `LockingInProgress` or an unknown position, the
//! bolt can usually be unstuck by toggling it twice. The policy only decides
//! whether a rescue may start; the toggle/toggle/read sequence itself runs
//! as a separate task in [`crate::handler`].
//!
//! The policy outlives a single connection so that reconnecting does not
//! reset the spacing between attempts.

use std::time::{Duration, Instant};

/// Minimum time between two rescue attempts
pub const RESCUE_SPACING: Duration = Duration::from_secs(3 * 60);

/// Delay after each toggle before the next step
pub const RESCUE_STEP_DELAY: Duration = Duration::from_secs(2);

/// Upper bound for the whole toggle/toggle/read sequence
pub const RESCUE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RescuePolicy {
    enabled: bool,
    in_flight: bool,
    // None until the first attempt, so the first trigger is always eligible
    last_attempt: Option<Instant>,
}

impl RescuePolicy {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            in_flight: false,
            last_attempt: None,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Claim the single rescue slot if the policy allows an attempt at `now`
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if self.in_flight || !self.enabled {
            return false;
        }
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < RESCUE_SPACING {
                return false;
            }
        }
        self.in_flight = true;
        self.last_attempt = Some(now);
        true
    }

    /// Release the slot, whether the rescue succeeded, failed or timed out
    pub fn finish(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_trigger_is_eligible() {
        let mut policy = RescuePolicy::new(true);
        assert!(policy.try_begin(Instant::now()));
        assert!(policy.in_flight());
    }

    #[test]
    fn disabled_never_starts() {
        let mut policy = RescuePolicy::new(false);
        assert!(!policy.try_begin(Instant::now()));
        assert!(!policy.in_flight());
        assert_eq!(policy.last_attempt(), None);
    }

    #[test]
    fn single_flight() {
        let t0 = Instant::now();
        let mut policy = RescuePolicy::new(true);
        assert!(policy.try_begin(t0));
        // even long after, a second attempt waits for the first one
        assert!(!policy.try_begin(t0 + Duration::from_secs(3600)));
        policy.finish();
        assert!(policy.try_begin(t0 + Duration::from_secs(3600)));
    }

    #[test]
    fn spacing() {
        let t0 = Instant::now();
        let mut policy = RescuePolicy::new(true);
        assert!(policy.try_begin(t0));
        policy.finish();

        assert!(!policy.try_begin(t0 + Duration::from_secs(60)));
        assert!(!policy.try_begin(t0 + RESCUE_SPACING - Duration::from_millis(1)));
        // rejected attempts do not move the window
        assert!(policy.try_begin(t0 + RESCUE_SPACING));
    }

    proptest! {
        #[test]
        fn attempts_never_closer_than_spacing(
            steps in proptest::collection::vec((0u64..400, any::<bool>()), 1..200)
        ) {
            let t0 = Instant::now();
            let mut policy = RescuePolicy::new(true);
            let mut now = t0;
            let mut started: Vec<Instant> = Vec::new();

            for (advance, finish) in steps {
                now += Duration::from_secs(advance);
                let was_in_flight = policy.in_flight();
                if policy.try_begin(now) {
                    prop_assert!(!was_in_flight);
                    started.push(now);
                }
                if finish {
                    policy.finish();
                }
            }

            for pair in started.windows(2) {
                prop_assert!(pair[1].duration_since(pair[0]) >= RESCUE_SPACING);
            }
        }
    }
}
