//! # Throttle state
//!
//! The throttle is a single 16 bit thrust value, 0 maps to 0% and 65535 to 100% thrust. It is written by the input
//! listener and read by the periodic sender from another task, so it is kept in an atomic: every read sees a value
//! that went through the clamp.

use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering::SeqCst;

use crate::{Error, Result};

/// Bounds and step of the throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleLimits {
    /// Thrust at session start
    pub initial: u16,
    /// Increment applied by one command
    pub step: u16,
    /// Lowest thrust reachable with commands
    pub min: u16,
    /// Highest thrust reachable with commands
    pub max: u16,
}

impl Default for ThrottleLimits {
    fn default() -> Self {
        Self {
            initial: 20_000,
            step: 500,
            min: 10_000,
            max: 60_000,
        }
    }
}

impl ThrottleLimits {
    /// Limits must be ordered and contain the initial value
    pub fn validate(&self) -> Result<()> {
        if self.min > self.max {
            return Err(Error::ConfigError(format!(
                "throttle min {} is above max {}",
                self.min, self.max
            )));
        }
        if self.initial < self.min || self.initial > self.max {
            return Err(Error::ConfigError(format!(
                "initial throttle {} outside [{}, {}]",
                self.initial, self.min, self.max
            )));
        }
        if self.step == 0 {
            return Err(Error::ConfigError("throttle step is zero".into()));
        }
        Ok(())
    }
}

/// Bounded thrust value
#[derive(Debug)]
pub struct ThrottleState {
    limits: ThrottleLimits,
    thrust: AtomicU16,
}

impl ThrottleState {
    pub fn new(limits: ThrottleLimits) -> Self {
        let initial = limits.initial.max(limits.min).min(limits.max);
        Self {
            limits,
            thrust: AtomicU16::new(initial),
        }
    }

    /// Current thrust
    pub fn get(&self) -> u16 {
        self.thrust.load(SeqCst)
    }

    pub fn limits(&self) -> ThrottleLimits {
        self.limits
    }

    /// Step up, saturating at the maximum. Returns the new thrust.
    pub fn increase(&self) -> u16 {
        let ThrottleLimits { step, max, .. } = self.limits;
        self.update(|t| t.saturating_add(step).min(max))
    }

    /// Step down, saturating at the minimum. Returns the new thrust.
    pub fn decrease(&self) -> u16 {
        let ThrottleLimits { step, min, .. } = self.limits;
        self.update(|t| t.saturating_sub(step).max(min))
    }

    fn update(&self, f: impl Fn(u16) -> u16) -> u16 {
        // The closure always returns Some, fetch_update cannot fail
        let previous = self
            .thrust
            .fetch_update(SeqCst, SeqCst, |t| Some(f(t)))
            .unwrap_or_else(|t| t);
        f(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_from_initial_thrust() {
        let throttle = ThrottleState::new(ThrottleLimits::default());
        assert_eq!(throttle.get(), 20_000);

        for _ in 0..5 {
            throttle.increase();
        }
        assert_eq!(throttle.get(), 22_500);

        for _ in 0..10 {
            throttle.decrease();
        }
        assert_eq!(throttle.get(), 17_500);

        for _ in 0..100 {
            throttle.decrease();
        }
        assert_eq!(throttle.get(), 10_000);
    }

    #[test]
    fn saturates_at_max() {
        let throttle = ThrottleState::new(ThrottleLimits::default());
        for _ in 0..1_000 {
            throttle.increase();
        }
        assert_eq!(throttle.get(), 60_000);
    }

    #[test]
    fn stays_in_bounds_for_any_sequence() {
        let limits = ThrottleLimits {
            initial: 1_000,
            step: 700,
            min: 300,
            max: 2_000,
        };
        let throttle = ThrottleState::new(limits);

        // Deterministic pseudo random walk
        let mut seed: u32 = 0x2545_f491;
        for _ in 0..10_000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let t = if seed & 1 == 0 {
                throttle.increase()
            } else {
                throttle.decrease()
            };
            assert!((limits.min..=limits.max).contains(&t));
        }
    }

    #[test]
    fn no_wraparound_near_type_limits() {
        let limits = ThrottleLimits {
            initial: 65_000,
            step: 1_000,
            min: 0,
            max: u16::MAX,
        };
        let throttle = ThrottleState::new(limits);
        assert_eq!(throttle.increase(), u16::MAX);

        let limits = ThrottleLimits {
            initial: 500,
            min: 0,
            ..limits
        };
        let throttle = ThrottleState::new(limits);
        assert_eq!(throttle.decrease(), 0);
    }

    #[test]
    fn validate_rejects_inverted_limits() {
        let limits = ThrottleLimits {
            min: 50_000,
            max: 10_000,
            ..ThrottleLimits::default()
        };
        assert!(limits.validate().is_err());
        assert!(ThrottleLimits::default().validate().is_ok());
    }
}
