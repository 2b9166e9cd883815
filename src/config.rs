//! # Teleoperation configuration
//!
//! All timing and limit constants of a session live in [TeleopConfig]: 20 Hz control rate and 30 stop setpoints at
//! 10 Hz on shutdown by default. The link URI, cache directory and backend can be overridden from the environment:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `CFURI` | Link URI | `radio://0/80/2M/E7E7E7E7E7` |
//! | `CF_RW_CACHE` | Cache directory handed to the backend | `./cache` |
//! | `CF_BACKEND` | `radio` or `sim` | `radio` if built with the `radio` feature, `sim` otherwise |

use std::path::PathBuf;
use std::time::Duration;

use crate::throttle::ThrottleLimits;
use crate::{Error, Result};

/// Default link URI
pub const DEFAULT_URI: &str = "radio://0/80/2M/E7E7E7E7E7";

/// Default cache directory
pub const DEFAULT_RW_CACHE: &str = "./cache";

/// Which collaborator implementation to connect through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process simulated vehicle
    Sim,
    /// Crazyradio link, requires the `radio` feature
    Radio,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "radio") {
            Backend::Radio
        } else {
            Backend::Sim
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sim" => Ok(Backend::Sim),
            "radio" => Ok(Backend::Radio),
            other => Err(Error::ConfigError(format!("unknown backend '{}'", other))),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TeleopConfig {
    /// Link URI to connect to
    pub uri: String,
    /// Cache directory passed through to the backend
    pub rw_cache: PathBuf,
    /// Backend selection
    pub backend: Backend,
    /// Throttle bounds, step and initial value
    pub throttle: ThrottleLimits,
    /// Periodic sender rate
    pub control_rate_hz: u32,
    /// Number of zero setpoints sent on shutdown
    pub stop_burst_count: u32,
    /// Rate of the shutdown stop burst
    pub stop_burst_rate_hz: u32,
    /// Number of zero setpoints sent before streaming, unlocks the thrust
    pub unlock_count: u32,
    /// Delay between the arming request and the first setpoint
    pub arm_settle: Duration,
    /// Upper bound when waiting for a task to finish
    pub join_timeout: Duration,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_owned(),
            rw_cache: PathBuf::from(DEFAULT_RW_CACHE),
            backend: Backend::default(),
            throttle: ThrottleLimits::default(),
            control_rate_hz: 20,
            stop_burst_count: 30,
            stop_burst_rate_hz: 10,
            unlock_count: 5,
            arm_settle: Duration::from_secs(1),
            join_timeout: Duration::from_secs(2),
        }
    }
}

impl TeleopConfig {
    /// Default configuration with `CFURI`, `CF_RW_CACHE` and `CF_BACKEND` applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup, then validate
    ///
    /// The lookup is a closure so that tests do not have to touch the process environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("CFURI") {
            self.uri = uri;
        }
        if let Some(cache) = lookup("CF_RW_CACHE") {
            self.rw_cache = PathBuf::from(cache);
        }
        if let Some(backend) = lookup("CF_BACKEND") {
            self.backend = backend.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check rates and limits
    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(Error::ConfigError("link URI is empty".into()));
        }
        if self.control_rate_hz == 0 || self.stop_burst_rate_hz == 0 {
            return Err(Error::ConfigError("rates must be non-zero".into()));
        }
        self.throttle.validate()
    }

    /// Interval between two periodic setpoints
    pub fn control_period(&self) -> Duration {
        Duration::from_secs(1) / self.control_rate_hz.max(1)
    }

    /// Interval between two stop setpoints of a burst
    pub fn stop_burst_period(&self) -> Duration {
        Duration::from_secs(1) / self.stop_burst_rate_hz.max(1)
    }
}
