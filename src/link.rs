//! # Flight-control link
//!
//! Everything that talks to the vehicle goes through the [FlightLink] trait. Radio management, packet framing and
//! onboard control are the business of the implementation behind it; this crate only sends setpoints, reads
//! telemetry and parameters and watches for the link going away.
//!
//! Two implementations are provided:
//!  - [SimLink](crate::sim::SimLink), an in-process simulated vehicle
//!  - `RadioLink` (feature `radio`), a Crazyflie connected over a Crazyradio
//!
//! All methods take `&self`: a link is shared between tasks behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{Result, Value};

/// Stream of telemetry samples for one started log block
///
/// The block is stopped when the stream is dropped.
pub type LogStream = BoxStream<'static, LogSample>;

/// Stream of `(name, value)` parameter change notifications
pub type ParamWatcher = BoxStream<'static, (String, Value)>;

/// Opens links
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link to the vehicle at `uri`
    ///
    /// An error is returned if the link cannot be opened or if the vehicle does not answer.
    async fn open_link(&self, uri: &str) -> Result<Arc<dyn FlightLink>>;
}

/// Commands, telemetry and lifecycle of one connected vehicle
#[async_trait]
pub trait FlightLink: Send + Sync {
    /// Roll/Pitch/Yawrate/Thrust setpoint
    ///
    /// Roll and pitch are absolute angles in degrees, yawrate is in degrees per second and thrust a 16 bit value. The
    /// vehicle keeps thrust locked until it has seen one setpoint with `thrust = 0`.
    async fn send_setpoint(&self, roll: f32, pitch: f32, yawrate: f32, thrust: u16) -> Result<()>;

    /// Stop setpoint: immediately cuts the motors
    async fn send_stop_setpoint(&self) -> Result<()>;

    /// Full-state setpoint
    async fn send_full_state_setpoint(&self, setpoint: &FullStateSetpoint) -> Result<()>;

    /// Arm or disarm the motors
    ///
    /// Returns [Error::Unsupported](crate::Error::Unsupported) on vehicles without arming.
    async fn send_arming_request(&self, arm: bool) -> Result<()>;

    /// High-level take off to `height` meters over `duration`
    async fn take_off(&self, height: f32, duration: Duration) -> Result<()>;

    /// High-level go to an absolute position with yaw in degrees
    async fn go_to(&self, position: [f32; 3], yaw: f32, duration: Duration) -> Result<()>;

    /// High-level land to `height` meters over `duration`
    async fn land(&self, height: f32, duration: Duration) -> Result<()>;

    /// Create and start a log block
    async fn start_log(&self, config: &LogConfig) -> Result<LogStream>;

    /// Read a parameter
    async fn get_param(&self, name: &str) -> Result<Value>;

    /// Write a parameter
    ///
    /// The value is converted to the type of the parameter.
    async fn set_param(&self, name: &str, value: Value) -> Result<()>;

    /// Subscribe to parameter changes
    async fn watch_params(&self) -> ParamWatcher;

    /// Close the link
    ///
    /// Once this returns, any command returns [Error::Disconnected](crate::Error::Disconnected). Commands on a link
    /// lost for another reason may return [Error::ConnectionLost](crate::Error::ConnectionLost) instead.
    async fn close_link(&self) -> Result<()>;

    /// Wait for the link to close and return the reason
    async fn wait_disconnect(&self) -> String;
}

/// Full state target: position, velocity, acceleration, orientation and body rates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FullStateSetpoint {
    /// Position in meters, world frame
    pub position: [f32; 3],
    /// Velocity in meters/second, world frame
    pub velocity: [f32; 3],
    /// Acceleration in meters/second², world frame
    pub acceleration: [f32; 3],
    /// Orientation quaternion as `[x, y, z, w]`
    pub orientation: [f32; 4],
    /// Roll, pitch and yaw rates in degrees/second
    pub angular_rates: [f32; 3],
}

impl FullStateSetpoint {
    /// Hover at `position` with the given attitude quaternion
    pub fn hold(position: [f32; 3], orientation: [f32; 4]) -> Self {
        Self {
            position,
            orientation,
            ..Self::default()
        }
    }
}

/// Log block definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Block name, reported back in every sample
    pub name: String,
    /// Sample period
    pub period: Duration,
    /// Variable names formatted as "group.name"
    pub variables: Vec<String>,
}

impl LogConfig {
    pub fn new(name: impl Into<String>, period: Duration) -> Self {
        Self {
            name: name.into(),
            period,
            variables: Vec::new(),
        }
    }

    /// Append a variable to the block
    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }
}

/// One telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct LogSample {
    /// Vehicle timestamp in milliseconds
    pub timestamp: u32,
    /// Name of the block that produced the sample
    pub block: String,
    /// Variable values
    pub data: BTreeMap<String, Value>,
}

impl LogSample {
    /// Value of a variable as f64, if present
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.data.get(name).map(Value::to_f64_lossy)
    }
}

impl fmt::Display for LogSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]: {{", self.timestamp, self.block)?;
        for (i, (name, value)) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        write!(f, "}}")
    }
}
