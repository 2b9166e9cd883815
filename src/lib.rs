//! # Crazyflie teleoperation
//!
//! This crate drives a Crazyflie from a terminal: the operator steps the thrust up and down with the arrow keys while
//! a session streams attitude setpoints at a fixed rate, and stops the vehicle safely whatever ends the session.
//! It also carries two scripted demonstrations, a waypoint flight with pitch hold and a telemetry/parameter tour.
//!
//! ## Modules
//!
//! | Module | Content |
//! |--------|---------|
//! | [session] | Teleoperation session: lifecycle, periodic sender, shutdown |
//! | [throttle] | Bounded thrust state |
//! | [input] | Keyboard commands |
//! | [link] | Vehicle interface implemented by the backends |
//! | [sim] | Simulated vehicle |
//! | `radio` | Crazyflie over a Crazyradio (feature `radio`) |
//! | [maneuver] | Waypoint flight and pitch hold |
//! | [telemetry] | Log blocks and parameters |
//! | [config] | Session configuration |
//!
//! ## Usage
//!
//! A session needs a [Connector](link::Connector) to open the link and the receiving end of a command channel:
//!  - Build a [TeleopConfig], usually with [TeleopConfig::from_env()]
//!  - Get a connector with [connector_for()]
//!  - Create a [TeleopController] and call [start()](TeleopController::start)
//!  - Feed it [Command]s, from a [KeyboardListener](input::KeyboardListener) or any other source
//!  - Wait for [wait_closed()](TeleopController::wait_closed), or call [shutdown()](TeleopController::shutdown)
//!
//! ``` no_run
//! # async fn run() -> crazyflie_teleop::Result<()> {
//! use crazyflie_teleop::input::KeyboardListener;
//! use crazyflie_teleop::{connector_for, TeleopConfig, TeleopController};
//!
//! let config = TeleopConfig::from_env()?;
//! let connector = connector_for(&config)?;
//!
//! let (commands, input) = flume::unbounded();
//! let keyboard = KeyboardListener::spawn(commands)?;
//!
//! let controller = TeleopController::new(config.clone(), connector, input);
//! controller.start(&config.uri);
//! controller.wait_closed().await;
//!
//! keyboard.stop();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

mod error;
mod value;

pub mod config;
pub mod input;
pub mod link;
pub mod maneuver;
pub mod session;
pub mod sim;
pub mod telemetry;
pub mod throttle;

#[cfg(feature = "radio")]
pub mod radio;

pub use crate::config::{Backend, TeleopConfig};
pub use crate::error::{Error, Result};
pub use crate::input::Command;
pub use crate::session::{ConnectionState, LinkEvent, TeleopController};
pub use crate::value::{Value, ValueType};

use crate::link::Connector;

/// Connector for the backend selected in `config`
///
/// Selecting [Backend::Radio] in a build without the `radio` feature is a configuration error.
pub fn connector_for(config: &TeleopConfig) -> Result<Arc<dyn Connector>> {
    match config.backend {
        Backend::Sim => Ok(Arc::new(sim::SimConnector::new(sim::SimLink::new()))),
        #[cfg(feature = "radio")]
        Backend::Radio => Ok(Arc::new(radio::RadioConnector::new(config.rw_cache.clone()))),
        #[cfg(not(feature = "radio"))]
        Backend::Radio => Err(Error::ConfigError(
            "radio backend requires the `radio` feature".into(),
        )),
    }
}
