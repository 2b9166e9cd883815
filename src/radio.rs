//! # Crazyradio backend
//!
//! [RadioLink] drives a real Crazyflie through `crazyflie-lib`. It is only built with the `radio` feature since it
//! needs the Crazyradio USB stack.
//!
//! ```no_run
//! # async fn connect() -> crazyflie_teleop::Result<()> {
//! use crazyflie_teleop::link::Connector;
//! use crazyflie_teleop::radio::RadioConnector;
//!
//! let connector = RadioConnector::new("./cache");
//! let link = connector.open_link("radio://0/80/2M/E7E7E7E7E7").await?;
//! link.send_setpoint(0.0, 0.0, 0.0, 0).await?;
//! link.close_link().await?;
//! # Ok(())
//! # }
//! ```

use std::convert::TryInto;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crazyflie_lib::{Crazyflie, NoTocCache};
use crazyflie_link::LinkContext;
use futures::StreamExt;
use log::{debug, warn};

use crate::link::{
    Connector, FlightLink, FullStateSetpoint, LogConfig, LogSample, LogStream, ParamWatcher,
};
use crate::{Error, Result, Value};

/// Opens Crazyflie connections over the radio
pub struct RadioConnector {
    context: LinkContext,
    rw_cache: PathBuf,
}

impl RadioConnector {
    /// Connector using `rw_cache` as cache directory
    pub fn new(rw_cache: impl Into<PathBuf>) -> Self {
        Self {
            context: LinkContext::new(),
            rw_cache: rw_cache.into(),
        }
    }
}

#[async_trait]
impl Connector for RadioConnector {
    async fn open_link(&self, uri: &str) -> Result<Arc<dyn FlightLink>> {
        // TODO: persist the log and param TOCs in rw_cache to shorten reconnections
        if let Err(e) = std::fs::create_dir_all(&self.rw_cache) {
            warn!("Cannot create cache directory {:?}: {}", self.rw_cache, e);
        }

        let cf = Crazyflie::connect_from_uri(&self.context, uri, NoTocCache)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("{:?}", e)))?;

        let link: Arc<dyn FlightLink> = Arc::new(RadioLink { cf });
        Ok(link)
    }
}

/// A connected Crazyflie
pub struct RadioLink {
    cf: Crazyflie,
}

fn seconds(duration: Duration) -> f32 {
    duration.as_secs_f32()
}

#[async_trait]
impl FlightLink for RadioLink {
    async fn send_setpoint(&self, roll: f32, pitch: f32, yawrate: f32, thrust: u16) -> Result<()> {
        self.cf
            .commander
            .setpoint_rpyt(roll, pitch, yawrate, thrust)
            .await
            .map_err(|e| Error::SendFailure(format!("{:?}", e)))
    }

    async fn send_stop_setpoint(&self) -> Result<()> {
        self.cf
            .commander
            .setpoint_stop()
            .await
            .map_err(|e| Error::SendFailure(format!("{:?}", e)))
    }

    async fn send_full_state_setpoint(&self, _setpoint: &FullStateSetpoint) -> Result<()> {
        // TODO: encode the full-state packet once the commander exposes it
        Err(Error::Unsupported("full-state setpoint"))
    }

    async fn send_arming_request(&self, arm: bool) -> Result<()> {
        Ok(self.cf.platform.send_arming_request(arm).await?)
    }

    async fn take_off(&self, height: f32, duration: Duration) -> Result<()> {
        Ok(self
            .cf
            .high_level_commander
            .take_off(height, None, seconds(duration), None)
            .await?)
    }

    async fn go_to(&self, position: [f32; 3], yaw: f32, duration: Duration) -> Result<()> {
        let [x, y, z] = position;
        Ok(self
            .cf
            .high_level_commander
            .go_to(x, y, z, yaw.to_radians(), seconds(duration), false, false, None)
            .await?)
    }

    async fn land(&self, height: f32, duration: Duration) -> Result<()> {
        Ok(self
            .cf
            .high_level_commander
            .land(height, None, seconds(duration), None)
            .await?)
    }

    async fn start_log(&self, config: &LogConfig) -> Result<LogStream> {
        let mut block = self.cf.log.create_block().await?;
        for variable in &config.variables {
            block
                .add_variable(variable)
                .await
                .map_err(|e| Error::LogError(format!("{}: {:?}", variable, e)))?;
        }
        let stream = block.start(config.period.try_into()?).await?;

        let (tx, rx) = flume::unbounded();
        let name = config.name.clone();
        tokio::spawn(async move {
            while let Ok(data) = stream.next().await {
                let sample = LogSample {
                    timestamp: data.timestamp,
                    block: name.clone(),
                    data: data
                        .data
                        .into_iter()
                        .map(|(name, value)| (name, Value::from(value)))
                        .collect(),
                };
                if tx.send_async(sample).await.is_err() {
                    break;
                }
            }
            if let Err(e) = stream.stop().await {
                debug!("Log block {} not stopped: {:?}", name, e);
            }
        });

        Ok(Box::pin(rx.into_stream()))
    }

    async fn get_param(&self, name: &str) -> Result<Value> {
        let value: crazyflie_lib::Value = self
            .cf
            .param
            .get(name)
            .await
            .map_err(|e| Error::ParamError(format!("{}: {:?}", name, e)))?;
        Ok(value.into())
    }

    async fn set_param(&self, name: &str, value: Value) -> Result<()> {
        self.cf
            .param
            .set_lossy(name, value.to_f64_lossy())
            .await
            .map_err(|e| Error::ParamError(format!("{}: {:?}", name, e)))
    }

    async fn watch_params(&self) -> ParamWatcher {
        let watcher = self.cf.param.watch_change().await;
        Box::pin(watcher.map(|(name, value)| (name, Value::from(value))))
    }

    async fn close_link(&self) -> Result<()> {
        self.cf.disconnect().await;
        Ok(())
    }

    async fn wait_disconnect(&self) -> String {
        self.cf.wait_disconnect().await
    }
}
