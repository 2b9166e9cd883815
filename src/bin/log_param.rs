//! Connect, stream the stabilizer attitude for a few seconds and toggle the state estimator
//!
//! The first argument picks the demonstration: `connect`, `log`, `log-async` (default) or `param`.

use crazyflie_teleop::telemetry::{run_demo, Demo};
use crazyflie_teleop::{connector_for, TeleopConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();

    let demo: Demo = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "log-async".to_owned())
        .parse()?;

    let config = TeleopConfig::from_env()?;
    let link = connector_for(&config)?.open_link(&config.uri).await?;

    run_demo(link.as_ref(), demo).await?;
    Ok(())
}
