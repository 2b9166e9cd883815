//! Take off, fly to a waypoint, hold a pitch angle with full-state setpoints, then land
//!
//! The link URI comes from `CFURI`, the backend from `CF_BACKEND`.

use crazyflie_teleop::maneuver::{run_flight_plan, FlightPlan};
use crazyflie_teleop::{connector_for, TeleopConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = TeleopConfig::from_env()?;
    let link = connector_for(&config)?.open_link(&config.uri).await?;
    println!("Connected to {}", config.uri);

    let plan = FlightPlan::default();
    if let Err(e) = run_flight_plan(link.as_ref(), &plan).await {
        eprintln!("Flight plan aborted: {}", e);
        if let Err(e) = link.land(0.0, plan.hover).await {
            eprintln!("Landing failed: {}", e);
        }
    }

    link.close_link().await?;
    println!("Done");
    Ok(())
}
