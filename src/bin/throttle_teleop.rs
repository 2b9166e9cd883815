//! Keyboard throttle teleoperation
//!
//! Streams `(0, 0, 0, thrust)` setpoints at 20 Hz. Up and down arrows step the thrust, Esc or Ctrl-C stops the
//! vehicle and quits. The link URI comes from `CFURI`, the backend from `CF_BACKEND`.

use std::io::Write;

use crazyflie_teleop::input::KeyboardListener;
use crazyflie_teleop::{connector_for, TeleopConfig, TeleopController};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The terminal is in raw mode while the session runs, lines need an explicit carriage return
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{} {}] {}\r", record.level(), record.target(), record.args()))
        .init();

    let config = TeleopConfig::from_env()?;
    let connector = connector_for(&config)?;

    println!("Throttle control, connecting to {}", config.uri);
    println!("  Up arrow:   thrust +{}", config.throttle.step);
    println!("  Down arrow: thrust -{}", config.throttle.step);
    println!("  Esc:        stop and quit");

    let (commands, input) = flume::unbounded();
    let keyboard = KeyboardListener::spawn(commands)?;

    let controller = TeleopController::new(config.clone(), connector, input);
    controller.start(&config.uri);

    tokio::select! {
        _ = controller.wait_closed() => (),
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted");
            controller.shutdown().await;
        }
    }

    keyboard.stop();
    println!("Done");
    Ok(())
}
