// Test that the session and the simulated vehicle can be sent between threads

use std::sync::Arc;
use std::thread::spawn;

use crazyflie_teleop::sim::{SimConnector, SimLink};
use crazyflie_teleop::{TeleopConfig, TeleopController};

#[test]
fn controller_can_be_sent_to_thread() {
    let link = SimLink::new();
    let (_commands, input) = flume::unbounded();
    let controller = TeleopController::new(
        TeleopConfig::default(),
        Arc::new(SimConnector::new(link.clone())),
        input,
    );

    let controller = spawn(move || controller).join().unwrap();
    let _ = spawn(move || link).join().unwrap();
    assert_eq!(controller.thrust(), 20000);
}
