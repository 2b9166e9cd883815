// Teleoperation sessions against the simulated vehicle

use std::sync::Arc;
use std::time::Duration;

use crazyflie_teleop::sim::{Sent, SimConnector, SimLink, SimOptions};
use crazyflie_teleop::{Command, ConnectionState, TeleopConfig, TeleopController};
use tokio::time::sleep;

const URI: &str = "radio://0/80/2M/E7E7E7E7E7";

// Connection, arming settle and unlock burst are over by then
const STREAMING: Duration = Duration::from_secs(3);

fn session(connector: SimConnector) -> (TeleopController, flume::Sender<Command>) {
    let (commands, input) = flume::unbounded();
    let controller = TeleopController::new(TeleopConfig::default(), Arc::new(connector), input);
    (controller, commands)
}

fn zero_setpoints(journal: &[Sent]) -> usize {
    journal.iter().filter(|s| s.is_zero_setpoint()).count()
}

#[tokio::test(start_paused = true)]
async fn quit_sends_stop_burst_then_closes() {
    let link = SimLink::new();
    let (controller, commands) = session(SimConnector::new(link.clone()));

    controller.start(URI);
    sleep(STREAMING).await;
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert!(controller.is_running());

    commands.send(Command::Increase).unwrap();
    sleep(Duration::from_millis(200)).await;
    commands.send(Command::Quit).unwrap();
    controller.wait_closed().await;

    let journal = link.journal();
    let n = journal.len();
    assert_eq!(journal[0], Sent::Arming(true));
    assert!(journal[1..6].iter().all(Sent::is_zero_setpoint));
    assert_eq!(journal[n - 1], Sent::Closed);
    assert!(journal[n - 31..n - 1].iter().all(Sent::is_zero_setpoint));
    assert_eq!(journal[n - 32].thrust(), Some(20500));
    assert_eq!(zero_setpoints(&journal), 5 + 30);

    assert_eq!(controller.thrust(), 20500);
    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn streamed_thrust_follows_commands() {
    let link = SimLink::new();
    let (controller, commands) = session(SimConnector::new(link.clone()));

    controller.start(URI);
    sleep(STREAMING).await;
    for _ in 0..5 {
        commands.send(Command::Increase).unwrap();
    }
    sleep(Duration::from_millis(200)).await;
    assert_eq!(controller.thrust(), 22500);

    for _ in 0..10 {
        commands.send(Command::Decrease).unwrap();
    }
    sleep(Duration::from_millis(200)).await;
    assert_eq!(controller.thrust(), 17500);

    let journal = link.journal();
    let streamed: Vec<u16> = journal
        .iter()
        .filter_map(Sent::thrust)
        .filter(|t| *t != 0)
        .collect();
    assert_eq!(streamed.first(), Some(&20000));
    assert_eq!(streamed.last(), Some(&17500));
    assert!(streamed.contains(&22500));

    controller.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn second_shutdown_sends_no_second_burst() {
    let link = SimLink::new();
    let (controller, _commands) = session(SimConnector::new(link.clone()));

    controller.start(URI);
    sleep(STREAMING).await;

    tokio::join!(controller.shutdown(), controller.shutdown());
    controller.shutdown().await;

    let journal = link.journal();
    assert_eq!(zero_setpoints(&journal), 5 + 30);
    assert_eq!(journal.iter().filter(|s| **s == Sent::Closed).count(), 1);
    assert!(controller.is_closed());
}

#[tokio::test(start_paused = true)]
async fn lost_link_stops_periodic_setpoints() {
    let link = SimLink::new();
    let (controller, _commands) = session(SimConnector::new(link.clone()));

    controller.start(URI);
    sleep(STREAMING).await;
    let before = link.journal().len();
    let attempts_before = link.send_attempts();

    link.lose_link("out of range");
    controller.wait_closed().await;
    let attempts = link.send_attempts();
    sleep(Duration::from_secs(2)).await;

    // At most one periodic send and one burst send hit the dead link
    assert_eq!(link.send_attempts(), attempts);
    assert!(
        attempts <= attempts_before + 2,
        "{} attempts, {} before",
        attempts,
        attempts_before
    );

    let journal = link.journal();
    assert!(journal[before..].iter().all(|s| s.thrust().is_none()));
    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn connection_failure_ends_in_failed_state() {
    let (controller, _commands) = session(SimConnector::failing("no radio"));

    controller.start(URI);
    assert_eq!(controller.state(), ConnectionState::Connecting);
    controller.wait_closed().await;

    assert_eq!(controller.state(), ConnectionState::Failed);
    assert!(controller.is_closed());
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn send_failure_triggers_shutdown() {
    let link = SimLink::with_options(SimOptions {
        fail_sends_after: Some(20),
        ..SimOptions::default()
    });
    let (controller, _commands) = session(SimConnector::new(link.clone()));

    controller.start(URI);
    controller.wait_closed().await;

    let journal = link.journal();
    assert_eq!(journal.last(), Some(&Sent::Closed));
    assert_eq!(zero_setpoints(&journal), 5);
    assert_eq!(
        journal.iter().filter(|s| s.thrust() == Some(20000)).count(),
        15
    );
    assert_eq!(controller.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn vehicle_without_arming_still_streams() {
    let link = SimLink::with_options(SimOptions {
        no_arming: true,
        ..SimOptions::default()
    });
    let (controller, commands) = session(SimConnector::new(link.clone()));

    controller.start(URI);
    sleep(STREAMING).await;
    assert!(controller.is_running());

    commands.send(Command::Quit).unwrap();
    controller.wait_closed().await;

    let journal = link.journal();
    assert!(journal[0].is_zero_setpoint());
    assert!(!journal.contains(&Sent::Arming(true)));
}

#[tokio::test(start_paused = true)]
async fn repeated_connected_notification_is_ignored() {
    let link = SimLink::new();
    let (controller, commands) = session(SimConnector::new(link.clone()));

    controller.start(URI);
    sleep(STREAMING).await;
    controller.on_connected().await;
    sleep(Duration::from_millis(500)).await;

    commands.send(Command::Quit).unwrap();
    controller.wait_closed().await;

    let journal = link.journal();
    assert_eq!(journal.iter().filter(|s| **s == Sent::Arming(true)).count(), 1);
    assert_eq!(zero_setpoints(&journal), 5 + 30);
}

#[tokio::test(start_paused = true)]
async fn commands_are_ignored_outside_a_running_session() {
    let link = SimLink::new();
    let (controller, _commands) = session(SimConnector::new(link.clone()));

    controller.on_input_event(Command::Increase);
    controller.on_input_event(Command::Quit);
    assert_eq!(controller.thrust(), 20000);
    assert!(!controller.is_closed());

    controller.start(URI);
    sleep(STREAMING).await;
    controller.shutdown().await;

    controller.on_input_event(Command::Increase);
    assert_eq!(controller.thrust(), 20000);
}

#[tokio::test(start_paused = true)]
async fn link_opened_after_shutdown_is_closed() {
    let link = SimLink::new();
    let connector = SimConnector::new(link.clone()).with_connect_delay(Duration::from_secs(1));
    let (controller, _commands) = session(connector);

    controller.start(URI);
    controller.shutdown().await;
    sleep(Duration::from_secs(2)).await;

    assert_eq!(link.journal(), vec![Sent::Closed]);
    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn second_start_is_ignored() {
    let link = SimLink::new();
    let (controller, commands) = session(SimConnector::new(link.clone()));

    controller.start(URI);
    controller.start(URI);
    sleep(STREAMING).await;

    commands.send(Command::Quit).unwrap();
    controller.wait_closed().await;

    let journal = link.journal();
    assert_eq!(journal.iter().filter(|s| **s == Sent::Arming(true)).count(), 1);
}
