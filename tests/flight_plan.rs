// Scripted flight against the simulated vehicle

use std::time::Duration;

use crazyflie_teleop::maneuver::{hold_pitch, run_flight_plan, FlightPlan, PoseTracker};
use crazyflie_teleop::sim::{Sent, SimLink, SimOptions};
use crazyflie_teleop::Error;

fn position_of(journal: &[Sent], pred: impl Fn(&Sent) -> bool) -> usize {
    journal.iter().position(pred).expect("command not sent")
}

#[tokio::test(start_paused = true)]
async fn flight_plan_sends_commands_in_order() {
    let link = SimLink::new();
    let plan = FlightPlan::default();

    run_flight_plan(&link, &plan).await.unwrap();

    let journal = link.journal();
    let take_off = position_of(&journal, |s| matches!(s, Sent::TakeOff { .. }));
    let go_to = position_of(&journal, |s| matches!(s, Sent::GoTo { .. }));
    let first_full_state = position_of(&journal, |s| matches!(s, Sent::FullState(_)));
    let land = position_of(&journal, |s| matches!(s, Sent::Land { .. }));
    assert!(take_off < go_to && go_to < first_full_state && first_full_state < land);

    assert_eq!(
        journal[take_off],
        Sent::TakeOff {
            height: 1.0,
            duration: Duration::from_secs(2)
        }
    );

    let full_state: Vec<_> = journal
        .iter()
        .filter_map(|s| match s {
            Sent::FullState(setpoint) => Some(*setpoint),
            _ => None,
        })
        .collect();
    let held = full_state.len() - plan.level_count as usize;
    assert!((95..=101).contains(&held), "{} hold setpoints", held);

    let half = 7.5f32.to_radians();
    let first = full_state[0];
    assert_eq!(first.position, [1.0, 0.5, 1.0]);
    assert!((first.orientation[1] - half.sin()).abs() < 1e-4);
    assert!((first.orientation[3] - half.cos()).abs() < 1e-4);

    let level = full_state[full_state.len() - 1];
    assert!(level.orientation[1].abs() < 1e-4);
    assert_eq!(level.velocity, [0.0; 3]);

    assert!(link.position()[2].abs() < 1e-3);
}

#[tokio::test(start_paused = true)]
async fn unreachable_waypoint_times_out() {
    let link = SimLink::new();
    let plan = FlightPlan {
        tolerance: -1.0,
        arrival_timeout: Duration::from_secs(2),
        ..FlightPlan::default()
    };

    assert_eq!(run_flight_plan(&link, &plan).await, Err(Error::Timeout));
    assert!(!link
        .journal()
        .iter()
        .any(|s| matches!(s, Sent::FullState(_))));
}

#[tokio::test(start_paused = true)]
async fn send_error_ends_the_hold_early() {
    let link = SimLink::with_options(SimOptions {
        fail_sends_after: Some(10),
        ..SimOptions::default()
    });
    let tracker = PoseTracker::start(&link).await.unwrap();

    let sent = hold_pitch(
        &link,
        &tracker,
        [0.0, 0.0, 1.0],
        15.0,
        Duration::from_secs(5),
        Duration::from_millis(50),
    )
    .await;

    assert_eq!(sent, 10);
}

#[tokio::test(start_paused = true)]
async fn waypoint_below_ground_is_rejected() {
    let link = SimLink::new();
    let plan = FlightPlan {
        target: [1.0, 0.5, -1.0],
        ..FlightPlan::default()
    };

    assert!(matches!(
        run_flight_plan(&link, &plan).await,
        Err(Error::ConfigError(_))
    ));
    assert!(link.journal().is_empty());
}
