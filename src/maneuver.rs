//! # Waypoint flight and pitch hold
//!
//! A scripted flight: take off, fly to a waypoint and wait until the state estimate reports it reached, hover, then
//! hold a pitch angle for a while using full-state setpoints, level out and land.
//!
//! Position and attitude are read from an "Attitude" log block while the plan runs, see [PoseTracker].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use log::{info, warn};
use nalgebra::{Quaternion, UnitQuaternion};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use crate::link::{FlightLink, FullStateSetpoint, LogConfig, LogSample};
use crate::{Error, Result};

/// Convert roll, pitch and yaw in degrees to a quaternion `[x, y, z, w]`
///
/// Rotations are extrinsic, applied about the fixed x, then y, then z axis.
pub fn euler_to_quaternion(roll: f32, pitch: f32, yaw: f32) -> [f32; 4] {
    let q = UnitQuaternion::from_euler_angles(roll.to_radians(), pitch.to_radians(), yaw.to_radians());
    let c = q.coords;
    [c.x, c.y, c.z, c.w]
}

/// Inverse of [euler_to_quaternion], returns `[roll, pitch, yaw]` in degrees
pub fn quaternion_to_euler(q: [f32; 4]) -> [f32; 3] {
    let [x, y, z, w] = q;
    let (roll, pitch, yaw) = UnitQuaternion::from_quaternion(Quaternion::new(w, x, y, z)).euler_angles();
    [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
}

/// Position and attitude estimate
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    /// Position in meters
    pub position: [f32; 3],
    /// Roll, pitch, yaw in degrees
    pub attitude: [f32; 3],
}

impl Pose {
    fn from_sample(sample: &LogSample) -> Self {
        let f = |name| sample.get_f64(name).unwrap_or_default() as f32;
        Self {
            position: [
                f("stateEstimate.x"),
                f("stateEstimate.y"),
                f("stateEstimate.z"),
            ],
            attitude: [
                f("stabilizer.roll"),
                f("stabilizer.pitch"),
                f("stabilizer.yaw"),
            ],
        }
    }

    /// Euclidean distance to `target`
    pub fn distance_to(&self, target: [f32; 3]) -> f32 {
        self.position
            .iter()
            .zip(target.iter())
            .map(|(p, t)| (t - p) * (t - p))
            .sum::<f32>()
            .sqrt()
    }
}

/// Log block feeding the [PoseTracker]
pub fn attitude_log_config() -> LogConfig {
    LogConfig::new("Attitude", Duration::from_millis(50))
        .with_variable("stateEstimate.x")
        .with_variable("stateEstimate.y")
        .with_variable("stateEstimate.z")
        .with_variable("stabilizer.yaw")
        .with_variable("stabilizer.pitch")
        .with_variable("stabilizer.roll")
}

/// Keeps the latest pose reported by the attitude log block
///
/// The log block is stopped when the tracker is dropped.
pub struct PoseTracker {
    latest: Arc<Mutex<Option<Pose>>>,
    task: JoinHandle<()>,
}

impl PoseTracker {
    pub async fn start(link: &dyn FlightLink) -> Result<Self> {
        let mut stream = link.start_log(&attitude_log_config()).await?;
        let latest = Arc::new(Mutex::new(None));

        let latest_task = latest.clone();
        let task = tokio::spawn(async move {
            while let Some(sample) = stream.next().await {
                let pose = Pose::from_sample(&sample);
                *latest_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(pose);
            }
        });

        Ok(Self { latest, task })
    }

    /// Latest pose, `None` until the first sample arrived
    pub fn latest(&self) -> Option<Pose> {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the first sample
    pub async fn first(&self, limit: Duration) -> Result<Pose> {
        timeout(limit, async {
            loop {
                if let Some(pose) = self.latest() {
                    return pose;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .map_err(Error::from)
    }
}

impl Drop for PoseTracker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Parameters of the scripted flight
#[derive(Debug, Clone, PartialEq)]
pub struct FlightPlan {
    /// Waypoint in meters, the take off height is its z
    pub target: [f32; 3],
    /// Travel velocity in meters/second
    pub velocity: f32,
    /// Distance under which the waypoint counts as reached
    pub tolerance: f32,
    /// Give up waiting for the waypoint after this long
    pub arrival_timeout: Duration,
    /// Hover time at the waypoint
    pub hover: Duration,
    /// Pitch angle to hold, degrees
    pub pitch: f32,
    /// How long to hold the pitch
    pub hold: Duration,
    /// Full-state setpoint rate
    pub control_rate_hz: u32,
    /// Number of level setpoints sent after the hold
    pub level_count: u32,
}

impl Default for FlightPlan {
    fn default() -> Self {
        Self {
            target: [1.0, 0.5, 1.0],
            velocity: 0.5,
            tolerance: 0.1,
            arrival_timeout: Duration::from_secs(30),
            hover: Duration::from_secs(3),
            pitch: 15.0,
            hold: Duration::from_secs(5),
            control_rate_hz: 20,
            level_count: 20,
        }
    }
}

impl FlightPlan {
    fn control_period(&self) -> Duration {
        Duration::from_secs(1) / self.control_rate_hz.max(1)
    }

    fn travel_time(&self, distance: f32) -> Result<Duration> {
        let seconds = distance / self.velocity.max(f32::EPSILON);
        Duration::try_from_secs_f32(seconds)
            .map_err(|_| Error::ConfigError(format!("invalid travel time {} s", seconds)))
    }
}

/// Fly to `target` and wait until the tracked pose is within `plan.tolerance`
pub async fn fly_to(
    link: &dyn FlightLink,
    tracker: &PoseTracker,
    target: [f32; 3],
    plan: &FlightPlan,
) -> Result<()> {
    info!(
        "Flying to target position (x={}, y={}, z={})",
        target[0], target[1], target[2]
    );
    let start = tracker.first(plan.arrival_timeout).await?;
    let duration = plan.travel_time(start.distance_to(target))?;
    link.go_to(target, start.attitude[2], duration).await?;

    timeout(plan.arrival_timeout, async {
        loop {
            if let Some(pose) = tracker.latest() {
                if pose.distance_to(target) < plan.tolerance {
                    break;
                }
            }
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await?;

    info!("Target position reached");
    Ok(())
}

/// Stream full-state setpoints holding `pitch` at `position` for `duration`
///
/// Roll and yaw are kept at their current estimate. Returns the number of setpoints sent. A send error ends the
/// hold early and is logged, it is not returned.
pub async fn hold_pitch(
    link: &dyn FlightLink,
    tracker: &PoseTracker,
    position: [f32; 3],
    pitch: f32,
    duration: Duration,
    period: Duration,
) -> usize {
    let start = Instant::now();
    let mut sent = 0;
    while start.elapsed() < duration {
        let [roll, _, yaw] = tracker.latest().unwrap_or_default().attitude;
        let setpoint = FullStateSetpoint::hold(position, euler_to_quaternion(roll, pitch, yaw));
        if let Err(e) = link.send_full_state_setpoint(&setpoint).await {
            warn!("Control error: {}", e);
            break;
        }
        sent += 1;
        sleep(period).await;
    }
    sent
}

/// Run the full scripted flight
pub async fn run_flight_plan(link: &dyn FlightLink, plan: &FlightPlan) -> Result<()> {
    let tracker = PoseTracker::start(link).await?;
    let target = plan.target;
    let period = plan.control_period();

    info!("Taking off to {} m", target[2]);
    let climb = plan.travel_time(target[2])?;
    link.take_off(target[2], climb).await?;
    sleep(climb + Duration::from_secs(1)).await;

    fly_to(link, &tracker, target, plan).await?;

    info!("Hovering for {:?}", plan.hover);
    sleep(plan.hover).await;

    info!("Full-state mode, holding pitch {} deg", plan.pitch);
    let sent = hold_pitch(link, &tracker, target, plan.pitch, plan.hold, period).await;
    info!("Pitch hold done after {} setpoints", sent);

    info!("Leveling");
    for _ in 0..plan.level_count {
        let [roll, _, yaw] = tracker.latest().unwrap_or_default().attitude;
        let setpoint = FullStateSetpoint::hold(target, euler_to_quaternion(roll, 0.0, yaw));
        link.send_full_state_setpoint(&setpoint).await?;
        sleep(period).await;
    }

    info!("Landing");
    let descent = plan.travel_time(target[2])?;
    link.land(0.0, descent).await?;
    sleep(descent).await;

    Ok(())
}
