//! # Simulated vehicle
//!
//! [SimLink] implements [FlightLink] without any hardware. It keeps a journal of every command it accepted, moves
//! a point along the high-level commands, reports it through log blocks and stores parameters. Faults can be
//! injected to exercise the recovery paths: the link can be lost at any time and sends can be made to fail after a
//! given count.
//!
//! ```
//! # async fn demo() -> crazyflie_teleop::Result<()> {
//! use crazyflie_teleop::link::FlightLink;
//! use crazyflie_teleop::sim::{Sent, SimLink};
//!
//! let link = SimLink::new();
//! link.send_setpoint(0.0, 0.0, 0.0, 0).await?;
//! link.close_link().await?;
//!
//! assert_eq!(link.journal().last(), Some(&Sent::Closed));
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use crate::link::{
    Connector, FlightLink, FullStateSetpoint, LogConfig, LogSample, LogStream, ParamWatcher,
};
use crate::maneuver::quaternion_to_euler;
use crate::{Error, Result, Value};

const CLOSED_BY_USER: &str = "link closed by user";

/// Log variables the simulated vehicle can report
pub const SIM_LOG_VARIABLES: &[&str] = &[
    "stateEstimate.x",
    "stateEstimate.y",
    "stateEstimate.z",
    "stabilizer.roll",
    "stabilizer.pitch",
    "stabilizer.yaw",
    "pm.vbat",
];

/// A command accepted by the simulated vehicle
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Setpoint {
        roll: f32,
        pitch: f32,
        yawrate: f32,
        thrust: u16,
    },
    Stop,
    FullState(FullStateSetpoint),
    Arming(bool),
    TakeOff {
        height: f32,
        duration: Duration,
    },
    GoTo {
        position: [f32; 3],
        yaw: f32,
        duration: Duration,
    },
    Land {
        height: f32,
        duration: Duration,
    },
    ParamSet {
        name: String,
        value: Value,
    },
    Closed,
}

impl Sent {
    /// True for a RPYT setpoint with all fields at zero
    pub fn is_zero_setpoint(&self) -> bool {
        matches!(
            self,
            Sent::Setpoint { roll, pitch, yawrate, thrust: 0 }
                if *roll == 0.0 && *pitch == 0.0 && *yawrate == 0.0
        )
    }

    /// Thrust of a RPYT setpoint
    pub fn thrust(&self) -> Option<u16> {
        match self {
            Sent::Setpoint { thrust, .. } => Some(*thrust),
            _ => None,
        }
    }
}

/// Fault injection and capabilities
#[derive(Debug, Clone, Default)]
pub struct SimOptions {
    /// Reject arming requests with [Error::Unsupported]
    pub no_arming: bool,
    /// Number of setpoints accepted before every further send fails
    pub fail_sends_after: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: [f32; 3],
    to: [f32; 3],
    start: Instant,
    duration: Duration,
}

impl Motion {
    fn at(position: [f32; 3]) -> Self {
        Self {
            from: position,
            to: position,
            start: Instant::now(),
            duration: Duration::ZERO,
        }
    }

    fn position(&self, now: Instant) -> [f32; 3] {
        let elapsed = now.saturating_duration_since(self.start);
        if elapsed >= self.duration {
            return self.to;
        }
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        let mut p = [0.0; 3];
        for (i, p) in p.iter_mut().enumerate() {
            *p = self.from[i] + (self.to[i] - self.from[i]) * t;
        }
        p
    }

    fn towards(&self, to: [f32; 3], duration: Duration) -> Self {
        let now = Instant::now();
        Self {
            from: self.position(now),
            to,
            start: now,
            duration,
        }
    }
}

struct SimState {
    journal: Vec<Sent>,
    attempts: usize,
    setpoints: usize,
    user_closed: bool,
    motion: Motion,
    attitude: [f32; 3],
    params: BTreeMap<String, Value>,
    watchers: Vec<flume::Sender<(String, Value)>>,
}

struct Inner {
    options: SimOptions,
    started: Instant,
    state: Mutex<SimState>,
    closed: watch::Sender<Option<String>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_reason(&self) -> Option<String> {
        self.closed.borrow().clone()
    }

    fn check_open(&self) -> Result<()> {
        match self.close_reason() {
            Some(reason) if reason == CLOSED_BY_USER => Err(Error::Disconnected),
            Some(reason) => Err(Error::ConnectionLost(reason)),
            None => Ok(()),
        }
    }

    fn sample(&self, config: &LogConfig) -> LogSample {
        let now = Instant::now();
        let state = self.state();
        let position = state.motion.position(now);
        let data = config
            .variables
            .iter()
            .map(|name| {
                let value = match name.as_str() {
                    "stateEstimate.x" => position[0],
                    "stateEstimate.y" => position[1],
                    "stateEstimate.z" => position[2],
                    "stabilizer.roll" => state.attitude[0],
                    "stabilizer.pitch" => state.attitude[1],
                    "stabilizer.yaw" => state.attitude[2],
                    _ => 4.1,
                };
                (name.clone(), Value::F32(value))
            })
            .collect();

        LogSample {
            timestamp: now.duration_since(self.started).as_millis() as u32,
            block: config.name.clone(),
            data,
        }
    }
}

/// Simulated vehicle
///
/// Cloning gives another handle to the same vehicle.
#[derive(Clone)]
pub struct SimLink {
    inner: Arc<Inner>,
}

impl Default for SimLink {
    fn default() -> Self {
        Self::with_options(SimOptions::default())
    }
}

impl SimLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SimOptions) -> Self {
        let mut params = BTreeMap::new();
        params.insert("stabilizer.estimator".to_owned(), Value::U8(2));
        params.insert("stabilizer.controller".to_owned(), Value::U8(1));
        params.insert("commander.enHighLevel".to_owned(), Value::U8(1));
        params.insert("pid_attitude.yaw_kd".to_owned(), Value::F32(0.35));

        let (closed, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                options,
                started: Instant::now(),
                state: Mutex::new(SimState {
                    journal: Vec::new(),
                    attempts: 0,
                    setpoints: 0,
                    user_closed: false,
                    motion: Motion::at([0.0; 3]),
                    attitude: [0.0; 3],
                    params,
                    watchers: Vec::new(),
                }),
                closed,
            }),
        }
    }

    /// Copy of every command accepted so far, in order
    pub fn journal(&self) -> Vec<Sent> {
        self.inner.state().journal.clone()
    }

    /// Drop the link as if the radio went out of range
    pub fn lose_link(&self, reason: &str) {
        debug!("Simulated link lost: {}", reason);
        self.inner.closed.send_if_modified(|closed| {
            if closed.is_none() {
                *closed = Some(reason.to_owned());
                true
            } else {
                false
            }
        });
    }

    /// Number of setpoint sends attempted, including rejected ones
    pub fn send_attempts(&self) -> usize {
        self.inner.state().attempts
    }

    /// True once the link was lost or closed
    pub fn is_closed(&self) -> bool {
        self.inner.close_reason().is_some()
    }

    /// Current simulated position
    pub fn position(&self) -> [f32; 3] {
        self.inner.state().motion.position(Instant::now())
    }

    fn accept_setpoint(&self, sent: Sent) -> Result<()> {
        self.inner.state().attempts += 1;
        self.inner.check_open()?;
        let mut state = self.inner.state();
        if let Some(limit) = self.inner.options.fail_sends_after {
            if state.setpoints >= limit {
                return Err(Error::SendFailure("simulated radio failure".into()));
            }
        }
        state.setpoints += 1;
        state.journal.push(sent);
        Ok(())
    }

    fn accept(&self, sent: Sent) -> Result<()> {
        self.inner.check_open()?;
        self.inner.state().journal.push(sent);
        Ok(())
    }

    fn move_to(&self, to: [f32; 3], duration: Duration) {
        let mut state = self.inner.state();
        state.motion = state.motion.towards(to, duration);
    }
}

#[async_trait]
impl FlightLink for SimLink {
    async fn send_setpoint(&self, roll: f32, pitch: f32, yawrate: f32, thrust: u16) -> Result<()> {
        self.accept_setpoint(Sent::Setpoint {
            roll,
            pitch,
            yawrate,
            thrust,
        })?;
        let mut state = self.inner.state();
        state.attitude[0] = roll;
        state.attitude[1] = pitch;
        Ok(())
    }

    async fn send_stop_setpoint(&self) -> Result<()> {
        self.accept_setpoint(Sent::Stop)
    }

    async fn send_full_state_setpoint(&self, setpoint: &FullStateSetpoint) -> Result<()> {
        self.accept_setpoint(Sent::FullState(*setpoint))?;
        let mut state = self.inner.state();
        state.motion = Motion::at(setpoint.position);
        state.attitude = quaternion_to_euler(setpoint.orientation);
        Ok(())
    }

    async fn send_arming_request(&self, arm: bool) -> Result<()> {
        if self.inner.options.no_arming {
            return Err(Error::Unsupported("arming"));
        }
        self.accept(Sent::Arming(arm))
    }

    async fn take_off(&self, height: f32, duration: Duration) -> Result<()> {
        self.accept(Sent::TakeOff { height, duration })?;
        let [x, y, _] = self.position();
        self.move_to([x, y, height], duration);
        Ok(())
    }

    async fn go_to(&self, position: [f32; 3], yaw: f32, duration: Duration) -> Result<()> {
        self.accept(Sent::GoTo {
            position,
            yaw,
            duration,
        })?;
        self.move_to(position, duration);
        self.inner.state().attitude[2] = yaw;
        Ok(())
    }

    async fn land(&self, height: f32, duration: Duration) -> Result<()> {
        self.accept(Sent::Land { height, duration })?;
        let [x, y, _] = self.position();
        self.move_to([x, y, height], duration);
        Ok(())
    }

    async fn start_log(&self, config: &LogConfig) -> Result<LogStream> {
        self.inner.check_open()?;
        if config.period.is_zero() {
            return Err(Error::LogError("log period must be non-zero".into()));
        }
        if let Some(unknown) = config
            .variables
            .iter()
            .find(|name| !SIM_LOG_VARIABLES.contains(&name.as_str()))
        {
            return Err(Error::LogError(format!("Log variable {} not found", unknown)));
        }

        let (tx, rx) = flume::unbounded();
        let inner = self.inner.clone();
        let config = config.clone();
        tokio::spawn(async move {
            loop {
                sleep(config.period).await;
                if inner.close_reason().is_some() {
                    break;
                }
                let sample = inner.sample(&config);
                if tx.send_async(sample).await.is_err() {
                    debug!("Log block {} stopped", config.name);
                    break;
                }
            }
        });

        Ok(Box::pin(rx.into_stream()))
    }

    async fn get_param(&self, name: &str) -> Result<Value> {
        self.inner.check_open()?;
        self.inner
            .state()
            .params
            .get(name)
            .copied()
            .ok_or_else(|| Error::ParamError(format!("Param {} not found", name)))
    }

    async fn set_param(&self, name: &str, value: Value) -> Result<()> {
        self.inner.check_open()?;
        let mut state = self.inner.state();
        let current = *state
            .params
            .get(name)
            .ok_or_else(|| Error::ParamError(format!("Param {} not found", name)))?;

        let value = value.cast_lossy(current.into());
        state.params.insert(name.to_owned(), value);
        state.journal.push(Sent::ParamSet {
            name: name.to_owned(),
            value,
        });
        state
            .watchers
            .retain(|watcher| watcher.send((name.to_owned(), value)).is_ok());
        Ok(())
    }

    async fn watch_params(&self) -> ParamWatcher {
        let (tx, rx) = flume::unbounded();
        self.inner.state().watchers.push(tx);
        Box::pin(rx.into_stream())
    }

    async fn close_link(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if state.user_closed {
                return Ok(());
            }
            state.user_closed = true;
            state.journal.push(Sent::Closed);
            // Watchers end with the link
            state.watchers.clear();
        }
        self.lose_link(CLOSED_BY_USER);
        Ok(())
    }

    async fn wait_disconnect(&self) -> String {
        let mut rx = self.inner.closed.subscribe();
        let reason = match rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        reason.unwrap_or_else(|| CLOSED_BY_USER.to_owned())
    }
}

/// Hands out a [SimLink], or fails, on [open_link](Connector::open_link)
pub struct SimConnector {
    link: Option<SimLink>,
    failure: String,
    connect_delay: Duration,
}

impl SimConnector {
    /// Connector that succeeds with `link`
    pub fn new(link: SimLink) -> Self {
        Self {
            link: Some(link),
            failure: String::new(),
            connect_delay: Duration::from_millis(100),
        }
    }

    /// Connector whose connection attempts always fail with `reason`
    pub fn failing(reason: &str) -> Self {
        Self {
            link: None,
            failure: reason.to_owned(),
            connect_delay: Duration::from_millis(100),
        }
    }

    /// Simulated time taken by a connection attempt
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }
}

#[async_trait]
impl Connector for SimConnector {
    async fn open_link(&self, uri: &str) -> Result<Arc<dyn FlightLink>> {
        debug!("Opening simulated link to {}", uri);
        sleep(self.connect_delay).await;
        match &self.link {
            Some(link) if !link.is_closed() => {
                let link: Arc<dyn FlightLink> = Arc::new(link.clone());
                Ok(link)
            }
            Some(_) => Err(Error::ConnectionFailed("simulated link already closed".into())),
            None => Err(Error::ConnectionFailed(self.failure.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn commands_after_close_are_rejected() {
        let link = SimLink::new();
        link.send_setpoint(0.0, 0.0, 0.0, 1000).await.unwrap();
        link.close_link().await.unwrap();
        link.close_link().await.unwrap();

        assert_eq!(
            link.send_setpoint(0.0, 0.0, 0.0, 0).await,
            Err(Error::Disconnected)
        );
        assert_eq!(
            link.journal().iter().filter(|s| **s == Sent::Closed).count(),
            1
        );
        assert_eq!(link.wait_disconnect().await, CLOSED_BY_USER);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_fail_after_configured_count() {
        let link = SimLink::with_options(SimOptions {
            fail_sends_after: Some(2),
            ..SimOptions::default()
        });
        assert!(link.send_stop_setpoint().await.is_ok());
        assert!(link.send_stop_setpoint().await.is_ok());
        assert!(matches!(
            link.send_stop_setpoint().await,
            Err(Error::SendFailure(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_link_reports_reason() {
        let link = SimLink::new();
        let waiter = {
            let link = link.clone();
            tokio::spawn(async move { link.wait_disconnect().await })
        };
        link.lose_link("out of range");
        assert_eq!(waiter.await.unwrap(), "out of range");

        assert_eq!(
            link.send_setpoint(0.0, 0.0, 0.0, 0).await,
            Err(Error::ConnectionLost("out of range".into()))
        );
        assert_eq!(link.send_attempts(), 1);
        assert!(link.journal().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn go_to_moves_the_reported_position() {
        let link = SimLink::new();
        link.go_to([1.0, 0.5, 1.0], 0.0, Duration::from_secs(2))
            .await
            .unwrap();

        sleep(Duration::from_secs(1)).await;
        let [x, _, _] = link.position();
        assert!((x - 0.5).abs() < 1e-3);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(link.position(), [1.0, 0.5, 1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn log_block_streams_requested_variables() {
        let link = SimLink::new();
        let config = LogConfig::new("Stabilizer", Duration::from_millis(10))
            .with_variable("stabilizer.roll")
            .with_variable("stabilizer.pitch");
        let mut stream = link.start_log(&config).await.unwrap();

        let sample = stream.next().await.unwrap();
        assert_eq!(sample.block, "Stabilizer");
        assert_eq!(sample.data.len(), 2);
        assert_eq!(sample.timestamp, 10);

        let bad = LogConfig::new("Bad", Duration::from_millis(10)).with_variable("nope.nope");
        assert!(matches!(
            link.start_log(&bad).await,
            Err(Error::LogError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn param_set_is_cast_and_notified() {
        let link = SimLink::new();
        let mut watcher = link.watch_params().await;

        link.set_param("stabilizer.estimator", Value::F64(1.0))
            .await
            .unwrap();

        assert_eq!(
            watcher.next().await,
            Some(("stabilizer.estimator".to_owned(), Value::U8(1)))
        );
        assert_eq!(
            link.get_param("stabilizer.estimator").await,
            Ok(Value::U8(1))
        );
        assert!(matches!(
            link.set_param("no.such", Value::U8(1)).await,
            Err(Error::ParamError(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_connector_reports_reason() {
        let connector = SimConnector::failing("no radio");
        let err = connector.open_link("radio://0/80/2M").await.err();
        assert_eq!(err, Some(Error::ConnectionFailed("no radio".into())));
    }
}
