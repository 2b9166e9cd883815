//! # Teleoperated throttle controller
//!
//! The controller owns one connection to a vehicle and streams a RPYT setpoint `(0, 0, 0, thrust)` at a fixed rate
//! while the operator steps the thrust up and down. Its life goes like this:
//!
//!  - [TeleopController::start()] opens the link in the background.
//!  - On connection the vehicle is armed, thrust is unlocked with a few zero setpoints, and two tasks start: the
//!    periodic sender and the input listener.
//!  - A `Quit` command, a lost or failed link, a send failure or a call to [TeleopController::shutdown()] all end in
//!    the same shutdown: both tasks are stopped, a burst of zero setpoints is sent and the link is closed.
//!
//! Lifecycle notifications are delivered as messages to a single dispatcher task which calls one handler per
//! transition, see [ConnectionState::next()] for the transition table.
//!
//! The stop burst is there because setpoints are fire-and-forget: a single lost packet must not leave the vehicle
//! with thrust, so the zero setpoint is repeated.
//!
//! ```no_run
//! # async fn run() -> crazyflie_teleop::Result<()> {
//! use std::sync::Arc;
//! use crazyflie_teleop::sim::{SimConnector, SimLink};
//! use crazyflie_teleop::{Command, TeleopConfig, TeleopController};
//!
//! let (commands, input) = flume::unbounded();
//! let connector = Arc::new(SimConnector::new(SimLink::new()));
//! let controller = TeleopController::new(TeleopConfig::default(), connector, input);
//!
//! controller.start("radio://0/80/2M/E7E7E7E7E7");
//! commands.send(Command::Increase)?;
//! commands.send(Command::Quit)?;
//! controller.wait_closed().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::input::Command;
use crate::link::{Connector, FlightLink};
use crate::throttle::ThrottleState;
use crate::{Error, TeleopConfig};

const INPUT_POLL: Duration = Duration::from_millis(100);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Lifecycle notification from the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    ConnectionFailed(String),
    ConnectionLost(String),
}

impl ConnectionState {
    /// State after `event`
    ///
    /// | From | Event | To |
    /// |------|-------|----|
    /// | Connecting | Connected | Connected |
    /// | Connecting | ConnectionFailed | Failed |
    /// | Connecting, Connected | ConnectionLost, Disconnected | Disconnected |
    ///
    /// Any other pair leaves the state unchanged.
    pub fn next(self, event: &LinkEvent) -> ConnectionState {
        use ConnectionState::*;

        match (self, event) {
            (Connecting, LinkEvent::Connected) => Connected,
            (Connecting, LinkEvent::ConnectionFailed(_)) => Failed,
            (Connecting | Connected, LinkEvent::ConnectionLost(_) | LinkEvent::Disconnected) => {
                Disconnected
            }
            (state, _) => state,
        }
    }
}

/// Messages handled by the dispatcher task
#[derive(Debug)]
enum SessionEvent {
    Link(LinkEvent),
    Quit,
    SendFailure(String),
}

/// State shared by the controller handle and its tasks
struct ControlSession {
    config: TeleopConfig,
    connector: Arc<dyn Connector>,
    throttle: ThrottleState,
    state: Mutex<ConnectionState>,
    uri: Mutex<String>,
    started: AtomicBool,
    running: AtomicBool,
    shutting_down: AtomicBool,
    link: Mutex<Option<Arc<dyn FlightLink>>>,
    input: flume::Receiver<Command>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    events: flume::Sender<SessionEvent>,
    event_rx: Mutex<Option<flume::Receiver<SessionEvent>>>,
    closed: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// # Throttle teleoperation session
///
/// Cloning the controller gives another handle to the same session. All methods take `&self`.
#[derive(Clone)]
pub struct TeleopController {
    session: Arc<ControlSession>,
}

impl TeleopController {
    /// Create a session
    ///
    /// `input` is the receiving end of the operator command channel, see
    /// [KeyboardListener](crate::input::KeyboardListener).
    pub fn new(
        config: TeleopConfig,
        connector: Arc<dyn Connector>,
        input: flume::Receiver<Command>,
    ) -> Self {
        let (events, event_rx) = flume::unbounded();
        let (closed, _) = watch::channel(false);
        let throttle = ThrottleState::new(config.throttle);

        Self {
            session: Arc::new(ControlSession {
                uri: Mutex::new(config.uri.clone()),
                config,
                connector,
                throttle,
                state: Mutex::new(ConnectionState::Disconnected),
                started: AtomicBool::new(false),
                running: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                link: Mutex::new(None),
                input,
                tasks: Mutex::new(Vec::new()),
                watcher: Mutex::new(None),
                events,
                event_rx: Mutex::new(Some(event_rx)),
                closed,
            }),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *lock(&self.session.state)
    }

    /// Current thrust
    pub fn thrust(&self) -> u16 {
        self.session.throttle.get()
    }

    /// True while the sender and listener are meant to run
    pub fn is_running(&self) -> bool {
        self.session.running.load(SeqCst)
    }

    /// True once shutdown completed
    pub fn is_closed(&self) -> bool {
        *self.session.closed.borrow()
    }

    /// Wait until shutdown completed
    pub async fn wait_closed(&self) {
        let mut closed = self.session.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Open the link to `uri` in the background
    ///
    /// The outcome is delivered as a [LinkEvent] to the dispatcher. A session connects once: further calls are
    /// ignored. Must be called from within a Tokio runtime.
    pub fn start(&self, uri: &str) {
        if self.session.started.swap(true, SeqCst) {
            warn!("Session already started, ignoring connection request to {}", uri);
            return;
        }
        *lock(&self.session.uri) = uri.to_owned();
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}...", uri);

        if let Some(event_rx) = lock(&self.session.event_rx).take() {
            tokio::spawn(self.clone().dispatch(event_rx));
        }

        let controller = self.clone();
        let uri = uri.to_owned();
        tokio::spawn(async move {
            let event = match controller.session.connector.open_link(&uri).await {
                Ok(link) => controller.attach(link).await,
                Err(e) => Some(LinkEvent::ConnectionFailed(e.to_string())),
            };
            if let Some(event) = event {
                controller.notify(SessionEvent::Link(event));
            }
        });
    }

    /// Handle a successful connection
    ///
    /// Arms the vehicle, unlocks the thrust and starts the periodic sender and the input listener. Calling it again
    /// while the tasks run does nothing.
    pub async fn on_connected(&self) {
        self.apply(&LinkEvent::Connected);
        if self.session.running.swap(true, SeqCst) {
            debug!("Already running, ignoring connected notification");
            return;
        }

        let link = match self.link() {
            Some(link) if !self.session.shutting_down.load(SeqCst) => link,
            _ => {
                self.session.running.store(false, SeqCst);
                return;
            }
        };
        info!("Connected to {}", self.uri());

        match link.send_arming_request(true).await {
            Ok(()) => info!("Arming request sent"),
            Err(Error::Unsupported(_)) => debug!("Vehicle has no arming, skipping"),
            Err(e) => warn!("Arming request failed: {}", e),
        }
        sleep(self.session.config.arm_settle).await;
        if self.session.shutting_down.load(SeqCst) {
            return;
        }

        let config = &self.session.config;
        if let Err(e) = zero_burst(link.as_ref(), config.unlock_count, config.stop_burst_period()).await {
            self.notify(SessionEvent::SendFailure(e.to_string()));
            return;
        }

        let mut tasks = lock(&self.session.tasks);
        if self.session.shutting_down.load(SeqCst) || !self.is_running() {
            return;
        }
        tasks.push(tokio::spawn(self.clone().periodic_send(link)));
        tasks.push(tokio::spawn(self.clone().listen_input()));
        info!("Streaming thrust {} at {} Hz", self.thrust(), config.control_rate_hz);
    }

    /// Apply an operator command
    ///
    /// Commands are only taken into account while the session runs. `Quit` stops the tasks and hands the shutdown
    /// to the dispatcher.
    pub fn on_input_event(&self, command: Command) {
        if !self.is_running() || self.state() != ConnectionState::Connected {
            debug!("Ignoring {:?}, session is not running", command);
            return;
        }

        let throttle = &self.session.throttle;
        match command {
            Command::Increase => {
                let thrust = throttle.increase();
                info!("Thrust increased to {}", thrust);
            }
            Command::Decrease => {
                let thrust = throttle.decrease();
                info!("Thrust decreased to {}", thrust);
            }
            Command::Quit => {
                info!("Quitting...");
                self.session.running.store(false, SeqCst);
                self.notify(SessionEvent::Quit);
            }
        }
    }

    /// Handle a failed connection attempt
    pub async fn on_connection_failed(&self, reason: &str) {
        self.apply(&LinkEvent::ConnectionFailed(reason.to_owned()));
        warn!("Connection to {} failed: {}", self.uri(), reason);
        self.shutdown().await;
    }

    /// Handle a lost connection
    pub async fn on_connection_lost(&self, reason: &str) {
        self.apply(&LinkEvent::ConnectionLost(reason.to_owned()));
        warn!("Connection to {} lost: {}", self.uri(), reason);
        self.shutdown().await;
    }

    /// Handle a link closed on request
    pub fn on_disconnected(&self) {
        self.apply(&LinkEvent::Disconnected);
        self.session.running.store(false, SeqCst);
        info!("Disconnected from {}", self.uri());
    }

    /// Stop the session
    ///
    /// Stops the sender and the listener, sends the stop burst and closes the link. Errors are logged, never
    /// returned. Only the first call does the work, later calls wait for it to complete.
    pub async fn shutdown(&self) {
        let first = {
            let _tasks = lock(&self.session.tasks);
            !self.session.shutting_down.swap(true, SeqCst)
        };
        if !first {
            self.wait_closed().await;
            return;
        }

        info!("Performing safe shutdown...");
        self.session.running.store(false, SeqCst);

        let config = &self.session.config;
        let tasks = std::mem::take(&mut *lock(&self.session.tasks));
        for task in tasks {
            join_bounded(task, config.join_timeout).await;
        }

        let link = lock(&self.session.link).take();
        if let Some(link) = link {
            match zero_burst(link.as_ref(), config.stop_burst_count, config.stop_burst_period()).await {
                Ok(()) => debug!("Stop burst of {} setpoints sent", config.stop_burst_count),
                Err(e) => warn!("Stop burst aborted: {}", e),
            }
            if let Err(e) = link.close_link().await {
                warn!("Error while closing the link: {}", e);
            }
        }

        let watcher = lock(&self.session.watcher).take();
        if let Some(watcher) = watcher {
            join_bounded(watcher, config.join_timeout).await;
        }

        self.apply(&LinkEvent::Disconnected);
        self.session.closed.send_replace(true);
        info!("Session closed");
    }

    // Keep the link and watch it. Returns the event to deliver, if any.
    async fn attach(&self, link: Arc<dyn FlightLink>) -> Option<LinkEvent> {
        if self.session.shutting_down.load(SeqCst) {
            debug!("Connected after shutdown, closing link");
            if let Err(e) = link.close_link().await {
                warn!("Error while closing the link: {}", e);
            }
            return None;
        }

        *lock(&self.session.link) = Some(link.clone());

        let controller = self.clone();
        let watcher = tokio::spawn(async move {
            let reason = link.wait_disconnect().await;
            let event = if controller.session.shutting_down.load(SeqCst) {
                LinkEvent::Disconnected
            } else {
                LinkEvent::ConnectionLost(reason)
            };
            controller.notify(SessionEvent::Link(event));
        });
        *lock(&self.session.watcher) = Some(watcher);

        Some(LinkEvent::Connected)
    }

    async fn dispatch(self, events: flume::Receiver<SessionEvent>) {
        loop {
            tokio::select! {
                event = events.recv_async() => match event {
                    Ok(event) => self.handle(event).await,
                    Err(_) => break,
                },
                _ = self.wait_closed() => break,
            }
        }

        let pending: Vec<_> = events.drain().collect();
        for event in pending {
            self.handle(event).await;
        }
        debug!("Dispatcher stopped");
    }

    async fn handle(&self, event: SessionEvent) {
        debug!("Session event {:?}", event);
        match event {
            SessionEvent::Link(LinkEvent::Connected) => self.on_connected().await,
            SessionEvent::Link(LinkEvent::Disconnected) => self.on_disconnected(),
            SessionEvent::Link(LinkEvent::ConnectionFailed(reason)) => {
                self.on_connection_failed(&reason).await
            }
            SessionEvent::Link(LinkEvent::ConnectionLost(reason)) => {
                self.on_connection_lost(&reason).await
            }
            SessionEvent::Quit => self.shutdown().await,
            SessionEvent::SendFailure(reason) => {
                warn!("Send failure: {}", reason);
                self.shutdown().await
            }
        }
    }

    async fn periodic_send(self, link: Arc<dyn FlightLink>) {
        let period = self.session.config.control_period();
        while self.is_running() {
            let thrust = self.thrust();
            if let Err(e) = link.send_setpoint(0.0, 0.0, 0.0, thrust).await {
                warn!("Control loop error: {}", e);
                self.session.running.store(false, SeqCst);
                self.notify(SessionEvent::SendFailure(e.to_string()));
                break;
            }
            sleep(period).await;
        }
        debug!("Periodic sender stopped");
    }

    async fn listen_input(self) {
        let input = self.session.input.clone();
        while self.is_running() {
            match timeout(INPUT_POLL, input.recv_async()).await {
                Ok(Ok(command)) => self.on_input_event(command),
                Ok(Err(_)) => {
                    debug!("Operator input closed");
                    break;
                }
                Err(_) => (),
            }
        }
        debug!("Input listener stopped");
    }

    fn notify(&self, event: SessionEvent) {
        if self.session.events.send(event).is_err() {
            debug!("Dispatcher gone, event dropped");
        }
    }

    fn apply(&self, event: &LinkEvent) {
        let mut state = lock(&self.session.state);
        let next = state.next(event);
        if next != *state {
            info!("Link state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.session.state);
        info!("Link state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn link(&self) -> Option<Arc<dyn FlightLink>> {
        lock(&self.session.link).clone()
    }

    fn uri(&self) -> String {
        lock(&self.session.uri).clone()
    }
}

/// Send `count` zero setpoints `period` apart, stopping at the first failure
async fn zero_burst(link: &dyn FlightLink, count: u32, period: Duration) -> crate::Result<()> {
    for _ in 0..count {
        link.send_setpoint(0.0, 0.0, 0.0, 0).await?;
        sleep(period).await;
    }
    Ok(())
}

async fn join_bounded(mut task: JoinHandle<()>, limit: Duration) {
    if timeout(limit, &mut task).await.is_err() {
        warn!("Task did not stop within {:?}, aborting it", limit);
        task.abort();
    }
}
