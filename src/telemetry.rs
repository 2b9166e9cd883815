//! # Telemetry and parameters
//!
//! Helpers around the log and parameter services of a [FlightLink]: streaming a log block for a while, reading a
//! single sample and stepping a parameter through values while watching the change notifications.
//!
//! Log blocks are stopped by dropping their [LogStream](crate::link::LogStream), every helper here does so before
//! returning.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use log::info;
use tokio::time::{sleep, timeout_at, Instant};

use crate::link::{FlightLink, LogConfig, LogSample};
use crate::{Error, Result, Value};

/// Roll, pitch and yaw sampled every 10ms
pub fn stabilizer_log_config() -> LogConfig {
    LogConfig::new("Stabilizer", Duration::from_millis(10))
        .with_variable("stabilizer.roll")
        .with_variable("stabilizer.pitch")
        .with_variable("stabilizer.yaw")
}

/// Stream a log block for `duration`, handing each sample to `callback`
///
/// Returns the number of samples delivered.
pub async fn log_async<F>(
    link: &dyn FlightLink,
    config: &LogConfig,
    duration: Duration,
    mut callback: F,
) -> Result<usize>
where
    F: FnMut(&LogSample),
{
    let mut stream = link.start_log(config).await?;
    let deadline = Instant::now() + duration;

    let mut delivered = 0;
    while let Ok(Some(sample)) = timeout_at(deadline, stream.next()).await {
        callback(&sample);
        delivered += 1;
    }

    info!("Log block {} stopped after {} samples", config.name, delivered);
    Ok(delivered)
}

/// Start a log block and return its first sample
pub async fn log_first(link: &dyn FlightLink, config: &LogConfig) -> Result<LogSample> {
    let mut stream = link.start_log(config).await?;
    stream
        .next()
        .await
        .ok_or_else(|| Error::LogError(format!("Log block {} ended without data", config.name)))
}

/// Set `name` to each of `values` in turn, `dwell` apart
///
/// The first value is set after one `dwell` and the function returns one `dwell` after the last. Returns the change
/// notifications received for `name` meanwhile.
pub async fn toggle_param(
    link: &dyn FlightLink,
    name: &str,
    values: &[Value],
    dwell: Duration,
) -> Result<Vec<(String, Value)>> {
    // Fails early on unknown names
    link.get_param(name).await?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut watcher = link.watch_params().await;
    let watched = name.to_owned();
    let seen_task = seen.clone();
    let task = tokio::spawn(async move {
        while let Some((name, value)) = watcher.next().await {
            if name == watched {
                info!("Parameter {} updated to {}", name, value);
                seen_task
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((name, value));
            }
        }
    });

    let result = set_in_turn(link, name, values, dwell).await;
    task.abort();
    result?;

    let seen = std::mem::take(&mut *seen.lock().unwrap_or_else(PoisonError::into_inner));
    Ok(seen)
}

async fn set_in_turn(
    link: &dyn FlightLink,
    name: &str,
    values: &[Value],
    dwell: Duration,
) -> Result<()> {
    for value in values {
        sleep(dwell).await;
        link.set_param(name, *value).await?;
    }
    sleep(dwell).await;
    Ok(())
}

/// Keep the link open for `duration`, then close it
pub async fn hold_connection(link: &dyn FlightLink, duration: Duration) -> Result<()> {
    info!("Connected, holding the link for {:?}", duration);
    sleep(duration).await;
    info!("Disconnecting");
    link.close_link().await
}

/// Demonstration run by the `log_param` binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demo {
    /// Hold the connection for 3 seconds
    Connect,
    /// Print the first stabilizer sample
    Log,
    /// Print stabilizer samples for 5 seconds
    LogAsync,
    /// Toggle `stabilizer.estimator` between 2 and 1
    Param,
}

impl std::str::FromStr for Demo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connect" => Ok(Demo::Connect),
            "log" => Ok(Demo::Log),
            "log-async" => Ok(Demo::LogAsync),
            "param" => Ok(Demo::Param),
            other => Err(Error::ConfigError(format!("unknown demonstration '{}'", other))),
        }
    }
}

/// Run `demo`, printing to stdout, then close the link whatever the outcome
pub async fn run_demo(link: &dyn FlightLink, demo: Demo) -> Result<()> {
    let stabilizer = stabilizer_log_config();
    let result = match demo {
        Demo::Connect => {
            println!("Connected!");
            sleep(Duration::from_secs(3)).await;
            Ok(())
        }
        Demo::Log => log_first(link, &stabilizer)
            .await
            .map(|sample| println!("{}", sample)),
        Demo::LogAsync => log_async(link, &stabilizer, Duration::from_secs(5), |sample| {
            println!("{}", sample)
        })
        .await
        .map(|_| ()),
        Demo::Param => toggle_param(
            link,
            "stabilizer.estimator",
            &[Value::U8(2), Value::U8(1)],
            Duration::from_secs(1),
        )
        .await
        .map(|changes| {
            for (name, value) in changes {
                println!("Parameter {} updated to {}", name, value);
            }
        }),
    };

    let closed = link.close_link().await;
    if demo == Demo::Connect {
        println!("Disconnected");
    }
    result.and(closed)
}
