use thiserror::Error;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
///
/// The first three variants are the lifecycle failures of a session. They are
/// never fatal to the process: the session reacts to all of them by sending
/// a stop burst and releasing the link.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The link could not be opened. The String contains the reason.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The link was lost while connected. The String contains the reason.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// A command could not be sent to the vehicle.
    #[error("send failure: {0}")]
    SendFailure(String),
    /// The link is currently disconnected.
    #[error("disconnected")]
    Disconnected,
    /// The backend does not implement this operation.
    #[error("{0} is not supported by this link")]
    Unsupported(&'static str),
    /// Log subsystem error. The String contains the reason.
    #[error("log error: {0}")]
    LogError(String),
    /// Parameter subsystem error. The String contains the reason.
    #[error("param error: {0}")]
    ParamError(String),
    /// [Value](crate::Value) conversion error. The String contains the reason.
    #[error("conversion error: {0}")]
    ConversionError(String),
    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    ConfigError(String),
    /// Operation timed out.
    #[error("timeout")]
    Timeout,
    /// Terminal could not be configured or read.
    #[error("terminal error: {0}")]
    Terminal(String),
    /// Error reported by the underlying link library.
    #[error("link error: {0}")]
    LinkError(String),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(_: flume::SendError<T>) -> Self {
        self::Error::Disconnected
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        self::Error::Disconnected
    }
}

#[cfg(feature = "radio")]
impl From<crazyflie_lib::Error> for Error {
    fn from(error: crazyflie_lib::Error) -> Self {
        match error {
            crazyflie_lib::Error::Disconnected => Self::Disconnected,
            crazyflie_lib::Error::Timeout => Self::Timeout,
            other => Self::LinkError(format!("{:?}", other)),
        }
    }
}

#[cfg(feature = "radio")]
impl From<crazyflie_link::Error> for Error {
    fn from(error: crazyflie_link::Error) -> Self {
        Self::LinkError(format!("{:?}", error))
    }
}
