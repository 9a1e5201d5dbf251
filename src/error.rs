//! Error types
//!
//! Only [`DeviceError`] is fatal to a capture session. Transport errors are
//! fatal to a single subscriber and never leave its session.

use std::fmt;
use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// `start` called while a session is already running
    AlreadyRunning,
    /// Session parameters rejected (zero channels or sample rate)
    InvalidParams(String),
    /// Capture device failure
    Device(DeviceError),
    /// Socket-level failure (bind, accept)
    Io(io::Error),
    /// Subscriber rejected because the registry is full
    SubscriberLimit(usize),
    /// Subscriber rejected because the session is shutting down
    RegistryClosed,
    /// Transport failure on a subscriber connection
    Transport(TransportError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyRunning => write!(f, "Bridge is already running"),
            Error::InvalidParams(msg) => write!(f, "Invalid session parameters: {}", msg),
            Error::Device(e) => write!(f, "Device error: {}", e),
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::SubscriberLimit(max) => write!(f, "Subscriber limit reached ({})", max),
            Error::RegistryClosed => write!(f, "Subscriber registry is closed"),
            Error::Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Device(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Error::Device(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

/// Capture device failure. Ends the capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No input device available
    NoInputDevice,
    /// Device does not support the requested configuration
    Unsupported(String),
    /// Failed to build or start the input stream
    StreamBuild(String),
    /// Backend reported an unrecoverable stream error
    Stream(String),
    /// Device went away while capturing
    Disconnected,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NoInputDevice => write!(f, "No audio input device found"),
            DeviceError::Unsupported(msg) => write!(f, "Unsupported device configuration: {}", msg),
            DeviceError::StreamBuild(msg) => write!(f, "Failed to build input stream: {}", msg),
            DeviceError::Stream(msg) => write!(f, "Input stream failed: {}", msg),
            DeviceError::Disconnected => write!(f, "Input device disconnected"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Failure delivering to one subscriber. Closes that subscriber only.
#[derive(Debug)]
pub enum TransportError {
    /// Peer closed the connection
    Closed,
    /// Socket error
    Io(io::Error),
    /// WebSocket protocol error
    WebSocket(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "Connection closed"),
            TransportError::Io(e) => write!(f, "IO error: {}", e),
            TransportError::WebSocket(msg) => write!(f, "WebSocket error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
            WsError::Io(io) => TransportError::Io(io),
            other => TransportError::WebSocket(other.to_string()),
        }
    }
}
