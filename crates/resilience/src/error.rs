//! Fault taxonomy and configuration errors
//!
//! Units of work report failures as ordinary `Err` values. Whether a fault is
//! worth retrying is decided by inspecting its [`FaultCategory`], which any
//! error type exposes by implementing [`Classify`].
//!
//! | Category | Retried by default | Typical source |
//! |----------|--------------------|----------------|
//! | `InvalidArgument` | no | malformed prompt, bad request payload |
//! | `InvalidState` | no | call made in the wrong lifecycle phase |
//! | `CircuitOpen` | no | an inner breaker rejected the call |
//! | `Unavailable`, `Network`, `Timeout`, `RateLimited` | yes | backend hiccups |
//! | everything else | yes | |
//!
//! The default terminal set only applies when a policy configures no
//! allow-list; see [`crate::retry::RetryPolicy`] for the full precedence.

use std::fmt;
use std::io;

use thiserror::Error;

/// Boxed error type used as the optional cause of a [`Fault`]
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Policy validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Category of a fault, used for retry classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FaultCategory {
    /// The request itself is malformed; retrying cannot help
    InvalidArgument,
    /// The operation is not valid in the current state
    InvalidState,
    /// Credentials missing, expired or insufficient
    Unauthorized,
    /// The addressed resource does not exist
    NotFound,
    /// The backend throttled the caller
    RateLimited,
    /// The backend did not answer in time
    Timeout,
    /// Connection-level failure
    Network,
    /// The backend reported itself unavailable (5xx, overloaded)
    Unavailable,
    /// A circuit breaker rejected the call without running it
    CircuitOpen,
    /// A circuit breaker abandoned the call at its deadline
    CircuitTimeout,
    /// A retry manager used up its attempts
    RetryExhausted,
    /// The caller cancelled the operation
    Cancelled,
    /// Unexpected internal failure
    Internal,
    /// No better category is known
    Unknown,
}

impl FaultCategory {
    /// Categories treated as terminal when a policy configures no allow-list
    pub const DEFAULT_TERMINAL: [FaultCategory; 3] =
        [FaultCategory::InvalidArgument, FaultCategory::InvalidState, FaultCategory::CircuitOpen];

    /// Whether this category is in [`FaultCategory::DEFAULT_TERMINAL`]
    pub fn is_terminal_by_default(self) -> bool {
        Self::DEFAULT_TERMINAL.contains(&self)
    }

    /// Severity used when logging a fault of this category
    pub fn severity(self) -> ErrorSeverity {
        match self {
            Self::NotFound | Self::Cancelled => ErrorSeverity::Info,
            Self::RateLimited
            | Self::Timeout
            | Self::Network
            | Self::Unavailable
            | Self::CircuitOpen
            | Self::CircuitTimeout => ErrorSeverity::Warning,
            Self::InvalidArgument
            | Self::InvalidState
            | Self::Unauthorized
            | Self::RetryExhausted
            | Self::Unknown => ErrorSeverity::Error,
            Self::Internal => ErrorSeverity::Critical,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidState => "invalid_state",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Unavailable => "unavailable",
            Self::CircuitOpen => "circuit_open",
            Self::CircuitTimeout => "circuit_timeout",
            Self::RetryExhausted => "retry_exhausted",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, expected conditions
    Info,
    /// Degraded but operational
    Warning,
    /// Failure requiring attention
    Error,
    /// System integrity at risk
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Classification of a fault for retry decisions
///
/// Implement this for the error type a unit of work returns so a
/// [`crate::RetryManager`] can tell transient faults from terminal ones.
///
/// ```rust
/// use reelforge_resilience::{Classify, FaultCategory};
///
/// #[derive(Debug)]
/// enum TtsError {
///     VoiceNotFound,
///     Overloaded,
/// }
///
/// impl Classify for TtsError {
///     fn category(&self) -> FaultCategory {
///         match self {
///             Self::VoiceNotFound => FaultCategory::InvalidArgument,
///             Self::Overloaded => FaultCategory::Unavailable,
///         }
///     }
/// }
///
/// assert!(TtsError::VoiceNotFound.category().is_terminal_by_default());
/// assert!(!TtsError::Overloaded.category().is_terminal_by_default());
/// ```
pub trait Classify {
    /// Category of this fault
    fn category(&self) -> FaultCategory;

    /// Severity used for logging
    fn severity(&self) -> ErrorSeverity {
        self.category().severity()
    }
}

impl Classify for io::Error {
    fn category(&self) -> FaultCategory {
        match self.kind() {
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                FaultCategory::InvalidArgument
            }
            io::ErrorKind::NotFound => FaultCategory::NotFound,
            io::ErrorKind::PermissionDenied => FaultCategory::Unauthorized,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FaultCategory::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => FaultCategory::Network,
            io::ErrorKind::Interrupted => FaultCategory::Cancelled,
            _ => FaultCategory::Unknown,
        }
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn category(&self) -> FaultCategory {
        (**self).category()
    }
}

/// A categorized fault with a message and optional cause
///
/// Convenient as the error type of a unit of work when the backend client
/// has no error type of its own.
#[derive(Debug)]
pub struct Fault {
    category: FaultCategory,
    message: String,
    source: Option<BoxedError>,
}

impl Fault {
    /// Create a fault of the given category
    pub fn new<S: Into<String>>(category: FaultCategory, message: S) -> Self {
        Self { category, message: message.into(), source: None }
    }

    /// Malformed request; terminal by default
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(FaultCategory::InvalidArgument, message)
    }

    /// Operation invalid in the current state; terminal by default
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::new(FaultCategory::InvalidState, message)
    }

    /// Backend unavailable; retried by default
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(FaultCategory::Unavailable, message)
    }

    /// Backend timed out; retried by default
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::new(FaultCategory::Timeout, message)
    }

    /// Backend throttled the caller; retried by default
    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::new(FaultCategory::RateLimited, message)
    }

    /// Connection failure; retried by default
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::new(FaultCategory::Network, message)
    }

    /// Attach an underlying cause
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fault: {}", self.category, self.message)
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl Classify for Fault {
    fn category(&self) -> FaultCategory {
        self.category
    }
}

impl From<io::Error> for Fault {
    fn from(err: io::Error) -> Self {
        let category = err.category();
        Self::new(category, err.to_string()).with_source(err)
    }
}
