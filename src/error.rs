//! Error types.
//!
//! Three families with different propagation rules:
//! - [`ControllerError`] is returned synchronously by `create()` and by every
//!   handle mutator. Validation variants are raised before anything is written,
//!   so the device state is untouched when one is returned.
//! - [`InstallError`] stays inside the installer. The public `install()` future
//!   collapses it to `false`, but the variant is logged and available through
//!   [`Installer::run`](crate::install::Installer::run) for diagnostics.
//! - [`ConfigError`] covers loading and saving [`Settings`](crate::config::Settings).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`ControllerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad index or value; nothing was written.
    Validation,
    /// Every slot is taken.
    ResourceExhausted,
    /// A slot looked free but claiming it failed.
    AcquireFailed,
    /// The OS facility is absent or unusable.
    DriverUnavailable,
    /// The driver rejected an otherwise valid write.
    Backend,
}

/// Errors raised by device creation and by [`ControllerHandle`](crate::ControllerHandle) mutators.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("button index {0} is out of range")]
    ButtonOutOfRange(i64),

    #[error("button index {0} is reserved")]
    ReservedButton(i64),

    #[error("axis index {0} is out of range")]
    AxisOutOfRange(i64),

    #[error("axis value {value} is outside {min}..={max}")]
    AxisValueOutOfRange { value: f64, min: f64, max: f64 },

    #[error("axis {0} is not present on this device")]
    AxisUnavailable(u8),

    #[error("virtual device driver is not available")]
    DriverUnavailable,

    #[error("all {0} device slots are in use")]
    Exhausted(usize),

    #[error("failed to acquire device slot {slot}")]
    AcquireFailed { slot: u32 },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::ButtonOutOfRange(_)
            | ControllerError::ReservedButton(_)
            | ControllerError::AxisOutOfRange(_)
            | ControllerError::AxisValueOutOfRange { .. }
            | ControllerError::AxisUnavailable(_) => ErrorKind::Validation,
            ControllerError::Exhausted(_) => ErrorKind::ResourceExhausted,
            ControllerError::AcquireFailed { .. } => ErrorKind::AcquireFailed,
            ControllerError::DriverUnavailable => ErrorKind::DriverUnavailable,
            ControllerError::Backend(_) => ErrorKind::Backend,
        }
    }

    /// `true` for index/value range violations.
    pub fn is_range_error(&self) -> bool {
        matches!(
            self,
            ControllerError::ButtonOutOfRange(_)
                | ControllerError::ReservedButton(_)
                | ControllerError::AxisOutOfRange(_)
                | ControllerError::AxisValueOutOfRange { .. }
        )
    }
}

/// Failures reported by a native driver layer.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("driver rejected {op}")]
    Rejected { op: &'static str },

    #[error("helper bridge: {0}")]
    Bridge(String),

    #[error("driver library: {0}")]
    Library(String),
}

impl BackendError {
    pub fn rejected(op: &'static str) -> Self {
        BackendError::Rejected { op }
    }
}

/// Why an installation attempt did not end with a usable driver.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("installer did not exit within {0:?}")]
    Timeout(Duration),

    #[error("elevation request was cancelled by the user")]
    UserCancelled,

    #[error("driver still unavailable after {attempts} verification attempts")]
    VerificationFailed { attempts: u32 },

    #[error("installer artifact not found at {0}")]
    ArtifactNotFound(PathBuf),

    #[error("failed to launch installer: {0}")]
    Launch(#[source] std::io::Error),

    #[error("driver installation is not supported on this platform")]
    Unsupported,
}

/// Errors loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
}
