//! Settings and retry policy.
//!
//! [`Settings`] is persisted as TOML (default location
//! `~/.config/stickpad/stickpad.toml`). Every field has a default, so a
//! missing file or a partial file both load cleanly.
//!
//! ```toml
//! [device]
//! name = "Virtual Xbox 360 Controller"
//! vendor_id = 1118
//! product_id = 654
//!
//! [installer]
//! artifact = { bundled = "vigem_driver/ViGEmBus_Setup.exe" }
//! max_attempts = 10
//! interval_ms = 500
//! ```

use crate::backends::{self, BackendKind};
use crate::error::ConfigError;
use crate::metadata::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device: DeviceIdentity,
    pub installer: InstallerSettings,
    pub uinput: UinputSettings,
}

/// Where the driver installer lives and how patiently to wait for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    pub artifact: ArtifactSource,
    pub args: Vec<String>,
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub process_timeout_secs: u64,
    pub detached_grace_secs: u64,
}

/// How the installer program is located.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Shipped next to the running module; the path is relative to its directory.
    Bundled(PathBuf),
    /// A system program resolved through `PATH`.
    System(String),
    /// Nothing to run; the facility is expected to be present already.
    None,
}

/// Defaults for the platform backend, so the artifact installs what
/// [`backends::platform`] probes for.
impl Default for InstallerSettings {
    fn default() -> Self {
        Self::for_backend(backends::PLATFORM_KIND)
    }
}

impl InstallerSettings {
    /// Installer defaults that provide the facility `kind` runs on.
    pub fn for_backend(kind: BackendKind) -> Self {
        let (artifact, args) = match kind {
            BackendKind::Xusb => (
                ArtifactSource::Bundled(PathBuf::from("vigem_driver").join("ViGEmBus_Setup.exe")),
                vec!["/qn".to_string(), "/norestart".to_string()],
            ),
            BackendKind::Joystick => (
                ArtifactSource::Bundled(PathBuf::from("vjoy_driver").join("vJoyInstall.exe")),
                vec![
                    "/VERYSILENT".to_string(),
                    "/SUPPRESSMSGBOXES".to_string(),
                    "/NORESTART".to_string(),
                ],
            ),
            BackendKind::Uinput => (
                ArtifactSource::System("modprobe".to_string()),
                vec!["uinput".to_string()],
            ),
            BackendKind::Helper => (ArtifactSource::None, Vec::new()),
        };
        Self {
            artifact,
            args,
            max_attempts: 10,
            interval_ms: 500,
            process_timeout_secs: 300,
            detached_grace_secs: 60,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            interval: Duration::from_millis(self.interval_ms),
            process_timeout: Duration::from_secs(self.process_timeout_secs),
            detached_grace: Duration::from_secs(self.detached_grace_secs),
        }
    }
}

/// Event-stream backend tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UinputSettings {
    /// Pause after device creation so udev and readers can pick the node up.
    pub settle_delay_ms: u64,
}

impl Default for UinputSettings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 100,
        }
    }
}

impl UinputSettings {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Bounded waiting used by the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Verification attempts after the installer exits.
    pub max_attempts: u32,
    /// Pause before each verification attempt.
    pub interval: Duration,
    /// Upper bound on waiting for the installer process.
    pub process_timeout: Duration,
    /// Wait applied when the elevation mechanism returns no process handle.
    pub detached_grace: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        InstallerSettings::default().retry_policy()
    }
}

impl RetryPolicy {
    /// Zero-delay policy with `attempts` verification attempts.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            interval: Duration::ZERO,
            process_timeout: Duration::ZERO,
            detached_grace: Duration::ZERO,
        }
    }

    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }
}

impl Settings {
    /// Default settings file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stickpad")
            .join("stickpad.toml")
    }

    /// Load settings from a file, or return defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_installer_protocol() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.process_timeout, Duration::from_secs(300));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let text = r#"
[device]
name = "Test Pad"

[installer]
max_attempts = 3
"#;
        let settings: Settings = toml::from_str(text).unwrap();
        assert_eq!(settings.device.name, "Test Pad");
        assert_eq!(settings.device.vendor_id, 0x045e);
        assert_eq!(settings.installer.max_attempts, 3);
        assert_eq!(settings.installer.interval_ms, 500);
        assert_eq!(settings.uinput.settle_delay_ms, 100);
    }

    #[test]
    fn artifact_source_parses() {
        let text = r#"
[installer]
artifact = { bundled = "drivers/setup.exe" }
"#;
        let settings: Settings = toml::from_str(text).unwrap();
        assert_eq!(
            settings.installer.artifact,
            ArtifactSource::Bundled(PathBuf::from("drivers/setup.exe"))
        );
    }

    #[test]
    fn roundtrip() {
        let settings = Settings::default();
        let text = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("stickpad-does-not-exist").join("none.toml");
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn default_installer_matches_platform_backend() {
        let backend = backends::platform(&Settings::default());
        assert_eq!(backend.kind(), backends::PLATFORM_KIND);
        assert_eq!(
            InstallerSettings::default(),
            InstallerSettings::for_backend(backend.kind())
        );
    }

    #[test]
    fn each_backend_installs_its_own_driver() {
        let bundled = |kind| match InstallerSettings::for_backend(kind).artifact {
            ArtifactSource::Bundled(path) => path,
            other => panic!("{kind:?}: {other:?}"),
        };
        assert!(bundled(BackendKind::Xusb).ends_with("ViGEmBus_Setup.exe"));
        assert!(bundled(BackendKind::Joystick).ends_with("vJoyInstall.exe"));
        assert_eq!(
            InstallerSettings::for_backend(BackendKind::Uinput).artifact,
            ArtifactSource::System("modprobe".to_string())
        );
        assert_eq!(
            InstallerSettings::for_backend(BackendKind::Helper).artifact,
            ArtifactSource::None
        );
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }
}
