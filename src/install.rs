//! Privileged driver installation.
//!
//! [`Installer::spawn`] runs the protocol below on a background thread and
//! resolves an [`InstallTask`] to `true`/`false`. [`Installer::run`] is the
//! same protocol on the calling thread, returning the failure kind.
//!
//! 1. Already installed at the required version: succeed without elevating.
//! 2. Resolve the installer relative to the running module's directory.
//! 3. Launch it elevated, silent, with a hidden window.
//! 4. Wait for exit, bounded by [`RetryPolicy::process_timeout`].
//! 5. A rejected elevation prompt ends the attempt at once (no retry).
//! 6. After exit, poll availability up to [`RetryPolicy::max_attempts`] times,
//!    [`RetryPolicy::interval`] apart, to absorb asynchronous registration.
//!
//! Some elevation mechanisms launch the installer without handing back a
//! process handle ([`Launch::Detached`]). That is not a failure: the installer
//! is given [`RetryPolicy::detached_grace`] and then verified the same way.
//!
//! Re-running after a successful install is cheap and safe: step 1 short-circuits.

use crate::config::{ArtifactSource, InstallerSettings, RetryPolicy};
use crate::error::InstallError;
use futures::channel::oneshot;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// How an installer process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Code(i32),
    /// The elevation wrapper reported that the user refused.
    Cancelled,
}

/// A running elevated installer.
pub trait InstallerProcess: Send {
    /// Wait up to `timeout`. `Ok(None)` means it is still running.
    fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ProcessExit>>;
}

/// Result of asking the OS to run something elevated.
pub enum Launch {
    Process(Box<dyn InstallerProcess>),
    /// Launched, but no handle came back.
    Detached,
}

/// Platform side of installation.
pub trait InstallHost: Send + Sync {
    /// Is the facility present at the required version?
    fn is_installed(&self) -> bool;

    /// Launch `request` with elevation. A refused prompt is
    /// [`InstallError::UserCancelled`].
    fn launch_elevated(&self, request: &LaunchRequest) -> Result<Launch, InstallError>;
}

/// Host for platforms where the facility ships with the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct Preinstalled;

impl InstallHost for Preinstalled {
    fn is_installed(&self) -> bool {
        true
    }

    fn launch_elevated(&self, _request: &LaunchRequest) -> Result<Launch, InstallError> {
        Err(InstallError::Unsupported)
    }
}

/// Successful outcomes, kept apart for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    /// Verified on the given attempt.
    Installed { attempts: u32 },
}

/// One installation run.
#[derive(Clone)]
pub struct Installer {
    host: Arc<dyn InstallHost>,
    artifact: ArtifactSource,
    args: Vec<String>,
    policy: RetryPolicy,
    module_dir: Option<PathBuf>,
}

impl Installer {
    pub fn new(host: Arc<dyn InstallHost>, settings: &InstallerSettings) -> Self {
        Self {
            host,
            artifact: settings.artifact.clone(),
            args: settings.args.clone(),
            policy: settings.retry_policy(),
            module_dir: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve bundled artifacts against `dir` instead of the executable's directory.
    pub fn with_module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.module_dir = Some(dir.into());
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run the whole protocol on this thread.
    pub fn run(&self) -> Result<InstallOutcome, InstallError> {
        if self.host.is_installed() {
            info!("driver already installed; skipping elevation");
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let request = self.resolve()?;
        info!(program = %request.program.display(), "launching driver installer");

        match self.host.launch_elevated(&request)? {
            Launch::Process(mut process) => {
                match process
                    .wait_timeout(self.policy.process_timeout)
                    .map_err(InstallError::Launch)?
                {
                    None => {
                        warn!(timeout = ?self.policy.process_timeout, "installer did not exit in time");
                        return Err(InstallError::Timeout(self.policy.process_timeout));
                    }
                    Some(ProcessExit::Cancelled) => {
                        info!("elevation cancelled by user");
                        return Err(InstallError::UserCancelled);
                    }
                    Some(ProcessExit::Code(0)) => debug!("installer exited cleanly"),
                    // Installers use non-zero codes for "reboot required" and the like;
                    // verification decides.
                    Some(ProcessExit::Code(code)) => warn!(code, "installer exited with non-zero status"),
                }
            }
            Launch::Detached => {
                debug!(grace = ?self.policy.detached_grace, "no process handle; waiting before verification");
                std::thread::sleep(self.policy.detached_grace);
            }
        }

        self.verify()
    }

    fn verify(&self) -> Result<InstallOutcome, InstallError> {
        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            std::thread::sleep(self.policy.interval);
            if self.host.is_installed() {
                info!(attempt, "driver installation verified");
                return Ok(InstallOutcome::Installed { attempts: attempt });
            }
            debug!(attempt, "driver not yet available");
        }
        warn!(attempts, "driver still unavailable after installer finished");
        Err(InstallError::VerificationFailed { attempts })
    }

    fn resolve(&self) -> Result<LaunchRequest, InstallError> {
        match &self.artifact {
            ArtifactSource::Bundled(relative) => {
                let dir = match &self.module_dir {
                    Some(dir) => dir.clone(),
                    None => module_dir().ok_or_else(|| InstallError::ArtifactNotFound(relative.clone()))?,
                };
                let program = resolve_artifact(&dir, relative)?;
                Ok(LaunchRequest {
                    working_dir: program.parent().map(Path::to_path_buf),
                    program,
                    args: self.args.clone(),
                })
            }
            ArtifactSource::System(name) => Ok(LaunchRequest {
                program: PathBuf::from(name),
                args: self.args.clone(),
                working_dir: None,
            }),
            ArtifactSource::None => Err(InstallError::Unsupported),
        }
    }

    /// Run on a background thread; the task resolves to `true` on success.
    pub fn spawn(self) -> InstallTask {
        self.spawn_then(|_| {})
    }

    /// Like [`spawn`](Self::spawn), calling `then` with the detailed result
    /// on the worker before the task resolves.
    ///
    /// If the worker thread cannot be started, `then` runs on the calling
    /// thread with [`InstallError::Launch`] and the task resolves to `false`.
    pub fn spawn_then<F>(self, then: F) -> InstallTask
    where
        F: FnOnce(&Result<InstallOutcome, InstallError>) + Send + 'static,
    {
        self.spawn_with(
            |job| {
                std::thread::Builder::new()
                    .name("stickpad-install".to_string())
                    .spawn(job)
                    .map(drop)
            },
            then,
        )
    }

    fn spawn_with<S, F>(self, spawner: S, then: F) -> InstallTask
    where
        S: FnOnce(Box<dyn FnOnce() + Send>) -> std::io::Result<()>,
        F: FnOnce(&Result<InstallOutcome, InstallError>) + Send + 'static,
    {
        let (tx, task) = InstallTask::channel();
        let then = Arc::new(Mutex::new(Some(then)));
        let worker_then = then.clone();
        let job: Box<dyn FnOnce() + Send> = Box::new(move || {
            let result = self.run();
            match &result {
                Ok(outcome) => debug!(?outcome, "install finished"),
                Err(err) => warn!(error = %err, "install failed"),
            }
            if let Some(then) = worker_then.lock().take() {
                then(&result);
            }
            // The caller may have dropped the task; nobody to tell.
            let _ = tx.send(result.is_ok());
        });
        if let Err(err) = spawner(job) {
            warn!(error = %err, "failed to start install worker");
            if let Some(then) = then.lock().take() {
                then(&Err(InstallError::Launch(err)));
            }
        }
        task
    }
}

/// Coarse installation status tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallationState {
    /// Not probed yet.
    #[default]
    Unknown,
    Installed,
    NotInstalled,
    Installing,
    /// The last installation attempt failed.
    Failed,
}

impl InstallationState {
    pub fn from_probe(supported: bool) -> Self {
        if supported {
            InstallationState::Installed
        } else {
            InstallationState::NotInstalled
        }
    }
}

/// Directory of the running executable.
pub fn module_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Join `relative` onto `dir` and check the result exists.
pub fn resolve_artifact(dir: &Path, relative: &Path) -> Result<PathBuf, InstallError> {
    if relative.is_absolute() {
        warn!(path = %relative.display(), "installer artifact configured with an absolute path");
    }
    let path = dir.join(relative);
    if path.is_file() {
        Ok(path)
    } else {
        Err(InstallError::ArtifactNotFound(path))
    }
}

/// Pending installation. Resolves to `false` on any failure, never panics.
#[must_use = "an install task does nothing observable unless awaited"]
pub struct InstallTask {
    rx: oneshot::Receiver<bool>,
}

impl InstallTask {
    /// A task that is already finished.
    pub fn ready(value: bool) -> Self {
        let (tx, task) = Self::channel();
        let _ = tx.send(value);
        task
    }

    /// A task resolved by whoever holds the sender.
    pub(crate) fn channel() -> (oneshot::Sender<bool>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Block the current thread until the installer finishes.
    pub fn wait(self) -> bool {
        futures::executor::block_on(self)
    }
}

impl Future for InstallTask {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        // A dropped sender means the worker died before reporting.
        self.rx.poll_unpin(cx).map(|res| res.unwrap_or(false))
    }
}
