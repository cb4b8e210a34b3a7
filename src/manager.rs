//! Live-device registry and per-device handles.
//!
//! A [`Registry`] owns one backend and every device created through it. It is
//! the only shared state in the crate: `create` and `destroy` are serialized
//! through its mutexes, and dropping the last `Registry` clone destroys every
//! device still alive. [`global`] is a lazily initialised process-wide registry
//! over the platform backend; [`shutdown`] drains it.
//!
//! ## Handles
//! [`ControllerHandle`] is a cheap clone of one device. Mutators validate the
//! index and value through the device's [`Layout`] and then push the change
//! through the backend before returning. On a destroyed handle they do nothing
//! and return `Ok(())`. `destroy` is idempotent.
//!
//! ```no_run
//! let registry = stickpad::global();
//! if registry.is_supported() || registry.install().wait() {
//!     let pad = registry.create()?;
//!     pad.button_down(0)?; // A
//!     pad.set_axis(0, -1.0)?; // left stick full left
//!     pad.button_up(0)?;
//!     pad.destroy();
//! }
//! # Ok::<(), stickpad::ControllerError>(())
//! ```

use crate::backends::{self, BackendKind, IdentityScheme, VirtualDeviceBackend};
use crate::config::{InstallerSettings, Settings};
use crate::device::{DeviceId, VirtualPad};
use crate::error::ControllerError;
use crate::event::ChannelDesc;
use crate::install::{InstallTask, InstallationState, Installer};
use crate::mapping::Layout;
use crate::report::Report;
use crate::slots::DynamicIds;
use futures::channel::oneshot;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info, warn};

struct Shared {
    backend: Mutex<Box<dyn VirtualDeviceBackend>>,
    devices: Mutex<Vec<ControllerHandle>>,
    ids: Mutex<DynamicIds>,
    install: Arc<Mutex<InstallProgress>>,
    installer: InstallerSettings,
}

/// Installation state plus callers waiting on the run in flight.
#[derive(Default)]
struct InstallProgress {
    state: InstallationState,
    waiters: Vec<oneshot::Sender<bool>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let devices = std::mem::take(self.devices.get_mut());
        if !devices.is_empty() {
            debug!(count = devices.len(), "registry dropped; destroying live devices");
        }
        for handle in devices {
            handle.destroy();
        }
    }
}

/// Owner of a backend and the devices created through it.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Shared>,
}

impl Registry {
    /// Registry over `backend` with default installer settings.
    pub fn new(backend: Box<dyn VirtualDeviceBackend>) -> Self {
        Self::with_installer(backend, InstallerSettings::default())
    }

    pub fn with_installer(backend: Box<dyn VirtualDeviceBackend>, installer: InstallerSettings) -> Self {
        Self {
            inner: Arc::new(Shared {
                backend: Mutex::new(backend),
                devices: Mutex::new(Vec::new()),
                ids: Mutex::new(DynamicIds::new()),
                install: Arc::new(Mutex::new(InstallProgress::default())),
                installer,
            }),
        }
    }

    /// Registry over the platform backend configured by `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_installer(backends::platform(settings), settings.installer.clone())
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.inner.backend.lock().kind()
    }

    pub fn layout(&self) -> Layout {
        self.inner.backend.lock().layout()
    }

    /// Controls devices from this registry accept.
    pub fn describe(&self) -> Vec<ChannelDesc> {
        self.inner.backend.lock().describe()
    }

    /// Probe the OS facility. Never panics; any failure is `false`.
    pub fn is_supported(&self) -> bool {
        let supported = self.inner.backend.lock().is_supported();
        let mut progress = self.inner.install.lock();
        if progress.state != InstallationState::Installing {
            progress.state = InstallationState::from_probe(supported);
        }
        supported
    }

    pub fn installation_state(&self) -> InstallationState {
        self.inner.install.lock().state
    }

    /// Installer for this registry's backend with the configured settings.
    pub fn installer(&self) -> Installer {
        let host = self.inner.backend.lock().install_host();
        Installer::new(host, &self.inner.installer)
    }

    /// Install or repair the driver on a background thread.
    pub fn install(&self) -> InstallTask {
        self.install_with(self.installer())
    }

    /// Run a specific installer, tracking its progress in [`installation_state`](Self::installation_state).
    ///
    /// While a run is in flight, further calls wait for that run instead of
    /// launching another one; `installer` is then unused.
    pub fn install_with(&self, installer: Installer) -> InstallTask {
        {
            let mut progress = self.inner.install.lock();
            if progress.state == InstallationState::Installing {
                debug!("installation already in progress; waiting for it");
                let (tx, task) = InstallTask::channel();
                progress.waiters.push(tx);
                return task;
            }
            progress.state = InstallationState::Installing;
        }
        let progress = self.inner.install.clone();
        installer.spawn_then(move |result| {
            let waiters = {
                let mut progress = progress.lock();
                progress.state = match result {
                    Ok(_) => InstallationState::Installed,
                    Err(_) => InstallationState::Failed,
                };
                std::mem::take(&mut progress.waiters)
            };
            for tx in waiters {
                let _ = tx.send(result.is_ok());
            }
        })
    }

    /// Create one device.
    ///
    /// Fails with [`ControllerError::DriverUnavailable`] when the facility is
    /// absent and [`ControllerError::Exhausted`] when no slot is free.
    pub fn create(&self) -> Result<ControllerHandle, ControllerError> {
        let mut backend = self.inner.backend.lock();
        let mut ids = self.inner.ids.lock();
        let pad = backend.create(ids.peek())?;
        if backend.identity_scheme() == IdentityScheme::Dynamic {
            ids.advance();
        }
        drop(ids);
        drop(backend);

        let handle = ControllerHandle {
            cell: Arc::new(DeviceCell {
                id: pad.id(),
                layout: pad.layout(),
                pad: Mutex::new(Some(pad)),
                registry: Arc::downgrade(&self.inner),
            }),
        };
        info!(id = %handle.id(), "virtual controller created");
        self.inner.devices.lock().push(handle.clone());
        Ok(handle)
    }

    /// Live devices in creation order.
    pub fn list(&self) -> Vec<ControllerHandle> {
        self.inner.devices.lock().clone()
    }

    /// Look up a live device by id.
    pub fn get(&self, id: DeviceId) -> Option<ControllerHandle> {
        self.inner
            .devices
            .lock()
            .iter()
            .find(|h| h.id() == id)
            .cloned()
    }

    /// Destroy every live device. The registry stays usable.
    pub fn shutdown(&self) {
        let devices = std::mem::take(&mut *self.inner.devices.lock());
        if !devices.is_empty() {
            info!(count = devices.len(), "destroying all virtual controllers");
        }
        for handle in devices {
            handle.destroy();
        }
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry over the platform backend.
///
/// Initialised on first use from the settings file at
/// [`Settings::default_path`] (defaults if absent or unreadable).
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(|| {
        let path = Settings::default_path();
        let settings = Settings::load(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), error = %err, "ignoring unreadable settings");
            Settings::default()
        });
        Registry::from_settings(&settings)
    })
}

/// Destroy every device in the global registry, if it was ever initialised.
pub fn shutdown() {
    if let Some(registry) = GLOBAL.get() {
        registry.shutdown();
    }
}

struct DeviceCell {
    id: DeviceId,
    layout: Layout,
    pad: Mutex<Option<Box<dyn VirtualPad>>>,
    registry: Weak<Shared>,
}

/// One virtual device. Clones share the device.
#[derive(Clone)]
pub struct ControllerHandle {
    cell: Arc<DeviceCell>,
}

impl std::fmt::Debug for ControllerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("id", &self.cell.id)
            .field("layout", &self.cell.layout)
            .field("active", &self.is_active())
            .finish()
    }
}

impl PartialEq for ControllerHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for ControllerHandle {}

impl ControllerHandle {
    /// 0-based public identity.
    pub fn id(&self) -> DeviceId {
        self.cell.id
    }

    pub fn layout(&self) -> Layout {
        self.cell.layout
    }

    pub fn is_active(&self) -> bool {
        self.cell.pad.lock().is_some()
    }

    pub fn button_down(&self, index: i64) -> Result<(), ControllerError> {
        self.set_button(index, true)
    }

    pub fn button_up(&self, index: i64) -> Result<(), ControllerError> {
        self.set_button(index, false)
    }

    fn set_button(&self, index: i64, pressed: bool) -> Result<(), ControllerError> {
        let mut guard = self.cell.pad.lock();
        let Some(pad) = guard.as_mut() else {
            return Ok(());
        };
        let button = self.cell.layout.button(index)?;
        pad.set_button(button, pressed)
    }

    /// Move one axis. `value` must lie inside the layout's domain.
    pub fn set_axis(&self, index: i64, value: f64) -> Result<(), ControllerError> {
        let mut guard = self.cell.pad.lock();
        let Some(pad) = guard.as_mut() else {
            return Ok(());
        };
        let axis = self.cell.layout.axis(index, value)?;
        pad.set_axis(axis, value)
    }

    /// Last committed report, or `None` once destroyed.
    pub fn report(&self) -> Option<Report> {
        self.cell.pad.lock().as_ref().map(|p| p.report())
    }

    pub fn describe(&self) -> Vec<ChannelDesc> {
        match self.cell.pad.lock().as_ref() {
            Some(pad) => pad.describe(),
            None => crate::event::describe(self.cell.layout, None),
        }
    }

    /// Release the device and drop it from its registry. Idempotent.
    pub fn destroy(&self) {
        {
            let mut guard = self.cell.pad.lock();
            let Some(mut pad) = guard.take() else {
                return;
            };
            pad.release();
        }
        if let Some(shared) = self.cell.registry.upgrade() {
            shared.devices.lock().retain(|h| h != self);
        }
        info!(id = %self.cell.id, "virtual controller destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{JoystickBackend, JoystickDriver, Unsupported};
    use crate::backends::{XusbBackend, XusbDriver, XusbTarget};
    use crate::config::{ArtifactSource, RetryPolicy};
    use crate::error::{BackendError, InstallError};
    use crate::install::{
        InstallHost, InstallerProcess, Launch, LaunchRequest, Preinstalled, ProcessExit,
    };
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;
    use crate::mapping::GamepadAxis;
    use crate::metadata::DeviceIdentity;
    use crate::report::XusbReport;
    use crate::slots::SlotState;

    #[derive(Default)]
    struct Bus {
        plugged: u32,
        unplugged: u32,
        reject: bool,
    }

    #[derive(Clone, Default)]
    struct FakeBus(Arc<Mutex<Bus>>);

    struct Target(Arc<Mutex<Bus>>);

    impl XusbDriver for FakeBus {
        fn is_present(&self) -> bool {
            true
        }
        fn connect(&mut self, _identity: &DeviceIdentity) -> Result<Box<dyn XusbTarget>, BackendError> {
            self.0.lock().plugged += 1;
            Ok(Box::new(Target(self.0.clone())))
        }
    }

    impl XusbTarget for Target {
        fn submit(&mut self, _report: &XusbReport) -> Result<(), BackendError> {
            if self.0.lock().reject {
                Err(BackendError::rejected("update"))
            } else {
                Ok(())
            }
        }
        fn unplug(&mut self) {
            self.0.lock().unplugged += 1;
        }
    }

    fn registry() -> (Registry, Arc<Mutex<Bus>>) {
        let bus = FakeBus::default();
        let state = bus.0.clone();
        let backend = XusbBackend::new(bus, DeviceIdentity::default(), Arc::new(Preinstalled));
        (Registry::new(Box::new(backend)), state)
    }

    #[test]
    fn destroyed_devices_keep_survivor_ids() {
        let (reg, _) = registry();
        let handles: Vec<_> = (0..3).map(|_| reg.create().unwrap()).collect();
        handles[1].destroy();

        let ids: Vec<_> = reg.list().iter().map(ControllerHandle::id).collect();
        assert_eq!(ids, vec![DeviceId(0), DeviceId(2)]);

        // counter identities are not reused
        assert_eq!(reg.create().unwrap().id(), DeviceId(3));
    }

    #[test]
    fn destroy_is_idempotent_and_isolated() {
        let (reg, bus) = registry();
        let a = reg.create().unwrap();
        let b = reg.create().unwrap();
        a.destroy();
        a.destroy();
        assert!(!a.is_active());
        assert!(b.is_active());
        assert_eq!(bus.lock().unplugged, 1);
        assert_eq!(reg.list(), vec![b]);
    }

    #[test]
    fn mutators_on_destroyed_handle_do_nothing() {
        let (reg, _) = registry();
        let pad = reg.create().unwrap();
        let clone = pad.clone();
        pad.destroy();
        assert!(clone.button_down(0).is_ok());
        assert!(clone.set_axis(0, 0.5).is_ok());
        assert!(clone.report().is_none());
    }

    #[test]
    fn validation_happens_before_the_backend() {
        let (reg, _) = registry();
        let pad = reg.create().unwrap();
        for idx in [6, 7, 17, 32, -1] {
            assert!(pad.button_down(idx).unwrap_err().is_range_error(), "{idx}");
        }
        assert!(pad.set_axis(6, 0.0).unwrap_err().is_range_error());
        assert!(pad.set_axis(0, 1.5).unwrap_err().is_range_error());
        assert_eq!(pad.report().unwrap().button_bits(), 0);
    }

    #[test]
    fn backend_failure_keeps_device_active() {
        let (reg, bus) = registry();
        let pad = reg.create().unwrap();
        pad.set_axis(GamepadAxis::LeftX as i64, 1.0).unwrap();
        let before = pad.report();

        bus.lock().reject = true;
        let err = pad.button_down(0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Backend);
        assert!(pad.is_active());
        assert_eq!(pad.report(), before);
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn shutdown_and_drop_release_everything() {
        let (reg, bus) = registry();
        for _ in 0..3 {
            reg.create().unwrap();
        }
        let survivor = reg.list()[0].clone();
        reg.shutdown();
        assert!(reg.list().is_empty());
        assert!(!survivor.is_active());
        assert_eq!(bus.lock().unplugged, 3);

        let late = reg.create().unwrap();
        drop(reg);
        assert!(!late.is_active());
        assert_eq!(bus.lock().unplugged, 4);
        // destroying after the registry is gone is still fine
        late.destroy();
    }

    #[test]
    fn unsupported_platform_cannot_create() {
        let reg = Registry::new(Box::new(Unsupported));
        assert!(!reg.is_supported());
        assert_eq!(reg.installation_state(), InstallationState::NotInstalled);
        assert!(matches!(
            reg.create(),
            Err(ControllerError::DriverUnavailable)
        ));
        assert!(!reg.install().wait());
        assert_eq!(reg.installation_state(), InstallationState::Failed);
    }

    #[test]
    fn install_when_present_resolves_true() {
        let (reg, _) = registry();
        let installer = reg.installer().with_policy(RetryPolicy::immediate(1));
        assert!(futures::executor::block_on(reg.install_with(installer)));
        assert_eq!(reg.installation_state(), InstallationState::Installed);
    }

    struct SlowInstall {
        installed: Arc<AtomicBool>,
        launches: AtomicU32,
    }

    struct SlowProcess(Arc<AtomicBool>);

    impl InstallerProcess for SlowProcess {
        fn wait_timeout(&mut self, _timeout: Duration) -> std::io::Result<Option<ProcessExit>> {
            std::thread::sleep(Duration::from_millis(150));
            self.0.store(true, Ordering::SeqCst);
            Ok(Some(ProcessExit::Code(0)))
        }
    }

    impl InstallHost for SlowInstall {
        fn is_installed(&self) -> bool {
            self.installed.load(Ordering::SeqCst)
        }
        fn launch_elevated(&self, _request: &LaunchRequest) -> Result<Launch, InstallError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Launch::Process(Box::new(SlowProcess(self.installed.clone()))))
        }
    }

    #[test]
    fn overlapping_installs_share_one_run() {
        let host = Arc::new(SlowInstall {
            installed: Arc::new(AtomicBool::new(false)),
            launches: AtomicU32::new(0),
        });
        let backend = XusbBackend::new(FakeBus::default(), DeviceIdentity::default(), host.clone());
        let settings = InstallerSettings {
            artifact: ArtifactSource::System("setup".to_string()),
            ..InstallerSettings::default()
        };
        let reg = Registry::with_installer(Box::new(backend), settings);
        let installer = reg.installer().with_policy(RetryPolicy::immediate(3));

        let first = reg.install_with(installer.clone());
        let second = reg.install_with(installer.clone());
        assert_eq!(reg.installation_state(), InstallationState::Installing);
        assert!(second.wait());
        assert!(first.wait());
        assert_eq!(host.launches.load(Ordering::SeqCst), 1);
        assert_eq!(reg.installation_state(), InstallationState::Installed);

        // a later call is a fresh run that finds the driver present
        assert!(reg.install_with(installer).wait());
        assert_eq!(host.launches.load(Ordering::SeqCst), 1);
    }

    struct AllFree;

    impl JoystickDriver for AllFree {
        fn enabled(&self) -> bool {
            true
        }
        fn status(&self, _rid: u32) -> SlotState {
            SlotState::Free
        }
        fn acquire(&mut self, _rid: u32) -> bool {
            true
        }
        fn relinquish(&mut self, _rid: u32) {}
        fn reset(&mut self, _rid: u32) -> bool {
            true
        }
        fn button_count(&self, _rid: u32) -> u8 {
            128
        }
        fn axis_exists(&self, _rid: u32, _usage: u32) -> bool {
            true
        }
        fn set_button(&mut self, _rid: u32, _button: u8, _down: bool) -> bool {
            true
        }
        fn set_axis(&mut self, _rid: u32, _usage: u32, _value: i32) -> bool {
            true
        }
    }

    #[test]
    fn fixed_slot_ids_come_from_the_backend() {
        let reg = Registry::new(Box::new(JoystickBackend::new(AllFree, Arc::new(Preinstalled))));
        let a = reg.create().unwrap();
        let b = reg.create().unwrap();
        assert_eq!((a.id(), b.id()), (DeviceId(0), DeviceId(1)));
        a.destroy();
        // freed slot is reused
        assert_eq!(reg.create().unwrap().id(), DeviceId(0));
        assert_eq!(reg.get(DeviceId(1)), Some(b));
    }
}
