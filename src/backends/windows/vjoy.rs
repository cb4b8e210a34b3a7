#![cfg(target_os = "windows")]

//! vJoy through `vJoyInterface.dll`.
//!
//! The library is loaded at runtime with `libloading`, first from beside the
//! running module (where installers drop it) and then from the default DLL
//! search path. Every entry point is resolved once at load time; a missing
//! symbol fails the load rather than a later call.
//!
//! Device ids here are vJoy's 1-based `rID`s.

use crate::backends::joystick::JoystickDriver;
use crate::error::BackendError;
use crate::slots::SlotState;
use libloading::Library;
use tracing::{debug, warn};

pub const LIBRARY_NAME: &str = "vJoyInterface.dll";

type FnEnabled = unsafe extern "C" fn() -> i32;
type FnDriverMatch = unsafe extern "C" fn(*mut u16, *mut u16) -> i32;
type FnStatus = unsafe extern "C" fn(u32) -> i32;
type FnAcquire = unsafe extern "C" fn(u32) -> i32;
type FnRelinquish = unsafe extern "C" fn(u32);
type FnReset = unsafe extern "C" fn(u32) -> i32;
type FnButtonNumber = unsafe extern "C" fn(u32) -> i32;
type FnAxisExist = unsafe extern "C" fn(u32, u32) -> i32;
type FnSetBtn = unsafe extern "C" fn(i32, u32, u8) -> i32;
type FnSetAxis = unsafe extern "C" fn(i32, u32, u32) -> i32;

// VjdStat
const VJD_STAT_OWN: i32 = 0;
const VJD_STAT_FREE: i32 = 1;

struct Api {
    enabled: FnEnabled,
    driver_match: FnDriverMatch,
    status: FnStatus,
    acquire: FnAcquire,
    relinquish: FnRelinquish,
    reset: FnReset,
    button_number: FnButtonNumber,
    axis_exist: FnAxisExist,
    set_btn: FnSetBtn,
    set_axis: FnSetAxis,
}

/// Loaded `vJoyInterface.dll`.
pub struct VjoyLibrary {
    api: Api,
    // Keeps the function pointers above valid.
    _lib: Library,
}

impl VjoyLibrary {
    /// Load the library beside the module, falling back to the DLL search path.
    pub fn load() -> Result<Self, BackendError> {
        let beside = crate::install::module_dir().map(|d| d.join(LIBRARY_NAME));
        let lib = beside
            .as_ref()
            .filter(|p| p.is_file())
            // SAFETY: vJoyInterface.dll has no initialisation side effects in DllMain.
            .and_then(|p| unsafe { Library::new(p) }.ok())
            .map_or_else(|| unsafe { Library::new(LIBRARY_NAME) }, Ok)
            .map_err(|e| BackendError::Library(format!("{LIBRARY_NAME}: {e}")))?;

        // SAFETY: the signatures match vJoyInterface.h; pointers stay valid while `_lib` lives.
        let api = unsafe {
            Api {
                enabled: *lib.get::<FnEnabled>(b"vJoyEnabled\0").map_err(symbol)?,
                driver_match: *lib.get::<FnDriverMatch>(b"DriverMatch\0").map_err(symbol)?,
                status: *lib.get::<FnStatus>(b"GetVJDStatus\0").map_err(symbol)?,
                acquire: *lib.get::<FnAcquire>(b"AcquireVJD\0").map_err(symbol)?,
                relinquish: *lib.get::<FnRelinquish>(b"RelinquishVJD\0").map_err(symbol)?,
                reset: *lib.get::<FnReset>(b"ResetVJD\0").map_err(symbol)?,
                button_number: *lib
                    .get::<FnButtonNumber>(b"GetVJDButtonNumber\0")
                    .map_err(symbol)?,
                axis_exist: *lib.get::<FnAxisExist>(b"GetVJDAxisExist\0").map_err(symbol)?,
                set_btn: *lib.get::<FnSetBtn>(b"SetBtn\0").map_err(symbol)?,
                set_axis: *lib.get::<FnSetAxis>(b"SetAxis\0").map_err(symbol)?,
            }
        };
        debug!("vJoy interface library loaded");
        Ok(Self { api, _lib: lib })
    }

    /// Driver enabled and the DLL version matches the driver version.
    pub fn driver_ready(&self) -> bool {
        let (mut dll, mut drv) = (0u16, 0u16);
        // SAFETY: plain FFI calls with valid out-pointers.
        unsafe {
            if (self.api.enabled)() == 0 {
                return false;
            }
            if (self.api.driver_match)(&mut dll, &mut drv) == 0 {
                warn!(dll, driver = drv, "vJoy library and driver versions differ");
                return false;
            }
        }
        true
    }
}

fn symbol(err: libloading::Error) -> BackendError {
    BackendError::Library(format!("missing vJoy symbol: {err}"))
}

/// [`JoystickDriver`] over a loaded library. Absent library means "not enabled".
#[derive(Default)]
pub struct VjoyDriver {
    lib: Option<VjoyLibrary>,
}

impl VjoyDriver {
    pub fn load() -> Self {
        match VjoyLibrary::load() {
            Ok(lib) => Self { lib: Some(lib) },
            Err(err) => {
                debug!(error = %err, "vJoy unavailable");
                Self { lib: None }
            }
        }
    }
}

impl JoystickDriver for VjoyDriver {
    fn enabled(&self) -> bool {
        self.lib.as_ref().is_some_and(VjoyLibrary::driver_ready)
    }

    fn status(&self, rid: u32) -> SlotState {
        let Some(lib) = &self.lib else {
            return SlotState::Unavailable;
        };
        // SAFETY: FFI call with a plain integer argument.
        match unsafe { (lib.api.status)(rid) } {
            VJD_STAT_FREE => SlotState::Free,
            VJD_STAT_OWN => SlotState::Owned,
            _ => SlotState::Unavailable,
        }
    }

    fn acquire(&mut self, rid: u32) -> bool {
        // SAFETY: FFI call with a plain integer argument.
        self.lib
            .as_ref()
            .is_some_and(|lib| unsafe { (lib.api.acquire)(rid) } != 0)
    }

    fn relinquish(&mut self, rid: u32) {
        if let Some(lib) = &self.lib {
            // SAFETY: FFI call with a plain integer argument.
            unsafe { (lib.api.relinquish)(rid) }
        }
    }

    fn reset(&mut self, rid: u32) -> bool {
        // SAFETY: FFI call with a plain integer argument.
        self.lib
            .as_ref()
            .is_some_and(|lib| unsafe { (lib.api.reset)(rid) } != 0)
    }

    fn button_count(&self, rid: u32) -> u8 {
        let Some(lib) = &self.lib else {
            return 0;
        };
        // SAFETY: FFI call with a plain integer argument.
        let n = unsafe { (lib.api.button_number)(rid) };
        u8::try_from(n.clamp(0, 128)).unwrap_or(0)
    }

    fn axis_exists(&self, rid: u32, usage: u32) -> bool {
        // SAFETY: FFI call with plain integer arguments.
        self.lib
            .as_ref()
            .is_some_and(|lib| unsafe { (lib.api.axis_exist)(rid, usage) } != 0)
    }

    fn set_button(&mut self, rid: u32, button: u8, down: bool) -> bool {
        // SAFETY: FFI call with plain integer arguments.
        self.lib
            .as_ref()
            .is_some_and(|lib| unsafe { (lib.api.set_btn)(i32::from(down), rid, button) } != 0)
    }

    fn set_axis(&mut self, rid: u32, usage: u32, value: i32) -> bool {
        // SAFETY: FFI call with plain integer arguments.
        self.lib
            .as_ref()
            .is_some_and(|lib| unsafe { (lib.api.set_axis)(value, rid, usage) } != 0)
    }
}
