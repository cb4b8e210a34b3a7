#![cfg(target_os = "windows")]

//! Elevated installer launch through `ShellExecuteExW` with the `runas` verb.
//!
//! The window is hidden and the process handle is requested with
//! `SEE_MASK_NOCLOSEPROCESS`. `runas` does not always hand one back; that case
//! is reported as [`Launch::Detached`] rather than as a failure.

use crate::error::InstallError;
use crate::install::{InstallHost, InstallerProcess, Launch, LaunchRequest, ProcessExit};
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::time::Duration;
use tracing::debug;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_CANCELLED, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Threading::{GetExitCodeProcess, WaitForSingleObject};
use windows_sys::Win32::UI::Shell::{
    ShellExecuteExW, SEE_MASK_FLAG_NO_UI, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW,
};
use windows_sys::Win32::UI::WindowsAndMessaging::SW_HIDE;

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Quote one argument for the Windows command line.
fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('"', "\\\""))
}

/// Install host that elevates with UAC and checks availability with `check`.
pub struct ElevatedHost {
    check: Box<dyn Fn() -> bool + Send + Sync>,
}

impl ElevatedHost {
    pub fn new(check: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            check: Box::new(check),
        }
    }
}

impl InstallHost for ElevatedHost {
    fn is_installed(&self) -> bool {
        (self.check)()
    }

    fn launch_elevated(&self, request: &LaunchRequest) -> Result<Launch, InstallError> {
        let verb = wide(OsStr::new("runas"));
        let file = wide(request.program.as_os_str());
        let params = wide(OsStr::new(
            &request
                .args
                .iter()
                .map(|a| quote(a))
                .collect::<Vec<_>>()
                .join(" "),
        ));
        let dir = request.working_dir.as_deref().map(|d| wide(d.as_os_str()));

        // SAFETY: all-zero is a valid SHELLEXECUTEINFOW; string buffers outlive the call.
        let mut info: SHELLEXECUTEINFOW = unsafe { std::mem::zeroed() };
        info.cbSize = std::mem::size_of::<SHELLEXECUTEINFOW>() as u32;
        info.fMask = SEE_MASK_NOCLOSEPROCESS | SEE_MASK_FLAG_NO_UI;
        info.lpVerb = verb.as_ptr();
        info.lpFile = file.as_ptr();
        info.lpParameters = params.as_ptr();
        info.lpDirectory = dir.as_ref().map_or(std::ptr::null(), |d| d.as_ptr());
        info.nShow = SW_HIDE as i32;

        // SAFETY: `info` is fully initialised above.
        if unsafe { ShellExecuteExW(&mut info) } == 0 {
            // SAFETY: reads the calling thread's last-error value.
            let code = unsafe { GetLastError() };
            if code == ERROR_CANCELLED {
                return Err(InstallError::UserCancelled);
            }
            return Err(InstallError::Launch(io::Error::from_raw_os_error(code as i32)));
        }

        if info.hProcess.is_null() {
            debug!("runas returned no process handle");
            return Ok(Launch::Detached);
        }
        Ok(Launch::Process(Box::new(ElevatedProcess(info.hProcess))))
    }
}

struct ElevatedProcess(HANDLE);

// SAFETY: a process handle may be waited on and closed from any thread.
unsafe impl Send for ElevatedProcess {}

impl InstallerProcess for ElevatedProcess {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ProcessExit>> {
        let ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        // SAFETY: `self.0` is a live process handle owned by this value.
        match unsafe { WaitForSingleObject(self.0, ms) } {
            WAIT_OBJECT_0 => {
                let mut code = 0u32;
                // SAFETY: valid handle and out-pointer.
                if unsafe { GetExitCodeProcess(self.0, &mut code) } == 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(Some(ProcessExit::Code(code as i32)))
            }
            WAIT_TIMEOUT => Ok(None),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

impl Drop for ElevatedProcess {
    fn drop(&mut self) {
        // SAFETY: closes the handle this value owns, exactly once.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_are_quoted_only_when_needed() {
        assert_eq!(quote("/VERYSILENT"), "/VERYSILENT");
        assert_eq!(quote("C:\\Program Files\\x"), "\"C:\\Program Files\\x\"");
        assert_eq!(quote(""), "\"\"");
    }
}
