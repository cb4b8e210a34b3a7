#![cfg(target_os = "linux")]

//! Loading the uinput module through `pkexec`.
//!
//! `pkexec` shows the polkit prompt. It exits with 126 when the user dismisses
//! the dialog and 127 when authorization is refused; both mean the user said no.

use super::evdev_sink::UINPUT_NODES;
use crate::error::InstallError;
use crate::install::{InstallHost, InstallerProcess, Launch, LaunchRequest, ProcessExit};
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// Is `uinput` listed in a `/proc/modules`-formatted text?
pub fn module_listed(modules: &str) -> bool {
    modules
        .lines()
        .any(|line| line.split_whitespace().next() == Some("uinput"))
}

fn module_loaded() -> bool {
    std::fs::read_to_string("/proc/modules")
        .map(|text| module_listed(&text))
        .unwrap_or(false)
}

/// Install host that loads the kernel module with `pkexec`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PkexecHost;

impl InstallHost for PkexecHost {
    fn is_installed(&self) -> bool {
        // Built-in uinput has no module entry but still has a node.
        module_loaded() || UINPUT_NODES.iter().any(|n| Path::new(n).exists())
    }

    fn launch_elevated(&self, request: &LaunchRequest) -> Result<Launch, InstallError> {
        let mut cmd = Command::new("pkexec");
        cmd.arg(&request.program)
            .args(&request.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn().map_err(InstallError::Launch)?;
        debug!(pid = child.id(), "pkexec started");
        Ok(Launch::Process(Box::new(PkexecProcess(child))))
    }
}

struct PkexecProcess(Child);

impl InstallerProcess for PkexecProcess {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ProcessExit>> {
        let Some(status) = self.0.wait_timeout(timeout)? else {
            let _ = self.0.kill();
            let _ = self.0.wait();
            return Ok(None);
        };
        Ok(Some(match status.code() {
            Some(126 | 127) => ProcessExit::Cancelled,
            Some(code) => ProcessExit::Code(code),
            // Killed by a signal.
            None => ProcessExit::Code(-1),
        }))
    }
}
