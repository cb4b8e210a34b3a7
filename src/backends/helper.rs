//! Helper-delegated backend.
//!
//! The platform helper owns the actual HID device objects; this side only
//! holds the helper's opaque device id and forwards calls. The helper is a
//! child process speaking line-delimited JSON on stdin/stdout:
//!
//! ```text
//! -> {"op":"create","name":"Virtual Xbox 360 Controller","vendor_id":1118,"product_id":654}
//! <- {"ok":true,"id":1}
//! -> {"op":"button_down","id":1,"button":0}
//! <- {"ok":true}
//! -> {"op":"set_axis","id":1,"axis":4,"value":32767}
//! <- {"ok":true}
//! ```
//!
//! A negative id from `create` means the helper could not create the device.
//! A helper that stops answering is killed and restarted on the next call;
//! devices created before the restart fail every later call.
//! Axis values are sent in the signed 16-bit stick range for every axis; the
//! helper narrows triggers itself.

use super::{BackendKind, IdentityScheme, VirtualDeviceBackend};
use crate::device::{DeviceId, VirtualPad};
use crate::error::{BackendError, ControllerError};
use crate::install::InstallHost;
use crate::mapping::{encode_stick, Axis, Button, Layout};
use crate::metadata::DeviceIdentity;
use crate::report::{PadReport, Report, ReportStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use tracing::{debug, warn};

/// File name of the helper executable shipped beside the module.
pub const HELPER_NAME: &str = "gamepad-helper";

/// One call into the helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Create {
        name: String,
        vendor_id: u16,
        product_id: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        serial: Option<String>,
    },
    Destroy {
        id: i64,
    },
    ButtonDown {
        id: i64,
        button: i64,
    },
    ButtonUp {
        id: i64,
        button: i64,
    },
    SetAxis {
        id: i64,
        axis: i64,
        value: i32,
    },
}

/// The helper's answer to one [`Request`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Transport to the helper.
pub trait HelperBridge: Send {
    /// Is the helper present (and whatever it needs from the OS)?
    fn is_available(&self) -> bool;

    /// Send one request and wait for its reply.
    fn call(&mut self, request: &Request) -> Result<Reply, BackendError>;

    /// Bumped whenever the helper loses every device it owned (a restart).
    /// Helper ids handed out under an older generation are dead.
    fn generation(&self) -> u64 {
        0
    }
}

/// Line-delimited JSON over any writer/reader pair.
pub struct StdioBridge<W, R> {
    writer: W,
    reader: R,
    line: String,
}

impl<W: Write, R: BufRead> StdioBridge<W, R> {
    pub fn new(writer: W, reader: R) -> Self {
        Self {
            writer,
            reader,
            line: String::new(),
        }
    }

    pub fn exchange(&mut self, request: &Request) -> Result<Reply, BackendError> {
        let mut out =
            serde_json::to_string(request).map_err(|e| BackendError::Bridge(e.to_string()))?;
        out.push('\n');
        self.writer.write_all(out.as_bytes())?;
        self.writer.flush()?;

        self.line.clear();
        if self.reader.read_line(&mut self.line)? == 0 {
            return Err(BackendError::Bridge("helper closed its output".to_string()));
        }
        serde_json::from_str(self.line.trim_end())
            .map_err(|e| BackendError::Bridge(format!("malformed reply: {e}")))
    }
}

/// The helper executable, started on first use.
pub struct ProcessBridge {
    program: PathBuf,
    running: Option<(Child, StdioBridge<ChildStdin, BufReader<ChildStdout>>)>,
    generation: u64,
}

impl ProcessBridge {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            running: None,
            generation: 0,
        }
    }

    /// Helper located next to the running executable.
    pub fn beside_module() -> Self {
        let dir = crate::install::module_dir().unwrap_or_default();
        Self::new(dir.join(HELPER_NAME))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn start(&mut self) -> Result<&mut StdioBridge<ChildStdin, BufReader<ChildStdout>>, BackendError> {
        if self.running.is_none() {
            let mut child = Command::new(&self.program)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()?;
            let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                let _ = child.kill();
                return Err(BackendError::Bridge("helper stdio unavailable".to_string()));
            };
            debug!(program = %self.program.display(), pid = child.id(), "helper started");
            self.running = Some((child, StdioBridge::new(stdin, BufReader::new(stdout))));
        }
        match self.running.as_mut() {
            Some((_, bridge)) => Ok(bridge),
            None => Err(BackendError::Bridge("helper not running".to_string())),
        }
    }
}

impl HelperBridge for ProcessBridge {
    fn is_available(&self) -> bool {
        self.program.is_file()
    }

    fn call(&mut self, request: &Request) -> Result<Reply, BackendError> {
        let result = self.start()?.exchange(request);
        if result.is_err() {
            // Restart on the next call rather than talk to a wedged process.
            if let Some((mut child, _)) = self.running.take() {
                let _ = child.kill();
                let _ = child.wait();
                self.generation += 1;
                warn!(generation = self.generation, "helper killed; its devices are gone");
            }
        }
        result
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        if let Some((mut child, bridge)) = self.running.take() {
            // Closing stdin tells the helper to tear down its devices.
            drop(bridge);
            let _ = child.wait();
        }
    }
}

pub struct HelperBackend<B> {
    bridge: Arc<Mutex<B>>,
    identity: DeviceIdentity,
    host: Arc<dyn InstallHost>,
}

impl<B: HelperBridge> HelperBackend<B> {
    pub fn new(bridge: B, identity: DeviceIdentity, host: Arc<dyn InstallHost>) -> Self {
        Self {
            bridge: Arc::new(Mutex::new(bridge)),
            identity,
            host,
        }
    }
}

impl<B: HelperBridge + 'static> VirtualDeviceBackend for HelperBackend<B> {
    fn kind(&self) -> BackendKind {
        BackendKind::Helper
    }

    fn layout(&self) -> Layout {
        Layout::Gamepad
    }

    fn identity_scheme(&self) -> IdentityScheme {
        IdentityScheme::Dynamic
    }

    fn is_supported(&self) -> bool {
        self.bridge.lock().is_available()
    }

    fn install_host(&self) -> Arc<dyn InstallHost> {
        self.host.clone()
    }

    fn create(&mut self, next_id: DeviceId) -> Result<Box<dyn VirtualPad>, ControllerError> {
        let mut bridge = self.bridge.lock();
        if !bridge.is_available() {
            return Err(ControllerError::DriverUnavailable);
        }
        let reply = bridge.call(&Request::Create {
            name: self.identity.name.clone(),
            vendor_id: self.identity.vendor_id,
            product_id: self.identity.product_id,
            serial: self.identity.serial.clone(),
        })?;
        let helper_id = match reply.id {
            Some(id) if reply.ok && id >= 0 => id,
            _ => {
                warn!(error = ?reply.error, "helper could not create a device");
                return Err(BackendError::rejected("create").into());
            }
        };
        let generation = bridge.generation();
        drop(bridge);

        debug!(id = %next_id, helper_id, generation, "helper device created");
        Ok(Box::new(HelperPad {
            id: next_id,
            helper_id,
            generation,
            bridge: Some(self.bridge.clone()),
            store: ReportStore::new(),
        }))
    }
}

struct HelperPad<B: HelperBridge> {
    id: DeviceId,
    helper_id: i64,
    generation: u64,
    bridge: Option<Arc<Mutex<B>>>,
    store: ReportStore<PadReport>,
}

impl<B: HelperBridge> HelperPad<B> {
    fn forward(
        &mut self,
        request: Request,
        op: &'static str,
        mutate: impl FnOnce(&mut PadReport),
    ) -> Result<(), ControllerError> {
        let Some(bridge) = self.bridge.as_ref() else {
            return Err(BackendError::rejected("call on destroyed device").into());
        };
        let (id, generation) = (self.id, self.generation);
        self.store.update(mutate, |_| {
            let mut bridge = bridge.lock();
            if bridge.generation() != generation {
                warn!(%id, op, "helper restarted since this device was created");
                let lost = BackendError::Bridge("helper restarted; device lost".to_string());
                return Err(ControllerError::from(lost));
            }
            let reply = bridge.call(&request)?;
            if reply.ok {
                Ok(())
            } else {
                warn!(%id, op, error = ?reply.error, "helper rejected call");
                Err(ControllerError::from(BackendError::rejected(op)))
            }
        })
    }

    fn destroy(&mut self) {
        let Some(bridge) = self.bridge.take() else {
            return;
        };
        let mut bridge = bridge.lock();
        if bridge.generation() != self.generation {
            debug!(id = %self.id, "helper restarted; nothing to destroy");
            return;
        }
        let result = bridge.call(&Request::Destroy { id: self.helper_id });
        match result {
            Ok(reply) if reply.ok => debug!(id = %self.id, "helper device destroyed"),
            Ok(_) => warn!(id = %self.id, "helper did not know the device"),
            Err(err) => warn!(id = %self.id, error = %err, "helper destroy failed"),
        }
    }
}

impl<B: HelperBridge + 'static> VirtualPad for HelperPad<B> {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn layout(&self) -> Layout {
        Layout::Gamepad
    }

    fn set_button(&mut self, button: Button, pressed: bool) -> Result<(), ControllerError> {
        let Button::Gamepad(button) = button else {
            return Err(ControllerError::ButtonOutOfRange(-1));
        };
        let (id, index) = (self.helper_id, button.index());
        let (request, op) = if pressed {
            (Request::ButtonDown { id, button: index }, "button_down")
        } else {
            (Request::ButtonUp { id, button: index }, "button_up")
        };
        self.forward(request, op, |r| r.set_button(button, pressed))
    }

    fn set_axis(&mut self, axis: Axis, value: f64) -> Result<(), ControllerError> {
        let Axis::Gamepad(axis) = axis else {
            return Err(ControllerError::AxisOutOfRange(-1));
        };
        let request = Request::SetAxis {
            id: self.helper_id,
            axis: axis.index() as i64,
            value: i32::from(encode_stick(value)),
        };
        self.forward(request, "set_axis", |r| r.set_axis(axis, axis.encode(value)))
    }

    fn report(&self) -> Report {
        Report::Pad(self.store.snapshot())
    }

    fn release(&mut self) {
        self.destroy();
    }
}

impl<B: HelperBridge> Drop for HelperPad<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::Preinstalled;
    use crate::mapping::{GamepadAxis, GamepadButton};
    use std::io::Cursor;

    #[derive(Default)]
    struct FakeHelper {
        calls: Vec<Request>,
        next_id: i64,
        refuse_create: bool,
        refuse_writes: bool,
        generation: u64,
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<FakeHelper>>);

    impl HelperBridge for Shared {
        fn is_available(&self) -> bool {
            true
        }
        fn call(&mut self, request: &Request) -> Result<Reply, BackendError> {
            let mut h = self.0.lock();
            h.calls.push(request.clone());
            Ok(match request {
                Request::Create { .. } if h.refuse_create => Reply {
                    ok: false,
                    id: Some(-1),
                    error: None,
                },
                Request::Create { .. } => {
                    h.next_id += 1;
                    Reply {
                        ok: true,
                        id: Some(h.next_id),
                        error: None,
                    }
                }
                Request::Destroy { .. } => Reply {
                    ok: true,
                    ..Reply::default()
                },
                _ => Reply {
                    ok: !h.refuse_writes,
                    ..Reply::default()
                },
            })
        }
        fn generation(&self) -> u64 {
            self.0.lock().generation
        }
    }

    fn backend() -> (HelperBackend<Shared>, Arc<Mutex<FakeHelper>>) {
        let helper = Shared::default();
        let state = helper.0.clone();
        (
            HelperBackend::new(helper, DeviceIdentity::default(), Arc::new(Preinstalled)),
            state,
        )
    }

    #[test]
    fn public_id_is_independent_of_helper_id() {
        let (mut be, state) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        assert_eq!(pad.id(), DeviceId(0));
        pad.set_button(Button::Gamepad(GamepadButton::Back), true).unwrap();
        assert_eq!(
            state.lock().calls.last(),
            Some(&Request::ButtonDown { id: 1, button: 8 })
        );
    }

    #[test]
    fn negative_helper_id_fails_create() {
        let (mut be, state) = backend();
        state.lock().refuse_create = true;
        let err = be.create(DeviceId(0)).err().unwrap();
        assert!(matches!(err, ControllerError::Backend(_)));
    }

    #[test]
    fn axes_travel_in_stick_range() {
        let (mut be, state) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.set_axis(Axis::Gamepad(GamepadAxis::LeftTrigger), 1.0).unwrap();
        assert_eq!(
            state.lock().calls.last(),
            Some(&Request::SetAxis {
                id: 1,
                axis: 4,
                value: 32767
            })
        );
        assert_eq!(pad.report().as_pad().unwrap().axis(GamepadAxis::LeftTrigger), 255);
    }

    #[test]
    fn rejected_call_keeps_report() {
        let (mut be, state) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        state.lock().refuse_writes = true;
        assert!(pad.set_button(Button::Gamepad(GamepadButton::A), true).is_err());
        assert_eq!(pad.report().button_bits(), 0);
    }

    #[test]
    fn release_destroys_once() {
        let (mut be, state) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.release();
        pad.release();
        drop(pad);
        let destroys = state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Request::Destroy { id: 1 }))
            .count();
        assert_eq!(destroys, 1);
    }

    #[test]
    fn restarted_helper_fails_old_devices() {
        let (mut be, state) = backend();
        let mut old = be.create(DeviceId(0)).unwrap();
        state.lock().generation += 1;
        let calls_before = state.lock().calls.len();

        let err = old.set_button(Button::Gamepad(GamepadButton::A), true).unwrap_err();
        assert!(matches!(err, ControllerError::Backend(BackendError::Bridge(_))));
        assert_eq!(old.report().button_bits(), 0);
        // the stale helper id never reaches the new helper
        assert_eq!(state.lock().calls.len(), calls_before);

        let mut fresh = be.create(DeviceId(1)).unwrap();
        fresh.set_button(Button::Gamepad(GamepadButton::A), true).unwrap();
        assert_eq!(
            state.lock().calls.last(),
            Some(&Request::ButtonDown { id: 2, button: 0 })
        );

        old.release();
        assert!(!state
            .lock()
            .calls
            .iter()
            .any(|c| matches!(c, Request::Destroy { id: 1 })));
    }

    #[cfg(unix)]
    #[test]
    fn failed_exchange_bumps_generation() {
        // `cat` echoes the request back, which is not a valid reply.
        let mut bridge = ProcessBridge::new("cat");
        assert_eq!(bridge.generation(), 0);
        assert!(bridge.call(&Request::Destroy { id: 1 }).is_err());
        assert_eq!(bridge.generation(), 1);
    }

    #[test]
    fn serial_is_forwarded_when_set() {
        let helper = Shared::default();
        let state = helper.0.clone();
        let identity = DeviceIdentity {
            serial: Some("SP-0001".to_string()),
            ..DeviceIdentity::default()
        };
        let mut be = HelperBackend::new(helper, identity, Arc::new(Preinstalled));
        let _pad = be.create(DeviceId(0)).unwrap();
        assert!(matches!(
            state.lock().calls.first(),
            Some(Request::Create { serial: Some(s), .. }) if s == "SP-0001"
        ));
    }

    #[test]
    fn stdio_bridge_speaks_json_lines() {
        let replies = "{\"ok\":true,\"id\":7}\n{\"ok\":false,\"error\":\"no such device\"}\n";
        let mut out = Vec::new();
        let mut bridge = StdioBridge::new(&mut out, Cursor::new(replies));

        let created = bridge
            .exchange(&Request::Create {
                name: "Pad".to_string(),
                vendor_id: 0x045e,
                product_id: 0x028e,
                serial: None,
            })
            .unwrap();
        assert_eq!(created.id, Some(7));

        let refused = bridge.exchange(&Request::Destroy { id: 9 }).unwrap();
        assert!(!refused.ok);
        assert_eq!(refused.error.as_deref(), Some("no such device"));

        assert!(matches!(
            bridge.exchange(&Request::Destroy { id: 7 }),
            Err(BackendError::Bridge(_))
        ));
        drop(bridge);

        let sent = String::from_utf8(out).unwrap();
        let first = sent.lines().next().unwrap();
        assert_eq!(
            first,
            r#"{"op":"create","name":"Pad","vendor_id":1118,"product_id":654}"#
        );
    }
}
