//! In-memory device and engine doubles for unit tests
//!
//! `FakeDevice` interprets the small command vocabulary the gadget code
//! emits (echo/cat/ln/rm/setprop/getprop/test/...) against a model of
//! configfs, sysfs and system properties.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::audio::engine::{AudioEngine, EngineCallbacks, EngineStartConfig};
use crate::error::{AppError, Result};
use crate::otg::configfs::is_unbound;
use crate::shell::{CommandBatch, PrivilegedShell, ShellOutput};

const ROOT: &str = "/config/usb_gadget/g1";
const UDC_CLASS_DIR: &str = "/sys/class/udc";
const ASOUND_CARDS: &str = "/proc/asound/cards";
const CARD_LIST: &str = " 0 [sm8250tmtsndcar]: sm8250-tmt-snd- - sm8250-tmt-snd-card\n \
                          1 [UAC2Gadget     ]: UAC2_Gadget - UAC2_Gadget\n";

/// Comparable view of device state (command log excluded)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub files: BTreeMap<String, String>,
    pub dirs: BTreeSet<String>,
    pub links: BTreeMap<String, String>,
    pub props: BTreeMap<String, String>,
}

#[derive(Default)]
struct DeviceModel {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    links: BTreeMap<String, String>,
    props: BTreeMap<String, String>,
    read_only: BTreeSet<String>,
    controllers: Vec<String>,
    tools: BTreeSet<String>,
    failing: Vec<String>,
    refuse_binds: u32,
    /// Emulates a HAL that rewrites the UDC as soon as it is cleared
    rebinds_immediately: bool,
    /// `sys.usb.config=none` leaves the UDC bound
    hard_unbind_ignored: bool,
    /// The ADB function vanishes once the UDC is released
    drop_adb_on_unbind: bool,
    commands: Vec<String>,
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    let inner = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value);
    inner.replace(r"'\''", "'")
}

impl DeviceModel {
    fn udc_path() -> String {
        format!("{}/UDC", ROOT)
    }

    fn run(&mut self, line: &str) -> (i32, String) {
        self.commands.push(line.to_string());

        if line == "id" {
            return (0, "uid=0(root) gid=0(root) groups=0(root)\n".to_string());
        }
        if let Some(rest) = line.strip_prefix("echo ") {
            if let Some((value, path)) = rest.rsplit_once(" > ") {
                return self.write(path.trim(), &unquote(value));
            }
            return (0, format!("{}\n", unquote(rest)));
        }
        if let Some(path) = line.strip_prefix("cat ") {
            return match self.files.get(path) {
                Some(value) => (0, format!("{}\n", value)),
                None => (1, String::new()),
            };
        }
        if let Some(path) = line.strip_prefix("chmod 666 ") {
            let exists = self.files.contains_key(path) || self.dirs.contains(path);
            return (if exists { 0 } else { 1 }, String::new());
        }
        if let Some(path) = line.strip_prefix("rm -f ") {
            self.links.remove(path);
            self.files.remove(path);
            return (0, String::new());
        }
        if let Some(path) = line.strip_prefix("rmdir ") {
            if !self.dirs.remove(path) {
                return (1, String::new());
            }
            let prefix = format!("{}/", path);
            self.files.retain(|k, _| !k.starts_with(&prefix));
            return (0, String::new());
        }
        if let Some(path) = line.strip_prefix("mkdir -p ") {
            self.dirs.insert(path.to_string());
            return (0, String::new());
        }
        if let Some(rest) = line.strip_prefix("ln -s ") {
            let Some((target, link)) = rest.split_once(' ') else {
                return (1, String::new());
            };
            if self.links.contains_key(link) || !self.dirs.contains(target) {
                return (1, String::new());
            }
            self.links.insert(link.to_string(), target.to_string());
            return (0, String::new());
        }
        if let Some(rest) = line.strip_prefix("setprop ") {
            let (key, value) = rest.split_once(' ').unwrap_or((rest, ""));
            self.setprop(key, value);
            return (0, String::new());
        }
        if let Some(key) = line.strip_prefix("getprop ") {
            let value = self.props.get(key).cloned().unwrap_or_default();
            return (0, format!("{}\n", value));
        }
        if let Some(rest) = line.strip_prefix("test ") {
            let (flag, path) = rest.split_once(' ').unwrap_or((rest, ""));
            let ok = match flag {
                "-d" => self.dirs.contains(path),
                "-f" => self.files.contains_key(path) || self.tools.contains(path),
                "-e" => self.files.contains_key(path) || self.dirs.contains(path),
                "-L" => self.links.contains_key(path),
                _ => false,
            };
            return (if ok { 0 } else { 1 }, String::new());
        }
        if let Some(dir) = line.strip_prefix("ls ") {
            if dir == UDC_CLASS_DIR {
                return (0, format!("{}\n", self.controllers.join("\n")));
            }
            return (1, String::new());
        }
        if let Some(path) = line.strip_prefix("readlink ") {
            return match self.links.get(path) {
                Some(target) => (0, format!("{}\n", target)),
                None => (1, String::new()),
            };
        }
        if line == "which supolicy" {
            return if self.tools.contains("supolicy") {
                (0, "/sbin/supolicy\n".to_string())
            } else {
                (1, String::new())
            };
        }
        if line == "magisk --path" {
            return if self.tools.contains("magisk") {
                (0, "/debug_ramdisk\n".to_string())
            } else {
                (127, String::new())
            };
        }
        if line.starts_with("chrt ") {
            return (0, String::new());
        }

        let program = line.split_whitespace().next().unwrap_or_default();
        if !self.tools.contains(program) {
            return (127, String::new());
        }
        if self.failing.iter().any(|pattern| line.contains(pattern.as_str())) {
            return (1, String::new());
        }
        (0, String::new())
    }

    fn write(&mut self, path: &str, value: &str) -> (i32, String) {
        if self.read_only.contains(path) {
            return (1, String::new());
        }
        if path == Self::udc_path() {
            return self.write_udc(value);
        }
        self.files.insert(path.to_string(), value.to_string());
        (0, String::new())
    }

    fn write_udc(&mut self, value: &str) -> (i32, String) {
        if is_unbound(value) {
            if !self.rebinds_immediately {
                self.set_udc("");
                if self.drop_adb_on_unbind {
                    self.dirs.remove(&format!("{}/functions/ffs.adb", ROOT));
                }
            }
            return (0, String::new());
        }
        if !self.controllers.iter().any(|c| c == value) {
            return (1, String::new());
        }
        if self.refuse_binds > 0 {
            self.refuse_binds -= 1;
            return (1, String::new());
        }
        self.set_udc(value);
        (0, String::new())
    }

    /// Binding with UAC2 linked makes the kernel create the sound card
    fn set_udc(&mut self, value: &str) {
        self.files.insert(Self::udc_path(), value.to_string());

        let uac2_linked = self
            .links
            .get(&format!("{}/configs/b.1/f1", ROOT))
            .is_some_and(|t| t.contains("uac2"));
        if !value.is_empty() && uac2_linked {
            self.files.insert(ASOUND_CARDS.to_string(), CARD_LIST.to_string());
            self.files.insert("/dev/snd/pcmC1D0c".to_string(), String::new());
            self.files.insert("/dev/snd/pcmC1D0p".to_string(), String::new());
        } else if value.is_empty() {
            self.files.remove(ASOUND_CARDS);
            self.files.remove("/dev/snd/pcmC1D0c");
            self.files.remove("/dev/snd/pcmC1D0p");
        }
    }

    fn setprop(&mut self, key: &str, value: &str) {
        match key {
            "ctl.stop" => {
                self.props
                    .insert(format!("init.svc.{}", value), "stopped".to_string());
            }
            "ctl.start" => {
                self.props
                    .insert(format!("init.svc.{}", value), "running".to_string());
            }
            _ => {
                self.props.insert(key.to_string(), value.to_string());
                if key == "sys.usb.config" && value == "none" && !self.hard_unbind_ignored {
                    self.rebinds_immediately = false;
                    self.set_udc("");
                }
            }
        }
    }
}

/// Handle for a command the fake device is holding
#[derive(Clone)]
pub struct PauseHandle {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl PauseHandle {
    /// Resolves once the matching command has been reached
    pub async fn wait(&self) {
        self.reached.notified().await;
    }

    pub fn resume(&self) {
        self.release.notify_one();
    }
}

pub struct FakeDevice {
    model: Mutex<DeviceModel>,
    pause: Mutex<Option<(String, PauseHandle)>>,
}

impl FakeDevice {
    /// A phone in plain ADB mode with its stock gadget bound
    pub fn stock() -> Self {
        let mut model = DeviceModel::default();
        for dir in [
            ROOT.to_string(),
            format!("{}/functions/ffs.adb", ROOT),
            format!("{}/configs/b.1", ROOT),
            format!("{}/configs/b.1/strings/0x409", ROOT),
            format!("{}/strings/0x409", ROOT),
        ] {
            model.dirs.insert(dir);
        }
        for (path, value) in [
            ("UDC", "a600000.dwc3"),
            ("idVendor", "0x18d1"),
            ("idProduct", "0x4ee7"),
            ("strings/0x409/manufacturer", "Google"),
            ("strings/0x409/product", "Pixel 7"),
            ("strings/0x409/serialnumber", "29031FDH2000AB"),
            ("configs/b.1/strings/0x409/configuration", "adb"),
        ] {
            model
                .files
                .insert(format!("{}/{}", ROOT, path), value.to_string());
        }
        model.links.insert(
            format!("{}/configs/b.1/f1", ROOT),
            format!("{}/functions/ffs.adb", ROOT),
        );
        for (key, value) in [
            ("sys.usb.config", "adb"),
            ("sys.usb.state", "adb"),
            ("ro.product.manufacturer", "Google"),
            ("ro.product.model", "Pixel 7"),
            ("ro.serialno", "29031FDH2000AB"),
        ] {
            model.props.insert(key.to_string(), value.to_string());
        }
        model.controllers = vec!["dummy_udc.0".to_string(), "a600000.dwc3".to_string()];

        Self {
            model: Mutex::new(model),
            pause: Mutex::new(None),
        }
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.model.lock().files.get(path).cloned()
    }

    pub fn set_file(&self, path: &str, value: &str) {
        self.model
            .lock()
            .files
            .insert(path.to_string(), value.to_string());
    }

    pub fn prop(&self, key: &str) -> Option<String> {
        self.model.lock().props.get(key).cloned()
    }

    pub fn set_prop(&self, key: &str, value: &str) {
        self.model
            .lock()
            .props
            .insert(key.to_string(), value.to_string());
    }

    pub fn has_link(&self, path: &str) -> bool {
        self.model.lock().links.contains_key(path)
    }

    pub fn link(&self, path: &str) -> Option<String> {
        self.model.lock().links.get(path).cloned()
    }

    pub fn remove_link(&self, path: &str) {
        self.model.lock().links.remove(path);
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.model.lock().dirs.contains(path)
    }

    pub fn commands(&self) -> Vec<String> {
        self.model.lock().commands.clone()
    }

    pub fn command_count(&self) -> usize {
        self.model.lock().commands.len()
    }

    pub fn commands_since(&self, start: usize) -> Vec<String> {
        self.model
            .lock()
            .commands
            .iter()
            .skip(start)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let model = self.model.lock();
        DeviceSnapshot {
            files: model.files.clone(),
            dirs: model.dirs.clone(),
            links: model.links.clone(),
            props: model.props.clone(),
        }
    }

    pub fn set_rebinds_immediately(&self, enabled: bool) {
        self.model.lock().rebinds_immediately = enabled;
    }

    pub fn set_hard_unbind_ignored(&self, ignored: bool) {
        self.model.lock().hard_unbind_ignored = ignored;
    }

    /// Remove `functions/ffs.adb` when the UDC is next cleared
    pub fn drop_adb_on_unbind(&self) {
        self.model.lock().drop_adb_on_unbind = true;
    }

    /// Reject the next `count` controller writes to the UDC
    pub fn refuse_binds(&self, count: u32) {
        self.model.lock().refuse_binds = count;
    }

    pub fn set_controllers(&self, controllers: &[&str]) {
        self.model.lock().controllers = controllers.iter().map(|c| c.to_string()).collect();
    }

    pub fn make_read_only(&self, path: &str) {
        self.model.lock().read_only.insert(path.to_string());
    }

    /// Make a binary exist (absolute path) or be on PATH (bare name)
    pub fn install_tool(&self, tool: &str) {
        self.model.lock().tools.insert(tool.to_string());
    }

    /// Tool invocations containing `pattern` exit non-zero
    pub fn fail_invocation(&self, pattern: &str) {
        self.model.lock().failing.push(pattern.to_string());
    }

    /// Hold the first command containing `pattern` until resumed
    pub fn pause_on(&self, pattern: &str) -> PauseHandle {
        let handle = PauseHandle {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.pause.lock() = Some((pattern.to_string(), handle.clone()));
        handle
    }

    /// Commands that change device state
    pub fn is_mutation(line: &str) -> bool {
        ["echo ", "rm ", "rmdir ", "mkdir ", "ln ", "chmod ", "setprop "]
            .iter()
            .any(|prefix| line.starts_with(prefix))
    }

    fn take_pause(&self, line: &str) -> Option<PauseHandle> {
        let mut slot = self.pause.lock();
        let armed = matches!(slot.as_ref(), Some((pattern, _)) if line.contains(pattern.as_str()));
        if armed {
            slot.take().map(|(_, handle)| handle)
        } else {
            None
        }
    }
}

#[async_trait]
impl PrivilegedShell for FakeDevice {
    async fn execute(&self, batch: &CommandBatch) -> Result<ShellOutput> {
        let mut stdout = String::new();
        let mut rc = 0;

        for cmd in batch.commands() {
            if let Some(handle) = self.take_pause(&cmd.line) {
                handle.reached.notify_one();
                handle.release.notified().await;
            }

            let (code, out) = self.model.lock().run(&cmd.line);
            stdout.push_str(&out);
            if code != 0 && cmd.is_required() {
                rc = 1;
            }
            tokio::task::yield_now().await;
        }

        Ok(ShellOutput {
            exit_code: Some(rc),
            stdout,
            stderr: Vec::new(),
        })
    }
}

#[derive(Default)]
struct EngineRecord {
    starts: Vec<EngineStartConfig>,
    stops: u32,
    speaker_muted: Option<bool>,
    mic_muted: Option<bool>,
    callbacks: Option<EngineCallbacks>,
    fail_next_start: Option<String>,
}

/// Records engine calls and keeps the latest callbacks for event injection
#[derive(Default)]
pub struct FakeEngine {
    record: Mutex<EngineRecord>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> Vec<EngineStartConfig> {
        self.record.lock().starts.clone()
    }

    pub fn stop_count(&self) -> u32 {
        self.record.lock().stops
    }

    pub fn speaker_muted(&self) -> Option<bool> {
        self.record.lock().speaker_muted
    }

    pub fn mic_muted(&self) -> Option<bool> {
        self.record.lock().mic_muted
    }

    /// Callbacks handed over by the most recent start
    pub fn callbacks(&self) -> EngineCallbacks {
        self.record
            .lock()
            .callbacks
            .clone()
            .expect("engine was never started")
    }

    pub fn fail_next_start(&self, message: &str) {
        self.record.lock().fail_next_start = Some(message.to_string());
    }
}

impl AudioEngine for FakeEngine {
    fn start(&self, config: &EngineStartConfig, callbacks: EngineCallbacks) -> Result<()> {
        let mut record = self.record.lock();
        if let Some(message) = record.fail_next_start.take() {
            return Err(AppError::Native(message));
        }
        record.starts.push(config.clone());
        record.callbacks = Some(callbacks);
        Ok(())
    }

    fn stop(&self) {
        self.record.lock().stops += 1;
    }

    fn set_speaker_muted(&self, muted: bool) {
        self.record.lock().speaker_muted = Some(muted);
    }

    fn set_mic_muted(&self, muted: bool) {
        self.record.lock().mic_muted = Some(muted);
    }
}
