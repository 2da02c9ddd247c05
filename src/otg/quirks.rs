//! Vendor-specific workarounds around the gadget lifecycle

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::log::GadgetLog;
use crate::config::GadgetStateStore;
use crate::shell::{write_cmd, CommandBatch, PrivilegedExecutor};

/// Best-effort hook run before each bind attempt and after teardown
#[async_trait]
pub trait VendorQuirk: Send + Sync {
    fn name(&self) -> &'static str;

    /// `enable` is true before binding, false after the gadget is torn down
    async fn apply(&self, exec: &PrivilegedExecutor, udc: &str, enable: bool, log: &GadgetLog);
}

/// MediaTek controllers expose a role switch next to the UDC
pub struct MtkDeviceMode {
    udc_class_dir: String,
}

impl MtkDeviceMode {
    pub fn new(udc_class_dir: impl Into<String>) -> Self {
        Self {
            udc_class_dir: udc_class_dir.into(),
        }
    }
}

#[async_trait]
impl VendorQuirk for MtkDeviceMode {
    fn name(&self) -> &'static str {
        "mtk-device-mode"
    }

    async fn apply(&self, exec: &PrivilegedExecutor, udc: &str, enable: bool, log: &GadgetLog) {
        let value = if enable { "1" } else { "0" };
        for attr in ["mode", "cmode"] {
            let path = format!("{}/{}/device/{}", self.udc_class_dir, udc, attr);
            if exec.check(format!("test -f {}", path)).await {
                log.info(format!("Setting MTK specific mode: {} -> {}", path, value));
                let mut batch = CommandBatch::with_capacity(1);
                batch.tolerated(write_cmd(value, &path));
                exec.run(&batch).await;
            }
        }
    }
}

/// Stops vendor USB HAL services that would rebind the gadget behind our back
pub struct UsbHalGuard {
    exec: PrivilegedExecutor,
    services: Vec<String>,
    store: Arc<dyn GadgetStateStore>,
    settle: Duration,
    log: GadgetLog,
}

impl UsbHalGuard {
    pub fn new(
        exec: PrivilegedExecutor,
        services: Vec<String>,
        store: Arc<dyn GadgetStateStore>,
        settle: Duration,
        log: GadgetLog,
    ) -> Self {
        Self {
            exec,
            services,
            store,
            settle,
            log,
        }
    }

    /// First candidate service init reports as running or restarting
    pub async fn find_running(&self) -> Option<String> {
        for name in &self.services {
            let status = self.exec.read(format!("getprop init.svc.{}", name)).await;
            if status == "running" || status == "restarting" {
                return Some(name.clone());
            }
        }
        None
    }

    pub async fn stop_conflicting(&self) {
        let Some(name) = self.find_running().await else {
            return;
        };

        self.log
            .info(format!("Stopping conflicting USB HAL service: {}", name));
        if self.exec.check(format!("setprop ctl.stop {}", name)).await {
            if let Err(e) = self.store.save_stopped_hal_service(&name).await {
                self.log
                    .warn(format!("Failed to record stopped service {}: {}", name, e));
            }
            tokio::time::sleep(self.settle).await;
        } else {
            self.log.warn(format!("Failed to stop service {}", name));
        }
    }

    /// Restart whatever `stop_conflicting` stopped, even in an earlier process
    pub async fn restart_stopped(&self) {
        let Some(name) = self.store.stopped_hal_service().await else {
            return;
        };

        self.log.info(format!("Restarting USB HAL service: {}", name));
        let mut batch = CommandBatch::with_capacity(1);
        batch.tolerated(format!("setprop ctl.start {}", name));
        self.exec.run(&batch).await;
        if let Err(e) = self.store.clear_stopped_hal_service().await {
            self.log
                .warn(format!("Failed to clear stopped service record: {}", e));
        }
    }
}
