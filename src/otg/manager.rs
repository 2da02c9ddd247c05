//! UAC2 gadget lifecycle manager
//!
//! Owns every configfs mutation. Enable and disable share one async mutex,
//! so a caller issued while another mutation runs waits for it to finish.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::card;
use super::configfs::{
    configure_batch, is_unbound, normalize_function_name, remove_functions_batch, strings_batch,
    GadgetPaths, ADB_FUNCTION,
};
use super::identity::{is_ours, GadgetIdentity, OriginalIdentity};
use super::log::GadgetLog;
use super::policy::PolicyInjector;
use super::quirks::{MtkDeviceMode, UsbHalGuard, VendorQuirk};
use super::udc::{GadgetTiming, UdcControl};
use crate::config::{GadgetConfig, GadgetStateStore};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::shell::{CommandBatch, PrivilegedExecutor};

/// Outcome of a successful enable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnableReport {
    /// Controller the gadget is bound to
    pub udc: String,
    pub sample_rate: u32,
    /// ADB is linked as a second function
    pub adb_preserved: bool,
    /// The gadget was already ours; nothing was reconfigured
    pub already_active: bool,
}

/// Snapshot of the gadget binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GadgetStatus {
    /// Controller name, "--" when unbound
    pub udc_controller: String,
    /// Normalized names of the linked functions, in link order
    pub active_functions: Vec<String>,
    pub is_bound: bool,
}

impl GadgetStatus {
    pub fn unbound() -> Self {
        Self {
            udc_controller: "--".to_string(),
            active_functions: Vec::new(),
            is_bound: false,
        }
    }

    /// Functions joined for display, "--" when none
    pub fn functions_display(&self) -> String {
        if self.active_functions.is_empty() {
            "--".to_string()
        } else {
            self.active_functions.join(", ")
        }
    }
}

pub struct GadgetManager {
    exec: PrivilegedExecutor,
    paths: GadgetPaths,
    config: GadgetConfig,
    timing: GadgetTiming,
    store: Arc<dyn GadgetStateStore>,
    udc: UdcControl,
    policy: PolicyInjector,
    hal: UsbHalGuard,
    events: Option<Arc<EventBus>>,
    log: GadgetLog,
    /// Serializes enable/disable
    mutation: Mutex<()>,
}

impl GadgetManager {
    pub fn new(
        config: GadgetConfig,
        exec: PrivilegedExecutor,
        store: Arc<dyn GadgetStateStore>,
    ) -> Self {
        Self::with_options(config, exec, store, None, GadgetTiming::default())
    }

    pub fn with_options(
        config: GadgetConfig,
        exec: PrivilegedExecutor,
        store: Arc<dyn GadgetStateStore>,
        events: Option<Arc<EventBus>>,
        timing: GadgetTiming,
    ) -> Self {
        let log = GadgetLog::new(events.clone());
        let paths = GadgetPaths::new(config.gadget_root.clone());

        let mut quirks: Vec<Arc<dyn VendorQuirk>> = Vec::new();
        if config.vendor_quirks {
            quirks.push(Arc::new(MtkDeviceMode::new(config.udc_class_dir.clone())));
        }

        let udc = UdcControl::new(
            exec.clone(),
            paths.clone(),
            config.udc_class_dir.clone(),
            timing.clone(),
            quirks,
            log.clone(),
        );
        let policy = PolicyInjector::new(exec.clone(), config.policy_tmp_path.clone(), log.clone());
        let hal = UsbHalGuard::new(
            exec.clone(),
            config.usb_hal_services.clone(),
            store.clone(),
            timing.hal_stop_settle,
            log.clone(),
        );

        Self {
            exec,
            paths,
            config,
            timing,
            store,
            udc,
            policy,
            hal,
            events,
            log,
            mutation: Mutex::new(()),
        }
    }

    pub fn executor(&self) -> &PrivilegedExecutor {
        &self.exec
    }

    fn publish(&self, event: SystemEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Configure and bind the UAC2 gadget at `sample_rate`
    ///
    /// With `keep_adb`, ADB stays linked as a second function when it is
    /// active and the controller can be released without touching
    /// `sys.usb.config`; if it cannot, the call fails instead of dropping ADB.
    pub async fn enable_gadget(&self, sample_rate: u32, keep_adb: bool) -> Result<EnableReport> {
        let _guard = self.mutation.lock().await;
        let result = self.enable_locked(sample_rate, keep_adb).await;
        if let Err(e) = &result {
            self.log.warn(format!("Failed to configure gadget: {}", e));
        }
        self.publish(SystemEvent::GadgetResult {
            success: result.is_ok(),
        });
        result
    }

    async fn enable_locked(&self, sample_rate: u32, keep_adb: bool) -> Result<EnableReport> {
        if self.is_gadget_active().await {
            let udc = self.udc.read_udc().await;
            if !is_unbound(&udc) {
                let _ = self.policy.apply().await;
                self.log.info("Gadget already active.");
                let adb_preserved = self.linked_functions().await.iter().any(|f| f == "adb");
                let bound_rate = self.bound_sample_rate().await.unwrap_or(sample_rate);
                if bound_rate != sample_rate {
                    self.log.info(format!(
                        "Gadget is bound at {} Hz; requested {} Hz ignored until disabled.",
                        bound_rate, sample_rate
                    ));
                }
                return Ok(EnableReport {
                    udc,
                    sample_rate: bound_rate,
                    adb_preserved,
                    already_active: true,
                });
            }
        }

        self.log
            .info(format!("Configuring UAC2 gadget ({} Hz)...", sample_rate));

        let preserve_adb = keep_adb && self.adb_preservable().await;

        self.hal.stop_conflicting().await;

        let device_serial = self.backup_identity().await;
        let identity = GadgetIdentity::for_rate(sample_rate, &device_serial);

        let soft_released = self.udc.soft_unbind().await;
        if !soft_released {
            if preserve_adb {
                self.log.warn("ERROR: Cannot keep ADB enabled on this device.");
                self.log.warn(
                    "The system immediately rebinds the gadget, preventing ADB preservation.",
                );
                return Err(AppError::AdbPreservationImpossible);
            }

            self.log
                .info("Using hard unbind (ADB will be temporarily disabled)...");
            if !self.udc.hard_unbind().await {
                self.log.warn("Aborting: Could not release USB hardware.");
                return Err(AppError::UnbindTimeout {
                    udc: self.udc.read_udc().await,
                });
            }
        }

        if !self.udc.soft_unbind().await {
            self.log
                .warn("UDC release not confirmed, continuing with reconfiguration.");
        }

        let with_adb = if soft_released && preserve_adb {
            let available = self.adb_function_exists().await;
            if available {
                self.log.info("ffs.adb is available for composite gadget.");
            } else {
                self.log
                    .info("ffs.adb became unavailable, proceeding without ADB.");
            }
            available
        } else {
            false
        };

        let _ = self.policy.apply().await;

        let batch = configure_batch(&self.paths, &identity, sample_rate, with_adb);
        if !self.exec.run(&batch).await {
            self.log.warn("Failed to configure gadget structure.");
            return Err(AppError::GadgetConfig(
                "configfs rebuild batch failed".to_string(),
            ));
        }

        tokio::time::sleep(self.timing.post_config_settle).await;

        let udc = match self.udc.bind_with_retry().await {
            Ok(udc) => udc,
            Err(e) => {
                self.log.warn("Failed to bind UDC after retries.");
                return Err(e);
            }
        };

        let state = if with_adb { "uac2,adb" } else { "uac2" };
        let mut batch = CommandBatch::with_capacity(1);
        batch.tolerated(format!("setprop sys.usb.state {}", state));
        self.exec.run(&batch).await;

        if with_adb {
            self.log.info("Composite gadget active: UAC2 + ADB");
        } else {
            self.log.info("UAC2 gadget active");
            if preserve_adb {
                self.log
                    .info("Note: ADB will reconnect when you disable the gadget.");
            }
        }

        Ok(EnableReport {
            udc,
            sample_rate,
            adb_preserved: with_adb,
            already_active: false,
        })
    }

    /// ADB is running and its function can be linked into our configuration
    async fn adb_preservable(&self) -> bool {
        let usb_config = self.exec.read("getprop sys.usb.config").await;
        let adb_active = usb_config.contains("adb");
        let function_exists = self.adb_function_exists().await;

        match (adb_active, function_exists) {
            (true, true) => {
                self.log.info("ADB is active, will attempt to preserve it.");
                true
            }
            (true, false) => {
                self.log.info("ADB active but ffs.adb function not found.");
                false
            }
            _ => {
                self.log
                    .info("ADB not currently active, ignoring keepAdb option.");
                false
            }
        }
    }

    /// Playback rate the live UAC2 function was configured with
    async fn bound_sample_rate(&self) -> Option<u32> {
        self.exec
            .capture(format!("cat {}", self.paths.uac2_attr("p_srate")))
            .await?
            .parse()
            .ok()
    }

    async fn adb_function_exists(&self) -> bool {
        self.exec
            .check(format!("test -d {}", self.paths.function_dir(ADB_FUNCTION)))
            .await
    }

    /// Back up the device's own strings once; returns the serial to embed
    async fn backup_identity(&self) -> String {
        if let Some(saved) = self.store.original_identity().await {
            return saved.device_serial().to_string();
        }

        let manufacturer = self.exec.read(format!("cat {}", self.paths.string("manufacturer"))).await;
        let product = self.exec.read(format!("cat {}", self.paths.string("product"))).await;
        let serial = self.exec.read(format!("cat {}", self.paths.string("serialnumber"))).await;

        let identity = if !product.is_empty() && !is_ours(&manufacturer, &product) {
            let identity = OriginalIdentity::new(manufacturer, product, serial);
            self.log.info(format!(
                "Backed up original identity: {} - {} ({})",
                identity.manufacturer, identity.product, identity.serial
            ));
            identity
        } else {
            // Strings are blank or already ours; the build props are the next best thing
            let identity = OriginalIdentity::new(
                self.exec.read("getprop ro.product.manufacturer").await,
                self.exec.read("getprop ro.product.model").await,
                self.exec.read("getprop ro.serialno").await,
            );
            self.log.info(format!(
                "Backed up identity from props: {} - {} ({})",
                identity.manufacturer, identity.product, identity.serial
            ));
            identity
        };

        if let Err(e) = self.store.save_original_identity(&identity).await {
            self.log.warn(format!("Failed to backup strings: {}", e));
        }
        identity.device_serial().to_string()
    }

    /// Tear the gadget down and hand USB back to the system
    ///
    /// Best-effort: every step is attempted regardless of earlier failures.
    pub async fn disable_gadget(&self) {
        let _guard = self.mutation.lock().await;
        self.log.info("Disabling USB gadget...");

        if !self.udc.soft_unbind().await {
            self.udc.hard_unbind().await;
        }

        match self.store.original_identity().await {
            Some(original) => {
                self.exec
                    .run(&strings_batch(
                        &self.paths,
                        &original.manufacturer,
                        &original.product,
                        &original.serial,
                    ))
                    .await;
                self.log.info("Restored original identity.");
                if let Err(e) = self.store.clear_original_identity().await {
                    self.log
                        .warn(format!("Failed to clear identity backup: {}", e));
                }
            }
            None => {
                self.exec.run(&strings_batch(&self.paths, "", "", "")).await;
            }
        }

        self.exec.run(&remove_functions_batch(&self.paths)).await;

        if let Some(udc) = self.udc.preferred_controller().await {
            self.udc.run_quirks(&udc, false).await;
        }

        let mut batch = CommandBatch::with_capacity(1);
        batch.tolerated(format!(
            "setprop sys.usb.config {}",
            self.config.normal_usb_config
        ));
        self.exec.run(&batch).await;

        self.hal.restart_stopped().await;

        self.log
            .info("Gadget disabled. USB restored to system control.");
        self.publish(SystemEvent::GadgetResult { success: false });
    }

    async fn linked_functions(&self) -> Vec<String> {
        let mut functions = Vec::with_capacity(2);
        for n in 1..=2 {
            if let Some(target) = self
                .exec
                .capture(format!("readlink {}", self.paths.function_link(n)))
                .await
            {
                if !target.is_empty() {
                    functions.push(normalize_function_name(&target));
                }
            }
        }
        functions
    }

    /// Read the binding and linked functions from configfs
    pub async fn gadget_status(&self) -> GadgetStatus {
        let udc = self.udc.read_udc().await;
        if is_unbound(&udc) {
            return GadgetStatus {
                active_functions: self.linked_functions().await,
                ..GadgetStatus::unbound()
            };
        }
        GadgetStatus {
            udc_controller: udc,
            active_functions: self.linked_functions().await,
            is_bound: true,
        }
    }

    /// Re-read status until bound or out of attempts, then publish it
    ///
    /// The system HAL can take a while to rebind after a disable.
    pub async fn poll_gadget_status(&self) -> GadgetStatus {
        let mut status = self.gadget_status().await;
        let mut attempts = 0;
        while !status.is_bound && attempts < self.timing.status_poll_attempts {
            tokio::time::sleep(self.timing.status_poll_interval).await;
            status = self.gadget_status().await;
            attempts += 1;
        }
        debug!("Gadget status after {} polls: {:?}", attempts, status);

        self.publish(SystemEvent::GadgetStatus {
            udc_controller: status.udc_controller.clone(),
            active_functions: status.functions_display(),
        });
        status
    }

    /// `configs/b.1/f1` links to our UAC2 function
    pub async fn is_gadget_active(&self) -> bool {
        let link = self.paths.function_link(1);
        if !self.exec.check(format!("test -L {}", link)).await {
            return false;
        }
        self.exec
            .capture(format!("readlink {}", link))
            .await
            .is_some_and(|target| target.contains("uac2"))
    }

    pub async fn apply_selinux_policy(&self) -> Result<&'static str> {
        self.policy.apply().await
    }

    pub async fn is_root_granted(&self) -> bool {
        self.exec.is_root_granted().await
    }

    /// Locate the gadget's ALSA card and fix its node permissions
    pub async fn find_and_prepare_card(&self) -> Result<u32> {
        card::find_and_prepare_card(&self.exec, &self.timing, &self.log).await
    }
}
