//! UDC binding: soft/hard unbind and bind with retry

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::configfs::{is_unbound, GadgetPaths};
use super::log::GadgetLog;
use super::quirks::VendorQuirk;
use crate::error::{AppError, Result};
use crate::shell::{write_cmd, CommandBatch, PrivilegedExecutor};

/// Delays and attempt counts of the gadget state machine
#[derive(Debug, Clone)]
pub struct GadgetTiming {
    /// Poll interval after a soft unbind write
    pub soft_unbind_interval: Duration,
    /// Polls after writing an empty UDC
    pub soft_unbind_polls: u32,
    /// Polls after writing the literal "none"
    pub soft_unbind_none_polls: u32,
    pub hard_unbind_interval: Duration,
    pub hard_unbind_polls: u32,
    pub bind_attempts: u32,
    /// Settle after clearing the UDC before a bind write
    pub bind_clear_settle: Duration,
    /// Wait before reading the UDC back
    pub bind_verify_delay: Duration,
    /// Base backoff after a failed bind, multiplied by the attempt number
    pub bind_backoff: Duration,
    /// Settle between the configfs rebuild and the first bind
    pub post_config_settle: Duration,
    pub hal_stop_settle: Duration,
    pub status_poll_interval: Duration,
    pub status_poll_attempts: u32,
    pub card_chmod_rounds: u32,
    pub card_chmod_interval: Duration,
}

impl Default for GadgetTiming {
    fn default() -> Self {
        Self {
            soft_unbind_interval: Duration::from_millis(400),
            soft_unbind_polls: 8,
            soft_unbind_none_polls: 4,
            hard_unbind_interval: Duration::from_millis(500),
            hard_unbind_polls: 10,
            bind_attempts: 5,
            bind_clear_settle: Duration::from_millis(200),
            bind_verify_delay: Duration::from_millis(300),
            bind_backoff: Duration::from_millis(800),
            post_config_settle: Duration::from_millis(500),
            hal_stop_settle: Duration::from_millis(500),
            status_poll_interval: Duration::from_millis(200),
            status_poll_attempts: 10,
            card_chmod_rounds: 3,
            card_chmod_interval: Duration::from_millis(100),
        }
    }
}

impl GadgetTiming {
    /// Same attempt counts, no waiting
    pub fn immediate() -> Self {
        Self {
            soft_unbind_interval: Duration::ZERO,
            hard_unbind_interval: Duration::ZERO,
            bind_clear_settle: Duration::ZERO,
            bind_verify_delay: Duration::ZERO,
            bind_backoff: Duration::ZERO,
            post_config_settle: Duration::ZERO,
            hal_stop_settle: Duration::ZERO,
            status_poll_interval: Duration::ZERO,
            card_chmod_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Controller binding of one gadget
#[derive(Clone)]
pub struct UdcControl {
    exec: PrivilegedExecutor,
    paths: GadgetPaths,
    udc_class_dir: String,
    timing: GadgetTiming,
    quirks: Vec<Arc<dyn VendorQuirk>>,
    log: GadgetLog,
}

impl UdcControl {
    pub fn new(
        exec: PrivilegedExecutor,
        paths: GadgetPaths,
        udc_class_dir: impl Into<String>,
        timing: GadgetTiming,
        quirks: Vec<Arc<dyn VendorQuirk>>,
        log: GadgetLog,
    ) -> Self {
        Self {
            exec,
            paths,
            udc_class_dir: udc_class_dir.into(),
            timing,
            quirks,
            log,
        }
    }

    /// Current UDC file content (empty if unreadable)
    pub async fn read_udc(&self) -> String {
        self.exec.read(format!("cat {}", self.paths.udc())).await
    }

    pub async fn is_released(&self) -> bool {
        is_unbound(&self.read_udc().await)
    }

    async fn poll_released(&self, polls: u32, interval: Duration) -> bool {
        for _ in 0..polls {
            tokio::time::sleep(interval).await;
            if self.is_released().await {
                return true;
            }
        }
        false
    }

    async fn write_udc(&self, value: &str) -> bool {
        let mut batch = CommandBatch::with_capacity(2);
        // Some vendors ship the UDC file read-only for root's context
        batch
            .tolerated(format!("chmod 666 {}", self.paths.udc()))
            .required(write_cmd(value, &self.paths.udc()));
        self.exec.run(&batch).await
    }

    /// Release the controller with direct UDC writes only
    ///
    /// Leaves `sys.usb.config` alone, so a running adbd survives.
    pub async fn soft_unbind(&self) -> bool {
        let initial = self.read_udc().await;
        self.log.info(format!(
            "Soft unbind starting (current UDC='{}')...",
            initial
        ));

        if is_unbound(&initial) {
            self.log.info("UDC already unbound.");
            return true;
        }

        self.write_udc("").await;
        if self
            .poll_released(self.timing.soft_unbind_polls, self.timing.soft_unbind_interval)
            .await
        {
            self.log.info("Soft unbind successful.");
            return true;
        }

        self.write_udc("none").await;
        if self
            .poll_released(
                self.timing.soft_unbind_none_polls,
                self.timing.soft_unbind_interval,
            )
            .await
        {
            self.log.info("Soft unbind successful.");
            return true;
        }

        self.log.warn(format!(
            "Soft unbind failed - UDC='{}' (system is rebinding immediately)",
            self.read_udc().await
        ));
        false
    }

    /// Release the controller through `sys.usb.config=none`
    ///
    /// init tears down adbd along with the gadget.
    pub async fn hard_unbind(&self) -> bool {
        self.log.info("Hard unbind (sys.usb.config=none)...");
        let mut batch = CommandBatch::with_capacity(1);
        batch.tolerated("setprop sys.usb.config none");
        self.exec.run(&batch).await;

        if self
            .poll_released(self.timing.hard_unbind_polls, self.timing.hard_unbind_interval)
            .await
        {
            self.log.info("Hard unbind successful.");
            return true;
        }

        self.log.warn(format!(
            "Hard unbind failed. UDC='{}'",
            self.read_udc().await
        ));
        false
    }

    pub async fn available_controllers(&self) -> Vec<String> {
        self.exec
            .read(format!("ls {}", self.udc_class_dir))
            .await
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// First real controller, falling back to a dummy one
    pub async fn preferred_controller(&self) -> Option<String> {
        pick_controller(&self.available_controllers().await)
    }

    pub async fn run_quirks(&self, udc: &str, enable: bool) {
        for quirk in &self.quirks {
            debug!("Running vendor quirk {} (enable={})", quirk.name(), enable);
            quirk.apply(&self.exec, udc, enable, &self.log).await;
        }
    }

    /// Bind to the preferred controller, retrying while the kernel settles
    ///
    /// Success requires the UDC file to read back exactly the controller name.
    pub async fn bind_with_retry(&self) -> Result<String> {
        let mut last_udc = String::new();

        for attempt in 1..=self.timing.bind_attempts {
            let udc = match self.preferred_controller().await {
                Some(udc) => udc,
                None => {
                    self.log.warn("Error: No UDC controller found.");
                    return Err(AppError::NoUdcController);
                }
            };

            self.run_quirks(&udc, true).await;

            self.write_udc("").await;
            tokio::time::sleep(self.timing.bind_clear_settle).await;

            self.log
                .info(format!("Binding to {} (Attempt {})...", udc, attempt));
            self.exec
                .run(&CommandBatch::single(write_cmd(&udc, &self.paths.udc())))
                .await;

            tokio::time::sleep(self.timing.bind_verify_delay).await;
            last_udc = self.read_udc().await;
            if last_udc == udc {
                return Ok(udc);
            }

            self.log.warn(format!(
                "Bind attempt {} failed. UDC='{}'",
                attempt, last_udc
            ));
            tokio::time::sleep(self.timing.bind_backoff * attempt).await;
        }

        Err(AppError::BindExhausted {
            attempts: self.timing.bind_attempts,
            last_udc,
        })
    }
}

/// Prefer controllers whose name does not contain "dummy"
pub fn pick_controller(controllers: &[String]) -> Option<String> {
    controllers
        .iter()
        .find(|c| !c.to_lowercase().contains("dummy"))
        .or_else(|| controllers.first())
        .cloned()
}
