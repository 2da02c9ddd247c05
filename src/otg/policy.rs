//! SELinux policy injection
//!
//! Unprivileged apps need the audio device node opened up before the PCM
//! engine can touch it. Each root framework ships its own policy tool, so
//! backends are tried in priority order until one applies the full set.

use async_trait::async_trait;

use super::log::GadgetLog;
use crate::error::{AppError, Result};
use crate::shell::{quote, write_cmd, CommandBatch, PrivilegedExecutor};

/// Rules needed by the audio engine
pub const SELINUX_RULES: [&str; 4] = [
    "typeattribute audio_device mlstrustedobject",
    "allow untrusted_app audio_device chr_file { read write open ioctl getattr map }",
    "allow untrusted_app audio_device dir { search getattr read open }",
    "allow untrusted_app cgroup dir { search getattr read open }",
];

/// A policy tool from one root framework
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply all of `rules`; false if the tool is missing or any rule failed
    async fn apply(
        &self,
        exec: &PrivilegedExecutor,
        rules: &[&str],
        tmp_path: &str,
        log: &GadgetLog,
    ) -> bool;
}

async fn write_rules_file(exec: &PrivilegedExecutor, rules: &[&str], tmp_path: &str) -> bool {
    exec.check(write_cmd(&rules.join("\n"), tmp_path)).await
}

async fn apply_each(exec: &PrivilegedExecutor, tool: &str, rules: &[&str]) -> bool {
    let mut all_applied = true;
    for rule in rules {
        if !exec.check(format!("{} --live {}", tool, quote(rule))).await {
            all_applied = false;
        }
    }
    all_applied
}

/// KernelSU: `ksud sepolicy apply <file>`
pub struct KernelSuBackend {
    ksud: String,
}

impl Default for KernelSuBackend {
    fn default() -> Self {
        Self {
            ksud: "/data/adb/ksu/bin/ksud".to_string(),
        }
    }
}

#[async_trait]
impl PolicyBackend for KernelSuBackend {
    fn name(&self) -> &'static str {
        "ksud (KernelSU)"
    }

    async fn apply(
        &self,
        exec: &PrivilegedExecutor,
        rules: &[&str],
        tmp_path: &str,
        _log: &GadgetLog,
    ) -> bool {
        if !exec.check(format!("test -f {}", self.ksud)).await {
            return false;
        }
        write_rules_file(exec, rules, tmp_path).await
            && exec
                .check(format!("{} sepolicy apply {}", self.ksud, tmp_path))
                .await
    }
}

/// Magisk / APatch `magiskpolicy`
pub struct MagiskPolicyBackend {
    candidates: Vec<String>,
}

impl Default for MagiskPolicyBackend {
    fn default() -> Self {
        Self {
            candidates: [
                "/data/adb/magisk/magiskpolicy",
                "/data/adb/ap/bin/magiskpolicy",
                "/data/adb/magisk/supolicy",
                "/system/bin/magiskpolicy",
                "/sbin/magiskpolicy",
                "/sbin/supolicy",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl MagiskPolicyBackend {
    async fn locate(&self, exec: &PrivilegedExecutor, log: &GadgetLog) -> Option<String> {
        for path in &self.candidates {
            if exec.check(format!("test -f {}", path)).await {
                log.info(format!("Found magiskpolicy at: {}", path));
                return Some(path.clone());
            }
        }

        // Magisk's tmpfs mount
        let tmpfs = exec.capture("magisk --path").await?;
        if tmpfs.is_empty() {
            return None;
        }
        let path = format!("{}/magiskpolicy", tmpfs);
        if exec.check(format!("test -f {}", path)).await {
            log.info(format!("Found magiskpolicy at tmpfs: {}", path));
            return Some(path);
        }
        None
    }
}

#[async_trait]
impl PolicyBackend for MagiskPolicyBackend {
    fn name(&self) -> &'static str {
        "magiskpolicy (Magisk)"
    }

    async fn apply(
        &self,
        exec: &PrivilegedExecutor,
        rules: &[&str],
        tmp_path: &str,
        log: &GadgetLog,
    ) -> bool {
        let Some(tool) = self.locate(exec, log).await else {
            return false;
        };

        if write_rules_file(exec, rules, tmp_path).await
            && exec
                .check(format!("{} --live --apply {}", tool, tmp_path))
                .await
        {
            return true;
        }

        log.info("File-based apply failed, trying inline rules...");
        apply_each(exec, &tool, rules).await
    }
}

/// Legacy SuperSU `supolicy`
#[derive(Default)]
pub struct SuPolicyBackend;

#[async_trait]
impl PolicyBackend for SuPolicyBackend {
    fn name(&self) -> &'static str {
        "supolicy (SuperSU)"
    }

    async fn apply(
        &self,
        exec: &PrivilegedExecutor,
        rules: &[&str],
        _tmp_path: &str,
        log: &GadgetLog,
    ) -> bool {
        if !exec.check("which supolicy").await {
            return false;
        }
        log.info("Trying legacy supolicy...");
        apply_each(exec, "supolicy", rules).await
    }
}

/// Ordered list of policy backends
pub struct PolicyInjector {
    exec: PrivilegedExecutor,
    backends: Vec<Box<dyn PolicyBackend>>,
    tmp_path: String,
    log: GadgetLog,
}

impl PolicyInjector {
    pub fn new(exec: PrivilegedExecutor, tmp_path: impl Into<String>, log: GadgetLog) -> Self {
        Self::with_backends(
            exec,
            vec![
                Box::new(KernelSuBackend::default()),
                Box::new(MagiskPolicyBackend::default()),
                Box::new(SuPolicyBackend),
            ],
            tmp_path,
            log,
        )
    }

    pub fn with_backends(
        exec: PrivilegedExecutor,
        backends: Vec<Box<dyn PolicyBackend>>,
        tmp_path: impl Into<String>,
        log: GadgetLog,
    ) -> Self {
        Self {
            exec,
            backends,
            tmp_path: tmp_path.into(),
            log,
        }
    }

    /// Apply [`SELINUX_RULES`] with the first backend that succeeds
    ///
    /// Failure is only a warning: the missing permission shows up later
    /// when the PCM device is opened.
    pub async fn apply(&self) -> Result<&'static str> {
        let mut applied = None;
        for backend in &self.backends {
            if backend
                .apply(&self.exec, &SELINUX_RULES, &self.tmp_path, &self.log)
                .await
            {
                applied = Some(backend.name());
                break;
            }
        }

        let mut cleanup = CommandBatch::with_capacity(1);
        cleanup.tolerated(format!("rm -f {}", self.tmp_path));
        self.exec.run(&cleanup).await;

        match applied {
            Some(name) => {
                self.log
                    .info(format!("SELinux rules applied via {}", name));
                Ok(name)
            }
            None => {
                self.log.warn(
                    "Warning: No SELinux policy tool succeeded (tried KernelSU, Magisk, SuperSU)",
                );
                self.log
                    .warn("Audio device access may fail without proper SELinux rules");
                Err(AppError::PolicyApplyFailed)
            }
        }
    }
}
