//! ConfigFS layout and command batches for the UAC2 gadget
//!
//! All configfs access goes through the privileged shell, so this module
//! only knows paths and the commands that mutate them.

use super::identity::{hex16, GadgetIdentity};
use crate::shell::{write_cmd, CommandBatch};

/// Default gadget directory
pub const GADGET_ROOT: &str = "/config/usb_gadget/g1";

/// Configuration the functions are linked into
pub const CONFIG_NAME: &str = "b.1";

pub const UAC2_FUNCTION: &str = "uac2.0";
pub const ADB_FUNCTION: &str = "ffs.adb";

/// English (US) string table
const LANG: &str = "0x409";

/// Stereo on both directions
pub const CHANNEL_MASK: u32 = 3;

/// Bytes per sample (16-bit)
pub const SAMPLE_SIZE: u32 = 2;

/// USB requests queued per direction
const REQ_NUMBER: u32 = 2;

/// Paths inside one gadget directory
#[derive(Debug, Clone)]
pub struct GadgetPaths {
    root: String,
}

impl GadgetPaths {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn udc(&self) -> String {
        format!("{}/UDC", self.root)
    }

    pub fn attr(&self, name: &str) -> String {
        format!("{}/{}", self.root, name)
    }

    pub fn strings_dir(&self) -> String {
        format!("{}/strings/{}", self.root, LANG)
    }

    pub fn string(&self, name: &str) -> String {
        format!("{}/{}", self.strings_dir(), name)
    }

    pub fn config_dir(&self) -> String {
        format!("{}/configs/{}", self.root, CONFIG_NAME)
    }

    pub fn config_strings_dir(&self) -> String {
        format!("{}/strings/{}", self.config_dir(), LANG)
    }

    /// `configs/b.1/f<n>` symlink
    pub fn function_link(&self, n: u8) -> String {
        format!("{}/f{}", self.config_dir(), n)
    }

    pub fn function_dir(&self, name: &str) -> String {
        format!("{}/functions/{}", self.root, name)
    }

    pub fn uac2_attr(&self, name: &str) -> String {
        format!("{}/{}", self.function_dir(UAC2_FUNCTION), name)
    }
}

impl Default for GadgetPaths {
    fn default() -> Self {
        Self::new(GADGET_ROOT)
    }
}

/// A UDC value of empty or the literal "none" both mean unbound
pub fn is_unbound(udc: &str) -> bool {
    let udc = udc.trim();
    udc.is_empty() || udc == "none"
}

/// Display name for a function symlink target
///
/// `.../functions/uac2.0` becomes `uac2`, `.../functions/ffs.adb` becomes `adb`.
pub fn normalize_function_name(target: &str) -> String {
    let name = target.trim().rsplit('/').next().unwrap_or_default();
    if name.starts_with("uac2") {
        "uac2".to_string()
    } else if let Some(stripped) = name.strip_prefix("ffs.") {
        stripped.to_string()
    } else {
        name.to_string()
    }
}

/// Rebuild the gadget as UAC2 (optionally + ADB)
///
/// Cleanup steps are tolerated; every structural write is required.
pub fn configure_batch(
    paths: &GadgetPaths,
    identity: &GadgetIdentity,
    sample_rate: u32,
    with_adb: bool,
) -> CommandBatch {
    let rate = sample_rate.to_string();
    let chmask = CHANNEL_MASK.to_string();
    let ssize = SAMPLE_SIZE.to_string();

    let mut batch = CommandBatch::with_capacity(28);
    batch
        .tolerated(format!("rm -f {}", paths.function_link(1)))
        .tolerated(format!("rm -f {}", paths.function_link(2)))
        .tolerated(format!("rmdir {}", paths.function_dir(UAC2_FUNCTION)))
        .required(write_cmd(&hex16(identity.vendor_id), &paths.attr("idVendor")))
        .required(write_cmd(&hex16(identity.product_id), &paths.attr("idProduct")))
        .required(write_cmd(&hex16(identity.bcd_device), &paths.attr("bcdDevice")))
        .required(write_cmd(&hex16(identity.bcd_usb), &paths.attr("bcdUSB")))
        .required(format!("mkdir -p {}", paths.function_dir(UAC2_FUNCTION)))
        .required(write_cmd(&rate, &paths.uac2_attr("p_srate")))
        .required(write_cmd(&chmask, &paths.uac2_attr("p_chmask")))
        .required(write_cmd(&ssize, &paths.uac2_attr("p_ssize")))
        .required(write_cmd(&rate, &paths.uac2_attr("c_srate")))
        .required(write_cmd(&chmask, &paths.uac2_attr("c_chmask")))
        .required(write_cmd(&ssize, &paths.uac2_attr("c_ssize")))
        // Older kernels lack req_number
        .tolerated(write_cmd(&REQ_NUMBER.to_string(), &paths.uac2_attr("req_number")))
        .required(format!("mkdir -p {}", paths.strings_dir()))
        .required(write_cmd(&identity.manufacturer, &paths.string("manufacturer")))
        .required(write_cmd(&identity.product, &paths.string("product")))
        .required(write_cmd(&identity.serial_number, &paths.string("serialnumber")))
        .required(format!("mkdir -p {}", paths.config_strings_dir()));

    let configuration = if with_adb {
        "USB Audio + ADB"
    } else {
        "USB Audio"
    };
    batch
        .required(write_cmd(
            configuration,
            &format!("{}/configuration", paths.config_strings_dir()),
        ))
        .required(format!(
            "ln -s {} {}",
            paths.function_dir(UAC2_FUNCTION),
            paths.function_link(1)
        ));
    if with_adb {
        batch.required(format!(
            "ln -s {} {}",
            paths.function_dir(ADB_FUNCTION),
            paths.function_link(2)
        ));
    }
    batch
}

/// Overwrite the three identity strings
pub fn strings_batch(
    paths: &GadgetPaths,
    manufacturer: &str,
    product: &str,
    serial: &str,
) -> CommandBatch {
    let mut batch = CommandBatch::with_capacity(3);
    batch
        .tolerated(write_cmd(manufacturer, &paths.string("manufacturer")))
        .tolerated(write_cmd(product, &paths.string("product")))
        .tolerated(write_cmd(serial, &paths.string("serialnumber")));
    batch
}

/// Unlink our functions and drop the UAC2 function directory
pub fn remove_functions_batch(paths: &GadgetPaths) -> CommandBatch {
    let mut batch = CommandBatch::with_capacity(3);
    batch
        .tolerated(format!("rm -f {}", paths.function_link(1)))
        .tolerated(format!("rm -f {}", paths.function_link(2)))
        .tolerated(format!("rmdir {}", paths.function_dir(UAC2_FUNCTION)));
    batch
}
