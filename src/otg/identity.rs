//! USB device identity
//!
//! The identity is derived from the sample rate so the host re-enumerates
//! (and drops any cached descriptors) whenever the rate changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// USB Vendor ID (Linux Foundation)
pub const USB_VENDOR_ID: u16 = 0x1d6b;

/// USB spec version (USB 2.0)
pub const USB_BCD_USB: u16 = 0x0200;

/// Manufacturer string written while the gadget is ours
pub const MANUFACTURER: &str = "Linux UAC2 Bridge";

/// Product string written while the gadget is ours
pub const PRODUCT: &str = "USB Audio Bridge";

/// Substring of [`PRODUCT`] used to recognise a spoofed identity
const PRODUCT_MARKER: &str = "Audio Bridge";

/// Serial used when nothing could be backed up
pub const UNKNOWN_SERIAL: &str = "UNKNOWN";

/// Sample rates the gadget is commonly configured for
pub const SUPPORTED_RATES: [u32; 7] = [22050, 32000, 44100, 48000, 88200, 96000, 192000];

/// Full device descriptor identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub bcd_usb: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,
}

impl GadgetIdentity {
    /// Identity for `sample_rate`, keeping the device's own serial as a suffix
    pub fn for_rate(sample_rate: u32, device_serial: &str) -> Self {
        Self {
            vendor_id: USB_VENDOR_ID,
            product_id: product_id_for_rate(sample_rate),
            bcd_device: bcd_device_for_rate(sample_rate),
            bcd_usb: USB_BCD_USB,
            manufacturer: MANUFACTURER.to_string(),
            product: PRODUCT.to_string(),
            serial_number: serial_for_rate(sample_rate, device_serial),
        }
    }
}

/// Product ID per sample rate
pub fn product_id_for_rate(sample_rate: u32) -> u16 {
    match sample_rate {
        48000 => 0x0104,
        44100 => 0x0105,
        32000 => 0x0106,
        22050 => 0x0107,
        88200 => 0x0108,
        96000 => 0x0109,
        192000 => 0x010A,
        _ => 0x010B,
    }
}

/// bcdDevice per sample rate
pub fn bcd_device_for_rate(sample_rate: u32) -> u16 {
    match sample_rate {
        44100 => 0x0244,
        48000 => 0x0248,
        88200 => 0x0288,
        96000 => 0x0296,
        192000 => 0x0292,
        32000 => 0x0232,
        22050 => 0x0222,
        _ => 0x0200,
    }
}

pub fn serial_for_rate(sample_rate: u32, device_serial: &str) -> String {
    format!("UAM-SR{}-{}", sample_rate, device_serial)
}

/// Format a descriptor field the way configfs expects it
pub fn hex16(value: u16) -> String {
    format!("0x{:04x}", value)
}

/// Whether the strings already belong to a gadget we configured
pub fn is_ours(manufacturer: &str, product: &str) -> bool {
    product.contains(PRODUCT_MARKER) || manufacturer == MANUFACTURER
}

/// Device strings as they were before the first spoof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalIdentity {
    pub manufacturer: String,
    pub product: String,
    pub serial: String,
    pub captured_at: DateTime<Utc>,
}

impl OriginalIdentity {
    pub fn new(
        manufacturer: impl Into<String>,
        product: impl Into<String>,
        serial: impl Into<String>,
    ) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            product: product.into(),
            serial: serial.into(),
            captured_at: Utc::now(),
        }
    }

    /// Serial to embed in the spoofed serial number
    pub fn device_serial(&self) -> &str {
        if self.serial.is_empty() {
            UNKNOWN_SERIAL
        } else {
            &self.serial
        }
    }
}
