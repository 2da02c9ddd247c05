use serde::{Deserialize, Serialize};

use crate::audio::{Directions, EngineType};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Audio bridge settings (passed into session start)
    pub bridge: BridgeSettings,
    /// USB gadget / configfs settings
    pub gadget: GadgetConfig,
}

/// Audio bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Ring buffer size in frames
    pub buffer_size: u32,
    /// ALSA period size in frames (0 = auto)
    pub period_size: u32,
    /// Playback backend
    pub engine_type: EngineType,
    /// Gadget and stream sample rate
    pub sample_rate: u32,
    /// Keep ADB alive as a composite function
    pub keep_adb: bool,
    /// Restart the stream when the output device changes instead of stopping
    pub auto_restart_on_output_change: bool,
    /// Mute the speaker direction on a headset media button press
    pub mute_on_media_button: bool,
    /// Speaker = 1, Mic = 2, both = 3
    pub active_directions: Directions,
    /// Platform microphone source preset
    pub mic_source: u32,
    /// Show the persistent status notification
    pub notification_enabled: bool,
    pub screensaver_enabled: bool,
    pub screensaver_timeout_secs: u32,
    pub screensaver_reposition_secs: u32,
    pub screensaver_fullscreen: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            buffer_size: 4800,
            period_size: 0,
            engine_type: EngineType::AAudio,
            sample_rate: 48000,
            keep_adb: false,
            auto_restart_on_output_change: false,
            mute_on_media_button: true,
            active_directions: Directions::SPEAKER,
            // Voice recognition preset
            mic_source: 6,
            notification_enabled: true,
            screensaver_enabled: false,
            screensaver_timeout_secs: 15,
            screensaver_reposition_secs: 5,
            screensaver_fullscreen: true,
        }
    }
}

impl BridgeSettings {
    /// Apply a single `key=value` setting by its storage key
    pub fn set_by_key(&mut self, key: &str, value: &str) -> Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
            value
                .parse()
                .map_err(|_| format!("Invalid value for {}: {}", key, value))
        }

        match key {
            "buffer_size" => self.buffer_size = parse(key, value)?,
            "period_size" => self.period_size = parse(key, value)?,
            "engine_type" => self.engine_type = parse(key, value)?,
            "sample_rate" => self.sample_rate = parse(key, value)?,
            "keep_adb" => self.keep_adb = parse(key, value)?,
            "auto_restart_on_output_change" => {
                self.auto_restart_on_output_change = parse(key, value)?
            }
            "mute_on_media_button" => self.mute_on_media_button = parse(key, value)?,
            "active_directions" => {
                let mask: u8 = parse(key, value)?;
                self.active_directions = Directions::from_bits(mask)
                    .ok_or_else(|| format!("Invalid direction mask: {}", mask))?;
            }
            "mic_source" => self.mic_source = parse(key, value)?,
            "notification_enabled" => self.notification_enabled = parse(key, value)?,
            "screensaver_enabled" => self.screensaver_enabled = parse(key, value)?,
            "screensaver_timeout_secs" => self.screensaver_timeout_secs = parse(key, value)?,
            "screensaver_reposition_secs" => {
                self.screensaver_reposition_secs = parse(key, value)?
            }
            "screensaver_fullscreen" => self.screensaver_fullscreen = parse(key, value)?,
            _ => return Err(format!("Unknown setting: {}", key)),
        }
        Ok(())
    }
}

/// USB gadget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetConfig {
    /// ConfigFS gadget directory
    pub gadget_root: String,
    /// Directory listing available UDCs
    pub udc_class_dir: String,
    /// Scratch file for policy rule sets
    pub policy_tmp_path: String,
    /// Vendor USB gadget HAL services that fight over the UDC
    pub usb_hal_services: Vec<String>,
    /// Run vendor-specific device mode hooks around bind
    pub vendor_quirks: bool,
    /// Program providing the privileged shell
    pub shell_program: String,
    /// `sys.usb.config` value restored on teardown
    pub normal_usb_config: String,
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            gadget_root: "/config/usb_gadget/g1".to_string(),
            udc_class_dir: "/sys/class/udc".to_string(),
            policy_tmp_path: "/data/local/tmp/uac2_policy.te".to_string(),
            usb_hal_services: [
                "vendor.usb-gadget-hal-1-0",
                "android.hardware.usb.gadget-service.samsung",
                "android.hardware.usb.gadget-service.mediatek",
                "android.hardware.usb-service.mediatek",
                "vendor.usb-hal-1-0",
                "vendor.usb-gadget-hal",
                "usbgadget-hal-1-0",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vendor_quirks: true,
            shell_program: "su".to_string(),
            normal_usb_config: "adb".to_string(),
        }
    }
}
