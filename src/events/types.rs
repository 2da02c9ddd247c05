//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// System event enumeration
///
/// All events are tagged with their event name for serialization.
/// The `serde(tag = "event", content = "data")` attribute creates a
/// JSON structure like:
/// ```json
/// {
///   "event": "session.state_changed",
///   "data": { "label": "Streaming", "color": 4283215696, "running": true, "active_directions": 1 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum SystemEvent {
    // ============================================================================
    // Log Stream
    // ============================================================================
    /// Human-readable progress line ("[Gadget] ...", "[App] ...")
    #[serde(rename = "log")]
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },

    // ============================================================================
    // Bridge Session Events
    // ============================================================================
    /// Session status label changed
    #[serde(rename = "session.state_changed")]
    SessionStateChanged {
        /// Display text, e.g. "Streaming", "Active (Waiting for Host...)"
        label: String,
        /// ARGB display color
        color: u32,
        /// Whether the native engine is running
        running: bool,
        /// Direction bitmask of the running session
        active_directions: u8,
    },

    /// Stream numbers reported by the native engine
    #[serde(rename = "session.stats")]
    BridgeStats {
        rate: u32,
        period: u32,
        buffer: u32,
    },

    /// Host-side output device went away
    #[serde(rename = "session.output_disconnected")]
    OutputDisconnected {
        /// Whether the session is being restarted instead of stopped
        auto_restart: bool,
    },

    /// Mute flags changed
    #[serde(rename = "session.mute_changed")]
    MuteChanged { speaker: bool, mic: bool },

    // ============================================================================
    // Gadget Events
    // ============================================================================
    /// Outcome of an enable/disable request
    #[serde(rename = "gadget.result")]
    GadgetResult { success: bool },

    /// Gadget binding snapshot
    #[serde(rename = "gadget.status")]
    GadgetStatus {
        /// Controller name, "--" when unbound
        udc_controller: String,
        /// Comma-separated function names, "--" when none
        active_functions: String,
    },
}

impl SystemEvent {
    /// Log line stamped with the current time
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::SessionStateChanged { .. } => "session.state_changed",
            Self::BridgeStats { .. } => "session.stats",
            Self::OutputDisconnected { .. } => "session.output_disconnected",
            Self::MuteChanged { .. } => "session.mute_changed",
            Self::GadgetResult { .. } => "gadget.result",
            Self::GadgetStatus { .. } => "gadget.status",
        }
    }
}
