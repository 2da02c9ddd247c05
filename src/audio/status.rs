//! User-facing status text for the bridge session

use serde::{Deserialize, Serialize};

use super::types::{Directions, SessionState};

pub const COLOR_ERROR: u32 = 0xFFF4_4336;
pub const COLOR_INACTIVE: u32 = 0xFF88_8888;
pub const COLOR_NOT_CONNECTED: u32 = 0xFFFF_A000;
pub const COLOR_SEARCHING: u32 = 0xFFFF_C107;
pub const COLOR_STREAMING: u32 = 0xFF4C_AF50;
pub const COLOR_IDLING: u32 = 0xFF03_A9F4;

/// Status line with its ARGB color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLabel {
    pub text: String,
    pub color: u32,
}

impl StatusLabel {
    fn new(text: impl Into<String>, color: u32) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }
}

/// Label for the session state as shown in the main status line
///
/// `host_connected` is the USB cable state; while it is false the
/// connecting and waiting states read as "Not Connected".
pub fn session_label(state: &SessionState, running: bool, host_connected: bool) -> StatusLabel {
    if let SessionState::Error(message) = state {
        return StatusLabel::new(format!("Error ({})", message), COLOR_ERROR);
    }
    if !running {
        return StatusLabel::new("Stopped", COLOR_INACTIVE);
    }

    match state {
        SessionState::Connecting | SessionState::Waiting if !host_connected => {
            StatusLabel::new("Active (Not Connected)", COLOR_NOT_CONNECTED)
        }
        SessionState::Connecting => StatusLabel::new("Active (Searching...)", COLOR_SEARCHING),
        SessionState::Waiting => {
            StatusLabel::new("Active (Waiting for Host...)", COLOR_SEARCHING)
        }
        SessionState::Streaming => StatusLabel::new("Streaming", COLOR_STREAMING),
        SessionState::Idling => StatusLabel::new("Active (Idling)", COLOR_IDLING),
        _ => StatusLabel::new("Active", COLOR_INACTIVE),
    }
}

/// Text of the persistent notification
pub fn notification_text(
    gadget_enabled: bool,
    state: &SessionState,
    running: bool,
    directions: Directions,
) -> String {
    if !gadget_enabled {
        return "Inactive - Gadget disabled".to_string();
    }
    if running {
        format!("Active ({}) - {}", state.name(), directions.label())
    } else {
        state.name().to_string()
    }
}
