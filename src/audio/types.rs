//! Audio bridge data model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Playback backend used by the native engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    #[default]
    AAudio,
    #[serde(rename = "opensl")]
    OpenSl,
    #[serde(rename = "audiotrack")]
    AudioTrack,
}

impl EngineType {
    /// Native engine code
    pub fn code(&self) -> i32 {
        match self {
            EngineType::AAudio => 0,
            EngineType::OpenSl => 1,
            EngineType::AudioTrack => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(EngineType::AAudio),
            1 => Some(EngineType::OpenSl),
            2 => Some(EngineType::AudioTrack),
            _ => None,
        }
    }
}

impl FromStr for EngineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aaudio" | "0" => Ok(EngineType::AAudio),
            "opensl" | "opensles" | "1" => Ok(EngineType::OpenSl),
            "audiotrack" | "2" => Ok(EngineType::AudioTrack),
            _ => Err(format!("Unknown engine type: {}", s)),
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineType::AAudio => write!(f, "aaudio"),
            EngineType::OpenSl => write!(f, "opensl"),
            EngineType::AudioTrack => write!(f, "audiotrack"),
        }
    }
}

/// Active stream directions bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Directions(u8);

impl Directions {
    /// Host -> device playback
    pub const SPEAKER: Directions = Directions(1);
    /// Device -> host capture
    pub const MIC: Directions = Directions(2);
    pub const BOTH: Directions = Directions(3);

    pub fn from_bits(bits: u8) -> Option<Self> {
        if (1..=3).contains(&bits) {
            Some(Directions(bits))
        } else {
            None
        }
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn has_speaker(&self) -> bool {
        self.0 & Self::SPEAKER.0 != 0
    }

    pub fn has_mic(&self) -> bool {
        self.0 & Self::MIC.0 != 0
    }

    /// Short label used in status text
    pub fn label(&self) -> &'static str {
        match (self.has_speaker(), self.has_mic()) {
            (true, true) => "Mic + Speaker",
            (true, false) => "Speaker",
            (false, true) => "Mic",
            (false, false) => "",
        }
    }
}

impl Default for Directions {
    fn default() -> Self {
        Self::SPEAKER
    }
}

impl TryFrom<u8> for Directions {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        Directions::from_bits(bits).ok_or_else(|| format!("Invalid direction mask: {}", bits))
    }
}

impl From<Directions> for u8 {
    fn from(d: Directions) -> u8 {
        d.0
    }
}

/// Parameters captured at session start and replayed on auto-restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeParameters {
    pub buffer_size: u32,
    /// 0 = auto
    pub period_size: u32,
    pub engine_type: EngineType,
    pub sample_rate: u32,
    pub active_directions: Directions,
    pub mic_source: u32,
}

impl Default for BridgeParameters {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            period_size: 0,
            engine_type: EngineType::AAudio,
            sample_rate: 48000,
            active_directions: Directions::SPEAKER,
            mic_source: 6,
        }
    }
}

/// Bridge session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Stopped,
    /// Searching for / retrying the PCM device
    Connecting,
    /// PCM open, no data from host yet
    Waiting,
    Streaming,
    /// Stream went quiet
    Idling,
    /// Sticky until an explicit stop or a new start
    Error(String),
}

impl SessionState {
    /// Map a native state code (0..=5)
    pub fn from_code(code: i32, error_message: &str) -> Option<Self> {
        match code {
            0 => Some(SessionState::Stopped),
            1 => Some(SessionState::Connecting),
            2 => Some(SessionState::Waiting),
            3 => Some(SessionState::Streaming),
            4 => Some(SessionState::Idling),
            5 => Some(SessionState::Error(error_message.to_string())),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SessionState::Error(_))
    }

    /// Short state name
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Stopped => "Inactive",
            SessionState::Connecting => "Connecting",
            SessionState::Waiting => "Waiting for host",
            SessionState::Streaming => "Streaming",
            SessionState::Idling => "Idle",
            SessionState::Error(_) => "Error",
        }
    }
}

/// Mute direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuteDirection {
    Speaker,
    Mic,
}

/// Independent per-direction mute flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MuteState {
    pub speaker: bool,
    pub mic: bool,
}

impl MuteState {
    pub fn toggle(&mut self, direction: MuteDirection) -> bool {
        let flag = match direction {
            MuteDirection::Speaker => &mut self.speaker,
            MuteDirection::Mic => &mut self.mic,
        };
        *flag = !*flag;
        *flag
    }
}

/// Stream numbers reported by the native engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub rate: u32,
    pub period: u32,
    pub buffer: u32,
}
