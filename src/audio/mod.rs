//! USB audio bridge session
//!
//! Architecture:
//! ```text
//! SessionHandle ──commands──▶ AudioBridgeSession (actor) ──▶ AudioEngine (native)
//!                                   ▲                              │
//!                                   └──── NativeEvent (bounded) ───┘
//! ```
//!
//! The session owns the state machine; the native engine owns the PCM
//! threads and only talks back through [`EngineCallbacks`].

pub mod engine;
pub mod session;
pub mod status;
pub mod types;

pub use engine::{AudioEngine, EngineCallbacks, EngineStartConfig, NativeEvent, PlaybackTrack};
pub use session::{AudioBridgeSession, SessionHandle, SessionOptions, SessionSnapshot};
pub use status::{notification_text, session_label, StatusLabel};
pub use types::{
    BridgeParameters, Directions, EngineType, MuteDirection, MuteState, SessionState, StreamStats,
};
