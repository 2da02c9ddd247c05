//! Native PCM engine boundary
//!
//! The engine (ALSA capture plus a platform playback backend) lives outside
//! this crate. It is driven through [`AudioEngine`] and reports back through
//! [`EngineCallbacks`], which never blocks the calling thread. State and
//! error reports go through an unbounded control channel; periodic stats go
//! through a bounded one and are shed when the session falls behind.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{BridgeParameters, StreamStats};
use crate::error::Result;

/// Capacity of the stats channel
pub const STATS_EVENT_CAPACITY: usize = 64;

/// Everything the engine needs to open the gadget's PCM devices
#[derive(Clone)]
pub struct EngineStartConfig {
    /// ALSA card index of the gadget
    pub card: u32,
    /// PCM device on that card
    pub device: u32,
    pub params: BridgeParameters,
    /// Host playback sink, only for the AudioTrack backend
    pub playback_track: Option<Arc<dyn PlaybackTrack>>,
}

impl fmt::Debug for EngineStartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineStartConfig")
            .field("card", &self.card)
            .field("device", &self.device)
            .field("params", &self.params)
            .field("playback_track", &self.playback_track.is_some())
            .finish()
    }
}

/// Native audio engine
///
/// Calls must return promptly; the engine runs its PCM threads itself.
pub trait AudioEngine: Send + Sync {
    fn start(&self, config: &EngineStartConfig, callbacks: EngineCallbacks) -> Result<()>;

    fn stop(&self);

    fn set_speaker_muted(&self, muted: bool);

    fn set_mic_muted(&self, muted: bool);
}

/// Platform playback sink used by the AudioTrack backend
///
/// Called from the engine's playback thread.
pub trait PlaybackTrack: Send + Sync {
    fn init(&self, sample_rate: u32, channels: u32, buffer_frames: u32) -> bool;

    fn start(&self);

    /// Interleaved 16-bit samples; returns how many were accepted
    fn write(&self, samples: &[i16]) -> usize;

    fn stop(&self);

    fn release(&self);
}

/// Inbound engine notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    /// Raw state code (0 stopped .. 5 error)
    State(i32),
    Stats(StreamStats),
    Error(String),
    /// An engine thread that wants real-time scheduling
    ThreadStart(i32),
    /// The host-side output device went away
    OutputDisconnected,
}

#[derive(Debug)]
pub(crate) struct NativeMessage {
    pub generation: u64,
    pub event: NativeEvent,
}

/// Callback handle given to the engine on start
///
/// Tagged with the start generation so events from an engine instance that
/// has since been stopped are discarded.
#[derive(Clone)]
pub struct EngineCallbacks {
    generation: u64,
    control: mpsc::UnboundedSender<NativeMessage>,
    stats: mpsc::Sender<NativeMessage>,
}

impl EngineCallbacks {
    pub(crate) fn new(
        generation: u64,
        control: mpsc::UnboundedSender<NativeMessage>,
        stats: mpsc::Sender<NativeMessage>,
    ) -> Self {
        Self {
            generation,
            control,
            stats,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn message(&self, event: NativeEvent) -> NativeMessage {
        NativeMessage {
            generation: self.generation,
            event,
        }
    }

    fn send(&self, event: NativeEvent) {
        if self.control.send(self.message(event)).is_err() {
            debug!("Session gone, native event ignored");
        }
    }

    fn send_stats(&self, stats: StreamStats) {
        match self.stats.try_send(self.message(NativeEvent::Stats(stats))) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Stats queue full, dropping sample")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Session gone, stats ignored");
            }
        }
    }

    pub fn on_state(&self, code: i32) {
        self.send(NativeEvent::State(code));
    }

    pub fn on_stats(&self, rate: u32, period: u32, buffer: u32) {
        self.send_stats(StreamStats {
            rate,
            period,
            buffer,
        });
    }

    pub fn on_error(&self, message: impl Into<String>) {
        self.send(NativeEvent::Error(message.into()));
    }

    pub fn on_thread_start(&self, tid: i32) {
        self.send(NativeEvent::ThreadStart(tid));
    }

    pub fn on_output_disconnected(&self) {
        self.send(NativeEvent::OutputDisconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_stats_queue_keeps_control_events() {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let (stats_tx, mut stats_rx) = mpsc::channel(2);
        let callbacks = EngineCallbacks::new(7, control_tx, stats_tx);

        callbacks.on_state(1);
        for period in 0..5 {
            // Returns immediately once the queue is full
            callbacks.on_stats(48000, period, 960);
        }
        callbacks.on_error("xrun storm");
        callbacks.on_thread_start(1234);

        let first = control_rx.recv().await.unwrap();
        assert_eq!(first.generation, 7);
        assert_eq!(first.event, NativeEvent::State(1));
        assert_eq!(
            control_rx.recv().await.unwrap().event,
            NativeEvent::Error("xrun storm".to_string())
        );
        assert_eq!(control_rx.recv().await.unwrap().event, NativeEvent::ThreadStart(1234));

        let kept: Vec<u32> = std::iter::from_fn(|| stats_rx.try_recv().ok())
            .filter_map(|m| match m.event {
                NativeEvent::Stats(stats) => Some(stats.period),
                _ => None,
            })
            .collect();
        assert_eq!(kept, vec![0, 1]);
    }
}
