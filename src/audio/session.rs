//! Audio bridge session
//!
//! One actor task owns the session state. API calls arrive as commands with
//! a oneshot reply; native engine callbacks arrive tagged with the start
//! generation, state and errors on an unbounded channel and stats on a
//! bounded one. All of them are processed by the same loop,
//! so no two state mutations ever run concurrently.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::engine::{
    AudioEngine, EngineCallbacks, EngineStartConfig, NativeEvent, NativeMessage, PlaybackTrack,
    STATS_EVENT_CAPACITY,
};
use super::status::{session_label, StatusLabel};
use super::types::{BridgeParameters, MuteDirection, MuteState, SessionState, StreamStats};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::otg::GadgetManager;
use crate::utils::LogThrottler;
use crate::{info_throttled, warn_throttled};

/// Real-time priority given to engine threads
const RT_PRIORITY: u32 = 50;

/// Message attached to a native error state code
const NATIVE_ERROR_STATE: &str = "Native engine reported an error";

#[derive(Clone)]
pub struct SessionOptions {
    /// Restart instead of stop when the host output device goes away
    pub auto_restart_on_output_change: bool,
    /// Pause between stopping and restarting on output change
    pub restart_settle: Duration,
    /// Playback sink handed to the AudioTrack backend
    pub playback_track: Option<Arc<dyn PlaybackTrack>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_restart_on_output_change: false,
            restart_settle: Duration::from_millis(300),
            playback_track: None,
        }
    }
}

/// Observable session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub running: bool,
    pub mute: MuteState,
    pub host_connected: bool,
    pub auto_restart: bool,
    /// Parameters of the last start, replayed on restart
    pub params: Option<BridgeParameters>,
    pub stats: Option<StreamStats>,
    pub label: StatusLabel,
}

enum Command {
    Start(BridgeParameters, oneshot::Sender<Result<()>>),
    StopOnly(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    OutputDisconnected(oneshot::Sender<()>),
    ToggleMute(MuteDirection, oneshot::Sender<MuteState>),
    SetHostConnected(bool, oneshot::Sender<()>),
    SetAutoRestart(bool, oneshot::Sender<()>),
    ToggleCapture(oneshot::Sender<Result<()>>),
    Status(oneshot::Sender<SessionSnapshot>),
}

/// Client side of a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| AppError::Internal("audio session closed".to_string()))?;
        rx.await
            .map_err(|_| AppError::Internal("audio session dropped the request".to_string()))
    }

    /// Start the bridge; a no-op while already running
    ///
    /// Fails with `CardNotFound` (and leaves the state untouched) when the
    /// gadget's sound card is missing.
    pub async fn start(&self, params: BridgeParameters) -> Result<()> {
        self.request(|reply| Command::Start(params, reply)).await?
    }

    /// Stop the engine, keep the gadget bound; clears a sticky error
    pub async fn stop_only(&self) -> Result<()> {
        self.request(Command::StopOnly).await
    }

    /// Stop the engine and tear the gadget down
    pub async fn stop(&self) -> Result<()> {
        self.request(Command::Stop).await
    }

    /// The host output device (headphones, Bluetooth) went away
    pub async fn on_output_disconnected(&self) -> Result<()> {
        self.request(Command::OutputDisconnected).await
    }

    pub async fn toggle_mute(&self, direction: MuteDirection) -> Result<MuteState> {
        self.request(|reply| Command::ToggleMute(direction, reply))
            .await
    }

    /// USB power/cable state, used for the status label
    pub async fn set_host_connected(&self, connected: bool) -> Result<()> {
        self.request(|reply| Command::SetHostConnected(connected, reply))
            .await
    }

    pub async fn set_auto_restart(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetAutoRestart(enabled, reply))
            .await
    }

    /// Full stop when running, otherwise start with the last parameters
    pub async fn toggle_capture(&self) -> Result<()> {
        self.request(Command::ToggleCapture).await?
    }

    /// Snapshot taken by the session after all queued engine events
    pub async fn status(&self) -> Result<SessionSnapshot> {
        self.request(Command::Status).await
    }

    /// Latest published snapshot, without a round trip
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }
}

pub struct AudioBridgeSession {
    engine: Arc<dyn AudioEngine>,
    gadget: Arc<GadgetManager>,
    events: Arc<EventBus>,
    options: SessionOptions,
    control_tx: mpsc::UnboundedSender<NativeMessage>,
    stats_tx: mpsc::Sender<NativeMessage>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// Bumped on every engine start and stop
    generation: u64,
    state: SessionState,
    running: bool,
    mute: MuteState,
    host_connected: bool,
    last_params: Option<BridgeParameters>,
    last_stats: Option<StreamStats>,
    throttle: LogThrottler,
}

impl AudioBridgeSession {
    /// Spawn the session actor on the current runtime
    pub fn spawn(
        engine: Arc<dyn AudioEngine>,
        gadget: Arc<GadgetManager>,
        events: Arc<EventBus>,
        options: SessionOptions,
    ) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = mpsc::channel(STATS_EVENT_CAPACITY);

        let initial = SessionSnapshot {
            state: SessionState::Stopped,
            running: false,
            mute: MuteState::default(),
            host_connected: false,
            auto_restart: options.auto_restart_on_output_change,
            params: None,
            stats: None,
            label: session_label(&SessionState::Stopped, false, false),
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let session = Self {
            engine,
            gadget,
            events,
            options,
            control_tx,
            stats_tx,
            snapshot_tx,
            generation: 0,
            state: SessionState::Stopped,
            running: false,
            mute: MuteState::default(),
            host_connected: false,
            last_params: None,
            last_stats: None,
            throttle: LogThrottler::with_secs(5),
        };
        tokio::spawn(session.run(command_rx, control_rx, stats_rx));

        SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut control: mpsc::UnboundedReceiver<NativeMessage>,
        mut stats: mpsc::Receiver<NativeMessage>,
    ) {
        info!("Audio bridge session started");
        loop {
            tokio::select! {
                // Engine events queued before a command are handled first, control ahead of stats
                biased;

                Some(message) = control.recv() => self.handle_native(message).await,
                Some(message) = stats.recv() => self.handle_native(message).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        if self.running {
            self.engine.stop();
        }
        info!("Audio bridge session closed");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(params, reply) => {
                let _ = reply.send(self.start(params).await);
            }
            Command::StopOnly(reply) => {
                self.stop_only();
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::OutputDisconnected(reply) => {
                self.on_output_disconnected().await;
                let _ = reply.send(());
            }
            Command::ToggleMute(direction, reply) => {
                let _ = reply.send(self.toggle_mute(direction));
            }
            Command::SetHostConnected(connected, reply) => {
                if self.host_connected != connected {
                    self.host_connected = connected;
                    self.publish_state();
                }
                let _ = reply.send(());
            }
            Command::SetAutoRestart(enabled, reply) => {
                self.options.auto_restart_on_output_change = enabled;
                self.update_snapshot();
                let _ = reply.send(());
            }
            Command::ToggleCapture(reply) => {
                let result = if self.running {
                    self.stop().await;
                    Ok(())
                } else {
                    let params = self.last_params.unwrap_or_default();
                    self.start(params).await
                };
                let _ = reply.send(result);
            }
            Command::Status(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn handle_native(&mut self, message: NativeMessage) {
        if message.generation != self.generation {
            warn_throttled!(
                self.throttle,
                "stale_native_event",
                "Ignoring native event from stopped engine (generation {} != {})",
                message.generation,
                self.generation
            );
            return;
        }

        match message.event {
            NativeEvent::State(code) => self.on_native_state(code),
            NativeEvent::Stats(stats) => self.on_stats(stats),
            NativeEvent::Error(msg) => self.on_native_error(msg),
            NativeEvent::ThreadStart(tid) => self.promote_thread(tid),
            NativeEvent::OutputDisconnected => self.on_output_disconnected().await,
        }
    }

    async fn start(&mut self, params: BridgeParameters) -> Result<()> {
        if self.running {
            debug!("Audio bridge already running");
            return Ok(());
        }
        self.last_params = Some(params);

        let card = self.gadget.find_and_prepare_card().await?;

        self.generation += 1;
        let config = EngineStartConfig {
            card,
            device: 0,
            params,
            playback_track: self.options.playback_track.clone(),
        };
        let callbacks = EngineCallbacks::new(
            self.generation,
            self.control_tx.clone(),
            self.stats_tx.clone(),
        );
        if let Err(e) = self.engine.start(&config, callbacks) {
            warn!("Native engine failed to start: {}", e);
            self.set_state(SessionState::Error(e.to_string()));
            return Err(e);
        }

        self.engine.set_speaker_muted(self.mute.speaker);
        self.engine.set_mic_muted(self.mute.mic);

        self.running = true;
        self.last_stats = None;
        self.app_log(format!(
            "Bridge started on card {} ({} Hz, {}, buffer {})",
            card,
            params.sample_rate,
            params.engine_type,
            params.buffer_size
        ));
        self.set_state(SessionState::Connecting);
        Ok(())
    }

    /// Stop the engine and invalidate its callbacks
    fn stop_engine(&mut self) {
        self.engine.stop();
        self.generation += 1;
        self.running = false;
    }

    fn stop_only(&mut self) {
        if !self.running && !self.state.is_error() {
            return;
        }
        if self.running {
            self.stop_engine();
        }
        self.last_stats = None;
        self.app_log("Bridge stopped");
        self.set_state(SessionState::Stopped);
    }

    async fn stop(&mut self) {
        self.stop_only();
        self.gadget.disable_gadget().await;
    }

    async fn on_output_disconnected(&mut self) {
        if !self.running {
            return;
        }

        let auto_restart = self.options.auto_restart_on_output_change;
        self.events
            .publish(SystemEvent::OutputDisconnected { auto_restart });

        if !auto_restart {
            self.app_log("Output device disconnected, stopping");
            self.stop_only();
            return;
        }

        self.app_log("Output device changed, restarting bridge");
        self.stop_engine();
        tokio::time::sleep(self.options.restart_settle).await;

        let params = self.last_params.unwrap_or_default();
        if let Err(e) = self.start(params).await {
            warn!("Restart after output change failed: {}", e);
            if !self.state.is_error() {
                self.set_state(SessionState::Stopped);
            }
        }
    }

    fn toggle_mute(&mut self, direction: MuteDirection) -> MuteState {
        let muted = self.mute.toggle(direction);
        match direction {
            MuteDirection::Speaker => self.engine.set_speaker_muted(muted),
            MuteDirection::Mic => self.engine.set_mic_muted(muted),
        }
        info!("{:?} muted: {}", direction, muted);

        self.events.publish(SystemEvent::MuteChanged {
            speaker: self.mute.speaker,
            mic: self.mute.mic,
        });
        self.update_snapshot();
        self.mute
    }

    fn on_native_state(&mut self, code: i32) {
        if self.state.is_error() {
            debug!("Ignoring native state {} while in error", code);
            return;
        }
        if code == 5 {
            self.on_native_error(NATIVE_ERROR_STATE.to_string());
            return;
        }
        match SessionState::from_code(code, "") {
            Some(state) => {
                debug!("Native state {} -> {:?}", code, state);
                self.set_state(state);
            }
            None => warn!("Unknown native state code {}", code),
        }
    }

    fn on_stats(&mut self, stats: StreamStats) {
        info_throttled!(
            self.throttle,
            "stats",
            "Stream stats: rate={} period={} buffer={}",
            stats.rate,
            stats.period,
            stats.buffer
        );
        self.last_stats = Some(stats);
        self.events.publish(SystemEvent::BridgeStats {
            rate: stats.rate,
            period: stats.period,
            buffer: stats.buffer,
        });

        // Stats mean data is flowing even if a state change was missed
        if self.running && !self.state.is_error() && self.state != SessionState::Streaming {
            self.set_state(SessionState::Streaming);
        } else {
            self.update_snapshot();
        }
    }

    fn on_native_error(&mut self, message: String) {
        warn!("Native engine error: {}", message);
        if self.running {
            self.stop_engine();
        }
        self.app_log(format!("Error: {}", message));
        self.set_state(SessionState::Error(message));
    }

    /// Ask the kernel for FIFO scheduling on an engine thread
    fn promote_thread(&self, tid: i32) {
        let exec = self.gadget.executor().clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if exec
                .check(format!("chrt -f -p {} {}", RT_PRIORITY, tid))
                .await
            {
                let message = format!("Thread {} promoted to Real-Time (FIFO)", tid);
                info!("{}", message);
                events.publish(SystemEvent::log(format!("[App] {}", message)));
            } else {
                warn!("Failed to promote thread {} to real-time", tid);
            }
        });
    }

    fn app_log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.events
            .publish(SystemEvent::log(format!("[App] {}", message)));
    }

    fn label(&self) -> StatusLabel {
        session_label(&self.state, self.running, self.host_connected)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            running: self.running,
            mute: self.mute,
            host_connected: self.host_connected,
            auto_restart: self.options.auto_restart_on_output_change,
            params: self.last_params,
            stats: self.last_stats,
            label: self.label(),
        }
    }

    fn update_snapshot(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.publish_state();
    }

    fn publish_state(&self) {
        let label = self.label();
        let active_directions = self
            .last_params
            .map(|p| p.active_directions.bits())
            .unwrap_or_default();
        self.events.publish(SystemEvent::SessionStateChanged {
            label: label.text,
            color: label.color,
            running: self.running,
            active_directions,
        });
        self.update_snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::{Directions, EngineType};
    use crate::config::{GadgetConfig, MemoryStateStore};
    use crate::otg::GadgetTiming;
    use crate::shell::PrivilegedExecutor;
    use crate::testing::{FakeDevice, FakeEngine};

    struct Fixture {
        device: Arc<FakeDevice>,
        engine: Arc<FakeEngine>,
        gadget: Arc<GadgetManager>,
        events: Arc<EventBus>,
        session: SessionHandle,
    }

    async fn fixture(auto_restart: bool, bind: bool) -> Fixture {
        let device = Arc::new(FakeDevice::stock());
        let gadget = Arc::new(GadgetManager::with_options(
            GadgetConfig::default(),
            PrivilegedExecutor::new(device.clone()),
            Arc::new(MemoryStateStore::new()),
            None,
            GadgetTiming::immediate(),
        ));
        if bind {
            gadget.enable_gadget(48000, false).await.unwrap();
        }

        let engine = Arc::new(FakeEngine::new());
        let events = Arc::new(EventBus::new());
        let session = AudioBridgeSession::spawn(
            engine.clone(),
            gadget.clone(),
            events.clone(),
            SessionOptions {
                auto_restart_on_output_change: auto_restart,
                restart_settle: Duration::ZERO,
                playback_track: None,
            },
        );
        Fixture {
            device,
            engine,
            gadget,
            events,
            session,
        }
    }

    fn params() -> BridgeParameters {
        BridgeParameters {
            buffer_size: 960,
            period_size: 240,
            engine_type: EngineType::OpenSl,
            sample_rate: 48000,
            active_directions: Directions::BOTH,
            mic_source: 1,
        }
    }

    #[tokio::test]
    async fn test_start_opens_gadget_card() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();

        let starts = f.engine.starts();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].card, 1);
        assert_eq!(starts[0].device, 0);
        assert_eq!(starts[0].params, params());

        let status = f.session.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.state, SessionState::Connecting);
        assert_eq!(status.label.text, "Active (Not Connected)");

        f.session.set_host_connected(true).await.unwrap();
        assert_eq!(f.session.snapshot().label.text, "Active (Searching...)");
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();
        f.session.start(BridgeParameters::default()).await.unwrap();
        assert_eq!(f.engine.starts().len(), 1);
        assert_eq!(f.session.snapshot().params, Some(params()));
    }

    #[tokio::test]
    async fn test_missing_card_leaves_state_alone() {
        let f = fixture(false, false).await;
        let err = f.session.start(params()).await.unwrap_err();
        assert!(matches!(err, AppError::CardNotFound));

        let status = f.session.status().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.state, SessionState::Stopped);
        assert!(f.engine.starts().is_empty());
    }

    #[tokio::test]
    async fn test_stats_force_streaming() {
        let f = fixture(false, true).await;
        let mut rx = f.events.subscribe();
        f.session.start(params()).await.unwrap();
        assert_eq!(f.session.snapshot().state, SessionState::Connecting);

        f.engine.callbacks().on_stats(48000, 240, 960);
        let status = f.session.status().await.unwrap();
        assert_eq!(status.state, SessionState::Streaming);
        assert_eq!(status.label.text, "Streaming");
        assert_eq!(
            status.stats,
            Some(StreamStats {
                rate: 48000,
                period: 240,
                buffer: 960
            })
        );

        let mut saw_stats = false;
        let mut saw_streaming = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SystemEvent::BridgeStats {
                    rate,
                    period,
                    buffer,
                } => {
                    assert_eq!((rate, period, buffer), (48000, 240, 960));
                    saw_stats = true;
                }
                SystemEvent::SessionStateChanged { label, .. } if label == "Streaming" => {
                    saw_streaming = true;
                }
                _ => {}
            }
        }
        assert!(saw_stats);
        assert!(saw_streaming);
    }

    #[tokio::test]
    async fn test_native_state_codes() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();
        let callbacks = f.engine.callbacks();

        callbacks.on_state(2);
        assert_eq!(
            f.session.status().await.unwrap().state,
            SessionState::Waiting
        );
        callbacks.on_state(4);
        let status = f.session.status().await.unwrap();
        assert_eq!(status.state, SessionState::Idling);
        assert_eq!(status.label.text, "Active (Idling)");
    }

    #[tokio::test]
    async fn test_output_disconnect_stops_only() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();

        f.session.on_output_disconnected().await.unwrap();
        let status = f.session.status().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(f.engine.stop_count(), 1);
        assert_eq!(f.engine.starts().len(), 1);

        // Gadget stays bound
        assert!(f.gadget.gadget_status().await.is_bound);
        assert!(f.gadget.is_gadget_active().await);
    }

    #[tokio::test]
    async fn test_output_disconnect_restarts_with_same_params() {
        let f = fixture(true, true).await;
        f.session.start(params()).await.unwrap();

        f.engine.callbacks().on_output_disconnected();
        let status = f.session.status().await.unwrap();
        assert!(status.running);
        assert_eq!(status.state, SessionState::Connecting);

        let starts = f.engine.starts();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[1].params, starts[0].params);
        assert_eq!(starts[1].card, starts[0].card);
        assert_eq!(f.engine.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_auto_restart_can_be_changed() {
        let f = fixture(false, true).await;
        f.session.set_auto_restart(true).await.unwrap();
        f.session.start(params()).await.unwrap();

        f.session.on_output_disconnected().await.unwrap();
        assert!(f.session.status().await.unwrap().running);
        assert_eq!(f.engine.starts().len(), 2);
    }

    #[tokio::test]
    async fn test_mute_is_independent_of_state() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();
        f.engine.callbacks().on_state(3);
        let before = f.session.status().await.unwrap().state;

        let mute = f.session.toggle_mute(MuteDirection::Speaker).await.unwrap();
        assert!(mute.speaker);
        assert!(!mute.mic);
        assert_eq!(f.engine.speaker_muted(), Some(true));

        let mute = f.session.toggle_mute(MuteDirection::Mic).await.unwrap();
        assert!(mute.speaker);
        assert!(mute.mic);

        let status = f.session.status().await.unwrap();
        assert_eq!(status.state, before);
        assert!(status.running);
        assert_eq!(f.engine.stop_count(), 0);
    }

    #[tokio::test]
    async fn test_mute_survives_restart() {
        let f = fixture(false, true).await;
        f.session.toggle_mute(MuteDirection::Mic).await.unwrap();
        f.session.start(params()).await.unwrap();
        assert_eq!(f.engine.mic_muted(), Some(true));
        assert_eq!(f.engine.speaker_muted(), Some(false));
    }

    #[tokio::test]
    async fn test_error_is_sticky_until_stop() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();
        let callbacks = f.engine.callbacks();

        callbacks.on_error("pcm_open failed: Permission denied");
        let status = f.session.status().await.unwrap();
        assert_eq!(
            status.state,
            SessionState::Error("pcm_open failed: Permission denied".to_string())
        );
        assert!(!status.running);
        assert_eq!(status.label.text, "Error (pcm_open failed: Permission denied)");
        assert_eq!(f.engine.stop_count(), 1);

        f.session.stop_only().await.unwrap();
        let status = f.session.status().await.unwrap();
        assert_eq!(status.state, SessionState::Stopped);
        assert_eq!(status.label.text, "Stopped");
    }

    #[tokio::test]
    async fn test_error_survives_stats_flood() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();
        let callbacks = f.engine.callbacks();

        for _ in 0..(STATS_EVENT_CAPACITY * 2) {
            callbacks.on_stats(48000, 240, 960);
        }
        callbacks.on_error("capture device lost");

        let status = f.session.status().await.unwrap();
        assert_eq!(
            status.state,
            SessionState::Error("capture device lost".to_string())
        );
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_state_code_ignored_while_in_error() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();
        let callbacks = f.engine.callbacks();

        callbacks.on_state(5);
        assert!(f.session.status().await.unwrap().state.is_error());

        // A fresh start clears the error
        f.session.start(params()).await.unwrap();
        let status = f.session.status().await.unwrap();
        assert_eq!(status.state, SessionState::Connecting);
        assert!(status.running);
    }

    #[tokio::test]
    async fn test_stale_generation_ignored() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();
        let old = f.engine.callbacks();

        f.session.stop_only().await.unwrap();
        f.session.start(params()).await.unwrap();
        let current = f.engine.callbacks();
        assert_ne!(old.generation(), current.generation());

        old.on_error("late error from the previous stream");
        old.on_state(3);
        let status = f.session.status().await.unwrap();
        assert_eq!(status.state, SessionState::Connecting);
        assert!(status.running);
    }

    #[tokio::test]
    async fn test_thread_start_promotes() {
        let f = fixture(false, true).await;
        let mut rx = f.events.subscribe();
        f.session.start(params()).await.unwrap();

        f.engine.callbacks().on_thread_start(4242);
        f.session.status().await.unwrap();

        let mut promoted = false;
        for _ in 0..50 {
            while let Ok(event) = rx.try_recv() {
                if let SystemEvent::Log { message, .. } = event {
                    if message == "[App] Thread 4242 promoted to Real-Time (FIFO)" {
                        promoted = true;
                    }
                }
            }
            if promoted {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(promoted);
        assert!(f
            .device
            .commands()
            .iter()
            .any(|c| c == "chrt -f -p 50 4242"));
    }

    #[tokio::test]
    async fn test_stop_tears_gadget_down() {
        let f = fixture(false, true).await;
        f.session.start(params()).await.unwrap();

        f.session.stop().await.unwrap();
        let status = f.session.status().await.unwrap();
        assert!(!status.running);
        assert_eq!(status.state, SessionState::Stopped);
        assert!(!f.gadget.is_gadget_active().await);
        assert_eq!(
            f.device
                .file("/config/usb_gadget/g1/strings/0x409/product")
                .as_deref(),
            Some("Pixel 7")
        );
    }

    #[tokio::test]
    async fn test_toggle_capture() {
        let f = fixture(false, true).await;

        f.session.toggle_capture().await.unwrap();
        let status = f.session.status().await.unwrap();
        assert!(status.running);
        assert_eq!(f.engine.starts()[0].params, BridgeParameters::default());

        f.session.toggle_capture().await.unwrap();
        assert!(!f.session.status().await.unwrap().running);
        assert!(!f.gadget.is_gadget_active().await);
    }

    #[tokio::test]
    async fn test_engine_start_failure_sets_error() {
        let f = fixture(false, true).await;
        f.engine.fail_next_start("AAudio stream open failed");

        let err = f.session.start(params()).await.unwrap_err();
        assert!(matches!(err, AppError::Native(_)));
        let status = f.session.status().await.unwrap();
        assert!(!status.running);
        assert!(status.state.is_error());
    }
}
