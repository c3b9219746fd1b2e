//! The pipeline orchestrator: owns the state machine, routes capture frames
//! to the wake gate and VAD, drives sessions, and serves the control surface.
//!
//! All mutable state lives in one task; the handle talks to it over a command
//! channel and observes it through the broadcast event stream and a state
//! watch. Session stages report back on an internal channel, tagged with the
//! epoch they were spawned under; events from superseded epochs are dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{
    AudioFrontEnd, AudioSink, AudioSource, NullSink, VadEvent, VoiceActivityDetector, WakeGate,
    WakeWordDetector, ends_with_continuation,
};
use crate::breaker::BreakerSnapshot;
use crate::config::{ConfigUpdate, PipelineConfig};
use crate::error::{Result, VoicelineError};
use crate::events::PipelineEvent;
use crate::manager::ProviderManager;
use crate::providers::{GenerationProvider, SynthesisProvider, TranscriptionProvider};
use crate::rate_limit::SlidingWindowLimiter;
use crate::session::{SessionEvent, StageContext, StreamingSession};
use crate::types::{AudioFrame, PipelineState, ProviderKind, WakeEvent};

/// Control-surface commands, each answered over a oneshot.
enum Command {
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
    TriggerWake {
        reply: oneshot::Sender<Result<()>>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateConfig {
        update: ConfigUpdate,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// What an armed timer means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerPurpose {
    /// No speech followed the wake event.
    NoSpeech,
    /// The still-listening continuation window ran out.
    Extension,
}

/// Builder for a pipeline. Providers are listed per stage in priority order;
/// the first is the primary.
pub struct Pipeline {
    config: PipelineConfig,
    stt: Vec<(String, Arc<dyn TranscriptionProvider>)>,
    llm: Vec<(String, Arc<dyn GenerationProvider>)>,
    tts: Vec<(String, Arc<dyn SynthesisProvider>)>,
    sink: Arc<dyn AudioSink>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            stt: Vec::new(),
            llm: Vec::new(),
            tts: Vec::new(),
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_transcription(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn TranscriptionProvider>,
    ) -> Self {
        self.stt.push((name.into(), provider));
        self
    }

    pub fn with_generation(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn GenerationProvider>,
    ) -> Self {
        self.llm.push((name.into(), provider));
        self
    }

    pub fn with_synthesis(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn SynthesisProvider>,
    ) -> Self {
        self.tts.push((name.into(), provider));
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Spawn the orchestrator task. Capture starts on
    /// [`PipelineHandle::start`].
    pub fn spawn(
        self,
        source: Box<dyn AudioSource>,
        wake: Box<dyn WakeWordDetector>,
    ) -> Result<PipelineHandle> {
        self.config.validate()?;
        for (kind, empty) in [
            (ProviderKind::Transcription, self.stt.is_empty()),
            (ProviderKind::Generation, self.llm.is_empty()),
            (ProviderKind::Synthesis, self.tts.is_empty()),
        ] {
            if empty {
                return Err(VoicelineError::Config {
                    message: format!("at least one {kind} provider is required"),
                });
            }
        }

        let (events, _) = broadcast::channel(256);
        let timeouts = &self.config.timeouts;
        let breaker = &self.config.breaker;

        let stt = Arc::new(ProviderManager::new(
            ProviderKind::Transcription,
            self.stt,
            breaker,
            Duration::from_millis(timeouts.transcription_ms),
        ));
        let llm = Arc::new(ProviderManager::new(
            ProviderKind::Generation,
            self.llm,
            breaker,
            Duration::from_millis(timeouts.generation_ms),
        ));
        let tts = Arc::new(ProviderManager::new(
            ProviderKind::Synthesis,
            self.tts,
            breaker,
            Duration::from_millis(timeouts.synthesis_first_audio_ms),
        ));
        stt.set_event_sink(events.clone());
        llm.set_event_sink(events.clone());
        tts.set_event_sink(events.clone());

        let ctx = Arc::new(StageContext {
            stt,
            llm,
            tts,
            sink: self.sink,
            chunker: std::sync::RwLock::new(self.config.chunker.clone()),
        });

        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (session_tx, session_rx) = mpsc::channel(128);
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);

        let wake_gate = WakeGate::new(wake, &self.config.wake);
        let vad = VoiceActivityDetector::new(&self.config.vad);
        let limiter = SlidingWindowLimiter::per_minute(self.config.send_text.max_requests_per_minute);

        let orchestrator = Orchestrator {
            config: self.config,
            ctx: ctx.clone(),
            state: PipelineState::Idle,
            state_tx,
            events: events.clone(),
            source: Some(source),
            front_end: None,
            frames: None,
            commands: commands_rx,
            session_tx,
            session_rx,
            wake: wake_gate,
            vad,
            epoch: 0,
            session: None,
            limiter,
            transcript_prefix: String::new(),
            awaiting_transcript: false,
            extension_over: false,
            timer_seq: 0,
            armed_timer: None,
            barge_run: 0,
        };
        let task = tokio::spawn(orchestrator.run());

        Ok(PipelineHandle {
            commands: commands_tx,
            events,
            state: state_rx,
            ctx,
            task,
        })
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<PipelineEvent>,
    state: watch::Receiver<PipelineState>,
    ctx: Arc<StageContext>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle").finish_non_exhaustive()
    }
}

impl PipelineHandle {
    /// Subscribe to the pipeline event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Current pipeline state.
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// A watch receiver for awaiting state changes.
    pub fn state_stream(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Arm the wake detector and begin consuming audio.
    pub async fn start(&self) -> Result<()> {
        self.send(|reply| Command::Start { reply }).await
    }

    /// Disarm: cancel any session and stop reacting to audio.
    pub async fn stop(&self) -> Result<()> {
        self.send(|reply| Command::Stop { reply }).await
    }

    /// Bypass wake detection, as if the keyword was just heard.
    pub async fn trigger_wake(&self) -> Result<()> {
        self.send(|reply| Command::TriggerWake { reply }).await
    }

    /// Inject text directly into the processing stage, skipping audio
    /// capture and transcription. Rate limited.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.send(|reply| Command::SendText { text, reply }).await
    }

    /// Apply a partial configuration update.
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        self.send(|reply| Command::UpdateConfig { update, reply })
            .await
    }

    /// Circuit breaker state per stage and provider.
    pub async fn breaker_snapshots(&self) -> Vec<(ProviderKind, Vec<(String, BreakerSnapshot)>)> {
        vec![
            (ProviderKind::Transcription, self.ctx.stt.snapshots().await),
            (ProviderKind::Generation, self.ctx.llm.snapshots().await),
            (ProviderKind::Synthesis, self.ctx.tts.snapshots().await),
        ]
    }

    /// Stop everything and wait for the orchestrator task to finish.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.send(|reply| Command::Shutdown { reply }).await;
        if tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .is_err()
        {
            warn!("orchestrator task did not stop within 5s");
        }
        result
    }

    async fn send(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| VoicelineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| VoicelineError::ChannelClosed)?
    }
}

struct Orchestrator {
    config: PipelineConfig,
    ctx: Arc<StageContext>,
    state: PipelineState,
    state_tx: watch::Sender<PipelineState>,
    events: broadcast::Sender<PipelineEvent>,

    source: Option<Box<dyn AudioSource>>,
    front_end: Option<AudioFrontEnd>,
    frames: Option<broadcast::Receiver<AudioFrame>>,

    commands: mpsc::Receiver<Command>,
    session_tx: mpsc::Sender<SessionEvent>,
    session_rx: mpsc::Receiver<SessionEvent>,

    wake: WakeGate,
    vad: VoiceActivityDetector,

    /// Monotonic session generation counter. Session events carrying an
    /// older epoch are stale and dropped.
    epoch: u64,
    session: Option<StreamingSession>,
    limiter: SlidingWindowLimiter,

    /// Finalized text of earlier sub-segments in the current session.
    transcript_prefix: String,
    awaiting_transcript: bool,
    extension_over: bool,
    timer_seq: u64,
    armed_timer: Option<(u64, TimerPurpose)>,
    barge_run: u32,
}

impl Orchestrator {
    async fn run(mut self) {
        info!("pipeline orchestrator started");
        let shutdown_reply = loop {
            let capturing = self.frames.is_some();
            tokio::select! {
                maybe_cmd = self.commands.recv() => {
                    match maybe_cmd {
                        Some(Command::Shutdown { reply }) => break Some(reply),
                        Some(cmd) => self.handle_command(cmd),
                        None => break None,
                    }
                }
                frame = recv_frame(&mut self.frames), if capturing => {
                    match frame {
                        Ok(frame) => self.handle_frame(&frame),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "frame consumer lagged, oldest frames dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("capture ended");
                            self.frames = None;
                        }
                    }
                }
                Some(event) = self.session_rx.recv() => {
                    self.handle_session_event(event);
                }
            }
        };

        if let Some(session) = self.session.take() {
            session.cancel();
        }
        if let Some(front_end) = self.front_end.take() {
            front_end.shutdown().await;
        }
        self.set_state(PipelineState::Idle, None);
        info!("pipeline orchestrator stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(Ok(()));
        }
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    fn set_state(&mut self, next: PipelineState, transcript: Option<String>) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        let _ = self.state_tx.send(next);
        let _ = self.events.send(PipelineEvent::ListeningState {
            state: next,
            transcript,
        });
    }

    /// Cancel the current session (if any) and create its successor under a
    /// fresh epoch.
    fn new_session(&mut self) {
        if let Some(old) = self.session.take() {
            old.cancel();
        }
        self.epoch += 1;
        self.armed_timer = None;
        self.transcript_prefix.clear();
        self.awaiting_transcript = false;
        self.extension_over = false;
        self.session = Some(StreamingSession::new(
            self.epoch,
            self.ctx.clone(),
            self.session_tx.clone(),
        ));
    }

    /// Drop the current session and re-arm the wake detector.
    fn rearm(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel();
        }
        self.epoch += 1;
        self.armed_timer = None;
        self.transcript_prefix.clear();
        self.awaiting_transcript = false;
        self.extension_over = false;
        self.vad.reset();
        self.barge_run = 0;
        self.set_state(PipelineState::Listening, None);
    }

    fn arm_timer(&mut self, wait: Duration, purpose: TimerPurpose) {
        self.timer_seq += 1;
        self.armed_timer = Some((self.timer_seq, purpose));
        if let Some(session) = &self.session {
            session.spawn_timer(wait, self.timer_seq);
        }
    }

    // ------------------------------------------------------------------
    // Audio
    // ------------------------------------------------------------------

    fn handle_frame(&mut self, frame: &AudioFrame) {
        match self.state {
            PipelineState::Idle | PipelineState::Error | PipelineState::WakeDetected => {}
            PipelineState::Listening => {
                if let Some(event) = self.wake.check(frame) {
                    self.accept_wake(event);
                }
            }
            PipelineState::Recording | PipelineState::StillListening => {
                // A wake firing mid-capture restarts the utterance.
                if let Some(event) = self.wake.check(frame) {
                    self.accept_wake(event);
                    return;
                }
                self.handle_vad_frame(frame);
            }
            PipelineState::Processing => {}
            PipelineState::Speaking => self.handle_speaking_frame(frame),
        }
    }

    /// Playback that gets preempted still ends with a speaking-state event.
    fn note_playback_interrupted(&mut self) {
        if self.state == PipelineState::Speaking {
            let _ = self.events.send(PipelineEvent::SpeakingState {
                is_speaking: false,
                text: None,
            });
        }
    }

    fn accept_wake(&mut self, event: WakeEvent) {
        info!(keyword = %event.keyword, confidence = event.confidence, "wake accepted");
        self.note_playback_interrupted();
        let _ = self.events.send(PipelineEvent::WakeDetected {
            keyword: event.keyword,
            confidence: event.confidence,
            timestamp: event.timestamp,
        });
        self.set_state(PipelineState::WakeDetected, None);

        self.new_session();
        self.vad.reset();
        self.wake.reset_detector();
        self.barge_run = 0;
        self.set_state(PipelineState::Recording, None);

        // If nothing is said, give up after the extended silence window.
        self.arm_timer(
            Duration::from_millis(self.config.vad.extended_silence_ms),
            TimerPurpose::NoSpeech,
        );
    }

    fn handle_vad_frame(&mut self, frame: &AudioFrame) {
        match self.vad.process_frame(frame) {
            VadEvent::NoChange => {}
            VadEvent::SpeechStart => {
                if self.state == PipelineState::StillListening {
                    debug!("speaker resumed, extending capture");
                    self.armed_timer = None;
                    self.set_state(PipelineState::Recording, None);
                }
            }
            VadEvent::SpeechEnd => {
                let Some(segment) = self.vad.take_segment() else {
                    return;
                };
                debug!(duration_ms = segment.duration_ms(), "utterance captured");
                self.set_state(PipelineState::StillListening, None);
                self.awaiting_transcript = true;
                self.extension_over = false;
                if let Some(session) = &self.session {
                    session.spawn_transcription(segment);
                }
                let extension = self
                    .config
                    .vad
                    .extended_silence_ms
                    .saturating_sub(self.config.vad.silence_duration_ms);
                self.arm_timer(Duration::from_millis(extension), TimerPurpose::Extension);
            }
        }
    }

    fn handle_speaking_frame(&mut self, frame: &AudioFrame) {
        // Barge-in path one: the wake word during playback.
        if let Some(event) = self.wake.check(frame) {
            self.accept_wake(event);
            return;
        }
        // Barge-in path two: sustained speech energy during playback.
        if frame.rms_energy() >= self.config.vad.speech_threshold {
            self.barge_run += 1;
            if self.barge_run >= self.config.vad.barge_in_min_frames {
                info!(frames = self.barge_run, "barge-in detected during playback");
                self.note_playback_interrupted();
                self.new_session();
                self.vad.reset();
                self.barge_run = 0;
                self.set_state(PipelineState::Recording, None);
                self.arm_timer(
                    Duration::from_millis(self.config.vad.extended_silence_ms),
                    TimerPurpose::NoSpeech,
                );
            }
        } else {
            self.barge_run = 0;
        }
    }

    // ------------------------------------------------------------------
    // Session events
    // ------------------------------------------------------------------

    fn handle_session_event(&mut self, event: SessionEvent) {
        if event.epoch() != self.epoch {
            debug!(
                event_epoch = event.epoch(),
                current_epoch = self.epoch,
                "dropping stale session event"
            );
            return;
        }

        match event {
            SessionEvent::Transcript { result, .. } => {
                let _ = self.events.send(PipelineEvent::Transcript {
                    text: result.text.clone(),
                    is_final: result.is_final,
                    confidence: result.confidence,
                });
                if result.is_final {
                    self.awaiting_transcript = false;
                    self.on_final_transcript(result.text);
                }
            }
            SessionEvent::TimerElapsed { timer_id, .. } => self.on_timer(timer_id),
            SessionEvent::ResponseStarted { session_id, .. } => {
                let _ = self
                    .events
                    .send(PipelineEvent::ResponseStart { session_id });
            }
            SessionEvent::Fragment {
                session_id, text, ..
            } => {
                let _ = self.events.send(PipelineEvent::ResponseChunk {
                    session_id,
                    text: text.clone(),
                });
                // Playback starts with the first released fragment; moving to
                // Speaking here keeps barge-in live while it is being voiced.
                if self.state == PipelineState::Processing {
                    self.set_state(PipelineState::Speaking, None);
                    let _ = self.events.send(PipelineEvent::SpeakingState {
                        is_speaking: true,
                        text: Some(text),
                    });
                }
            }
            // Per-fragment playback completion; the state already moved when
            // the fragment was released.
            SessionEvent::Played { .. } => {}
            SessionEvent::ResponseFinished {
                session_id,
                full_text,
                usage,
                ..
            } => {
                let _ = self.events.send(PipelineEvent::ResponseEnd {
                    session_id,
                    full_text,
                    tokens_used: usage.total(),
                });
            }
            SessionEvent::Completed { .. } => {
                if self.state == PipelineState::Speaking {
                    let _ = self.events.send(PipelineEvent::SpeakingState {
                        is_speaking: false,
                        text: None,
                    });
                }
                self.rearm();
            }
            SessionEvent::Failed { error, .. } => self.on_session_failure(error),
        }
    }

    fn on_final_transcript(&mut self, text: String) {
        match self.state {
            PipelineState::StillListening => {
                let combined = join_transcripts(&self.transcript_prefix, &text);
                if combined.is_empty() {
                    debug!("empty transcript, re-arming");
                    self.rearm();
                } else if !self.extension_over
                    && ends_with_continuation(&text, &self.config.vad.continuation_words)
                {
                    debug!(transcript = %combined, "trailing continuation word, holding open");
                    self.transcript_prefix = combined;
                } else {
                    self.begin_processing(combined);
                }
            }
            // The speaker already resumed; fold this into the prefix.
            PipelineState::Recording => {
                self.transcript_prefix = join_transcripts(&self.transcript_prefix, &text);
            }
            _ => {}
        }
    }

    fn on_timer(&mut self, timer_id: u64) {
        let Some((armed_id, purpose)) = self.armed_timer else {
            return;
        };
        if armed_id != timer_id {
            return;
        }
        self.armed_timer = None;

        match purpose {
            TimerPurpose::NoSpeech => {
                if self.state == PipelineState::Recording && !self.vad.is_speaking() {
                    debug!("no speech after wake, re-arming");
                    self.rearm();
                }
            }
            TimerPurpose::Extension => {
                if self.state != PipelineState::StillListening {
                    return;
                }
                self.extension_over = true;
                if !self.awaiting_transcript {
                    if self.transcript_prefix.is_empty() {
                        self.rearm();
                    } else {
                        let prompt = std::mem::take(&mut self.transcript_prefix);
                        self.begin_processing(prompt);
                    }
                }
            }
        }
    }

    fn begin_processing(&mut self, transcript: String) {
        info!(transcript = %transcript, "processing utterance");
        self.armed_timer = None;
        self.transcript_prefix.clear();
        self.set_state(PipelineState::Processing, Some(transcript.clone()));
        if let Some(session) = &self.session {
            session.spawn_response(transcript);
        }
    }

    fn on_session_failure(&mut self, error: VoicelineError) {
        warn!(error = %error, "session failed");
        let recoverable = error.recoverable();
        let _ = self.events.send(PipelineEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
            recoverable,
        });
        self.set_state(PipelineState::Error, None);
        if recoverable {
            self.rearm();
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                let result = self.start();
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.note_playback_interrupted();
                if let Some(session) = self.session.take() {
                    session.cancel();
                }
                self.epoch += 1;
                self.armed_timer = None;
                self.transcript_prefix.clear();
                self.awaiting_transcript = false;
                self.extension_over = false;
                self.barge_run = 0;
                self.vad.reset();
                self.set_state(PipelineState::Idle, None);
                let _ = reply.send(Ok(()));
            }
            Command::TriggerWake { reply } => {
                if self.state == PipelineState::Idle {
                    let _ = reply.send(Err(VoicelineError::NotRunning));
                } else {
                    self.wake.note_accepted();
                    self.accept_wake(WakeEvent::manual());
                    let _ = reply.send(Ok(()));
                }
            }
            Command::SendText { text, reply } => {
                let _ = reply.send(self.send_text(text));
            }
            Command::UpdateConfig { update, reply } => {
                let _ = reply.send(self.apply_update(&update));
            }
            // Handled by the run loop.
            Command::Shutdown { .. } => {}
        }
    }

    fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Ok(());
        }
        if self.front_end.is_none() {
            let Some(source) = self.source.take() else {
                return Err(VoicelineError::Audio {
                    message: "audio source already consumed".into(),
                });
            };
            let front_end = AudioFrontEnd::spawn(source, self.config.audio.frame_queue_capacity);
            self.frames = Some(front_end.subscribe());
            self.front_end = Some(front_end);
        }
        self.set_state(PipelineState::Listening, None);
        Ok(())
    }

    fn send_text(&mut self, text: String) -> Result<()> {
        if self.state == PipelineState::Idle {
            return Err(VoicelineError::NotRunning);
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(VoicelineError::Validation {
                message: "text must not be empty".into(),
            });
        }
        let max_chars = self.config.send_text.max_chars;
        if text.chars().count() > max_chars {
            return Err(VoicelineError::Validation {
                message: format!("text exceeds {max_chars} characters"),
            });
        }
        if let Err(retry_after) = self.limiter.try_admit(Instant::now()) {
            return Err(VoicelineError::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
            });
        }

        // Text injection preempts whatever is in flight.
        self.note_playback_interrupted();
        self.new_session();
        self.vad.reset();
        self.barge_run = 0;
        self.begin_processing(trimmed.to_string());
        Ok(())
    }

    fn apply_update(&mut self, update: &ConfigUpdate) -> Result<()> {
        update.apply(&mut self.config)?;
        self.wake.set_sensitivity(self.config.wake.sensitivity);
        self.wake
            .set_cooldown(Duration::from_millis(self.config.wake.cooldown_ms));
        self.vad
            .set_silence_duration_ms(self.config.vad.silence_duration_ms);
        if let Ok(mut chunker) = self.ctx.chunker.write() {
            *chunker = self.config.chunker.clone();
        }
        info!("configuration updated");
        Ok(())
    }
}

async fn recv_frame(
    frames: &mut Option<broadcast::Receiver<AudioFrame>>,
) -> std::result::Result<AudioFrame, broadcast::error::RecvError> {
    match frames {
        Some(rx) => rx.recv().await,
        // Unreachable: the select arm is gated on `frames.is_some()`.
        None => std::future::pending().await,
    }
}

fn join_transcripts(prefix: &str, text: &str) -> String {
    let text = text.trim();
    if prefix.is_empty() {
        text.to_string()
    } else if text.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix} {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{CollectingSink, ScriptedAudioSource, ScriptedWakeDetector};
    use crate::providers::mock::{MockGenerator, MockSynthesizer, MockTranscriber};

    fn quiet_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        // Frame-time based silence windows keep tests fast: 512 samples at
        // 16kHz is 32ms per frame.
        config.vad.silence_duration_ms = 192;
        config.vad.extended_silence_ms = 384;
        config.wake.cooldown_ms = 0;
        config
    }

    fn pipeline(config: PipelineConfig) -> Pipeline {
        Pipeline::new(config)
            .with_transcription(
                "mock-stt",
                Arc::new(MockTranscriber::with_transcripts(vec!["hello there"])),
            )
            .with_generation("mock-llm", Arc::new(MockGenerator::repeating("Hi.")))
            .with_synthesis("mock-tts", Arc::new(MockSynthesizer::new()))
            .with_sink(Arc::new(CollectingSink::new()))
    }

    fn silence_source() -> Box<ScriptedAudioSource> {
        Box::new(ScriptedAudioSource::new(16000, 512).then_endless_silence())
    }

    #[tokio::test]
    async fn test_spawn_requires_providers() {
        let err = Pipeline::new(PipelineConfig::default())
            .spawn(silence_source(), Box::new(ScriptedWakeDetector::never()))
            .unwrap_err();
        assert_eq!(err.code(), "config_invalid");
    }

    #[tokio::test]
    async fn test_start_and_stop_transition_state() {
        let handle = pipeline(quiet_config())
            .spawn(silence_source(), Box::new(ScriptedWakeDetector::never()))
            .unwrap();
        assert_eq!(handle.state(), PipelineState::Idle);

        handle.start().await.unwrap();
        assert_eq!(handle.state(), PipelineState::Listening);

        handle.stop().await.unwrap();
        assert_eq!(handle.state(), PipelineState::Idle);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_wake_requires_started_pipeline() {
        let handle = pipeline(quiet_config())
            .spawn(silence_source(), Box::new(ScriptedWakeDetector::never()))
            .unwrap();
        let err = handle.trigger_wake().await.unwrap_err();
        assert_eq!(err.code(), "not_running");
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_text_validation() {
        let handle = pipeline(quiet_config())
            .spawn(silence_source(), Box::new(ScriptedWakeDetector::never()))
            .unwrap();
        handle.start().await.unwrap();

        let err = handle.send_text("   ").await.unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        let huge = "x".repeat(10_001);
        let err = handle.send_text(huge).await.unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_config_rejects_bad_values() {
        let handle = pipeline(quiet_config())
            .spawn(silence_source(), Box::new(ScriptedWakeDetector::never()))
            .unwrap();
        let err = handle
            .update_config(ConfigUpdate {
                wake_sensitivity: Some(1.5),
                ..ConfigUpdate::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "config_invalid");

        handle
            .update_config(ConfigUpdate {
                wake_sensitivity: Some(0.8),
                ..ConfigUpdate::default()
            })
            .await
            .unwrap();
        handle.shutdown().await.unwrap();
    }

    #[test]
    fn test_join_transcripts() {
        assert_eq!(join_transcripts("", "hello"), "hello");
        assert_eq!(join_transcripts("turn it on and", "make it blue"),
            "turn it on and make it blue");
        assert_eq!(join_transcripts("keep this", "  "), "keep this");
        assert_eq!(join_transcripts("", "  "), "");
    }
}
