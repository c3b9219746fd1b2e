//! Capture sources, playback sinks, and the capture front-end task.
//!
//! Frames are fanned out on a bounded broadcast channel. A slow consumer
//! loses the oldest frames first and keeps receiving the newest, so capture
//! never blocks on a stalled stage.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::VoicelineError;
use crate::types::{AudioFrame, SynthesisChunk};

/// A source of capture frames (microphone, file, test script).
#[async_trait]
pub trait AudioSource: Send {
    /// Produce the next frame, or `None` when the source is exhausted.
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, VoicelineError>;

    fn sample_rate(&self) -> u32;
}

/// A playback sink for synthesized audio.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, chunk: &SynthesisChunk) -> Result<(), VoicelineError>;
}

/// A sink that discards audio.
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _chunk: &SynthesisChunk) -> Result<(), VoicelineError> {
        Ok(())
    }
}

/// A sink that records what was played, for tests.
#[derive(Default)]
pub struct CollectingSink {
    played: std::sync::Mutex<Vec<String>>,
    delay: Duration,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep per chunk to simulate playback taking real time.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            played: std::sync::Mutex::new(Vec::new()),
            delay,
        }
    }

    /// Fragment texts in playback order.
    pub fn played(&self) -> Vec<String> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.played.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AudioSink for CollectingSink {
    async fn play(&self, chunk: &SynthesisChunk) -> Result<(), VoicelineError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Ok(mut played) = self.played.lock() {
            played.push(chunk.text.clone());
        }
        Ok(())
    }
}

/// A deterministic source that plays back scripted energy phases.
///
/// Phases are expanded to constant-amplitude frames; sample counts give each
/// frame a real duration, so detectors that accumulate frame time behave the
/// same regardless of how fast frames are pulled.
pub struct ScriptedAudioSource {
    frames: VecDeque<Vec<f32>>,
    sample_rate: u32,
    frame_size: usize,
    interval: Duration,
    endless_silence: bool,
    sequence: u64,
}

impl ScriptedAudioSource {
    pub fn new(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            sample_rate,
            frame_size,
            interval: Duration::from_millis(1),
            endless_silence: false,
            sequence: 0,
        }
    }

    /// Append `count` frames at constant amplitude `level`.
    pub fn phase(mut self, level: f32, count: usize) -> Self {
        for _ in 0..count {
            self.frames.push_back(vec![level; self.frame_size]);
        }
        self
    }

    /// Append `count` frames of speech-level audio.
    pub fn speech(self, count: usize) -> Self {
        self.phase(0.2, count)
    }

    /// Append `count` frames of silence.
    pub fn silence(self, count: usize) -> Self {
        self.phase(0.0, count)
    }

    /// Pause between frames (defaults to 1ms; use the frame's real duration
    /// for wall-clock-accurate playback).
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Keep producing silence after the script runs out instead of ending.
    pub fn then_endless_silence(mut self) -> Self {
        self.endless_silence = true;
        self
    }
}

#[async_trait]
impl AudioSource for ScriptedAudioSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, VoicelineError> {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        let samples = match self.frames.pop_front() {
            Some(samples) => samples,
            None if self.endless_silence => vec![0.0; self.frame_size],
            None => return Ok(None),
        };
        let frame = AudioFrame::new(samples, self.sample_rate, self.sequence);
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// The capture task: pulls frames from a source and fans them out.
pub struct AudioFrontEnd {
    frames_tx: broadcast::Sender<AudioFrame>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl AudioFrontEnd {
    /// Spawn the capture loop. `capacity` bounds the frame queue; when it
    /// fills, the oldest frames are dropped for lagging consumers.
    pub fn spawn(mut source: Box<dyn AudioSource>, capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel(capacity.max(1));
        let cancel = CancellationToken::new();

        let tx = frames_tx.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("capture task stopping");
                        break;
                    }
                    frame = source.next_frame() => {
                        match frame {
                            Ok(Some(frame)) => {
                                // Send fails only when nobody is subscribed.
                                let _ = tx.send(frame);
                            }
                            Ok(None) => {
                                debug!("audio source exhausted");
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "audio source failed");
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            frames_tx,
            cancel,
            handle,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames_tx.subscribe()
    }

    /// Stop the capture task and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .is_err()
        {
            warn!("capture task did not stop within 5s");
        }
    }
}
