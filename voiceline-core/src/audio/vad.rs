//! Energy-based voice activity detection and end-of-speech tracking.
//!
//! Speech starts after `min_speech_frames` consecutive frames above the
//! energy threshold. It ends once `redemption_frames` consecutive silence
//! frames have been seen *and* the accumulated silence reaches the configured
//! trailing-silence duration. Silence time is derived from frame sample
//! counts, not wall clock, so detection is deterministic under test.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::VadConfig;
use crate::types::{AudioFrame, SpeechSegment};

/// Outcome of feeding one frame to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    NoChange,
    /// Speech onset confirmed.
    SpeechStart,
    /// End-of-speech confirmed; the segment is ready via
    /// [`VoiceActivityDetector::take_segment`].
    SpeechEnd,
}

/// Streaming voice activity detector.
#[derive(Debug)]
pub struct VoiceActivityDetector {
    speech_threshold: f32,
    min_speech_frames: u32,
    redemption_frames: u32,
    silence_duration_ms: u64,

    speaking: bool,
    speech_run: u32,
    silence_run: u32,
    silence_elapsed_ms: u64,
    buffer: Vec<f32>,
    sample_rate: u32,
    started_at: Option<DateTime<Utc>>,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            speech_threshold: config.speech_threshold,
            min_speech_frames: config.min_speech_frames,
            redemption_frames: config.redemption_frames,
            silence_duration_ms: config.silence_duration_ms,
            speaking: false,
            speech_run: 0,
            silence_run: 0,
            silence_elapsed_ms: 0,
            buffer: Vec::new(),
            sample_rate: 0,
            started_at: None,
        }
    }

    /// Feed one capture frame.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> VadEvent {
        let is_speech = frame.rms_energy() >= self.speech_threshold;
        self.sample_rate = frame.sample_rate;

        if !self.speaking {
            if is_speech {
                self.speech_run += 1;
                self.buffer.extend_from_slice(&frame.samples);
                if self.speech_run >= self.min_speech_frames {
                    self.speaking = true;
                    self.silence_run = 0;
                    self.silence_elapsed_ms = 0;
                    self.started_at = Some(frame.captured_at);
                    debug!(frames = self.speech_run, "speech onset");
                    return VadEvent::SpeechStart;
                }
            } else {
                // A blip shorter than min_speech_frames is discarded.
                self.speech_run = 0;
                self.buffer.clear();
            }
            return VadEvent::NoChange;
        }

        self.buffer.extend_from_slice(&frame.samples);
        if is_speech {
            self.silence_run = 0;
            self.silence_elapsed_ms = 0;
            return VadEvent::NoChange;
        }

        self.silence_run += 1;
        self.silence_elapsed_ms += frame.duration_ms();
        if self.silence_run >= self.redemption_frames
            && self.silence_elapsed_ms >= self.silence_duration_ms
        {
            debug!(
                silence_ms = self.silence_elapsed_ms,
                frames = self.silence_run,
                "end of speech"
            );
            self.speaking = false;
            self.speech_run = 0;
            return VadEvent::SpeechEnd;
        }
        VadEvent::NoChange
    }

    /// Take the buffered utterance after a [`VadEvent::SpeechEnd`].
    pub fn take_segment(&mut self) -> Option<SpeechSegment> {
        if self.buffer.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.buffer);
        let started_at = self.started_at.take().unwrap_or_else(Utc::now);
        self.silence_run = 0;
        self.silence_elapsed_ms = 0;
        Some(SpeechSegment {
            samples,
            sample_rate: self.sample_rate,
            started_at,
            ended_at: Utc::now(),
        })
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Accumulated trailing silence of the current utterance.
    pub fn silence_elapsed_ms(&self) -> u64 {
        self.silence_elapsed_ms
    }

    pub fn set_silence_duration_ms(&mut self, ms: u64) {
        self.silence_duration_ms = ms;
    }

    /// Discard all state, including any buffered audio.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.speech_run = 0;
        self.silence_run = 0;
        self.silence_elapsed_ms = 0;
        self.buffer.clear();
        self.started_at = None;
    }
}

/// Whether an utterance trails off on a word that suggests the speaker will
/// continue ("and", "but", ...). Trailing punctuation is ignored.
pub fn ends_with_continuation(text: &str, continuation_words: &[String]) -> bool {
    let Some(last) = text.split_whitespace().next_back() else {
        return false;
    };
    let last = last
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase();
    continuation_words.iter().any(|w| w.to_lowercase() == last)
}
