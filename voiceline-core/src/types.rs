//! Fundamental data types shared across the pipeline: states, audio
//! containers, and the payloads exchanged with providers.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The pipeline's top-level state.
///
/// Exactly one state is active at a time; every transition is published as a
/// `listening-state` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Not started, or stopped. No audio is consumed.
    Idle,
    /// Armed: frames flow through the wake detector only.
    Listening,
    /// A wake event was accepted; a session is being created.
    WakeDetected,
    /// VAD-gated capture of the current utterance.
    Recording,
    /// Base silence elapsed; waiting to see whether the speaker continues.
    StillListening,
    /// Transcript finalized; generation in flight.
    Processing,
    /// Synthesized audio is being played.
    Speaking,
    /// A recoverable fault was surfaced; the pipeline re-arms from here.
    Error,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::WakeDetected => "wake_detected",
            Self::Recording => "recording",
            Self::StillListening => "still_listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage of the pipeline a provider serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Transcription,
    Generation,
    Synthesis,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transcription => "transcription",
            Self::Generation => "generation",
            Self::Synthesis => "synthesis",
        };
        f.write_str(s)
    }
}

/// A fixed-size frame of mono PCM audio from the capture source.
///
/// Samples are shared so a frame can be fanned out to the wake detector and
/// the VAD without copying.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Monotonic per-source frame counter.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            captured_at: Utc::now(),
        }
    }

    /// An all-zero frame of `len` samples.
    pub fn silence(sample_rate: u32, len: usize, sequence: u64) -> Self {
        Self::new(vec![0.0; len], sample_rate, sequence)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }

    /// Root-mean-square energy, used by the VAD and barge-in monitor.
    pub fn rms_energy(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = self.samples.iter().map(|s| s * s).sum();
        (sum_sq / self.samples.len() as f32).sqrt()
    }
}

/// A chunk of synthesized PCM audio, ready for playback.
#[derive(Debug, Clone, Default)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / (self.sample_rate as f32 * self.channels as f32)
    }
}

/// A finalized speech segment produced by the VAD.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SpeechSegment {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// A wake-word firing reported by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeEvent {
    pub keyword: String,
    /// Detector confidence in `[0.0, 1.0]`.
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl WakeEvent {
    pub fn new(keyword: impl Into<String>, confidence: f32) -> Self {
        Self {
            keyword: keyword.into(),
            confidence,
            timestamp: Utc::now(),
        }
    }

    /// A full-confidence event used by the push-to-talk control path.
    pub fn manual() -> Self {
        Self::new("manual", 1.0)
    }
}

/// A transcription result. Providers may emit several interim results before
/// exactly one final result per utterance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

impl TranscriptResult {
    pub fn interim(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            confidence,
        }
    }

    pub fn final_result(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            confidence,
        }
    }
}

/// A tool invocation requested by the generation provider. The pipeline
/// carries the request through to the embedder; it never executes tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// A streamed slice of generated response text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationChunk {
    pub text: String,
    /// Set on the last chunk of the stream.
    pub is_final: bool,
    /// A tool call the provider surfaced mid-stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRequest>,
}

impl GenerationChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            tool_call: None,
        }
    }

    pub fn tool_request(call: ToolCallRequest) -> Self {
        Self {
            text: String::new(),
            is_final: false,
            tool_call: Some(call),
        }
    }

    pub fn done() -> Self {
        Self {
            text: String::new(),
            is_final: true,
            tool_call: None,
        }
    }
}

/// Token accounting returned by a generation call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Synthesized audio for one response fragment.
#[derive(Debug, Clone)]
pub struct SynthesisChunk {
    pub audio: AudioChunk,
    /// The fragment of response text this chunk voices.
    pub text: String,
    /// Set on the last chunk of the response.
    pub is_final: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_serde() {
        let json = serde_json::to_string(&PipelineState::StillListening).unwrap();
        assert_eq!(json, "\"still_listening\"");
        let back: PipelineState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PipelineState::StillListening);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::WakeDetected.to_string(), "wake_detected");
        assert_eq!(PipelineState::Idle.to_string(), "idle");
    }

    #[test]
    fn test_frame_rms_energy() {
        let silent = AudioFrame::silence(16000, 512, 0);
        assert_eq!(silent.rms_energy(), 0.0);

        let loud = AudioFrame::new(vec![0.5; 512], 16000, 1);
        assert!((loud.rms_energy() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::silence(16000, 512, 0);
        assert_eq!(frame.duration_ms(), 32);

        let empty = AudioFrame::new(Vec::new(), 0, 0);
        assert_eq!(empty.duration_ms(), 0);
    }

    #[test]
    fn test_segment_duration() {
        let seg = SpeechSegment {
            samples: vec![0.0; 16000],
            sample_rate: 16000,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        };
        assert_eq!(seg.duration_ms(), 1000);
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk::new(vec![0.0; 32000], 16000, 2);
        assert!((chunk.duration_secs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_generation_chunk_tool_call() {
        assert!(GenerationChunk::text("hi").tool_call.is_none());
        assert!(GenerationChunk::done().tool_call.is_none());

        let chunk = GenerationChunk::tool_request(ToolCallRequest {
            name: "set_timer".into(),
            arguments: serde_json::json!({"minutes": 5}),
        });
        assert!(chunk.text.is_empty());
        assert!(!chunk.is_final);

        let json = serde_json::to_string(&chunk).unwrap();
        let back: GenerationChunk = serde_json::from_str(&json).unwrap();
        let call = back.tool_call.unwrap();
        assert_eq!(call.name, "set_timer");
        assert_eq!(call.arguments["minutes"], 5);
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 12,
            output_tokens: 30,
        };
        assert_eq!(usage.total(), 42);
    }
}
