//! Pipeline configuration.
//!
//! Configuration is layered with figment: built-in defaults, then an optional
//! TOML file, then `VOICELINE_`-prefixed environment variables (nested keys
//! separated by `__`, e.g. `VOICELINE_WAKE__SENSITIVITY=0.7`), then explicit
//! programmatic overrides.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VoicelineError};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub audio: AudioConfig,
    pub wake: WakeConfig,
    pub vad: VadConfig,
    pub chunker: ChunkerConfig,
    pub breaker: BreakerConfig,
    pub timeouts: TimeoutConfig,
    pub send_text: SendTextConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            wake: WakeConfig::default(),
            vad: VadConfig::default(),
            chunker: ChunkerConfig::default(),
            breaker: BreakerConfig::default(),
            timeouts: TimeoutConfig::default(),
            send_text: SendTextConfig::default(),
        }
    }
}

/// Capture-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Samples per frame handed to the detectors.
    pub frame_size: usize,
    /// Frames buffered between capture and the orchestrator. When full,
    /// the oldest frame is dropped.
    pub frame_queue_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 512,
            frame_queue_capacity: 64,
        }
    }
}

/// Wake-word gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Minimum detector confidence to accept a firing, in `[0.0, 1.0]`.
    pub sensitivity: f32,
    /// Firings within this window of the last accepted one are suppressed.
    pub cooldown_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.5,
            cooldown_ms: 500,
        }
    }
}

/// Voice activity detection and end-of-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy above which a frame counts as speech.
    pub speech_threshold: f32,
    /// Consecutive speech frames required to enter speech.
    pub min_speech_frames: u32,
    /// Consecutive silence frames required before end-of-speech is considered.
    pub redemption_frames: u32,
    /// Trailing silence that finalizes an utterance.
    pub silence_duration_ms: u64,
    /// Extended window used when the utterance trails off on a
    /// continuation word ("and", "but", ...).
    pub extended_silence_ms: u64,
    /// Words that signal the speaker is likely to continue.
    pub continuation_words: Vec<String>,
    /// During playback, consecutive speech frames required to barge in.
    pub barge_in_min_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.015,
            min_speech_frames: 2,
            redemption_frames: 6,
            silence_duration_ms: 1500,
            extended_silence_ms: 3000,
            continuation_words: [
                "and", "but", "because", "so", "or", "then", "also", "plus", "however",
            ]
            .iter()
            .map(|w| w.to_string())
            .collect(),
            barge_in_min_frames: 5,
        }
    }
}

/// Response fragmenting for incremental synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// A fragment is only released at a clause boundary once it reaches
    /// this many characters.
    pub min_fragment_chars: usize,
    /// Fragments are force-split at this length even without a boundary.
    pub max_fragment_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_fragment_chars: 12,
            max_fragment_chars: 120,
        }
    }
}

/// Per-provider circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit waits before permitting a half-open trial.
    pub open_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout_ms: 60_000,
        }
    }
}

/// Per-call timeouts, by stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub transcription_ms: u64,
    pub generation_ms: u64,
    /// Budget for the first synthesized audio of a fragment before the
    /// stage falls back to the next provider.
    pub synthesis_first_audio_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            transcription_ms: 30_000,
            generation_ms: 25_000,
            synthesis_first_audio_ms: 600,
        }
    }
}

/// Limits on the `send_text` control path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SendTextConfig {
    pub max_requests_per_minute: usize,
    pub max_chars: usize,
}

impl Default for SendTextConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 60,
            max_chars: 10_000,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from defaults, an optional TOML file, environment
    /// variables, and programmatic overrides (highest precedence).
    pub fn load(path: Option<&Path>, overrides: Option<PipelineConfig>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("VOICELINE_").split("__"));
        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }
        let config: PipelineConfig = figment.extract().map_err(|e| VoicelineError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. Called after every load and update.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.wake.sensitivity) {
            return Err(VoicelineError::Config {
                message: format!(
                    "wake.sensitivity must be in [0.0, 1.0], got {}",
                    self.wake.sensitivity
                ),
            });
        }
        if self.vad.extended_silence_ms < self.vad.silence_duration_ms {
            return Err(VoicelineError::Config {
                message: "vad.extended_silence_ms must be >= vad.silence_duration_ms".into(),
            });
        }
        if self.chunker.min_fragment_chars == 0
            || self.chunker.max_fragment_chars < self.chunker.min_fragment_chars
        {
            return Err(VoicelineError::Config {
                message: "chunker fragment bounds must satisfy 0 < min <= max".into(),
            });
        }
        if self.breaker.failure_threshold == 0 {
            return Err(VoicelineError::Config {
                message: "breaker.failure_threshold must be >= 1".into(),
            });
        }
        if self.audio.frame_size == 0 || self.audio.sample_rate == 0 {
            return Err(VoicelineError::Config {
                message: "audio.frame_size and audio.sample_rate must be non-zero".into(),
            });
        }
        Ok(())
    }
}

/// A partial update applied through the control surface while the pipeline
/// is running. Unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub wake_sensitivity: Option<f32>,
    pub wake_cooldown_ms: Option<u64>,
    pub silence_duration_ms: Option<u64>,
    pub extended_silence_ms: Option<u64>,
    pub min_fragment_chars: Option<usize>,
    pub max_fragment_chars: Option<usize>,
}

impl ConfigUpdate {
    /// Apply onto `config`, validating the result. On error the original
    /// configuration is left untouched.
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        let mut next = config.clone();
        if let Some(v) = self.wake_sensitivity {
            next.wake.sensitivity = v;
        }
        if let Some(v) = self.wake_cooldown_ms {
            next.wake.cooldown_ms = v;
        }
        if let Some(v) = self.silence_duration_ms {
            next.vad.silence_duration_ms = v;
        }
        if let Some(v) = self.extended_silence_ms {
            next.vad.extended_silence_ms = v;
        }
        if let Some(v) = self.min_fragment_chars {
            next.chunker.min_fragment_chars = v;
        }
        if let Some(v) = self.max_fragment_chars {
            next.chunker.max_fragment_chars = v;
        }
        next.validate()?;
        *config = next;
        Ok(())
    }
}
