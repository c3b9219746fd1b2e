//! # Voiceline Core
//!
//! Core library for the Voiceline voice interaction pipeline.
//! Provides the pipeline orchestrator, the audio front-end (wake word gating
//! and voice activity detection), provider failover with circuit breakers,
//! streaming sessions, and fundamental types.

pub mod audio;
pub mod breaker;
pub mod chunker;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod pipeline;
pub mod providers;
pub mod rate_limit;
pub mod session;
pub mod types;

// Re-export commonly used types at the crate root.
pub use audio::{
    AudioSink, AudioSource, CollectingSink, EnergyWakeDetector, NullSink, ScriptedAudioSource,
    ScriptedWakeDetector, WakeWordDetector,
};
pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use config::{ConfigUpdate, PipelineConfig};
pub use error::{ProviderError, Result, VoicelineError};
pub use events::PipelineEvent;
pub use manager::ProviderManager;
pub use pipeline::{Pipeline, PipelineHandle};
pub use providers::{GenerationProvider, SynthesisProvider, TranscriptionProvider};
pub use types::{
    AudioChunk, AudioFrame, GenerationChunk, PipelineState, ProviderKind, SpeechSegment,
    SynthesisChunk, TokenUsage, ToolCallRequest, TranscriptResult, WakeEvent,
};
