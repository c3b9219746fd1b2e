//! Provider traits for the three pipeline stages, plus mock and OpenAI
//! implementations.
//!
//! Providers are interchangeable behind these traits; the pipeline only ever
//! talks to them through a [`ProviderManager`](crate::manager::ProviderManager).

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::types::{GenerationChunk, SpeechSegment, SynthesisChunk, TokenUsage, TranscriptResult};

/// Speech-to-text. Implementations may send any number of interim results on
/// `tx`, but must send exactly one final result before returning `Ok`.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        tx: mpsc::Sender<TranscriptResult>,
    ) -> Result<(), ProviderError>;

    /// Provider name for logging and failover events.
    fn name(&self) -> &str;
}

/// Response generation. Chunks are streamed on `tx` in order; the last chunk
/// has `is_final` set. Token usage is returned once the stream completes.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        tx: mpsc::Sender<GenerationChunk>,
    ) -> Result<TokenUsage, ProviderError>;

    fn name(&self) -> &str;
}

/// Text-to-speech, invoked once per response fragment.
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesisChunk, ProviderError>;

    fn name(&self) -> &str;
}
