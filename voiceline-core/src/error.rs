//! Error types for the voice pipeline.

use thiserror::Error;

use crate::types::ProviderKind;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VoicelineError>;

/// Errors raised while calling a speech or language provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider did not answer within the configured per-call timeout.
    #[error("provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    /// The provider answered with a failure (HTTP error, malformed payload, ...).
    #[error("provider '{provider}' call failed: {message}")]
    Call { provider: String, message: String },

    /// The provider's circuit breaker is open and the call was not attempted.
    #[error("circuit open for provider '{provider}'")]
    CircuitOpen { provider: String },

    /// Every candidate for a stage failed or was skipped.
    #[error("all {kind} providers failed or circuits open")]
    AllFailed { kind: ProviderKind },
}

impl ProviderError {
    /// Stable machine-readable code carried on error events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "provider_timeout",
            Self::Call { .. } => "provider_call_failed",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::AllFailed { .. } => "all_providers_failed",
        }
    }
}

/// Top-level error for pipeline operations and the control surface.
#[derive(Error, Debug)]
pub enum VoicelineError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Malformed input to a control operation.
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// The caller exceeded the text-injection rate limit.
    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("configuration error: {message}")]
    Config { message: String },

    /// Audio capture or decoding failure.
    #[error("audio error: {message}")]
    Audio { message: String },

    /// A control call was issued before `start()` or after `shutdown()`.
    #[error("pipeline is not running")]
    NotRunning,

    /// The orchestrator task is gone and can no longer accept commands.
    #[error("pipeline command channel closed")]
    ChannelClosed,
}

impl VoicelineError {
    /// Stable machine-readable code carried on error events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.code(),
            Self::Validation { .. } => "validation_failed",
            Self::RateLimited { .. } => "rate_limited",
            Self::Config { .. } => "config_invalid",
            Self::Audio { .. } => "audio_failed",
            Self::NotRunning => "not_running",
            Self::ChannelClosed => "channel_closed",
        }
    }

    /// Whether the pipeline can re-arm after surfacing this error.
    ///
    /// Provider exhaustion and audio hiccups are recoverable: the session is
    /// torn down and the wake detector is re-armed. Channel loss is not.
    pub fn recoverable(&self) -> bool {
        !matches!(self, Self::ChannelClosed)
    }
}
