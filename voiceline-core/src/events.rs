//! The pipeline's outbound event stream.
//!
//! Every externally observable transition is published as a [`PipelineEvent`]
//! on a broadcast channel. The enum is closed: hosts match exhaustively and
//! new variants are a breaking change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{PipelineState, ProviderKind};

/// An event emitted by the pipeline, tagged for wire serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PipelineEvent {
    /// The wake detector fired and the event was accepted.
    WakeDetected {
        keyword: String,
        confidence: f32,
        timestamp: DateTime<Utc>,
    },
    /// The pipeline state changed.
    ListeningState {
        state: PipelineState,
        /// Present when a transcript accompanied the transition.
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    /// An interim or final transcription result.
    Transcript {
        text: String,
        is_final: bool,
        confidence: f32,
    },
    /// Generation began for a session.
    ResponseStart { session_id: Uuid },
    /// A response fragment was released by the chunker.
    ResponseChunk { session_id: Uuid, text: String },
    /// Generation finished; the full response text is known.
    ResponseEnd {
        session_id: Uuid,
        full_text: String,
        tokens_used: u32,
    },
    /// Playback started or stopped.
    SpeakingState {
        is_speaking: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// A stage fell back to a different provider.
    ProviderChange { kind: ProviderKind, provider: String },
    /// A fault was surfaced. `recoverable` signals whether the pipeline
    /// re-arms afterwards.
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}

impl PipelineEvent {
    pub fn state(state: PipelineState) -> Self {
        Self::ListeningState {
            state,
            transcript: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_events_serialize_tagged() {
        let ev = PipelineEvent::WakeDetected {
            keyword: "hey assistant".into(),
            confidence: 0.8,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "wake-detected");
        assert_eq!(json["keyword"], "hey assistant");

        let ev = PipelineEvent::state(PipelineState::Recording);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "listening-state");
        assert_eq!(json["state"], "recording");
        assert!(json.get("transcript").is_none());
    }

    #[test]
    fn test_provider_change_names_stage() {
        let ev = PipelineEvent::ProviderChange {
            kind: ProviderKind::Generation,
            provider: "fallback-llm".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "provider-change");
        assert_eq!(json["kind"], "generation");
        assert_eq!(json["provider"], "fallback-llm");
    }

    #[test]
    fn test_error_event_round_trip() {
        let ev = PipelineEvent::Error {
            code: "all_providers_failed".into(),
            message: "all generation providers failed or circuits open".into(),
            recoverable: true,
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: PipelineEvent = serde_json::from_str(&json).unwrap();
        match back {
            PipelineEvent::Error {
                code, recoverable, ..
            } => {
                assert_eq!(code, "all_providers_failed");
                assert!(recoverable);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
