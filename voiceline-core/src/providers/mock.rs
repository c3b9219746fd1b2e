//! Mock providers for tests and offline development.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{GenerationProvider, SynthesisProvider, TranscriptionProvider};
use crate::error::ProviderError;
use crate::types::{
    AudioChunk, GenerationChunk, SpeechSegment, SynthesisChunk, TokenUsage, TranscriptResult,
};

fn send_blocked() -> ProviderError {
    ProviderError::Call {
        provider: "mock".into(),
        message: "stream receiver dropped".into(),
    }
}

/// A mock transcriber that replays queued transcripts.
///
/// Each call pops one transcript and sends it as an interim result followed
/// by the final. An empty queue yields an error, and `fail_first` injects
/// that many failures before any transcript is served.
pub struct MockTranscriber {
    transcripts: Mutex<Vec<String>>,
    fail_first: usize,
    delay: Duration,
    call_count: AtomicUsize,
}

impl MockTranscriber {
    /// Create a new mock that returns errors (no transcripts queued).
    pub fn new() -> Self {
        Self::with_transcripts(Vec::<String>::new())
    }

    pub fn with_transcripts<S: Into<String>>(transcripts: Vec<S>) -> Self {
        Self {
            transcripts: Mutex::new(transcripts.into_iter().map(Into::into).collect()),
            fail_first: 0,
            delay: Duration::ZERO,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Fail the first `n` calls before serving transcripts.
    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Sleep before answering, to simulate a slow backend.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptionProvider for MockTranscriber {
    async fn transcribe(
        &self,
        _segment: &SpeechSegment,
        tx: mpsc::Sender<TranscriptResult>,
    ) -> Result<(), ProviderError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.fail_first {
            return Err(ProviderError::Call {
                provider: "mock".into(),
                message: "injected transcription failure".into(),
            });
        }

        let text = {
            let mut transcripts = self.transcripts.lock().map_err(|_| ProviderError::Call {
                provider: "mock".into(),
                message: "transcript queue poisoned".into(),
            })?;
            if transcripts.is_empty() {
                return Err(ProviderError::Call {
                    provider: "mock".into(),
                    message: "no mock transcripts queued".into(),
                });
            }
            transcripts.remove(0)
        };

        // One interim (first word) then the final, like a streaming backend.
        if let Some(first_word) = text.split_whitespace().next()
            && first_word.len() < text.len()
        {
            tx.send(TranscriptResult::interim(first_word, 0.6))
                .await
                .map_err(|_| send_blocked())?;
        }
        tx.send(TranscriptResult::final_result(text, 0.95))
            .await
            .map_err(|_| send_blocked())?;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A mock generator that streams a scripted response word by word.
pub struct MockGenerator {
    responses: Mutex<Vec<String>>,
    fail_first: usize,
    /// Pause between streamed chunks.
    chunk_delay: Duration,
    call_count: AtomicUsize,
}

impl MockGenerator {
    pub fn with_responses<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            fail_first: 0,
            chunk_delay: Duration::ZERO,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Repeat one response for every call.
    pub fn repeating(response: impl Into<String>) -> Self {
        let response = response.into();
        Self::with_responses(vec![response; 32])
    }

    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GenerationProvider for MockGenerator {
    async fn generate(
        &self,
        prompt: &str,
        tx: mpsc::Sender<GenerationChunk>,
    ) -> Result<TokenUsage, ProviderError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        if n < self.fail_first {
            return Err(ProviderError::Call {
                provider: "mock".into(),
                message: "injected generation failure".into(),
            });
        }

        let response = {
            let mut responses = self.responses.lock().map_err(|_| ProviderError::Call {
                provider: "mock".into(),
                message: "response queue poisoned".into(),
            })?;
            if responses.is_empty() {
                return Err(ProviderError::Call {
                    provider: "mock".into(),
                    message: "no mock responses queued".into(),
                });
            }
            responses.remove(0)
        };

        let words: Vec<&str> = response.split_inclusive(' ').collect();
        for word in &words {
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            tx.send(GenerationChunk::text(*word))
                .await
                .map_err(|_| send_blocked())?;
        }
        tx.send(GenerationChunk::done())
            .await
            .map_err(|_| send_blocked())?;

        Ok(TokenUsage {
            input_tokens: prompt.split_whitespace().count() as u32,
            output_tokens: words.len() as u32,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A mock synthesizer that renders a 440Hz sine wave sized to the text.
pub struct MockSynthesizer {
    fail_first: usize,
    delay: Duration,
    call_count: AtomicUsize,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            fail_first: 0,
            delay: Duration::ZERO,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesisProvider for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesisChunk, ProviderError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.fail_first {
            return Err(ProviderError::Call {
                provider: "mock".into(),
                message: "injected synthesis failure".into(),
            });
        }

        let sample_rate = 16000u32;
        let duration_secs = (text.len() as f32 * 0.05).max(0.1);
        let num_samples = (sample_rate as f32 * duration_secs) as usize;
        let samples: Vec<f32> = (0..num_samples)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5
            })
            .collect();

        Ok(SynthesisChunk {
            audio: AudioChunk::new(samples, sample_rate, 1),
            text: text.to_string(),
            is_final: false,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn segment() -> SpeechSegment {
        SpeechSegment {
            samples: vec![0.1; 16000],
            sample_rate: 16000,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_mock_transcriber_streams_interim_then_final() {
        let mock = MockTranscriber::with_transcripts(vec!["turn off the lights"]);
        let (tx, mut rx) = mpsc::channel(8);
        mock.transcribe(&segment(), tx).await.unwrap();

        let interim = rx.recv().await.unwrap();
        assert!(!interim.is_final);
        assert_eq!(interim.text, "turn");

        let final_result = rx.recv().await.unwrap();
        assert!(final_result.is_final);
        assert_eq!(final_result.text, "turn off the lights");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_mock_transcriber_empty_queue_errors() {
        let mock = MockTranscriber::new();
        let (tx, _rx) = mpsc::channel(8);
        let err = mock.transcribe(&segment(), tx).await.unwrap_err();
        assert!(err.to_string().contains("no mock transcripts queued"));
    }

    #[tokio::test]
    async fn test_mock_transcriber_fail_first() {
        let mock = MockTranscriber::with_transcripts(vec!["hello"]).fail_first(2);
        for _ in 0..2 {
            let (tx, _rx) = mpsc::channel(8);
            assert!(mock.transcribe(&segment(), tx).await.is_err());
        }
        let (tx, mut rx) = mpsc::channel(8);
        mock.transcribe(&segment(), tx).await.unwrap();
        while let Some(result) = rx.recv().await {
            if result.is_final {
                assert_eq!(result.text, "hello");
                return;
            }
        }
        panic!("no final transcript");
    }

    #[tokio::test]
    async fn test_mock_generator_streams_words_in_order() {
        let mock = MockGenerator::with_responses(vec!["the answer is four"]);
        let (tx, mut rx) = mpsc::channel(32);
        let usage = mock.generate("what is two plus two", tx).await.unwrap();
        assert_eq!(usage.input_tokens, 5);
        assert_eq!(usage.output_tokens, 4);

        let mut text = String::new();
        let mut saw_final = false;
        while let Some(chunk) = rx.recv().await {
            text.push_str(&chunk.text);
            if chunk.is_final {
                saw_final = true;
            }
        }
        assert!(saw_final);
        assert_eq!(text, "the answer is four");
    }

    #[tokio::test]
    async fn test_mock_synthesizer_sizes_audio_to_text() {
        let mock = MockSynthesizer::new();
        let short = mock.synthesize("hi").await.unwrap();
        let long = mock.synthesize("a much longer sentence here").await.unwrap();
        assert!(!short.audio.is_empty());
        assert!(long.audio.samples.len() > short.audio.samples.len());
        assert_eq!(mock.call_count(), 2);
    }
}
