//! OpenAI-backed providers (HTTP, no native deps).

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{GenerationProvider, SynthesisProvider, TranscriptionProvider};
use crate::audio::codec;
use crate::error::ProviderError;
use crate::types::{
    AudioChunk, GenerationChunk, SpeechSegment, SynthesisChunk, TokenUsage, ToolCallRequest,
    TranscriptResult,
};

fn call_err(provider: &str, message: impl Into<String>) -> ProviderError {
    ProviderError::Call {
        provider: provider.into(),
        message: message.into(),
    }
}

/// Whisper API transcription.
pub struct OpenAiTranscription {
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub base_url: String,
}

impl OpenAiTranscription {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "whisper-1".to_string(),
            language: "en".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl TranscriptionProvider for OpenAiTranscription {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        tx: mpsc::Sender<TranscriptResult>,
    ) -> Result<(), ProviderError> {
        if segment.is_empty() {
            tx.send(TranscriptResult::final_result("", 0.0))
                .await
                .map_err(|_| call_err(self.name(), "stream receiver dropped"))?;
            return Ok(());
        }

        let wav_bytes = codec::encode_wav(&segment.samples, segment.sample_rate)
            .map_err(|e| call_err(self.name(), e.to_string()))?;

        let part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| call_err(self.name(), format!("MIME error: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "json".to_string());

        let url = format!("{}/audio/transcriptions", self.base_url);
        let client = reqwest::Client::new();
        let response = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| call_err(self.name(), format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(call_err(self.name(), format!("API returned {status}: {body}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| call_err(self.name(), format!("JSON parse error: {e}")))?;

        let text = json["text"].as_str().unwrap_or("").to_string();
        // The API does not report per-result confidence.
        tx.send(TranscriptResult::final_result(text, 1.0))
            .await
            .map_err(|_| call_err(self.name(), "stream receiver dropped"))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Streaming chat-completion generation.
pub struct OpenAiGeneration {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub system_prompt: Option<String>,
}

impl OpenAiGeneration {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Folds streamed tool-call deltas into one request. The function name
/// arrives once; the argument JSON arrives in string pieces.
#[derive(Default)]
struct ToolCallAccumulator {
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, delta: &serde_json::Value) {
        let func = &delta["tool_calls"][0]["function"];
        if let Some(name) = func["name"].as_str() {
            self.name = Some(name.to_string());
        }
        if let Some(piece) = func["arguments"].as_str() {
            self.arguments.push_str(piece);
        }
    }

    fn finish(self) -> Option<ToolCallRequest> {
        let name = self.name?;
        let arguments =
            serde_json::from_str(&self.arguments).unwrap_or(serde_json::Value::Null);
        Some(ToolCallRequest { name, arguments })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGeneration {
    async fn generate(
        &self,
        prompt: &str,
        tx: mpsc::Sender<GenerationChunk>,
    ) -> Result<TokenUsage, ProviderError> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system_prompt {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        let url = format!("{}/chat/completions", self.base_url);
        let client = reqwest::Client::new();
        let response = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| call_err(self.name(), format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(call_err(self.name(), format!("API returned {status}: {body}")));
        }

        let mut stream = response.bytes_stream();
        let mut buf = String::new();
        let mut usage = TokenUsage::default();
        let mut chunk_count = 0u32;
        let mut tool_call = ToolCallAccumulator::default();

        while let Some(item) = stream.next().await {
            let bytes =
                item.map_err(|e| call_err(self.name(), format!("stream read failed: {e}")))?;
            buf.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim().to_string();
                buf.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    if let Some(call) = std::mem::take(&mut tool_call).finish() {
                        tx.send(GenerationChunk::tool_request(call))
                            .await
                            .map_err(|_| call_err(self.name(), "stream receiver dropped"))?;
                    }
                    tx.send(GenerationChunk::done())
                        .await
                        .map_err(|_| call_err(self.name(), "stream receiver dropped"))?;
                    if usage.total() == 0 {
                        // Usage was not reported; fall back to chunk counting.
                        usage.output_tokens = chunk_count;
                    }
                    return Ok(usage);
                }

                let value: serde_json::Value = serde_json::from_str(data)
                    .map_err(|e| call_err(self.name(), format!("bad SSE payload: {e}")))?;
                if let Some(delta) = value["choices"][0]["delta"]["content"].as_str()
                    && !delta.is_empty()
                {
                    chunk_count += 1;
                    tx.send(GenerationChunk::text(delta))
                        .await
                        .map_err(|_| call_err(self.name(), "stream receiver dropped"))?;
                }
                tool_call.absorb(&value["choices"][0]["delta"]);
                if let Some(u) = value.get("usage").filter(|u| !u.is_null()) {
                    usage.input_tokens = u["prompt_tokens"].as_u64().unwrap_or(0) as u32;
                    usage.output_tokens = u["completion_tokens"].as_u64().unwrap_or(0) as u32;
                }
            }
        }

        Err(call_err(self.name(), "stream ended without [DONE]"))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Speech synthesis via the audio API, one call per fragment.
pub struct OpenAiSynthesis {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub base_url: String,
}

impl OpenAiSynthesis {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl SynthesisProvider for OpenAiSynthesis {
    async fn synthesize(&self, text: &str) -> Result<SynthesisChunk, ProviderError> {
        let url = format!("{}/audio/speech", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "speed": self.speed,
            "response_format": "wav",
        });

        let client = reqwest::Client::new();
        let response = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| call_err(self.name(), format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(call_err(self.name(), format!("API returned {status}: {body}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| call_err(self.name(), format!("failed to read response: {e}")))?;

        let audio: AudioChunk =
            codec::decode_wav(&bytes).map_err(|e| call_err(self.name(), e.to_string()))?;

        Ok(SynthesisChunk {
            audio,
            text: text.to_string(),
            is_final: false,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
