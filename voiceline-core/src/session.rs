//! Streaming sessions: the transcribe → generate → synthesize work for one
//! utterance, run as cancellable stage tasks.
//!
//! Every session carries the epoch it was created under. Stage tasks tag all
//! their events with that epoch; the orchestrator drops events whose epoch is
//! stale, so a cancelled session can never interleave output into its
//! successor no matter when its in-flight callbacks land.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audio::AudioSink;
use crate::chunker::SentenceChunker;
use crate::config::ChunkerConfig;
use crate::error::VoicelineError;
use crate::manager::ProviderManager;
use crate::providers::{GenerationProvider, SynthesisProvider, TranscriptionProvider};
use crate::types::{SpeechSegment, TokenUsage, TranscriptResult};

/// Shared handles the stage tasks need.
pub struct StageContext {
    pub stt: Arc<ProviderManager<dyn TranscriptionProvider>>,
    pub llm: Arc<ProviderManager<dyn GenerationProvider>>,
    pub tts: Arc<ProviderManager<dyn SynthesisProvider>>,
    pub sink: Arc<dyn AudioSink>,
    /// Shared so runtime config updates reach sessions started afterwards.
    pub chunker: std::sync::RwLock<ChunkerConfig>,
}

impl StageContext {
    fn chunker_config(&self) -> ChunkerConfig {
        match self.chunker.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Internal events reported by stage tasks to the orchestrator.
#[derive(Debug)]
pub enum SessionEvent {
    /// An interim or final transcription result.
    Transcript { epoch: u64, result: TranscriptResult },
    /// Generation began.
    ResponseStarted { epoch: u64, session_id: Uuid },
    /// The chunker released a response fragment.
    Fragment {
        epoch: u64,
        session_id: Uuid,
        text: String,
    },
    /// A synthesized fragment finished playing.
    Played { epoch: u64, text: String },
    /// Generation completed and the full response text is known.
    ResponseFinished {
        epoch: u64,
        session_id: Uuid,
        full_text: String,
        usage: TokenUsage,
    },
    /// All fragments played; the session is done.
    Completed { epoch: u64 },
    /// A stage failed terminally.
    Failed { epoch: u64, error: VoicelineError },
    /// A timer armed by the orchestrator ran out.
    TimerElapsed { epoch: u64, timer_id: u64 },
}

impl SessionEvent {
    pub fn epoch(&self) -> u64 {
        match self {
            Self::Transcript { epoch, .. }
            | Self::ResponseStarted { epoch, .. }
            | Self::Fragment { epoch, .. }
            | Self::Played { epoch, .. }
            | Self::ResponseFinished { epoch, .. }
            | Self::Completed { epoch }
            | Self::Failed { epoch, .. }
            | Self::TimerElapsed { epoch, .. } => *epoch,
        }
    }
}

/// One interaction session. Owns the cancellation token shared by its stage
/// tasks; dropping or cancelling the session stops them at the next await.
pub struct StreamingSession {
    pub id: Uuid,
    pub epoch: u64,
    ctx: Arc<StageContext>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl StreamingSession {
    pub fn new(epoch: u64, ctx: Arc<StageContext>, events: mpsc::Sender<SessionEvent>) -> Self {
        let id = Uuid::new_v4();
        debug!(session_id = %id, epoch, "session created");
        Self {
            id,
            epoch,
            ctx,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop all stage tasks. In-flight provider callbacks become no-ops.
    pub fn cancel(&self) {
        debug!(session_id = %self.id, epoch = self.epoch, "session cancelled");
        self.cancel.cancel();
    }

    /// Transcribe a finalized speech segment, streaming results back.
    pub fn spawn_transcription(&self, segment: SpeechSegment) {
        let ctx = self.ctx.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            transcribe_stage(ctx, epoch, segment, events, cancel).await;
        });
    }

    /// Generate and voice a response to `prompt`.
    pub fn spawn_response(&self, prompt: String) {
        let ctx = self.ctx.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let epoch = self.epoch;
        let id = self.id;
        tokio::spawn(async move {
            respond_stage(ctx, epoch, id, prompt, events, cancel).await;
        });
    }

    /// Fire [`SessionEvent::TimerElapsed`] after `wait`, unless the session
    /// is cancelled first. `timer_id` lets the orchestrator ignore timers it
    /// has since superseded.
    pub fn spawn_timer(&self, wait: Duration, timer_id: u64) {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(wait) => {
                    let _ = events.send(SessionEvent::TimerElapsed { epoch, timer_id }).await;
                }
            }
        });
    }
}

async fn transcribe_stage(
    ctx: Arc<StageContext>,
    epoch: u64,
    segment: SpeechSegment,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let (t_tx, mut t_rx) = mpsc::channel::<TranscriptResult>(16);
    let segment = Arc::new(segment);
    let stt = ctx.stt.clone();

    let call = stt.execute(move |provider| {
        let tx = t_tx.clone();
        let segment = segment.clone();
        async move { provider.transcribe(&segment, tx).await }
    });
    tokio::pin!(call);

    // Exactly one final result is forwarded even if a failed attempt got as
    // far as emitting one before erroring.
    let mut saw_final = false;
    let mut rx_open = true;

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = &mut call => break result,
            maybe = t_rx.recv(), if rx_open => {
                match maybe {
                    Some(result) => {
                        if result.is_final {
                            if saw_final {
                                continue;
                            }
                            saw_final = true;
                        }
                        let _ = events.send(SessionEvent::Transcript { epoch, result }).await;
                    }
                    None => rx_open = false,
                }
            }
        }
    };

    // Drain results that were buffered when the call finished.
    while let Ok(result) = t_rx.try_recv() {
        if result.is_final {
            if saw_final {
                continue;
            }
            saw_final = true;
        }
        let _ = events.send(SessionEvent::Transcript { epoch, result }).await;
    }

    if let Err(e) = outcome {
        warn!(epoch, error = %e, "transcription stage failed");
        let _ = events
            .send(SessionEvent::Failed {
                epoch,
                error: e.into(),
            })
            .await;
    }
}

async fn respond_stage(
    ctx: Arc<StageContext>,
    epoch: u64,
    session_id: Uuid,
    prompt: String,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let _ = events
        .send(SessionEvent::ResponseStarted { epoch, session_id })
        .await;

    let (g_tx, mut g_rx) = mpsc::channel::<crate::types::GenerationChunk>(64);
    let llm = ctx.llm.clone();
    let call_prompt = prompt.clone();
    let call = llm.execute(move |provider| {
        let tx = g_tx.clone();
        let prompt = call_prompt.clone();
        async move { provider.generate(&prompt, tx).await }
    });
    tokio::pin!(call);

    let mut chunker = SentenceChunker::new(&ctx.chunker_config());
    let mut full_text = String::new();
    let mut generation = None;

    while generation.is_none() {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = &mut call => {
                generation = Some(result);
            }
            maybe = g_rx.recv() => {
                if let Some(chunk) = maybe
                    && handle_chunk(
                        &ctx, epoch, session_id, &chunk, &mut chunker, &mut full_text,
                        &events, &cancel,
                    )
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }

    // Voice the chunks that were still buffered when the call returned.
    while let Ok(chunk) = g_rx.try_recv() {
        if handle_chunk(
            &ctx, epoch, session_id, &chunk, &mut chunker, &mut full_text, &events, &cancel,
        )
        .await
        .is_err()
        {
            return;
        }
    }

    let usage = match generation.unwrap_or(Err(crate::error::ProviderError::AllFailed {
        kind: crate::types::ProviderKind::Generation,
    })) {
        Ok(usage) => usage,
        Err(e) => {
            warn!(epoch, session_id = %session_id, error = %e, "generation stage failed");
            let _ = events
                .send(SessionEvent::Failed {
                    epoch,
                    error: e.into(),
                })
                .await;
            return;
        }
    };

    if let Some(rest) = chunker.flush()
        && voice_fragment(&ctx, epoch, session_id, rest, true, &events, &cancel)
            .await
            .is_err()
    {
        return;
    }

    let _ = events
        .send(SessionEvent::ResponseFinished {
            epoch,
            session_id,
            full_text,
            usage,
        })
        .await;
    let _ = events.send(SessionEvent::Completed { epoch }).await;
}

/// Fold one generation chunk into the running response, voicing any
/// fragments the chunker releases.
#[allow(clippy::too_many_arguments)]
async fn handle_chunk(
    ctx: &Arc<StageContext>,
    epoch: u64,
    session_id: Uuid,
    chunk: &crate::types::GenerationChunk,
    chunker: &mut SentenceChunker,
    full_text: &mut String,
    events: &mpsc::Sender<SessionEvent>,
    cancel: &CancellationToken,
) -> Result<(), ()> {
    if chunk.text.is_empty() {
        return Ok(());
    }
    full_text.push_str(&chunk.text);
    for fragment in chunker.push(&chunk.text) {
        voice_fragment(ctx, epoch, session_id, fragment, false, events, cancel).await?;
    }
    Ok(())
}

/// Announce a fragment, synthesize it, and play it. Returns `Err` when the
/// stage must stop (cancellation or terminal synthesis failure).
async fn voice_fragment(
    ctx: &Arc<StageContext>,
    epoch: u64,
    session_id: Uuid,
    fragment: String,
    is_final: bool,
    events: &mpsc::Sender<SessionEvent>,
    cancel: &CancellationToken,
) -> Result<(), ()> {
    let _ = events
        .send(SessionEvent::Fragment {
            epoch,
            session_id,
            text: fragment.clone(),
        })
        .await;

    let call_text = fragment.clone();
    let synth = ctx.tts.execute(move |provider| {
        let text = call_text.clone();
        async move { provider.synthesize(&text).await }
    });

    let mut chunk = tokio::select! {
        _ = cancel.cancelled() => return Err(()),
        result = synth => match result {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(epoch, session_id = %session_id, error = %e, "synthesis stage failed");
                let _ = events
                    .send(SessionEvent::Failed {
                        epoch,
                        error: e.into(),
                    })
                    .await;
                return Err(());
            }
        },
    };
    chunk.is_final = is_final;

    tokio::select! {
        _ = cancel.cancelled() => return Err(()),
        result = ctx.sink.play(&chunk) => {
            if let Err(e) = result {
                warn!(epoch, error = %e, "playback failed");
                let _ = events
                    .send(SessionEvent::Failed { epoch, error: e })
                    .await;
                return Err(());
            }
        }
    }

    let _ = events
        .send(SessionEvent::Played {
            epoch,
            text: fragment,
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CollectingSink;
    use crate::config::BreakerConfig;
    use crate::providers::mock::{MockGenerator, MockSynthesizer, MockTranscriber};
    use crate::types::ProviderKind;
    use chrono::Utc;

    fn context(
        stt: Vec<Arc<dyn TranscriptionProvider>>,
        llm: Vec<Arc<dyn GenerationProvider>>,
        tts: Vec<Arc<dyn SynthesisProvider>>,
        sink: Arc<dyn AudioSink>,
    ) -> Arc<StageContext> {
        let breaker = BreakerConfig::default();
        let timeout = Duration::from_secs(5);
        let name = |i: usize| if i == 0 { "primary" } else { "fallback" };
        Arc::new(StageContext {
            stt: Arc::new(ProviderManager::new(
                ProviderKind::Transcription,
                stt.into_iter()
                    .enumerate()
                    .map(|(i, p)| (name(i).to_string(), p))
                    .collect(),
                &breaker,
                timeout,
            )),
            llm: Arc::new(ProviderManager::new(
                ProviderKind::Generation,
                llm.into_iter()
                    .enumerate()
                    .map(|(i, p)| (name(i).to_string(), p))
                    .collect(),
                &breaker,
                timeout,
            )),
            tts: Arc::new(ProviderManager::new(
                ProviderKind::Synthesis,
                tts.into_iter()
                    .enumerate()
                    .map(|(i, p)| (name(i).to_string(), p))
                    .collect(),
                &breaker,
                timeout,
            )),
            sink,
            chunker: std::sync::RwLock::new(ChunkerConfig::default()),
        })
    }

    fn segment() -> SpeechSegment {
        SpeechSegment {
            samples: vec![0.1; 16000],
            sample_rate: 16000,
            started_at: Utc::now(),
            ended_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_transcription_stage_streams_results() {
        let ctx = context(
            vec![Arc::new(MockTranscriber::with_transcripts(vec![
                "what time is it",
            ]))],
            vec![Arc::new(MockGenerator::repeating("ignored"))],
            vec![Arc::new(MockSynthesizer::new())],
            Arc::new(CollectingSink::new()),
        );
        let (tx, mut rx) = mpsc::channel(32);
        let session = StreamingSession::new(1, ctx, tx);
        session.spawn_transcription(segment());

        let mut finals = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::Transcript { epoch, result } => {
                    assert_eq!(epoch, 1);
                    if result.is_final {
                        finals.push(result.text);
                        break;
                    }
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(finals, vec!["what time is it".to_string()]);
    }

    #[tokio::test]
    async fn test_transcription_failure_reports_failed() {
        let ctx = context(
            vec![Arc::new(MockTranscriber::new())],
            vec![Arc::new(MockGenerator::repeating("ignored"))],
            vec![Arc::new(MockSynthesizer::new())],
            Arc::new(CollectingSink::new()),
        );
        let (tx, mut rx) = mpsc::channel(32);
        let session = StreamingSession::new(1, ctx, tx);
        session.spawn_transcription(segment());

        match rx.recv().await.unwrap() {
            SessionEvent::Failed { epoch, error } => {
                assert_eq!(epoch, 1);
                assert_eq!(error.code(), "all_providers_failed");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_response_stage_event_order() {
        let sink = Arc::new(CollectingSink::new());
        let ctx = context(
            vec![Arc::new(MockTranscriber::new())],
            vec![Arc::new(MockGenerator::repeating(
                "Sure. I can help with that.",
            ))],
            vec![Arc::new(MockSynthesizer::new())],
            sink.clone(),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let session = StreamingSession::new(2, ctx, tx);
        session.spawn_response("help me".to_string());

        let mut saw_start = false;
        let mut fragments = Vec::new();
        let mut played = Vec::new();
        let mut finished = None;
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::ResponseStarted { .. } => {
                    assert!(fragments.is_empty());
                    saw_start = true;
                }
                SessionEvent::Fragment { text, .. } => fragments.push(text),
                SessionEvent::Played { text, .. } => {
                    // Playback always trails the fragment announcement.
                    assert_eq!(fragments.last(), Some(&text));
                    played.push(text);
                }
                SessionEvent::ResponseFinished {
                    full_text, usage, ..
                } => {
                    finished = Some((full_text, usage));
                }
                SessionEvent::Completed { epoch } => {
                    assert_eq!(epoch, 2);
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }

        assert!(saw_start);
        assert_eq!(fragments, played);
        assert_eq!(sink.played(), played);
        let (full_text, usage) = finished.unwrap();
        assert_eq!(full_text, "Sure. I can help with that.");
        assert!(usage.total() > 0);
        // The whole response was voiced, in order.
        assert_eq!(fragments.join(" "), "Sure. I can help with that.");
    }

    #[tokio::test]
    async fn test_cancelled_session_plays_nothing_more() {
        let sink = Arc::new(CollectingSink::new());
        let ctx = context(
            vec![Arc::new(MockTranscriber::new())],
            vec![Arc::new(
                MockGenerator::repeating("One sentence here. Another sentence follows. And a third one arrives.")
                    .with_chunk_delay(Duration::from_millis(5)),
            )],
            vec![Arc::new(MockSynthesizer::new())],
            sink.clone(),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let session = StreamingSession::new(3, ctx, tx);
        session.spawn_response("go".to_string());

        // Cancel as soon as the first fragment has been voiced.
        while let Some(event) = rx.recv().await {
            if matches!(event, SessionEvent::Played { .. }) {
                session.cancel();
                break;
            }
        }
        let played_at_cancel = sink.count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.count(), played_at_cancel);
    }

    #[tokio::test]
    async fn test_generation_failure_reports_failed() {
        let ctx = context(
            vec![Arc::new(MockTranscriber::new())],
            vec![Arc::new(MockGenerator::with_responses(Vec::<String>::new()))],
            vec![Arc::new(MockSynthesizer::new())],
            Arc::new(CollectingSink::new()),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let session = StreamingSession::new(4, ctx, tx);
        session.spawn_response("go".to_string());

        loop {
            match rx.recv().await.unwrap() {
                SessionEvent::ResponseStarted { .. } => continue,
                SessionEvent::Failed { error, .. } => {
                    assert_eq!(error.code(), "all_providers_failed");
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_generation_fails_over_mid_session() {
        let primary = Arc::new(MockGenerator::repeating("From the fallback provider.").fail_first(usize::MAX));
        let fallback = Arc::new(MockGenerator::repeating("From the fallback provider."));
        let ctx = context(
            vec![Arc::new(MockTranscriber::new())],
            vec![primary, fallback],
            vec![Arc::new(MockSynthesizer::new())],
            Arc::new(CollectingSink::new()),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let session = StreamingSession::new(5, ctx, tx);
        session.spawn_response("go".to_string());

        loop {
            match rx.recv().await.unwrap() {
                SessionEvent::ResponseFinished { full_text, .. } => {
                    assert_eq!(full_text, "From the fallback provider.");
                    break;
                }
                SessionEvent::Failed { error, .. } => panic!("should not fail: {error}"),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_timer_fires_with_epoch_and_id() {
        let ctx = context(
            vec![Arc::new(MockTranscriber::new())],
            vec![Arc::new(MockGenerator::repeating("x"))],
            vec![Arc::new(MockSynthesizer::new())],
            Arc::new(CollectingSink::new()),
        );
        let (tx, mut rx) = mpsc::channel(8);
        let session = StreamingSession::new(7, ctx, tx);
        session.spawn_timer(Duration::from_millis(10), 42);

        match rx.recv().await.unwrap() {
            SessionEvent::TimerElapsed { epoch, timer_id } => {
                assert_eq!(epoch, 7);
                assert_eq!(timer_id, 42);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_timer() {
        let ctx = context(
            vec![Arc::new(MockTranscriber::new())],
            vec![Arc::new(MockGenerator::repeating("x"))],
            vec![Arc::new(MockSynthesizer::new())],
            Arc::new(CollectingSink::new()),
        );
        let (tx, mut rx) = mpsc::channel(8);
        let session = StreamingSession::new(8, ctx, tx);
        session.spawn_timer(Duration::from_millis(30), 1);
        session.cancel();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());
    }
}
