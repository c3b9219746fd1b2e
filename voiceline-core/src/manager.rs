//! Generic provider management: priority-ordered failover with per-provider
//! circuit breakers and a per-call timeout.
//!
//! One manager exists per stage (transcription, generation, synthesis). A
//! call is routed to the first provider whose breaker admits it; failures
//! and timeouts are recorded and the next candidate is tried. When every
//! candidate fails or is skipped, the stage surfaces
//! [`ProviderError::AllFailed`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::BreakerConfig;
use crate::error::ProviderError;
use crate::events::PipelineEvent;
use crate::types::ProviderKind;

struct ProviderEntry<P: ?Sized> {
    name: String,
    provider: Arc<P>,
    breaker: Mutex<CircuitBreaker>,
}

/// Failover manager for one pipeline stage.
///
/// Providers are tried in the order given; the first entry is the primary.
pub struct ProviderManager<P: ?Sized> {
    kind: ProviderKind,
    entries: Vec<ProviderEntry<P>>,
    call_timeout: Duration,
    active: std::sync::Mutex<Option<usize>>,
    events: std::sync::Mutex<Option<broadcast::Sender<PipelineEvent>>>,
}

impl<P: ?Sized + Send + Sync> ProviderManager<P> {
    pub fn new(
        kind: ProviderKind,
        providers: Vec<(String, Arc<P>)>,
        breaker: &BreakerConfig,
        call_timeout: Duration,
    ) -> Self {
        let entries = providers
            .into_iter()
            .map(|(name, provider)| ProviderEntry {
                name,
                provider,
                breaker: Mutex::new(CircuitBreaker::new(
                    breaker.failure_threshold,
                    Duration::from_millis(breaker.open_timeout_ms),
                )),
            })
            .collect();
        Self {
            kind,
            entries,
            call_timeout,
            active: std::sync::Mutex::new(None),
            events: std::sync::Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wire the pipeline's event stream so fallbacks surface as
    /// `provider-change` events.
    pub fn set_event_sink(&self, tx: broadcast::Sender<PipelineEvent>) {
        if let Ok(mut events) = self.events.lock() {
            *events = Some(tx);
        }
    }

    /// Breaker state per provider, in priority order.
    pub async fn snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        let mut out = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            out.push((entry.name.clone(), entry.breaker.lock().await.snapshot()));
        }
        out
    }

    /// Run `op` against the first available provider, failing over on error
    /// or timeout. `op` is invoked at most once per candidate.
    pub async fn execute<T, F, Fut>(&self, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(Arc<P>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error: Option<ProviderError> = None;

        for (i, entry) in self.entries.iter().enumerate() {
            {
                let mut cb = entry.breaker.lock().await;
                if !cb.try_acquire() {
                    debug!(
                        kind = %self.kind,
                        provider = %entry.name,
                        "skipping provider, circuit open"
                    );
                    continue;
                }
            }

            match timeout(self.call_timeout, op(entry.provider.clone())).await {
                Ok(Ok(value)) => {
                    entry.breaker.lock().await.record_success();
                    self.note_active(i);
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    warn!(
                        kind = %self.kind,
                        provider = %entry.name,
                        error = %e,
                        "provider failed, trying next"
                    );
                    entry.breaker.lock().await.record_failure();
                    last_error = Some(e);
                }
                Err(_) => {
                    let timeout_ms = self.call_timeout.as_millis() as u64;
                    warn!(
                        kind = %self.kind,
                        provider = %entry.name,
                        timeout_ms,
                        "provider timed out, trying next"
                    );
                    entry.breaker.lock().await.record_failure();
                    last_error = Some(ProviderError::Timeout {
                        provider: entry.name.clone(),
                        timeout_ms,
                    });
                }
            }
        }

        if let Some(e) = last_error {
            warn!(kind = %self.kind, last_error = %e, "all providers exhausted");
        }
        Err(ProviderError::AllFailed { kind: self.kind })
    }

    fn note_active(&self, index: usize) {
        let Ok(mut active) = self.active.lock() else {
            return;
        };
        let changed = match *active {
            Some(prev) => prev != index,
            // First successful call only counts as a change when it was
            // not served by the primary.
            None => index != 0,
        };
        *active = Some(index);
        if changed {
            if let Ok(events) = self.events.lock()
                && let Some(tx) = events.as_ref()
            {
                let _ = tx.send(PipelineEvent::ProviderChange {
                    kind: self.kind,
                    provider: self.entries[index].name.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `fail_first` calls, succeeds afterwards.
    struct FlakyBackend {
        name: &'static str,
        fail_first: usize,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FlakyBackend {
        fn ok(name: &'static str) -> Self {
            Self::failing(name, 0)
        }

        fn failing(name: &'static str, fail_first: usize) -> Self {
            Self {
                name,
                fail_first,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(name: &'static str, delay: Duration) -> Self {
            Self {
                name,
                fail_first: 0,
                delay,
                calls: AtomicUsize::new(0),
            }
        }

        async fn call(&self) -> Result<String, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if n < self.fail_first {
                Err(ProviderError::Call {
                    provider: self.name.into(),
                    message: "injected failure".into(),
                })
            } else {
                Ok(format!("{}-ok", self.name))
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn manager(
        providers: Vec<Arc<FlakyBackend>>,
        threshold: u32,
        call_timeout: Duration,
    ) -> ProviderManager<FlakyBackend> {
        let breaker = BreakerConfig {
            failure_threshold: threshold,
            open_timeout_ms: 60_000,
        };
        let entries = providers
            .into_iter()
            .map(|p| (p.name.to_string(), p))
            .collect();
        ProviderManager::new(ProviderKind::Generation, entries, &breaker, call_timeout)
    }

    #[tokio::test]
    async fn test_primary_serves_when_healthy() {
        let primary = Arc::new(FlakyBackend::ok("primary"));
        let fallback = Arc::new(FlakyBackend::ok("fallback"));
        let mgr = manager(
            vec![primary.clone(), fallback.clone()],
            3,
            Duration::from_secs(1),
        );

        let out = mgr.execute(|p| async move { p.call().await }).await.unwrap();
        assert_eq!(out, "primary-ok");
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_fails_over_to_secondary() {
        let primary = Arc::new(FlakyBackend::failing("primary", usize::MAX));
        let fallback = Arc::new(FlakyBackend::ok("fallback"));
        let mgr = manager(
            vec![primary.clone(), fallback.clone()],
            3,
            Duration::from_secs(1),
        );

        let out = mgr.execute(|p| async move { p.call().await }).await.unwrap();
        assert_eq!(out, "fallback-ok");
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_primary_is_skipped() {
        let primary = Arc::new(FlakyBackend::failing("primary", usize::MAX));
        let fallback = Arc::new(FlakyBackend::ok("fallback"));
        let mgr = manager(
            vec![primary.clone(), fallback.clone()],
            3,
            Duration::from_secs(1),
        );

        for _ in 0..3 {
            let _ = mgr.execute(|p| async move { p.call().await }).await;
        }
        assert_eq!(primary.calls(), 3);

        // Circuit is open: the next call must not touch the primary.
        let out = mgr.execute(|p| async move { p.call().await }).await.unwrap();
        assert_eq!(out, "fallback-ok");
        assert_eq!(primary.calls(), 3);

        let snaps = mgr.snapshots().await;
        assert_eq!(snaps[0].1.status, "open");
        assert_eq!(snaps[1].1.status, "closed");
    }

    #[tokio::test]
    async fn test_only_healthy_candidate_is_called() {
        let a = Arc::new(FlakyBackend::failing("a", usize::MAX));
        let b = Arc::new(FlakyBackend::failing("b", usize::MAX));
        let c = Arc::new(FlakyBackend::ok("c"));
        let mgr = manager(vec![a.clone(), b.clone(), c.clone()], 1, Duration::from_secs(1));

        // One failure each opens a and b at threshold 1.
        let _ = mgr.execute(|p| async move { p.call().await }).await;
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 1);

        // With a and b open, the next call goes to c and only c.
        let out = mgr.execute(|p| async move { p.call().await }).await.unwrap();
        assert_eq!(out, "c-ok");
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert_eq!(c.calls(), 2);
    }

    #[tokio::test]
    async fn test_all_failed_surfaces_stage_error() {
        let a = Arc::new(FlakyBackend::failing("a", usize::MAX));
        let b = Arc::new(FlakyBackend::failing("b", usize::MAX));
        let mgr = manager(vec![a, b], 3, Duration::from_secs(1));

        let err = mgr
            .execute(|p| async move { p.call().await })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::AllFailed {
                kind: ProviderKind::Generation
            }
        ));
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let slow = Arc::new(FlakyBackend::slow("slow", Duration::from_secs(5)));
        let fast = Arc::new(FlakyBackend::ok("fast"));
        let mgr = manager(
            vec![slow.clone(), fast.clone()],
            1,
            Duration::from_millis(20),
        );

        let out = mgr.execute(|p| async move { p.call().await }).await.unwrap();
        assert_eq!(out, "fast-ok");
        // A single timeout trips the threshold-1 breaker.
        assert_eq!(mgr.snapshots().await[0].1.status, "open");
    }

    #[tokio::test]
    async fn test_fallback_emits_provider_change() {
        let primary = Arc::new(FlakyBackend::failing("primary", usize::MAX));
        let fallback = Arc::new(FlakyBackend::ok("fallback"));
        let mgr = manager(vec![primary, fallback], 3, Duration::from_secs(1));

        let (tx, mut rx) = broadcast::channel(16);
        mgr.set_event_sink(tx);

        let _ = mgr.execute(|p| async move { p.call().await }).await;
        match rx.try_recv().unwrap() {
            PipelineEvent::ProviderChange { kind, provider } => {
                assert_eq!(kind, ProviderKind::Generation);
                assert_eq!(provider, "fallback");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_primary_first_use_is_not_a_change() {
        let primary = Arc::new(FlakyBackend::ok("primary"));
        let mgr = manager(vec![primary], 3, Duration::from_secs(1));

        let (tx, mut rx) = broadcast::channel(16);
        mgr.set_event_sink(tx);

        let _ = mgr.execute(|p| async move { p.call().await }).await;
        assert!(rx.try_recv().is_err());
    }
}
