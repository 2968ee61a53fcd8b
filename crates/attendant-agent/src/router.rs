use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
use crate::stream::StreamEvent;

/// Outer per-request timeout — spec.md §4.F ("each request runs under an
/// outer timeout (120 s)").
const OUTER_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Retry backoff floor and ceiling — spec.md §4.F ("initial delay 1 s,
/// exponential (×2), cap 30 s").
const BACKOFF_INITIAL_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Wraps a single [`LlmProvider`] with retry-with-backoff on transient
/// errors — spec.md §4.F ("Retry only on transient errors: HTTP
/// 408/429/5xx, connection reset/refused/timeout, \"rate limit\"").
///
/// Only one provider is configured (`anthropic.api_key`), so this drops
/// the multi-provider failover chain and keeps only its per-attempt
/// backoff loop.
pub struct RetryingProvider {
    inner: Box<dyn LlmProvider>,
    max_retries: u32,
}

impl RetryingProvider {
    pub fn new(inner: Box<dyn LlmProvider>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }

    /// `min(1000 * 2^attempt, 30_000)` ms — spec.md §4.F. Callers special-case
    /// `RateLimited{retry_after_ms}` and use that delay instead of this one.
    fn backoff(attempt: u32) -> Duration {
        let ms = BACKOFF_INITIAL_MS.saturating_mul(1u64 << attempt.min(10));
        Duration::from_millis(ms.min(BACKOFF_CAP_MS))
    }

    fn delay_for(attempt: u32, err: &ProviderError) -> Duration {
        match err {
            ProviderError::RateLimited { retry_after_ms } => Duration::from_millis(*retry_after_ms),
            _ => Self::backoff(attempt),
        }
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=self.max_retries {
            let outcome = tokio::time::timeout(OUTER_REQUEST_TIMEOUT, self.inner.send(req))
                .await
                .unwrap_or_else(|_| {
                    Err(ProviderError::Timeout {
                        ms: OUTER_REQUEST_TIMEOUT.as_millis() as u64,
                    })
                });

            match outcome {
                Ok(resp) => {
                    if attempt > 0 {
                        info!(provider = self.inner.name(), attempt, "request succeeded after retry");
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    warn!(provider = self.inner.name(), attempt, err = %e, "provider send failed");
                    let transient = e.is_transient();
                    let delay = Self::delay_for(attempt, &e);
                    last_err = Some(e);
                    if !transient || attempt == self.max_retries {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("no attempts made".to_string())))
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=self.max_retries {
            // Never retry once a chunk has reached the caller — spec.md §4.F
            // ("Never retry if any stream chunk has been delivered"). We can't
            // see `tx`'s receive side, so we track whether *this* attempt put
            // anything on the channel via a tee that flips the flag on send.
            let delivered = Arc::new(AtomicBool::new(false));
            let tee = TeeSender {
                inner: tx.clone(),
                delivered: delivered.clone(),
            };

            let outcome = tokio::time::timeout(
                OUTER_REQUEST_TIMEOUT,
                self.inner.send_stream(req, tee.into_sender()),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Timeout {
                    ms: OUTER_REQUEST_TIMEOUT.as_millis() as u64,
                })
            });

            match outcome {
                Ok(()) => {
                    if attempt > 0 {
                        info!(provider = self.inner.name(), attempt, "stream request succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(provider = self.inner.name(), attempt, err = %e, "provider send_stream failed");
                    if delivered.load(Ordering::SeqCst) {
                        warn!(
                            provider = self.inner.name(),
                            "aborting retry: a chunk was already delivered this attempt"
                        );
                        return Err(e);
                    }
                    let transient = e.is_transient();
                    let delay = Self::delay_for(attempt, &e);
                    last_err = Some(e);
                    if !transient || attempt == self.max_retries {
                        break;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("no attempts made".to_string())))
    }
}

/// Relays `StreamEvent`s to the real channel while flipping `delivered` the
/// first time anything is sent, so the retry loop can tell whether this
/// attempt already emitted output to the caller.
struct TeeSender {
    inner: mpsc::Sender<StreamEvent>,
    delivered: Arc<AtomicBool>,
}

impl TeeSender {
    /// Spawns a relay task and returns the sender half callers forward
    /// events into; `inner`/`delivered` are moved onto that task.
    fn into_sender(self) -> mpsc::Sender<StreamEvent> {
        let (tx, mut rx) = mpsc::channel::<StreamEvent>(64);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.delivered.store(true, Ordering::SeqCst);
                if self.inner.send(event).await.is_err() {
                    break;
                }
            }
        });
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatRequest, ChatResponse, Message, Role};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyThenOk {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyThenOk {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            if self.failures_left.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(ProviderError::Timeout { ms: 1 });
            }
            Ok(ChatResponse {
                content: "ok".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".to_string(),
                tool_calls: Vec::new(),
                tools_used: Vec::new(),
            })
        }
    }

    struct AlwaysParseError;

    #[async_trait]
    impl LlmProvider for AlwaysParseError {
        fn name(&self) -> &str {
            "broken"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::Parse("malformed".to_string()))
        }
    }

    fn dummy_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            system: "You are a test.".to_string(),
            system_prompt: None,
            messages: vec![Message { role: Role::User, content: "hello".to_string() }],
            max_tokens: 64,
            stream: false,
            thinking: None,
            thinking_budget: None,
            tools: Vec::new(),
            raw_messages: None,
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let provider = RetryingProvider::new(
            Box::new(FlakyThenOk { failures_left: AtomicU32::new(2) }),
            3,
        );
        let result = provider.send(&dummy_request()).await;
        assert_eq!(result.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let provider = RetryingProvider::new(
            Box::new(FlakyThenOk { failures_left: AtomicU32::new(99) }),
            2,
        );
        assert!(provider.send(&dummy_request()).await.is_err());
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let provider = RetryingProvider::new(Box::new(AlwaysParseError), 5);
        let result = provider.send(&dummy_request()).await;
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }
}
