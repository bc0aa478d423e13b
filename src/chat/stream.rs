//! Resilient consumption of provider fragment streams
//!
//! Wraps a raw `FragmentStream` with:
//! - Setup retry with linearly increasing delay
//! - A per-fragment timeout
//! - A one-shot non-streaming fallback when nothing has been yielded yet

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::config::ChatSettings;
use crate::error::{Error, Result};
use crate::provider::{CompletionProvider, CompletionRequest, FragmentStream};

// ─────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────

/// Timeouts and retry limits for one streamed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPolicy {
    /// Maximum wait for any single fragment
    pub chunk_timeout: Duration,
    /// Bound on the non-streaming fallback call
    pub fallback_timeout: Duration,
    /// Setup attempts after the first
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * n`
    pub retry_delay: Duration,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_secs(10),
            fallback_timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&ChatSettings> for StreamPolicy {
    fn from(settings: &ChatSettings) -> Self {
        Self {
            chunk_timeout: settings.chunk_timeout(),
            fallback_timeout: settings.fallback_timeout(),
            max_retries: settings.max_retries,
            retry_delay: settings.retry_delay(),
        }
    }
}

/// Linear retry schedule: `step`, `2 * step`, ... for `max_retries` attempts
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    max_retries: u32,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(step: Duration, max_retries: u32) -> Self {
        Self {
            step,
            max_retries,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(self.step * self.attempt)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ─────────────────────────────────────────────────────────────────
// Resilient Stream
// ─────────────────────────────────────────────────────────────────

/// Lifecycle of one streamed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Started,
    Streaming,
    Completed,
    /// Served by the non-streaming fallback
    Fallback,
    Failed,
}

impl StreamPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamPhase::Completed | StreamPhase::Fallback | StreamPhase::Failed
        )
    }
}

/// Fragment source with timeout and fallback handling
pub struct ResilientStream {
    provider: Arc<dyn CompletionProvider>,
    request: CompletionRequest,
    policy: StreamPolicy,
    inner: Option<FragmentStream>,
    /// Recoverable setup failure still waiting to be served by the fallback
    setup_error: Option<Error>,
    phase: StreamPhase,
    yielded: usize,
}

/// Start a streamed generation, retrying setup failures
///
/// Configuration errors are returned immediately. A recoverable error that
/// survives every retry is deferred to the fallback on the first pull.
pub async fn open_stream(
    provider: Arc<dyn CompletionProvider>,
    request: CompletionRequest,
    policy: StreamPolicy,
) -> Result<ResilientStream> {
    let mut backoff = LinearBackoff::new(policy.retry_delay, policy.max_retries);

    loop {
        match provider.stream_completion(&request).await {
            Ok(inner) => {
                debug!(
                    provider = provider.name(),
                    model = %request.model,
                    attempts = backoff.attempt() + 1,
                    "Stream opened"
                );
                return Ok(ResilientStream::new(provider, request, policy, Some(inner), None));
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Stream setup failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None if e.is_recoverable() => {
                    warn!(error = %e, "Stream setup exhausted retries, using fallback");
                    return Ok(ResilientStream::new(provider, request, policy, None, Some(e)));
                }
                None => return Err(e),
            },
        }
    }
}

impl ResilientStream {
    fn new(
        provider: Arc<dyn CompletionProvider>,
        request: CompletionRequest,
        policy: StreamPolicy,
        inner: Option<FragmentStream>,
        setup_error: Option<Error>,
    ) -> Self {
        Self {
            provider,
            request,
            policy,
            inner,
            setup_error,
            phase: StreamPhase::Started,
            yielded: 0,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// Next non-empty fragment, `Ok(None)` once the generation has ended
    pub async fn next_fragment(&mut self) -> Result<Option<String>> {
        if self.phase.is_terminal() {
            return Ok(None);
        }
        if let Some(cause) = self.setup_error.take() {
            return self.fall_back(cause).await;
        }

        loop {
            let Some(inner) = self.inner.as_mut() else {
                self.phase = StreamPhase::Completed;
                return Ok(None);
            };

            match tokio::time::timeout(self.policy.chunk_timeout, inner.next()).await {
                Ok(Some(Ok(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    self.yielded += 1;
                    self.phase = StreamPhase::Streaming;
                    return Ok(Some(fragment));
                }
                Ok(Some(Err(e))) => {
                    self.inner = None;
                    return self.handle_error(e).await;
                }
                Ok(None) => {
                    self.inner = None;
                    self.phase = StreamPhase::Completed;
                    return Ok(None);
                }
                Err(_) => {
                    drop(self.inner.take());
                    let e = Error::StreamTimeout {
                        timeout_ms: self.policy.chunk_timeout.as_millis() as u64,
                    };
                    return self.handle_error(e).await;
                }
            }
        }
    }

    async fn handle_error(&mut self, e: Error) -> Result<Option<String>> {
        if self.yielded > 0 {
            warn!(error = %e, fragments = self.yielded, "Stream failed after partial output");
            self.phase = StreamPhase::Failed;
            return Err(e);
        }
        if e.is_recoverable() {
            return self.fall_back(e).await;
        }
        self.phase = StreamPhase::Failed;
        Err(e)
    }

    async fn fall_back(&mut self, cause: Error) -> Result<Option<String>> {
        warn!(error = %cause, model = %self.request.model, "Falling back to non-streaming generation");
        self.phase = StreamPhase::Fallback;

        let outcome = tokio::time::timeout(
            self.policy.fallback_timeout,
            self.provider.generate_completion(&self.request),
        )
        .await;

        match outcome {
            Ok(Ok(text)) if text.is_empty() => Ok(None),
            Ok(Ok(text)) => {
                self.yielded += 1;
                Ok(Some(text))
            }
            Ok(Err(e)) => {
                self.phase = StreamPhase::Failed;
                Err(Error::service_unavailable(e))
            }
            Err(_) => {
                self.phase = StreamPhase::Failed;
                Err(Error::service_unavailable(Error::timeout(
                    "Fallback generation",
                    self.policy.fallback_timeout.as_secs(),
                )))
            }
        }
    }
}
