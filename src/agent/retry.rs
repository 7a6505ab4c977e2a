//! Attempt loop around the upstream agent.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::{Session, SessionStream};
use crate::error::InvokeError;
use crate::mcp::{ScopedConnection, ToolManifest};
use crate::observer::SharedObserver;
use crate::stream::{ClientEvent, EventFrameDecoder, ReadStep, TimeBoundedStreamReader};
use crate::upstream::{InvocationRequest, Upstream};

/// Exponential backoff between attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Growth per failed attempt.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay after `failures` consecutive failed attempts (1 = first failure).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Limits applied to every session run by a [`RetryingInvoker`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    /// Read deadline for one attempt, capped by the session deadline.
    pub attempt_timeout: Duration,
    /// Bound on acquiring the execution lease.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::default(),
            attempt_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(60),
        }
    }
}

enum AttemptEnd {
    Completed,
    Failed {
        fault: InvokeError,
        /// Text not yet delivered as a segment.
        unflushed: String,
    },
}

/// Runs a session against the upstream agent, retrying transient failures.
///
/// Each attempt takes its own execution lease, reads the stream with a fresh
/// accumulator, and releases the lease before any backoff sleep, so a
/// session never holds more than one lease.
#[derive(Clone)]
pub struct RetryingInvoker {
    upstream: Arc<dyn Upstream>,
    connection: ScopedConnection,
    policy: RetryPolicy,
    decoder: EventFrameDecoder,
    observer: SharedObserver,
}

impl RetryingInvoker {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        connection: ScopedConnection,
        policy: RetryPolicy,
        observer: SharedObserver,
    ) -> Self {
        Self {
            upstream,
            connection,
            policy,
            decoder: EventFrameDecoder::default(),
            observer,
        }
    }

    pub fn with_decoder(mut self, decoder: EventFrameDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `session` with the tools in `manifest`.
    ///
    /// The returned stream is lazy: nothing happens until it is polled, and
    /// dropping it cancels the session.
    pub fn invoke(&self, session: Session, manifest: ToolManifest) -> SessionStream {
        let id = session.id();
        let (preview_tx, preview) = watch::channel(String::new());
        SessionStream {
            id,
            events: self.attempts(session, manifest, preview_tx),
            preview,
        }
    }

    pub(crate) fn attempts(
        &self,
        mut session: Session,
        manifest: ToolManifest,
        preview: watch::Sender<String>,
    ) -> BoxStream<'static, ClientEvent> {
        let this = self.clone();

        stream! {
            let session_id = session.id();
            loop {
                let attempt = session.begin_attempt();
                preview.send_replace(String::new());
                let attempt_deadline =
                    (Instant::now() + this.policy.attempt_timeout).min(session.deadline());
                info!(%session_id, attempt, max_attempts = this.policy.max_attempts, "Starting attempt");

                let mut reader = TimeBoundedStreamReader::new(
                    this.decoder.clone(),
                    this.observer.clone(),
                    attempt_deadline,
                )
                .with_preview(preview.clone());

                let connect_timeout = this.policy.connect_timeout.min(session.remaining());
                let end = match this.connection.acquire(connect_timeout).await {
                    Err(fault) => AttemptEnd::Failed {
                        fault,
                        unflushed: String::new(),
                    },
                    Ok(lease) => {
                        let request = InvocationRequest {
                            prompt: session.prompt().to_string(),
                            tools: manifest.tools.clone(),
                            tool_session: lease.session_id(),
                        };

                        let end = match tokio::time::timeout_at(
                            attempt_deadline,
                            this.upstream.invoke(request),
                        )
                        .await
                        {
                            Err(_) => AttemptEnd::Failed {
                                fault: this.deadline_fault(&session, "waiting for the agent to respond"),
                                unflushed: String::new(),
                            },
                            Ok(Err(fault)) => AttemptEnd::Failed {
                                fault,
                                unflushed: String::new(),
                            },
                            Ok(Ok(mut frames)) => loop {
                                match reader.step(&mut frames).await {
                                    ReadStep::Emit(events) => {
                                        for event in events {
                                            yield event;
                                        }
                                    }
                                    ReadStep::Done(outcome) => {
                                        session.append_text(&outcome.transcript);
                                        break match outcome.fault {
                                            Some(fault) => AttemptEnd::Failed {
                                                fault,
                                                unflushed: outcome.text,
                                            },
                                            None if outcome.completed => AttemptEnd::Completed,
                                            None => AttemptEnd::Failed {
                                                fault: this.deadline_fault(&session, "reading the agent stream"),
                                                unflushed: outcome.text,
                                            },
                                        };
                                    }
                                }
                            },
                        };

                        lease.release().await;
                        end
                    }
                };

                let (fault, unflushed) = match end {
                    AttemptEnd::Completed => {
                        info!(%session_id, attempt, "Session completed");
                        return;
                    }
                    AttemptEnd::Failed { fault, unflushed } => (fault, unflushed),
                };

                warn!(
                    %session_id,
                    attempt,
                    kind = fault.kind(),
                    error = %fault,
                    "Attempt failed"
                );

                let terminal = if !fault.is_retryable() {
                    Some(fault)
                } else if session.is_expired() {
                    Some(InvokeError::SessionDeadline(session.ceiling()))
                } else if attempt >= this.policy.max_attempts {
                    Some(InvokeError::ExhaustedRetries {
                        attempts: attempt,
                        last: Box::new(fault),
                        partial: session.accumulated_text().to_string(),
                    })
                } else {
                    let delay = this.policy.backoff.delay_for(attempt);
                    if Instant::now() + delay >= session.deadline() {
                        debug!(%session_id, delay_ms = delay.as_millis() as u64, "Backoff would pass the session deadline");
                        Some(InvokeError::SessionDeadline(session.ceiling()))
                    } else {
                        let message = format!(
                            "Attempt {attempt} failed: {fault}. Retrying in {:.1}s...",
                            delay.as_secs_f64()
                        );
                        this.observer.warning(&message);
                        yield ClientEvent::warning(message);
                        tokio::time::sleep(delay).await;
                        None
                    }
                };

                if let Some(error) = terminal {
                    if !unflushed.is_empty() {
                        yield ClientEvent::warning("Showing partial result received before the failure.");
                        yield ClientEvent::text(unflushed);
                    }
                    let message = error.user_message();
                    this.observer.error(&message);
                    yield ClientEvent::error(message);
                    return;
                }
            }
        }
        .boxed()
    }

    fn deadline_fault(&self, session: &Session, during: &'static str) -> InvokeError {
        if session.is_expired() {
            InvokeError::SessionDeadline(session.ceiling())
        } else {
            InvokeError::Timeout {
                during,
                after: self.policy.attempt_timeout,
            }
        }
    }
}
