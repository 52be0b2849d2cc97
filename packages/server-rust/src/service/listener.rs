//! Request/reply routing for inbound annotation requests.
//!
//! [`RequestReplyRouter`] turns one inbound message into at most one reply:
//! analyze the text, render the result, and send it to the request's reply
//! destination with the request's correlation id copied verbatim. It keeps no
//! mutable state of its own, so any number of deliveries may run through it
//! at once; serialization happens inside the [`AnnotationEngine`].

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use paeon_core::{AnnotationRequest, Message, OutputFormat};
use tower::{Service, ServiceExt};
use tracing::{debug, error, warn};

use crate::channel::{ChannelSession, MessageListener};
use crate::engine::{format_or_empty, AnnotationEngine};

/// How long a reply send may wait on a full destination.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Boxed future shared by the router and every delivery middleware.
pub type DeliveryFuture = Pin<Box<dyn Future<Output = Result<DeliveryOutcome, Infallible>> + Send>>;

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    /// A reply was sent to the request's reply destination.
    Replied,
    /// Analyzed, but the request named no reply destination.
    NoReplyTo,
    /// Not a text message; dropped without analysis or reply.
    IgnoredNonText,
    /// The reply could not be sent, or the send timed out. Logged, not retried.
    ReplyFailed,
}

impl DeliveryOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::NoReplyTo => "no_reply_to",
            Self::IgnoredNonText => "ignored_non_text",
            Self::ReplyFailed => "reply_failed",
        }
    }
}

// ---------------------------------------------------------------------------
// RequestReplyRouter
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RequestReplyRouter {
    engine: AnnotationEngine,
    session: Arc<dyn ChannelSession>,
    format: OutputFormat,
    reply_timeout: Duration,
}

impl std::fmt::Debug for RequestReplyRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestReplyRouter")
            .field("engine", &self.engine)
            .field("format", &self.format)
            .field("reply_timeout", &self.reply_timeout)
            .finish_non_exhaustive()
    }
}

impl RequestReplyRouter {
    /// `session` is the channel session replies are sent through.
    #[must_use]
    pub fn new(
        engine: AnnotationEngine,
        session: Arc<dyn ChannelSession>,
        format: OutputFormat,
    ) -> Self {
        Self {
            engine,
            session,
            format,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }

    /// Bounds how long a reply send may block before the delivery gives up.
    #[must_use]
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    #[must_use]
    pub fn engine(&self) -> &AnnotationEngine {
        &self.engine
    }

    /// Processes one inbound message. Never fails: every problem is logged
    /// and reflected in the returned outcome.
    pub async fn handle(&self, message: Message) -> DeliveryOutcome {
        let message_id = message.id;
        let Some(request) = AnnotationRequest::from_message(message) else {
            debug!(message_id = ?message_id, "ignoring non-text message");
            return DeliveryOutcome::IgnoredNonText;
        };

        let body = self.annotate(&request.text).await;

        let Some(reply_to) = request.reply_to.as_ref() else {
            debug!(
                correlation_id = ?request.correlation_id,
                "request has no reply destination, not replying"
            );
            return DeliveryOutcome::NoReplyTo;
        };

        let reply = request.reply(body);
        let sent = tokio::time::timeout(self.reply_timeout, self.session.send(reply_to, reply)).await;
        match sent {
            Ok(Ok(reply_id)) => {
                debug!(
                    correlation_id = ?request.correlation_id,
                    reply_to = %reply_to,
                    reply_id = %reply_id,
                    "reply sent"
                );
                DeliveryOutcome::Replied
            }
            Ok(Err(err)) => {
                error!(
                    correlation_id = ?request.correlation_id,
                    reply_to = %reply_to,
                    error = %err,
                    "failed to send reply"
                );
                DeliveryOutcome::ReplyFailed
            }
            Err(_) => {
                error!(
                    correlation_id = ?request.correlation_id,
                    reply_to = %reply_to,
                    timeout_ms = u64::try_from(self.reply_timeout.as_millis()).unwrap_or(u64::MAX),
                    "reply send timed out, dropping reply"
                );
                DeliveryOutcome::ReplyFailed
            }
        }
    }

    /// Analyzes and renders `text`; failures degrade to the partial result,
    /// or to an empty body when nothing was produced.
    async fn annotate(&self, text: &str) -> String {
        match self.engine.analyze(text).await {
            Ok(result) => format_or_empty(&result, self.format),
            Err(err) => {
                warn!(error = %err, kind = err.kind(), "analysis failed, replying with best-effort result");
                err.partial_result()
                    .map(|partial| format_or_empty(partial, self.format))
                    .unwrap_or_default()
            }
        }
    }
}

impl Service<Message> for RequestReplyRouter {
    type Response = DeliveryOutcome;
    type Error = Infallible;
    type Future = DeliveryFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { Ok(router.handle(message).await) })
    }
}

// ---------------------------------------------------------------------------
// ServiceListener
// ---------------------------------------------------------------------------

/// Adapts a delivery service stack to the channel's listener callback.
#[derive(Debug, Clone)]
pub struct ServiceListener<S> {
    service: S,
}

impl<S> ServiceListener<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> MessageListener for ServiceListener<S>
where
    S: Service<Message, Response = DeliveryOutcome, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    async fn on_message(&self, message: Message) {
        // Each delivery gets its own clone so overlapping deliveries never
        // share readiness state.
        let outcome = match self.service.clone().oneshot(message).await {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        };
        debug!(outcome = outcome.as_str(), "delivery finished");
    }
}
