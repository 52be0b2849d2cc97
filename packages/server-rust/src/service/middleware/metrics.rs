//! Metrics middleware for deliveries.
//!
//! Wraps each delivery in a `delivery` span, records its duration and bumps
//! the per-outcome delivery counter.

use std::convert::Infallible;
use std::task::{Context, Poll};
use std::time::Instant;

use paeon_core::Message;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::listener::{DeliveryFuture, DeliveryOutcome};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments deliveries with a span, a counter and a histogram.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Message> for MetricsService<S>
where
    S: Service<Message, Response = DeliveryOutcome, Error = Infallible> + Send,
    S::Future: Send + 'static,
{
    type Response = DeliveryOutcome;
    type Error = Infallible;
    type Future = DeliveryFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let correlation_id = message
            .correlation_id
            .as_ref()
            .map_or_else(String::new, ToString::to_string);

        let span = info_span!(
            "delivery",
            correlation_id = %correlation_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(message);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(outcome) => outcome.as_str(),
                    Err(never) => match *never {},
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!("paeon_deliveries_total", "outcome" => outcome).increment(1);
                metrics::histogram!("paeon_delivery_duration_seconds").record(elapsed.as_secs_f64());

                tracing::info!(
                    correlation_id = %correlation_id,
                    duration_ms,
                    outcome,
                    "delivery complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;

    struct FixedOutcome(DeliveryOutcome);

    impl Service<Message> for FixedOutcome {
        type Response = DeliveryOutcome;
        type Error = Infallible;
        type Future = DeliveryFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _message: Message) -> Self::Future {
            let outcome = self.0;
            Box::pin(async move { Ok(outcome) })
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_outcome() {
        let svc = MetricsLayer.layer(FixedOutcome(DeliveryOutcome::NoReplyTo));
        let outcome = svc.oneshot(Message::text("note")).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::NoReplyTo);
    }
}
