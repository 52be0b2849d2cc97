//! In-flight tracking middleware.
//!
//! Holds an [`InFlightGuard`](crate::network::shutdown::InFlightGuard) for
//! the whole delivery so shutdown can wait for outstanding replies.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use paeon_core::Message;
use tower::{Layer, Service};

use crate::network::shutdown::ShutdownController;
use crate::service::listener::{DeliveryFuture, DeliveryOutcome};

// ---------------------------------------------------------------------------
// TrackInFlightLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrackInFlightLayer {
    shutdown: Arc<ShutdownController>,
}

impl TrackInFlightLayer {
    #[must_use]
    pub fn new(shutdown: Arc<ShutdownController>) -> Self {
        Self { shutdown }
    }
}

impl<S> Layer<S> for TrackInFlightLayer {
    type Service = TrackInFlightService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrackInFlightService {
            inner,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

// ---------------------------------------------------------------------------
// TrackInFlightService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrackInFlightService<S> {
    inner: S,
    shutdown: Arc<ShutdownController>,
}

impl<S> Service<Message> for TrackInFlightService<S>
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
        // Taken before the inner call so the count covers the whole delivery.
        let guard = self.shutdown.in_flight_guard();
        let fut = self.inner.call(message);
        Box::pin(async move {
            let result = fut.await;
            drop(guard);
            result
        })
    }
}
