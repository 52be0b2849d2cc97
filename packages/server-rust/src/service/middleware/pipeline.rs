//! Pipeline composition: wraps the router with the delivery middleware.

use std::convert::Infallible;
use std::sync::Arc;

use paeon_core::Message;
use tower::ServiceBuilder;

use super::in_flight::TrackInFlightLayer;
use super::metrics::MetricsLayer;
use crate::network::shutdown::ShutdownController;
use crate::service::listener::{DeliveryFuture, DeliveryOutcome, RequestReplyRouter};

/// Builds the delivery pipeline around `router`.
///
/// Layer order (outermost to innermost):
/// 1. `TrackInFlightLayer` -- counts the delivery until its reply is sent
/// 2. `MetricsLayer` -- span, timing and outcome counter
///
/// The result is cheap to clone; each delivery runs on its own clone.
#[must_use]
pub fn build_listener_pipeline(
    router: RequestReplyRouter,
    shutdown: Arc<ShutdownController>,
) -> impl tower::Service<
    Message,
    Response = DeliveryOutcome,
    Error = Infallible,
    Future = DeliveryFuture,
> + Clone
       + Send
       + Sync
       + 'static {
    ServiceBuilder::new()
        .layer(TrackInFlightLayer::new(shutdown))
        .layer(MetricsLayer)
        .service(router)
}
