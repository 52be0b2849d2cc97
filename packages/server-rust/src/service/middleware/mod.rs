//! Tower middleware layers for the delivery pipeline.
//!
//! - [`in_flight`]: Holds a shutdown in-flight guard per delivery
//! - [`metrics`]: Delivery spans, timing and outcome counters
//! - [`pipeline`]: Composes all layers around the router

pub mod in_flight;
pub mod metrics;
pub mod pipeline;

pub use in_flight::TrackInFlightLayer;
pub use metrics::MetricsLayer;
pub use pipeline::build_listener_pipeline;
