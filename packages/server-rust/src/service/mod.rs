//! The annotation service: request/reply routing over the message channel.
//!
//! 1. **Config** (`config`): typed settings from the resolved configuration
//! 2. **Listener** (`listener`): the request/reply router and channel adapter
//! 3. **Middleware** (`middleware`): Tower layers (in-flight tracking, metrics)
//!
//! [`NlpService`] wires them to an engine and a broker.

pub mod config;
pub mod listener;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use paeon_core::{Destination, PipelineFactory};
use tracing::{info, warn};

use crate::channel::{ChannelError, InMemoryBroker, Subscription};
use crate::engine::AnnotationEngine;
use crate::network::ShutdownController;

pub use config::ServiceConfig;
pub use listener::{DeliveryOutcome, RequestReplyRouter, ServiceListener};
pub use middleware::build_listener_pipeline;

/// A running listener bound to one destination.
pub struct NlpService {
    engine: AnnotationEngine,
    shutdown: Arc<ShutdownController>,
    subscription: Subscription,
}

impl std::fmt::Debug for NlpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NlpService")
            .field("listen_on", self.listen_on())
            .field("engine", &self.engine)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

impl NlpService {
    /// Builds the engine, subscribes the listener pipeline to
    /// `config.listen_on` and marks the service ready.
    ///
    /// An engine that fails to build does not fail startup: the service
    /// keeps replying (with empty bodies) and reports itself not ready.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the listener cannot be subscribed.
    pub async fn start(
        config: &ServiceConfig,
        broker: &InMemoryBroker,
        factory: Arc<dyn PipelineFactory>,
    ) -> Result<Self, ChannelError> {
        let shutdown = Arc::new(ShutdownController::new());
        let engine = AnnotationEngine::launch(factory, config.engine.clone()).await;
        if let Some(err) = engine.init_error() {
            warn!(error = %err, "annotation engine unavailable, replies will be empty");
        }

        let router = RequestReplyRouter::new(
            engine.clone(),
            Arc::new(broker.session()),
            config.output_format,
        )
        .with_reply_timeout(config.reply_timeout);
        let pipeline = build_listener_pipeline(router, Arc::clone(&shutdown));
        let subscription =
            broker.subscribe(&config.listen_on, Arc::new(ServiceListener::new(pipeline)))?;

        shutdown.set_ready();
        info!(
            destination = %config.listen_on,
            engine = engine.state().as_str(),
            format = config.output_format.as_str(),
            "annotation service listening"
        );

        Ok(Self {
            engine,
            shutdown,
            subscription,
        })
    }

    #[must_use]
    pub fn engine(&self) -> &AnnotationEngine {
        &self.engine
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub fn listen_on(&self) -> &Destination {
        self.subscription.destination()
    }

    /// Stops taking new deliveries and waits up to `drain_timeout` for the
    /// outstanding ones. Returns `true` when everything drained.
    pub async fn shutdown(self, drain_timeout: Duration) -> bool {
        self.shutdown.trigger_shutdown();
        self.subscription.cancel();

        let in_flight = self.shutdown.in_flight_count();
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight deliveries");
        }
        let drained = self.shutdown.wait_for_drain(drain_timeout).await;
        if drained {
            info!("annotation service stopped");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired with deliveries outstanding"
            );
        }
        drained
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use paeon_core::{ClinicalPipelineFactory, CorrelationId, Message};

    use super::*;
    use crate::channel::{ChannelSession, QueueConsumer};
    use crate::engine::tests::{FailingFactory, OnceFactory, ProbeEngine};
    use crate::engine::EngineState;
    use crate::network::HealthState;

    fn replies() -> Destination {
        Destination::new("ctakes.replies")
    }

    async fn request(broker: &InMemoryBroker, config: &ServiceConfig, text: &str, cid: &str) {
        let msg = Message::text(text)
            .with_correlation_id(Some(CorrelationId::new(cid)))
            .with_reply_to(Some(replies()));
        broker.session().send(&config.listen_on, msg).await.unwrap();
    }

    async fn next_reply(consumer: &mut QueueConsumer) -> Message {
        consumer
            .recv_timeout(Duration::from_secs(10))
            .await
            .expect("reply should arrive")
    }

    #[tokio::test]
    async fn end_to_end_single_request() {
        let config = ServiceConfig::default();
        let broker = InMemoryBroker::default();
        let mut consumer = broker.consumer(&replies()).unwrap();
        let service = NlpService::start(
            &config,
            &broker,
            Arc::new(ClinicalPipelineFactory::default()),
        )
        .await
        .unwrap();
        assert_eq!(service.engine().state(), EngineState::Ready);
        assert_eq!(service.listen_on(), &Destination::new("paeon.nlp.ctakes"));

        let input = "Patient takes aspirin daily.";
        request(&broker, &config, input, "CID-1").await;

        let reply = next_reply(&mut consumer).await;
        assert_eq!(reply.correlation_id, Some(CorrelationId::new("CID-1")));
        let body = reply.as_text().unwrap();
        assert!(!body.is_empty());
        assert_ne!(body, input);
        assert!(body.contains("aspirin"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(consumer.try_recv().is_none(), "exactly one reply expected");
        assert!(service.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn concurrent_requests_get_their_own_replies() {
        let config = ServiceConfig::default();
        let broker = InMemoryBroker::default();
        let mut consumer = broker.consumer(&replies()).unwrap();
        let _service = NlpService::start(
            &config,
            &broker,
            Arc::new(ClinicalPipelineFactory::default()),
        )
        .await
        .unwrap();

        let mut sends = Vec::new();
        for i in 0..100 {
            let broker = broker.clone();
            let config = config.clone();
            sends.push(tokio::spawn(async move {
                let text = format!("Note {i} reports chest pain.");
                request(&broker, &config, &text, &format!("CID-{i}")).await;
            }));
        }
        for send in sends {
            send.await.unwrap();
        }

        let mut seen = HashSet::new();
        for _ in 0..100 {
            let reply = next_reply(&mut consumer).await;
            let cid = reply.correlation_id.clone().unwrap();
            let n = cid.as_str().trim_start_matches("CID-");
            // The body must describe the document that carried this id.
            assert!(reply.as_text().unwrap().contains(&format!("Note {n} reports")));
            assert!(seen.insert(cid), "duplicate reply");
        }
        assert_eq!(seen.len(), 100);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(consumer.try_recv().is_none());
    }

    #[tokio::test]
    async fn failed_engine_keeps_replying_with_empty_bodies() {
        let config = ServiceConfig::default();
        let broker = InMemoryBroker::default();
        let mut consumer = broker.consumer(&replies()).unwrap();
        let factory = Arc::new(FailingFactory::new());
        let builds = Arc::clone(&factory.builds);
        let service = NlpService::start(&config, &broker, factory).await.unwrap();
        assert_eq!(service.engine().state(), EngineState::Failed);

        for cid in ["CID-a", "CID-b"] {
            request(&broker, &config, "some note", cid).await;
            let reply = next_reply(&mut consumer).await;
            assert_eq!(reply.correlation_id, Some(CorrelationId::new(cid)));
            assert_eq!(reply.as_text(), Some(""));
        }
        assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lazy_engine_builds_on_first_request() {
        let mut config = ServiceConfig::default();
        config.engine.lazy = true;
        let broker = InMemoryBroker::default();
        let mut consumer = broker.consumer(&replies()).unwrap();
        let factory = Arc::new(OnceFactory::new(ProbeEngine::new(Duration::ZERO)));
        let builds = Arc::clone(&factory.builds);
        let service = NlpService::start(&config, &broker, factory).await.unwrap();
        assert_eq!(service.engine().state(), EngineState::Uninitialized);
        assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 0);

        request(&broker, &config, "note", "CID-1").await;
        next_reply(&mut consumer).await;
        assert_eq!(builds.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(service.engine().state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_delivery() {
        let config = ServiceConfig::default();
        let broker = InMemoryBroker::default();
        let mut consumer = broker.consumer(&replies()).unwrap();
        let factory = Arc::new(OnceFactory::new(ProbeEngine::new(Duration::from_millis(150))));
        let service = NlpService::start(&config, &broker, factory).await.unwrap();
        let controller = service.shutdown_controller();
        assert_eq!(controller.health_state(), HealthState::Ready);

        request(&broker, &config, "slow note", "CID-slow").await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while controller.in_flight_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(service.shutdown(Duration::from_secs(5)).await);
        assert_eq!(controller.health_state(), HealthState::Stopped);
        // The delivery finished and replied before drain completed.
        let reply = consumer.try_recv().expect("reply sent before stop");
        assert_eq!(reply.correlation_id, Some(CorrelationId::new("CID-slow")));
    }

    #[tokio::test]
    async fn stuck_reply_does_not_pin_drain() {
        let mut config = ServiceConfig::default();
        config.reply_timeout = Duration::from_millis(100);
        let broker = InMemoryBroker::new(1);
        // Fill the unconsumed reply queue so the next send cannot complete.
        broker
            .session()
            .send(&replies(), Message::text("backlog"))
            .await
            .unwrap();

        let factory = Arc::new(OnceFactory::new(ProbeEngine::new(Duration::ZERO)));
        let service = NlpService::start(&config, &broker, factory).await.unwrap();
        let controller = service.shutdown_controller();

        request(&broker, &config, "note", "CID-stuck").await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while controller.in_flight_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(service.shutdown(Duration::from_secs(5)).await);
        assert_eq!(controller.in_flight_count(), 0);
        assert_eq!(broker.depth(&replies()), 1);
    }

    #[tokio::test]
    async fn listen_destination_is_exclusive() {
        let config = ServiceConfig::default();
        let broker = InMemoryBroker::default();
        let _first = NlpService::start(
            &config,
            &broker,
            Arc::new(OnceFactory::new(ProbeEngine::new(Duration::ZERO))),
        )
        .await
        .unwrap();
        let second = NlpService::start(
            &config,
            &broker,
            Arc::new(OnceFactory::new(ProbeEngine::new(Duration::ZERO))),
        )
        .await;
        assert_eq!(
            second.err(),
            Some(ChannelError::ConsumerExists(config.listen_on.clone()))
        );
    }

    #[tokio::test]
    async fn requests_after_shutdown_stay_queued() {
        let config = ServiceConfig::default();
        let broker = InMemoryBroker::default();
        let service = NlpService::start(
            &config,
            &broker,
            Arc::new(OnceFactory::new(ProbeEngine::new(Duration::ZERO))),
        )
        .await
        .unwrap();
        assert!(service.shutdown(Duration::from_secs(1)).await);

        // Give the dispatcher a moment to hand the queue back.
        tokio::time::sleep(Duration::from_millis(50)).await;
        request(&broker, &config, "late", "CID-late").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(broker.depth(&config.listen_on), 1);
    }
}
