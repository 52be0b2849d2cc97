//! Message channel abstraction.
//!
//! The service only needs two capabilities from a broker: a session that can
//! send a message to a destination, and callback delivery of inbound messages
//! to a registered listener. [`memory::InMemoryBroker`] implements both
//! in-process.

pub mod memory;

use async_trait::async_trait;
use paeon_core::{Destination, Message, MessageId};

pub use memory::{InMemoryBroker, QueueConsumer, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error("invalid destination '{0}'")]
    InvalidDestination(Destination),
    #[error("destination '{0}' already has a consumer")]
    ConsumerExists(Destination),
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// An authenticated connection to the broker, usable from many tasks at once.
#[async_trait]
pub trait ChannelSession: Send + Sync {
    /// Sends `message` to `destination` and returns the id the channel assigned.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the channel is closed or refuses the message.
    async fn send(
        &self,
        destination: &Destination,
        message: Message,
    ) -> Result<MessageId, ChannelError>;
}

/// Receives messages delivered from a subscribed destination.
///
/// Deliveries may overlap: the channel calls `on_message` concurrently.
#[async_trait]
pub trait MessageListener: Send + Sync + 'static {
    async fn on_message(&self, message: Message);
}
