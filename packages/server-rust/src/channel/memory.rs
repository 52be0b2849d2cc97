//! In-process message broker with named, bounded queues.
//!
//! Queues are created on first use. A queue has at most one consumer at a
//! time: either a [`subscribe`](InMemoryBroker::subscribe)d listener, which
//! gets every message delivered on its own task, or a pull-style
//! [`QueueConsumer`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use paeon_core::{Destination, Message, MessageId};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::{ChannelError, ChannelSession, MessageListener};

/// Queue capacity used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct Queue {
    sender: mpsc::Sender<Message>,
    receiver: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

struct BrokerInner {
    queues: DashMap<Destination, Arc<Queue>>,
    capacity: usize,
    closed: AtomicBool,
    close_signal: watch::Sender<bool>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl BrokerInner {
    fn queue(&self, destination: &Destination) -> Result<Arc<Queue>, ChannelError> {
        if destination.as_str().trim().is_empty() {
            return Err(ChannelError::InvalidDestination(destination.clone()));
        }
        let queue = self
            .queues
            .entry(destination.clone())
            .or_insert_with(|| Arc::new(Queue::new(self.capacity)));
        Ok(Arc::clone(queue.value()))
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }

    fn take_receiver(
        &self,
        destination: &Destination,
    ) -> Result<(Arc<Queue>, mpsc::Receiver<Message>), ChannelError> {
        self.ensure_open()?;
        let queue = self.queue(destination)?;
        let receiver = queue
            .receiver
            .lock()
            .take()
            .ok_or_else(|| ChannelError::ConsumerExists(destination.clone()))?;
        Ok((queue, receiver))
    }
}

// ---------------------------------------------------------------------------
// InMemoryBroker
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("queues", &self.inner.queues.len())
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl InMemoryBroker {
    /// Creates a broker whose queues each hold up to `capacity` messages.
    /// Senders wait while a queue is full.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (close_signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(BrokerInner {
                queues: DashMap::new(),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
                close_signal,
                dispatchers: Mutex::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn session(&self) -> BrokerSession {
        BrokerSession {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Registers `listener` as the consumer of `destination`.
    ///
    /// Every message is handed to the listener on a freshly spawned task, so
    /// deliveries overlap and a slow or panicking delivery never blocks the
    /// next one. The returned [`Subscription`] stops dispatch when cancelled;
    /// dropping it leaves the listener registered.
    ///
    /// # Errors
    ///
    /// [`ChannelError::ConsumerExists`] if the destination already has a
    /// consumer, [`ChannelError::Closed`] after [`close`](Self::close).
    pub fn subscribe(
        &self,
        destination: &Destination,
        listener: Arc<dyn MessageListener>,
    ) -> Result<Subscription, ChannelError> {
        let (queue, mut receiver) = self.inner.take_receiver(destination)?;
        let mut close_rx = self.inner.close_signal.subscribe();
        let stop = Arc::new(Notify::new());
        let stop_rx = Arc::clone(&stop);
        let name = destination.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = close_rx.changed() => break,
                    () = stop_rx.notified() => {
                        // Undelivered messages stay queued for the next consumer.
                        *queue.receiver.lock() = Some(receiver);
                        debug!(destination = %name, "subscription cancelled");
                        return;
                    }
                    next = receiver.recv() => {
                        let Some(message) = next else { break };
                        trace!(destination = %name, "dispatching message");
                        let listener = Arc::clone(&listener);
                        tokio::spawn(async move {
                            listener.on_message(message).await;
                        });
                    }
                }
            }
            debug!(destination = %name, "dispatcher stopped");
        });

        self.inner.dispatchers.lock().push(handle);
        info!(destination = %destination, "listener subscribed");
        Ok(Subscription {
            destination: destination.clone(),
            stop,
        })
    }

    /// Attaches a pull-style consumer to `destination`.
    ///
    /// # Errors
    ///
    /// Same as [`subscribe`](Self::subscribe).
    pub fn consumer(&self, destination: &Destination) -> Result<QueueConsumer, ChannelError> {
        let (queue, receiver) = self.inner.take_receiver(destination)?;
        Ok(QueueConsumer {
            destination: destination.clone(),
            queue,
            receiver: Some(receiver),
        })
    }

    /// Number of messages waiting on `destination`.
    #[must_use]
    pub fn depth(&self, destination: &Destination) -> usize {
        self.inner
            .queues
            .get(destination)
            .map_or(0, |q| q.sender.max_capacity() - q.sender.capacity())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stops all dispatchers and refuses further sends. Deliveries already
    /// handed to listeners run to completion.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.close_signal.send_replace(true);
        let handles = std::mem::take(&mut *self.inner.dispatchers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("in-memory broker closed");
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle to a registered listener.
#[derive(Debug)]
pub struct Subscription {
    destination: Destination,
    stop: Arc<Notify>,
}

impl Subscription {
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Stops dispatching new messages to the listener. Deliveries already
    /// started run to completion; queued messages stay on the destination.
    pub fn cancel(self) {
        self.stop.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Sending side of the broker. Cheap to clone.
#[derive(Clone)]
pub struct BrokerSession {
    inner: Arc<BrokerInner>,
}

#[async_trait]
impl ChannelSession for BrokerSession {
    async fn send(
        &self,
        destination: &Destination,
        mut message: Message,
    ) -> Result<MessageId, ChannelError> {
        self.inner.ensure_open()?;
        let queue = self.inner.queue(destination)?;
        let id = MessageId::generate();
        message.id = Some(id);
        queue
            .sender
            .send(message)
            .await
            .map_err(|_| ChannelError::Closed)?;
        trace!(destination = %destination, message_id = %id, "message sent");
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// QueueConsumer
// ---------------------------------------------------------------------------

/// Pull-style consumer. Dropping it frees the destination for another consumer.
pub struct QueueConsumer {
    destination: Destination,
    queue: Arc<Queue>,
    receiver: Option<mpsc::Receiver<Message>>,
}

impl QueueConsumer {
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Waits for the next message.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.as_mut()?.recv().await
    }

    /// Waits up to `timeout` for the next message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Returns a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.receiver.as_mut()?.try_recv().ok()
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            *self.queue.receiver.lock() = Some(receiver);
        }
    }
}
