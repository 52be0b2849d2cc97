//! Message model for the request/reply channel.
//!
//! The correlation identifier and reply destination are opaque pass-through
//! values: nothing in this crate parses, normalizes or synthesizes them.

use std::fmt;

use uuid::Uuid;

/// Name of a queue (or topic) on the message channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination(String);

impl Destination {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token linking a reply to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Channel-assigned identifier of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID:{}", self.0)
    }
}

/// Message payload. Only [`MessageBody::Text`] carries an annotation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Bytes(Vec<u8>),
}

/// A message as seen by listeners and senders on the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Assigned by the channel on send; `None` until then.
    pub id: Option<MessageId>,
    pub body: MessageBody,
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<Destination>,
}

impl Message {
    /// Creates a text message with no correlation id and no reply destination.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            id: None,
            body: MessageBody::Text(body.into()),
            correlation_id: None,
            reply_to: None,
        }
    }

    /// Creates a binary message with no correlation id and no reply destination.
    #[must_use]
    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: None,
            body: MessageBody::Bytes(body.into()),
            correlation_id: None,
            reply_to: None,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Option<CorrelationId>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, reply_to: Option<Destination>) -> Self {
        self.reply_to = reply_to;
        self
    }

    /// Returns the text payload, or `None` for binary messages.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            MessageBody::Bytes(_) => None,
        }
    }
}

/// One annotation request extracted from a textual message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationRequest {
    pub text: String,
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<Destination>,
}

impl AnnotationRequest {
    /// Extracts a request from a message, or returns `None` for non-textual payloads.
    #[must_use]
    pub fn from_message(message: Message) -> Option<Self> {
        match message.body {
            MessageBody::Text(text) => Some(Self {
                text,
                correlation_id: message.correlation_id,
                reply_to: message.reply_to,
            }),
            MessageBody::Bytes(_) => None,
        }
    }

    /// Builds the reply for this request: `body` plus the request's correlation
    /// id, copied as-is (an absent id stays absent).
    #[must_use]
    pub fn reply(&self, body: impl Into<String>) -> Message {
        Message::text(body).with_correlation_id(self.correlation_id.clone())
    }
}
