//! Paeon NLP service: clinical text annotation over a request/reply message channel.

pub mod channel;
pub mod engine;
pub mod logging;
pub mod network;
pub mod service;

pub use channel::{ChannelError, ChannelSession, InMemoryBroker, MessageListener};
pub use engine::{AnalyzeError, AnnotationEngine, EngineConfig, EngineState};
pub use logging::{init_tracing, LogFormat};
pub use network::{NetworkModule, ShutdownController};
pub use service::{NlpService, RequestReplyRouter, ServiceConfig};
