//! Typed service settings read from the resolved [`Configuration`].

use std::path::PathBuf;
use std::time::Duration;

use paeon_core::config::keys;
use paeon_core::{Configuration, Destination, DictionarySource, OutputFormat, PipelineSettings};
use tracing::warn;

use crate::channel::memory::DEFAULT_QUEUE_CAPACITY;
use crate::engine::EngineConfig;
use crate::logging::LogFormat;
use crate::service::listener::DEFAULT_REPLY_TIMEOUT;

pub const DEFAULT_BROKER: &str = "nio://localhost:60616";
pub const DEFAULT_USER: &str = "apollo";
pub const DEFAULT_PASSWORD: &str = "password";
pub const DEFAULT_LISTEN_ON: &str = "paeon.nlp.ctakes";
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Settings for one service process.
///
/// Every field has a default, so an empty configuration yields a usable
/// service bound to [`DEFAULT_LISTEN_ON`].
#[derive(Clone)]
pub struct ServiceConfig {
    pub broker: String,
    pub user: String,
    pub password: String,
    pub listen_on: Destination,
    pub output_format: OutputFormat,
    pub engine: EngineConfig,
    /// Upper bound on one reply send.
    pub reply_timeout: Duration,
    pub pipeline: PipelineSettings,
    /// Per-destination queue capacity of the in-process broker.
    pub channel_capacity: usize,
    pub health_port: u16,
    /// Prometheus listener port; no exporter when `None`.
    pub metrics_port: Option<u16>,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("broker", &self.broker)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("listen_on", &self.listen_on)
            .field("output_format", &self.output_format)
            .field("engine", &self.engine)
            .field("reply_timeout", &self.reply_timeout)
            .field("pipeline", &self.pipeline)
            .field("channel_capacity", &self.channel_capacity)
            .field("health_port", &self.health_port)
            .field("metrics_port", &self.metrics_port)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_configuration(&Configuration::empty())
    }
}

impl ServiceConfig {
    /// Reads every recognized key, substituting defaults for missing or
    /// malformed values.
    #[must_use]
    pub fn from_configuration(config: &Configuration) -> Self {
        let listen_on = match config.get(keys::LISTEN_ON).map(str::trim) {
            Some(name) if !name.is_empty() => Destination::new(name),
            Some(_) => {
                warn!(key = keys::LISTEN_ON, "blank destination, using default");
                Destination::new(DEFAULT_LISTEN_ON)
            }
            None => Destination::new(DEFAULT_LISTEN_ON),
        };

        let max_queue_wait = config
            .get_parsed::<u64>(keys::ENGINE_MAX_QUEUE_WAIT_MS)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let reply_timeout = config
            .get_parsed::<u64>(keys::REPLY_TIMEOUT_MS)
            .filter(|ms| *ms > 0)
            .map_or(DEFAULT_REPLY_TIMEOUT, Duration::from_millis);

        let dictionary = config
            .get(keys::DICTIONARY)
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map_or(DictionarySource::BuiltIn, |path| {
                DictionarySource::File(PathBuf::from(path))
            });

        Self {
            broker: config.get_or(keys::BROKER, DEFAULT_BROKER).to_string(),
            user: config.get_or(keys::USER, DEFAULT_USER).to_string(),
            password: config.get_or(keys::PASSWORD, DEFAULT_PASSWORD).to_string(),
            listen_on,
            output_format: config.get_parsed_or(keys::OUTPUT_FORMAT, OutputFormat::Structured),
            engine: EngineConfig {
                lazy: config.get_parsed_or(keys::ENGINE_LAZY, false),
                max_queue_wait,
            },
            reply_timeout,
            pipeline: PipelineSettings {
                dictionary,
                ..PipelineSettings::default()
            },
            channel_capacity: config
                .get_parsed_or(keys::CHANNEL_CAPACITY, DEFAULT_QUEUE_CAPACITY)
                .max(1),
            health_port: config.get_parsed_or(keys::HEALTH_PORT, DEFAULT_HEALTH_PORT),
            metrics_port: config.get_parsed(keys::METRICS_PORT),
            log_format: config.get_parsed_or(keys::LOG_FORMAT, LogFormat::Text),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_configuration_yields_defaults() {
        let config = ServiceConfig::from_configuration(&Configuration::empty());
        assert_eq!(config.broker, DEFAULT_BROKER);
        assert_eq!(config.user, DEFAULT_USER);
        assert_eq!(config.listen_on, Destination::new("paeon.nlp.ctakes"));
        assert_eq!(config.output_format, OutputFormat::Structured);
        assert!(!config.engine.lazy);
        assert!(config.engine.max_queue_wait.is_none());
        assert_eq!(config.reply_timeout, DEFAULT_REPLY_TIMEOUT);
        assert_eq!(config.pipeline.dictionary, DictionarySource::BuiltIn);
        assert_eq!(config.channel_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.health_port, DEFAULT_HEALTH_PORT);
        assert!(config.metrics_port.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn recognized_keys_override_defaults() {
        let config = ServiceConfig::from_configuration(&Configuration::from_entries([
            (keys::BROKER, "tcp://mq:61616"),
            (keys::LISTEN_ON, "notes.in"),
            (keys::OUTPUT_FORMAT, "text"),
            (keys::ENGINE_LAZY, "true"),
            (keys::ENGINE_MAX_QUEUE_WAIT_MS, "250"),
            (keys::REPLY_TIMEOUT_MS, "1500"),
            (keys::DICTIONARY, "/opt/paeon/terms.dict"),
            (keys::CHANNEL_CAPACITY, "16"),
            (keys::HEALTH_PORT, "9000"),
            (keys::METRICS_PORT, "9100"),
            (keys::LOG_FORMAT, "json"),
        ]));
        assert_eq!(config.broker, "tcp://mq:61616");
        assert_eq!(config.listen_on, Destination::new("notes.in"));
        assert_eq!(config.output_format, OutputFormat::FlattenedText);
        assert!(config.engine.lazy);
        assert_eq!(config.engine.max_queue_wait, Some(Duration::from_millis(250)));
        assert_eq!(config.reply_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.pipeline.dictionary,
            DictionarySource::File(PathBuf::from("/opt/paeon/terms.dict"))
        );
        assert_eq!(config.channel_capacity, 16);
        assert_eq!(config.health_port, 9000);
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = ServiceConfig::from_configuration(&Configuration::from_entries([
            (keys::LISTEN_ON, "   "),
            (keys::ENGINE_MAX_QUEUE_WAIT_MS, "0"),
            (keys::REPLY_TIMEOUT_MS, "0"),
            (keys::HEALTH_PORT, "not-a-port"),
            (keys::OUTPUT_FORMAT, "yaml"),
            (keys::CHANNEL_CAPACITY, "0"),
        ]));
        assert_eq!(config.listen_on, Destination::new(DEFAULT_LISTEN_ON));
        assert!(config.engine.max_queue_wait.is_none());
        assert_eq!(config.reply_timeout, DEFAULT_REPLY_TIMEOUT);
        assert_eq!(config.health_port, DEFAULT_HEALTH_PORT);
        assert_eq!(config.output_format, OutputFormat::Structured);
        assert_eq!(config.channel_capacity, 1);
    }

    #[test]
    fn debug_output_hides_password() {
        let config = ServiceConfig::from_configuration(&Configuration::from_entries([(
            keys::PASSWORD,
            "hunter2",
        )]));
        assert_eq!(config.password, "hunter2");
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    proptest! {
        #[test]
        fn any_port_value_is_honoured(port in any::<u16>()) {
            let config = ServiceConfig::from_configuration(&Configuration::from_entries([
                (keys::HEALTH_PORT, port.to_string()),
            ]));
            prop_assert_eq!(config.health_port, port);
        }

        #[test]
        fn listen_destination_is_trimmed(name in "[a-z][a-z.]{0,20}", pad in " {0,3}") {
            let raw = format!("{pad}{name}{pad}");
            let config = ServiceConfig::from_configuration(&Configuration::from_entries([
                (keys::LISTEN_ON, raw),
            ]));
            prop_assert_eq!(config.listen_on, Destination::new(name));
        }
    }
}
