//! Configuration resolution.
//!
//! Paeon reads a single flat property file named `paeon-nlp.cfg`. Which file
//! governs a process is decided by a fixed precedence chain:
//!
//! 1. the path in the `PAEON_CONFIG` environment variable
//! 2. `$HOME/.paeon/paeon-nlp.cfg`
//! 3. `/etc/paeon/paeon-nlp.cfg`
//!
//! The first candidate that exists and is a regular file wins. Deployments
//! depend on this order; it must not change.
//!
//! Services cannot assume an admin-provided file is present, so every lookup
//! has a defaulting form and a missing or unreadable file yields an empty
//! [`Configuration`] instead of an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::error::ConfigLoadError;
use crate::properties;

/// File name shared by all candidate locations.
pub const DEFAULT_CONFIG_FILE: &str = "paeon-nlp.cfg";
/// System-wide configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/paeon";
/// Per-user configuration directory, relative to the home directory.
pub const USER_CONFIG_DIR: &str = ".paeon";
/// Environment variable holding an explicit configuration file path.
pub const CONFIG_ENV: &str = "PAEON_CONFIG";

/// Well-known property keys.
pub mod keys {
    pub const BROKER: &str = "paeon.broker";
    pub const USER: &str = "paeon.user";
    pub const PASSWORD: &str = "paeon.password";
    pub const LISTEN_ON: &str = "paeon.listenon";

    pub const OUTPUT_FORMAT: &str = "paeon.output.format";
    pub const ENGINE_LAZY: &str = "paeon.engine.lazy";
    pub const ENGINE_MAX_QUEUE_WAIT_MS: &str = "paeon.engine.max_queue_wait_ms";
    pub const REPLY_TIMEOUT_MS: &str = "paeon.reply.timeout_ms";
    pub const DICTIONARY: &str = "paeon.dictionary";
    pub const CHANNEL_CAPACITY: &str = "paeon.channel.capacity";
    pub const HEALTH_PORT: &str = "paeon.health.port";
    pub const METRICS_PORT: &str = "paeon.metrics.port";
    pub const LOG_FORMAT: &str = "paeon.log.format";
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Immutable key-value settings loaded from at most one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    path: Option<PathBuf>,
    entries: BTreeMap<String, String>,
}

impl Configuration {
    /// An empty configuration not backed by any file.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a configuration from in-memory entries (tests, embedding).
    #[must_use]
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: None,
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Loads and parses a property file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigLoadError::Io`] if the file cannot be read and
    /// [`ConfigLoadError::Malformed`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let entries = properties::parse(&text).map_err(|issue| ConfigLoadError::Malformed {
            path: path.to_path_buf(),
            line: issue.line,
            reason: issue.reason,
        })?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    /// The file this configuration was selected from, if any.
    ///
    /// Set even when loading the file failed, so operators can see which file
    /// was chosen.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the value for `key`, or `None` if absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, or `default` if absent.
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parses the value for `key`, falling back to `default` when the key is
    /// absent or its value does not parse. Unparseable values are logged.
    #[must_use]
    pub fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(key, value = raw, "ignoring unparseable configuration value");
                default
            }),
        }
    }

    /// Parses the value for `key` if present and well-formed.
    #[must_use]
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = raw, "ignoring unparseable configuration value");
                None
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates all entries, including keys the service does not recognize.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// ConfigSource
// ---------------------------------------------------------------------------

/// The ordered candidate locations searched by [`ConfigResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    /// Path named by `PAEON_CONFIG`, if set.
    pub env_override: Option<PathBuf>,
    /// The invoking user's home directory, if known.
    pub home_dir: Option<PathBuf>,
    /// System-wide configuration file.
    pub system_path: PathBuf,
}

impl ConfigSource {
    /// Builds the candidate chain from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            env_override: std::env::var_os(CONFIG_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            home_dir: dirs::home_dir(),
            system_path: Path::new(DEFAULT_CONFIG_DIR).join(DEFAULT_CONFIG_FILE),
        }
    }

    /// The user-home candidate, `$HOME/.paeon/paeon-nlp.cfg`.
    #[must_use]
    pub fn user_path(&self) -> Option<PathBuf> {
        self.home_dir
            .as_ref()
            .map(|home| home.join(USER_CONFIG_DIR).join(DEFAULT_CONFIG_FILE))
    }

    /// All candidates in precedence order. Unknown locations are skipped.
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(3);
        out.extend(self.env_override.clone());
        out.extend(self.user_path());
        out.push(self.system_path.clone());
        out
    }

    /// Returns the first candidate that exists and is a regular file.
    #[must_use]
    pub fn first_valid(&self) -> Option<PathBuf> {
        self.candidates().into_iter().find(|p| is_regular_file(p))
    }
}

/// True for existing regular files; follows symlinks, so a dangling link is rejected.
fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file())
}

// ---------------------------------------------------------------------------
// ConfigResolver
// ---------------------------------------------------------------------------

/// Resolves and holds the configuration governing this process.
///
/// The active [`Configuration`] is held behind an `ArcSwap`, so readers never
/// block and an explicit re-resolution replaces it atomically.
#[derive(Debug)]
pub struct ConfigResolver {
    source: ConfigSource,
    current: ArcSwap<Configuration>,
}

impl ConfigResolver {
    /// Creates a resolver over `source` and performs the initial resolution.
    #[must_use]
    pub fn new(source: ConfigSource) -> Self {
        let resolver = Self {
            source,
            current: ArcSwap::from_pointee(Configuration::empty()),
        };
        resolver.resolve();
        resolver
    }

    /// Creates a resolver over the process environment (see [`ConfigSource::from_env`]).
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(ConfigSource::from_env())
    }

    #[must_use]
    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Walks the candidate chain and loads the first regular file found.
    pub fn resolve(&self) -> Arc<Configuration> {
        let config = match self.source.first_valid() {
            Some(path) => load_or_empty(&path),
            None => {
                warn!("Paeon configuration not found on this host");
                Configuration::empty()
            }
        };
        self.install(config)
    }

    /// Loads configuration from `path`, bypassing the candidate chain.
    ///
    /// A path that is not a regular file yields an empty configuration.
    pub fn resolve_from(&self, path: impl AsRef<Path>) -> Arc<Configuration> {
        let path = path.as_ref();
        let config = if is_regular_file(path) {
            load_or_empty(path)
        } else {
            warn!(path = %path.display(), "explicit configuration path is not a regular file");
            Configuration::empty()
        };
        self.install(config)
    }

    /// The active configuration.
    #[must_use]
    pub fn current(&self) -> Arc<Configuration> {
        self.current.load_full()
    }

    fn install(&self, config: Configuration) -> Arc<Configuration> {
        let config = Arc::new(config);
        self.current.store(Arc::clone(&config));
        config
    }
}

fn load_or_empty(path: &Path) -> Configuration {
    info!(path = %path.display(), "Loading Paeon configuration");
    match Configuration::load(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load Paeon configuration, continuing with defaults");
            Configuration {
                path: Some(path.to_path_buf()),
                entries: BTreeMap::new(),
            }
        }
    }
}
