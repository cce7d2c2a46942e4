//! Configuration management for the Registrar server
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults
//! 2. the YAML file given by `--config` (default `conf/application.yml`, optional)
//! 3. environment variables `REGISTRAR_<SECTION>__<KEY>`, e.g.
//!    `REGISTRAR_EVICTION__GRACE_FACTOR=3.0`
//! 4. command-line flags

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::de::DeserializeOwned;

use registrar_common::{DEFAULT_SERVER_PORT, RegistrarError, RegistrarResult, default_node_id};
use registrar_core::{BackoffConfig, CircuitBreakerConfig, NodeConfig, ReplicationConfig};
use registrar_naming::{EvictionConfig, ProtectionConfig, QueryConfig, StoreConfig};

use crate::startup::{LogRotation, LoggingConfig};

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";

const PEERS_KEY: &str = "node.peers";

/// Command line arguments for the server
#[derive(Debug, Default, Parser)]
#[command(name = "registrar-server", version, about = "Replicated service registry")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: String,
    /// HTTP port
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
    /// Node id, should match the address peers use to reach this node
    #[arg(long = "node-id", env = "REGISTRAR_NODE_ID")]
    pub node_id: Option<String>,
    /// Comma separated peer addresses
    #[arg(long = "peers", value_delimiter = ',')]
    pub peers: Vec<String>,
}

/// Layered application configuration
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load from the process arguments and environment
    pub fn new() -> RegistrarResult<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> RegistrarResult<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name(&cli.config).required(false))
            .add_source(
                Environment::with_prefix("REGISTRAR")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key(PEERS_KEY)
                    .try_parsing(true),
            );

        if let Some(port) = cli.port {
            builder = builder
                .set_override("server.port", port as i64)
                .map_err(config_error)?;
        }
        if let Some(node_id) = cli.node_id {
            builder = builder
                .set_override("node.id", node_id)
                .map_err(config_error)?;
        }
        if !cli.peers.is_empty() {
            builder = builder
                .set_override(PEERS_KEY, cli.peers)
                .map_err(config_error)?;
        }

        let config = builder.build().map_err(config_error)?;
        Ok(Configuration { config })
    }

    /// Missing keys take `default`; present but malformed ones are errors
    fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> RegistrarResult<T> {
        match self.config.get::<T>(key) {
            Ok(value) => Ok(value),
            Err(ConfigError::NotFound(_)) => Ok(default),
            Err(e) => Err(RegistrarError::Config(format!(
                "invalid value for '{}': {}",
                key, e
            ))),
        }
    }

    fn secs(&self, key: &str, default: u64) -> RegistrarResult<Duration> {
        self.get_or(key, default).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: u64) -> RegistrarResult<Duration> {
        self.get_or(key, default).map(Duration::from_millis)
    }

    // ========================================================================
    // Server
    // ========================================================================

    pub fn server_address(&self) -> RegistrarResult<String> {
        self.get_or("server.address", "0.0.0.0".to_string())
    }

    pub fn server_port(&self) -> RegistrarResult<u16> {
        self.get_or("server.port", DEFAULT_SERVER_PORT)
    }

    /// Seconds the HTTP server waits for in-flight requests on stop
    pub fn server_shutdown_timeout(&self) -> RegistrarResult<Duration> {
        self.secs("server.shutdown_timeout_secs", 10)
    }

    // ========================================================================
    // Node
    // ========================================================================

    pub fn node_id(&self) -> RegistrarResult<String> {
        match self.config.get_string("node.id") {
            Ok(id) if !id.trim().is_empty() => Ok(id),
            Ok(_) | Err(ConfigError::NotFound(_)) => Ok(default_node_id(self.server_port()?)),
            Err(e) => Err(config_error(e)),
        }
    }

    pub fn peers(&self) -> RegistrarResult<Vec<String>> {
        let peers: Vec<String> = self.get_or(PEERS_KEY, Vec::new())?;
        Ok(peers
            .into_iter()
            .map(|peer| peer.trim().to_string())
            .filter(|peer| !peer.is_empty())
            .collect())
    }

    // ========================================================================
    // Registry components
    // ========================================================================

    pub fn store_config(&self) -> RegistrarResult<StoreConfig> {
        let defaults = StoreConfig::default();
        Ok(StoreConfig {
            default_lease_duration_secs: self.get_or(
                "lease.default_duration_secs",
                defaults.default_lease_duration_secs,
            )?,
            tombstone_retention: self.secs(
                "lease.tombstone_retention_secs",
                defaults.tombstone_retention.as_secs(),
            )?,
        })
    }

    pub fn eviction_config(&self) -> RegistrarResult<EvictionConfig> {
        let defaults = EvictionConfig::default();
        Ok(EvictionConfig {
            interval: self.secs("eviction.interval_secs", defaults.interval.as_secs())?,
            grace_factor: self.get_or("eviction.grace_factor", defaults.grace_factor)?,
        })
    }

    pub fn protection_config(&self) -> RegistrarResult<ProtectionConfig> {
        let defaults = ProtectionConfig::default();
        Ok(ProtectionConfig {
            enabled: self.get_or("protection.enabled", defaults.enabled)?,
            renewal_threshold: self
                .get_or("protection.renewal_threshold", defaults.renewal_threshold)?,
            expected_renewal_interval: self.secs(
                "protection.expected_renewal_interval_secs",
                defaults.expected_renewal_interval.as_secs(),
            )?,
            window: self.secs("protection.window_secs", defaults.window.as_secs())?,
            recovery_windows: self
                .get_or("protection.recovery_windows", defaults.recovery_windows)?,
        })
    }

    pub fn query_config(&self) -> RegistrarResult<QueryConfig> {
        let defaults = QueryConfig::default();
        Ok(QueryConfig {
            cache_ttl: self.secs("query.cache_ttl_secs", defaults.cache_ttl.as_secs())?,
            cache_capacity: self.get_or("query.cache_capacity", defaults.cache_capacity)?,
        })
    }

    pub fn replication_config(&self) -> RegistrarResult<ReplicationConfig> {
        let defaults = ReplicationConfig::default();
        let backoff = BackoffConfig::default();
        let breaker = CircuitBreakerConfig::default();
        Ok(ReplicationConfig {
            batch_size: self.get_or("replication.batch_size", defaults.batch_size)?,
            batch_delay: self.millis(
                "replication.batch_delay_ms",
                defaults.batch_delay.as_millis() as u64,
            )?,
            retry_interval: self.millis(
                "replication.retry_interval_ms",
                defaults.retry_interval.as_millis() as u64,
            )?,
            push_timeout: self.millis(
                "replication.push_timeout_ms",
                defaults.push_timeout.as_millis() as u64,
            )?,
            pull_timeout: self.millis(
                "replication.pull_timeout_ms",
                defaults.pull_timeout.as_millis() as u64,
            )?,
            anti_entropy_interval: self.secs(
                "replication.anti_entropy_interval_secs",
                defaults.anti_entropy_interval.as_secs(),
            )?,
            backoff: BackoffConfig {
                initial_delay: self.millis(
                    "replication.backoff.initial_delay_ms",
                    backoff.initial_delay.as_millis() as u64,
                )?,
                max_delay: self.millis(
                    "replication.backoff.max_delay_ms",
                    backoff.max_delay.as_millis() as u64,
                )?,
                multiplier: self.get_or("replication.backoff.multiplier", backoff.multiplier)?,
                max_attempts: self
                    .get_or("replication.backoff.max_attempts", backoff.max_attempts)?,
                jitter_factor: self
                    .get_or("replication.backoff.jitter_factor", backoff.jitter_factor)?,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: self.get_or(
                    "replication.breaker.failure_threshold",
                    breaker.failure_threshold,
                )?,
                reset_timeout: self.secs(
                    "replication.breaker.reset_timeout_secs",
                    breaker.reset_timeout.as_secs(),
                )?,
                success_threshold: self.get_or(
                    "replication.breaker.success_threshold",
                    breaker.success_threshold,
                )?,
                failure_window: self.secs(
                    "replication.breaker.failure_window_secs",
                    breaker.failure_window.as_secs(),
                )?,
            },
        })
    }

    /// Connect timeout of the peer HTTP client
    pub fn peer_connect_timeout(&self) -> RegistrarResult<Duration> {
        self.millis("replication.connect_timeout_ms", 1000)
    }

    /// Complete node configuration, validated
    pub fn node_config(&self) -> RegistrarResult<NodeConfig> {
        let mut node = NodeConfig::new(self.node_id()?, self.peers()?);
        node.store = self.store_config()?;
        node.eviction = self.eviction_config()?;
        node.protection = self.protection_config()?;
        node.query = self.query_config()?;
        node.replication = self.replication_config()?;
        node.warmup_timeout = self.secs("warmup.timeout_secs", node.warmup_timeout.as_secs())?;
        node.warmup_retry_interval = self.millis(
            "warmup.retry_interval_ms",
            node.warmup_retry_interval.as_millis() as u64,
        )?;
        node.drain_timeout = self.secs("node.drain_timeout_secs", node.drain_timeout.as_secs())?;
        node.validate()?;
        Ok(node)
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn logging_config(&self) -> RegistrarResult<LoggingConfig> {
        let defaults = LoggingConfig::default();
        let rotation = match self.get_or("logging.rotation", "daily".to_string())?.as_str() {
            "daily" => LogRotation::Daily,
            "hourly" => LogRotation::Hourly,
            "never" => LogRotation::Never,
            other => {
                return Err(RegistrarError::Config(format!(
                    "unknown log rotation '{}'",
                    other
                )));
            }
        };
        let level = self.get_or("logging.level", "info".to_string())?;
        let level = level
            .parse()
            .map_err(|_| RegistrarError::Config(format!("unknown log level '{}'", level)))?;
        Ok(LoggingConfig {
            log_dir: self
                .get_or::<Option<String>>("logging.dir", None)?
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            console_output: self.get_or("logging.console", defaults.console_output)?,
            file_logging: self.get_or("logging.file", defaults.file_logging)?,
            level,
            rotation,
        })
    }
}

fn config_error(e: ConfigError) -> RegistrarError {
    RegistrarError::Config(e.to_string())
}
