//! File based logging
//!
//! Besides console output, every event goes to the root `registrar.log`, and
//! events are additionally routed by target into one file per component:
//!
//! | Log File          | Component                      | Target Prefixes           |
//! |-------------------|--------------------------------|---------------------------|
//! | registrar.log     | Root logger (all components)   | (all)                     |
//! | registry.log      | Lease store, eviction, guard   | registrar_naming          |
//! | replication.log   | Peer gossip and node lifecycle | registrar_core            |
//! | http.log          | Client and peer HTTP routes    | registrar_server::api     |
//!
//! Files rotate daily by default and live in `~/registrar/logs` unless
//! `logging.dir` says otherwise.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

struct ComponentLog {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLog] = &[
    ComponentLog {
        file_name: "registry.log",
        targets: &["registrar_naming"],
    },
    ComponentLog {
        file_name: "replication.log",
        targets: &["registrar_core"],
    },
    ComponentLog {
        file_name: "http.log",
        targets: &["registrar_server::api", "actix_web::middleware::logger"],
    },
];

const ROOT_LOG: &str = "registrar.log";

#[derive(Debug, Clone, Copy)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub file_logging: bool,
    /// Default level; `RUST_LOG` takes precedence when set
    pub level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            log_dir: PathBuf::from(home).join("registrar").join("logs"),
            console_output: true,
            file_logging: true,
            level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

/// Keeps the non-blocking writers alive; dropping it flushes buffered output
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

fn component_filter(component: &ComponentLog) -> Targets {
    component
        .targets
        .iter()
        .fold(Targets::new(), |targets, target| {
            targets.with_target(*target, LevelFilter::TRACE)
        })
}

/// Install the global subscriber
///
/// Filtering is per layer: console and root file follow `RUST_LOG` (or the
/// configured level), component files take everything from their targets.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(env_filter(config.level));
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let appender = RollingFileAppender::new(config.rotation.into(), &config.log_dir, ROOT_LOG);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        let root_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(env_filter(config.level));
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(
                config.rotation.into(),
                &config.log_dir,
                component.file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .with_filter(component_filter(component));
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            "File logging initialized: {} (root) + {} component files",
            ROOT_LOG,
            COMPONENT_LOGS.len()
        );
    }

    Ok(LoggingGuard {
        _file_guards: guards,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(config.console_output);
        assert!(config.file_logging);
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_dir.ends_with("registrar/logs"));
    }

    #[test]
    fn test_log_rotation_conversion() {
        assert!(matches!(Rotation::from(LogRotation::Daily), Rotation::DAILY));
        assert!(matches!(Rotation::from(LogRotation::Hourly), Rotation::HOURLY));
        assert!(matches!(Rotation::from(LogRotation::Never), Rotation::NEVER));
    }

    #[test]
    fn test_component_targets_cover_workspace_crates() {
        let targets: Vec<&str> = COMPONENT_LOGS
            .iter()
            .flat_map(|c| c.targets.iter().copied())
            .collect();
        assert!(targets.contains(&"registrar_naming"));
        assert!(targets.contains(&"registrar_core"));
        assert!(targets.contains(&"registrar_server::api"));
        assert!(COMPONENT_LOGS.iter().all(|c| c.file_name.ends_with(".log")));
    }

    #[test]
    fn test_component_filter_routes_by_prefix() {
        let registry = &COMPONENT_LOGS[0];
        let filter = component_filter(registry);
        assert!(filter.would_enable("registrar_naming::store", &Level::DEBUG));
        assert!(!filter.would_enable("registrar_core::replication", &Level::ERROR));
    }
}
