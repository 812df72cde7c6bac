//! Demo configuration
//!
//! Sources, lowest precedence first: built-in defaults, `conf/keeper-demo.yml`
//! (optional), the file given with `--config`, `KEEPER_*` environment
//! variables, then command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, ensure};
use clap::Parser;
use config::{Config, Environment, File};
use keeper_lock::LockConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "conf/keeper-demo.yml";
pub const ENV_PREFIX: &str = "KEEPER";

/// Command line arguments for the demo
#[derive(Debug, Default, Parser)]
#[command(name = "keeper-demo", about = "Run competing clients against one distributed lock")]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long = "config", env = "KEEPER_CONFIG_FILE")]
    pub config: Option<PathBuf>,
    /// Number of competing clients
    #[arg(long = "clients")]
    pub clients: Option<usize>,
    /// Lock round trips per client
    #[arg(long = "rounds")]
    pub rounds: Option<usize>,
    /// Lock name under the root path
    #[arg(long = "lock-path")]
    pub lock_path: Option<String>,
    /// Upper bound of the random resource hold time
    #[arg(long = "hold-ms")]
    pub hold_ms: Option<u64>,
    /// Print the report as JSON
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub clients: usize,
    pub rounds: usize,
    pub root_path: String,
    pub lock_suffix: String,
    pub hold_ms: u64,
    pub poll_interval_ms: u64,
    pub acquire_timeout_ms: u64,
    pub log_level: String,
    pub json: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            clients: 3,
            rounds: 5,
            root_path: keeper_lock::config::DEFAULT_ROOT_PATH.to_string(),
            lock_suffix: "lock/CustomizeLock".to_string(),
            hold_ms: 3,
            poll_interval_ms: keeper_lock::config::DEFAULT_POLL_INTERVAL_MS,
            acquire_timeout_ms: 10_000,
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl DemoConfig {
    /// Load the configuration from every source, applying `cli` last.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder =
            Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true),
        );

        if let Some(v) = cli.clients {
            builder = builder.set_override("clients", v as i64)?;
        }
        if let Some(v) = cli.rounds {
            builder = builder.set_override("rounds", v as i64)?;
        }
        if let Some(v) = &cli.lock_path {
            builder = builder.set_override("lock_suffix", v.clone())?;
        }
        if let Some(v) = cli.hold_ms {
            builder = builder.set_override("hold_ms", v as i64)?;
        }
        if cli.json {
            builder = builder.set_override("json", true)?;
        }

        let demo: DemoConfig = builder
            .build()
            .context("failed to build demo configuration")?
            .try_deserialize()
            .context("invalid demo configuration")?;
        demo.validate()?;
        Ok(demo)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.clients > 0, "clients must be at least 1");
        ensure!(self.rounds > 0, "rounds must be at least 1");
        ensure!(!self.lock_suffix.is_empty(), "lock_suffix must not be empty");
        Ok(())
    }

    /// Lock settings for the client named `owner`.
    pub fn lock_config(&self, owner: &str) -> LockConfig {
        LockConfig::new(self.lock_suffix.clone())
            .with_root_path(self.root_path.clone())
            .with_owner(owner)
            .with_poll_interval(Some(Duration::from_millis(self.poll_interval_ms)))
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }
}
