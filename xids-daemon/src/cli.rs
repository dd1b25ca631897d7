//! CLI argument definitions for xids-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! Flags are applied on top of the loaded configuration, so they take
//! precedence over both the config file and `XIDS_*` environment variables.

use std::path::PathBuf;

use clap::Parser;

use xids_core::config::XidsConfig;
use xids_core::error::XidsError;

/// xids signature IDS daemon.
///
/// Compiles the signature file into a DFA, provisions the kernel lookup
/// table pinned under `<pin_base_dir>/<dev>/`, and forwards packets
/// received on an AF_XDP socket back out of the same interface.
#[derive(Parser, Debug, Default)]
#[command(name = "xids-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to xids.toml configuration file.
    ///
    /// When omitted, built-in defaults and `XIDS_*` environment variables are used.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Operate on this network device.
    #[arg(short = 'd', long = "dev")]
    pub dev: Option<String>,

    /// Bind the AF_XDP socket to this receive queue.
    #[arg(short = 'Q', long)]
    pub queue: Option<u32>,

    /// Wait for packets with poll(2) instead of busy polling.
    #[arg(short = 'p', long)]
    pub poll_mode: bool,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "log_level")]
    pub quiet: bool,

    /// Print datapath statistics periodically.
    #[arg(short, long)]
    pub verbose: bool,

    /// Signature file (one literal pattern per line).
    #[arg(long)]
    pub patterns: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and exit without touching the kernel.
    #[arg(long)]
    pub validate: bool,

    /// Compile and provision into an in-memory table, then exit.
    #[arg(long)]
    pub dry_run: bool,
}

impl DaemonCli {
    /// Load the effective configuration.
    ///
    /// Order: defaults → config file (if given) → `XIDS_*` environment → flags.
    ///
    /// # Errors
    ///
    /// - `ConfigError::FileNotFound` / `ParseFailed` for an explicit `--config`
    /// - `ConfigError::InvalidValue` when the merged configuration fails validation
    pub async fn load_config(&self) -> Result<XidsConfig, XidsError> {
        let mut config = match &self.config {
            Some(path) => XidsConfig::from_file(path).await?,
            None => XidsConfig::default(),
        };
        config.apply_env_overrides();
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides to a loaded configuration.
    pub fn apply(&self, config: &mut XidsConfig) {
        if let Some(dev) = &self.dev {
            config.interface.device.clone_from(dev);
        }
        if let Some(queue) = self.queue {
            config.interface.queue = queue;
        }
        if self.poll_mode {
            config.interface.poll_mode = true;
        }
        if self.verbose {
            config.general.verbose = true;
        }
        if let Some(path) = &self.patterns {
            config.signatures.path.clone_from(path);
        }
        if self.quiet {
            config.general.log_level = "warn".to_owned();
        }
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
    }
}
