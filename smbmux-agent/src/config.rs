//! CLI configuration for `smbmux-agent`.
//!
//! Settings are layered: built-in defaults, then the optional TOML file
//! given with `--config`, then individual flags.
//!
//!   smbmux-agent --servers 3 --interfaces 2 --strategy least-connections
//!   smbmux-agent --config smbmux.toml --sessions 8 --requests 5000

use std::fs;
use std::path::PathBuf;

// ---

use anyhow::Context as _;
use clap::Parser;

// ---

use smbmux_core::MultiChannelConfig;
use smbmux_domain::LoadBalancingStrategy;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "smbmux-agent", about = "Multi-channel SMB manager demo over a simulated server")]
pub struct Config {
    // ---
    /// TOML file with manager settings (any subset of the fields of
    /// `MultiChannelConfig`).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Upper bound on channels per session.
    #[arg(long)]
    pub max_channels: Option<usize>,

    /// round-robin, least-connections, random, weighted-random or failover-only.
    #[arg(long)]
    pub strategy: Option<LoadBalancingStrategy>,

    /// Health-check period in milliseconds; 0 disables it.
    #[arg(long)]
    pub health_interval_ms: Option<u64>,

    /// Capture a backtrace for every handle and report leaks at exit.
    #[arg(long)]
    pub trace_resources: bool,

    /// Number of simulated server addresses offered per session.
    #[arg(long, default_value_t = 4)]
    pub servers: u8,

    /// Number of usable simulated NICs.
    #[arg(long, default_value_t = 4)]
    pub interfaces: u8,

    /// Enumerate the host's real interfaces instead of simulated ones.
    #[arg(long, conflicts_with = "interfaces")]
    pub system_interfaces: bool,

    /// Concurrent sessions to open.
    #[arg(long, default_value_t = 2)]
    pub sessions: usize,

    /// Channel selections issued per session.
    #[arg(long, default_value_t = 1000)]
    pub requests: usize,
}

// ---

impl Config {
    // ---
    /// Resolve the manager configuration from file and flags.
    pub fn multi_channel(&self) -> anyhow::Result<MultiChannelConfig> {
        // ---
        let base = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => MultiChannelConfig::default(),
        };

        let cfg = self.apply(base);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Flags win over whatever `cfg` already holds.
    fn apply(&self, mut cfg: MultiChannelConfig) -> MultiChannelConfig {
        // ---
        if let Some(n) = self.max_channels {
            cfg.max_channels = n;
        }
        if let Some(strategy) = self.strategy {
            cfg.strategy = strategy;
        }
        if let Some(ms) = self.health_interval_ms {
            cfg.health_check_interval_ms = ms;
        }
        if self.trace_resources {
            cfg.trace_resource_usage = true;
        }
        cfg
    }
}

// ---

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn defaults_without_file_or_flags() {
        // ---
        let cli = Config::try_parse_from(["smbmux-agent"]).unwrap();
        let cfg = cli.multi_channel().unwrap();

        assert_eq!(cfg, MultiChannelConfig::default());
        assert_eq!(cli.servers, 4);
        assert_eq!(cli.sessions, 2);
    }

    #[test]
    fn flags_override_file_values() {
        // ---
        let file: MultiChannelConfig = toml::from_str(
            r#"
            max_channels = 2
            strategy = "random"
            health_check_interval_ms = 100
            "#,
        )
        .unwrap();

        let cli = Config::try_parse_from([
            "smbmux-agent",
            "--strategy",
            "least-connections",
            "--trace-resources",
        ])
        .unwrap();
        let cfg = cli.apply(file);

        assert_eq!(cfg.max_channels, 2);
        assert_eq!(cfg.strategy, LoadBalancingStrategy::LeastConnections);
        assert_eq!(cfg.health_check_interval_ms, 100);
        assert!(cfg.trace_resource_usage);
    }

    #[test]
    fn invalid_values_are_rejected() {
        // ---
        assert!(Config::try_parse_from(["smbmux-agent", "--strategy", "fastest"]).is_err());

        let cli = Config::try_parse_from(["smbmux-agent", "--max-channels", "0"]).unwrap();
        assert!(cli.multi_channel().is_err());
    }

    #[test]
    fn missing_config_file_names_the_path() {
        // ---
        let cli = Config::try_parse_from(["smbmux-agent", "--config", "/nonexistent/smbmux.toml"]).unwrap();
        let err = cli.multi_channel().unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/smbmux.toml"));
    }
}
