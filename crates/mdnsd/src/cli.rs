//! Command line and environment surface of `mdnsd`
//!
//! Every option can also be given through an `MDNS_*` environment variable;
//! a flag on the command line wins over the environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use mdns_core::config::{EngineConfig, MdnsConfig, PublishConfig, SourceConfig};

#[derive(Parser, Debug)]
#[command(name = "mdnsd")]
#[command(about = "Publish Docker container hostnames as mDNS CNAMEs via Avahi")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
    /// Only publish containers labelled docker-mdns.enable=true
    #[arg(short = 'd', long, env = "MDNS_DISABLE", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub disable: bool,

    /// Accepted for compatibility; detaching is left to the service manager
    #[arg(short = 'D', long, env = "MDNS_DAEMON", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub daemon: bool,

    /// Log every publish and withdraw decision
    #[arg(short, long, env = "MDNS_VERBOSE", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(short, long, env = "MDNS_LOG_FILE", value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// TTL of published records, in seconds
    #[arg(short, long, env = "MDNS_TTL", value_name = "SECONDS")]
    pub ttl: Option<u32>,

    /// Wait between two container scans, in seconds
    #[arg(short, long, env = "MDNS_WAIT", value_name = "SECONDS")]
    pub wait: Option<u64>,

    /// Withdraw hostnames whose container is gone
    #[arg(short, long, env = "MDNS_RESET", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub reset: bool,

    /// Publish without checking for collisions
    #[arg(short, long, env = "MDNS_FORCE", action = ArgAction::SetTrue, value_parser = BoolishValueParser::new())]
    pub force: bool,

    /// Docker Engine address (unix:///path or tcp://host:port)
    #[arg(long, env = "DOCKER_HOST", value_name = "URL")]
    pub docker_host: Option<String>,

    /// Collision retries before a hostname is held
    #[arg(long, env = "MDNS_MAX_COLLISION_RETRIES", value_name = "COUNT")]
    pub max_collision_retries: Option<u32>,

    /// Upper bound for withdrawing records on shutdown, in seconds
    #[arg(long, env = "MDNS_SHUTDOWN_TIMEOUT_SECS", value_name = "SECONDS")]
    pub shutdown_timeout: Option<u64>,

    /// Space-separated static hostnames
    #[arg(long = "domains", env = "MDNS_DOMAINS", value_delimiter = ' ', hide = true)]
    pub env_domains: Vec<String>,

    /// Static hostnames to publish (name.local)
    #[arg(value_name = "CNAME")]
    pub domains: Vec<String>,
}

impl Cli {
    /// Build and validate the engine configuration
    pub fn into_config(self) -> Result<MdnsConfig> {
        if let Some(path) = &self.log {
            validate_log_path(path)?;
        }

        let defaults = PublishConfig::default();
        let engine_defaults = EngineConfig::default();

        let static_domains = self
            .env_domains
            .into_iter()
            .chain(self.domains)
            .filter(|d| !d.trim().is_empty());

        let config = MdnsConfig {
            source: SourceConfig::Docker {
                host: self.docker_host,
            },
            publish: PublishConfig {
                ttl_secs: self.ttl.unwrap_or(defaults.ttl_secs),
                wait_secs: self.wait.unwrap_or(defaults.wait_secs),
                enabled_by_default: !self.disable,
                reset: self.reset,
                force: self.force,
            },
            engine: EngineConfig {
                max_collision_retries: self
                    .max_collision_retries
                    .unwrap_or(engine_defaults.max_collision_retries),
                shutdown_timeout_secs: self
                    .shutdown_timeout
                    .unwrap_or(engine_defaults.shutdown_timeout_secs),
                ..engine_defaults
            },
            ..MdnsConfig::new()
        }
        .with_static_domains(static_domains);

        config.validate()?;
        Ok(config)
    }
}

/// The log file's directory must exist
pub fn validate_log_path(path: &Path) -> Result<()> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;

    if let Some(dir) = absolute.parent()
        && !dir.is_dir()
    {
        bail!("Log directory does not exist: {}", dir.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("mdnsd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).into_config().unwrap();

        assert_eq!(config.publish.ttl_secs, 60);
        assert_eq!(config.publish.wait_secs, 5);
        assert!(config.publish.enabled_by_default);
        assert!(!config.publish.reset);
        assert!(!config.publish.force);
        assert!(config.static_domains.is_empty());
    }

    #[test]
    fn test_flags_and_domains() {
        let cli = parse(&["-d", "-r", "-f", "-v", "-t", "120", "-w", "10", "NAS.local", "printer.local"]);
        assert!(cli.verbose);

        let config = cli.into_config().unwrap();
        assert!(!config.publish.enabled_by_default);
        assert!(config.publish.reset);
        assert!(config.publish.force);
        assert_eq!(config.publish.ttl_secs, 120);
        assert_eq!(config.publish.wait_secs, 10);
        assert_eq!(config.static_domains, vec!["nas.local", "printer.local"]);
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        assert!(parse(&["-t", "0"]).into_config().is_err());
        assert!(parse(&["-t", "86401"]).into_config().is_err());
        assert!(parse(&["-w", "3601"]).into_config().is_err());
        assert!(parse(&["-t", "86400", "-w", "3600"]).into_config().is_ok());
    }

    #[test]
    fn test_static_domains_must_be_local() {
        assert!(parse(&["nas.example.com"]).into_config().is_err());
        assert!(parse(&["bad_name.local"]).into_config().is_err());
    }

    #[test]
    fn test_log_path_validation() {
        let dir = tempfile::tempdir().unwrap();

        assert!(validate_log_path(&dir.path().join("mdnsd.log")).is_ok());
        assert!(validate_log_path(&dir.path().join("missing").join("mdnsd.log")).is_err());
    }

    #[test]
    fn test_docker_host_scheme_is_checked() {
        assert!(parse(&["--docker-host", "ssh://box"]).into_config().is_err());
        assert!(
            parse(&["--docker-host", "tcp://127.0.0.1:2375"])
                .into_config()
                .is_ok()
        );
    }
}
