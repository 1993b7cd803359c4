//! CLI argument definitions for relaypost-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use relaypost_core::RelaypostConfig;

/// Relaypost log routing daemon.
///
/// Tails the configured log sources, classifies records with regex
/// group rules, and fans them out to the declared outputs.
#[derive(Parser, Debug)]
#[command(name = "relaypost-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to relaypost.toml configuration file.
    #[arg(short, long, default_value = "/etc/relaypost/relaypost.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,

    /// Build only the named nodes. May be given multiple times.
    ///
    /// Useful for replaying a single source or debugging one classifier
    /// without starting the rest of the pipeline.
    #[arg(long = "node", value_name = "NAME")]
    pub nodes: Vec<String>,

    /// Ignore saved offsets and timestamps and read every source from
    /// the beginning.
    #[arg(long)]
    pub no_resume: bool,

    /// Replace every output node with a console output.
    ///
    /// Lets classifier changes be dry-run against live logs without
    /// touching the real destinations.
    #[arg(long)]
    pub test_mode: bool,
}

impl DaemonCli {
    /// Node whitelist in the form the graph builder expects.
    ///
    /// Returns `None` when no `--node` flag was given, which means
    /// every declared node is built.
    pub fn whitelist(&self) -> Option<&[String]> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(&self.nodes)
        }
    }

    /// Apply CLI overrides onto a loaded configuration.
    pub fn apply_overrides(&self, config: &mut RelaypostConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = DaemonCli::try_parse_from(["relaypost-daemon"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/relaypost/relaypost.toml"));
        assert!(cli.whitelist().is_none());
        assert!(!cli.validate);
        assert!(!cli.no_resume);
        assert!(!cli.test_mode);
    }

    #[test]
    fn test_node_flag_collects_whitelist() {
        let cli = DaemonCli::try_parse_from([
            "relaypost-daemon",
            "--node",
            "main_syslog",
            "--node",
            "classifier",
        ])
        .unwrap();
        let whitelist = cli.whitelist().expect("whitelist should be present");
        assert_eq!(whitelist, ["main_syslog", "classifier"]);
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = DaemonCli::try_parse_from([
            "relaypost-daemon",
            "--log-level",
            "debug",
            "--pid-file",
            "/tmp/relaypost-test.pid",
        ])
        .unwrap();

        let mut config = RelaypostConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.general.log_level, "debug");
        // log_format was not given, config value stays
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.general.pid_file, "/tmp/relaypost-test.pid");
    }
}
