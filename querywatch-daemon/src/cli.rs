//! CLI argument definitions for querywatch-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// QueryWatch database audit-log analyzer.
///
/// Reads audit records from a file or stdin, runs every enabled analyzer
/// on each query and delivers alerts to the configured sinks.
#[derive(Parser, Debug, Default)]
#[command(name = "querywatch-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to querywatch.toml configuration file.
    ///
    /// Built-in defaults (plus environment overrides) are used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Read records from this file instead of the configured input path.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Override input record format (audit, logline, json).
    #[arg(short, long)]
    pub format: Option<String>,

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

    /// Validate configuration and exit without reading any input.
    #[arg(long)]
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_overrides() {
        let cli = DaemonCli::try_parse_from([
            "querywatch-daemon",
            "--config",
            "/etc/querywatch/querywatch.toml",
            "--input",
            "/var/log/postgresql/postgresql.log",
            "--format",
            "audit",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ])
        .unwrap();

        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/etc/querywatch/querywatch.toml"))
        );
        assert_eq!(cli.format.as_deref(), Some("audit"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }

    #[test]
    fn everything_is_optional() {
        let cli = DaemonCli::try_parse_from(["querywatch-daemon"]).unwrap();
        assert!(cli.config.is_none());
        assert!(cli.input.is_none());
        assert!(!cli.validate);
    }
}
