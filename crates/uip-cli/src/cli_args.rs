use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Debug, Parser)]
#[command(
    name = "uip-gatewayd",
    about = "Universal interaction protocol gateway",
    version
)]
/// Public struct `Cli` for the gateway daemon.
pub struct Cli {
    #[arg(
        long,
        env = "UIP_CONFIG",
        help = "Path to the TOML configuration file. Missing files fall back to defaults."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "UIP_MOCK",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Use the built-in echo backend instead of the configured backend"
    )]
    pub mock: bool,

    #[arg(long, env = "UIP_BIND", help = "Override server.bind (host:port)")]
    pub bind: Option<String>,

    #[arg(
        long = "log-level",
        env = "UIP_LOG_LEVEL",
        help = "Override observability.log_level (trace, debug, info, warn, error)"
    )]
    pub log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn unit_cli_defaults_leave_config_untouched() {
        let cli = Cli::try_parse_from(["uip-gatewayd"]).expect("parse");
        assert!(cli.config.is_none());
        assert!(!cli.mock);
        assert!(cli.bind.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn unit_cli_accepts_overrides() {
        let cli = Cli::try_parse_from([
            "uip-gatewayd",
            "--config",
            "gateway.toml",
            "--mock",
            "--bind",
            "127.0.0.1:9000",
            "--log-level",
            "debug",
        ])
        .expect("parse");
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("gateway.toml")));
        assert!(cli.mock);
        assert_eq!(cli.bind.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
