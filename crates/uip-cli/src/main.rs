use anyhow::Result;
use clap::Parser;
use uip_cli::{init_tracing, run_gateway, Cli, GatewayFileConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GatewayFileConfig::load(cli.config.as_deref())?.with_cli_overrides(&cli);
    init_tracing(&config.observability.log_level, config.observability.log_format);
    config.validate()?;
    run_gateway(config).await
}
