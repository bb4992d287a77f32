mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use mediapeek::config::Config;
use mediapeek::{api, observability};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway(args) => {
            let config = Config::load_with(args.config)?;
            observability::init_tracing(&config.telemetry);
            let address = args.address.unwrap_or(config.server.bind_addr);
            api::run_gateway(address, config).await?
        }
        Commands::Analyzer(args) => {
            let config = Config::load_with(args.config)?;
            observability::init_tracing(&config.telemetry);
            let address = args.address.unwrap_or(config.server.bind_addr);
            api::run_analyzer(address, config).await?
        }
        Commands::Config(args) => {
            let config = Config::load_with(args.config)?;
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
