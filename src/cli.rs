use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mediapeek")]
#[command(about = "Remote media inspection service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the public gateway (POST /resource/analyze)
    Gateway(ServeArgs),
    /// Run the analyzer service the gateway delegates to (POST /analyze)
    Analyzer(ServeArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// TOML configuration file to layer under the environment
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind; defaults to `server.bind_addr`
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// TOML configuration file; defaults to `MEDIAPEEK_CONFIG` or `config/mediapeek.toml`
    #[arg(long)]
    pub config: Option<PathBuf>,
}
