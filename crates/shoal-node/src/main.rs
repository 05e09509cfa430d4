mod console;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use shoal_cache::{CacheConfig, GridMember};
use shoal_remoting::LocalNetwork;

use crate::console::Console;

#[derive(clap::Parser, Debug)]
#[command(name = "shoal-node", about = "Shoal in-memory data grid")]
struct Cli {
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Member the console issues operations on; defaults to the first one.
    #[arg(long)]
    member: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterConfig {
    members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    cluster: ClusterConfig,
    cache: CacheConfig,
    observability: ObservabilityConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new().merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("SHOAL_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.observability.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.observability.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.observability.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    if config.cluster.members.is_empty() {
        anyhow::bail!("cluster.members must name at least one member");
    }
    if config.cache.num_owners == 0 || config.cache.num_segments == 0 {
        anyhow::bail!("cache.num_owners and cache.num_segments must be positive");
    }

    tracing::info!(
        members = ?config.cluster.members,
        num_owners = config.cache.num_owners,
        num_segments = config.cache.num_segments,
        "grid starting"
    );

    let network = LocalNetwork::new();
    let names: Vec<&str> = config.cluster.members.iter().map(String::as_str).collect();
    let members = GridMember::start_cluster(&network, &names, &config.cache);

    let mut console = Console::new(network, members);
    if let Some(name) = cli.member.as_deref() {
        console.select(name)?;
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    console.run(stdin, tokio::io::stdout()).await?;

    console.shutdown();
    Ok(())
}
