//! keel daemon: entry point for running a keel node.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use keel_node::{init_logging, KeelNode, LogFormat, NodeConfig};
use keel_types::NetworkId;

#[derive(Parser)]
#[command(name = "keel-daemon", about = "keel full node daemon")]
struct Cli {
    /// Network to connect to: "live", "test", or "dev".
    #[arg(long, env = "KEEL_NETWORK")]
    network: Option<String>,

    /// Data directory for ledger storage.
    #[arg(long, env = "KEEL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Port for P2P connections (defaults to the network's port).
    #[arg(long, env = "KEEL_PORT")]
    port: Option<u16>,

    /// Do not accept inbound peers.
    #[arg(long, env = "KEEL_NO_LISTEN")]
    no_listen: bool,

    /// Seed peers (comma-separated: "1.2.3.4:10333,seed.example:10333").
    #[arg(long, env = "KEEL_SEEDS", value_delimiter = ',')]
    seeds: Vec<String>,

    /// Outbound connections to keep open.
    #[arg(long, env = "KEEL_MIN_CONNECTIONS")]
    min_connections: Option<usize>,

    /// Maximum number of peer connections.
    #[arg(long, env = "KEEL_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Maximum connections to one address.
    #[arg(long, env = "KEEL_MAX_PER_ADDRESS")]
    max_per_address: Option<usize>,

    /// Memory pool capacity.
    #[arg(long, env = "KEEL_MEMPOOL_CAPACITY")]
    mempool_capacity: Option<usize>,

    /// Target block interval in seconds.
    #[arg(long, env = "KEEL_SECONDS_PER_BLOCK")]
    seconds_per_block: Option<u64>,

    /// Standby validator public keys (comma-separated hex).
    #[arg(long, env = "KEEL_STANDBY_VALIDATORS", value_delimiter = ',')]
    standby_validators: Vec<String>,

    /// Hex seed of this node's validator key.
    #[arg(long, env = "KEEL_VALIDATOR_SEED", hide_env_values = true)]
    validator_seed: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "KEEL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "KEEL_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Sample node state into the Prometheus registry.
    #[arg(long, env = "KEEL_ENABLE_METRICS")]
    metrics: bool,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Start the node.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until SIGINT or SIGTERM.
    Run,
}

impl Cli {
    /// Overlay the flags that were given onto `base`.
    fn apply(&self, base: NodeConfig) -> anyhow::Result<NodeConfig> {
        let mut config = base;
        if let Some(name) = &self.network {
            let network = NetworkId::parse(name)
                .with_context(|| format!("unknown network {name:?}"))?;
            if self.port.is_none() && config.network != network {
                config.port = network.default_port();
            }
            config.network = network;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.no_listen {
            config.listen = false;
        }
        if !self.seeds.is_empty() {
            config.seeds = self.seeds.clone();
        }
        if let Some(n) = self.min_connections {
            config.min_desired_connections = n;
        }
        if let Some(n) = self.max_connections {
            config.max_connections = n;
        }
        if let Some(n) = self.max_per_address {
            config.max_connections_per_address = n;
        }
        if let Some(n) = self.mempool_capacity {
            config.mempool_capacity = n;
        }
        if let Some(secs) = self.seconds_per_block {
            config.seconds_per_block = secs;
        }
        if !self.standby_validators.is_empty() {
            config.standby_validators = self.standby_validators.clone();
        }
        if let Some(seed) = &self.validator_seed {
            config.validator_seed = Some(seed.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config.enable_metrics |= self.metrics;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let base = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(&path.to_string_lossy())
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    let config = cli.apply(base)?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Node {
            action: NodeAction::Run,
        } => {
            init_logging(config.log_format, &config.log_level);
            if let Some(path) = &cli.config {
                tracing::info!(path = %path.display(), "loaded config file");
            }
            tracing::info!(
                network = config.network.as_str(),
                port = config.port,
                seeds = config.seeds.len(),
                validator = config.validator_seed.is_some(),
                "starting keel node"
            );

            let node = KeelNode::start(config).await?;
            node.shutdown_controller().wait_for_signal().await?;
            node.stop().await?;

            tracing::info!("keel daemon exited cleanly");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("keel-daemon").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn flags_override_file_values() {
        let file = NodeConfig::from_toml_str(
            r#"
                seconds_per_block = 5
                max_connections = 12
                seeds = ["10.0.0.1:30333"]
            "#,
        )
        .unwrap();
        let cli = parse(&["--seconds-per-block", "2", "--seeds", "a:1,b:2", "node", "run"]);
        let config = cli.apply(file).unwrap();
        assert_eq!(config.seconds_per_block, 2);
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.seeds, vec!["a:1".to_string(), "b:2".to_string()]);
    }

    #[test]
    fn switching_network_moves_to_its_default_port() {
        let config = parse(&["--network", "live", "config"])
            .apply(NodeConfig::default())
            .unwrap();
        assert_eq!(config.network, NetworkId::Live);
        assert_eq!(config.port, NetworkId::Live.default_port());

        let pinned = parse(&["--network", "live", "--port", "4000", "config"])
            .apply(NodeConfig::default())
            .unwrap();
        assert_eq!(pinned.port, 4000);
    }

    #[test]
    fn unknown_network_is_an_error() {
        let cli = parse(&["--network", "moon", "config"]);
        assert!(cli.apply(NodeConfig::default()).is_err());
    }
}
