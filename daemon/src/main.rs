//! Essentia daemon: entry point for running a full node.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use ess_chain::Genesis;
use ess_ethash::PowMode;
use ess_node::{
    init_logging, AccountManager, EssNode, KeyStoreWallet, LightServer, LogFormat, NodeConfig,
    ServerHandle, ServiceContext, ShutdownController,
};
use ess_types::{Address, SyncMode};

#[derive(Parser)]
#[command(name = "ess", about = "Essentia full node")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base;
    /// flags and env vars override them.
    #[arg(long, env = "ESS_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the chain database. Runs in memory when unset.
    #[arg(long, env = "ESS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "ESS_NETWORK_ID")]
    network_id: Option<u64>,

    /// Synchronisation mode: "full" or "fast".
    #[arg(long, env = "ESS_SYNCMODE")]
    syncmode: Option<String>,

    #[arg(long, env = "ESS_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Percentage of time allowed for serving light clients; 0 disables.
    #[arg(long, env = "ESS_LIGHT_SERV")]
    light_serv: Option<u32>,

    #[arg(long, env = "ESS_LIGHT_PEERS")]
    light_peers: Option<usize>,

    /// Account credited with mined blocks.
    #[arg(long, env = "ESS_ETHERBASE")]
    etherbase: Option<Address>,

    /// Start mining once the node is up.
    #[arg(long, env = "ESS_MINE")]
    mine: bool,

    /// Ethash mode: "normal", "shared", "test" or "fake".
    #[arg(long, env = "ESS_POW_MODE")]
    pow_mode: Option<String>,

    /// Single-node proof-of-authority chain with a fresh in-memory signer.
    #[arg(long, env = "ESS_DEV")]
    dev: bool,

    #[arg(long, env = "ESS_LOG_LEVEL")]
    log_level: Option<String>,

    /// "human" or "json".
    #[arg(long, env = "ESS_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Node operations.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Print the effective configuration as TOML.
    DumpConfig,
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until SIGINT or SIGTERM.
    Run,
}

impl Cli {
    fn node_config(&self) -> anyhow::Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_toml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NodeConfig::default(),
        };

        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }
        if let Some(id) = self.network_id {
            config.network_id = id;
        }
        if let Some(mode) = &self.syncmode {
            config.sync_mode = SyncMode::from(mode.as_str());
        }
        if let Some(peers) = self.max_peers {
            config.max_peers = peers;
        }
        if let Some(serv) = self.light_serv {
            config.light_serv = serv;
        }
        if let Some(peers) = self.light_peers {
            config.light_peers = peers;
        }
        if let Some(etherbase) = self.etherbase {
            config.etherbase = etherbase;
        }
        if let Some(mode) = &self.pow_mode {
            config.ethash.pow_mode = PowMode::from(mode.as_str());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.parse::<LogFormat>()?;
        }
        Ok(config)
    }
}

/// Context for a developer chain: in memory, with one generated signer that
/// also becomes the etherbase.
fn dev_context(config: &mut NodeConfig) -> ServiceContext {
    let wallet = Arc::new(KeyStoreWallet::new("keystore://dev"));
    let signer = wallet.generate();
    let accounts = Arc::new(AccountManager::new());
    accounts.add_wallet(wallet);

    tracing::info!(%signer, "using developer account");
    config.genesis = Some(Genesis::developer(1, signer));
    config.etherbase = signer;
    config.sync_mode = SyncMode::Full;
    config.data_dir = None;
    ServiceContext::ephemeral().with_account_manager(accounts)
}

async fn run(cli: &Cli, mut config: NodeConfig) -> anyhow::Result<()> {
    let ctx = if cli.dev {
        dev_context(&mut config)
    } else {
        match &config.data_dir {
            Some(dir) => ServiceContext::with_lmdb(dir.clone()),
            None => {
                tracing::warn!("no data directory, chain data will not persist");
                ServiceContext::ephemeral()
            }
        }
    };

    tracing::info!(
        network = config.network_id,
        sync = %config.sync_mode,
        max_peers = config.max_peers,
        light_serv = config.light_serv,
        "starting Essentia node"
    );

    let light = (config.light_serv > 0)
        .then(|| Arc::new(LightServer::new(config.light_serv, config.light_peers)));
    let server = Arc::new(ServerHandle::new(config.max_peers));

    let node = Arc::new(EssNode::new(ctx, config).await?);
    if let Some(light) = light {
        node.add_les_server(light)?;
    }
    if let Err(e) = node.start(&server).await {
        node.stop().await;
        return Err(e.into());
    }

    if cli.mine || cli.dev {
        if let Err(e) = node.start_mining(true) {
            tracing::error!(error = %e, "failed to start mining");
        }
    }

    ShutdownController::new().wait_for_signal().await;

    node.stop().await;
    tracing::info!("Essentia daemon exited cleanly");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.node_config()?;

    match &cli.command {
        Command::DumpConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Node {
            action: NodeAction::Run,
        } => {
            init_logging(config.log_format, &config.log_level)?;
            run(&cli, config).await
        }
    }
}
