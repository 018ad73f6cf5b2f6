//! RampWool wallet CLI - connect a wallet agent, switch networks and run
//! marketplace transactions from the terminal
//!
//! # WARNING
//! - Marketplace commands move real funds on mainnet chains.
//! - Every transaction is signed by the connected agent; review prompts carefully.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use rampwool_wallet::cli::commands;
use rampwool_wallet::config::Config;

/// RampWool wallet session CLI
#[derive(Parser)]
#[command(name = "rampwool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml", env = "RAMPWOOL_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show current configuration (secrets masked)
    Config,

    /// List configured networks
    Networks,

    /// Check every configured RPC endpoint
    Health,

    /// Connect to the wallet agent and show the session
    Connect {
        /// Agent kind: metamask, coinbase, injected (default from config)
        #[arg(long)]
        agent: Option<String>,

        /// Run the ownership challenge after connecting
        #[arg(long)]
        verify: bool,
    },

    /// Show the native balance of an address
    Balance {
        address: String,

        /// Chain id (default: session.default_chain_id)
        #[arg(long, value_parser = commands::parse_chain_arg)]
        chain: Option<u64>,
    },

    /// Ask the agent to switch chains, adding the chain if needed
    Switch {
        /// Chain id, decimal or 0x-hex
        #[arg(value_parser = commands::parse_chain_arg)]
        chain_id: u64,
    },

    /// Show the current listing for a token
    Listing {
        /// NFT contract address
        nft: String,
        token_id: String,

        #[arg(long, value_parser = commands::parse_chain_arg)]
        chain: Option<u64>,
    },

    /// Show open offers for a token
    Offers {
        /// NFT contract address
        nft: String,
        token_id: String,

        #[arg(long, value_parser = commands::parse_chain_arg)]
        chain: Option<u64>,
    },

    /// Buy a listed token
    Buy {
        /// NFT contract address
        nft: String,
        token_id: String,

        /// Listing price in native units (e.g. "1.5")
        price: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// List a token for sale
    List {
        /// NFT contract address
        nft: String,
        token_id: String,

        /// Asking price in native units
        price: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Cancel a listing
    Cancel {
        /// NFT contract address
        nft: String,
        token_id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    let directive: tracing_subscriber::filter::Directive = "rampwool_wallet=info".parse()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Config => commands::show_config(&config),
        Commands::Networks => commands::networks(&config),
        Commands::Health => commands::health(&config).await,
        Commands::Connect { agent, verify } => {
            commands::connect(&config, agent.as_deref(), verify).await
        }
        Commands::Balance { address, chain } => commands::balance(&config, &address, chain).await,
        Commands::Switch { chain_id } => commands::switch(&config, chain_id).await,
        Commands::Listing {
            nft,
            token_id,
            chain,
        } => commands::listing(&config, &nft, &token_id, chain).await,
        Commands::Offers {
            nft,
            token_id,
            chain,
        } => commands::offers(&config, &nft, &token_id, chain).await,
        Commands::Buy {
            nft,
            token_id,
            price,
            force,
        } => commands::buy(&config, &nft, &token_id, &price, force).await,
        Commands::List {
            nft,
            token_id,
            price,
            force,
        } => commands::list(&config, &nft, &token_id, &price, force).await,
        Commands::Cancel {
            nft,
            token_id,
            force,
        } => commands::cancel(&config, &nft, &token_id, force).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
