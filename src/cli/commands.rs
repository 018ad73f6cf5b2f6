//! CLI command implementations

use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use dialoguer::Confirm;
use tracing::{info, warn};

use crate::agent::{AgentKind, Environment, HttpAgent};
use crate::config::Config;
use crate::manager::{SessionSettings, WalletSessionManager};
use crate::marketplace::{fetch_active_offers, fetch_listing, Marketplace};
use crate::network::{parse_quantity, NetworkConfig};
use crate::rpc::{ChainReader, RpcClient, TxReceipt};
use crate::units::{format_ether, short_address};

/// How long `switch` waits for the agent to report the new chain
const SWITCH_CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// List configured networks
pub fn networks(config: &Config) -> Result<()> {
    let registry = config.network_registry()?;

    println!("\n=== NETWORKS ===\n");
    println!("{:<10} {:<22} {:<8} {}", "CHAIN ID", "NAME", "SYMBOL", "RPC");
    println!("{}", "-".repeat(80));

    for network in registry.iter() {
        let marker = if network.chain_id == config.session.default_chain_id {
            " (default)"
        } else {
            ""
        };
        println!(
            "{:<10} {:<22} {:<8} {}{}",
            network.chain_id,
            network.name,
            network.native_currency.symbol,
            network.rpc_url,
            marker
        );
    }

    println!();
    Ok(())
}

/// Check that every configured RPC endpoint answers with the expected chain id
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== NETWORK HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("Agent endpoint {}... ", config.agent.rpc_url);
    match check_rpc(&config.agent.rpc_url, config).await {
        Ok((chain_id, latency)) => println!("OK (chain {}, {}ms)", chain_id, latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    let registry = config.network_registry()?;
    let checks = registry
        .iter()
        .map(|network| check_rpc(&network.rpc_url, config));
    let results = futures::future::join_all(checks).await;

    for (network, result) in registry.iter().zip(results) {
        print!("{} ({})... ", network.name, network.chain_id);
        match result {
            Ok((chain_id, latency)) if chain_id == network.chain_id => {
                println!("OK ({}ms)", latency)
            }
            Ok((chain_id, _)) => {
                println!("MISMATCH: endpoint reports chain {}", chain_id);
                all_healthy = false;
            }
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        }
    }

    println!();
    if all_healthy {
        println!("All endpoints healthy!");
    } else {
        println!("Some endpoints are unhealthy. Check the errors above.");
    }

    Ok(())
}

async fn check_rpc(url: &str, config: &Config) -> Result<(u64, u64)> {
    let client = RpcClient::new(url, &config.rpc)?;

    let start = Instant::now();
    let chain_id = client.chain_id().await?;
    let latency = start.elapsed().as_millis() as u64;

    Ok((chain_id, latency))
}

/// Connect to the agent and print the resulting session
pub async fn connect(config: &Config, agent: Option<&str>, verify: bool) -> Result<()> {
    let manager = build_manager(config, verify)?;
    let kind = agent_kind(config, agent)?;

    let session = manager.connect(kind).await?;
    print_session(&manager, config).await;

    if !session.is_verified() && verify {
        warn!("Connected but ownership could not be verified");
    }

    manager.disconnect().await;
    Ok(())
}

/// Native balance of any address on a configured network
pub async fn balance(config: &Config, address: &str, chain: Option<u64>) -> Result<()> {
    let address: Address = address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid address: {}", address))?;
    let network = network_for(config, chain)?;
    let client = RpcClient::new(&network.rpc_url, &config.rpc)?;

    let wei = client.balance(address).await?;
    println!(
        "{} {} on {}",
        format_ether(wei, config.session.balance_decimals),
        network.native_currency.symbol,
        network.name
    );
    Ok(())
}

/// Ask the agent to move to another chain
pub async fn switch(config: &Config, chain_id: u64) -> Result<()> {
    let manager = build_manager(config, false)?;
    manager.connect(agent_kind(config, None)?).await?;

    let mut updates = manager.watch();
    manager.switch_network(chain_id).await?;

    info!("Waiting for agent to report chain {}", chain_id);
    let confirmed = tokio::time::timeout(
        SWITCH_CONFIRM_TIMEOUT,
        updates.wait_for(|session| session.chain_id() == Some(chain_id)),
    )
    .await;

    match confirmed {
        Ok(Ok(_)) => println!("Switched to chain {}", chain_id),
        _ => println!(
            "Switch to chain {} requested; agent has not confirmed yet",
            chain_id
        ),
    }

    manager.disconnect().await;
    Ok(())
}

/// Show the current listing for a token
pub async fn listing(config: &Config, nft: &str, token_id: &str, chain: Option<u64>) -> Result<()> {
    let (nft, token_id) = parse_token(nft, token_id)?;
    let marketplace = config.marketplace_address()?;
    let network = network_for(config, chain)?;
    let client = RpcClient::new(&network.rpc_url, &config.rpc)?;

    let listing = fetch_listing(&client, marketplace, nft, token_id).await?;

    println!("\n=== LISTING {} #{} ===\n", short_address(&nft.to_checksum(None)), token_id);
    if !listing.active {
        println!("Not listed.");
        return Ok(());
    }

    println!("Seller: {}", listing.seller);
    println!(
        "Price:  {} {}",
        format_ether(listing.price, config.session.balance_decimals),
        network.native_currency.symbol
    );
    println!("Listed: {}", format_timestamp(listing.createdAt));
    Ok(())
}

/// Show open offers for a token
pub async fn offers(config: &Config, nft: &str, token_id: &str, chain: Option<u64>) -> Result<()> {
    let (nft, token_id) = parse_token(nft, token_id)?;
    let marketplace = config.marketplace_address()?;
    let network = network_for(config, chain)?;
    let client = RpcClient::new(&network.rpc_url, &config.rpc)?;

    let orders = fetch_active_offers(&client, marketplace, nft, token_id).await?;

    println!("\n=== OFFERS {} #{} ===\n", short_address(&nft.to_checksum(None)), token_id);
    if orders.is_empty() {
        println!("No open offers.");
        return Ok(());
    }

    println!("{:<10} {:<16} {:<20} {}", "ORDER", "BUYER", "PRICE", "CREATED");
    println!("{}", "-".repeat(70));
    for order in orders {
        println!(
            "{:<10} {:<16} {:<20} {}",
            order.orderId,
            short_address(&order.buyer.to_checksum(None)),
            format!(
                "{} {}",
                format_ether(order.price, config.session.balance_decimals),
                network.native_currency.symbol
            ),
            format_timestamp(order.createdAt)
        );
    }
    println!();
    Ok(())
}

/// Buy a listed token at its listing price
pub async fn buy(config: &Config, nft: &str, token_id: &str, price: &str, force: bool) -> Result<()> {
    let (nft, token_id) = parse_token(nft, token_id)?;

    if !confirm(force, format!("Buy {} #{} for {}? This cannot be undone.", nft, token_id, price))? {
        info!("Buy cancelled by user");
        return Ok(());
    }

    let manager = build_manager(config, false)?;
    manager.connect(agent_kind(config, None)?).await?;
    let marketplace = Marketplace::new(&manager, config.marketplace_address()?);

    let receipt = marketplace.buy_nft(nft, token_id, price).await;
    finish(&manager, config, receipt).await
}

/// List a token for sale
pub async fn list(config: &Config, nft: &str, token_id: &str, price: &str, force: bool) -> Result<()> {
    let (nft, token_id) = parse_token(nft, token_id)?;

    if !confirm(force, format!("List {} #{} for {}?", nft, token_id, price))? {
        info!("Listing cancelled by user");
        return Ok(());
    }

    let manager = build_manager(config, false)?;
    manager.connect(agent_kind(config, None)?).await?;
    let marketplace = Marketplace::new(&manager, config.marketplace_address()?);

    let receipt = marketplace.list_nft(nft, token_id, price).await;
    finish(&manager, config, receipt).await
}

/// Withdraw a listing
pub async fn cancel(config: &Config, nft: &str, token_id: &str, force: bool) -> Result<()> {
    let (nft, token_id) = parse_token(nft, token_id)?;

    if !confirm(force, format!("Cancel listing for {} #{}?", nft, token_id))? {
        info!("Cancel aborted by user");
        return Ok(());
    }

    let manager = build_manager(config, false)?;
    manager.connect(agent_kind(config, None)?).await?;
    let marketplace = Marketplace::new(&manager, config.marketplace_address()?);

    let receipt = marketplace.cancel_listing(nft, token_id).await;
    finish(&manager, config, receipt).await
}

/// Node-backed agent plus a manager around it
fn build_manager(config: &Config, verify: bool) -> Result<WalletSessionManager> {
    let agent = HttpAgent::new(&config.agent.rpc_url, &config.rpc)
        .context("Failed to create agent")?;
    agent.start_polling(Duration::from_millis(config.agent.poll_interval_ms));

    let environment = Environment::new().with_agent(Arc::new(agent));

    Ok(WalletSessionManager::new(
        environment,
        config.network_registry()?,
        cli_settings(config, verify),
    ))
}

/// The `--verify` flag alone decides whether connect runs the challenge
fn cli_settings(config: &Config, verify: bool) -> SessionSettings {
    SessionSettings {
        verify_on_connect: verify,
        ..SessionSettings::from_config(config)
    }
}

fn agent_kind(config: &Config, flag: Option<&str>) -> Result<AgentKind> {
    match flag {
        Some(kind) => Ok(kind.parse()?),
        None => config.agent_kind(),
    }
}

fn network_for(config: &Config, chain: Option<u64>) -> Result<NetworkConfig> {
    let chain_id = chain.unwrap_or(config.session.default_chain_id);
    config
        .network_registry()?
        .get(chain_id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Unknown network: chain id {} is not configured", chain_id))
}

fn parse_token(nft: &str, token_id: &str) -> Result<(Address, U256)> {
    let nft: Address = nft
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid NFT contract address: {}", nft))?;
    let token_id: U256 = token_id
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid token id: {}", token_id))?;
    Ok((nft, token_id))
}

fn confirm(force: bool, prompt: String) -> Result<bool> {
    if force {
        return Ok(true);
    }
    Ok(Confirm::new().with_prompt(prompt).default(false).interact()?)
}

async fn finish(
    manager: &WalletSessionManager,
    config: &Config,
    receipt: crate::error::Result<TxReceipt>,
) -> Result<()> {
    let result = match receipt {
        Ok(receipt) => {
            println!("\nTransaction confirmed!");
            println!("Hash:  {}", receipt.transaction_hash);
            println!("Block: {}", receipt.block_number);
            if let Some(network) = manager
                .session()
                .await
                .chain_id()
                .and_then(|id| manager.networks().get(id))
            {
                println!("View:  {}", network.tx_url(&receipt.transaction_hash));
            }
            if let Err(e) = manager.refresh_balance().await {
                warn!("Balance refresh failed: {}", e);
            }
            print_session(manager, config).await;
            Ok(())
        }
        Err(e) if e.is_user_rejection() => {
            println!("Transaction rejected in wallet.");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::from(e)),
    };

    manager.disconnect().await;
    result
}

async fn print_session(manager: &WalletSessionManager, config: &Config) {
    let session = manager.session().await;
    let chain = session.chain_id();
    let network = chain.and_then(|id| manager.networks().get(id));

    println!("\n=== SESSION ===\n");
    println!("State:   {}", manager.state().await);
    println!("Address: {}", session.address().unwrap_or("-"));
    match (chain, network) {
        (Some(id), Some(network)) => println!("Chain:   {} ({})", network.name, id),
        (Some(id), None) => println!("Chain:   {} (not configured)", id),
        _ => println!("Chain:   -"),
    }
    println!(
        "Balance: {} {}",
        session.balance(),
        network
            .map(|n| n.native_currency.symbol.as_str())
            .unwrap_or("ETH")
    );
    if session.is_connected() && !manager.is_supported_network().await {
        println!(
            "\nNote: this chain is not supported; run `rampwool switch {}` to move to the default chain",
            config.session.default_chain_id
        );
    }
    println!();
}

fn format_timestamp(secs: U256) -> String {
    let secs = u64::try_from(secs).ok().and_then(|s| i64::try_from(s).ok());
    secs.and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

/// Parse a chain id given as decimal or 0x-hex
pub fn parse_chain_arg(s: &str) -> std::result::Result<u64, String> {
    parse_quantity(s).map_err(|e| e.to_string())
}
