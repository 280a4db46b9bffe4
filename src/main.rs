//! OmniYield - Cross-Chain Yield Vault Engine
//!
//! Run with: cargo run -- demo
//!
//! The demo wires the engine task to a simulated relay and two in-memory
//! adapters, then walks a handful of users through deposit, harvest,
//! withdraw and rebalance while the relay injects the configured failures.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{keccak256, Address, U256};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use console::style;
use futures::future::join_all;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omniyield::adapter::SimulatedAdapter;
use omniyield::coordinator::actor;
use omniyield::registry::ProtocolParams;
use omniyield::transport::{ChannelTransport, RelayConfig, SimulatedRelay};
use omniyield::types::{DomainId, ManualClock, ProtocolId};
use omniyield::{Config, EngineHandle, OperationCoordinator};

const BASE: DomainId = 8453;
const ARBITRUM: DomainId = 42161;

/// 30 days
const DEMO_EPOCH_SECS: u64 = 30 * 24 * 3600;

#[derive(Parser)]
#[command(name = "omniyield", version, about = "Cross-chain yield vault engine")]
struct Cli {
    /// TOML config file (defaults to environment / .env)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a simulated multi-user session against two protocols
    Demo {
        /// Number of depositing users
        #[arg(long, default_value_t = 3)]
        users: u8,
    },
    /// Print the effective configuration
    ShowConfig {
        /// Also dump it as TOML
        #[arg(long = "toml")]
        as_toml: bool,
    },
}

fn print_banner() {
    println!();
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!(
        "{}",
        style(" 🌐 OMNIYIELD - Cross-Chain Yield Vault Engine").cyan().bold()
    );
    println!(
        "{}",
        style("    Registry | Position Ledger | Operation Saga").cyan()
    );
    println!(
        "{}",
        style("═══════════════════════════════════════════════════════════════").cyan()
    );
    println!();
}

fn derived(label: &str) -> Address {
    Address::from_word(keccak256(label.as_bytes()))
}

fn demo_protocol(name: &str, domain: DomainId, apy_bps: u32) -> ProtocolParams {
    ProtocolParams {
        adapter: derived(&format!("adapter-{}", name)),
        token: derived(&format!("token-{}", domain)),
        domain,
        apy_bps,
        name: name.to_string(),
        min_deposit: U256::from(1_000u64),
        max_deposit: U256::from(10_000_000_000u64),
    }
}

/// Poll until every operation has reached a terminal state
async fn wait_for_settlement(handle: &EngineHandle, step: Duration) -> Result<()> {
    for _ in 0..200 {
        if handle.open_operations().await? == 0 {
            return Ok(());
        }
        tokio::time::sleep(step).await;
    }
    let open = handle.open_operations().await?;
    warn!("⏳ {} operations still open after waiting", open);
    Ok(())
}

async fn run_demo(config: Config, users: u8) -> Result<()> {
    let clock = Arc::new(ManualClock::starting_now());
    let (transport, calls) = ChannelTransport::new();
    let mut engine = OperationCoordinator::new(&config, Box::new(transport), clock.clone())?;

    // =============================================
    // PHASE 1: REGISTRY
    // =============================================
    println!("{}", style("═══ PHASE 1: REGISTRY ═══").blue().bold());

    let admin = config.admin_address;
    let executor = derived("relay-executor");
    let mut relay = SimulatedRelay::new(
        executor,
        config.gateway_address,
        RelayConfig::from_config(&config),
    );

    let mut protocol_ids: Vec<ProtocolId> = Vec::new();
    for (name, domain, apy) in [("Protocol A", BASE, 500u32), ("Protocol B", ARBITRUM, 800u32)] {
        engine.set_domain_asset(admin, domain, derived(&format!("settlement-{}", domain)))?;
        let params = demo_protocol(name, domain, apy);
        relay.register_adapter(
            params.adapter,
            Box::new(SimulatedAdapter::new(
                name,
                params.token,
                apy,
                executor,
                clock.clone(),
                config.seconds_per_year,
            )),
        );
        let id = engine.register_protocol(admin, params)?;
        println!(
            "{} #{} {} on domain {} at {} bps",
            style("✓").green(),
            id,
            name,
            domain,
            apy
        );
        protocol_ids.push(id);
    }
    let (protocol_a, protocol_b) = (protocol_ids[0], protocol_ids[1]);

    let (handle, engine_task) = actor::spawn(
        engine,
        config.command_channel_capacity,
        Duration::from_secs(config.stale_sweep_interval_secs),
    );
    let relay_task = tokio::spawn(relay.run(calls, handle.clone()));
    let step = Duration::from_millis(config.relay_latency_ms.max(5));

    // =============================================
    // PHASE 2: DEPOSITS
    // =============================================
    println!();
    println!("{}", style("═══ PHASE 2: CONCURRENT DEPOSITS ═══").blue().bold());

    let vault = config.vault_address;
    let accounts: Vec<Address> = (1..=users.max(1))
        .map(|i| derived(&format!("user-{}", i)))
        .collect();

    let deposits = accounts.iter().enumerate().map(|(i, user)| {
        let handle = handle.clone();
        let user = *user;
        let amount = U256::from(100_000u64 * (i as u64 + 1));
        async move {
            // Alternate between the explicit route and best-APY routing
            if i % 2 == 0 {
                handle.deposit(vault, user, protocol_a, amount).await.map(|id| (protocol_a, id))
            } else {
                handle.deposit_best(vault, user, amount, 0).await
            }
        }
    });
    for (user, result) in accounts.iter().zip(join_all(deposits).await) {
        match result {
            Ok((protocol_id, id)) => info!(
                "📥 {:?} -> protocol #{} (operation {})",
                user,
                protocol_id,
                omniyield::types::short_id(&id)
            ),
            Err(e) => error!("Deposit for {:?} rejected: {}", user, e),
        }
    }
    wait_for_settlement(&handle, step).await?;

    // =============================================
    // PHASE 3: TIME PASSES
    // =============================================
    println!();
    println!("{}", style("═══ PHASE 3: HARVEST / WITHDRAW / REBALANCE ═══").blue().bold());
    clock.advance(DEMO_EPOCH_SECS);
    println!("{} Advanced clock by 30 days", style("✓").green());

    let first = accounts[0];
    match handle.harvest(vault, first, protocol_a).await {
        Ok((_, harvest)) => info!("🌾 Harvested {} for {:?}", harvest.amount, first),
        Err(e) => warn!("Harvest skipped: {}", e),
    }

    if let Some(&second) = accounts.get(1) {
        match handle.withdraw(vault, second, protocol_b, U256::from(50_000u64)).await {
            Ok((_, w)) => info!(
                "📤 Withdrew {} ({} principal, {} yield) for {:?}",
                w.amount, w.principal_removed, w.yield_removed, second
            ),
            Err(e) => warn!("Withdrawal skipped: {}", e),
        }
    }

    if let Some(&third) = accounts.get(2) {
        if let Some(position) = handle.position(third, protocol_a).await? {
            match handle
                .rebalance(vault, third, protocol_a, protocol_b, position.principal)
                .await
            {
                Ok(id) => info!(
                    "🔁 Rebalancing {} from #{} to #{} ({})",
                    position.principal,
                    protocol_a,
                    protocol_b,
                    omniyield::types::short_id(&id)
                ),
                Err(e) => warn!("Rebalance skipped: {}", e),
            }
        }
    }
    wait_for_settlement(&handle, step).await?;

    // =============================================
    // SUMMARY
    // =============================================
    handle.shutdown().await?;
    let engine = engine_task
        .await
        .map_err(|e| eyre!("engine task panicked: {}", e))?;

    print_summary(&engine, &accounts);

    // Dropping the engine closes the outbound channel
    drop(engine);
    let relay = relay_task
        .await
        .map_err(|e| eyre!("relay task panicked: {}", e))?;
    let stats = relay.stats();
    println!(
        "Relay: {} delivered | {} reverted | {} aborted",
        style(stats.delivered).green(),
        style(stats.reverted).yellow(),
        style(stats.aborted).red()
    );

    Ok(())
}

fn print_summary(engine: &OperationCoordinator, accounts: &[Address]) {
    println!();
    println!("{}", style("═══ SUMMARY ═══").green().bold());

    println!("Protocols:");
    for protocol in engine.registry().protocols() {
        println!(
            "  #{} {:<12} domain {:<6} apy {:>5} bps  tvl {}",
            protocol.id, protocol.name, protocol.domain, protocol.apy_bps, protocol.tvl
        );
    }

    println!("Positions:");
    for user in accounts {
        for (protocol_id, position) in engine.ledger().positions_of(*user) {
            if !position.active {
                continue;
            }
            let claimable = engine
                .claimable_yield(*user, protocol_id)
                .unwrap_or(U256::ZERO);
            println!(
                "  {:?} #{}: principal {} claimable {}",
                user, protocol_id, position.principal, claimable
            );
        }
    }

    let mut statuses: BTreeMap<String, usize> = BTreeMap::new();
    for op in engine.operations() {
        *statuses.entry(op.status.to_string()).or_insert(0) += 1;
    }
    println!("Operations:");
    for (status, count) in &statuses {
        println!("  {:<12} {}", status, count);
    }
    println!("Events recorded: {}", engine.events().len());
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("omniyield=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    print_banner();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // The simulated session runs with placeholder roles when none are configured
    if matches!(cli.command, Command::Demo { .. }) {
        config = config.with_demo_roles();
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        error!("Please check your .env file");
        return Err(e);
    }

    config.print_summary();
    println!();

    match cli.command {
        Command::Demo { users } => run_demo(config, users).await?,
        Command::ShowConfig { as_toml } => {
            if as_toml {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}
