use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hedgebot_core::config::AppConfig;
use hedgebot_core::ConfigLoader;
use hedgebot_exchange_sim::SimVenue;
use hedgebot_orchestrator::{
    AccountEvent, AccountHandle, AccountRegistry, AccountSnapshot, AccountState,
};
use hedgebot_recovery::LevelId;
use rust_decimal::Decimal;
use tokio::sync::broadcast::error::RecvError;

const SETTLE_WAIT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "hedgebot")]
#[command(about = "Hedged corridor trading with layered loss recovery", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted paper session for every configured account
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Hedgebot.toml")]
        config: String,
        /// Outcome script: W (corridor win), L (breakout loss), F (failed
        /// pair); repeats when exhausted
        #[arg(short, long, default_value = "WLW")]
        script: String,
        /// Gross payout per unit staked
        #[arg(long, default_value = "1.2")]
        payout_ratio: Decimal,
        /// Entry signals to feed before the session is cut off
        #[arg(long, default_value_t = 50)]
        max_pairs: usize,
    },
    /// Validate configuration and print the resolved hierarchy
    CheckConfig {
        /// Config file path
        #[arg(short, long, default_value = "config/Hedgebot.toml")]
        config: String,
        /// Print the merged configuration as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the level-id arithmetic for a hierarchy without trading
    ExplainLevels {
        /// Config file path
        #[arg(short, long, default_value = "config/Hedgebot.toml")]
        config: String,
        /// Deficit to cascade through the layers
        #[arg(long, default_value = "100")]
        amount: Decimal,
        /// Explain one level id (e.g. "1.2.1") instead of the cascade
        #[arg(long)]
        level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Run {
            config,
            script,
            payout_ratio,
            max_pairs,
        } => {
            run_paper_session(&config, &script, payout_ratio, max_pairs).await?;
        }
        Commands::CheckConfig { config, json } => {
            run_check_config(&config, json)?;
        }
        Commands::ExplainLevels {
            config,
            amount,
            level,
        } => {
            run_explain_levels(&config, amount, level.as_deref())?;
        }
    }

    Ok(())
}

async fn run_paper_session(
    config_path: &str,
    script: &str,
    payout_ratio: Decimal,
    max_pairs: usize,
) -> Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;
    if config.accounts.is_empty() {
        anyhow::bail!("no accounts configured");
    }

    tracing::info!(
        accounts = config.accounts.len(),
        script,
        payout_ratio = %payout_ratio,
        max_pairs,
        "starting scripted paper session"
    );

    let registry = AccountRegistry::new();
    let mut sessions = Vec::new();
    for account in config.accounts.clone() {
        let venue = SimVenue::new(script, payout_ratio)?;
        let account_id = account.account_id.clone();
        let handle = registry.spawn_account(&config, account, venue).await;
        sessions.push(tokio::spawn(async move {
            let outcome = drive_session(&handle, max_pairs).await;
            (account_id, handle, outcome)
        }));
    }

    for session in sessions {
        let (account_id, handle, outcome) = session.await?;
        if let Err(e) = outcome {
            tracing::error!(account = %account_id, error = %e, "session driver stopped early");
        }
        match handle.get_snapshot().await {
            Ok(snapshot) => print_session_summary(&snapshot),
            Err(e) => {
                tracing::error!(account = %account_id, error = %e, "account actor unavailable");
            }
        }
    }

    registry.shutdown_all().await;
    Ok(())
}

/// Feeds entry signals one at a time, waiting for each pair to resolve
/// before the next, until the session leaves the running state or the
/// signal budget runs out.
async fn drive_session(handle: &AccountHandle, max_pairs: usize) -> Result<()> {
    let mut events = handle.subscribe_events();
    handle.start().await?;

    for _ in 0..max_pairs {
        handle.signal().await?;
        loop {
            match tokio::time::timeout(SETTLE_WAIT, events.recv()).await {
                Ok(Ok(AccountEvent::TradeSettled { .. })) => break,
                Ok(Ok(_)) => {}
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                Ok(Err(RecvError::Closed)) => return Ok(()),
                Err(_) => anyhow::bail!("timed out waiting for the pair to settle"),
            }
        }
        let snapshot = handle.get_snapshot().await?;
        if snapshot.state != AccountState::Running {
            break;
        }
    }

    Ok(())
}

fn print_session_summary(snapshot: &AccountSnapshot) {
    let level = snapshot
        .active_level_id
        .as_ref()
        .map_or_else(|| "root".to_string(), ToString::to_string);
    let next_stake = if snapshot.is_recovery_mode {
        snapshot.dynamic_stake
    } else {
        snapshot.stake
    };

    println!("{}", "=".repeat(64));
    println!("Account {}", snapshot.account_id);
    println!("{}", "-".repeat(64));
    println!("  State:              {:?}", snapshot.state);
    println!("  Active level:       {level}");
    println!("  Campaign profit:    {}", snapshot.total_profit);
    println!("  Recovery mode:      {}", snapshot.is_recovery_mode);
    println!("  Amount to recover:  {}", snapshot.amount_to_recover);
    println!("  Next stake:         {next_stake}");
    println!("{}", "=".repeat(64));
}

fn run_check_config(config_path: &str, json: bool) -> Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Configuration OK");
    println!();
    println!("Accounts ({}):", config.accounts.len());
    for account in &config.accounts {
        println!(
            "  {:<12} profit target {}",
            account.account_id, account.profit_target
        );
    }
    println!();
    println!(
        "Order: {} x {} tick(s), base stake {}, {} recovery attempt(s)",
        config.order.symbol,
        config.order.duration_ticks,
        config.order.base_stake,
        config.order.recovery_attempts
    );
    println!(
        "Base phase:     barrier {}, martingale {}, drawdown {}",
        config.phase1.barrier_offset, config.phase1.martingale_level, config.phase1.max_drawdown
    );
    println!(
        "Recovery phase: barrier {}, martingale {}, drawdown {}",
        config.phase2.barrier_offset, config.phase2.martingale_level, config.phase2.max_drawdown
    );
    println!();
    print_layer_table(&config);

    Ok(())
}

/// Prints each layer's effective parameters: overrides apply at their
/// layer and carry down, exactly as node creation resolves them.
fn print_layer_table(config: &AppConfig) {
    println!("Hierarchy (depth {}):", config.hierarchy.max_depth);
    println!(
        "{:<7} {:>7} {:>10} {:>11} {:>10} {:>9}",
        "Layer", "Levels", "Stake", "Martingale", "Drawdown", "Barrier"
    );

    let mut stake = config.hierarchy.layer_one_stake;
    let mut martingale = config.phase2.martingale_level;
    let mut drawdown = config.phase2.max_drawdown;
    let mut barrier = config.phase2.barrier_offset;
    for layer in 1..=config.hierarchy.max_depth {
        if let Some(overrides) = config.hierarchy.override_for(layer) {
            if let Some(v) = overrides.initial_stake {
                stake = v;
            }
            if let Some(v) = overrides.martingale_level {
                martingale = v;
            }
            if let Some(v) = overrides.max_drawdown {
                drawdown = v;
            }
            if let Some(v) = overrides.barrier_offset {
                barrier = v;
            }
        }
        println!(
            "{:<7} {:>7} {:>10} {:>11} {:>10} {:>9}",
            layer,
            config.hierarchy.levels_for_layer(layer),
            stake,
            martingale,
            drawdown,
            barrier
        );
    }
}

fn run_explain_levels(config_path: &str, amount: Decimal, level: Option<&str>) -> Result<()> {
    let config = ConfigLoader::load_from(config_path)
        .with_context(|| format!("failed to load configuration from {config_path}"))?;

    if let Some(level) = level {
        let id: LevelId = level.parse()?;
        let parent = id.parent().map_or_else(
            || "-".to_string(),
            |p| {
                if p.is_root() {
                    "root".to_string()
                } else {
                    p.to_string()
                }
            },
        );
        println!("Level {id}");
        println!("  Layer:        {}", id.layer());
        println!("  Parent:       {parent}");
        println!("  Next sibling: {}", id.next_sibling());
        println!("  First child:  {}", id.child(1));
        println!(
            "  Layer width:  {} level(s)",
            config.hierarchy.levels_for_layer(id.layer())
        );
        return Ok(());
    }

    println!("Deficit cascade for {amount}:");
    let mut parent = LevelId::top();
    let mut share = amount;
    for layer in 1..=config.hierarchy.max_depth {
        let levels = config.hierarchy.levels_for_layer(layer);
        share = (share / Decimal::from(levels)).round_dp(2);
        let first = parent.child(1);
        let last = parent.child(levels);
        println!("  Layer {layer}: {levels} level(s) x {share}  ({first} .. {last})");
        parent = first;
    }
    println!("Rounded shares can leave a remainder; a parent retargets for it after its children complete.");

    Ok(())
}
