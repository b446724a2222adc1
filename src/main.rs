//! Runnable engine with simulated players against the in-memory ledger.
//!
//! Useful for soak-testing round timing and watching the lifecycle in logs;
//! real deployments embed [`altitude::Engine`] behind a transport instead.

use altitude::{
    AccountLedger, ConfigLoader, Engine, EngineResult, InMemoryAccountLedger, Phase,
};
use clap::Parser;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "altitude", about = "Provably fair crash game round engine")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Number of simulated players
    #[arg(long, default_value_t = 4)]
    players: u32,

    /// Starting balance per simulated player, in minor units
    #[arg(long, default_value_t = 100_000)]
    bankroll: u64,
}

#[tokio::main]
async fn main() -> EngineResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut loader = ConfigLoader::new();
    if let Some(ref path) = args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    let accounts = Arc::new(InMemoryAccountLedger::new());
    for i in 0..args.players {
        accounts.open_account(format!("player-{}", i), args.bankroll);
    }

    let ledger: Arc<dyn AccountLedger> = accounts.clone();
    let engine = Arc::new(Engine::start(config, ledger)?);
    tracing::info!(players = args.players, "engine started");

    for i in 0..args.players {
        let engine = engine.clone();
        tokio::spawn(simulate_player(engine, format!("player-{}", i)));
    }

    let status_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            let status = status_engine.current_round();
            tracing::info!(
                round_id = status.round_id,
                phase = ?status.phase,
                multiplier = status.current_multiplier,
                "round status"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    tracing::info!("shutting down");

    for (account, stats) in engine.top_winners(10) {
        tracing::info!(
            account = %account,
            wins = stats.wins,
            losses = stats.losses,
            total_won = stats.total_won,
            biggest_multiplier = stats.biggest_multiplier,
            "final standings"
        );
    }

    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.shutdown().await,
        Err(_) => tracing::warn!("engine still shared; exiting without clean shutdown"),
    }
    Ok(())
}

/// One simulated player: bets during each betting window, then either rides
/// an auto-cashout target or cashes out manually at a personal goal.
async fn simulate_player(engine: Arc<Engine>, account: String) {
    let mut open_bet = None;
    let mut manual_goal = 0.0;
    let mut interval = tokio::time::interval(Duration::from_millis(100));

    loop {
        interval.tick().await;
        let status = engine.current_round();

        match status.phase {
            Phase::Betting if open_bet.is_none() => {
                let (stake, target, goal) = {
                    let mut rng = rand::thread_rng();
                    let stake = rng.gen_range(10..=500);
                    let target = rng
                        .gen_bool(0.5)
                        .then(|| (rng.gen_range(110..=500) as f64) / 100.0);
                    let goal = (rng.gen_range(120..=800) as f64) / 100.0;
                    (stake, target, goal)
                };
                match engine.place_bet(account.clone(), stake, target).await {
                    Ok(bet_id) => {
                        open_bet = Some((status.round_id, bet_id, target.is_none()));
                        manual_goal = goal;
                    }
                    Err(e) => tracing::debug!(account = %account, error = %e, "bet rejected"),
                }
            }
            Phase::Flight => {
                if let Some((round_id, bet_id, manual)) = open_bet {
                    if round_id == status.round_id
                        && manual
                        && status.current_multiplier >= manual_goal
                    {
                        match engine.cashout(bet_id).await {
                            Ok(payout) => {
                                tracing::debug!(account = %account, payout, "cashed out");
                                open_bet = None;
                            }
                            Err(e) => {
                                tracing::debug!(account = %account, error = %e, "cashout failed");
                                open_bet = None;
                            }
                        }
                    }
                }
            }
            Phase::Crashed | Phase::Settled | Phase::Voided => {
                if let Some((round_id, _, _)) = open_bet {
                    if round_id == status.round_id {
                        open_bet = None;
                    }
                }
            }
            _ => {}
        }

        // Forget bets from rounds that have been replaced.
        if let Some((round_id, _, _)) = open_bet {
            if round_id != status.round_id {
                open_bet = None;
            }
        }
    }
}
