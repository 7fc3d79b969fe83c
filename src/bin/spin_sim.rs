//! Load simulator for the prize draw engine.
//!
//! Seeds a campaign with a few prizes and a pool of players, fires
//! concurrent scans and spins at the orchestrator, then audits the
//! invariants: every balance matches its ledger, and no prize was won more
//! times than it had stock.

use chrono::{Duration, Utc};
use clap::Parser;
use fairspin::config::FairspinConfig;
use fairspin::errors::FairspinError;
use fairspin::models::{Campaign, Player, Prize};
use fairspin::rng::OsEntropySource;
use fairspin::spin::{ScanRequest, SpinOrchestrator};
use fairspin::storage::Storage;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "spin_sim", about = "Concurrent prize draw simulation")]
struct Args {
    /// Number of concurrent players
    #[arg(long, default_value_t = 8)]
    players: usize,

    /// Spin attempts per player
    #[arg(long, default_value_t = 25)]
    spins: usize,

    /// Optional TOML config file
    #[arg(long)]
    config: Option<String>,

    /// Keep the database directory after the run
    #[arg(long, default_value_t = false)]
    keep_data: bool,
}

#[tokio::main]
async fn main() -> Result<(), FairspinError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => FairspinConfig::load(path)?,
        None => {
            let mut cfg = FairspinConfig::default();
            cfg.apply_env_overrides();
            cfg.validate()?;
            cfg
        }
    };
    if args.config.is_none() {
        let scratch = std::env::temp_dir().join(format!("fairspin-sim-{}", Uuid::new_v4()));
        cfg.storage.data_dir = scratch.to_string_lossy().into_owned();
    }
    info!(data_dir = %cfg.storage.data_dir, "opening store");

    let storage = Storage::open(&cfg.storage.data_dir, &cfg.storage)?;
    let data_dir = cfg.storage.data_dir.clone();
    let orch = Arc::new(SpinOrchestrator::new(
        storage,
        cfg,
        Arc::new(OsEntropySource),
    ));

    let campaign = Campaign {
        id: Uuid::new_v4(),
        business_id: Uuid::new_v4(),
        name: "simulated launch".to_string(),
        is_active: true,
        start_date: Utc::now() - Duration::hours(1),
        end_date: Utc::now() + Duration::days(1),
        token_cost_per_spin: 5,
        max_spins_per_day: 1_000,
    };
    orch.put_campaign(&campaign)?;

    let prize_specs = [("grand", 0.05, 3u32), ("voucher", 0.25, 40), ("sticker", 0.5, 400)];
    let mut stock = HashMap::new();
    for (name, odds, quantity) in prize_specs {
        let prize = Prize {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            name: name.to_string(),
            win_probability: odds,
            total_quantity: quantity,
            remaining_quantity: quantity,
            is_active: true,
        };
        stock.insert(prize.id, quantity);
        orch.put_prize(&prize)?;
    }

    let mut players = Vec::new();
    for i in 0..args.players {
        let player = Player::new(format!("sim-player-{}", i));
        orch.put_player(&player)?;
        orch.credit_purchase(player.id, (args.spins as i64) * campaign.token_cost_per_spin)
            .await?;
        players.push(player);
    }

    let mut handles = Vec::new();
    for player in &players {
        let orch = Arc::clone(&orch);
        let player_id = player.id;
        let business_id = campaign.business_id;
        let campaign_id = campaign.id;
        let spins = args.spins;
        handles.push(tokio::spawn(async move {
            // One scan first, like a real visit.
            let scan = orch
                .process_scan(ScanRequest {
                    player_id,
                    business_id,
                    latitude: 51.5074,
                    longitude: -0.1278,
                    timestamp: Utc::now(),
                    qr_payload: format!("sim:{}", business_id),
                    device_fingerprint: Some(format!("sim-device-{}", player_id)),
                    ip_address: None,
                })
                .await;
            if let Err(e) = scan {
                warn!(%player_id, error = %e, "scan rejected");
            }

            let mut wins: Vec<Uuid> = Vec::new();
            let mut rejections = 0usize;
            for _ in 0..spins {
                match orch.process_spin(player_id, campaign_id).await {
                    Ok(receipt) => {
                        if let Some(won) = receipt.outcome {
                            wins.push(won.prize_id);
                        }
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(%player_id, error = %e, "retryable failure, stopping early");
                        break;
                    }
                    Err(_) => rejections += 1,
                }
            }
            (player_id, wins, rejections)
        }));
    }

    let mut wins_by_prize: HashMap<Uuid, u32> = HashMap::new();
    let mut total_spins_won = 0usize;
    let mut total_rejections = 0usize;
    for handle in handles {
        let (player_id, wins, rejections) = handle.await.expect("simulation task panicked");
        total_spins_won += wins.len();
        total_rejections += rejections;
        for prize_id in wins {
            *wins_by_prize.entry(prize_id).or_default() += 1;
        }
        let report = orch.verify_balance(player_id)?;
        if !report.is_consistent() {
            error!(
                %player_id,
                stored = report.stored_balance,
                ledger = report.ledger_sum,
                "balance audit FAILED"
            );
        }
    }

    let mut oversold = false;
    for (prize_id, won) in &wins_by_prize {
        let initial = stock.get(prize_id).copied().unwrap_or(0);
        if *won > initial {
            error!(%prize_id, won = *won, initial, "inventory OVERSOLD");
            oversold = true;
        }
    }

    info!(
        players = args.players,
        wins = total_spins_won,
        rejections = total_rejections,
        "simulation finished"
    );
    for rec in orch.odds_report(campaign.id)? {
        info!(
            prize_id = %rec.prize_id,
            level = ?rec.level,
            inventory_percent = format!("{:.1}", rec.inventory_percent),
            effective_odds = format!("{:.4}", rec.effective_odds),
            "final odds position"
        );
    }

    if !args.keep_data && args.config.is_none() {
        let _ = std::fs::remove_dir_all(&data_dir);
    }
    if oversold {
        std::process::exit(1);
    }
    Ok(())
}
