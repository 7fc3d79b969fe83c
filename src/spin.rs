//! Top-level orchestration of scans, spins, and redemptions.
//!
//! A request moves Requested -> EligibilityChecked -> Drawn -> Committed,
//! or to Rejected at any gate with a typed reason and no persisted side
//! effects. All side effects of one request land in a single storage batch
//! taken under per-entity async locks, so balances and inventory stay
//! consistent under concurrency. Lock order is always player before prize.

use crate::config::FairspinConfig;
use crate::draw::{DrawSelection, PrizeDrawEngine};
use crate::errors::{
    FairspinError, FairspinResult, RedemptionReason, RejectionReason, StorageError,
};
use crate::events::{AnalyticsEvent, EventBus};
use crate::fraud::{FraudGuard, ScanCandidate};
use crate::ledger::{BalanceReport, TokenLedger};
use crate::models::{
    Campaign, Player, PlayerPrize, Prize, ScanSession, SpinRecord, TokenTransaction,
    TokenTransactionKind,
};
use crate::odds::{OddsEngine, OddsRecommendation};
use crate::rng::RandomSource;
use crate::storage::Storage;
use crate::store;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

// Unambiguous uppercase charset for redemption codes.
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A proof-of-presence submission.
#[derive(Clone, Debug)]
pub struct ScanRequest {
    pub player_id: Uuid,
    pub business_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub qr_payload: String,
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
}

/// Result of an accepted scan.
#[derive(Clone, Debug)]
pub struct ScanReceipt {
    pub scan_id: Uuid,
    pub tokens_awarded: i64,
    pub new_balance: i64,
    pub risk_score: f64,
    pub flagged: bool,
}

/// A won prize as presented to the player.
#[derive(Clone, Debug)]
pub struct WonPrize {
    pub prize_id: Uuid,
    pub name: String,
    pub redemption_code: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a committed spin.
#[derive(Clone, Debug)]
pub struct SpinReceipt {
    pub spin_id: Uuid,
    pub outcome: Option<WonPrize>,
    pub tokens_spent: i64,
    pub new_balance: i64,
}

pub struct SpinOrchestrator {
    storage: Storage,
    cfg: FairspinConfig,
    ledger: TokenLedger,
    odds: OddsEngine,
    draw: PrizeDrawEngine,
    fraud: FraudGuard,
    events: EventBus,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SpinOrchestrator {
    pub fn new(storage: Storage, cfg: FairspinConfig, rng: Arc<dyn RandomSource>) -> Self {
        let ledger = TokenLedger::new(storage.clone(), cfg.limits.clone());
        let odds = OddsEngine::new(cfg.odds.clone());
        let draw = PrizeDrawEngine::new(rng);
        let fraud = FraudGuard::new(storage.clone(), cfg.fraud.clone());
        let events = EventBus::new(cfg.spin.event_channel_capacity);
        Self {
            storage,
            cfg,
            ledger,
            odds,
            draw,
            fraud,
            events,
            locks: DashMap::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn entity_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // -----------------------------------------------------------------
    // Scans
    // -----------------------------------------------------------------

    /// Validates and commits a proof-of-presence scan, crediting tokens.
    pub async fn process_scan(&self, request: ScanRequest) -> FairspinResult<ScanReceipt> {
        if request.qr_payload.trim().is_empty() {
            return Err(FairspinError::Validation("empty qr payload".to_string()));
        }

        let _player_guard = self.entity_lock(request.player_id).lock_owned().await;

        let player = store::load_player(&self.storage, request.player_id)?
            .ok_or_else(|| FairspinError::Validation("unknown player".to_string()))?;
        if !player.is_active {
            return Err(RejectionReason::PlayerInactive.into());
        }

        let candidate = ScanCandidate {
            player_id: request.player_id,
            business_id: request.business_id,
            latitude: request.latitude,
            longitude: request.longitude,
            timestamp: request.timestamp,
            device_fingerprint: request.device_fingerprint.clone(),
            ip_address: request.ip_address.clone(),
        };
        let assessment = self.fraud.check_scan(&player, &candidate)?;

        let award = self.cfg.spin.tokens_per_scan;
        self.ledger
            .validate_earn(&player, award, Some(request.business_id), request.timestamp)?;

        let session = ScanSession {
            id: Uuid::new_v4(),
            player_id: player.id,
            business_id: request.business_id,
            latitude: request.latitude,
            longitude: request.longitude,
            session_hash: assessment.session_hash.clone(),
            tokens_awarded: award,
            device_fingerprint: request.device_fingerprint,
            ip_address: request.ip_address,
            scanned_at: request.timestamp,
        };
        let tx = TokenTransaction {
            id: Uuid::new_v4(),
            player_id: player.id,
            amount: award,
            kind: TokenTransactionKind::Earned,
            business_id: Some(request.business_id),
            scan_id: Some(session.id),
            spin_id: None,
            created_at: request.timestamp,
        };
        let mut credited = player.clone();
        credited.token_balance += award;

        let mut items = Vec::new();
        store::append_scan(&mut items, &session)?;
        store::append_transaction(&mut items, &tx)?;
        store::append_player(&mut items, &credited)?;
        let flagged = if let Some(record) = &assessment.suspicion {
            warn!(
                player_id = %player.id,
                score = record.risk_score,
                kind = ?record.kind,
                "scan flagged for review"
            );
            store::append_suspicious(&mut items, record)?;
            true
        } else {
            false
        };
        self.storage.batch_write(&items)?;

        info!(
            player_id = %player.id,
            business_id = %request.business_id,
            tokens = award,
            "scan accepted"
        );
        self.events.publish(AnalyticsEvent::ScanAccepted {
            scan_id: session.id,
            player_id: player.id,
            business_id: request.business_id,
            tokens_awarded: award,
            at: request.timestamp,
        });

        Ok(ScanReceipt {
            scan_id: session.id,
            tokens_awarded: award,
            new_balance: credited.token_balance,
            risk_score: assessment.risk_score,
            flagged,
        })
    }

    // -----------------------------------------------------------------
    // Spins
    // -----------------------------------------------------------------

    /// Runs one spin end to end. Gate failures reject with a reason and
    /// leave no trace; a committed spin debits tokens, records the draw,
    /// and reserves inventory for a win, all in one batch.
    pub async fn process_spin(
        &self,
        player_id: Uuid,
        campaign_id: Uuid,
    ) -> FairspinResult<SpinReceipt> {
        let now = Utc::now();
        debug!(%player_id, %campaign_id, "spin requested");

        let campaign = store::load_campaign(&self.storage, campaign_id)?
            .ok_or_else(|| FairspinError::Validation("unknown campaign".to_string()))?;

        let _player_guard = self.entity_lock(player_id).lock_owned().await;

        let player = store::load_player(&self.storage, player_id)?
            .ok_or_else(|| FairspinError::Validation("unknown player".to_string()))?;
        self.check_eligibility(&player, &campaign, now)?;
        debug!(%player_id, %campaign_id, "spin eligibility cleared");

        let cost = campaign.token_cost_per_spin;
        let (selection, won, _prize_guard) = self.draw_with_reservation(&campaign).await?;
        debug!(%player_id, winner = ?selection.prize_id, "spin drawn");

        let spin = SpinRecord {
            id: Uuid::new_v4(),
            player_id,
            campaign_id,
            prize_id: won.as_ref().map(|p| p.id),
            tokens_spent: cost,
            seed: selection.draw.seed_hex(),
            draw_value: selection.draw.unit,
            created_at: now,
        };
        let tx = TokenTransaction {
            id: Uuid::new_v4(),
            player_id,
            amount: -cost,
            kind: TokenTransactionKind::Spent,
            business_id: Some(campaign.business_id),
            scan_id: None,
            spin_id: Some(spin.id),
            created_at: now,
        };
        let mut debited = player.clone();
        debited.token_balance -= cost;

        let mut items = Vec::new();
        store::append_spin(&mut items, &spin)?;
        store::append_transaction(&mut items, &tx)?;
        store::append_player(&mut items, &debited)?;

        let outcome = if let Some(prize) = &won {
            let mut reserved = prize.clone();
            reserved.remaining_quantity -= 1;
            store::append_prize(&mut items, &reserved)?;

            let ticket = PlayerPrize {
                id: Uuid::new_v4(),
                player_id,
                prize_id: prize.id,
                spin_id: spin.id,
                redemption_code: self.unique_redemption_code()?,
                expires_at: now + Duration::days(self.cfg.spin.prize_expiry_days),
                redeemed: false,
                redeemed_at: None,
                created_at: now,
            };
            store::append_player_prize(&mut items, &ticket)?;
            Some(WonPrize {
                prize_id: prize.id,
                name: prize.name.clone(),
                redemption_code: ticket.redemption_code,
                expires_at: ticket.expires_at,
            })
        } else {
            None
        };

        self.storage.batch_write(&items)?;
        info!(
            %player_id,
            %campaign_id,
            spin_id = %spin.id,
            won = outcome.is_some(),
            "spin committed"
        );
        self.events.publish(AnalyticsEvent::SpinCommitted {
            spin_id: spin.id,
            player_id,
            campaign_id,
            prize_id: spin.prize_id,
            tokens_spent: cost,
            at: now,
        });

        Ok(SpinReceipt {
            spin_id: spin.id,
            outcome,
            tokens_spent: cost,
            new_balance: debited.token_balance,
        })
    }

    fn check_eligibility(
        &self,
        player: &Player,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> FairspinResult<()> {
        if !campaign.is_active {
            return Err(RejectionReason::CampaignInactive.into());
        }
        if now < campaign.start_date {
            return Err(RejectionReason::CampaignNotStarted.into());
        }
        if now > campaign.end_date {
            return Err(RejectionReason::CampaignEnded.into());
        }
        if !player.is_active {
            return Err(RejectionReason::PlayerInactive.into());
        }

        let spins_today =
            store::count_spins_on_day(&self.storage, campaign.id, player.id, now)?;
        if spins_today as u32 >= campaign.max_spins_per_day {
            return Err(RejectionReason::DailySpinLimitReached {
                limit: campaign.max_spins_per_day,
            }
            .into());
        }

        let cost = campaign.token_cost_per_spin;
        if player.token_balance < cost {
            return Err(RejectionReason::InsufficientTokens {
                balance: player.token_balance,
                cost,
            }
            .into());
        }
        self.ledger.validate_spend(player, cost, now)?;
        Ok(())
    }

    /// Draws against a fresh inventory snapshot and locks the won prize.
    /// If another spin drains the prize between the draw and the lock, the
    /// draw is retried once against refreshed odds; a second conflict
    /// commits the spin as a no-prize outcome rather than failing it.
    async fn draw_with_reservation(
        &self,
        campaign: &Campaign,
    ) -> FairspinResult<(DrawSelection, Option<Prize>, Option<OwnedMutexGuard<()>>)> {
        let mut last_selection = None;
        for attempt in 0..2 {
            let prizes = store::load_campaign_prizes(&self.storage, campaign.id)?;
            let distribution = self.odds.effective_distribution(&prizes);
            let selection = self.draw.draw(&distribution)?;

            let Some(prize_id) = selection.prize_id else {
                return Ok((selection, None, None));
            };
            let guard = self.entity_lock(prize_id).lock_owned().await;
            let prize = store::load_prize(&self.storage, prize_id)?.ok_or_else(|| {
                StorageError::NotFound(format!("prize {}", prize_id))
            })?;
            if prize.is_available() {
                return Ok((selection, Some(prize), Some(guard)));
            }
            warn!(%prize_id, attempt, "prize drained between draw and reservation");
            last_selection = Some(selection);
        }
        // Both attempts lost the inventory race.
        let selection = last_selection.ok_or_else(|| {
            FairspinError::Validation("draw retry bookkeeping failed".to_string())
        })?;
        Ok((
            DrawSelection {
                prize_id: None,
                draw: selection.draw,
            },
            None,
            None,
        ))
    }

    fn unique_redemption_code(&self) -> FairspinResult<String> {
        let len = self.cfg.spin.redemption_code_length;
        for _ in 0..8 {
            let code: String = {
                let mut rng = rand::thread_rng();
                (0..len)
                    .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
                    .collect()
            };
            if store::find_player_prize_by_code(&self.storage, &code)?.is_none() {
                return Ok(code);
            }
        }
        Err(FairspinError::Validation(
            "could not allocate a unique redemption code".to_string(),
        ))
    }

    // -----------------------------------------------------------------
    // Redemption and admin flips
    // -----------------------------------------------------------------

    /// Redeems a won prize by its code, exactly once, before expiry.
    pub async fn redeem_prize(&self, code: &str) -> FairspinResult<PlayerPrize> {
        let now = Utc::now();
        let found = store::find_player_prize_by_code(&self.storage, code)?
            .ok_or(RedemptionReason::UnknownCode)?;

        let _player_guard = self.entity_lock(found.player_id).lock_owned().await;

        // Reload under the lock so concurrent redemptions serialize.
        let mut ticket = store::load_player_prize(&self.storage, found.id)?
            .ok_or(RedemptionReason::UnknownCode)?;
        if ticket.redeemed {
            return Err(RedemptionReason::AlreadyRedeemed.into());
        }
        if ticket.is_expired_at(now) {
            return Err(RedemptionReason::Expired.into());
        }

        ticket.redeemed = true;
        ticket.redeemed_at = Some(now);
        let mut items = Vec::new();
        store::append_player_prize(&mut items, &ticket)?;
        self.storage.batch_write(&items)?;

        info!(player_prize_id = %ticket.id, "prize redeemed");
        self.events.publish(AnalyticsEvent::PrizeRedeemed {
            player_prize_id: ticket.id,
            player_id: ticket.player_id,
            prize_id: ticket.prize_id,
            at: now,
        });
        Ok(ticket)
    }

    /// Adds stock to a prize, raising both the total and remaining counts.
    pub async fn restock_prize(&self, prize_id: Uuid, additional: u32) -> FairspinResult<Prize> {
        if additional == 0 {
            return Err(FairspinError::Validation(
                "restock amount must be positive".to_string(),
            ));
        }
        let _guard = self.entity_lock(prize_id).lock_owned().await;
        let mut prize = store::load_prize(&self.storage, prize_id)?
            .ok_or_else(|| StorageError::NotFound(format!("prize {}", prize_id)))?;
        prize.total_quantity += additional;
        prize.remaining_quantity += additional;
        let mut items = Vec::new();
        store::append_prize(&mut items, &prize)?;
        self.storage.batch_write(&items)?;
        info!(%prize_id, additional, "prize restocked");
        Ok(prize)
    }

    pub fn mark_reviewed(&self, record_id: Uuid) -> FairspinResult<()> {
        store::mark_suspicious_reviewed(&self.storage, record_id)
    }

    pub fn verify_balance(&self, player_id: Uuid) -> FairspinResult<BalanceReport> {
        self.ledger.verify_balance(player_id)
    }

    /// Live inventory and odds position for every prize on a campaign.
    pub fn odds_report(&self, campaign_id: Uuid) -> FairspinResult<Vec<OddsRecommendation>> {
        let prizes = store::load_campaign_prizes(&self.storage, campaign_id)?;
        Ok(prizes.iter().map(|p| self.odds.recommendation(p)).collect())
    }

    // -----------------------------------------------------------------
    // Provisioning, used by setup tooling and tests
    // -----------------------------------------------------------------

    pub fn put_player(&self, player: &Player) -> FairspinResult<()> {
        let mut items = Vec::new();
        store::append_player(&mut items, player)?;
        self.storage.batch_write(&items)
    }

    pub fn put_campaign(&self, campaign: &Campaign) -> FairspinResult<()> {
        let mut items = Vec::new();
        store::append_campaign(&mut items, campaign)?;
        self.storage.batch_write(&items)
    }

    pub fn put_prize(&self, prize: &Prize) -> FairspinResult<()> {
        let mut items = Vec::new();
        store::append_prize(&mut items, prize)?;
        self.storage.batch_write(&items)
    }

    /// Credits purchased tokens. Purchases bypass the earning caps but
    /// still respect the balance ceiling.
    pub async fn credit_purchase(&self, player_id: Uuid, amount: i64) -> FairspinResult<i64> {
        if amount <= 0 {
            return Err(crate::errors::LimitViolation::NonPositiveAmount.into());
        }
        let _guard = self.entity_lock(player_id).lock_owned().await;
        let mut player = store::load_player(&self.storage, player_id)?
            .ok_or_else(|| FairspinError::Validation("unknown player".to_string()))?;
        let limit = self.cfg.limits.max_balance;
        if player.token_balance + amount > limit {
            return Err(crate::errors::LimitViolation::MaxBalance {
                limit,
                remaining: (limit - player.token_balance).max(0),
            }
            .into());
        }
        player.token_balance += amount;
        let tx = TokenTransaction {
            id: Uuid::new_v4(),
            player_id,
            amount,
            kind: TokenTransactionKind::Purchased,
            business_id: None,
            scan_id: None,
            spin_id: None,
            created_at: Utc::now(),
        };
        let mut items = Vec::new();
        store::append_transaction(&mut items, &tx)?;
        store::append_player(&mut items, &player)?;
        self.storage.batch_write(&items)?;
        Ok(player.token_balance)
    }
}
