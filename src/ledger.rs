//! Token economy enforcement.
//!
//! Earning and spending limits are checked against sums over the persisted
//! transaction history, not the cached balance field, so the checks stay
//! correct even if the balance ever drifts. `verify_balance` is the audit
//! that detects such drift.

use crate::config::LimitsConfig;
use crate::errors::{FairspinResult, LimitViolation, StorageError};
use crate::models::Player;
use crate::storage::Storage;
use crate::store;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::warn;
use uuid::Uuid;

/// Outcome of an independent balance audit for one player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BalanceReport {
    pub player_id: Uuid,
    pub stored_balance: i64,
    pub ledger_sum: i64,
}

impl BalanceReport {
    pub fn is_consistent(&self) -> bool {
        self.stored_balance == self.ledger_sum
    }
}

#[derive(Clone)]
pub struct TokenLedger {
    storage: Storage,
    cfg: LimitsConfig,
}

impl TokenLedger {
    pub fn new(storage: Storage, cfg: LimitsConfig) -> Self {
        Self { storage, cfg }
    }

    /// Checks an earn of `amount` tokens against every earning limit, in
    /// order: amount positive, daily cap, rolling weekly cap, per-business
    /// daily cap, balance ceiling. The first violated limit is reported
    /// with the remaining capacity under it.
    pub fn validate_earn(
        &self,
        player: &Player,
        amount: i64,
        business_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> FairspinResult<()> {
        if amount <= 0 {
            return Err(LimitViolation::NonPositiveAmount.into());
        }

        let day_start = start_of_utc_day(now);
        let earned_today = store::sum_transactions_in_window(
            &self.storage,
            player.id,
            day_start,
            now,
            |tx| tx.kind.counts_as_earning(),
        )?;
        if earned_today + amount > self.cfg.daily_earn_limit {
            return Err(LimitViolation::DailyEarnLimit {
                limit: self.cfg.daily_earn_limit,
                remaining: (self.cfg.daily_earn_limit - earned_today).max(0),
            }
            .into());
        }

        let earned_this_week = store::sum_transactions_in_window(
            &self.storage,
            player.id,
            now - Duration::days(7),
            now,
            |tx| tx.kind.counts_as_earning(),
        )?;
        if earned_this_week + amount > self.cfg.weekly_earn_limit {
            return Err(LimitViolation::WeeklyEarnLimit {
                limit: self.cfg.weekly_earn_limit,
                remaining: (self.cfg.weekly_earn_limit - earned_this_week).max(0),
            }
            .into());
        }

        if let Some(business_id) = business_id {
            let earned_here_today = store::sum_transactions_in_window(
                &self.storage,
                player.id,
                day_start,
                now,
                |tx| tx.kind.counts_as_earning() && tx.business_id == Some(business_id),
            )?;
            if earned_here_today + amount > self.cfg.business_daily_earn_limit {
                return Err(LimitViolation::BusinessDailyLimit {
                    limit: self.cfg.business_daily_earn_limit,
                    remaining: (self.cfg.business_daily_earn_limit - earned_here_today).max(0),
                }
                .into());
            }
        }

        if player.token_balance + amount > self.cfg.max_balance {
            return Err(LimitViolation::MaxBalance {
                limit: self.cfg.max_balance,
                remaining: (self.cfg.max_balance - player.token_balance).max(0),
            }
            .into());
        }

        Ok(())
    }

    /// Checks a spend of `amount` tokens: amount positive, daily spend cap,
    /// sufficient balance.
    pub fn validate_spend(
        &self,
        player: &Player,
        amount: i64,
        now: DateTime<Utc>,
    ) -> FairspinResult<()> {
        if amount <= 0 {
            return Err(LimitViolation::NonPositiveAmount.into());
        }

        let spent_today = -store::sum_transactions_in_window(
            &self.storage,
            player.id,
            start_of_utc_day(now),
            now,
            |tx| tx.amount < 0,
        )?;
        if spent_today + amount > self.cfg.daily_spend_limit {
            return Err(LimitViolation::DailySpendLimit {
                limit: self.cfg.daily_spend_limit,
                remaining: (self.cfg.daily_spend_limit - spent_today).max(0),
            }
            .into());
        }

        if player.token_balance < amount {
            return Err(LimitViolation::InsufficientBalance {
                balance: player.token_balance,
                required: amount,
            }
            .into());
        }

        Ok(())
    }

    /// Recomputes the player's balance from the full transaction history
    /// and compares it to the stored balance field.
    pub fn verify_balance(&self, player_id: Uuid) -> FairspinResult<BalanceReport> {
        let player = store::load_player(&self.storage, player_id)?
            .ok_or_else(|| StorageError::NotFound(format!("player {}", player_id)))?;
        let ledger_sum = store::sum_all_transactions(&self.storage, player_id)?;
        let report = BalanceReport {
            player_id,
            stored_balance: player.token_balance,
            ledger_sum,
        };
        if !report.is_consistent() {
            warn!(
                %player_id,
                stored = report.stored_balance,
                ledger = report.ledger_sum,
                "player balance diverged from transaction history"
            );
        }
        Ok(report)
    }
}

/// Midnight UTC of the day containing `at`.
pub fn start_of_utc_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}
