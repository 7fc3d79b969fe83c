//! Canonical domain records shared across the engine.
//!
//! Balance and inventory fields on these records are mutated only inside the
//! orchestrator's commit step; everything else is written once and read many
//! times.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Player account. Balance changes only through the token ledger, always
/// paired with a `TokenTransaction` row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub token_balance: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            email: None,
            token_balance: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}

/// Prize-wheel campaign owned by a business. Read-only to the engine apart
/// from prize inventory updates at commit time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: Uuid,
    pub business_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub token_cost_per_spin: i64,
    pub max_spins_per_day: u32,
}

/// A prize on a campaign's wheel.
///
/// `remaining_quantity` is decremented exactly once per won spin and never
/// goes negative; that decrement happens only inside the commit step.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prize {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub name: String,
    /// Configured win probability in [0, 1]; effective odds are derived
    /// from this and live inventory, never written back.
    pub win_probability: f64,
    pub total_quantity: u32,
    pub remaining_quantity: u32,
    pub is_active: bool,
}

impl Prize {
    /// A prize can be drawn iff it is toggled on and has stock left.
    pub fn is_available(&self) -> bool {
        self.is_active && self.remaining_quantity > 0
    }

    pub fn inventory_fraction(&self) -> f64 {
        if self.total_quantity == 0 {
            return 0.0;
        }
        self.remaining_quantity as f64 / self.total_quantity as f64
    }
}

/// Immutable audit row written for every committed spin, winning or not.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SpinRecord {
    pub id: Uuid,
    pub player_id: Uuid,
    pub campaign_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize_id: Option<Uuid>,
    pub tokens_spent: i64,
    /// Hex-encoded seed bytes the uniform draw was derived from.
    pub seed: String,
    /// The uniform draw value in [0, 1) the seed produced.
    pub draw_value: f64,
    pub created_at: DateTime<Utc>,
}

/// Redemption ticket produced only when a spin wins.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlayerPrize {
    pub id: Uuid,
    pub player_id: Uuid,
    pub prize_id: Uuid,
    pub spin_id: Uuid,
    pub redemption_code: String,
    pub expires_at: DateTime<Utc>,
    pub redeemed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PlayerPrize {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Kind of ledger entry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenTransactionKind {
    Earned,
    Spent,
    Bonus,
    Purchased,
}

impl fmt::Display for TokenTransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenTransactionKind::Earned => write!(f, "earned"),
            TokenTransactionKind::Spent => write!(f, "spent"),
            TokenTransactionKind::Bonus => write!(f, "bonus"),
            TokenTransactionKind::Purchased => write!(f, "purchased"),
        }
    }
}

impl TokenTransactionKind {
    /// Kinds that count against the earning limits.
    pub fn counts_as_earning(&self) -> bool {
        matches!(self, TokenTransactionKind::Earned | TokenTransactionKind::Bonus)
    }
}

/// Signed ledger entry. The player's balance always equals the sum of these
/// amounts, which makes the balance field independently checkable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TokenTransaction {
    pub id: Uuid,
    pub player_id: Uuid,
    /// Positive for credits, negative for debits.
    pub amount: i64,
    pub kind: TokenTransactionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spin_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Accepted proof-of-presence record. Created once per accepted scan and
/// never mutated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScanSession {
    pub id: Uuid,
    pub player_id: Uuid,
    pub business_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    /// Deterministic hash of (player, business, timestamp); duplicate
    /// submissions are detected through this.
    pub session_hash: String,
    pub tokens_awarded: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub scanned_at: DateTime<Utc>,
}

/// Category of suspicious behaviour a risk signal detected
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuspiciousActivityKind {
    ScanBurst,
    AnomalousWinRate,
    DisposableIdentity,
    DeviceInconsistency,
    CompositeRisk,
}

/// Severity bands derived from the aggregated risk score
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Append-only record filed for staff review. Filing one never blocks the
/// player's action by itself.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SuspiciousActivityRecord {
    pub id: Uuid,
    pub player_id: Uuid,
    pub kind: SuspiciousActivityKind,
    pub severity: Severity,
    pub risk_score: f64,
    /// Per-signal contributions and supporting detail.
    pub details: serde_json::Value,
    pub reviewed: bool,
    pub created_at: DateTime<Utc>,
}

impl SuspiciousActivityRecord {
    pub fn severity_for(score: f64) -> Severity {
        if score >= 80.0 {
            Severity::High
        } else if score >= 50.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}
