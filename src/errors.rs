//! Error types for the fairspin engine.
//!
//! Gate failures (eligibility, fraud, token limits) are typed reasons so
//! callers can render precise messages; infrastructure failures (store,
//! entropy) propagate as-is and must never be interpreted as "no prize".

use thiserror::Error;

/// Root error type for all fairspin operations
#[derive(Debug, Error)]
pub enum FairspinError {
    /// Malformed input. Not persisted, not retried
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Business-rule gate failed. Reported to the caller, no side effects
    #[error("Spin rejected: {0}")]
    Eligibility(#[from] RejectionReason),

    /// Proof-of-presence scan failed a hard fraud check
    #[error("Scan rejected: {0}")]
    Fraud(#[from] FraudReason),

    /// Token earn/spend limit violated
    #[error("Token limit: {0}")]
    Limit(#[from] LimitViolation),

    /// Redemption ticket could not be claimed
    #[error("Redemption failed: {0}")]
    Redemption(#[from] RedemptionReason),

    /// Durable store unavailable or corrupted. Fatal to the request
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// OS entropy source unavailable. Fatal to the draw, never degraded
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),
}

/// Why a spin request was rejected before any side effect
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectionReason {
    #[error("campaign is not active")]
    CampaignInactive,

    #[error("campaign has not started yet")]
    CampaignNotStarted,

    #[error("campaign has ended")]
    CampaignEnded,

    #[error("player account is not active")]
    PlayerInactive,

    #[error("insufficient tokens: balance {balance}, spin costs {cost}")]
    InsufficientTokens { balance: i64, cost: i64 },

    #[error("daily spin limit of {limit} reached")]
    DailySpinLimitReached { limit: u32 },
}

/// Why a scan was rejected as untrustworthy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FraudReason {
    #[error("duplicate scan submission")]
    ReplayDetected,

    #[error("implied travel speed {speed_kmh:.0} km/h exceeds {max_kmh:.0} km/h")]
    ImpossibleTravel { speed_kmh: f64, max_kmh: f64 },

    #[error("scan frequency {count} reached the cap of {cap} per window")]
    FrequencyExceeded { count: u32, cap: u32 },
}

/// First token-economy limit violated by an earn or spend attempt.
///
/// `remaining` is the capacity left under the violated limit so callers can
/// report it without re-deriving ledger history.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimitViolation {
    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("daily earn limit of {limit} reached ({remaining} remaining)")]
    DailyEarnLimit { limit: i64, remaining: i64 },

    #[error("weekly earn limit of {limit} reached ({remaining} remaining)")]
    WeeklyEarnLimit { limit: i64, remaining: i64 },

    #[error("daily per-business earn limit of {limit} reached ({remaining} remaining)")]
    BusinessDailyLimit { limit: i64, remaining: i64 },

    #[error("balance ceiling of {limit} reached ({remaining} remaining)")]
    MaxBalance { limit: i64, remaining: i64 },

    #[error("daily spending limit of {limit} reached ({remaining} remaining)")]
    DailySpendLimit { limit: i64, remaining: i64 },

    #[error("insufficient balance: {balance} available, {required} required")]
    InsufficientBalance { balance: i64, required: i64 },
}

/// Why a redemption code could not be claimed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RedemptionReason {
    #[error("unknown redemption code")]
    UnknownCode,

    #[error("prize already redeemed")]
    AlreadyRedeemed,

    #[error("redemption code expired")]
    Expired,
}

/// Durable-store failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database open failed: {0}")]
    OpenFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corrupted record: {0}")]
    CorruptedData(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

impl From<rocksdb::Error> for FairspinError {
    fn from(e: rocksdb::Error) -> Self {
        FairspinError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for FairspinError {
    fn from(e: serde_json::Error) -> Self {
        FairspinError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

/// Convenience alias used throughout the crate
pub type FairspinResult<T> = Result<T, FairspinError>;

impl FairspinError {
    /// True for failures a caller may retry with backoff; gate rejections
    /// are final for the submitted request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FairspinError::Storage(_) | FairspinError::Entropy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reasons_render_for_players() {
        let e = FairspinError::Eligibility(RejectionReason::InsufficientTokens {
            balance: 3,
            cost: 5,
        });
        assert!(e.to_string().contains("balance 3"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn limit_violation_reports_remaining() {
        let v = LimitViolation::DailyEarnLimit {
            limit: 100,
            remaining: 12,
        };
        assert!(v.to_string().contains("12 remaining"));
    }

    #[test]
    fn storage_errors_are_retryable() {
        let e = FairspinError::Storage(StorageError::WriteFailed("disk".into()));
        assert!(e.is_retryable());
    }
}
