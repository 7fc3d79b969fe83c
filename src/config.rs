//! Configuration with validation, defaults, and TOML/environment loading.
//!
//! Every operational threshold (inventory levels, fraud limits, token
//! limits) lives here so tuning never requires a rebuild.

use crate::errors::{FairspinError, FairspinResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Top-level engine configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FairspinConfig {
    pub odds: OddsConfig,
    pub fraud: FraudConfig,
    pub limits: LimitsConfig,
    pub spin: SpinConfig,
    pub storage: StorageConfig,
}

/// Inventory-aware odds adjustment parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OddsConfig {
    /// Remaining units at or below which a prize is critically scarce
    pub critical_inventory_threshold: u32,
    /// Remaining units at or below which a prize is running low
    pub low_inventory_threshold: u32,
    /// Multiplier applied at critical scarcity
    pub critical_dampening: f64,
    /// Multiplier applied at low inventory
    pub low_dampening: f64,
    /// Floor for any effective probability
    pub minimum_odds: f64,
    /// Ceiling for any single effective probability
    pub maximum_odds: f64,
    /// Safety ceiling for the summed distribution, leaving headroom for
    /// the implicit "no prize" outcome
    pub distribution_ceiling: f64,
}

impl Default for OddsConfig {
    fn default() -> Self {
        Self {
            critical_inventory_threshold: 5,
            low_inventory_threshold: 20,
            critical_dampening: 0.2,
            low_dampening: 0.5,
            minimum_odds: 0.001,
            maximum_odds: 0.8,
            distribution_ceiling: 0.95,
        }
    }
}

/// Fraud detection thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FraudConfig {
    /// Maximum plausible travel speed between two scans, km/h
    pub max_travel_speed_kmh: f64,
    /// Below this elapsed time the travel check carries too little signal
    /// and is skipped
    pub min_travel_elapsed_secs: i64,
    /// Trailing window for scan frequency throttling, seconds
    pub scan_window_secs: i64,
    /// Scan cap within the trailing window
    pub max_scans_per_window: u32,
    /// Aggregated risk score at which a suspicious-activity record is filed
    pub risk_threshold: f64,
    /// Email domains treated as disposable identity signals
    pub disposable_email_domains: Vec<String>,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            max_travel_speed_kmh: 100.0,
            min_travel_elapsed_secs: 60,
            scan_window_secs: 3600,
            max_scans_per_window: 20,
            risk_threshold: 50.0,
            disposable_email_domains: vec![
                "mailinator.com".to_string(),
                "guerrillamail.com".to_string(),
                "10minutemail.com".to_string(),
            ],
        }
    }
}

/// Token-economy limits. Daily limits use the UTC calendar day; the weekly
/// earn limit uses a rolling 7-day window.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub daily_earn_limit: i64,
    pub weekly_earn_limit: i64,
    pub business_daily_earn_limit: i64,
    pub max_balance: i64,
    pub daily_spend_limit: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily_earn_limit: 100,
            weekly_earn_limit: 500,
            business_daily_earn_limit: 50,
            max_balance: 10_000,
            daily_spend_limit: 500,
        }
    }
}

/// Spin/scan processing parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SpinConfig {
    /// Tokens credited for an accepted scan
    pub tokens_per_scan: i64,
    /// Redemption ticket lifetime from win time, days
    pub prize_expiry_days: i64,
    /// Length of generated redemption codes (excluding separators)
    pub redemption_code_length: usize,
    /// Capacity of the fire-and-forget analytics channel
    pub event_channel_capacity: usize,
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            tokens_per_scan: 10,
            prize_expiry_days: 30,
            redemption_code_length: 8,
            event_channel_capacity: 1024,
        }
    }
}

/// RocksDB storage tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: i32,
    pub target_file_size_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./DB/fairspin_data".to_string(),
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
        }
    }
}

impl FairspinConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> FairspinResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            FairspinError::Validation(format!(
                "cannot read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config: FairspinConfig = toml::from_str(&raw)
            .map_err(|e| FairspinError::Validation(format!("invalid config: {}", e)))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables override file values for the handful of knobs
    /// operators tune most often.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = env::var("FAIRSPIN_DATA_DIR") {
            self.storage.data_dir = dir;
        }
        if let Ok(v) = env::var("FAIRSPIN_RISK_THRESHOLD") {
            if let Ok(parsed) = v.parse() {
                self.fraud.risk_threshold = parsed;
            }
        }
        if let Ok(v) = env::var("FAIRSPIN_MAX_TRAVEL_SPEED_KMH") {
            if let Ok(parsed) = v.parse() {
                self.fraud.max_travel_speed_kmh = parsed;
            }
        }
        if let Ok(v) = env::var("FAIRSPIN_TOKENS_PER_SCAN") {
            if let Ok(parsed) = v.parse() {
                self.spin.tokens_per_scan = parsed;
            }
        }
    }

    /// Validate for logical consistency before wiring up services.
    pub fn validate(&self) -> FairspinResult<()> {
        let odds = &self.odds;
        if !(0.0 < odds.minimum_odds && odds.minimum_odds < odds.maximum_odds) {
            return Err(FairspinError::Validation(
                "minimum_odds must be positive and below maximum_odds".to_string(),
            ));
        }
        if odds.maximum_odds > 1.0 {
            return Err(FairspinError::Validation(
                "maximum_odds must not exceed 1.0".to_string(),
            ));
        }
        if !(0.0 < odds.distribution_ceiling && odds.distribution_ceiling <= 1.0) {
            return Err(FairspinError::Validation(
                "distribution_ceiling must be in (0, 1]".to_string(),
            ));
        }
        if odds.critical_inventory_threshold > odds.low_inventory_threshold {
            return Err(FairspinError::Validation(
                "critical_inventory_threshold must not exceed low_inventory_threshold"
                    .to_string(),
            ));
        }
        if odds.critical_dampening <= 0.0 || odds.low_dampening <= 0.0 {
            return Err(FairspinError::Validation(
                "dampening multipliers must be positive".to_string(),
            ));
        }

        let fraud = &self.fraud;
        if fraud.max_travel_speed_kmh <= 0.0 {
            return Err(FairspinError::Validation(
                "max_travel_speed_kmh must be positive".to_string(),
            ));
        }
        if fraud.scan_window_secs <= 0 || fraud.max_scans_per_window == 0 {
            return Err(FairspinError::Validation(
                "scan frequency window and cap must be positive".to_string(),
            ));
        }

        let limits = &self.limits;
        if limits.daily_earn_limit <= 0
            || limits.weekly_earn_limit <= 0
            || limits.business_daily_earn_limit <= 0
            || limits.max_balance <= 0
            || limits.daily_spend_limit <= 0
        {
            return Err(FairspinError::Validation(
                "token limits must all be positive".to_string(),
            ));
        }
        if limits.daily_earn_limit > limits.weekly_earn_limit {
            return Err(FairspinError::Validation(
                "daily_earn_limit must not exceed weekly_earn_limit".to_string(),
            ));
        }

        if self.spin.tokens_per_scan <= 0 || self.spin.prize_expiry_days <= 0 {
            return Err(FairspinError::Validation(
                "tokens_per_scan and prize_expiry_days must be positive".to_string(),
            ));
        }
        if self.spin.redemption_code_length < 6 {
            return Err(FairspinError::Validation(
                "redemption_code_length must be at least 6".to_string(),
            ));
        }

        Ok(())
    }
}
