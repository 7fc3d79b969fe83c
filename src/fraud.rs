//! Proof-of-presence validation.
//!
//! Three hard gates decide whether a scan can award tokens: replay of the
//! same session hash, implausible travel speed since the last located scan,
//! and scan frequency over a trailing window. Separately, pluggable weak
//! signals accumulate a risk score; crossing the threshold files a record
//! for human review without blocking the scan.

use crate::config::FraudConfig;
use crate::errors::{FairspinResult, FraudReason};
use crate::models::{Player, SuspiciousActivityKind, SuspiciousActivityRecord};
use crate::storage::Storage;
use crate::store::{self, ScanPoint};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, info};
use uuid::Uuid;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Deterministic identity of one scan submission. Two submissions with the
/// same player, business, and timestamp hash identically, which is what
/// makes replays detectable.
pub fn session_hash(player_id: Uuid, business_id: Uuid, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(player_id.as_bytes());
    hasher.update(business_id.as_bytes());
    hasher.update(at.timestamp_millis().to_be_bytes());
    hex::encode(hasher.finalize())
}

/// Great-circle distance between two coordinates.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// An unvalidated scan submission.
#[derive(Clone, Debug)]
pub struct ScanCandidate {
    pub player_id: Uuid,
    pub business_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub device_fingerprint: Option<String>,
    pub ip_address: Option<String>,
}

/// A scan that cleared every hard gate.
#[derive(Clone, Debug)]
pub struct ScanAssessment {
    pub session_hash: String,
    pub risk_score: f64,
    /// Present when the score crossed the review threshold. The caller
    /// persists it; the scan itself still goes through.
    pub suspicion: Option<SuspiciousActivityRecord>,
}

/// Everything the weak signals may look at. Assembled once per scan so
/// individual signals stay pure.
pub struct RiskContext<'a> {
    pub player: &'a Player,
    pub candidate: &'a ScanCandidate,
    pub recent_scans: &'a [ScanPoint],
    pub scan_cap: u32,
    pub spins_last_week: u32,
    pub wins_last_week: u32,
    pub disposable_email_domains: &'a [String],
}

pub trait RiskSignal: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> SuspiciousActivityKind;
    /// Contribution to the composite score, 0.0 when the signal is quiet.
    fn score(&self, ctx: &RiskContext<'_>) -> f64;
}

pub struct FraudGuard {
    storage: Storage,
    cfg: FraudConfig,
    signals: Vec<Box<dyn RiskSignal>>,
}

impl FraudGuard {
    pub fn new(storage: Storage, cfg: FraudConfig) -> Self {
        Self {
            storage,
            cfg,
            signals: default_signals(),
        }
    }

    pub fn with_signals(
        storage: Storage,
        cfg: FraudConfig,
        signals: Vec<Box<dyn RiskSignal>>,
    ) -> Self {
        Self {
            storage,
            cfg,
            signals,
        }
    }

    /// Runs the hard gates in order, then the composite scoring. Returns
    /// the assessment on success; any gate failure is a typed rejection and
    /// nothing is persisted here.
    pub fn check_scan(
        &self,
        player: &Player,
        candidate: &ScanCandidate,
    ) -> FairspinResult<ScanAssessment> {
        let hash = session_hash(candidate.player_id, candidate.business_id, candidate.timestamp);
        if store::find_scan_id_by_hash(&self.storage, &hash)?.is_some() {
            info!(player_id = %candidate.player_id, "scan rejected as replay");
            return Err(FraudReason::ReplayDetected.into());
        }

        if let Some(previous) =
            store::load_latest_scan_point(&self.storage, candidate.player_id)?
        {
            self.check_travel_speed(candidate, &previous)?;
        }

        let window_start = candidate.timestamp - Duration::seconds(self.cfg.scan_window_secs);
        let recent =
            store::scan_points_in_window(&self.storage, candidate.player_id, window_start, candidate.timestamp)?;
        if recent.len() as u32 >= self.cfg.max_scans_per_window {
            info!(
                player_id = %candidate.player_id,
                count = recent.len(),
                "scan rejected for frequency"
            );
            return Err(FraudReason::FrequencyExceeded {
                count: recent.len() as u32,
                cap: self.cfg.max_scans_per_window,
            }
            .into());
        }

        let (spins, wins) = store::spin_stats_in_window(
            &self.storage,
            candidate.player_id,
            candidate.timestamp - Duration::days(7),
            candidate.timestamp,
        )?;
        let ctx = RiskContext {
            player,
            candidate,
            recent_scans: &recent,
            scan_cap: self.cfg.max_scans_per_window,
            spins_last_week: spins,
            wins_last_week: wins,
            disposable_email_domains: &self.cfg.disposable_email_domains,
        };
        let (risk_score, suspicion) = self.assess_risk(&ctx);

        Ok(ScanAssessment {
            session_hash: hash,
            risk_score,
            suspicion,
        })
    }

    fn check_travel_speed(
        &self,
        candidate: &ScanCandidate,
        previous: &ScanPoint,
    ) -> FairspinResult<()> {
        let elapsed = candidate.timestamp - previous.scanned_at;
        let elapsed_secs = elapsed.num_seconds();
        // Below the minimum gap the implied speed is all noise.
        if elapsed_secs < self.cfg.min_travel_elapsed_secs {
            return Ok(());
        }
        let distance_km = haversine_km(
            previous.latitude,
            previous.longitude,
            candidate.latitude,
            candidate.longitude,
        );
        let speed_kmh = distance_km / (elapsed_secs as f64 / 3600.0);
        if speed_kmh > self.cfg.max_travel_speed_kmh {
            info!(
                player_id = %candidate.player_id,
                speed_kmh,
                distance_km,
                "scan rejected for impossible travel"
            );
            return Err(FraudReason::ImpossibleTravel {
                speed_kmh,
                max_kmh: self.cfg.max_travel_speed_kmh,
            }
            .into());
        }
        Ok(())
    }

    fn assess_risk(&self, ctx: &RiskContext<'_>) -> (f64, Option<SuspiciousActivityRecord>) {
        let mut total = 0.0;
        let mut contributions = serde_json::Map::new();
        let mut firing: Vec<&dyn RiskSignal> = Vec::new();
        for signal in &self.signals {
            let score = signal.score(ctx);
            if score > 0.0 {
                total += score;
                contributions.insert(signal.name().to_string(), json!(score));
                firing.push(signal.as_ref());
            }
        }
        debug!(player_id = %ctx.candidate.player_id, total, "risk signals evaluated");
        if total < self.cfg.risk_threshold {
            return (total, None);
        }

        let kind = match firing.as_slice() {
            [only] => only.kind(),
            _ => SuspiciousActivityKind::CompositeRisk,
        };
        let record = SuspiciousActivityRecord {
            id: Uuid::new_v4(),
            player_id: ctx.candidate.player_id,
            kind,
            severity: SuspiciousActivityRecord::severity_for(total),
            risk_score: total,
            details: serde_json::Value::Object(contributions),
            reviewed: false,
            created_at: ctx.candidate.timestamp,
        };
        (total, Some(record))
    }
}

pub fn default_signals() -> Vec<Box<dyn RiskSignal>> {
    vec![
        Box::new(ScanBurstSignal),
        Box::new(WinRateSignal),
        Box::new(DisposableIdentitySignal),
        Box::new(DeviceConsistencySignal),
    ]
}

/// Scans bunched into the trailing window, scaled toward the hard cap.
pub struct ScanBurstSignal;

impl RiskSignal for ScanBurstSignal {
    fn name(&self) -> &'static str {
        "scan_burst"
    }

    fn kind(&self) -> SuspiciousActivityKind {
        SuspiciousActivityKind::ScanBurst
    }

    fn score(&self, ctx: &RiskContext<'_>) -> f64 {
        let count = ctx.recent_scans.len() as f64;
        let cap = ctx.scan_cap as f64;
        if count < cap / 2.0 {
            0.0
        } else {
            30.0 * (count / cap).min(1.0)
        }
    }
}

/// A win rate far above any honest distribution, once there is enough
/// history to mean anything.
pub struct WinRateSignal;

impl RiskSignal for WinRateSignal {
    fn name(&self) -> &'static str {
        "win_rate"
    }

    fn kind(&self) -> SuspiciousActivityKind {
        SuspiciousActivityKind::AnomalousWinRate
    }

    fn score(&self, ctx: &RiskContext<'_>) -> f64 {
        if ctx.spins_last_week < 10 {
            return 0.0;
        }
        let rate = ctx.wins_last_week as f64 / ctx.spins_last_week as f64;
        if rate > 0.5 {
            25.0
        } else {
            0.0
        }
    }
}

/// Throwaway email domain on an account created within the last day.
pub struct DisposableIdentitySignal;

impl RiskSignal for DisposableIdentitySignal {
    fn name(&self) -> &'static str {
        "disposable_identity"
    }

    fn kind(&self) -> SuspiciousActivityKind {
        SuspiciousActivityKind::DisposableIdentity
    }

    fn score(&self, ctx: &RiskContext<'_>) -> f64 {
        let Some(email) = ctx.player.email.as_deref() else {
            return 0.0;
        };
        let Some(domain) = email.rsplit('@').next() else {
            return 0.0;
        };
        let disposable = ctx
            .disposable_email_domains
            .iter()
            .any(|d| d.eq_ignore_ascii_case(domain));
        let fresh = ctx.candidate.timestamp - ctx.player.created_at < Duration::days(1);
        if disposable && fresh {
            25.0
        } else if disposable {
            10.0
        } else {
            0.0
        }
    }
}

/// Multiple device fingerprints or IPs for the same player inside the
/// window.
pub struct DeviceConsistencySignal;

impl RiskSignal for DeviceConsistencySignal {
    fn name(&self) -> &'static str {
        "device_consistency"
    }

    fn kind(&self) -> SuspiciousActivityKind {
        SuspiciousActivityKind::DeviceInconsistency
    }

    fn score(&self, ctx: &RiskContext<'_>) -> f64 {
        let mut devices: HashSet<&str> = ctx
            .recent_scans
            .iter()
            .filter_map(|s| s.device_fingerprint.as_deref())
            .collect();
        if let Some(device) = ctx.candidate.device_fingerprint.as_deref() {
            devices.insert(device);
        }
        let mut ips: HashSet<&str> = ctx
            .recent_scans
            .iter()
            .filter_map(|s| s.ip_address.as_deref())
            .collect();
        if let Some(ip) = ctx.candidate.ip_address.as_deref() {
            ips.insert(ip);
        }
        if devices.len() > 2 || ips.len() > 2 {
            20.0
        } else {
            0.0
        }
    }
}
