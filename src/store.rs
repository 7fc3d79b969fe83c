//! Typed record persistence over the key/value store.
//!
//! Each record family lives under its own key prefix with secondary index
//! rows (time-ordered per-player ledgers and scans, per-day spin counters,
//! the scan replay hash, the redemption-code lookup). Writers append rows to
//! a batch owned by the caller so a whole commit lands atomically; readers
//! are plain functions over prefix/range scans.
//!
//! Index keys embed big-endian millisecond timestamps so lexicographic key
//! order is chronological order.

use crate::errors::{FairspinResult, StorageError};
use crate::models::{
    Campaign, Player, PlayerPrize, Prize, ScanSession, SpinRecord, SuspiciousActivityRecord,
    TokenTransaction, TokenTransactionKind,
};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SCAN_HISTORY_LIMIT: usize = 10_000;

// ---------------------------------------------------------------------------
// Key builders
// ---------------------------------------------------------------------------

fn player_key(id: Uuid) -> Vec<u8> {
    format!("player:rec:{}", id).into_bytes()
}

fn campaign_key(id: Uuid) -> Vec<u8> {
    format!("campaign:rec:{}", id).into_bytes()
}

fn prize_key(id: Uuid) -> Vec<u8> {
    format!("prize:rec:{}", id).into_bytes()
}

fn prize_campaign_index_key(campaign_id: Uuid, prize_id: Uuid) -> Vec<u8> {
    format!("prize:by_campaign:{}:{}", campaign_id, prize_id).into_bytes()
}

fn spin_key(id: Uuid) -> Vec<u8> {
    format!("spin:rec:{}", id).into_bytes()
}

fn spin_daily_index_key(
    campaign_id: Uuid,
    player_id: Uuid,
    day: &str,
    spin_id: Uuid,
) -> Vec<u8> {
    format!("spin:daily:{}:{}:{}:{}", campaign_id, player_id, day, spin_id).into_bytes()
}

fn spin_daily_prefix(campaign_id: Uuid, player_id: Uuid, day: &str) -> Vec<u8> {
    format!("spin:daily:{}:{}:{}:", campaign_id, player_id, day).into_bytes()
}

fn spin_player_index_key(player_id: Uuid, at: DateTime<Utc>, spin_id: Uuid) -> Vec<u8> {
    timed_key(&format!("spin:by_player:{}:", player_id), at, spin_id)
}

fn spin_player_prefix(player_id: Uuid) -> Vec<u8> {
    format!("spin:by_player:{}:", player_id).into_bytes()
}

fn tx_key(id: Uuid) -> Vec<u8> {
    format!("tokentx:rec:{}", id).into_bytes()
}

fn tx_player_index_key(player_id: Uuid, at: DateTime<Utc>, tx_id: Uuid) -> Vec<u8> {
    timed_key(&format!("tokentx:by_player:{}:", player_id), at, tx_id)
}

fn tx_player_prefix(player_id: Uuid) -> Vec<u8> {
    format!("tokentx:by_player:{}:", player_id).into_bytes()
}

fn scan_key(id: Uuid) -> Vec<u8> {
    format!("scan:rec:{}", id).into_bytes()
}

fn scan_hash_key(session_hash: &str) -> Vec<u8> {
    format!("scan:hash:{}", session_hash).into_bytes()
}

fn scan_player_index_key(player_id: Uuid, at: DateTime<Utc>, scan_id: Uuid) -> Vec<u8> {
    timed_key(&format!("scan:by_player:{}:", player_id), at, scan_id)
}

fn scan_player_prefix(player_id: Uuid) -> Vec<u8> {
    format!("scan:by_player:{}:", player_id).into_bytes()
}

fn scan_latest_key(player_id: Uuid) -> Vec<u8> {
    format!("scan:latest:{}", player_id).into_bytes()
}

fn player_prize_key(id: Uuid) -> Vec<u8> {
    format!("pprize:rec:{}", id).into_bytes()
}

fn redemption_code_key(code: &str) -> Vec<u8> {
    format!("pprize:code:{}", code).into_bytes()
}

fn suspicious_key(id: Uuid) -> Vec<u8> {
    format!("suspect:rec:{}", id).into_bytes()
}

/// prefix | timestamp_ms(be) | record id
fn timed_key(prefix: &str, at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8 + 36);
    key.extend_from_slice(prefix.as_bytes());
    key.extend_from_slice(&(at.timestamp_millis() as u64).to_be_bytes());
    key.extend_from_slice(id.to_string().as_bytes());
    key
}

fn timed_bound(prefix: &[u8], at: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&(at.timestamp_millis() as u64).to_be_bytes());
    key
}

pub fn day_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d").to_string()
}

// ---------------------------------------------------------------------------
// Index row payloads
// ---------------------------------------------------------------------------

/// Ledger index row: enough to run window sums without loading full records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxSummary {
    pub amount: i64,
    pub kind: TokenTransactionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<Uuid>,
}

/// Scan index row: location and identity signals for the fraud checks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanPoint {
    pub scanned_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SpinSummary {
    won: bool,
}

fn encode<T: Serialize>(value: &T) -> FairspinResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("encode failed: {}", e)).into())
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8], what: &str) -> FairspinResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::CorruptedData(format!("failed to decode {}: {}", what, e)).into()
    })
}

// ---------------------------------------------------------------------------
// Batch writers
// ---------------------------------------------------------------------------

pub fn append_player(items: &mut Vec<(Vec<u8>, Vec<u8>)>, player: &Player) -> FairspinResult<()> {
    items.push((player_key(player.id), encode(player)?));
    Ok(())
}

pub fn append_campaign(
    items: &mut Vec<(Vec<u8>, Vec<u8>)>,
    campaign: &Campaign,
) -> FairspinResult<()> {
    items.push((campaign_key(campaign.id), encode(campaign)?));
    Ok(())
}

pub fn append_prize(items: &mut Vec<(Vec<u8>, Vec<u8>)>, prize: &Prize) -> FairspinResult<()> {
    items.push((prize_key(prize.id), encode(prize)?));
    items.push((
        prize_campaign_index_key(prize.campaign_id, prize.id),
        Vec::new(),
    ));
    Ok(())
}

pub fn append_spin(
    items: &mut Vec<(Vec<u8>, Vec<u8>)>,
    spin: &SpinRecord,
) -> FairspinResult<()> {
    items.push((spin_key(spin.id), encode(spin)?));
    items.push((
        spin_daily_index_key(
            spin.campaign_id,
            spin.player_id,
            &day_bucket(spin.created_at),
            spin.id,
        ),
        Vec::new(),
    ));
    let summary = SpinSummary {
        won: spin.prize_id.is_some(),
    };
    items.push((
        spin_player_index_key(spin.player_id, spin.created_at, spin.id),
        encode(&summary)?,
    ));
    Ok(())
}

pub fn append_transaction(
    items: &mut Vec<(Vec<u8>, Vec<u8>)>,
    tx: &TokenTransaction,
) -> FairspinResult<()> {
    items.push((tx_key(tx.id), encode(tx)?));
    let summary = TxSummary {
        amount: tx.amount,
        kind: tx.kind,
        business_id: tx.business_id,
    };
    items.push((
        tx_player_index_key(tx.player_id, tx.created_at, tx.id),
        encode(&summary)?,
    ));
    Ok(())
}

pub fn append_scan(
    items: &mut Vec<(Vec<u8>, Vec<u8>)>,
    scan: &ScanSession,
) -> FairspinResult<()> {
    items.push((scan_key(scan.id), encode(scan)?));
    items.push((
        scan_hash_key(&scan.session_hash),
        scan.id.to_string().into_bytes(),
    ));
    let point = ScanPoint {
        scanned_at: scan.scanned_at,
        latitude: scan.latitude,
        longitude: scan.longitude,
        device_fingerprint: scan.device_fingerprint.clone(),
        ip_address: scan.ip_address.clone(),
    };
    items.push((
        scan_player_index_key(scan.player_id, scan.scanned_at, scan.id),
        encode(&point)?,
    ));
    items.push((scan_latest_key(scan.player_id), encode(&point)?));
    Ok(())
}

pub fn append_player_prize(
    items: &mut Vec<(Vec<u8>, Vec<u8>)>,
    prize: &PlayerPrize,
) -> FairspinResult<()> {
    items.push((player_prize_key(prize.id), encode(prize)?));
    items.push((
        redemption_code_key(&prize.redemption_code),
        prize.id.to_string().into_bytes(),
    ));
    Ok(())
}

pub fn append_suspicious(
    items: &mut Vec<(Vec<u8>, Vec<u8>)>,
    record: &SuspiciousActivityRecord,
) -> FairspinResult<()> {
    items.push((suspicious_key(record.id), encode(record)?));
    Ok(())
}

// ---------------------------------------------------------------------------
// Point loads
// ---------------------------------------------------------------------------

pub fn load_player(storage: &Storage, id: Uuid) -> FairspinResult<Option<Player>> {
    match storage.get(&player_key(id))? {
        Some(bytes) => Ok(Some(decode(&bytes, "player")?)),
        None => Ok(None),
    }
}

pub fn load_campaign(storage: &Storage, id: Uuid) -> FairspinResult<Option<Campaign>> {
    match storage.get(&campaign_key(id))? {
        Some(bytes) => Ok(Some(decode(&bytes, "campaign")?)),
        None => Ok(None),
    }
}

pub fn load_prize(storage: &Storage, id: Uuid) -> FairspinResult<Option<Prize>> {
    match storage.get(&prize_key(id))? {
        Some(bytes) => Ok(Some(decode(&bytes, "prize")?)),
        None => Ok(None),
    }
}

/// All prizes configured on a campaign, in index order.
pub fn load_campaign_prizes(storage: &Storage, campaign_id: Uuid) -> FairspinResult<Vec<Prize>> {
    let prefix = format!("prize:by_campaign:{}:", campaign_id).into_bytes();
    let rows = storage.scan_prefix(&prefix, usize::MAX)?;
    let mut prizes = Vec::with_capacity(rows.len());
    for (key, _) in rows {
        let id_str = String::from_utf8_lossy(&key[prefix.len()..]).to_string();
        let prize_id = Uuid::parse_str(&id_str).map_err(|_| {
            StorageError::CorruptedData(format!("bad prize index key: {}", id_str))
        })?;
        if let Some(prize) = load_prize(storage, prize_id)? {
            prizes.push(prize);
        }
    }
    Ok(prizes)
}

pub fn load_spin(storage: &Storage, id: Uuid) -> FairspinResult<Option<SpinRecord>> {
    match storage.get(&spin_key(id))? {
        Some(bytes) => Ok(Some(decode(&bytes, "spin record")?)),
        None => Ok(None),
    }
}

pub fn load_scan(storage: &Storage, id: Uuid) -> FairspinResult<Option<ScanSession>> {
    match storage.get(&scan_key(id))? {
        Some(bytes) => Ok(Some(decode(&bytes, "scan session")?)),
        None => Ok(None),
    }
}

pub fn load_player_prize(storage: &Storage, id: Uuid) -> FairspinResult<Option<PlayerPrize>> {
    match storage.get(&player_prize_key(id))? {
        Some(bytes) => Ok(Some(decode(&bytes, "player prize")?)),
        None => Ok(None),
    }
}

pub fn load_suspicious(
    storage: &Storage,
    id: Uuid,
) -> FairspinResult<Option<SuspiciousActivityRecord>> {
    match storage.get(&suspicious_key(id))? {
        Some(bytes) => Ok(Some(decode(&bytes, "suspicious activity record")?)),
        None => Ok(None),
    }
}

/// The single permitted mutation on a suspicion record: the review flip.
pub fn mark_suspicious_reviewed(storage: &Storage, id: Uuid) -> FairspinResult<()> {
    let mut record = load_suspicious(storage, id)?
        .ok_or_else(|| StorageError::NotFound(format!("suspicious record {}", id)))?;
    record.reviewed = true;
    storage.put(&suspicious_key(id), &encode(&record)?)
}

// ---------------------------------------------------------------------------
// Lookups over indexes
// ---------------------------------------------------------------------------

pub fn find_scan_id_by_hash(storage: &Storage, session_hash: &str) -> FairspinResult<Option<Uuid>> {
    match storage.get(&scan_hash_key(session_hash))? {
        Some(bytes) => {
            let id_str = String::from_utf8_lossy(&bytes).to_string();
            let id = Uuid::parse_str(&id_str).map_err(|_| {
                StorageError::CorruptedData(format!("bad scan hash value: {}", id_str))
            })?;
            Ok(Some(id))
        }
        None => Ok(None),
    }
}

pub fn find_player_prize_by_code(
    storage: &Storage,
    code: &str,
) -> FairspinResult<Option<PlayerPrize>> {
    match storage.get(&redemption_code_key(code))? {
        Some(bytes) => {
            let id_str = String::from_utf8_lossy(&bytes).to_string();
            let id = Uuid::parse_str(&id_str).map_err(|_| {
                StorageError::CorruptedData(format!("bad redemption code value: {}", id_str))
            })?;
            load_player_prize(storage, id)
        }
        None => Ok(None),
    }
}

pub fn load_latest_scan_point(
    storage: &Storage,
    player_id: Uuid,
) -> FairspinResult<Option<ScanPoint>> {
    match storage.get(&scan_latest_key(player_id))? {
        Some(bytes) => Ok(Some(decode(&bytes, "latest scan point")?)),
        None => Ok(None),
    }
}

/// Scan points for the player with `from <= scanned_at < to`.
pub fn scan_points_in_window(
    storage: &Storage,
    player_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> FairspinResult<Vec<ScanPoint>> {
    let prefix = scan_player_prefix(player_id);
    let rows = storage.scan_range(&timed_bound(&prefix, from), &timed_bound(&prefix, to))?;
    let mut points = Vec::with_capacity(rows.len().min(SCAN_HISTORY_LIMIT));
    for (_, value) in rows.into_iter().take(SCAN_HISTORY_LIMIT) {
        points.push(decode(&value, "scan point")?);
    }
    Ok(points)
}

/// Spins committed today (UTC day of `at`) for the player on the campaign.
pub fn count_spins_on_day(
    storage: &Storage,
    campaign_id: Uuid,
    player_id: Uuid,
    at: DateTime<Utc>,
) -> FairspinResult<usize> {
    storage.count_prefix(&spin_daily_prefix(campaign_id, player_id, &day_bucket(at)))
}

/// (total spins, won spins) for the player with `from <= created_at < to`.
pub fn spin_stats_in_window(
    storage: &Storage,
    player_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> FairspinResult<(u32, u32)> {
    let prefix = spin_player_prefix(player_id);
    let rows = storage.scan_range(&timed_bound(&prefix, from), &timed_bound(&prefix, to))?;
    let mut total = 0u32;
    let mut won = 0u32;
    for (_, value) in rows {
        let summary: SpinSummary = decode(&value, "spin summary")?;
        total += 1;
        if summary.won {
            won += 1;
        }
    }
    Ok((total, won))
}

/// Signed sum of ledger entries with `from <= created_at < to`, filtered by
/// `filter` over the index summaries.
pub fn sum_transactions_in_window<F>(
    storage: &Storage,
    player_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    mut filter: F,
) -> FairspinResult<i64>
where
    F: FnMut(&TxSummary) -> bool,
{
    let prefix = tx_player_prefix(player_id);
    let rows = storage.scan_range(&timed_bound(&prefix, from), &timed_bound(&prefix, to))?;
    let mut sum = 0i64;
    for (_, value) in rows {
        let summary: TxSummary = decode(&value, "transaction summary")?;
        if filter(&summary) {
            sum += summary.amount;
        }
    }
    Ok(sum)
}

/// Signed sum of the player's entire ledger history. This is the
/// independently checkable counterpart of the mutable balance field.
pub fn sum_all_transactions(storage: &Storage, player_id: Uuid) -> FairspinResult<i64> {
    let prefix = tx_player_prefix(player_id);
    let rows = storage.scan_prefix(&prefix, usize::MAX)?;
    let mut sum = 0i64;
    for (_, value) in rows {
        let summary: TxSummary = decode(&value, "transaction summary")?;
        sum += summary.amount;
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use chrono::Duration;

    fn temp_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path(), &StorageConfig::default()).unwrap();
        (dir, storage)
    }

    fn write(storage: &Storage, items: Vec<(Vec<u8>, Vec<u8>)>) {
        storage.batch_write(&items).unwrap();
    }

    #[test]
    fn player_roundtrip() {
        let (_dir, storage) = temp_storage();
        let player = Player::new("ada");
        let mut items = Vec::new();
        append_player(&mut items, &player).unwrap();
        write(&storage, items);

        let loaded = load_player(&storage, player.id).unwrap().unwrap();
        assert_eq!(loaded, player);
        assert!(load_player(&storage, Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn campaign_prizes_listed_through_index() {
        let (_dir, storage) = temp_storage();
        let campaign_id = Uuid::new_v4();
        let mut items = Vec::new();
        for i in 0..3 {
            let prize = Prize {
                id: Uuid::new_v4(),
                campaign_id,
                name: format!("prize-{}", i),
                win_probability: 0.1,
                total_quantity: 10,
                remaining_quantity: 10,
                is_active: true,
            };
            append_prize(&mut items, &prize).unwrap();
        }
        write(&storage, items);

        let prizes = load_campaign_prizes(&storage, campaign_id).unwrap();
        assert_eq!(prizes.len(), 3);
        assert!(load_campaign_prizes(&storage, Uuid::new_v4())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn transaction_window_sums_respect_bounds_and_filters() {
        let (_dir, storage) = temp_storage();
        let player_id = Uuid::new_v4();
        let business = Uuid::new_v4();
        let now = Utc::now();

        let entries = [
            (10, TokenTransactionKind::Earned, Some(business), now - Duration::hours(2)),
            (20, TokenTransactionKind::Earned, None, now - Duration::minutes(30)),
            (-5, TokenTransactionKind::Spent, None, now - Duration::minutes(10)),
            (7, TokenTransactionKind::Bonus, None, now + Duration::hours(1)),
        ];
        let mut items = Vec::new();
        for (amount, kind, business_id, at) in entries {
            let tx = TokenTransaction {
                id: Uuid::new_v4(),
                player_id,
                amount,
                kind,
                business_id,
                scan_id: None,
                spin_id: None,
                created_at: at,
            };
            append_transaction(&mut items, &tx).unwrap();
        }
        write(&storage, items);

        let last_hour = sum_transactions_in_window(
            &storage,
            player_id,
            now - Duration::hours(1),
            now,
            |s| s.kind.counts_as_earning(),
        )
        .unwrap();
        assert_eq!(last_hour, 20);

        let business_sum = sum_transactions_in_window(
            &storage,
            player_id,
            now - Duration::hours(3),
            now,
            |s| s.business_id == Some(business),
        )
        .unwrap();
        assert_eq!(business_sum, 10);

        assert_eq!(sum_all_transactions(&storage, player_id).unwrap(), 32);
    }

    #[test]
    fn scan_hash_lookup_and_latest_point() {
        let (_dir, storage) = temp_storage();
        let scan = ScanSession {
            id: Uuid::new_v4(),
            player_id: Uuid::new_v4(),
            business_id: Uuid::new_v4(),
            latitude: 51.5,
            longitude: -0.12,
            session_hash: "abc123".to_string(),
            tokens_awarded: 10,
            device_fingerprint: Some("dev-1".to_string()),
            ip_address: None,
            scanned_at: Utc::now(),
        };
        let mut items = Vec::new();
        append_scan(&mut items, &scan).unwrap();
        write(&storage, items);

        assert_eq!(
            find_scan_id_by_hash(&storage, "abc123").unwrap(),
            Some(scan.id)
        );
        assert!(find_scan_id_by_hash(&storage, "other").unwrap().is_none());

        let latest = load_latest_scan_point(&storage, scan.player_id)
            .unwrap()
            .unwrap();
        assert_eq!(latest.latitude, 51.5);
    }

    #[test]
    fn daily_spin_counter_buckets_by_utc_day() {
        let (_dir, storage) = temp_storage();
        let campaign_id = Uuid::new_v4();
        let player_id = Uuid::new_v4();
        let now = Utc::now();

        let mut items = Vec::new();
        for offset in [Duration::zero(), Duration::minutes(5), Duration::days(1)] {
            let spin = SpinRecord {
                id: Uuid::new_v4(),
                player_id,
                campaign_id,
                prize_id: None,
                tokens_spent: 5,
                seed: "00".repeat(8),
                draw_value: 0.5,
                created_at: now + offset,
            };
            append_spin(&mut items, &spin).unwrap();
        }
        write(&storage, items);

        let today = count_spins_on_day(&storage, campaign_id, player_id, now).unwrap();
        let tomorrow =
            count_spins_on_day(&storage, campaign_id, player_id, now + Duration::days(1))
                .unwrap();
        assert_eq!(today, 2);
        assert_eq!(tomorrow, 1);
    }

    #[test]
    fn redemption_code_lookup() {
        let (_dir, storage) = temp_storage();
        let ticket = PlayerPrize {
            id: Uuid::new_v4(),
            player_id: Uuid::new_v4(),
            prize_id: Uuid::new_v4(),
            spin_id: Uuid::new_v4(),
            redemption_code: "QX7M-4KPD".to_string(),
            expires_at: Utc::now() + Duration::days(30),
            redeemed: false,
            redeemed_at: None,
            created_at: Utc::now(),
        };
        let mut items = Vec::new();
        append_player_prize(&mut items, &ticket).unwrap();
        write(&storage, items);

        let found = find_player_prize_by_code(&storage, "QX7M-4KPD")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, ticket.id);
        assert!(find_player_prize_by_code(&storage, "NOPE-CODE")
            .unwrap()
            .is_none());
    }

    #[test]
    fn suspicious_review_flip() {
        let (_dir, storage) = temp_storage();
        let record = SuspiciousActivityRecord {
            id: Uuid::new_v4(),
            player_id: Uuid::new_v4(),
            kind: crate::models::SuspiciousActivityKind::CompositeRisk,
            severity: crate::models::Severity::Medium,
            risk_score: 55.0,
            details: serde_json::json!({"scan_burst": 25.0}),
            reviewed: false,
            created_at: Utc::now(),
        };
        let mut items = Vec::new();
        append_suspicious(&mut items, &record).unwrap();
        write(&storage, items);

        mark_suspicious_reviewed(&storage, record.id).unwrap();
        let loaded = load_suspicious(&storage, record.id).unwrap().unwrap();
        assert!(loaded.reviewed);
    }
}
