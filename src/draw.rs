//! Prize selection from an odds distribution.
//!
//! Selection walks the distribution in key order accumulating odds; the
//! first prize whose cumulative sum reaches the uniform draw wins. A draw
//! beyond the total distribution mass is a no-prize outcome, so the
//! distribution never needs to sum to one.

use crate::errors::{FairspinError, FairspinResult};
use crate::models::{Campaign, Prize, SpinRecord};
use crate::rng::{DrawValue, RandomSource};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Outcome of a single draw against a distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawSelection {
    /// `None` means the draw landed in the no-prize remainder.
    pub prize_id: Option<Uuid>,
    pub draw: DrawValue,
}

pub struct PrizeDrawEngine {
    rng: Arc<dyn RandomSource>,
}

impl PrizeDrawEngine {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self { rng }
    }

    /// Draws once and resolves the winner, if any.
    pub fn draw(&self, distribution: &BTreeMap<Uuid, f64>) -> FairspinResult<DrawSelection> {
        let draw = self.rng.draw()?;
        let prize_id = Self::select(distribution, draw.unit);
        debug!(unit = draw.unit, winner = ?prize_id, "prize draw resolved");
        Ok(DrawSelection { prize_id, draw })
    }

    /// Pure selection rule: first prize in key order whose cumulative odds
    /// reach the unit value.
    pub fn select(distribution: &BTreeMap<Uuid, f64>, unit: f64) -> Option<Uuid> {
        let mut cumulative = 0.0;
        for (prize_id, odds) in distribution {
            cumulative += odds;
            if cumulative >= unit {
                return Some(*prize_id);
            }
        }
        None
    }

    /// Audit check on a committed spin record: the spend matches the
    /// campaign price, the seed re-derives the recorded draw value, and a
    /// winning record points at a prize that belonged to the campaign.
    pub fn validate_spin_record(
        record: &SpinRecord,
        campaign: &Campaign,
        won_prize: Option<&Prize>,
    ) -> FairspinResult<()> {
        if record.campaign_id != campaign.id {
            return Err(FairspinError::Validation(format!(
                "spin {} belongs to campaign {}, not {}",
                record.id, record.campaign_id, campaign.id
            )));
        }
        if record.tokens_spent != campaign.token_cost_per_spin {
            return Err(FairspinError::Validation(format!(
                "spin {} spent {} tokens but the campaign costs {}",
                record.id, record.tokens_spent, campaign.token_cost_per_spin
            )));
        }

        let seed_bytes = hex::decode(&record.seed)
            .ok()
            .and_then(|b| <[u8; 8]>::try_from(b).ok())
            .ok_or_else(|| {
                FairspinError::Validation(format!("spin {} has a malformed seed", record.id))
            })?;
        let rederived = DrawValue::from_seed(seed_bytes);
        if rederived.unit != record.draw_value {
            return Err(FairspinError::Validation(format!(
                "spin {} draw value {} does not match its seed",
                record.id, record.draw_value
            )));
        }

        match (record.prize_id, won_prize) {
            (None, _) => Ok(()),
            (Some(id), Some(prize)) if prize.id == id && prize.campaign_id == campaign.id => {
                Ok(())
            }
            (Some(id), _) => Err(FairspinError::Validation(format!(
                "spin {} claims prize {} which is not on the campaign",
                record.id, id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SequenceSource;
    use chrono::{Duration, Utc};

    fn distribution(entries: &[(u128, f64)]) -> BTreeMap<Uuid, f64> {
        entries
            .iter()
            .map(|(id, odds)| (Uuid::from_u128(*id), *odds))
            .collect()
    }

    #[test]
    fn selection_walks_cumulative_sums_in_key_order() {
        // Cumulative bounds: prize 1 covers (0, 0.06], prize 2 (0.06, 0.26].
        let dist = distribution(&[(1, 0.06), (2, 0.2)]);

        assert_eq!(
            PrizeDrawEngine::select(&dist, 0.05),
            Some(Uuid::from_u128(1))
        );
        assert_eq!(
            PrizeDrawEngine::select(&dist, 0.10),
            Some(Uuid::from_u128(2))
        );
        assert_eq!(PrizeDrawEngine::select(&dist, 0.99), None);
    }

    #[test]
    fn boundary_draw_selects_the_prize() {
        let dist = distribution(&[(1, 0.25), (2, 0.25)]);
        assert_eq!(
            PrizeDrawEngine::select(&dist, 0.25),
            Some(Uuid::from_u128(1))
        );
        assert_eq!(
            PrizeDrawEngine::select(&dist, 0.5),
            Some(Uuid::from_u128(2))
        );
    }

    #[test]
    fn empty_distribution_never_wins() {
        let dist = BTreeMap::new();
        assert_eq!(PrizeDrawEngine::select(&dist, 0.0), None);

        let engine = PrizeDrawEngine::new(Arc::new(SequenceSource::new(vec![0.0])));
        let selection = engine.draw(&dist).unwrap();
        assert_eq!(selection.prize_id, None);
    }

    #[test]
    fn draw_carries_its_seed() {
        let dist = distribution(&[(1, 0.5)]);
        let engine = PrizeDrawEngine::new(Arc::new(SequenceSource::new(vec![0.3])));
        let selection = engine.draw(&dist).unwrap();
        assert_eq!(selection.prize_id, Some(Uuid::from_u128(1)));
        assert_eq!(selection.draw.unit, 0.3);
        assert_eq!(selection.draw.seed_hex().len(), 16);
    }

    fn spin_fixture() -> (SpinRecord, Campaign, Prize) {
        let campaign = Campaign {
            id: Uuid::from_u128(10),
            business_id: Uuid::from_u128(11),
            name: "launch".to_string(),
            is_active: true,
            start_date: Utc::now() - Duration::days(1),
            end_date: Utc::now() + Duration::days(1),
            token_cost_per_spin: 5,
            max_spins_per_day: 10,
        };
        let prize = Prize {
            id: Uuid::from_u128(20),
            campaign_id: campaign.id,
            name: "mug".to_string(),
            win_probability: 0.2,
            total_quantity: 10,
            remaining_quantity: 9,
            is_active: true,
        };
        let draw = DrawValue::from_seed([1, 2, 3, 4, 5, 6, 7, 8]);
        let record = SpinRecord {
            id: Uuid::from_u128(30),
            player_id: Uuid::from_u128(31),
            campaign_id: campaign.id,
            prize_id: Some(prize.id),
            tokens_spent: 5,
            seed: draw.seed_hex(),
            draw_value: draw.unit,
            created_at: Utc::now(),
        };
        (record, campaign, prize)
    }

    #[test]
    fn valid_record_passes_audit() {
        let (record, campaign, prize) = spin_fixture();
        PrizeDrawEngine::validate_spin_record(&record, &campaign, Some(&prize)).unwrap();
    }

    #[test]
    fn audit_rejects_wrong_spend() {
        let (mut record, campaign, prize) = spin_fixture();
        record.tokens_spent = 4;
        let err =
            PrizeDrawEngine::validate_spin_record(&record, &campaign, Some(&prize)).unwrap_err();
        assert!(matches!(err, FairspinError::Validation(_)));
    }

    #[test]
    fn audit_rejects_tampered_draw_value() {
        let (mut record, campaign, prize) = spin_fixture();
        record.draw_value = 0.000_1;
        assert!(
            PrizeDrawEngine::validate_spin_record(&record, &campaign, Some(&prize)).is_err()
        );
    }

    #[test]
    fn audit_rejects_foreign_prize() {
        let (record, campaign, mut prize) = spin_fixture();
        prize.campaign_id = Uuid::from_u128(99);
        assert!(
            PrizeDrawEngine::validate_spin_record(&record, &campaign, Some(&prize)).is_err()
        );
    }
}
