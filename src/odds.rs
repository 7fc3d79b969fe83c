//! Inventory-aware odds adjustment.
//!
//! Configured win probabilities are treated as the advertised ceiling; the
//! engine dampens them as stock runs down so a campaign's last units do not
//! disappear in its first hour. The derived distribution is computed fresh
//! for every draw and never written back to the prize records.

use crate::config::OddsConfig;
use crate::models::Prize;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// How depleted a prize's stock is, for operator dashboards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepletionLevel {
    Critical,
    Low,
    Healthy,
}

/// Advisory snapshot of one prize's inventory position.
#[derive(Clone, Debug, PartialEq)]
pub struct OddsRecommendation {
    pub prize_id: Uuid,
    pub level: DepletionLevel,
    pub inventory_percent: f64,
    pub configured_odds: f64,
    pub effective_odds: f64,
}

#[derive(Clone, Debug)]
pub struct OddsEngine {
    cfg: OddsConfig,
}

impl OddsEngine {
    pub fn new(cfg: OddsConfig) -> Self {
        Self { cfg }
    }

    /// Effective odds for every available prize, keyed by prize id.
    ///
    /// Unavailable prizes (inactive or out of stock) are excluded entirely.
    /// Each remaining prize is dampened by inventory, clamped to the
    /// configured floor/ceiling, and the whole distribution is scaled down
    /// proportionally if it would exceed the distribution ceiling. The
    /// complement of the returned sum is the no-prize probability.
    pub fn effective_distribution(&self, prizes: &[Prize]) -> BTreeMap<Uuid, f64> {
        let mut distribution = BTreeMap::new();
        for prize in prizes {
            if !prize.is_available() {
                continue;
            }
            distribution.insert(prize.id, self.effective_odds(prize));
        }

        let total: f64 = distribution.values().sum();
        if total > self.cfg.distribution_ceiling {
            let scale = self.cfg.distribution_ceiling / total;
            debug!(total, scale, "scaling odds distribution to ceiling");
            for odds in distribution.values_mut() {
                *odds *= scale;
            }
        }
        distribution
    }

    /// Dampened and clamped odds for a single in-stock prize.
    pub fn effective_odds(&self, prize: &Prize) -> f64 {
        let dampened = prize.win_probability * self.dampening_factor(prize);
        dampened.clamp(self.cfg.minimum_odds, self.cfg.maximum_odds)
    }

    fn dampening_factor(&self, prize: &Prize) -> f64 {
        if prize.remaining_quantity <= self.cfg.critical_inventory_threshold {
            self.cfg.critical_dampening
        } else if prize.remaining_quantity <= self.cfg.low_inventory_threshold {
            self.cfg.low_dampening
        } else {
            0.6 + 0.4 * prize.inventory_fraction()
        }
    }

    pub fn recommendation(&self, prize: &Prize) -> OddsRecommendation {
        let level = if prize.remaining_quantity <= self.cfg.critical_inventory_threshold {
            DepletionLevel::Critical
        } else if prize.remaining_quantity <= self.cfg.low_inventory_threshold {
            DepletionLevel::Low
        } else {
            DepletionLevel::Healthy
        };
        OddsRecommendation {
            prize_id: prize.id,
            level,
            inventory_percent: prize.inventory_fraction() * 100.0,
            configured_odds: prize.win_probability,
            effective_odds: if prize.is_available() {
                self.effective_odds(prize)
            } else {
                0.0
            },
        }
    }
}
