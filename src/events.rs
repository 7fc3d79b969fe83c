//! Analytics event fan-out.
//!
//! Outcomes are published to a broadcast channel for out-of-band consumers
//! (reporting, dashboards). Publishing never fails the originating
//! operation: with no subscribers the event is simply dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    ScanAccepted {
        scan_id: Uuid,
        player_id: Uuid,
        business_id: Uuid,
        tokens_awarded: i64,
        at: DateTime<Utc>,
    },
    SpinCommitted {
        spin_id: Uuid,
        player_id: Uuid,
        campaign_id: Uuid,
        prize_id: Option<Uuid>,
        tokens_spent: i64,
        at: DateTime<Utc>,
    },
    PrizeRedeemed {
        player_prize_id: Uuid,
        player_id: Uuid,
        prize_id: Uuid,
        at: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AnalyticsEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Fire and forget. A send error only means nobody is listening.
    pub fn publish(&self, event: AnalyticsEvent) {
        trace!(?event, "publishing analytics event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnalyticsEvent> {
        self.sender.subscribe()
    }
}
