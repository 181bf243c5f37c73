//! Recent-delivery window for idempotent webhook replay.

use std::time::Duration;

use moka::sync::Cache;

pub const DEFAULT_CAPACITY: u64 = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryState {
    InFlight,
    Completed,
}

/// Result of [`DeliveryWindow::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClaim {
    /// The caller owns the delivery and must complete or release it.
    Acquired,
    /// Another attempt is still running; its outcome is not known yet.
    InFlight,
    /// Already handled to completion.
    Completed,
}

/// Bounded, expiring map of delivery ids that are being or have been handled.
#[derive(Clone)]
pub struct DeliveryWindow {
    seen: Cache<String, DeliveryState>,
}

impl DeliveryWindow {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            seen: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Claims `delivery_id`.
    ///
    /// Claiming is atomic: of two concurrent claims exactly one acquires.
    pub fn claim(&self, delivery_id: &str) -> DeliveryClaim {
        let entry = self
            .seen
            .entry(delivery_id.to_string())
            .or_insert(DeliveryState::InFlight);
        if entry.is_fresh() {
            return DeliveryClaim::Acquired;
        }
        match entry.into_value() {
            DeliveryState::InFlight => DeliveryClaim::InFlight,
            DeliveryState::Completed => DeliveryClaim::Completed,
        }
    }

    /// Marks an acquired delivery as handled.
    pub fn complete(&self, delivery_id: &str) {
        self.seen
            .insert(delivery_id.to_string(), DeliveryState::Completed);
    }

    /// Gives a claim back so a redelivery is processed again.
    pub fn release(&self, delivery_id: &str) {
        self.seen.invalidate(delivery_id);
    }

    pub fn contains(&self, delivery_id: &str) -> bool {
        self.seen.contains_key(delivery_id)
    }
}

impl Default for DeliveryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
