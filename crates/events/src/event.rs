use chrono::{DateTime, Utc};

/// A domain event.
///
/// Events are facts about a product's stock (a batch was received, units were
/// deducted, a batch record was corrected). They are immutable, versioned and
/// append-only.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "inventory.batch.received").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
