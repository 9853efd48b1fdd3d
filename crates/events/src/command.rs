use rxstock_core::AggregateId;

/// A command targets a specific aggregate.
///
/// Commands carry intent ("deduct 7 units"); the aggregate either rejects them
/// or turns them into events ("units taken from batches A and B"). One command
/// touches exactly one aggregate, which is the unit of consistency for stock.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> AggregateId;
}
