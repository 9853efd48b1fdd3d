//! Append-only event store boundary.
//!
//! Product streams are the authoritative record of stock. The store knows
//! nothing about batches; it only guarantees ordered, atomic, version-checked
//! appends per aggregate stream.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
