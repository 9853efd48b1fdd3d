//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate's stream
//!   ↓
//! 2. Rehydrate (apply history)
//!   ↓
//! 3. Handle command (pure decision, produces events)
//!   ↓
//! 4. Append with ExpectedVersion::Exact(loaded version)
//!   ↓
//! 5. Publish committed events
//! ```
//!
//! Step 3 is where stock is planned and step 4 is where it is committed. The
//! exact-version append turns "plan + commit" into one optimistic
//! transaction: if another writer appended to the product between 1 and 4,
//! the append is rejected and nothing is written.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use rxstock_core::{Aggregate, AggregateId, AggregateRoot, ExpectedVersion};
use rxstock_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// The aggregate rejected the command.
    #[error("command rejected: {0:?}")]
    Rejected(E),
    /// Optimistic concurrency failure: the stream moved since it was loaded.
    #[error("concurrent append: {0}")]
    Concurrency(String),
    /// Historical payloads could not be decoded into the aggregate's event type.
    #[error("failed to decode stream: {0}")]
    Deserialize(String),
    /// The loaded stream is inconsistent (wrong aggregate, bad sequence).
    #[error("corrupt stream: {0}")]
    CorruptStream(String),
    #[error(transparent)]
    Store(EventStoreError),
    /// Publication failed after a successful append (events are durable).
    #[error("publish failed: {0}")]
    Publish(String),
}

impl<E> From<EventStoreError> for DispatchError<E> {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Result of a successful dispatch.
#[derive(Debug)]
pub struct Dispatched<A: Aggregate> {
    /// Aggregate state after the new events were applied.
    pub aggregate: A,
    /// The decided domain events.
    pub events: Vec<A::Event>,
    /// The same events as persisted (with sequence numbers).
    pub committed: Vec<StoredEvent>,
}

/// Reusable command execution engine.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate without handling a command.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream::<A::Error>(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Run a command through load → handle → append → publish.
    ///
    /// Returns `DispatchError::Concurrency` if the stream changed after it was
    /// loaded; the caller may reload and retry.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: &A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: rxstock_events::Event + Serialize + DeserializeOwned,
    {
        let mut aggregate = self.load(aggregate_id, make_aggregate)?;
        let expected = ExpectedVersion::Exact(aggregate.version());

        let decided = aggregate.handle(command).map_err(DispatchError::Rejected)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                events: vec![],
                committed: vec![],
            });
        }

        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type.clone(), Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for event in &decided {
            aggregate.apply(event);
        }

        // Publish only after the append succeeded.
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(Dispatched {
            aggregate,
            events: decided,
            committed,
        })
    }
}

fn validate_loaded_stream<E>(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError<E>> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::CorruptStream(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 || e.sequence_number <= last {
            return Err(DispatchError::CorruptStream(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError<A::Error>>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}
