use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use rxstock_core::{Aggregate, AggregateId, BatchId, SupplierId};
use rxstock_events::{Event, EventEnvelope};
use rxstock_inventory::{Batch, Classification, InventoryEvent, Product, ProductId};

use crate::read_model::DocumentStore;
use crate::stock_service::PRODUCT_AGGREGATE_TYPE;

/// Persisted shape of one batch record inside a product document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDocument {
    pub id: BatchId,
    pub batch_number: String,
    pub expiration_date: DateTime<Utc>,
    pub quantity_received: u64,
    pub quantity_remaining: u64,
    pub unit_cost: Decimal,
    pub sale_price: Decimal,
    pub received_date: DateTime<Utc>,
    #[serde(default)]
    pub supplier_id: Option<SupplierId>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<&Batch> for BatchDocument {
    fn from(batch: &Batch) -> Self {
        Self {
            id: batch.id().clone(),
            batch_number: batch.batch_number().to_string(),
            expiration_date: batch.expiration_date(),
            quantity_received: batch.quantity_received(),
            quantity_remaining: batch.quantity_remaining(),
            unit_cost: batch.unit_cost(),
            sale_price: batch.sale_price(),
            received_date: batch.received_date(),
            supplier_id: batch.supplier_id(),
            notes: batch.notes().map(str::to_string),
        }
    }
}

/// Queryable product document with embedded batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDocument {
    pub id: ProductId,
    pub name: String,
    pub code: String,
    pub brand: Option<String>,
    pub classification: Classification,
    pub reorder_threshold: u32,
    pub unit: String,
    pub units_per_package: u32,
    pub stock_quantity: u64,
    pub batches: Vec<BatchDocument>,
    pub updated_at: DateTime<Utc>,
}

impl ProductDocument {
    /// Snapshot a registered product. `None` for a product never registered.
    pub fn from_product(product: &Product, updated_at: DateTime<Utc>) -> Option<Self> {
        let details = product.details()?;
        Some(Self {
            id: product.id_typed(),
            name: details.name.clone(),
            code: details.code.clone(),
            brand: details.brand.clone(),
            classification: details.classification,
            reorder_threshold: details.reorder_threshold,
            unit: details.units.unit.clone(),
            units_per_package: details.units.units_per_package,
            stock_quantity: product.stock_quantity(),
            batches: product.batches().iter().map(BatchDocument::from).collect(),
            updated_at,
        })
    }

    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= u64::from(self.reorder_threshold)
    }
}

#[derive(Debug, Error)]
pub enum ProductProjectionError {
    #[error("failed to deserialize inventory event: {0}")]
    Deserialize(String),

    #[error("event product_id does not match envelope aggregate_id: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    /// A writer panicked while holding the stream state; rebuild from the store.
    #[error("projection state lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
struct StreamState {
    cursor: u64,
    product: Product,
}

/// Product document projection.
///
/// Replays each product stream through the aggregate's own `apply` and
/// stores the resulting snapshot as a document, so the documents can never
/// disagree with the domain rules. Idempotent for at-least-once delivery:
/// envelopes at or below the stream cursor are ignored.
#[derive(Debug)]
pub struct ProductDocumentProjection<S>
where
    S: DocumentStore<ProductId, ProductDocument>,
{
    store: S,
    streams: RwLock<HashMap<AggregateId, StreamState>>,
}

impl<S> ProductDocumentProjection<S>
where
    S: DocumentStore<ProductId, ProductDocument>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            streams: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, product_id: &ProductId) -> Option<ProductDocument> {
        self.store.get(product_id)
    }

    pub fn list(&self) -> Vec<ProductDocument> {
        self.store.list()
    }

    /// Documents at or below their reorder threshold.
    pub fn low_stock(&self) -> Vec<ProductDocument> {
        self.store.list().into_iter().filter(ProductDocument::is_low_stock).collect()
    }

    /// Apply one published envelope. Envelopes of other aggregate types are skipped.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProductProjectionError> {
        if envelope.aggregate_type() != PRODUCT_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut streams = self
            .streams
            .write()
            .map_err(|_| ProductProjectionError::Poisoned)?;

        let last = streams.get(&aggregate_id).map(|s| s.cursor).unwrap_or(0);
        if seq == 0 {
            return Err(ProductProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate delivery.
            return Ok(());
        }
        if seq != last + 1 {
            return Err(ProductProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: InventoryEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProductProjectionError::Deserialize(e.to_string()))?;

        if event.product_id().0 != aggregate_id {
            return Err(ProductProjectionError::StreamMismatch(format!(
                "{} vs {}",
                event.product_id(),
                aggregate_id
            )));
        }

        let state = streams.entry(aggregate_id).or_insert_with(|| StreamState {
            cursor: 0,
            product: Product::empty(ProductId::new(aggregate_id)),
        });
        state.product.apply(&event);
        state.cursor = seq;

        if let Some(doc) = ProductDocument::from_product(&state.product, event.occurred_at()) {
            self.store.upsert(doc.id, doc);
        }

        Ok(())
    }

    /// Rebuild every document from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProductProjectionError> {
        // A rebuild starts from nothing, so it may recover a poisoned lock.
        self.streams
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        self.streams.clear_poison();
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        tracing::info!(envelopes = envs.len(), "product documents rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    use rxstock_inventory::{ProductDetails, ProductRegistered, UnitSettings};

    use crate::read_model::InMemoryDocumentStore;

    type Projection = ProductDocumentProjection<Arc<InMemoryDocumentStore<ProductId, ProductDocument>>>;

    fn projection() -> Projection {
        ProductDocumentProjection::new(Arc::new(InMemoryDocumentStore::new()))
    }

    fn registered_envelope(product_id: ProductId) -> EventEnvelope<JsonValue> {
        let event = InventoryEvent::ProductRegistered(ProductRegistered {
            product_id,
            details: ProductDetails {
                name: "Loratadine 10mg".to_string(),
                code: "LOR-10".to_string(),
                brand: None,
                classification: Classification::OverTheCounter,
                reorder_threshold: 5,
                units: UnitSettings::default(),
            },
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            product_id.0,
            PRODUCT_AGGREGATE_TYPE,
            1,
            serde_json::to_value(&event).unwrap(),
        )
    }

    #[test]
    fn foreign_streams_on_the_bus_are_skipped() {
        let projection = projection();
        let other = EventEnvelope::new(
            Uuid::now_v7(),
            AggregateId::new(),
            "billing.invoice",
            1,
            json!({"InvoiceIssued": {"total": "12.00"}}),
        );

        projection.apply_envelope(&other).unwrap();
        assert!(projection.list().is_empty());
    }

    #[test]
    fn poisoned_state_is_reported_and_rebuild_recovers() {
        let projection = projection();
        let product_id = ProductId::new(AggregateId::new());
        let envelope = registered_envelope(product_id);

        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = projection.streams.write().unwrap();
            panic!("writer died mid-update");
        }));

        let err = projection.apply_envelope(&envelope).unwrap_err();
        assert!(matches!(err, ProductProjectionError::Poisoned));
        assert!(projection.get(&product_id).is_none());

        projection.rebuild_from_scratch(vec![envelope]).unwrap();
        assert_eq!(projection.get(&product_id).unwrap().code, "LOR-10");
    }

    #[test]
    fn legacy_document_with_wrapped_ids_deserializes() {
        let raw = json!({
            "id": "0190a3c2-7b1e-7cde-8f00-1234567890ab",
            "name": "Cetirizine 10mg",
            "code": "CTZ-10",
            "brand": null,
            "classification": "over_the_counter",
            "reorder_threshold": 20,
            "unit": "tablet",
            "units_per_package": 30,
            "stock_quantity": 40,
            "updated_at": "2024-05-01T00:00:00Z",
            "batches": [{
                "id": {"$oid": "65F1A2B3C4D5E6F708192A3B"},
                "batch_number": "CTZ-0424",
                "expiration_date": "2026-04-30T00:00:00Z",
                "quantity_received": 60,
                "quantity_remaining": 40,
                "unit_cost": "0.08",
                "sale_price": "0.25",
                "received_date": "2024-04-30T00:00:00Z"
            }]
        });

        let doc: ProductDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.batches[0].id.as_str(), "65f1a2b3c4d5e6f708192a3b");
        assert_eq!(doc.batches[0].supplier_id, None);
        assert_eq!(doc.batches[0].unit_cost, Decimal::new(8, 2));
        assert!(!doc.is_low_stock());
    }
}
