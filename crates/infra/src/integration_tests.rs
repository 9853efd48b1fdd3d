//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: StockService → EventStore → EventBus → Projection → DocumentStore
//!
//! Verifies:
//! - Stock operations produce documents matching the aggregate
//! - Deductions follow earliest-expiry order end to end
//! - Concurrent deductions never overdraw a batch

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::Value as JsonValue;

use rxstock_core::{AggregateId, BatchId, Clock, FixedClock};
use rxstock_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use rxstock_inventory::{
    BatchInput, BatchPatch, Classification, InventoryError, ProductDetails, ProductId, UnitSettings,
};

use crate::command_dispatcher::CommandDispatcher;
use crate::config::StockConfig;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::projections::{ProductDocument, ProductDocumentProjection};
use crate::read_model::InMemoryDocumentStore;
use crate::stock_service::{StockService, StockServiceError};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Store = Arc<InMemoryEventStore>;
type Service = StockService<Store, Bus, Arc<FixedClock>>;
type Projection = ProductDocumentProjection<Arc<InMemoryDocumentStore<ProductId, ProductDocument>>>;

struct Harness {
    service: Arc<Service>,
    store: Store,
    clock: Arc<FixedClock>,
    projection: Projection,
    subscription: Subscription<EventEnvelope<JsonValue>>,
}

impl Harness {
    fn new(max_conflict_retries: u32) -> Self {
        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let clock = Arc::new(FixedClock::new(at(2024, 12, 1)));
        let config = StockConfig {
            max_conflict_retries,
            ..StockConfig::default()
        };
        let service = StockService::new(CommandDispatcher::new(store.clone(), bus), clock.clone(), config);

        Self {
            service: Arc::new(service),
            store,
            clock,
            projection: ProductDocumentProjection::new(Arc::new(InMemoryDocumentStore::new())),
            subscription,
        }
    }

    /// Deliver everything published so far to the projection.
    fn pump(&self) -> usize {
        let envelopes = self.subscription.drain();
        for env in &envelopes {
            self.projection.apply_envelope(env).unwrap();
        }
        envelopes.len()
    }

    /// Registered product with b1 (5 units, expires 2025-01-01) and b2 (10 units, expires 2025-06-01).
    fn two_batch_product(&self) -> (ProductId, BatchId, BatchId) {
        let product_id = ProductId::new(AggregateId::new());
        self.service.register_product(product_id, details(5)).unwrap();
        // Received out of expiry order on purpose.
        let b2 = self
            .service
            .restock(
                product_id,
                BatchInput::new("LOT-B2", at(2025, 6, 1), 10, dec!(1.10), dec!(2.50)).received_on(at(2024, 11, 1)),
            )
            .unwrap();
        let b1 = self
            .service
            .restock(
                product_id,
                BatchInput::new("LOT-B1", at(2025, 1, 1), 5, dec!(1.00), dec!(2.40)).received_on(at(2024, 10, 1)),
            )
            .unwrap();
        (product_id, b1.id().clone(), b2.id().clone())
    }
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn details(reorder_threshold: u32) -> ProductDetails {
    ProductDetails {
        name: "Amoxicillin 500mg".to_string(),
        code: "AMX-500".to_string(),
        brand: Some("Amoxil".to_string()),
        classification: Classification::Prescription,
        reorder_threshold,
        units: UnitSettings {
            unit: "capsule".to_string(),
            units_per_package: 21,
        },
    }
}

fn remaining(doc: &ProductDocument, batch_id: &BatchId) -> u64 {
    doc.batches
        .iter()
        .find(|b| &b.id == batch_id)
        .map(|b| b.quantity_remaining)
        .unwrap()
}

#[test]
fn deduction_spanning_batches_flows_to_documents() {
    let h = Harness::new(3);
    let (product_id, b1, b2) = h.two_batch_product();

    let deduction = h.service.deduct(product_id, 7).unwrap();
    let lines: Vec<(BatchId, u64)> = deduction
        .plan
        .entries
        .iter()
        .map(|e| (e.batch_id.clone(), e.quantity))
        .collect();
    assert_eq!(lines, vec![(b1.clone(), 5), (b2.clone(), 2)]);
    assert_eq!(deduction.plan.total_cost, dec!(7.20));

    assert_eq!(h.pump(), 4);
    let doc = h.projection.get(&product_id).unwrap();
    assert_eq!(doc.stock_quantity, 8);
    assert_eq!(remaining(&doc, &b1), 0);
    assert_eq!(remaining(&doc, &b2), 8);

    let product = h.service.product(product_id).unwrap();
    assert_eq!(Some(doc), ProductDocument::from_product(&product, h.clock.now()));
}

#[test]
fn shortage_leaves_documents_untouched() {
    let h = Harness::new(3);
    let (product_id, _, _) = h.two_batch_product();
    h.pump();
    let before = h.projection.get(&product_id).unwrap();

    let err = h.service.deduct(product_id, 20).unwrap_err();
    assert!(matches!(
        err,
        StockServiceError::Inventory(InventoryError::InsufficientStock {
            requested: 20,
            available: 15,
            shortage: 5
        })
    ));

    assert_eq!(h.pump(), 0);
    assert_eq!(h.projection.get(&product_id).unwrap(), before);
    assert_eq!(h.store.load_stream(product_id.0).unwrap().len(), 3);
}

#[test]
fn expired_batches_are_never_allocated() {
    let h = Harness::new(3);
    let (product_id, b1, b2) = h.two_batch_product();

    h.clock.set(at(2025, 2, 1));
    let deduction = h.service.deduct(product_id, 3).unwrap();
    assert_eq!(deduction.plan.entries.len(), 1);
    assert_eq!(deduction.plan.entries[0].batch_id, b2);

    h.pump();
    let doc = h.projection.get(&product_id).unwrap();
    // The expired batch keeps its units but no longer counts as stock.
    assert_eq!(remaining(&doc, &b1), 5);
    assert_eq!(doc.stock_quantity, 7);
    assert_eq!(h.service.expired(product_id).unwrap().len(), 1);

    let err = h.service.deduct(product_id, 8).unwrap_err();
    assert!(matches!(
        err,
        StockServiceError::Inventory(InventoryError::InsufficientStock { available: 7, .. })
    ));
}

#[test]
fn low_stock_documents_are_queryable() {
    let h = Harness::new(3);
    let (product_id, _, _) = h.two_batch_product();
    let (other_id, _, _) = h.two_batch_product();

    h.service.deduct(product_id, 11).unwrap();
    h.pump();

    let low: Vec<ProductId> = h.projection.low_stock().into_iter().map(|d| d.id).collect();
    assert_eq!(low, vec![product_id]);
    assert!(!h.projection.get(&other_id).unwrap().is_low_stock());
}

#[test]
fn batch_correction_accepts_equivalent_id_forms() {
    let h = Harness::new(3);
    let (product_id, b1, _) = h.two_batch_product();

    let shouted = BatchId::normalize(&b1.as_str().to_uppercase()).unwrap();
    let updated = h
        .service
        .update_batch(
            product_id,
            &shouted,
            BatchPatch {
                quantity_remaining: Some(3),
                notes: Some("two blisters damaged".to_string()),
                ..BatchPatch::default()
            },
        )
        .unwrap();
    assert_eq!(updated.id(), &b1);
    assert_eq!(updated.quantity_received(), 5);

    h.pump();
    let doc = h.projection.get(&product_id).unwrap();
    assert_eq!(remaining(&doc, &b1), 3);
    assert_eq!(doc.stock_quantity, 13);
}

#[test]
fn duplicate_delivery_is_ignored() {
    let h = Harness::new(3);
    let (product_id, _, _) = h.two_batch_product();
    h.service.deduct(product_id, 2).unwrap();

    let envelopes = h.subscription.drain();
    for env in envelopes.iter().chain(envelopes.iter()) {
        h.projection.apply_envelope(env).unwrap();
    }
    assert_eq!(h.projection.get(&product_id).unwrap().stock_quantity, 13);
}

#[test]
fn rebuild_matches_live_projection() {
    let h = Harness::new(3);
    let (first, _, _) = h.two_batch_product();
    let (second, _, _) = h.two_batch_product();
    h.service.deduct(first, 6).unwrap();
    h.clock.advance(Duration::days(1));
    h.service.deduct(second, 1).unwrap();
    h.pump();

    let mut live = h.projection.list();
    live.sort_by_key(|d| d.id.0);

    let rebuilt = Projection::new(Arc::new(InMemoryDocumentStore::new()));
    rebuilt
        .rebuild_from_scratch(h.store.load_all().unwrap().iter().map(|e| e.to_envelope()))
        .unwrap();
    let mut replayed = rebuilt.list();
    replayed.sort_by_key(|d| d.id.0);

    assert_eq!(live, replayed);
}

#[test]
fn concurrent_deductions_cannot_both_take_the_same_units() {
    let h = Harness::new(3);
    let (product_id, _, _) = h.two_batch_product();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = h.service.clone();
                scope.spawn(move || service.deduct(product_id, 10))
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let committed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1);
    for result in &results {
        if let Err(err) = result {
            assert!(matches!(
                err,
                StockServiceError::Inventory(InventoryError::InsufficientStock { available: 5, .. })
            ));
        }
    }

    let product = h.service.product(product_id).unwrap();
    assert_eq!(product.stock_quantity(), 5);
}

#[test]
fn contended_unit_deductions_all_land_exactly_once() {
    let h = Harness::new(16);
    let (product_id, b1, b2) = h.two_batch_product();

    let attempts: Vec<u32> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = h.service.clone();
                scope.spawn(move || service.deduct(product_id, 1).map(|d| d.attempts))
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap().unwrap()).collect()
    });
    assert_eq!(attempts.len(), 8);

    h.pump();
    let doc = h.projection.get(&product_id).unwrap();
    assert_eq!(doc.stock_quantity, 7);
    // Earliest expiry drained first.
    assert_eq!(remaining(&doc, &b1), 0);
    assert_eq!(remaining(&doc, &b2), 7);
}
