//! Application service for product stock.
//!
//! Every mutation runs as load → decide → append-at-exact-version. When the
//! append loses a race against another writer of the same product, the whole
//! operation (including allocation planning) is re-run on fresh state, up to
//! `StockConfig::max_conflict_retries` times. Two concurrent deductions can
//! therefore never both commit against the same snapshot.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use rxstock_core::{BatchId, Clock};
use rxstock_events::{EventBus, EventEnvelope};
use rxstock_inventory::{
    AllocationPlan, AllocationResult, Batch, BatchInput, BatchPatch, CommitAllocation, CorrectBatch,
    DeductStock, InventoryCommand, InventoryError, InventoryEvent, Product, ProductDetails,
    ProductId, ReceiveBatch, RegisterProduct, StockDeducted,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
use crate::config::StockConfig;
use crate::event_store::{EventStore, EventStoreError};

/// Aggregate type recorded on every product stream.
pub const PRODUCT_AGGREGATE_TYPE: &str = "inventory.product";

#[derive(Debug, Error)]
pub enum StockServiceError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// Lost the optimistic race on every attempt. Safe to retry later.
    #[error("concurrent modification of product {product_id} after {attempts} attempts: {last}")]
    ConcurrentModification {
        product_id: ProductId,
        attempts: u32,
        last: String,
    },

    #[error("corrupt product stream: {0}")]
    CorruptStream(String),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// Events were persisted but could not be published.
    #[error("publish failed: {0}")]
    Publish(String),
}

impl StockServiceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StockServiceError::Inventory(e) => e.is_retryable(),
            StockServiceError::ConcurrentModification { .. } => true,
            _ => false,
        }
    }
}

/// Outcome of a committed deduction.
#[derive(Debug, Clone)]
pub struct Deduction {
    pub plan: AllocationPlan,
    pub product: Product,
    /// Number of plan+commit attempts it took (1 when uncontended).
    pub attempts: u32,
}

#[derive(Debug)]
pub struct StockService<S, B, C> {
    dispatcher: CommandDispatcher<S, B>,
    clock: C,
    config: StockConfig,
}

impl<S, B, C> StockService<S, B, C>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
    C: Clock,
{
    pub fn new(dispatcher: CommandDispatcher<S, B>, clock: C, config: StockConfig) -> Self {
        Self {
            dispatcher,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &StockConfig {
        &self.config
    }

    pub fn register_product(
        &self,
        product_id: ProductId,
        details: ProductDetails,
    ) -> Result<Product, StockServiceError> {
        let occurred_at = self.clock.now();
        let cmd = InventoryCommand::RegisterProduct(RegisterProduct {
            product_id,
            details,
            occurred_at,
        });
        let done = self
            .dispatcher
            .dispatch(product_id.0, PRODUCT_AGGREGATE_TYPE, &cmd, make_product)
            .map_err(|e| map_dispatch_error(product_id, e, 1))?;
        tracing::info!(%product_id, "product registered");
        Ok(done.aggregate)
    }

    /// Current state of a registered product.
    pub fn product(&self, product_id: ProductId) -> Result<Product, StockServiceError> {
        let product = self
            .dispatcher
            .load(product_id.0, make_product)
            .map_err(|e| map_dispatch_error(product_id, e, 1))?;
        if !product.is_created() {
            return Err(StockServiceError::ProductNotFound(product_id));
        }
        Ok(product)
    }

    /// Read-only planning against current state.
    pub fn plan(&self, product_id: ProductId, quantity: u64) -> Result<AllocationResult, StockServiceError> {
        let product = self.product(product_id)?;
        Ok(product.plan_allocation(quantity, self.clock.now())?)
    }

    /// Commit a plan obtained from [`StockService::plan`].
    ///
    /// Fails with `InventoryError::ConcurrentModification` or `BatchNotFound`
    /// when the plan no longer matches the product; the caller should re-plan.
    pub fn commit(&self, plan: &AllocationPlan) -> Result<Deduction, StockServiceError> {
        let product_id = plan.product_id;
        let (done, attempts) = self.with_retry(product_id, |now| {
            InventoryCommand::CommitAllocation(CommitAllocation {
                product_id,
                plan: plan.clone(),
                occurred_at: now,
            })
        })?;
        self.deduction(done, attempts)
    }

    /// Plan and commit `quantity` units as one guarded operation.
    pub fn deduct(&self, product_id: ProductId, quantity: u64) -> Result<Deduction, StockServiceError> {
        let (done, attempts) = self.with_retry(product_id, |now| {
            InventoryCommand::DeductStock(DeductStock {
                product_id,
                quantity,
                occurred_at: now,
            })
        })?;
        self.deduction(done, attempts)
    }

    /// Receive a new batch.
    pub fn restock(&self, product_id: ProductId, input: BatchInput) -> Result<Batch, StockServiceError> {
        let batch_id = BatchId::generate();
        let (done, _) = self.with_retry(product_id, |now| {
            InventoryCommand::ReceiveBatch(ReceiveBatch {
                product_id,
                batch_id: batch_id.clone(),
                input: input.clone(),
                occurred_at: now,
            })
        })?;

        let batch = done
            .aggregate
            .batch(&batch_id)
            .cloned()
            .ok_or(InventoryError::BatchNotFound { batch_id })?;
        tracing::info!(
            %product_id,
            batch_id = %batch.id(),
            quantity = batch.quantity_received(),
            stock = done.aggregate.stock_quantity(),
            "batch received"
        );
        Ok(batch)
    }

    /// Correct fields of an existing batch.
    pub fn update_batch(
        &self,
        product_id: ProductId,
        batch_id: &BatchId,
        patch: BatchPatch,
    ) -> Result<Batch, StockServiceError> {
        let (done, _) = self.with_retry(product_id, |now| {
            InventoryCommand::CorrectBatch(CorrectBatch {
                product_id,
                batch_id: batch_id.clone(),
                patch: patch.clone(),
                occurred_at: now,
            })
        })?;

        let batch = done
            .aggregate
            .batch(batch_id)
            .cloned()
            .ok_or_else(|| InventoryError::BatchNotFound {
                batch_id: batch_id.clone(),
            })?;
        tracing::info!(%product_id, %batch_id, "batch corrected");
        Ok(batch)
    }

    /// Available batches expiring within the configured warning window.
    pub fn expiring_soon(&self, product_id: ProductId) -> Result<Vec<Batch>, StockServiceError> {
        let product = self.product(product_id)?;
        let window = Duration::days(i64::from(self.config.expiry_warning_days));
        Ok(product
            .expiring_within(self.clock.now(), window)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Batches holding stock past their expiration date.
    pub fn expired(&self, product_id: ProductId) -> Result<Vec<Batch>, StockServiceError> {
        let product = self.product(product_id)?;
        Ok(product
            .expired_batches(self.clock.now())
            .into_iter()
            .cloned()
            .collect())
    }

    fn with_retry(
        &self,
        product_id: ProductId,
        make_command: impl Fn(DateTime<Utc>) -> InventoryCommand,
    ) -> Result<(Dispatched<Product>, u32), StockServiceError> {
        let max_attempts = self.config.max_conflict_retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let cmd = make_command(self.clock.now());
            match self
                .dispatcher
                .dispatch(product_id.0, PRODUCT_AGGREGATE_TYPE, &cmd, make_product)
            {
                Ok(done) => return Ok((done, attempt)),
                Err(DispatchError::Concurrency(msg)) if attempt < max_attempts => {
                    tracing::warn!(%product_id, attempt, reason = %msg, "product changed concurrently; retrying");
                }
                Err(err) => return Err(map_dispatch_error(product_id, err, attempt)),
            }
        }
    }

    fn deduction(&self, done: Dispatched<Product>, attempts: u32) -> Result<Deduction, StockServiceError> {
        let deducted = done
            .events
            .iter()
            .find_map(|e| match e {
                InventoryEvent::StockDeducted(d) => Some(d),
                _ => None,
            })
            .ok_or_else(|| InventoryError::invalid_plan("deduction produced no stock movement"))?;

        let plan = plan_from_event(deducted);
        tracing::info!(
            product_id = %plan.product_id,
            requested = plan.requested,
            batches = plan.entries.len(),
            total_cost = %plan.total_cost,
            stock = done.aggregate.stock_quantity(),
            attempts,
            "stock deducted"
        );
        if done.aggregate.is_low_stock() {
            tracing::warn!(
                product_id = %plan.product_id,
                stock = done.aggregate.stock_quantity(),
                "product at or below reorder threshold"
            );
        }

        Ok(Deduction {
            plan,
            product: done.aggregate,
            attempts,
        })
    }
}

fn make_product(id: rxstock_core::AggregateId) -> Product {
    Product::empty(ProductId::new(id))
}

fn plan_from_event(e: &StockDeducted) -> AllocationPlan {
    AllocationPlan {
        product_id: e.product_id,
        requested: e.requested,
        entries: e.entries.clone(),
        total_cost: e.total_cost,
        total_revenue: e.total_revenue,
        evaluated_at: e.occurred_at,
    }
}

fn map_dispatch_error(
    product_id: ProductId,
    err: DispatchError<InventoryError>,
    attempts: u32,
) -> StockServiceError {
    match err {
        DispatchError::Rejected(InventoryError::NotCreated) => StockServiceError::ProductNotFound(product_id),
        DispatchError::Rejected(e) => StockServiceError::Inventory(e),
        DispatchError::Concurrency(last) => StockServiceError::ConcurrentModification {
            product_id,
            attempts,
            last,
        },
        DispatchError::Deserialize(msg) | DispatchError::CorruptStream(msg) => {
            StockServiceError::CorruptStream(msg)
        }
        DispatchError::Store(e) => StockServiceError::Store(e),
        DispatchError::Publish(msg) => StockServiceError::Publish(msg),
    }
}
