use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use rxstock_core::{Aggregate, AggregateId, AggregateRoot, BatchId, DomainError};
use rxstock_events::{Command, Event};

use crate::allocation::{AllocationEntry, AllocationPlan, AllocationResult, allocate};
use crate::batch::{Batch, BatchInput, BatchPatch, available_batches};
use crate::error::InventoryError;

/// Product identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Regulatory classification of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Prescription,
    OverTheCounter,
    Controlled,
    Supply,
}

/// Dispensing unit settings; batches inherit them unless overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSettings {
    pub unit: String,
    pub units_per_package: u32,
}

impl Default for UnitSettings {
    fn default() -> Self {
        Self {
            unit: "unit".to_string(),
            units_per_package: 1,
        }
    }
}

/// Catalogue data of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub name: String,
    pub code: String,
    pub brand: Option<String>,
    pub classification: Classification,
    pub reorder_threshold: u32,
    #[serde(default)]
    pub units: UnitSettings,
}

impl ProductDetails {
    fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("name", "cannot be empty"));
        }
        if self.code.trim().is_empty() {
            return Err(DomainError::validation("code", "cannot be empty"));
        }
        if self.units.units_per_package == 0 {
            return Err(DomainError::validation("units_per_package", "must be positive"));
        }
        Ok(())
    }
}

/// Aggregate root: Product.
///
/// Exclusively owns its batches. `stock_quantity` is a cache: after every
/// batch mutation it is recomputed from the batches available at the
/// mutation instant, never adjusted incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    details: Option<ProductDetails>,
    stock_quantity: u64,
    batches: Vec<Batch>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            details: None,
            stock_quantity: 0,
            batches: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn details(&self) -> Option<&ProductDetails> {
        self.details.as_ref()
    }

    /// Cached stock as of the last batch mutation.
    pub fn stock_quantity(&self) -> u64 {
        self.stock_quantity
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch(&self, batch_id: &BatchId) -> Option<&Batch> {
        self.batches.iter().find(|b| &b.id == batch_id)
    }

    /// Stock available at `now` (may differ from the cache once batches expire).
    pub fn available_stock(&self, now: DateTime<Utc>) -> u64 {
        self.batches
            .iter()
            .filter(|b| b.is_available(now))
            .fold(0u64, |acc, b| acc.saturating_add(b.quantity_remaining))
    }

    pub fn is_low_stock(&self) -> bool {
        match &self.details {
            Some(d) => self.stock_quantity <= u64::from(d.reorder_threshold),
            None => false,
        }
    }

    /// Batches still holding stock past their expiration date.
    pub fn expired_batches(&self, now: DateTime<Utc>) -> Vec<&Batch> {
        self.batches.iter().filter(|b| b.is_expired(now)).collect()
    }

    /// Available batches that expire within `window` of `now`, earliest first.
    pub fn expiring_within(&self, now: DateTime<Utc>, window: Duration) -> Vec<&Batch> {
        let horizon = now + window;
        available_batches(&self.batches, now)
            .into_iter()
            .filter(|b| b.expiration_date <= horizon)
            .collect()
    }

    /// Plan covering `requested` units at `now`. Read-only.
    pub fn plan_allocation(
        &self,
        requested: u64,
        now: DateTime<Utc>,
    ) -> Result<AllocationResult, InventoryError> {
        self.ensure_created()?;
        let result = allocate(self.id, &self.batches, requested, now)?;
        match &result {
            AllocationResult::Allocated(plan) => tracing::debug!(
                product_id = %self.id,
                requested,
                batches = plan.entries.len(),
                "allocation planned"
            ),
            AllocationResult::Shortage { available, shortage, .. } => tracing::debug!(
                product_id = %self.id,
                requested,
                available,
                shortage,
                "allocation short"
            ),
        }
        Ok(result)
    }

    /// Apply a previously computed plan. All-or-nothing.
    pub fn commit_allocation(
        &mut self,
        plan: &AllocationPlan,
        now: DateTime<Utc>,
    ) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.execute(&InventoryCommand::CommitAllocation(CommitAllocation {
            product_id: self.id,
            plan: plan.clone(),
            occurred_at: now,
        }))
    }

    /// Plan and commit in one step; a shortage becomes `InsufficientStock`.
    pub fn reduce_stock(
        &mut self,
        requested: u64,
        now: DateTime<Utc>,
    ) -> Result<AllocationPlan, InventoryError> {
        let plan = self.plan_allocation(requested, now)?.into_plan()?;
        self.commit_allocation(&plan, now)?;
        Ok(plan)
    }

    /// Receive a new batch; returns the stored batch.
    pub fn restock(&mut self, input: BatchInput, now: DateTime<Utc>) -> Result<Batch, InventoryError> {
        let batch_id = BatchId::generate();
        self.execute(&InventoryCommand::ReceiveBatch(ReceiveBatch {
            product_id: self.id,
            batch_id: batch_id.clone(),
            input,
            occurred_at: now,
        }))?;
        self.batch(&batch_id)
            .cloned()
            .ok_or(InventoryError::BatchNotFound { batch_id })
    }

    /// Correct fields of an existing batch; returns the updated batch.
    pub fn update_batch(
        &mut self,
        batch_id: &BatchId,
        patch: BatchPatch,
        now: DateTime<Utc>,
    ) -> Result<Batch, InventoryError> {
        self.execute(&InventoryCommand::CorrectBatch(CorrectBatch {
            product_id: self.id,
            batch_id: batch_id.clone(),
            patch,
            occurred_at: now,
        }))?;
        self.batch(batch_id)
            .cloned()
            .ok_or_else(|| InventoryError::BatchNotFound {
                batch_id: batch_id.clone(),
            })
    }

    /// Decide and apply in one go (in-process use without an event store).
    pub fn execute(&mut self, command: &InventoryCommand) -> Result<Vec<InventoryEvent>, InventoryError> {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }

    fn recompute_stock(&mut self, now: DateTime<Utc>) {
        self.stock_quantity = self.available_stock(now);
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProduct {
    pub product_id: ProductId,
    pub details: ProductDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReceiveBatch (restock). The caller allocates `batch_id` so that
/// handling stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBatch {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub input: BatchInput,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeductStock (plan + commit against current state).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductStock {
    pub product_id: ProductId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CommitAllocation (apply a plan computed earlier).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAllocation {
    pub product_id: ProductId,
    pub plan: AllocationPlan,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CorrectBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectBatch {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub patch: BatchPatch,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    RegisterProduct(RegisterProduct),
    ReceiveBatch(ReceiveBatch),
    DeductStock(DeductStock),
    CommitAllocation(CommitAllocation),
    CorrectBatch(CorrectBatch),
}

impl Command for InventoryCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            InventoryCommand::RegisterProduct(c) => c.product_id.0,
            InventoryCommand::ReceiveBatch(c) => c.product_id.0,
            InventoryCommand::DeductStock(c) => c.product_id.0,
            InventoryCommand::CommitAllocation(c) => c.product_id.0,
            InventoryCommand::CorrectBatch(c) => c.product_id.0,
        }
    }
}

/// Event: ProductRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRegistered {
    pub product_id: ProductId,
    pub details: ProductDetails,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceived {
    pub product_id: ProductId,
    pub batch: Batch,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockDeducted. Entries are exactly the committed plan lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDeducted {
    pub product_id: ProductId,
    pub requested: u64,
    pub entries: Vec<AllocationEntry>,
    pub total_cost: Decimal,
    pub total_revenue: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchCorrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCorrected {
    pub product_id: ProductId,
    pub batch_id: BatchId,
    pub patch: BatchPatch,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ProductRegistered(ProductRegistered),
    BatchReceived(BatchReceived),
    StockDeducted(StockDeducted),
    BatchCorrected(BatchCorrected),
}

impl InventoryEvent {
    pub fn product_id(&self) -> ProductId {
        match self {
            InventoryEvent::ProductRegistered(e) => e.product_id,
            InventoryEvent::BatchReceived(e) => e.product_id,
            InventoryEvent::StockDeducted(e) => e.product_id,
            InventoryEvent::BatchCorrected(e) => e.product_id,
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ProductRegistered(_) => "inventory.product.registered",
            InventoryEvent::BatchReceived(_) => "inventory.batch.received",
            InventoryEvent::StockDeducted(_) => "inventory.stock.deducted",
            InventoryEvent::BatchCorrected(_) => "inventory.batch.corrected",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ProductRegistered(e) => e.occurred_at,
            InventoryEvent::BatchReceived(e) => e.occurred_at,
            InventoryEvent::StockDeducted(e) => e.occurred_at,
            InventoryEvent::BatchCorrected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = InventoryError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ProductRegistered(e) => {
                self.id = e.product_id;
                self.details = Some(e.details.clone());
                self.created = true;
            }
            InventoryEvent::BatchReceived(e) => {
                self.batches.push(e.batch.clone());
                self.recompute_stock(e.occurred_at);
            }
            InventoryEvent::StockDeducted(e) => {
                for entry in &e.entries {
                    if let Some(batch) = self.batches.iter_mut().find(|b| b.id == entry.batch_id) {
                        batch.quantity_remaining =
                            batch.quantity_remaining.saturating_sub(entry.quantity);
                    }
                }
                self.recompute_stock(e.occurred_at);
            }
            InventoryEvent::BatchCorrected(e) => {
                if let Some(batch) = self.batches.iter_mut().find(|b| b.id == e.batch_id) {
                    *batch = batch.merged(&e.patch);
                }
                self.recompute_stock(e.occurred_at);
            }
        }

        // +1 per applied event; equals the stream revision.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::RegisterProduct(cmd) => self.handle_register(cmd),
            InventoryCommand::ReceiveBatch(cmd) => self.handle_receive(cmd),
            InventoryCommand::DeductStock(cmd) => self.handle_deduct(cmd),
            InventoryCommand::CommitAllocation(cmd) => self.handle_commit(cmd),
            InventoryCommand::CorrectBatch(cmd) => self.handle_correct(cmd),
        }
    }
}

impl Product {
    fn ensure_created(&self) -> Result<(), InventoryError> {
        if !self.created {
            return Err(InventoryError::NotCreated);
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), InventoryError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch").into());
        }
        Ok(())
    }

    /// Reject a batch change that would push the product's total remaining
    /// quantity past `u64::MAX`. `replacing` names the batch `candidate` supersedes.
    fn ensure_total_fits(
        &self,
        candidate: Option<&Batch>,
        replacing: Option<&BatchId>,
    ) -> Result<(), InventoryError> {
        let total = self
            .batches
            .iter()
            .filter(|b| Some(&b.id) != replacing)
            .chain(candidate)
            .try_fold(0u64, |acc, b| acc.checked_add(b.quantity_remaining));
        if total.is_none() {
            return Err(InventoryError::invalid_quantity(
                "total remaining quantity would exceed the representable range",
            ));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterProduct) -> Result<Vec<InventoryEvent>, InventoryError> {
        if self.created {
            return Err(InventoryError::AlreadyExists);
        }
        cmd.details.validate()?;
        Ok(vec![InventoryEvent::ProductRegistered(ProductRegistered {
            product_id: cmd.product_id,
            details: cmd.details.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveBatch) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_created()?;
        self.ensure_product_id(cmd.product_id)?;

        if self.batch(&cmd.batch_id).is_some() {
            return Err(InventoryError::invalid_batch(format!(
                "batch id {} already exists on this product",
                cmd.batch_id
            )));
        }

        let input = &cmd.input;
        if input.quantity_received == 0 {
            return Err(InventoryError::invalid_quantity(
                "quantity received must be positive",
            ));
        }

        let units = self
            .details
            .as_ref()
            .map(|d| d.units.clone())
            .unwrap_or_default();

        let batch = Batch {
            id: cmd.batch_id.clone(),
            batch_number: input.batch_number.trim().to_string(),
            expiration_date: input.expiration_date,
            quantity_received: input.quantity_received,
            quantity_remaining: input.quantity_remaining.unwrap_or(input.quantity_received),
            unit_cost: input.unit_cost,
            sale_price: input.sale_price,
            received_date: input.received_date.unwrap_or(cmd.occurred_at),
            supplier_id: input.supplier_id,
            notes: input.notes.clone(),
            unit: input.unit.clone().unwrap_or(units.unit),
            units_per_package: input.units_per_package.unwrap_or(units.units_per_package),
        };
        batch.validate()?;
        self.ensure_total_fits(Some(&batch), None)?;

        tracing::debug!(
            product_id = %self.id,
            batch_id = %batch.id,
            batch_number = %batch.batch_number,
            quantity = batch.quantity_received,
            "batch accepted"
        );

        Ok(vec![InventoryEvent::BatchReceived(BatchReceived {
            product_id: self.id,
            batch,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deduct(&self, cmd: &DeductStock) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_created()?;
        self.ensure_product_id(cmd.product_id)?;

        let plan = match self.plan_allocation(cmd.quantity, cmd.occurred_at)? {
            AllocationResult::Allocated(plan) => plan,
            AllocationResult::Shortage {
                requested,
                available,
                shortage,
            } => {
                tracing::warn!(product_id = %self.id, requested, available, shortage, "insufficient stock");
                return Err(InventoryError::InsufficientStock {
                    requested,
                    available,
                    shortage,
                });
            }
        };

        Ok(vec![self.deduction_event(plan, cmd.occurred_at)])
    }

    fn handle_commit(&self, cmd: &CommitAllocation) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_created()?;
        self.ensure_product_id(cmd.product_id)?;
        self.verify_plan(&cmd.plan, cmd.occurred_at)?;
        Ok(vec![self.deduction_event(cmd.plan.clone(), cmd.occurred_at)])
    }

    fn handle_correct(&self, cmd: &CorrectBatch) -> Result<Vec<InventoryEvent>, InventoryError> {
        self.ensure_created()?;
        self.ensure_product_id(cmd.product_id)?;

        let current = self
            .batch(&cmd.batch_id)
            .ok_or_else(|| InventoryError::BatchNotFound {
                batch_id: cmd.batch_id.clone(),
            })?;

        if cmd.patch.is_empty() {
            return Err(InventoryError::invalid_batch("correction changes no field"));
        }

        let merged = current.merged(&cmd.patch);
        merged.validate()?;
        self.ensure_total_fits(Some(&merged), Some(&cmd.batch_id))?;

        if let Some(remaining) = cmd.patch.quantity_remaining {
            tracing::warn!(
                product_id = %self.id,
                batch_id = %cmd.batch_id,
                from = current.quantity_remaining,
                to = remaining,
                "quantity remaining overwritten by correction"
            );
        }

        Ok(vec![InventoryEvent::BatchCorrected(BatchCorrected {
            product_id: self.id,
            batch_id: cmd.batch_id.clone(),
            patch: cmd.patch.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Re-check a plan against the current batches before it is applied.
    fn verify_plan(&self, plan: &AllocationPlan, now: DateTime<Utc>) -> Result<(), InventoryError> {
        if plan.product_id != self.id {
            return Err(InventoryError::invalid_plan(format!(
                "plan was computed for product {}, not {}",
                plan.product_id, self.id
            )));
        }
        if plan.requested == 0 || plan.entries.is_empty() {
            return Err(InventoryError::invalid_quantity("plan allocates nothing"));
        }
        if plan.allocated() != plan.requested {
            return Err(InventoryError::invalid_plan(format!(
                "entries cover {} of {} requested units",
                plan.allocated(),
                plan.requested
            )));
        }

        let mut seen = HashSet::new();
        for entry in &plan.entries {
            if !seen.insert(&entry.batch_id) {
                return Err(InventoryError::invalid_plan(format!(
                    "batch {} appears more than once",
                    entry.batch_id
                )));
            }

            let batch = self
                .batch(&entry.batch_id)
                .ok_or_else(|| InventoryError::BatchNotFound {
                    batch_id: entry.batch_id.clone(),
                })?;

            if batch.quantity_remaining != entry.observed_remaining {
                return Err(InventoryError::ConcurrentModification {
                    batch_id: entry.batch_id.clone(),
                    expected: entry.observed_remaining,
                    actual: batch.quantity_remaining,
                });
            }
            if entry.quantity == 0 || entry.quantity > batch.quantity_remaining {
                return Err(InventoryError::invalid_plan(format!(
                    "entry for batch {} draws {} of {} remaining",
                    entry.batch_id, entry.quantity, batch.quantity_remaining
                )));
            }
            if !batch.is_available(now) {
                return Err(InventoryError::BatchExpired {
                    batch_id: entry.batch_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn deduction_event(&self, plan: AllocationPlan, occurred_at: DateTime<Utc>) -> InventoryEvent {
        tracing::debug!(
            product_id = %self.id,
            requested = plan.requested,
            batches = plan.entries.len(),
            total_cost = %plan.total_cost,
            "deduction decided"
        );
        InventoryEvent::StockDeducted(StockDeducted {
            product_id: self.id,
            requested: plan.requested,
            entries: plan.entries,
            total_cost: plan.total_cost,
            total_revenue: plan.total_revenue,
            occurred_at,
        })
    }
}
