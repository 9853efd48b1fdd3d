//! Earliest-expiry-first allocation planning.
//!
//! Planning is pure: it reads a batch collection and decides which batches
//! would cover a request. Nothing is reserved; committing a plan is the
//! product's job (see [`crate::Product::commit_allocation`]).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use rxstock_core::{BatchId, ValueObject};

use crate::batch::{Batch, available_batches};
use crate::error::InventoryError;
use crate::product::ProductId;

/// One line of a plan: take `quantity` units from a batch.
///
/// Prices and expiry are snapshots taken at planning time. `observed_remaining`
/// is the batch's remaining quantity the plan was computed against; commit
/// refuses the plan if the batch no longer has exactly that much.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub batch_id: BatchId,
    pub batch_number: String,
    pub quantity: u64,
    pub unit_cost: Decimal,
    pub sale_price: Decimal,
    pub expiration_date: DateTime<Utc>,
    pub observed_remaining: u64,
}

impl ValueObject for AllocationEntry {}

impl AllocationEntry {
    /// `quantity × unit_cost`, or `None` if it does not fit in a `Decimal`.
    pub fn cost(&self) -> Option<Decimal> {
        Decimal::from(self.quantity).checked_mul(self.unit_cost)
    }

    /// `quantity × sale_price`, or `None` if it does not fit in a `Decimal`.
    pub fn revenue(&self) -> Option<Decimal> {
        Decimal::from(self.quantity).checked_mul(self.sale_price)
    }
}

/// A proposed, not yet committed, distribution of a request across batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub product_id: ProductId,
    pub requested: u64,
    pub entries: Vec<AllocationEntry>,
    pub total_cost: Decimal,
    pub total_revenue: Decimal,
    pub evaluated_at: DateTime<Utc>,
}

impl AllocationPlan {
    /// Sum of entry quantities (equals `requested` for plans built by [`allocate`]).
    pub fn allocated(&self) -> u64 {
        self.entries.iter().map(|e| e.quantity).sum()
    }
}

/// Outcome of planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AllocationResult {
    Allocated(AllocationPlan),
    Shortage {
        requested: u64,
        available: u64,
        shortage: u64,
    },
}

impl AllocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, AllocationResult::Allocated(_))
    }

    /// Turn a shortage into [`InventoryError::InsufficientStock`].
    pub fn into_plan(self) -> Result<AllocationPlan, InventoryError> {
        match self {
            AllocationResult::Allocated(plan) => Ok(plan),
            AllocationResult::Shortage {
                requested,
                available,
                shortage,
            } => Err(InventoryError::InsufficientStock {
                requested,
                available,
                shortage,
            }),
        }
    }
}

/// Plan how to cover `requested` units from `batches` as of `now`.
///
/// Batches are drawn earliest-expiry first; each contributes
/// `min(still_needed, quantity_remaining)` and the walk stops as soon as the
/// request is covered. If the available total is short, no plan is produced.
///
/// A zero request is a caller error, not an allocation outcome.
pub fn allocate(
    product_id: ProductId,
    batches: &[Batch],
    requested: u64,
    now: DateTime<Utc>,
) -> Result<AllocationResult, InventoryError> {
    if requested == 0 {
        return Err(InventoryError::invalid_quantity(
            "requested quantity must be positive",
        ));
    }

    let candidates = available_batches(batches, now);
    // Saturating: a total past u64::MAX covers any request, and a shortage is
    // only reported when the sum is exact.
    let available = candidates
        .iter()
        .fold(0u64, |acc, b| acc.saturating_add(b.quantity_remaining));

    if available < requested {
        return Ok(AllocationResult::Shortage {
            requested,
            available,
            shortage: requested - available,
        });
    }

    let mut need = requested;
    let mut entries = Vec::new();
    for batch in candidates {
        if need == 0 {
            break;
        }
        let take = need.min(batch.quantity_remaining);
        entries.push(AllocationEntry {
            batch_id: batch.id.clone(),
            batch_number: batch.batch_number.clone(),
            quantity: take,
            unit_cost: batch.unit_cost,
            sale_price: batch.sale_price,
            expiration_date: batch.expiration_date,
            observed_remaining: batch.quantity_remaining,
        });
        need -= take;
    }

    let total_cost = checked_total(&entries, AllocationEntry::cost)?;
    let total_revenue = checked_total(&entries, AllocationEntry::revenue)?;

    Ok(AllocationResult::Allocated(AllocationPlan {
        product_id,
        requested,
        entries,
        total_cost,
        total_revenue,
        evaluated_at: now,
    }))
}

fn checked_total(
    entries: &[AllocationEntry],
    line_value: impl Fn(&AllocationEntry) -> Option<Decimal>,
) -> Result<Decimal, InventoryError> {
    entries
        .iter()
        .try_fold(Decimal::ZERO, |acc, entry| {
            line_value(entry).and_then(|v| acc.checked_add(v))
        })
        .ok_or_else(|| InventoryError::invalid_quantity("allocation value exceeds the representable range"))
}
