use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use rxstock_core::{BatchId, Entity, SupplierId};

use crate::error::InventoryError;

/// A received lot of a product.
///
/// Owned by its [`crate::Product`]; fields are read-only from the outside and
/// only the product mutates them. Depleted and expired batches stay in the
/// collection for history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub(crate) id: BatchId,
    pub(crate) batch_number: String,
    pub(crate) expiration_date: DateTime<Utc>,
    pub(crate) quantity_received: u64,
    pub(crate) quantity_remaining: u64,
    pub(crate) unit_cost: Decimal,
    pub(crate) sale_price: Decimal,
    pub(crate) received_date: DateTime<Utc>,
    pub(crate) supplier_id: Option<SupplierId>,
    pub(crate) notes: Option<String>,
    pub(crate) unit: String,
    pub(crate) units_per_package: u32,
}

impl Entity for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Batch {
    pub fn id(&self) -> &BatchId {
        &self.id
    }

    pub fn batch_number(&self) -> &str {
        &self.batch_number
    }

    pub fn expiration_date(&self) -> DateTime<Utc> {
        self.expiration_date
    }

    pub fn quantity_received(&self) -> u64 {
        self.quantity_received
    }

    pub fn quantity_remaining(&self) -> u64 {
        self.quantity_remaining
    }

    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn sale_price(&self) -> Decimal {
        self.sale_price
    }

    pub fn received_date(&self) -> DateTime<Utc> {
        self.received_date
    }

    pub fn supplier_id(&self) -> Option<SupplierId> {
        self.supplier_id
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn units_per_package(&self) -> u32 {
        self.units_per_package
    }

    /// Has stock and expires strictly after `now`.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.quantity_remaining > 0 && self.expiration_date > now
    }

    /// Has stock but is at or past its expiration date.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.quantity_remaining > 0 && self.expiration_date <= now
    }

    /// Check the record-level invariants.
    pub(crate) fn validate(&self) -> Result<(), InventoryError> {
        if self.batch_number.trim().is_empty() {
            return Err(InventoryError::invalid_batch("batch number cannot be empty"));
        }
        if self.quantity_remaining > self.quantity_received {
            return Err(InventoryError::invalid_quantity(format!(
                "quantity remaining ({}) exceeds quantity received ({})",
                self.quantity_remaining, self.quantity_received
            )));
        }
        if self.expiration_date <= self.received_date {
            return Err(InventoryError::invalid_batch(
                "expiration date must be after the received date",
            ));
        }
        if self.unit_cost.is_sign_negative() || self.sale_price.is_sign_negative() {
            return Err(InventoryError::invalid_batch("prices cannot be negative"));
        }
        if self.units_per_package == 0 {
            return Err(InventoryError::invalid_batch("units per package must be positive"));
        }
        Ok(())
    }

    /// Shallow-merge `patch` onto a copy of this batch.
    pub(crate) fn merged(&self, patch: &BatchPatch) -> Batch {
        let mut next = self.clone();
        if let Some(v) = &patch.batch_number {
            next.batch_number = v.clone();
        }
        if let Some(v) = patch.expiration_date {
            next.expiration_date = v;
        }
        if let Some(v) = patch.quantity_remaining {
            next.quantity_remaining = v;
        }
        if let Some(v) = patch.unit_cost {
            next.unit_cost = v;
        }
        if let Some(v) = patch.sale_price {
            next.sale_price = v;
        }
        if let Some(v) = patch.received_date {
            next.received_date = v;
        }
        if let Some(v) = patch.supplier_id {
            next.supplier_id = Some(v);
        }
        if let Some(v) = &patch.notes {
            next.notes = Some(v.clone());
        }
        if let Some(v) = &patch.unit {
            next.unit = v.clone();
        }
        if let Some(v) = patch.units_per_package {
            next.units_per_package = v;
        }
        next
    }
}

/// Input for receiving a new batch (restock).
///
/// `received_date` defaults to the restock instant; `unit` and
/// `units_per_package` default to the product's own settings.
/// `quantity_remaining` is only for importing historical records; a normal
/// restock leaves it unset so the batch starts full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInput {
    pub batch_number: String,
    pub expiration_date: DateTime<Utc>,
    pub quantity_received: u64,
    pub unit_cost: Decimal,
    pub sale_price: Decimal,
    #[serde(default)]
    pub received_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub supplier_id: Option<SupplierId>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub units_per_package: Option<u32>,
    #[serde(default)]
    pub quantity_remaining: Option<u64>,
}

impl BatchInput {
    pub fn new(
        batch_number: impl Into<String>,
        expiration_date: DateTime<Utc>,
        quantity_received: u64,
        unit_cost: Decimal,
        sale_price: Decimal,
    ) -> Self {
        Self {
            batch_number: batch_number.into(),
            expiration_date,
            quantity_received,
            unit_cost,
            sale_price,
            received_date: None,
            supplier_id: None,
            notes: None,
            unit: None,
            units_per_package: None,
            quantity_remaining: None,
        }
    }

    pub fn received_on(mut self, received_date: DateTime<Utc>) -> Self {
        self.received_date = Some(received_date);
        self
    }

    pub fn from_supplier(mut self, supplier_id: SupplierId) -> Self {
        self.supplier_id = Some(supplier_id);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Import path only: start the batch partially consumed.
    pub fn with_remaining(mut self, quantity_remaining: u64) -> Self {
        self.quantity_remaining = Some(quantity_remaining);
        self
    }
}

/// Partial update of a batch record (data-entry correction).
///
/// `quantity_received` is immutable and deliberately absent. Overwriting
/// `quantity_remaining` bypasses allocation and is logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPatch {
    pub batch_number: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub quantity_remaining: Option<u64>,
    pub unit_cost: Option<Decimal>,
    pub sale_price: Option<Decimal>,
    pub received_date: Option<DateTime<Utc>>,
    pub supplier_id: Option<SupplierId>,
    pub notes: Option<String>,
    pub unit: Option<String>,
    pub units_per_package: Option<u32>,
}

impl BatchPatch {
    pub fn is_empty(&self) -> bool {
        *self == BatchPatch::default()
    }
}

/// Batches that can satisfy demand at `now`, earliest expiry first.
///
/// Stable sort: batches with the same expiration date keep their collection
/// order, so plans are reproducible.
pub fn available_batches(batches: &[Batch], now: DateTime<Utc>) -> Vec<&Batch> {
    let mut available: Vec<&Batch> = batches.iter().filter(|b| b.is_available(now)).collect();
    available.sort_by_key(|b| b.expiration_date);
    available
}

/// Validate a signed quantity coming from an outer boundary.
pub fn requested_quantity(raw: i64) -> Result<u64, InventoryError> {
    if raw <= 0 {
        return Err(InventoryError::invalid_quantity(format!(
            "requested quantity must be positive, got {raw}"
        )));
    }
    Ok(raw as u64)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{at, batch};
    use super::*;

    #[test]
    fn availability_requires_stock_and_future_expiry() {
        let now = at(2025, 1, 1);
        assert!(batch("a", at(2025, 1, 2), 3).is_available(now));
        assert!(!batch("b", at(2025, 1, 2), 0).is_available(now));
        // Expiring exactly now is not available.
        assert!(!batch("c", now, 3).is_available(now));
        assert!(!batch("d", at(2024, 12, 31), 3).is_available(now));
    }

    #[test]
    fn expired_means_stock_left_past_expiry() {
        let now = at(2025, 1, 1);
        assert!(batch("a", now, 3).is_expired(now));
        assert!(batch("b", at(2024, 6, 1), 3).is_expired(now));
        assert!(!batch("c", at(2024, 6, 1), 0).is_expired(now));
        assert!(!batch("d", at(2025, 6, 1), 3).is_expired(now));
    }

    #[test]
    fn available_batches_sorted_by_expiry_and_stable_on_ties() {
        let now = at(2025, 1, 1);
        let batches = vec![
            batch("late", at(2025, 9, 1), 5),
            batch("tie1", at(2025, 3, 1), 5),
            batch("gone", at(2024, 9, 1), 5),
            batch("empty", at(2025, 2, 1), 0),
            batch("tie2", at(2025, 3, 1), 5),
            batch("early", at(2025, 2, 1), 5),
        ];

        let ids: Vec<&str> = available_batches(&batches, now)
            .into_iter()
            .map(|b| b.id().as_str())
            .collect();
        assert_eq!(ids, vec!["early", "tie1", "tie2", "late"]);
    }

    #[test]
    fn merge_is_shallow_and_keeps_untouched_fields() {
        let original = batch("a", at(2025, 6, 1), 8);
        let patch = BatchPatch {
            batch_number: Some("LOT-FIXED".to_string()),
            notes: Some("relabelled".to_string()),
            ..BatchPatch::default()
        };

        let merged = original.merged(&patch);
        assert_eq!(merged.batch_number(), "LOT-FIXED");
        assert_eq!(merged.notes(), Some("relabelled"));
        assert_eq!(merged.quantity_remaining(), 8);
        assert_eq!(merged.expiration_date(), original.expiration_date());
        assert_eq!(merged.unit_cost(), original.unit_cost());
    }

    #[test]
    fn validate_rejects_overfull_and_inverted_dates() {
        let mut b = batch("a", at(2025, 6, 1), 8);
        assert!(b.validate().is_ok());

        b.quantity_remaining = b.quantity_received + 1;
        assert!(matches!(b.validate(), Err(InventoryError::InvalidQuantity(_))));

        let mut b = batch("a", at(2025, 6, 1), 8);
        b.received_date = at(2025, 6, 1);
        assert!(matches!(b.validate(), Err(InventoryError::InvalidBatch(_))));

        let mut b = batch("a", at(2025, 6, 1), 8);
        b.unit_cost = Decimal::new(-1, 0);
        assert!(matches!(b.validate(), Err(InventoryError::InvalidBatch(_))));
    }

    #[test]
    fn requested_quantity_rejects_non_positive() {
        assert_eq!(requested_quantity(7).unwrap(), 7);
        assert!(matches!(requested_quantity(0), Err(InventoryError::InvalidQuantity(_))));
        assert!(matches!(requested_quantity(-4), Err(InventoryError::InvalidQuantity(_))));
    }

    #[test]
    fn patch_deserializes_with_missing_fields() {
        let patch: BatchPatch = serde_json::from_str(r#"{"notes": "checked"}"#).unwrap();
        assert_eq!(patch.notes.as_deref(), Some("checked"));
        assert!(patch.quantity_remaining.is_none());
        assert!(!patch.is_empty());
        assert!(BatchPatch::default().is_empty());
    }
}
