//! Stock-domain error taxonomy.

use thiserror::Error;

use rxstock_core::{BatchId, DomainError};

/// Failures of stock planning and mutation.
///
/// Every variant carries what a caller needs to decide on messaging or a retry
/// (shortage amounts, the offending batch id). Nothing here is swallowed or
/// retried by the domain itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    /// Requested more than the available (non-expired) stock.
    #[error("insufficient stock: requested {requested}, available {available}, short by {shortage}")]
    InsufficientStock {
        requested: u64,
        available: u64,
        shortage: u64,
    },

    /// A referenced batch does not exist on the product.
    #[error("batch not found: {batch_id}")]
    BatchNotFound { batch_id: BatchId },

    /// Non-positive requested quantity or a stock field out of range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A batch changed between planning and commit.
    #[error("batch {batch_id} was modified concurrently (expected {expected} remaining, found {actual})")]
    ConcurrentModification {
        batch_id: BatchId,
        expected: u64,
        actual: u64,
    },

    /// A planned batch expired before the plan was committed.
    #[error("batch {batch_id} expired before the allocation was committed")]
    BatchExpired { batch_id: BatchId },

    /// Batch fields failed validation (dates, prices, identifiers).
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// The plan is malformed or was computed for another product.
    #[error("invalid allocation plan: {0}")]
    InvalidPlan(String),

    /// The product has not been registered yet.
    #[error("product not found")]
    NotCreated,

    #[error("product already exists")]
    AlreadyExists,

    /// Generic domain failure (identifier parsing, product details).
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl InventoryError {
    /// Whether re-running plan + commit against fresh state can succeed.
    ///
    /// Shortages are not retryable: the caller decides between partial
    /// fulfilment and backorder.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InventoryError::ConcurrentModification { .. }
                | InventoryError::BatchNotFound { .. }
                | InventoryError::BatchExpired { .. }
        )
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn invalid_batch(msg: impl Into<String>) -> Self {
        Self::InvalidBatch(msg.into())
    }

    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }
}
