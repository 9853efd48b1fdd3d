//! Pharmacy stock domain (event-sourced).
//!
//! A [`Product`] owns its stock [`Batch`]es. Demand is covered earliest-expiry
//! first: [`allocate`] plans which batches to draw from without touching them,
//! and the product commits a plan atomically, re-checking every batch it
//! touches. Pure domain logic: no IO, no storage, no wall clock.

pub mod allocation;
pub mod batch;
pub mod error;
pub mod product;

pub use allocation::{AllocationEntry, AllocationPlan, AllocationResult, allocate};
pub use batch::{Batch, BatchInput, BatchPatch, available_batches, requested_quantity};
pub use error::InventoryError;
pub use product::{
    BatchCorrected, BatchReceived, Classification, CommitAllocation, CorrectBatch, DeductStock,
    InventoryCommand, InventoryEvent, Product, ProductDetails, ProductId, ProductRegistered,
    ReceiveBatch, RegisterProduct, StockDeducted, UnitSettings,
};
