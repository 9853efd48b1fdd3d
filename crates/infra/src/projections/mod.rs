//! Read-model builders fed from the event bus.
//!
//! Projections are rebuildable from the event store and idempotent under
//! at-least-once delivery.

pub mod product_documents;

pub use product_documents::{
    BatchDocument, ProductDocument, ProductDocumentProjection, ProductProjectionError,
};
