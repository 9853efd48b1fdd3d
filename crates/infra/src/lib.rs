//! Infrastructure layer: event store, command dispatch, read models, config.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod stock_service;

#[cfg(test)]
mod integration_tests;

pub use config::StockConfig;
pub use stock_service::{Deduction, StockService, StockServiceError, PRODUCT_AGGREGATE_TYPE};
