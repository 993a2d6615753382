//! Read models built from the event journal.
//!
//! - [`Projection`] trait for folding events into a read model
//! - [`ReadModel`] trait for query access
//! - [`ProjectionProcessor`] for feeding events from the store to projections
//! - [`SalesView`]: purchase outcomes and money moved, overall and per product

pub mod error;
pub mod processor;
pub mod projection;
pub mod read_model;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Projection, ProjectionPosition};
pub use read_model::ReadModel;
pub use views::{ProductSales, SalesSummary, SalesView};
