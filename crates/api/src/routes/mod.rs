//! HTTP handlers, one module per resource.

pub mod admin;
pub mod availability;
pub mod health;
pub mod metrics;
pub mod purchases;
