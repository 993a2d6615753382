//! Read model views.

mod sales;

pub use sales::{ProductSales, SalesSummary, SalesView};
