//! Shared types used across the booking service crates.

pub mod clock;
pub mod ids;
pub mod money;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use ids::{AggregateId, StreamId};
pub use money::Money;
