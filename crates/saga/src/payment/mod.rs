//! Payment capture and refunds, one transaction stream per purchase.

mod coordinator;
mod transaction;

pub use coordinator::{
    PaymentCoordinator, PaymentRequest, PaymentResult, PaymentSettings, ReconcileOutcome,
    RefundResult,
};
pub use transaction::{
    PaymentError, PaymentEvent, PaymentOutcomeData, PaymentStatus, PaymentTransaction,
    RefundRecord,
};
