//! Step names of the purchase flow, recorded with every failure and
//! compensation event.

/// Aggregate type of the purchase streams.
pub const SAGA_TYPE: &str = "Purchase";

pub const STEP_CREATE_BOOKING: &str = "create_booking";
pub const STEP_APPLY_DISCOUNT: &str = "apply_discount";
pub const STEP_CAPTURE_PAYMENT: &str = "capture_payment";
pub const STEP_CONFIRM_BOOKING: &str = "confirm_booking";

/// Compensation: refund the capture, or reconcile a timed-out one.
pub const STEP_REFUND_PAYMENT: &str = "refund_payment";
pub const STEP_CANCEL_BOOKING: &str = "cancel_booking";
pub const STEP_RELEASE_COUPON: &str = "release_coupon";
pub const STEP_CANCEL_NOTIFICATIONS: &str = "cancel_notifications";

/// Recorded as the failed step when a customer cancels a completed purchase.
pub const STEP_CUSTOMER_CANCELLATION: &str = "customer_cancellation";
/// Recorded as the failed step when recovery finds a purchase left mid-flight.
pub const STEP_RECOVERY: &str = "recovery";
