//! Read model trait for query-side views.

/// A read model providing query access to data folded from events.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the number of entries in this read model.
    fn count(&self) -> usize;
}
