//! Query access to projected state.

/// A read model built by one or more projections.
pub trait ReadModel: Send + Sync {
    /// Returns the name of this read model.
    fn name(&self) -> &'static str;

    /// Returns the number of entries in this read model.
    ///
    /// Reports zero while a writer holds the model.
    fn count(&self) -> usize;
}
