//! Command contract.

use std::any::Any;
use std::fmt::Debug;

/// Upcast to [`Any`] for runtime-type routing.
///
/// Implemented for every `'static` thread-safe type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A request to change the state of one or more aggregates.
///
/// Commands are routed to handlers by their exact runtime type and are never
/// mutated while being processed.
pub trait Command: AsAny + Debug {
    /// Returns the command name used in logs, metrics and errors.
    fn command_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Checks the command's own preconditions before anything runs.
    ///
    /// A rejection surfaces as `ProcessError::InvalidArgument`.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}
