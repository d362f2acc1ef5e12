//! Per-invocation command handling context.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use event_store::AggregateKey;
use uuid::Uuid;

use crate::unit_of_work::UnitOfWork;

/// Typed ambient data attached to a context, one value per type.
#[derive(Default)]
pub struct ContextItems {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ContextItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, returning the one it replaced.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ContextItems {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextItems")
            .field("len", &self.values.len())
            .finish()
    }
}

/// Scope of one command invocation.
///
/// Owns exactly one [`UnitOfWork`], created with the context and dropped with
/// it. A context is never shared between invocations.
pub struct CommandContext<I, E> {
    invocation_id: Uuid,
    command_name: &'static str,
    unit_of_work: UnitOfWork<I, E>,
    items: ContextItems,
}

impl<I, E> CommandContext<I, E>
where
    I: AggregateKey,
    E: Send + Sync + 'static,
{
    /// Creates a context with a fresh invocation id and an empty unit of work.
    pub fn new(command_name: &'static str) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            command_name,
            unit_of_work: UnitOfWork::new(),
            items: ContextItems::new(),
        }
    }

    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    pub fn command_name(&self) -> &'static str {
        self.command_name
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<I, E> {
        &self.unit_of_work
    }

    pub fn unit_of_work_mut(&mut self) -> &mut UnitOfWork<I, E> {
        &mut self.unit_of_work
    }

    pub fn items(&self) -> &ContextItems {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut ContextItems {
        &mut self.items
    }

    /// Shorthand for `items_mut().insert(value)`.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.items.insert(value)
    }

    /// Shorthand for `items().get::<T>()`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.items.get::<T>()
    }
}

impl<I: AggregateKey, E> std::fmt::Debug for CommandContext<I, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("invocation_id", &self.invocation_id)
            .field("command_name", &self.command_name)
            .field("unit_of_work", &self.unit_of_work)
            .field("items", &self.items)
            .finish()
    }
}
