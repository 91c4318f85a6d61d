//! Type-erased handles for managed instances.
//!
//! Instances live in the registry as `Arc<dyn Any + Send + Sync>` so one map
//! can hold arbitrary component types. Callers erase on the way in with
//! [`managed`] and recover the concrete type with [`downcast`].

use std::any::{Any, TypeId};
use std::sync::Arc;

/// A shared, type-erased managed instance.
pub type ManagedInstance = Arc<dyn Any + Send + Sync>;

/// Erases a value into a [`ManagedInstance`].
pub fn managed<T: Send + Sync + 'static>(value: T) -> ManagedInstance {
  Arc::new(value)
}

/// Recovers a typed handle from a managed instance, if the concrete type
/// matches.
pub fn downcast<T: Send + Sync + 'static>(instance: &ManagedInstance) -> Option<Arc<T>> {
  Arc::clone(instance).downcast::<T>().ok()
}

/// The `TypeId` of the concrete value behind the erased handle.
///
/// Note this is not `Arc::type_id`: the handle is dereferenced first so the
/// id describes the stored value, never the smart pointer.
pub fn concrete_type_id(instance: &ManagedInstance) -> TypeId {
  (**instance).type_id()
}
