//! Extension-point contracts: mutator and interceptor traits, precedence
//! tiers, and the host seam the bootstrap pipeline drives.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::definition::{Capability, ComponentDefinition, DefinitionRegistry};
use crate::error::Result;
use crate::instance::ManagedInstance;

/// Precedence tier of an extension point.
///
/// `Highest` sorts before every `Ordered` rank, and `Ordered` ranks sort
/// ascending before `Unordered`. Within a tier, discovery order is
/// preserved by stable sorts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Tier {
  Highest,
  Ordered(i32),
  #[default]
  Unordered,
}

impl Tier {
  fn sort_key(self) -> (u8, i32) {
    match self {
      Tier::Highest => (0, 0),
      Tier::Ordered(rank) => (1, rank),
      Tier::Unordered => (2, 0),
    }
  }
}

impl Ord for Tier {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.sort_key().cmp(&other.sort_key())
  }
}

impl PartialOrd for Tier {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

/// Extension point run after definitions are registered, before any
/// ordinary instance is created. Sees the host and may pre-create or
/// reconfigure components through it.
pub trait FactoryMutator: Send + Sync {
  fn tier(&self) -> Tier {
    Tier::Unordered
  }

  fn mutate_factory(&self, host: &dyn ExtensionHost) -> Result<()>;
}

/// Registry-capable extension point: additionally runs against the raw
/// definition registry before any factory mutator, and may register or
/// remove definitions there.
pub trait RegistryMutator: FactoryMutator {
  fn mutate_registry(&self, registry: &dyn DefinitionRegistry) -> Result<()>;
}

/// Per-instance interception around initialization. Both callbacks may
/// replace the instance; the default passes it through unchanged.
pub trait InstanceInterceptor: Send + Sync {
  fn tier(&self) -> Tier {
    Tier::Unordered
  }

  fn before_init(&self, instance: ManagedInstance, name: &str) -> Result<ManagedInstance> {
    let _ = name;
    Ok(instance)
  }

  fn after_init(&self, instance: ManagedInstance, name: &str) -> Result<ManagedInstance> {
    let _ = name;
    Ok(instance)
  }

  /// Opt-in to [`merge_definition`](Self::merge_definition) callbacks.
  fn handles_definition_merge(&self) -> bool {
    false
  }

  /// Called when a definition is merged for a known concrete type, before
  /// instances of it are created.
  fn merge_definition(&self, definition: &ComponentDefinition, type_id: TypeId, name: &str) {
    let _ = (definition, type_id, name);
  }
}

/// A mutator handed to the bootstrap pipeline directly rather than
/// discovered from definitions.
#[derive(Clone)]
pub enum SuppliedMutator {
  Factory(Arc<dyn FactoryMutator>),
  Registry(Arc<dyn RegistryMutator>),
}

impl SuppliedMutator {
  pub fn factory(mutator: impl FactoryMutator + 'static) -> Self {
    SuppliedMutator::Factory(Arc::new(mutator))
  }

  pub fn registry(mutator: impl RegistryMutator + 'static) -> Self {
    SuppliedMutator::Registry(Arc::new(mutator))
  }
}

impl fmt::Debug for SuppliedMutator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SuppliedMutator::Factory(_) => f.write_str("SuppliedMutator::Factory"),
      SuppliedMutator::Registry(_) => f.write_str("SuppliedMutator::Registry"),
    }
  }
}

/// The container surface the bootstrap pipeline drives.
///
/// A host owns a definition registry, can materialize extension points
/// from definition names, and maintains the live interceptor chain.
/// Capability and tier queries have definition-backed defaults.
pub trait ExtensionHost: DefinitionRegistry {
  /// Names of definitions declaring `capability`, in registration order.
  fn names_with_capability(&self, capability: Capability) -> Vec<String> {
    self
      .definition_names()
      .into_iter()
      .filter(|name| {
        self
          .definition(name)
          .is_some_and(|definition| definition.has_capability(capability))
      })
      .collect()
  }

  /// Tier a definition declares for its extension point, defaulting to
  /// [`Tier::Unordered`] when undeclared.
  fn declared_tier(&self, name: &str) -> Tier {
    self
      .definition(name)
      .and_then(|definition| definition.tier())
      .unwrap_or(Tier::Unordered)
  }

  fn registry_mutator(&self, name: &str) -> Result<Arc<dyn RegistryMutator>>;

  fn factory_mutator(&self, name: &str) -> Result<Arc<dyn FactoryMutator>>;

  fn instance_interceptor(&self, name: &str) -> Result<Arc<dyn InstanceInterceptor>>;

  /// Appends an interceptor to the live chain. Re-adding one already in
  /// the chain moves it to the end instead of duplicating it.
  fn add_interceptor(&self, interceptor: Arc<dyn InstanceInterceptor>);

  fn interceptor_count(&self) -> usize;

  fn is_infrastructure(&self, name: &str) -> bool {
    self
      .definition(name)
      .is_some_and(|definition| definition.is_infrastructure())
  }

  fn is_declared_listener(&self, name: &str) -> bool {
    self
      .definition(name)
      .is_some_and(|definition| definition.is_listener())
  }

  /// Hands a finished singleton listener to the host's event plumbing.
  fn register_listener_instance(&self, name: &str, instance: &ManagedInstance) {
    let _ = (name, instance);
  }

  /// Detaches a listener previously handed over, or one registered by name
  /// that turned out not to be a singleton.
  fn remove_listener_instance(&self, name: &str) {
    let _ = name;
  }

  /// Drops merged-metadata caches so late-registered interceptors see
  /// fresh merges.
  fn clear_metadata_caches(&self) {}
}

/// The live, ordered interceptor list applied around instance
/// initialization.
#[derive(Default)]
pub struct InterceptorChain {
  interceptors: RwLock<Vec<Arc<dyn InstanceInterceptor>>>,
}

impl InterceptorChain {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends `interceptor`, first removing any existing entry for the same
  /// object so re-registration moves it to the end.
  pub fn add(&self, interceptor: Arc<dyn InstanceInterceptor>) {
    let mut interceptors = self.interceptors.write();
    interceptors.retain(|existing| !Arc::ptr_eq(existing, &interceptor));
    interceptors.push(interceptor);
  }

  pub fn len(&self) -> usize {
    self.interceptors.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.interceptors.read().is_empty()
  }

  pub fn snapshot(&self) -> Vec<Arc<dyn InstanceInterceptor>> {
    self.interceptors.read().clone()
  }

  /// Threads `instance` through every interceptor's `before_init`. The
  /// first error aborts the chain.
  pub fn apply_before_init(
    &self,
    mut instance: ManagedInstance,
    name: &str,
  ) -> Result<ManagedInstance> {
    for interceptor in self.snapshot() {
      instance = interceptor.before_init(instance, name)?;
    }
    Ok(instance)
  }

  pub fn apply_after_init(
    &self,
    mut instance: ManagedInstance,
    name: &str,
  ) -> Result<ManagedInstance> {
    for interceptor in self.snapshot() {
      instance = interceptor.after_init(instance, name)?;
    }
    Ok(instance)
  }

  /// Fans a definition merge out to every merge-aware interceptor.
  pub fn apply_merged_definition(
    &self,
    definition: &ComponentDefinition,
    type_id: TypeId,
    name: &str,
  ) {
    for interceptor in self.snapshot() {
      if interceptor.handles_definition_merge() {
        interceptor.merge_definition(definition, type_id, name);
      }
    }
  }
}

impl fmt::Debug for InterceptorChain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InterceptorChain")
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}
