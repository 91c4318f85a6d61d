//! Bootstrap orchestration: runs mutator phases against a host and
//! installs the instance interceptor chain.
//!
//! Registry-capable definitions conventionally declare both
//! `RegistryMutation` and `FactoryMutation`; the phases share a processed
//! set so each extension point's registry and factory callbacks run
//! exactly once even though discovery scans overlap.

use std::any::TypeId;
use std::sync::{Arc, Weak};

use ahash::{HashMap, HashSet};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::definition::{Capability, ComponentDefinition, DefinitionRegistry};
use crate::error::Result;
use crate::extension::{
  ExtensionHost, FactoryMutator, InstanceInterceptor, RegistryMutator, SuppliedMutator, Tier,
};
use crate::instance::ManagedInstance;

/// Mutators carried over from the registry phase, still owed their
/// factory callback.
pub struct FactoryMutationQueue {
  registry_backed: Vec<Arc<dyn RegistryMutator>>,
  plain: Vec<Arc<dyn FactoryMutator>>,
  processed: HashSet<String>,
}

impl FactoryMutationQueue {
  pub fn registry_backed_len(&self) -> usize {
    self.registry_backed.len()
  }

  pub fn plain_len(&self) -> usize {
    self.plain.len()
  }
}

impl std::fmt::Debug for FactoryMutationQueue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FactoryMutationQueue")
      .field("registry_backed", &self.registry_backed.len())
      .field("plain", &self.plain.len())
      .field("processed", &self.processed.len())
      .finish()
  }
}

/// Runs both mutator phases in order.
pub fn run_mutator_phases(host: &dyn ExtensionHost, supplied: Vec<SuppliedMutator>) -> Result<()> {
  let queue = run_registry_mutator_phase(host, supplied)?;
  run_factory_mutator_phase(host, queue)
}

/// Registry phase: supplied registry-capable mutators run immediately,
/// then discovered ones in three waves. The first wave takes
/// highest-tier names, the second re-scans and takes ordered names, and
/// the third loops until a re-scan finds nothing unprocessed, so mutators
/// that register further mutator definitions still get those picked up.
///
/// Every invoked registry mutator is queued for its factory callback and
/// returned along with supplied plain mutators.
pub fn run_registry_mutator_phase(
  host: &dyn ExtensionHost,
  supplied: Vec<SuppliedMutator>,
) -> Result<FactoryMutationQueue> {
  let registry: &dyn DefinitionRegistry = host;
  let mut processed = HashSet::default();
  let mut registry_backed: Vec<Arc<dyn RegistryMutator>> = Vec::new();
  let mut plain: Vec<Arc<dyn FactoryMutator>> = Vec::new();

  for mutator in supplied {
    match mutator {
      SuppliedMutator::Registry(mutator) => {
        mutator.mutate_registry(registry)?;
        registry_backed.push(mutator);
      }
      SuppliedMutator::Factory(mutator) => plain.push(mutator),
    }
  }

  let mut batch: Vec<Arc<dyn RegistryMutator>> = Vec::new();
  for name in host.names_with_capability(Capability::RegistryMutation) {
    if host.declared_tier(&name) == Tier::Highest {
      batch.push(host.registry_mutator(&name)?);
      processed.insert(name);
    }
  }
  invoke_registry_batch(registry, &mut batch, &mut registry_backed)?;

  for name in host.names_with_capability(Capability::RegistryMutation) {
    if matches!(host.declared_tier(&name), Tier::Ordered(_)) && !processed.contains(&name) {
      batch.push(host.registry_mutator(&name)?);
      processed.insert(name);
    }
  }
  invoke_registry_batch(registry, &mut batch, &mut registry_backed)?;

  let mut reiterate = true;
  while reiterate {
    reiterate = false;
    for name in host.names_with_capability(Capability::RegistryMutation) {
      if !processed.contains(&name) {
        batch.push(host.registry_mutator(&name)?);
        processed.insert(name);
        reiterate = true;
      }
    }
    invoke_registry_batch(registry, &mut batch, &mut registry_backed)?;
  }

  debug!(
    queued = registry_backed.len(),
    "registry mutator phase complete"
  );
  Ok(FactoryMutationQueue {
    registry_backed,
    plain,
    processed,
  })
}

fn invoke_registry_batch(
  registry: &dyn DefinitionRegistry,
  batch: &mut Vec<Arc<dyn RegistryMutator>>,
  queue: &mut Vec<Arc<dyn RegistryMutator>>,
) -> Result<()> {
  batch.sort_by(|a, b| a.tier().cmp(&b.tier()));
  for mutator in batch.drain(..) {
    mutator.mutate_registry(registry)?;
    queue.push(mutator);
  }
  Ok(())
}

/// Factory phase: drains the queue first (registry-backed mutators before
/// plain supplied ones), then runs discovered factory mutators by tier.
/// Highest and ordered batches are sorted; unordered ones run in
/// discovery order. Names already processed in the registry phase are
/// skipped. Finishes by dropping the host's merged-metadata caches.
pub fn run_factory_mutator_phase(
  host: &dyn ExtensionHost,
  queue: FactoryMutationQueue,
) -> Result<()> {
  let FactoryMutationQueue {
    registry_backed,
    plain,
    processed,
  } = queue;
  for mutator in &registry_backed {
    mutator.mutate_factory(host)?;
  }
  for mutator in &plain {
    mutator.mutate_factory(host)?;
  }

  let mut highest: Vec<Arc<dyn FactoryMutator>> = Vec::new();
  let mut ordered_names: Vec<String> = Vec::new();
  let mut unordered_names: Vec<String> = Vec::new();
  for name in host.names_with_capability(Capability::FactoryMutation) {
    if processed.contains(&name) {
      continue;
    }
    match host.declared_tier(&name) {
      Tier::Highest => highest.push(host.factory_mutator(&name)?),
      Tier::Ordered(_) => ordered_names.push(name),
      Tier::Unordered => unordered_names.push(name),
    }
  }

  highest.sort_by(|a, b| a.tier().cmp(&b.tier()));
  for mutator in &highest {
    mutator.mutate_factory(host)?;
  }

  let mut ordered: Vec<Arc<dyn FactoryMutator>> = Vec::with_capacity(ordered_names.len());
  for name in &ordered_names {
    ordered.push(host.factory_mutator(name)?);
  }
  ordered.sort_by(|a, b| a.tier().cmp(&b.tier()));
  for mutator in &ordered {
    mutator.mutate_factory(host)?;
  }

  for name in &unordered_names {
    host.factory_mutator(name)?.mutate_factory(host)?;
  }

  host.clear_metadata_caches();
  debug!("factory mutator phase complete");
  Ok(())
}

/// Discovers interception-capable definitions and installs them on the
/// host's chain in tier order.
///
/// A chain checker goes in first so instances created while registration
/// is still under way get flagged. Merge-aware interceptors are re-added
/// after all tiers, moving them to the end of the chain, and a contained
/// listener detector is re-added unconditionally last.
pub fn register_instance_interceptors(host: &Arc<dyn ExtensionHost>) -> Result<()> {
  let names = host.names_with_capability(Capability::InstanceInterception);
  let expected = host.interceptor_count() + 1 + names.len();
  host.add_interceptor(Arc::new(ChainChecker {
    host: Arc::downgrade(host),
    exempt: names.iter().cloned().collect(),
    expected,
  }));

  let mut highest: Vec<Arc<dyn InstanceInterceptor>> = Vec::new();
  let mut ordered_names: Vec<String> = Vec::new();
  let mut unordered_names: Vec<String> = Vec::new();
  for name in &names {
    match host.declared_tier(name) {
      Tier::Highest => highest.push(host.instance_interceptor(name)?),
      Tier::Ordered(_) => ordered_names.push(name.clone()),
      Tier::Unordered => unordered_names.push(name.clone()),
    }
  }

  let mut merge_aware: Vec<Arc<dyn InstanceInterceptor>> = Vec::new();

  highest.sort_by(|a, b| a.tier().cmp(&b.tier()));
  collect_merge_aware(&highest, &mut merge_aware);
  for interceptor in highest {
    host.add_interceptor(interceptor);
  }

  let mut ordered: Vec<Arc<dyn InstanceInterceptor>> = Vec::with_capacity(ordered_names.len());
  for name in &ordered_names {
    ordered.push(host.instance_interceptor(name)?);
  }
  ordered.sort_by(|a, b| a.tier().cmp(&b.tier()));
  collect_merge_aware(&ordered, &mut merge_aware);
  for interceptor in ordered {
    host.add_interceptor(interceptor);
  }

  let mut unordered: Vec<Arc<dyn InstanceInterceptor>> = Vec::with_capacity(unordered_names.len());
  for name in &unordered_names {
    unordered.push(host.instance_interceptor(name)?);
  }
  collect_merge_aware(&unordered, &mut merge_aware);
  for interceptor in unordered {
    host.add_interceptor(interceptor);
  }

  merge_aware.sort_by(|a, b| a.tier().cmp(&b.tier()));
  for interceptor in merge_aware {
    host.add_interceptor(interceptor);
  }

  host.add_interceptor(Arc::new(ContainedListenerDetector::new(host)));
  debug!(
    total = host.interceptor_count(),
    "instance interceptors registered"
  );
  Ok(())
}

fn collect_merge_aware(
  batch: &[Arc<dyn InstanceInterceptor>],
  merge_aware: &mut Vec<Arc<dyn InstanceInterceptor>>,
) {
  for interceptor in batch {
    if interceptor.handles_definition_merge() {
      merge_aware.push(Arc::clone(interceptor));
    }
  }
}

/// Logs instances that finish initialization while interceptor
/// registration is still incomplete; they miss the not-yet-registered
/// interceptors.
struct ChainChecker {
  host: Weak<dyn ExtensionHost>,
  exempt: HashSet<String>,
  expected: usize,
}

impl InstanceInterceptor for ChainChecker {
  fn after_init(&self, instance: ManagedInstance, name: &str) -> Result<ManagedInstance> {
    if !self.exempt.contains(name) {
      if let Some(host) = self.host.upgrade() {
        let current = host.interceptor_count();
        if !host.is_infrastructure(name) && current < self.expected {
          info!(
            name,
            current,
            expected = self.expected,
            "instance created before all interceptors were registered; later ones will not apply to it"
          );
        }
      }
    }
    Ok(instance)
  }
}

/// Hands finished singleton listeners to the host's event plumbing.
///
/// Singleton-ness is recorded at definition merge; by the time the
/// finished instance comes through `after_init` the definition may
/// already be gone. Non-singleton listeners get a one-time warning
/// instead.
pub struct ContainedListenerDetector {
  host: Weak<dyn ExtensionHost>,
  singleton_flags: Mutex<HashMap<String, bool>>,
}

impl ContainedListenerDetector {
  pub fn new(host: &Arc<dyn ExtensionHost>) -> Self {
    Self {
      host: Arc::downgrade(host),
      singleton_flags: Mutex::new(HashMap::default()),
    }
  }

  /// Detaches the named listener ahead of its destruction.
  pub fn before_destruction(&self, name: &str) {
    if let Some(host) = self.host.upgrade() {
      host.remove_listener_instance(name);
    }
  }
}

impl InstanceInterceptor for ContainedListenerDetector {
  fn handles_definition_merge(&self) -> bool {
    true
  }

  fn merge_definition(&self, definition: &ComponentDefinition, _type_id: TypeId, name: &str) {
    if definition.is_listener() {
      self
        .singleton_flags
        .lock()
        .insert(name.to_owned(), definition.scope().is_singleton());
    }
  }

  fn after_init(&self, instance: ManagedInstance, name: &str) -> Result<ManagedInstance> {
    let Some(host) = self.host.upgrade() else {
      return Ok(instance);
    };
    if host.is_declared_listener(name) {
      let flag = self.singleton_flags.lock().get(name).copied();
      match flag {
        Some(true) => host.register_listener_instance(name, &instance),
        Some(false) => {
          warn!(
            name,
            "listener component is not a singleton; it will not receive container events"
          );
          self.singleton_flags.lock().remove(name);
        }
        None => {}
      }
    }
    Ok(instance)
  }
}
