use std::any::TypeId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use kiln::{
  ComponentDefinition, DefinitionRegistry, Error, ExtensionHost, FactoryMutator,
  InstanceInterceptor, InstanceRegistry, InterceptorChain, ManagedInstance, RegistryMutator,
  Result, Tier,
};

// Shared, ordered record of fixture callbacks. Cloning shares the log.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, event: impl Into<String>) {
    self.0.lock().push(event.into());
  }

  pub fn snapshot(&self) -> Vec<String> {
    self.0.lock().clone()
  }
}

// Extension host fixture: an insertion-ordered definition store over an
// instance registry. Extension-point objects are seeded by name up front;
// discovery still goes through definitions, so mutators that register
// definitions mid-bootstrap are picked up by later waves.
pub struct TestHost {
  registry: Arc<InstanceRegistry>,
  definitions: RwLock<IndexMap<String, Arc<ComponentDefinition>>>,
  registry_mutators: Mutex<IndexMap<String, Arc<dyn RegistryMutator>>>,
  factory_mutators: Mutex<IndexMap<String, Arc<dyn FactoryMutator>>>,
  interceptors: Mutex<IndexMap<String, Arc<dyn InstanceInterceptor>>>,
  chain: InterceptorChain,
  listeners: Mutex<Vec<String>>,
  removed_listeners: Mutex<Vec<String>>,
  metadata_clears: AtomicUsize,
}

impl TestHost {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      registry: Arc::new(InstanceRegistry::new()),
      definitions: RwLock::new(IndexMap::new()),
      registry_mutators: Mutex::new(IndexMap::new()),
      factory_mutators: Mutex::new(IndexMap::new()),
      interceptors: Mutex::new(IndexMap::new()),
      chain: InterceptorChain::new(),
      listeners: Mutex::new(Vec::new()),
      removed_listeners: Mutex::new(Vec::new()),
      metadata_clears: AtomicUsize::new(0),
    })
  }

  pub fn as_host(self: &Arc<Self>) -> Arc<dyn ExtensionHost> {
    Arc::clone(self) as Arc<dyn ExtensionHost>
  }

  pub fn registry(&self) -> &Arc<InstanceRegistry> {
    &self.registry
  }

  pub fn add_definition(&self, definition: ComponentDefinition) {
    self
      .definitions
      .write()
      .insert(definition.name().to_owned(), Arc::new(definition));
  }

  pub fn provide_registry_mutator(&self, name: &str, mutator: Arc<dyn RegistryMutator>) {
    self
      .registry_mutators
      .lock()
      .insert(name.to_owned(), mutator);
  }

  pub fn provide_factory_mutator(&self, name: &str, mutator: Arc<dyn FactoryMutator>) {
    self.factory_mutators.lock().insert(name.to_owned(), mutator);
  }

  pub fn provide_interceptor(&self, name: &str, interceptor: Arc<dyn InstanceInterceptor>) {
    self.interceptors.lock().insert(name.to_owned(), interceptor);
  }

  pub fn chain(&self) -> &InterceptorChain {
    &self.chain
  }

  pub fn registered_listeners(&self) -> Vec<String> {
    self.listeners.lock().clone()
  }

  pub fn removed_listener_names(&self) -> Vec<String> {
    self.removed_listeners.lock().clone()
  }

  pub fn metadata_clear_count(&self) -> usize {
    self.metadata_clears.load(Ordering::SeqCst)
  }
}

impl DefinitionRegistry for TestHost {
  fn register_definition(&self, definition: ComponentDefinition) -> Result<()> {
    self
      .definitions
      .write()
      .insert(definition.name().to_owned(), Arc::new(definition));
    Ok(())
  }

  fn remove_definition(&self, name: &str) -> Result<()> {
    match self.definitions.write().shift_remove(name) {
      Some(_) => Ok(()),
      None => Err(Error::UnknownComponent {
        name: name.to_owned(),
      }),
    }
  }

  fn definition(&self, name: &str) -> Option<Arc<ComponentDefinition>> {
    self.definitions.read().get(name).cloned()
  }

  fn definition_names(&self) -> Vec<String> {
    self.definitions.read().keys().cloned().collect()
  }
}

impl ExtensionHost for TestHost {
  fn registry_mutator(&self, name: &str) -> Result<Arc<dyn RegistryMutator>> {
    self
      .registry_mutators
      .lock()
      .get(name)
      .cloned()
      .ok_or_else(|| Error::UnknownComponent {
        name: name.to_owned(),
      })
  }

  fn factory_mutator(&self, name: &str) -> Result<Arc<dyn FactoryMutator>> {
    self
      .factory_mutators
      .lock()
      .get(name)
      .cloned()
      .ok_or_else(|| Error::UnknownComponent {
        name: name.to_owned(),
      })
  }

  fn instance_interceptor(&self, name: &str) -> Result<Arc<dyn InstanceInterceptor>> {
    self
      .interceptors
      .lock()
      .get(name)
      .cloned()
      .ok_or_else(|| Error::UnknownComponent {
        name: name.to_owned(),
      })
  }

  fn add_interceptor(&self, interceptor: Arc<dyn InstanceInterceptor>) {
    self.chain.add(interceptor);
  }

  fn interceptor_count(&self) -> usize {
    self.chain.len()
  }

  fn register_listener_instance(&self, name: &str, _instance: &ManagedInstance) {
    self.listeners.lock().push(name.to_owned());
  }

  fn remove_listener_instance(&self, name: &str) {
    self.removed_listeners.lock().push(name.to_owned());
  }

  fn clear_metadata_caches(&self) {
    self.metadata_clears.fetch_add(1, Ordering::SeqCst);
  }
}

// --- Recording extension points ---

pub struct RecordingRegistryMutator {
  label: String,
  tier: Tier,
  log: EventLog,
  to_register: Mutex<Vec<ComponentDefinition>>,
}

impl RecordingRegistryMutator {
  pub fn new(label: &str, tier: Tier, log: &EventLog) -> Arc<Self> {
    Arc::new(Self {
      label: label.to_owned(),
      tier,
      log: log.clone(),
      to_register: Mutex::new(Vec::new()),
    })
  }

  // Definitions registered into the store when this mutator's registry
  // callback runs, simulating a mutator that introduces more extension
  // points mid-bootstrap.
  pub fn registers(self: Arc<Self>, definition: ComponentDefinition) -> Arc<Self> {
    self.to_register.lock().push(definition);
    self
  }
}

impl FactoryMutator for RecordingRegistryMutator {
  fn tier(&self) -> Tier {
    self.tier
  }

  fn mutate_factory(&self, _host: &dyn ExtensionHost) -> Result<()> {
    self.log.push(format!("{}:factory", self.label));
    Ok(())
  }
}

impl RegistryMutator for RecordingRegistryMutator {
  fn mutate_registry(&self, registry: &dyn DefinitionRegistry) -> Result<()> {
    self.log.push(format!("{}:registry", self.label));
    for definition in self.to_register.lock().drain(..) {
      registry.register_definition(definition)?;
    }
    Ok(())
  }
}

pub struct RecordingFactoryMutator {
  label: String,
  tier: Tier,
  log: EventLog,
}

impl RecordingFactoryMutator {
  pub fn new(label: &str, tier: Tier, log: &EventLog) -> Arc<Self> {
    Arc::new(Self {
      label: label.to_owned(),
      tier,
      log: log.clone(),
    })
  }
}

impl FactoryMutator for RecordingFactoryMutator {
  fn tier(&self) -> Tier {
    self.tier
  }

  fn mutate_factory(&self, _host: &dyn ExtensionHost) -> Result<()> {
    self.log.push(format!("{}:factory", self.label));
    Ok(())
  }
}

pub struct RecordingInterceptor {
  label: String,
  tier: Tier,
  log: EventLog,
  merge_aware: bool,
}

impl RecordingInterceptor {
  pub fn new(label: &str, tier: Tier, log: &EventLog) -> Arc<Self> {
    Arc::new(Self {
      label: label.to_owned(),
      tier,
      log: log.clone(),
      merge_aware: false,
    })
  }

  pub fn merge_aware(label: &str, tier: Tier, log: &EventLog) -> Arc<Self> {
    Arc::new(Self {
      label: label.to_owned(),
      tier,
      log: log.clone(),
      merge_aware: true,
    })
  }
}

impl InstanceInterceptor for RecordingInterceptor {
  fn tier(&self) -> Tier {
    self.tier
  }

  fn before_init(&self, instance: ManagedInstance, name: &str) -> Result<ManagedInstance> {
    self.log.push(format!("{}:before:{}", self.label, name));
    Ok(instance)
  }

  fn after_init(&self, instance: ManagedInstance, name: &str) -> Result<ManagedInstance> {
    self.log.push(format!("{}:after:{}", self.label, name));
    Ok(instance)
  }

  fn handles_definition_merge(&self) -> bool {
    self.merge_aware
  }

  fn merge_definition(&self, _definition: &ComponentDefinition, _type_id: TypeId, name: &str) {
    self.log.push(format!("{}:merge:{}", self.label, name));
  }
}
