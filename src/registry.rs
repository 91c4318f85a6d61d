//! The tiered instance registry and its creation coordinator.
//!
//! Instances move through three tiers: a `factory` slot holding a deferred
//! early-reference producer, an `early` tier exposing partially initialized
//! instances to break reference cycles, and a `finished` tier of fully
//! constructed instances. Finished reads are lock-free; every tier
//! transition happens under one reentrant mutex, so a factory running inside
//! [`InstanceRegistry::get_or_create`] may call back into the registry from
//! the same thread while other threads block until the creation completes.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use ahash::{HashMap, HashSet};
use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::instance::ManagedInstance;

/// Cap on failures retained by one creation's suppressed accumulator; the
/// first recorded failures win.
const SUPPRESSED_LIMIT: usize = 100;

type EarlyFactory = Box<dyn FnOnce() -> ManagedInstance + Send>;
type DisposeError = Box<dyn std::error::Error + Send + Sync>;
type DisposeFn = Box<dyn FnOnce() -> std::result::Result<(), DisposeError> + Send>;

/// Everything that must transition atomically during a creation. Guarded by
/// the reentrant creation mutex; never borrowed across a factory call.
#[derive(Default)]
struct CreationState {
  early: HashMap<String, ManagedInstance>,
  factories: HashMap<String, EarlyFactory>,
  /// Names registered as finished or factory-backed, in registration order.
  registered: IndexSet<String>,
  in_creation: HashSet<String>,
  /// Names exempt from in-creation bookkeeping. Population policy belongs
  /// to the caller; the registry only honors the flag.
  exclusions: HashSet<String>,
  in_teardown: bool,
}

/// Thread-safe, identity-keyed registry of managed instances.
pub struct InstanceRegistry {
  /// Finished instances, readable without the creation lock.
  finished: DashMap<String, ManagedInstance>,
  state: ReentrantMutex<RefCell<CreationState>>,
  /// One-shot destroy callbacks, insertion-ordered, independent lock.
  disposables: Mutex<IndexMap<String, DisposeFn>>,
  graph: DependencyGraph,
}

impl Default for InstanceRegistry {
  fn default() -> Self {
    Self {
      finished: DashMap::new(),
      state: ReentrantMutex::new(RefCell::new(CreationState::default())),
      disposables: Mutex::new(IndexMap::new()),
      graph: DependencyGraph::new(),
    }
  }
}

impl fmt::Debug for InstanceRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InstanceRegistry")
      .field("finished", &self.finished.len())
      .field("disposables", &self.disposables.lock().len())
      .finish_non_exhaustive()
  }
}

impl InstanceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// The dependency and containment books consulted during destruction.
  pub fn graph(&self) -> &DependencyGraph {
    &self.graph
  }

  fn finished_peek(&self, name: &str) -> Option<ManagedInstance> {
    // Clone out immediately; a held shard guard must never outlive this
    // call or ordering against the creation mutex becomes an issue.
    self.finished.get(name).map(|found| Arc::clone(found.value()))
  }

  /// Looks a name up across the tiers without creating anything.
  ///
  /// Finished instances are always visible. The early tier is consulted only
  /// while the name is mid-creation; with `allow_early` the registered early
  /// factory is invoked, consumed, and its product promoted to the early
  /// tier for subsequent callers.
  pub fn get(&self, name: &str, allow_early: bool) -> Option<ManagedInstance> {
    if let Some(found) = self.finished_peek(name) {
      return Some(found);
    }
    let state = self.state.lock();
    if let Some(found) = self.finished_peek(name) {
      return Some(found);
    }
    {
      let st = state.borrow();
      if !st.in_creation.contains(name) {
        return None;
      }
      if let Some(found) = st.early.get(name) {
        return Some(Arc::clone(found));
      }
      if !allow_early {
        return None;
      }
    }
    let factory = state.borrow_mut().factories.remove(name)?;
    let early = factory();
    state
      .borrow_mut()
      .early
      .insert(name.to_owned(), Arc::clone(&early));
    Some(early)
  }

  /// Returns the finished instance under `name`, or runs `factory` to build
  /// and publish it.
  ///
  /// The factory receives a [`CreationContext`] for reentrant lookups and
  /// nested creations; nested creation failures are recorded into this
  /// call's suppressed accumulator and attached as related causes if this
  /// creation itself fails.
  pub fn get_or_create<F>(&self, name: &str, factory: F) -> Result<ManagedInstance>
  where
    F: FnOnce(&CreationContext<'_>) -> Result<ManagedInstance>,
  {
    let suppressed = SuppressedLog::default();
    self.create_guarded(name, factory, &suppressed, true)
  }

  fn create_guarded<F>(
    &self,
    name: &str,
    factory: F,
    suppressed: &SuppressedLog,
    top_level: bool,
  ) -> Result<ManagedInstance>
  where
    F: FnOnce(&CreationContext<'_>) -> Result<ManagedInstance>,
  {
    if let Some(found) = self.finished_peek(name) {
      return Ok(found);
    }
    let _state = self.state.lock();
    if let Some(found) = self.finished_peek(name) {
      return Ok(found);
    }
    if self.in_teardown() {
      return Err(Error::CreationNotAllowedDuringTeardown {
        name: name.to_owned(),
      });
    }
    debug!(name, "creating managed instance");
    self.before_creation(name)?;
    let context = CreationContext {
      registry: self,
      name,
      suppressed,
    };
    match factory(&context) {
      Ok(instance) => {
        self.after_creation(name)?;
        self.commit(name, Arc::clone(&instance));
        Ok(instance)
      }
      Err(cause) => {
        self.after_creation(name)?;
        if matches!(cause, Error::DuplicateRegistration { .. }) {
          // The instance appeared implicitly while the factory ran: a
          // nested path registered it. Hand that one out.
          if let Some(found) = self.finished_peek(name) {
            return Ok(found);
          }
        }
        let failure = Error::CreationFailure {
          name: name.to_owned(),
          source: Box::new(cause),
          related: if top_level {
            suppressed.take()
          } else {
            Vec::new()
          },
        };
        if !top_level {
          suppressed.record(failure.clone());
        }
        Err(failure)
      }
    }
  }

  fn in_teardown(&self) -> bool {
    let state = self.state.lock();
    let flagged = state.borrow().in_teardown;
    flagged
  }

  fn before_creation(&self, name: &str) -> Result<()> {
    let state = self.state.lock();
    let mut st = state.borrow_mut();
    if !st.exclusions.contains(name) && !st.in_creation.insert(name.to_owned()) {
      return Err(Error::CurrentlyInCreation {
        name: name.to_owned(),
      });
    }
    Ok(())
  }

  fn after_creation(&self, name: &str) -> Result<()> {
    let state = self.state.lock();
    let mut st = state.borrow_mut();
    if !st.exclusions.contains(name) && !st.in_creation.remove(name) {
      return Err(Error::InternalInvariantViolation {
        detail: format!("'{name}' was not marked in-creation when its creation completed"),
      });
    }
    Ok(())
  }

  /// Publishes `instance` as finished and clears the transitional tiers.
  fn commit(&self, name: &str, instance: ManagedInstance) {
    let state = self.state.lock();
    let mut st = state.borrow_mut();
    self.finished.insert(name.to_owned(), instance);
    st.early.remove(name);
    st.factories.remove(name);
    st.registered.insert(name.to_owned());
  }

  /// Registers an externally built instance as finished.
  pub fn register_finished(&self, name: &str, instance: ManagedInstance) -> Result<()> {
    let _state = self.state.lock();
    if self.finished.contains_key(name) {
      return Err(Error::DuplicateRegistration {
        name: name.to_owned(),
      });
    }
    self.commit(name, instance);
    Ok(())
  }

  /// Installs the early-reference producer for a name under construction.
  /// No-op when the name is already finished.
  pub fn register_early_factory<F>(&self, name: &str, factory: F)
  where
    F: FnOnce() -> ManagedInstance + Send + 'static,
  {
    let state = self.state.lock();
    if self.finished.contains_key(name) {
      return;
    }
    let mut st = state.borrow_mut();
    st.factories.insert(name.to_owned(), Box::new(factory));
    st.early.remove(name);
    st.registered.insert(name.to_owned());
  }

  pub fn contains_finished(&self, name: &str) -> bool {
    self.finished.contains_key(name)
  }

  /// Registered names in registration order, covering finished and
  /// factory-backed entries.
  pub fn list_names(&self) -> Vec<String> {
    let state = self.state.lock();
    let names = state.borrow().registered.iter().cloned().collect();
    names
  }

  pub fn count(&self) -> usize {
    let state = self.state.lock();
    let count = state.borrow().registered.len();
    count
  }

  /// Drops every tier entry for `name`, including its registration-order
  /// slot.
  pub fn remove(&self, name: &str) {
    let state = self.state.lock();
    let mut st = state.borrow_mut();
    self.finished.remove(name);
    st.early.remove(name);
    st.factories.remove(name);
    st.registered.shift_remove(name);
  }

  pub fn is_in_creation(&self, name: &str) -> bool {
    let state = self.state.lock();
    let marked = state.borrow().in_creation.contains(name);
    marked
  }

  /// Exempts a name from in-creation bookkeeping (or re-enables it). The
  /// policy deciding which names are excluded lives outside the registry.
  pub fn set_creation_exclusion(&self, name: &str, excluded: bool) {
    let state = self.state.lock();
    let mut st = state.borrow_mut();
    if excluded {
      st.exclusions.insert(name.to_owned());
    } else {
      st.exclusions.remove(name);
    }
  }

  /// Attaches the one-shot destroy callback run when `name` is destroyed.
  /// Re-registration replaces the previous callback.
  pub fn register_disposable<F>(&self, name: &str, callback: F)
  where
    F: FnOnce() -> std::result::Result<(), DisposeError> + Send + 'static,
  {
    self
      .disposables
      .lock()
      .insert(name.to_owned(), Box::new(callback));
  }

  /// Tears the registry down: disposal callbacks run in reverse
  /// registration order, dependents before their dependencies, contained
  /// instances after their container. Creation requests made while the
  /// teardown runs are rejected. The registry is empty and usable again
  /// afterwards.
  pub fn destroy_all(&self) {
    debug!("destroying all managed instances");
    {
      let state = self.state.lock();
      state.borrow_mut().in_teardown = true;
    }
    let names: Vec<String> = self.disposables.lock().keys().cloned().collect();
    for name in names.iter().rev() {
      self.destroy_one(name);
    }
    self.graph.clear_all();
    self.clear_cache();
  }

  /// Destroys a single name: tiers dropped, dependents destroyed first,
  /// disposal callback run, contained instances destroyed after.
  pub fn destroy_one(&self, name: &str) {
    self.remove(name);
    let callback = self.disposables.lock().shift_remove(name);
    self.destroy_instance(name, callback);
  }

  fn destroy_instance(&self, name: &str, callback: Option<DisposeFn>) {
    let dependents = self.graph.take_dependents(name);
    if !dependents.is_empty() {
      debug!(name, ?dependents, "destroying dependent instances first");
      for dependent in &dependents {
        self.destroy_one(dependent);
      }
    }
    if let Some(callback) = callback {
      if let Err(error) = callback() {
        warn!(name, %error, "destroy callback failed");
      }
    }
    for contained in self.graph.take_contained(name) {
      self.destroy_one(&contained);
    }
    self.graph.remove_all(name);
  }

  fn clear_cache(&self) {
    let state = self.state.lock();
    let mut st = state.borrow_mut();
    self.finished.clear();
    st.early.clear();
    st.factories.clear();
    st.registered.clear();
    st.in_teardown = false;
  }
}

/// Per-creation accumulator for failures raised and survived while a
/// creation is in flight.
#[derive(Debug, Default)]
struct SuppressedLog {
  entries: Mutex<Vec<Error>>,
}

impl SuppressedLog {
  fn record(&self, error: Error) {
    let mut entries = self.entries.lock();
    if entries.len() < SUPPRESSED_LIMIT {
      entries.push(error);
    }
  }

  fn take(&self) -> Vec<Error> {
    std::mem::take(&mut *self.entries.lock())
  }
}

/// Explicit creation-scope handle passed to factories.
///
/// Carries the name whose factory is executing and the top-level call's
/// suppressed accumulator, replacing any notion of thread-local creation
/// state. Nested lookups and creations go through here so the whole
/// creation tree shares one accumulator.
pub struct CreationContext<'a> {
  registry: &'a InstanceRegistry,
  name: &'a str,
  suppressed: &'a SuppressedLog,
}

impl CreationContext<'_> {
  /// The name whose factory is currently executing.
  pub fn name(&self) -> &str {
    self.name
  }

  pub fn registry(&self) -> &InstanceRegistry {
    self.registry
  }

  pub fn get(&self, name: &str, allow_early: bool) -> Option<ManagedInstance> {
    self.registry.get(name, allow_early)
  }

  /// Nested creation sharing this creation's suppressed accumulator.
  pub fn get_or_create<F>(&self, name: &str, factory: F) -> Result<ManagedInstance>
  where
    F: FnOnce(&CreationContext<'_>) -> Result<ManagedInstance>,
  {
    self
      .registry
      .create_guarded(name, factory, self.suppressed, false)
  }

  pub fn register_early_factory<F>(&self, name: &str, factory: F)
  where
    F: FnOnce() -> ManagedInstance + Send + 'static,
  {
    self.registry.register_early_factory(name, factory);
  }

  /// Records a failure this creation survived, for attachment as a related
  /// cause should the creation fail later.
  pub fn record_suppressed(&self, error: Error) {
    self.suppressed.record(error);
  }
}

impl fmt::Debug for CreationContext<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CreationContext")
      .field("name", &self.name)
      .finish_non_exhaustive()
  }
}
