//! Per-type lifecycle hook discovery, caching, and invocation.
//!
//! Hook metadata is declared explicitly through [`TypeProfile`]s: each
//! profile names a hierarchy level, declares its init/destroy hooks, and
//! optionally links a parent level. Resolution walks the chain from the
//! most derived level upward, prepending init hooks (outermost level runs
//! first) and appending destroy hooks (most derived runs first), and the
//! result is memoized per concrete type behind a double-checked lock.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use crate::definition::ComponentDefinition;
use crate::error::{Error, Result};
use crate::extension::{InstanceInterceptor, Tier};
use crate::instance::{concrete_type_id, ManagedInstance};

/// Outcome of a user hook body.
pub type HookResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type HookCallable = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> HookResult + Send + Sync>;

static EMPTY_HOOKS: Lazy<Arc<HookSet>> = Lazy::new(|| Arc::new(HookSet::empty()));

/// A declared hook before resolution: identifier metadata plus the erased
/// callable. Parameter counts come from declaration metadata and are
/// validated during discovery, not at declaration time.
struct HookDecl {
  name: String,
  declared_params: usize,
  private: bool,
  callable: HookCallable,
}

/// Hook metadata for one level of a type's hierarchy.
pub struct TypeProfile {
  type_id: TypeId,
  level_name: String,
  parent: Option<Arc<TypeProfile>>,
  init_decls: Vec<HookDecl>,
  destroy_decls: Vec<HookDecl>,
}

impl TypeProfile {
  /// Starts a profile for `T`, named after the type.
  pub fn of<T: 'static>() -> TypeProfileBuilder<T> {
    TypeProfileBuilder::new(short_type_name::<T>())
  }

  /// Starts an explicitly named hierarchy level for `T`. Level names key
  /// qualified identifiers of private hooks, so give base levels stable
  /// names.
  pub fn level<T: 'static>(name: impl Into<String>) -> TypeProfileBuilder<T> {
    TypeProfileBuilder::new(name.into())
  }

  pub fn type_id(&self) -> TypeId {
    self.type_id
  }

  pub fn level_name(&self) -> &str {
    &self.level_name
  }
}

impl fmt::Debug for TypeProfile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TypeProfile")
      .field("level_name", &self.level_name)
      .field("init_decls", &self.init_decls.len())
      .field("destroy_decls", &self.destroy_decls.len())
      .field("parent", &self.parent.as_ref().map(|p| p.level_name()))
      .finish()
  }
}

/// Fluent builder for [`TypeProfile`]s. Hook closures take the concrete
/// receiver; erasure happens here.
pub struct TypeProfileBuilder<T> {
  level_name: String,
  parent: Option<Arc<TypeProfile>>,
  init_decls: Vec<HookDecl>,
  destroy_decls: Vec<HookDecl>,
  _receiver: PhantomData<fn(&T)>,
}

impl<T: 'static> TypeProfileBuilder<T> {
  fn new(level_name: String) -> Self {
    Self {
      level_name,
      parent: None,
      init_decls: Vec::new(),
      destroy_decls: Vec::new(),
      _receiver: PhantomData,
    }
  }

  pub fn init_hook<F>(self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(&T) -> HookResult + Send + Sync + 'static,
  {
    self.declare_init(name, 0, false, hook)
  }

  pub fn destroy_hook<F>(self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(&T) -> HookResult + Send + Sync + 'static,
  {
    self.declare_destroy(name, 0, false, hook)
  }

  /// Declares an init hook keyed by its qualified identifier
  /// (`Level::name`), so same-named private hooks in unrelated levels never
  /// collide and are never deduplicated against each other.
  pub fn private_init_hook<F>(self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(&T) -> HookResult + Send + Sync + 'static,
  {
    self.declare_init(name, 0, true, hook)
  }

  pub fn private_destroy_hook<F>(self, name: impl Into<String>, hook: F) -> Self
  where
    F: Fn(&T) -> HookResult + Send + Sync + 'static,
  {
    self.declare_destroy(name, 0, true, hook)
  }

  /// Declaration carrying scanner-supplied parameter-count metadata. Hooks
  /// are invoked with the receiver only, so any nonzero count is rejected
  /// during discovery.
  pub fn init_hook_with_params<F>(
    self,
    name: impl Into<String>,
    declared_params: usize,
    hook: F,
  ) -> Self
  where
    F: Fn(&T) -> HookResult + Send + Sync + 'static,
  {
    self.declare_init(name, declared_params, false, hook)
  }

  pub fn destroy_hook_with_params<F>(
    self,
    name: impl Into<String>,
    declared_params: usize,
    hook: F,
  ) -> Self
  where
    F: Fn(&T) -> HookResult + Send + Sync + 'static,
  {
    self.declare_destroy(name, declared_params, false, hook)
  }

  /// Links the parent hierarchy level.
  pub fn parent(mut self, parent: TypeProfile) -> Self {
    self.parent = Some(Arc::new(parent));
    self
  }

  pub fn finish(self) -> TypeProfile {
    TypeProfile {
      type_id: TypeId::of::<T>(),
      level_name: self.level_name,
      parent: self.parent,
      init_decls: self.init_decls,
      destroy_decls: self.destroy_decls,
    }
  }

  fn declare_init<F>(
    mut self,
    name: impl Into<String>,
    declared_params: usize,
    private: bool,
    hook: F,
  ) -> Self
  where
    F: Fn(&T) -> HookResult + Send + Sync + 'static,
  {
    self.init_decls.push(HookDecl {
      name: name.into(),
      declared_params,
      private,
      callable: erase(hook),
    });
    self
  }

  fn declare_destroy<F>(
    mut self,
    name: impl Into<String>,
    declared_params: usize,
    private: bool,
    hook: F,
  ) -> Self
  where
    F: Fn(&T) -> HookResult + Send + Sync + 'static,
  {
    self.destroy_decls.push(HookDecl {
      name: name.into(),
      declared_params,
      private,
      callable: erase(hook),
    });
    self
  }
}

fn erase<T: 'static, F>(hook: F) -> HookCallable
where
  F: Fn(&T) -> HookResult + Send + Sync + 'static,
{
  Arc::new(move |any| match any.downcast_ref::<T>() {
    Some(receiver) => hook(receiver),
    None => Err("hook receiver type mismatch".into()),
  })
}

fn short_type_name<T: ?Sized>() -> String {
  let full = std::any::type_name::<T>();
  full.rsplit("::").next().unwrap_or(full).to_owned()
}

/// A resolved hook: qualified identifier plus the erased callable.
#[derive(Clone)]
pub struct Hook {
  identifier: String,
  callable: HookCallable,
}

impl Hook {
  pub fn identifier(&self) -> &str {
    &self.identifier
  }

  fn invoke(&self, instance: &ManagedInstance) -> HookResult {
    (self.callable)(instance.as_ref())
  }
}

impl fmt::Debug for Hook {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Hook")
      .field("identifier", &self.identifier)
      .finish_non_exhaustive()
  }
}

/// The resolved hooks for one concrete type: init hooks in base-first
/// order, destroy hooks in derived-first order, plus the checked subsets
/// published by definition merge.
pub struct HookSet {
  target: String,
  init_hooks: Vec<Hook>,
  destroy_hooks: Vec<Hook>,
  checked_init: RwLock<Option<Vec<Hook>>>,
  checked_destroy: RwLock<Option<Vec<Hook>>>,
}

impl HookSet {
  fn empty() -> Self {
    Self {
      target: String::new(),
      init_hooks: Vec::new(),
      destroy_hooks: Vec::new(),
      checked_init: RwLock::new(None),
      checked_destroy: RwLock::new(None),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.init_hooks.is_empty() && self.destroy_hooks.is_empty()
  }

  /// Raw discovered init hook identifiers, in invocation order.
  pub fn init_identifiers(&self) -> Vec<String> {
    self
      .init_hooks
      .iter()
      .map(|hook| hook.identifier.clone())
      .collect()
  }

  pub fn destroy_identifiers(&self) -> Vec<String> {
    self
      .destroy_hooks
      .iter()
      .map(|hook| hook.identifier.clone())
      .collect()
  }

  /// Definition-merge pre-filter: every hook not yet externally managed on
  /// `definition` is registered there and enters the checked subset; hooks
  /// already registered are skipped. Once published, invocation uses the
  /// checked subsets.
  pub fn check_config(&self, definition: &ComponentDefinition) {
    let mut checked = Vec::with_capacity(self.init_hooks.len());
    for hook in &self.init_hooks {
      if definition.register_externally_managed_init(&hook.identifier) {
        checked.push(hook.clone());
      }
    }
    *self.checked_init.write() = Some(checked);

    let mut checked = Vec::with_capacity(self.destroy_hooks.len());
    for hook in &self.destroy_hooks {
      if definition.register_externally_managed_destroy(&hook.identifier) {
        checked.push(hook.clone());
      }
    }
    *self.checked_destroy.write() = Some(checked);
  }

  fn current_init(&self) -> Vec<Hook> {
    self
      .checked_init
      .read()
      .clone()
      .unwrap_or_else(|| self.init_hooks.clone())
  }

  fn current_destroy(&self) -> Vec<Hook> {
    self
      .checked_destroy
      .read()
      .clone()
      .unwrap_or_else(|| self.destroy_hooks.clone())
  }

  /// Runs init hooks in order. The first failure aborts initialization.
  pub fn invoke_init(&self, instance: &ManagedInstance, name: &str) -> Result<()> {
    for hook in &self.current_init() {
      trace!(name, hook = hook.identifier.as_str(), "invoking init hook");
      if let Err(reason) = hook.invoke(instance) {
        return Err(Error::HookInvocationFailure {
          name: name.to_owned(),
          method: hook.identifier.clone(),
          reason: reason.to_string(),
        });
      }
    }
    Ok(())
  }

  /// Runs destroy hooks in order. Failures are logged and swallowed so the
  /// remaining hooks and the rest of a teardown sweep still execute.
  pub fn invoke_destroy(&self, instance: &ManagedInstance, name: &str) {
    for hook in &self.current_destroy() {
      trace!(name, hook = hook.identifier.as_str(), "invoking destroy hook");
      if let Err(error) = hook.invoke(instance) {
        warn!(
          name,
          hook = hook.identifier.as_str(),
          %error,
          "destroy hook failed; continuing"
        );
      }
    }
  }

  pub fn has_destroy_hooks(&self) -> bool {
    !self.current_destroy().is_empty()
  }
}

impl fmt::Debug for HookSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HookSet")
      .field("target", &self.target)
      .field("init", &self.init_identifiers())
      .field("destroy", &self.destroy_identifiers())
      .finish()
  }
}

/// Profile store plus the memoized per-type hook resolution.
///
/// Reads hit the cache without locking; a miss serializes the build behind
/// one mutex and re-checks before building. Entries are immutable once
/// published, so register profiles before the first resolution of their
/// type.
#[derive(Debug, Default)]
pub struct HookCache {
  profiles: DashMap<TypeId, Arc<TypeProfile>>,
  cache: DashMap<TypeId, Arc<HookSet>>,
  build_lock: Mutex<()>,
}

impl HookCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_profile(&self, profile: TypeProfile) {
    self.profiles.insert(profile.type_id, Arc::new(profile));
  }

  /// Resolves the hook set for a concrete type. Types without a registered
  /// profile resolve to a shared empty set.
  pub fn hooks_for(&self, type_id: TypeId) -> Result<Arc<HookSet>> {
    if let Some(found) = self.cache.get(&type_id) {
      return Ok(Arc::clone(found.value()));
    }
    let _build = self.build_lock.lock();
    if let Some(found) = self.cache.get(&type_id) {
      return Ok(Arc::clone(found.value()));
    }
    let built = self.build_hook_set(type_id)?;
    self.cache.insert(type_id, Arc::clone(&built));
    Ok(built)
  }

  pub fn hooks_for_instance(&self, instance: &ManagedInstance) -> Result<Arc<HookSet>> {
    self.hooks_for(concrete_type_id(instance))
  }

  fn build_hook_set(&self, type_id: TypeId) -> Result<Arc<HookSet>> {
    let Some(profile) = self
      .profiles
      .get(&type_id)
      .map(|found| Arc::clone(found.value()))
    else {
      return Ok(Arc::clone(&EMPTY_HOOKS));
    };
    let target = profile.level_name.clone();
    let mut init_hooks: Vec<Hook> = Vec::new();
    let mut destroy_hooks: Vec<Hook> = Vec::new();
    let mut level = Some(profile);
    while let Some(current) = level {
      let mut level_inits = Vec::with_capacity(current.init_decls.len());
      for decl in &current.init_decls {
        level_inits.push(resolve_decl(&current, decl)?);
      }
      // Parent-level init hooks run before this level's: prepend while
      // walking up the chain.
      init_hooks.splice(0..0, level_inits);
      for decl in &current.destroy_decls {
        destroy_hooks.push(resolve_decl(&current, decl)?);
      }
      level = current.parent.clone();
    }
    if init_hooks.is_empty() && destroy_hooks.is_empty() {
      return Ok(Arc::clone(&EMPTY_HOOKS));
    }
    trace!(
      target = target.as_str(),
      inits = init_hooks.len(),
      destroys = destroy_hooks.len(),
      "hook set resolved"
    );
    Ok(Arc::new(HookSet {
      target,
      init_hooks,
      destroy_hooks,
      checked_init: RwLock::new(None),
      checked_destroy: RwLock::new(None),
    }))
  }

  pub fn invoke_init(&self, instance: &ManagedInstance, name: &str) -> Result<()> {
    self.hooks_for_instance(instance)?.invoke_init(instance, name)
  }

  /// Destroy-side dispatch never errors: discovery failures are logged and
  /// teardown moves on.
  pub fn invoke_destroy(&self, instance: &ManagedInstance, name: &str) {
    match self.hooks_for_instance(instance) {
      Ok(hooks) => hooks.invoke_destroy(instance, name),
      Err(error) => warn!(name, %error, "skipping destroy hooks: discovery failed"),
    }
  }

  /// Whether any destroy hooks apply to the type.
  pub fn requires_destroy(&self, type_id: TypeId) -> bool {
    match self.hooks_for(type_id) {
      Ok(hooks) => hooks.has_destroy_hooks(),
      Err(error) => {
        warn!(%error, "hook discovery failed; treating type as not requiring destruction");
        false
      }
    }
  }
}

fn resolve_decl(level: &TypeProfile, decl: &HookDecl) -> Result<Hook> {
  if decl.declared_params != 0 {
    return Err(Error::InvalidHookSignature {
      type_name: level.level_name.clone(),
      method: decl.name.clone(),
    });
  }
  let identifier = if decl.private {
    format!("{}::{}", level.level_name, decl.name)
  } else {
    decl.name.clone()
  };
  Ok(Hook {
    identifier,
    callable: Arc::clone(&decl.callable),
  })
}

/// The interceptor binding the hook cache into the bootstrap pipeline:
/// invokes init hooks before initialization completes and pre-filters hook
/// sets during definition merge.
#[derive(Debug)]
pub struct LifecycleInterceptor {
  hooks: Arc<HookCache>,
  tier: Tier,
}

impl LifecycleInterceptor {
  pub fn new(hooks: Arc<HookCache>) -> Self {
    Self {
      hooks,
      tier: Tier::Highest,
    }
  }

  pub fn with_tier(mut self, tier: Tier) -> Self {
    self.tier = tier;
    self
  }

  pub fn cache(&self) -> &Arc<HookCache> {
    &self.hooks
  }

  /// Destroy-side counterpart for disposal callbacks to call; failures are
  /// logged and swallowed.
  pub fn before_destruction(&self, instance: &ManagedInstance, name: &str) {
    self.hooks.invoke_destroy(instance, name);
  }

  pub fn requires_destruction(&self, instance: &ManagedInstance) -> bool {
    self.hooks.requires_destroy(concrete_type_id(instance))
  }
}

impl InstanceInterceptor for LifecycleInterceptor {
  fn tier(&self) -> Tier {
    self.tier
  }

  fn before_init(&self, instance: ManagedInstance, name: &str) -> Result<ManagedInstance> {
    self.hooks.invoke_init(&instance, name)?;
    Ok(instance)
  }

  fn handles_definition_merge(&self) -> bool {
    true
  }

  fn merge_definition(&self, definition: &ComponentDefinition, type_id: TypeId, name: &str) {
    match self.hooks.hooks_for(type_id) {
      Ok(hooks) => hooks.check_config(definition),
      Err(error) => warn!(name, %error, "definition merge skipped hook checking"),
    }
  }
}
