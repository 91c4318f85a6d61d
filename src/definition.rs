//! Component definitions and the definition-registry seam.
//!
//! The engine never parses or stores definitions itself; an external store
//! owns them and hands the engine shared references. [`ComponentDefinition`]
//! is the record both sides agree on, and [`DefinitionRegistry`] is the
//! mutable surface registry mutators edit during bootstrap.

use std::sync::Arc;

use ahash::HashSet;
use parking_lot::Mutex;

use crate::error::Result;
use crate::extension::Tier;

/// Instance scope declared by a definition.
///
/// The registry only caches `Singleton`-scoped instances; the scope of other
/// components is carried as metadata for the surrounding container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
  #[default]
  Singleton,
  Prototype,
}

impl Scope {
  pub fn is_singleton(&self) -> bool {
    matches!(self, Scope::Singleton)
  }
}

/// Role of a component within the container.
///
/// `Infrastructure` components are part of the container's own machinery and
/// are exempt from the interceptor-chain diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
  #[default]
  Application,
  Support,
  Infrastructure,
}

/// Extension-point capability a definition can advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
  RegistryMutation,
  FactoryMutation,
  InstanceInterception,
}

/// Metadata record for a named component.
///
/// Read-only to the engine apart from the externally-managed hook sets,
/// which the definition-merge step fills in (see
/// [`HookSet::check_config`](crate::hooks::HookSet::check_config)).
#[derive(Debug)]
pub struct ComponentDefinition {
  name: String,
  scope: Scope,
  role: Role,
  tier: Option<Tier>,
  capabilities: Vec<Capability>,
  listener: bool,
  init_hook_names: Vec<String>,
  destroy_hook_names: Vec<String>,
  depends_on: Vec<String>,
  externally_managed_init: Mutex<HashSet<String>>,
  externally_managed_destroy: Mutex<HashSet<String>>,
}

impl ComponentDefinition {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      scope: Scope::default(),
      role: Role::default(),
      tier: None,
      capabilities: Vec::new(),
      listener: false,
      init_hook_names: Vec::new(),
      destroy_hook_names: Vec::new(),
      depends_on: Vec::new(),
      externally_managed_init: Mutex::new(HashSet::default()),
      externally_managed_destroy: Mutex::new(HashSet::default()),
    }
  }

  pub fn with_scope(mut self, scope: Scope) -> Self {
    self.scope = scope;
    self
  }

  pub fn with_role(mut self, role: Role) -> Self {
    self.role = role;
    self
  }

  /// Declares the extension tier used when this component is discovered as
  /// an extension point. Undeclared means `Unordered`.
  pub fn with_tier(mut self, tier: Tier) -> Self {
    self.tier = Some(tier);
    self
  }

  pub fn with_capability(mut self, capability: Capability) -> Self {
    if !self.capabilities.contains(&capability) {
      self.capabilities.push(capability);
    }
    self
  }

  /// Marks the component as a declared event listener. Listener forwarding
  /// itself lives outside the engine; the flag only feeds the
  /// contained-as-listener detection at the end of the interceptor chain.
  pub fn as_listener(mut self) -> Self {
    self.listener = true;
    self
  }

  /// Records a definition-declared init hook identifier. These identifiers
  /// are wiring-layer data; the engine's own hook discovery runs over type
  /// profiles instead.
  pub fn with_init_hook_name(mut self, name: impl Into<String>) -> Self {
    self.init_hook_names.push(name.into());
    self
  }

  pub fn with_destroy_hook_name(mut self, name: impl Into<String>) -> Self {
    self.destroy_hook_names.push(name.into());
    self
  }

  pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
    self.depends_on.push(name.into());
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn scope(&self) -> Scope {
    self.scope
  }

  pub fn role(&self) -> Role {
    self.role
  }

  pub fn is_infrastructure(&self) -> bool {
    self.role == Role::Infrastructure
  }

  pub fn tier(&self) -> Option<Tier> {
    self.tier
  }

  pub fn capabilities(&self) -> &[Capability] {
    &self.capabilities
  }

  pub fn has_capability(&self, capability: Capability) -> bool {
    self.capabilities.contains(&capability)
  }

  pub fn is_listener(&self) -> bool {
    self.listener
  }

  pub fn init_hook_names(&self) -> &[String] {
    &self.init_hook_names
  }

  pub fn destroy_hook_names(&self) -> &[String] {
    &self.destroy_hook_names
  }

  pub fn depends_on(&self) -> &[String] {
    &self.depends_on
  }

  /// Marks an init hook identifier as externally managed for this
  /// definition. Returns `false` when it was already registered, which is
  /// what makes repeated definition merges idempotent.
  pub fn register_externally_managed_init(&self, identifier: &str) -> bool {
    self
      .externally_managed_init
      .lock()
      .insert(identifier.to_owned())
  }

  pub fn is_externally_managed_init(&self, identifier: &str) -> bool {
    self.externally_managed_init.lock().contains(identifier)
  }

  pub fn register_externally_managed_destroy(&self, identifier: &str) -> bool {
    self
      .externally_managed_destroy
      .lock()
      .insert(identifier.to_owned())
  }

  pub fn is_externally_managed_destroy(&self, identifier: &str) -> bool {
    self.externally_managed_destroy.lock().contains(identifier)
  }
}

/// Mutable surface of the external definition store.
///
/// Registry mutators receive this view during the first bootstrap phase; the
/// engine itself only reads through it.
pub trait DefinitionRegistry: Send + Sync {
  /// Registers a definition, replacing any existing one under the same name
  /// unless the implementation forbids overriding.
  fn register_definition(&self, definition: ComponentDefinition) -> Result<()>;

  fn remove_definition(&self, name: &str) -> Result<()>;

  fn definition(&self, name: &str) -> Option<Arc<ComponentDefinition>>;

  /// All registered definition names, in registration order.
  fn definition_names(&self) -> Vec<String>;

  fn contains_definition(&self, name: &str) -> bool {
    self.definition(name).is_some()
  }
}
