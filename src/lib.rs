//! # Kiln
//!
//! Object lifecycle and dependency resolution for managed-instance containers.
//!
//! Kiln is the engine room of a dependency-injection container. It does not
//! scan, configure, or wire anything on its own; it gives a container the
//! machinery underneath: a tiered instance registry that serializes creation
//! while allowing same-thread reentrancy, a dependency graph that drives
//! ordered destruction, a two-phase bootstrap pipeline for container
//! extension points, and a memoized per-type lifecycle hook cache.
//!
//! ## Core Concepts
//!
//! - **Instance Registry**: named, type-erased instances held in three tiers
//!   (finished / early / factory), so reference cycles can resolve through
//!   early references while a creation is still in flight.
//! - **Dependency Graph**: who-depends-on-whom and what-contains-what,
//!   consulted during teardown to destroy dependents before the instances
//!   they depend on.
//! - **Extension Pipeline**: registry and factory mutators run in tiered
//!   waves before ordinary instances exist; instance interceptors wrap every
//!   initialization afterwards.
//! - **Lifecycle Hooks**: init and destroy hooks declared per hierarchy
//!   level, resolved once per concrete type, and invoked in hierarchy order.
//!
//! ## Quick Start
//!
//! ```
//! use kiln::{downcast, managed, InstanceRegistry};
//! use std::sync::Arc;
//!
//! struct Config {
//!   url: String,
//! }
//!
//! struct Pool {
//!   url: String,
//! }
//!
//! fn main() -> kiln::Result<()> {
//!   let registry = InstanceRegistry::new();
//!
//!   // Factories receive a creation context for nested lookups, so a
//!   // component can pull its dependencies while it is being built.
//!   let pool = registry.get_or_create("pool", |ctx| {
//!     let config = ctx.get_or_create("config", |_| {
//!       Ok(managed(Config {
//!         url: "postgres://localhost".into(),
//!       }))
//!     })?;
//!     let config = downcast::<Config>(&config).unwrap();
//!     ctx.registry().graph().register_dependency("config", "pool");
//!     Ok(managed(Pool {
//!       url: config.url.clone(),
//!     }))
//!   })?;
//!
//!   // Later lookups hand out the same instance.
//!   let again = registry.get("pool", false).unwrap();
//!   assert!(Arc::ptr_eq(&pool, &again));
//!
//!   let pool = downcast::<Pool>(&pool).unwrap();
//!   assert_eq!(pool.url, "postgres://localhost");
//!
//!   // Destroys dependents first, then runs disposal callbacks.
//!   registry.destroy_all();
//!   assert_eq!(registry.count(), 0);
//!   Ok(())
//! }
//! ```

pub mod alias;
pub mod definition;
pub mod error;
pub mod extension;
pub mod graph;
pub mod hooks;
pub mod instance;
pub mod pipeline;
pub mod registry;

pub use alias::AliasMap;
pub use definition::{Capability, ComponentDefinition, DefinitionRegistry, Role, Scope};
pub use error::{Error, Result};
pub use extension::{
  ExtensionHost, FactoryMutator, InstanceInterceptor, InterceptorChain, RegistryMutator,
  SuppliedMutator, Tier,
};
pub use graph::DependencyGraph;
pub use hooks::{Hook, HookCache, HookResult, HookSet, LifecycleInterceptor, TypeProfile};
pub use instance::{concrete_type_id, downcast, managed, ManagedInstance};
pub use pipeline::{
  register_instance_interceptors, run_factory_mutator_phase, run_mutator_phases,
  run_registry_mutator_phase, ContainedListenerDetector, FactoryMutationQueue,
};
pub use registry::{CreationContext, InstanceRegistry};
