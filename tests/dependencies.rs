use std::sync::Arc;

use kiln::{AliasMap, DependencyGraph, Error};

// --- Dependency Edges ---

#[test]
fn test_register_dependency_is_idempotent() {
  // Arrange
  let graph = DependencyGraph::new();

  // Act
  graph.register_dependency("provider", "consumer");
  graph.register_dependency("provider", "consumer");

  // Assert
  assert_eq!(graph.dependents_of("provider"), vec!["consumer"]);
  assert_eq!(graph.dependencies_of("consumer"), vec!["provider"]);
}

#[test]
fn test_dependents_preserve_registration_order() {
  let graph = DependencyGraph::new();
  graph.register_dependency("provider", "first");
  graph.register_dependency("provider", "second");
  graph.register_dependency("provider", "third");

  assert_eq!(
    graph.dependents_of("provider"),
    vec!["first", "second", "third"]
  );
}

#[test]
fn test_is_dependent_direct_and_transitive() {
  // Arrange: a <- b <- c
  let graph = DependencyGraph::new();
  graph.register_dependency("a", "b");
  graph.register_dependency("b", "c");

  // Assert
  assert!(graph.is_dependent("a", "b"));
  assert!(graph.is_dependent("a", "c"));
  assert!(graph.is_dependent("b", "c"));
  assert!(!graph.is_dependent("c", "a"));
  assert!(!graph.is_dependent("a", "unrelated"));
}

#[test]
fn test_is_dependent_survives_cyclic_edges() {
  // Arrange: a <-> b plus a dangling edge off b.
  let graph = DependencyGraph::new();
  graph.register_dependency("a", "b");
  graph.register_dependency("b", "a");
  graph.register_dependency("b", "c");

  // Assert: terminates and answers both directions.
  assert!(graph.is_dependent("a", "b"));
  assert!(graph.is_dependent("b", "a"));
  assert!(graph.is_dependent("a", "c"));
  assert!(!graph.is_dependent("c", "b"));
}

#[test]
fn test_remove_all_detaches_name_everywhere() {
  // Arrange
  let graph = DependencyGraph::new();
  graph.register_dependency("a", "b");
  graph.register_dependency("b", "c");
  graph.register_dependency("c", "a");

  // Act
  graph.remove_all("b");

  // Assert: b is gone as a key and as a member of other entries.
  assert!(!graph.has_dependents("b"));
  assert!(graph.dependencies_of("b").is_empty());
  assert_eq!(graph.dependents_of("a"), Vec::<String>::new());
  assert!(graph.is_dependent("c", "a"));
}

#[test]
fn test_containment_implies_dependency() {
  let graph = DependencyGraph::new();
  graph.register_containment("inner", "outer");

  assert!(graph.is_dependent("inner", "outer"));
  assert_eq!(graph.dependents_of("inner"), vec!["outer"]);
}

// --- Alias Resolution ---

#[test]
fn test_edges_recorded_under_canonical_names() {
  // Arrange
  let aliases = Arc::new(AliasMap::new());
  aliases.register_alias("service", "svc").unwrap();
  let graph = DependencyGraph::with_aliases(Arc::clone(&aliases));

  // Act: edges registered through the alias land on the canonical name.
  graph.register_dependency("svc", "consumer");

  // Assert
  assert_eq!(graph.dependents_of("service"), vec!["consumer"]);
  assert!(graph.is_dependent("svc", "consumer"));
  assert!(graph.is_dependent("service", "consumer"));
}

#[test]
fn test_alias_chain_resolves_to_canonical_name() {
  let aliases = AliasMap::new();
  aliases.register_alias("service", "svc").unwrap();
  aliases.register_alias("svc", "s").unwrap();

  assert_eq!(aliases.canonical_name("s"), "service");
  assert_eq!(aliases.canonical_name("svc"), "service");
  assert_eq!(aliases.canonical_name("service"), "service");
  assert_eq!(aliases.canonical_name("unknown"), "unknown");
}

#[test]
fn test_aliases_of_collects_transitively() {
  let aliases = AliasMap::new();
  aliases.register_alias("service", "svc").unwrap();
  aliases.register_alias("svc", "s").unwrap();

  let mut found = aliases.aliases_of("service");
  found.sort();
  assert_eq!(found, vec!["s", "svc"]);
}

#[test]
fn test_alias_cycle_rejected() {
  // Arrange
  let aliases = AliasMap::new();
  aliases.register_alias("a", "b").unwrap();

  // Act: "b" already resolves to "a"; aliasing "a" to "b"'s name would loop.
  let result = aliases.register_alias("b", "a");

  // Assert
  assert!(matches!(result, Err(Error::InvalidAlias { .. })));
}

#[test]
fn test_alias_rebinding_and_self_alias() {
  let aliases = AliasMap::new();
  aliases.register_alias("first", "shared").unwrap();
  // Re-binding an alias to another name is allowed.
  aliases.register_alias("second", "shared").unwrap();
  assert_eq!(aliases.canonical_name("shared"), "second");

  // Aliasing a name to itself drops the binding instead.
  aliases.register_alias("shared", "shared").unwrap();
  assert!(!aliases.is_alias("shared"));
  assert_eq!(aliases.canonical_name("shared"), "shared");
}

#[test]
fn test_remove_alias_unknown_errors() {
  let aliases = AliasMap::new();
  aliases.register_alias("service", "svc").unwrap();

  assert!(aliases.remove_alias("svc").is_ok());
  assert!(matches!(
    aliases.remove_alias("svc"),
    Err(Error::InvalidAlias { .. })
  ));
}
