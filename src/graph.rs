//! Dependency and containment bookkeeping for destruction ordering.

use std::sync::Arc;

use ahash::{HashMap, HashSet};
use indexmap::IndexSet;
use parking_lot::Mutex;

use crate::alias::AliasMap;

/// Tracks "who depends on whom" and "what contains what" between named
/// instances.
///
/// The forward map answers dependents-of queries, the reverse map
/// dependencies-of queries, and the containment map binds inner instances to
/// their containing instance's lifecycle. Each map sits behind its own lock;
/// none of them is ever taken under the registry's creation mutex. Edge sets
/// keep insertion order because teardown walks them deterministically.
///
/// Edges are keyed by canonical names on the depended-upon side: an edge
/// registered against an alias lands under the primary name.
#[derive(Debug, Default)]
pub struct DependencyGraph {
  aliases: Arc<AliasMap>,
  /// name -> names depending on it.
  dependents: Mutex<HashMap<String, IndexSet<String>>>,
  /// name -> names it depends on.
  dependencies: Mutex<HashMap<String, IndexSet<String>>>,
  /// containing name -> contained names.
  contained: Mutex<HashMap<String, IndexSet<String>>>,
}

impl DependencyGraph {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builds a graph sharing an existing alias map.
  pub fn with_aliases(aliases: Arc<AliasMap>) -> Self {
    Self {
      aliases,
      ..Self::default()
    }
  }

  pub fn aliases(&self) -> &AliasMap {
    &self.aliases
  }

  /// Records that `dependent` depends on `name`: `name` must outlive
  /// `dependent`, so teardown destroys `dependent` first.
  ///
  /// Duplicate edges are complete no-ops, including the reverse map.
  pub fn register_dependency(&self, name: &str, dependent: &str) {
    let canonical = self.aliases.canonical_name(name);
    {
      let mut dependents = self.dependents.lock();
      let entry = dependents.entry(canonical.clone()).or_default();
      if !entry.insert(dependent.to_owned()) {
        return;
      }
    }
    self
      .dependencies
      .lock()
      .entry(dependent.to_owned())
      .or_default()
      .insert(canonical);
  }

  /// Records that `contained` lives inside `containing`. Containment implies
  /// a dependency of the containing instance on the contained one, so the
  /// contained instance outlives its container during teardown.
  pub fn register_containment(&self, contained: &str, containing: &str) {
    {
      let mut map = self.contained.lock();
      let entry = map.entry(containing.to_owned()).or_default();
      if !entry.insert(contained.to_owned()) {
        return;
      }
    }
    self.register_dependency(contained, containing);
  }

  /// Whether `candidate` depends on `name`, directly or transitively.
  ///
  /// Depth-first over the forward map with a visited set, so cyclic graphs
  /// terminate. The whole walk runs under one lock acquisition.
  pub fn is_dependent(&self, name: &str, candidate: &str) -> bool {
    let dependents = self.dependents.lock();
    let mut seen = HashSet::default();
    self.is_dependent_in(&dependents, name, candidate, &mut seen)
  }

  fn is_dependent_in(
    &self,
    map: &HashMap<String, IndexSet<String>>,
    name: &str,
    candidate: &str,
    seen: &mut HashSet<String>,
  ) -> bool {
    if seen.contains(name) {
      return false;
    }
    let canonical = self.aliases.canonical_name(name);
    let Some(dependents) = map.get(&canonical) else {
      return false;
    };
    if dependents.contains(candidate) {
      return true;
    }
    seen.insert(name.to_owned());
    for transitive in dependents {
      if self.is_dependent_in(map, transitive, candidate, seen) {
        return true;
      }
    }
    false
  }

  pub fn has_dependents(&self, name: &str) -> bool {
    self.dependents.lock().contains_key(name)
  }

  /// Names depending on `name`, in registration order.
  pub fn dependents_of(&self, name: &str) -> Vec<String> {
    self
      .dependents
      .lock()
      .get(name)
      .map(|set| set.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Names `name` depends on, in registration order.
  pub fn dependencies_of(&self, name: &str) -> Vec<String> {
    self
      .dependencies
      .lock()
      .get(name)
      .map(|set| set.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Detaches `name` from every map: its own entries are dropped and it is
  /// scrubbed out of all other edge sets, pruning sets that become empty.
  pub fn remove_all(&self, name: &str) {
    {
      let mut dependents = self.dependents.lock();
      dependents.remove(name);
      dependents.retain(|_, set| {
        set.shift_remove(name);
        !set.is_empty()
      });
    }
    self.dependencies.lock().remove(name);
    {
      let mut contained = self.contained.lock();
      contained.remove(name);
      contained.retain(|_, set| {
        set.shift_remove(name);
        !set.is_empty()
      });
    }
  }

  /// Removes and returns the dependents of `name` (destruction support).
  pub(crate) fn take_dependents(&self, name: &str) -> Vec<String> {
    self
      .dependents
      .lock()
      .remove(name)
      .map(|set| set.into_iter().collect())
      .unwrap_or_default()
  }

  /// Removes and returns the names contained in `name` (destruction support).
  pub(crate) fn take_contained(&self, name: &str) -> Vec<String> {
    self
      .contained
      .lock()
      .remove(name)
      .map(|set| set.into_iter().collect())
      .unwrap_or_default()
  }

  pub(crate) fn clear_all(&self) {
    self.contained.lock().clear();
    self.dependents.lock().clear();
    self.dependencies.lock().clear();
  }
}
