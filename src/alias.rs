//! Alias bookkeeping: secondary names resolving to a canonical primary name.

use ahash::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Registry of `alias -> name` bindings with cycle rejection.
///
/// Chains are allowed (an alias may point at another alias); resolution
/// follows the chain to the primary name. Re-binding an existing alias to a
/// different name is permitted and logged.
#[derive(Debug, Default)]
pub struct AliasMap {
  aliases: RwLock<HashMap<String, String>>,
}

impl AliasMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Binds `alias` to `name`. An alias equal to its name is dropped rather
  /// than stored. Fails with [`Error::InvalidAlias`] when the binding would
  /// close an alias loop.
  pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
    let mut map = self.aliases.write();
    if alias == name {
      if map.remove(alias).is_some() {
        debug!(alias, "alias matching its own name removed");
      }
      return Ok(());
    }
    if let Some(registered) = map.get(alias) {
      if registered == name {
        return Ok(());
      }
      debug!(alias, old = %registered, new = name, "alias re-bound");
    }
    if Self::has_alias_in(&map, alias, name) {
      return Err(Error::InvalidAlias {
        alias: alias.to_owned(),
        detail: format!("'{name}' is already an alias of '{alias}', binding would form a cycle"),
      });
    }
    map.insert(alias.to_owned(), name.to_owned());
    Ok(())
  }

  /// Removes an alias binding; unknown aliases are an error.
  pub fn remove_alias(&self, alias: &str) -> Result<()> {
    match self.aliases.write().remove(alias) {
      Some(_) => Ok(()),
      None => Err(Error::InvalidAlias {
        alias: alias.to_owned(),
        detail: "no such alias registered".to_owned(),
      }),
    }
  }

  /// Whether `name` is registered as an alias (of anything).
  pub fn is_alias(&self, name: &str) -> bool {
    self.aliases.read().contains_key(name)
  }

  /// Whether `alias` resolves, directly or through a chain, to `name`.
  pub fn has_alias(&self, name: &str, alias: &str) -> bool {
    Self::has_alias_in(&self.aliases.read(), name, alias)
  }

  fn has_alias_in(map: &HashMap<String, String>, name: &str, alias: &str) -> bool {
    match map.get(alias) {
      Some(registered) if registered == name => true,
      Some(registered) => Self::has_alias_in(map, name, registered),
      None => false,
    }
  }

  /// All aliases resolving to `name`, including transitive ones.
  pub fn aliases_of(&self, name: &str) -> Vec<String> {
    let map = self.aliases.read();
    let mut out = Vec::new();
    Self::collect_aliases(&map, name, &mut out);
    out
  }

  fn collect_aliases(map: &HashMap<String, String>, name: &str, out: &mut Vec<String>) {
    for (alias, registered) in map.iter() {
      if registered == name {
        out.push(alias.clone());
        Self::collect_aliases(map, alias, out);
      }
    }
  }

  /// Resolves a name to its canonical form by following the alias chain.
  /// Names without aliases resolve to themselves.
  pub fn canonical_name(&self, name: &str) -> String {
    let map = self.aliases.read();
    let mut canonical = name;
    while let Some(next) = map.get(canonical) {
      canonical = next;
    }
    canonical.to_owned()
  }
}
