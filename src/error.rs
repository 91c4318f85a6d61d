//! Error taxonomy for registry, hook, and bootstrap operations.

use thiserror::Error;

/// A `Result` alias where the `Err` case is `kiln::Error`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All failure modes surfaced by the engine.
///
/// Variants are cloneable so that failures recorded in a suppressed set can
/// be retained alongside the error that is ultimately returned.
#[derive(Debug, Clone, Error)]
pub enum Error {
  /// Creation was requested while `destroy_all` is running. Typically the
  /// result of a disposal callback reaching back into the registry.
  #[error(
    "creation of '{name}' is not allowed while the registry is in teardown \
     (instance requested from a destroy callback?)"
  )]
  CreationNotAllowedDuringTeardown { name: String },

  /// The name is already marked in-creation: either a factory requested its
  /// own name again through `get_or_create`, or two resolution paths raced
  /// into an unresolvable cycle.
  #[error("'{name}' is currently in creation: requested again before its factory completed")]
  CurrentlyInCreation { name: String },

  /// A finished instance is already registered under this name.
  #[error("an instance is already registered under '{name}'")]
  DuplicateRegistration { name: String },

  /// The factory for `name` failed. `related` carries failures suppressed
  /// while nested creations ran inside this one, capped at the accumulator
  /// limit; first recorded wins.
  #[error("creation of '{name}' failed")]
  CreationFailure {
    name: String,
    #[source]
    source: Box<Error>,
    related: Vec<Error>,
  },

  /// An init hook raised; initialization of the instance is aborted.
  #[error("init hook '{method}' on '{name}' failed: {reason}")]
  HookInvocationFailure {
    name: String,
    method: String,
    reason: String,
  },

  /// A declared lifecycle hook takes arguments. Hooks are invoked with the
  /// receiver only, so this is a definition error and always fatal.
  #[error("lifecycle hook '{method}' on type '{type_name}' must not declare parameters")]
  InvalidHookSignature { type_name: String, method: String },

  /// Bookkeeping left the engine in an impossible state. This indicates a
  /// defect in the engine itself, not in caller code.
  #[error("internal invariant violated: {detail}")]
  InternalInvariantViolation { detail: String },

  /// Alias registration or removal was rejected (cycle, unknown alias).
  #[error("alias '{alias}' rejected: {detail}")]
  InvalidAlias { alias: String, detail: String },

  /// No component is registered under the requested name.
  #[error("no component registered under '{name}'")]
  UnknownComponent { name: String },

  /// The component exists but is not of the requested kind.
  #[error("component '{name}' is not of the requested kind ({expected})")]
  TypeMismatch {
    name: String,
    expected: &'static str,
  },
}

impl Error {
  /// Number of related causes attached to a `CreationFailure`, zero for
  /// every other variant.
  pub fn related_count(&self) -> usize {
    match self {
      Error::CreationFailure { related, .. } => related.len(),
      _ => 0,
    }
  }
}
