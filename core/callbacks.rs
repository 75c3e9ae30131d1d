// Copyright 2018-2025 the Deno authors. MIT license.

use crate::error::BindingError;
use crate::value::Function;
use crate::value::Value;
use std::str::FromStr;

/// The asynchronous events a TCP handle can report.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
  strum::EnumIter,
)]
pub enum EventKind {
  #[strum(serialize = "on_connect")]
  Connect,
  #[strum(serialize = "on_connection")]
  Connection,
  #[strum(serialize = "on_read")]
  Read,
  #[strum(serialize = "on_close")]
  Close,
}

impl EventKind {
  pub fn name(self) -> &'static str {
    self.into()
  }
}

/// Per-handle map from event kind to the host function handling it.
///
/// Registering replaces any previous entry; a failed registration leaves the
/// store untouched.
#[derive(Default)]
pub struct CallbackStore {
  on_connect: Option<Function>,
  on_connection: Option<Function>,
  on_read: Option<Function>,
  on_close: Option<Function>,
}

impl CallbackStore {
  fn slot(&self, kind: EventKind) -> &Option<Function> {
    match kind {
      EventKind::Connect => &self.on_connect,
      EventKind::Connection => &self.on_connection,
      EventKind::Read => &self.on_read,
      EventKind::Close => &self.on_close,
    }
  }

  fn slot_mut(&mut self, kind: EventKind) -> &mut Option<Function> {
    match kind {
      EventKind::Connect => &mut self.on_connect,
      EventKind::Connection => &mut self.on_connection,
      EventKind::Read => &mut self.on_read,
      EventKind::Close => &mut self.on_close,
    }
  }

  /// Registers `f` for `kind`, returning the function it replaced.
  pub fn set(&mut self, kind: EventKind, f: Function) -> Option<Function> {
    self.slot_mut(kind).replace(f)
  }

  /// Registers a value under an event name, checking both.
  pub fn set_named(
    &mut self,
    name: &str,
    value: Value,
  ) -> Result<(), BindingError> {
    let kind = EventKind::from_str(name)
      .map_err(|_| BindingError::UnknownEvent(name.to_string()))?;
    let Value::Function(f) = value else {
      return Err(BindingError::type_mismatch("function", value.type_name()));
    };
    self.set(kind, f);
    Ok(())
  }

  pub fn clear(&mut self, kind: EventKind) -> Option<Function> {
    self.slot_mut(kind).take()
  }

  pub fn get(&self, kind: EventKind) -> Result<Function, BindingError> {
    self
      .slot(kind)
      .clone()
      .ok_or(BindingError::MissingCallback(kind))
  }

  pub fn contains(&self, kind: EventKind) -> bool {
    self.slot(kind).is_some()
  }

  pub fn len(&self) -> usize {
    <EventKind as strum::IntoEnumIterator>::iter()
      .filter(|kind| self.contains(*kind))
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl std::fmt::Debug for CallbackStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let registered: Vec<&'static str> =
      <EventKind as strum::IntoEnumIterator>::iter()
        .filter(|kind| self.contains(*kind))
        .map(EventKind::name)
        .collect();
    f.debug_struct("CallbackStore")
      .field("registered", &registered)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rstest::rstest;

  fn noop(name: &'static str) -> Function {
    Function::new(name, |_, _| Ok(vec![]))
  }

  #[rstest]
  #[case("on_connect", EventKind::Connect)]
  #[case("on_connection", EventKind::Connection)]
  #[case("on_read", EventKind::Read)]
  #[case("on_close", EventKind::Close)]
  fn event_names(#[case] name: &str, #[case] kind: EventKind) {
    assert_eq!(EventKind::from_str(name).unwrap(), kind);
    assert_eq!(kind.name(), name);
    assert_eq!(kind.to_string(), name);
  }

  #[test]
  fn set_replaces_previous() {
    let mut store = CallbackStore::default();
    let first = noop("first");
    assert!(store.set(EventKind::Read, first.clone()).is_none());
    let replaced = store.set(EventKind::Read, noop("second")).unwrap();
    assert!(replaced.ptr_eq(&first));
    assert_eq!(store.get(EventKind::Read).unwrap().name(), "second");
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn set_named_rejects_non_function() {
    let mut store = CallbackStore::default();
    store.set(EventKind::Read, noop("original"));
    let err = store.set_named("on_read", Value::Integer(42)).unwrap_err();
    assert!(matches!(
      err,
      BindingError::TypeMismatch {
        expected: "function",
        got: "integer"
      }
    ));
    assert_eq!(store.get(EventKind::Read).unwrap().name(), "original");
  }

  #[test]
  fn set_named_rejects_unknown_event() {
    let mut store = CallbackStore::default();
    let err = store
      .set_named("on_write", Value::Function(noop("f")))
      .unwrap_err();
    assert!(
      matches!(err, BindingError::UnknownEvent(name) if name == "on_write")
    );
    assert!(store.is_empty());
  }

  #[test]
  fn get_missing_callback() {
    let store = CallbackStore::default();
    let err = store.get(EventKind::Connect).unwrap_err();
    assert!(matches!(
      err,
      BindingError::MissingCallback(EventKind::Connect)
    ));
  }

  #[test]
  fn clear_is_idempotent() {
    let mut store = CallbackStore::default();
    store.set(EventKind::Close, noop("close"));
    assert!(store.clear(EventKind::Close).is_some());
    assert!(store.clear(EventKind::Close).is_none());
    assert!(!store.contains(EventKind::Close));
  }
}
