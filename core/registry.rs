// Copyright 2018-2025 the Deno authors. MIT license.

use crate::tcp::Tcp;
use crate::tcp::TcpObject;
use crate::uv::HandleId;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Maps engine handle ids back to their script-side companion objects.
///
/// A companion is held strongly from registration until its handle has
/// finished closing, so callbacks can always reach it while the handle may
/// still report events. The slot is removed when the close completes; from
/// then on only the script's own references keep the object alive.
#[derive(Default)]
pub struct ObjectRegistry {
  index: RefCell<BTreeMap<HandleId, Rc<TcpObject>>>,
}

impl ObjectRegistry {
  /// Registers `tcp` under its handle id.
  ///
  /// Panics if the id is already registered.
  pub fn register(&self, tcp: &Tcp) {
    let removed = self.index.borrow_mut().insert(tcp.id(), tcp.0.clone());
    assert!(removed.is_none());
  }

  /// Returns the companion registered for `id`.
  pub fn lookup(&self, id: HandleId) -> Option<Tcp> {
    self.index.borrow().get(&id).cloned().map(Tcp)
  }

  /// Removes the slot for `id`, handing its companion to the caller.
  pub fn release(&self, id: HandleId) -> Option<Tcp> {
    self.index.borrow_mut().remove(&id).map(Tcp)
  }

  pub fn contains(&self, id: HandleId) -> bool {
    self.index.borrow().contains_key(&id)
  }

  pub fn len(&self) -> usize {
    self.index.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.index.borrow().is_empty()
  }
}

impl Drop for ObjectRegistry {
  fn drop(&mut self) {
    // Callbacks commonly capture their own handle. Drop them so companions
    // that never finished closing do not keep each other alive.
    let index = std::mem::take(self.index.get_mut());
    for object in index.into_values() {
      let callbacks = Tcp(object).take_callbacks();
      drop(callbacks);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::callbacks::EventKind;
  use crate::value::Function;

  #[test]
  fn held_until_released() {
    let registry = ObjectRegistry::default();
    let tcp = Tcp::detached(7);
    registry.register(&tcp);
    let weak = Rc::downgrade(&tcp.0);
    drop(tcp);

    // Still held by the registry.
    let found = registry.lookup(7).unwrap();
    assert_eq!(found.id(), 7);
    drop(found);
    assert!(registry.contains(7));
    assert_eq!(registry.len(), 1);

    let released = registry.release(7).unwrap();
    assert!(registry.release(7).is_none());
    assert!(registry.lookup(7).is_none());
    assert!(registry.is_empty());
    drop(released);
    assert!(weak.upgrade().is_none());
  }

  #[test]
  fn released_object_lives_on_in_script_references() {
    let registry = ObjectRegistry::default();
    let tcp = Tcp::detached(1);
    registry.register(&tcp);
    let released = registry.release(1).unwrap();
    assert!(released.ptr_eq(&tcp));
    assert!(!registry.contains(1));
    assert_eq!(tcp.id(), 1);
  }

  #[test]
  fn unknown_id() {
    let registry = ObjectRegistry::default();
    assert!(registry.lookup(42).is_none());
    assert!(registry.release(42).is_none());
    assert!(!registry.contains(42));
  }

  #[test]
  #[should_panic]
  fn register_twice_panics() {
    let registry = ObjectRegistry::default();
    let tcp = Tcp::detached(3);
    registry.register(&tcp);
    registry.register(&tcp);
  }

  #[test]
  fn drop_breaks_callback_cycles() {
    let registry = ObjectRegistry::default();
    let tcp = Tcp::detached(5);
    let captured = tcp.clone();
    tcp.set_function(
      EventKind::Read,
      Function::new("on_read", move |_, _| {
        let _ = captured.id();
        Ok(vec![])
      }),
    );
    registry.register(&tcp);
    let weak = Rc::downgrade(&tcp.0);
    drop(tcp);
    assert!(weak.upgrade().is_some());
    drop(registry);
    assert!(weak.upgrade().is_none());
  }
}
