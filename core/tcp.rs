// Copyright 2018-2025 the Deno authors. MIT license.

//! The script-side TCP object.
//!
//! A [`Tcp`] pairs an engine handle with the callbacks the script registered
//! for it. Methods mirror the engine operations and return its status codes;
//! the matching events arrive later through [`crate::dispatch`].

use crate::callbacks::CallbackStore;
use crate::callbacks::EventKind;
use crate::dispatch;
use crate::error::BindingError;
use crate::runtime::Runtime;
use crate::uv;
use crate::uv::HandleId;
use crate::uv::UV_EALREADY;
use crate::uv::UV_EBADF;
use crate::uv::UV_EINVAL;
use crate::uv::UV_EISCONN;
use crate::uv::UV_ENOSYS;
use crate::uv::UV_ENOTCONN;
use crate::value::Function;
use crate::value::Value;
use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;
use std::str::FromStr;

/// Lifecycle of a TCP object as seen by the script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TcpState {
  Unbound,
  Bound,
  Connecting,
  Connected,
  Listening,
  /// An asynchronous connect failed. The handle cannot connect again and
  /// should be closed.
  Failed,
  Closing,
  Closed,
}

pub(crate) struct TcpObject {
  id: HandleId,
  state: Cell<TcpState>,
  reading: Cell<bool>,
  callbacks: RefCell<CallbackStore>,
}

/// Handle to a script-side TCP object. Clones share the same object.
#[derive(Clone)]
pub struct Tcp(pub(crate) Rc<TcpObject>);

impl Tcp {
  /// Creates a handle in the [`TcpState::Unbound`] state and registers it
  /// with the runtime.
  pub fn new(rt: &Runtime) -> Tcp {
    let id = rt.uv().tcp_init();
    let tcp = Tcp::detached(id);
    rt.registry().register(&tcp);
    if rt.options().nodelay {
      let status = rt.uv().tcp_nodelay(id, true);
      if status != 0 {
        log::debug!("tcp#{id} nodelay failed: {}", uv::err_name(status));
      }
    }
    log::trace!("tcp#{id} created");
    tcp
  }

  pub(crate) fn detached(id: HandleId) -> Tcp {
    Tcp(Rc::new(TcpObject {
      id,
      state: Cell::new(TcpState::Unbound),
      reading: Cell::new(false),
      callbacks: RefCell::new(CallbackStore::default()),
    }))
  }

  pub fn id(&self) -> HandleId {
    self.0.id
  }

  pub fn state(&self) -> TcpState {
    self.0.state.get()
  }

  pub(crate) fn set_state(&self, state: TcpState) {
    log::trace!("tcp#{} {} -> {}", self.id(), self.state(), state);
    self.0.state.set(state);
  }

  pub fn is_reading(&self) -> bool {
    self.0.reading.get()
  }

  pub(crate) fn set_reading(&self, reading: bool) {
    self.0.reading.set(reading);
  }

  pub fn ptr_eq(&self, other: &Tcp) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }

  /// Registers a callback by event name (`"on_read"`, ...).
  pub fn set_callback(
    &self,
    name: &str,
    value: Value,
  ) -> Result<(), BindingError> {
    self.0.callbacks.borrow_mut().set_named(name, value)
  }

  /// Removes the callback for an event name. Removing an absent callback is
  /// not an error.
  pub fn clear_callback(&self, name: &str) -> Result<(), BindingError> {
    let kind = EventKind::from_str(name)
      .map_err(|_| BindingError::UnknownEvent(name.to_string()))?;
    let removed = self.0.callbacks.borrow_mut().clear(kind);
    drop(removed);
    Ok(())
  }

  pub fn has_callback(&self, kind: EventKind) -> bool {
    self.0.callbacks.borrow().contains(kind)
  }

  pub(crate) fn set_function(&self, kind: EventKind, f: Function) {
    let replaced = self.0.callbacks.borrow_mut().set(kind, f);
    // Dropped outside the borrow: the old closure may own this object.
    drop(replaced);
  }

  pub(crate) fn callback(
    &self,
    kind: EventKind,
  ) -> Result<Function, BindingError> {
    self.0.callbacks.borrow().get(kind)
  }

  /// Empties the callback store, handing the callbacks to the caller.
  pub(crate) fn take_callbacks(&self) -> CallbackStore {
    std::mem::take(&mut *self.0.callbacks.borrow_mut())
  }

  fn closed_status(&self) -> Option<i32> {
    match self.state() {
      TcpState::Closing | TcpState::Closed => Some(UV_EBADF),
      _ => None,
    }
  }

  pub fn bind(&self, rt: &Runtime, host: &str, port: i64) -> i32 {
    if let Some(status) = self.closed_status() {
      return status;
    }
    if self.state() != TcpState::Unbound {
      return UV_EINVAL;
    }
    let addr = match uv::ip4_addr(host, port) {
      Ok(addr) => addr,
      Err(status) => return status,
    };
    let status = rt.uv().tcp_bind(self.id(), addr);
    if status == 0 {
      self.set_state(TcpState::Bound);
    }
    status
  }

  /// Starts connecting. `on_connect` receives `(self, status)` once the
  /// attempt finishes; on failure the object moves to [`TcpState::Failed`].
  pub fn connect(
    &self,
    rt: &Runtime,
    host: &str,
    port: i64,
    on_connect: Function,
  ) -> i32 {
    match self.state() {
      TcpState::Unbound | TcpState::Bound => {}
      TcpState::Connecting => return UV_EALREADY,
      TcpState::Connected => return UV_EISCONN,
      TcpState::Listening | TcpState::Failed => return UV_EINVAL,
      TcpState::Closing | TcpState::Closed => return UV_EBADF,
    }
    self.set_function(EventKind::Connect, on_connect);
    let addr = match uv::ip4_addr(host, port) {
      Ok(addr) => addr,
      Err(status) => return status,
    };
    let status = rt.uv().tcp_connect(self.id(), addr, dispatch::on_connect);
    if status == 0 {
      self.set_state(TcpState::Connecting);
    }
    status
  }

  /// Starts accepting connections on a bound object. `on_connection`
  /// receives `(self, status)` once per queued connection.
  pub fn listen(
    &self,
    rt: &Runtime,
    backlog: Option<i32>,
    on_connection: Function,
  ) -> i32 {
    match self.state() {
      TcpState::Bound => {}
      TcpState::Closing | TcpState::Closed => return UV_EBADF,
      _ => return UV_EINVAL,
    }
    self.set_function(EventKind::Connection, on_connection);
    let backlog = backlog.unwrap_or(rt.options().default_backlog);
    let status = rt.uv().listen(self.id(), backlog, dispatch::on_connection);
    if status == 0 {
      self.set_state(TcpState::Listening);
    }
    status
  }

  /// Accepts one queued connection into a new object.
  ///
  /// The new object is returned even when accepting fails; it is then left
  /// unconnected and the caller should close it.
  pub fn accept(&self, rt: &Runtime) -> (Tcp, i32) {
    let client = Tcp::new(rt);
    let status = match self.state() {
      TcpState::Listening => rt.uv().accept(self.id(), client.id()),
      TcpState::Closing | TcpState::Closed => UV_EBADF,
      _ => UV_EINVAL,
    };
    if status == 0 {
      client.set_state(TcpState::Connected);
    } else {
      log::debug!(
        "tcp#{} accept failed: {}",
        self.id(),
        uv::err_name(status)
      );
    }
    (client, status)
  }

  /// Starts reading. `on_read` receives `(self, n, data)` for every chunk
  /// and `(self, status, nil)` once reading ends.
  pub fn read_start(&self, rt: &Runtime, on_read: Function) -> i32 {
    match self.state() {
      TcpState::Connected => {}
      TcpState::Closing | TcpState::Closed => return UV_EBADF,
      _ => return UV_ENOTCONN,
    }
    self.set_function(EventKind::Read, on_read);
    let status =
      rt.uv()
        .read_start(self.id(), dispatch::on_alloc, dispatch::on_read);
    if status == 0 {
      self.set_reading(true);
    }
    status
  }

  /// Stops reading. The `on_read` callback is dropped only on success.
  pub fn read_stop(&self, rt: &Runtime) -> i32 {
    if let Some(status) = self.closed_status() {
      return status;
    }
    let status = rt.uv().read_stop(self.id());
    if status == 0 {
      self.set_reading(false);
      let removed = self.0.callbacks.borrow_mut().clear(EventKind::Read);
      drop(removed);
    }
    status
  }

  /// Writing is not supported: nothing is sent and `UV_ENOSYS` is
  /// returned.
  pub fn write(&self, _rt: &Runtime, data: &[u8]) -> i32 {
    log::debug!(
      "tcp#{}: dropping {} byte write, writes are not supported",
      self.id(),
      data.len()
    );
    UV_ENOSYS
  }

  /// Closes the handle. `on_close`, if given, receives `(self)` exactly
  /// once when closing completes. Closing twice does nothing.
  pub fn close(&self, rt: &Runtime, on_close: Option<Function>) {
    if self.closed_status().is_some() {
      log::debug!("tcp#{} is already closing", self.id());
      return;
    }
    if let Some(on_close) = on_close {
      self.set_function(EventKind::Close, on_close);
    }
    self.set_reading(false);
    self.set_state(TcpState::Closing);
    rt.uv().close(self.id(), Some(dispatch::on_close));
  }

  pub fn nodelay(&self, rt: &Runtime, enable: bool) -> i32 {
    if let Some(status) = self.closed_status() {
      return status;
    }
    rt.uv().tcp_nodelay(self.id(), enable)
  }

  pub fn getsockname(&self, rt: &Runtime) -> Result<SocketAddr, i32> {
    if let Some(status) = self.closed_status() {
      return Err(status);
    }
    rt.uv().getsockname(self.id())
  }

  pub fn getpeername(&self, rt: &Runtime) -> Result<SocketAddr, i32> {
    match self.state() {
      TcpState::Connected => rt.uv().getpeername(self.id()),
      TcpState::Closing | TcpState::Closed => Err(UV_EBADF),
      _ => Err(UV_ENOTCONN),
    }
  }
}

impl fmt::Debug for Tcp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Tcp")
      .field("id", &self.id())
      .field("state", &self.state())
      .field("reading", &self.is_reading())
      .finish()
  }
}

impl fmt::Display for Tcp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "uv.tcp#{}", self.id())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::RuntimeOptions;
  use pretty_assertions::assert_eq;

  fn runtime() -> Runtime {
    Runtime::new(RuntimeOptions::default()).unwrap()
  }

  fn noop(name: &'static str) -> Function {
    Function::new(name, |_, _| Ok(vec![]))
  }

  #[test]
  fn new_is_unbound_and_registered() {
    let rt = runtime();
    let a = Tcp::new(&rt);
    let b = Tcp::new(&rt);
    assert_ne!(a.id(), b.id());
    assert_eq!(a.state(), TcpState::Unbound);
    assert!(rt.registry().lookup(a.id()).unwrap().ptr_eq(&a));
    assert_eq!(a.to_string(), format!("uv.tcp#{}", a.id()));
  }

  #[test]
  fn bind_transitions() {
    let rt = runtime();
    let tcp = Tcp::new(&rt);
    assert_eq!(tcp.bind(&rt, "not an ip", 0), UV_EINVAL);
    assert_eq!(tcp.state(), TcpState::Unbound);
    assert_eq!(tcp.bind(&rt, "127.0.0.1", 0), 0);
    assert_eq!(tcp.state(), TcpState::Bound);
    assert_eq!(tcp.bind(&rt, "127.0.0.1", 0), UV_EINVAL);
    assert!(tcp.getsockname(&rt).unwrap().port() > 0);
  }

  #[test]
  fn listen_requires_bind() {
    let rt = runtime();
    let tcp = Tcp::new(&rt);
    assert_eq!(tcp.listen(&rt, None, noop("on_connection")), UV_EINVAL);
    assert!(!tcp.has_callback(EventKind::Connection));
    assert_eq!(tcp.bind(&rt, "127.0.0.1", 0), 0);
    assert_eq!(tcp.listen(&rt, Some(16), noop("on_connection")), 0);
    assert_eq!(tcp.state(), TcpState::Listening);
    assert!(tcp.has_callback(EventKind::Connection));
    tcp.close(&rt, None);
    assert_eq!(rt.run(), 0);
    assert_eq!(tcp.state(), TcpState::Closed);
  }

  #[test]
  fn read_requires_connection() {
    let rt = runtime();
    let tcp = Tcp::new(&rt);
    assert_eq!(tcp.read_start(&rt, noop("on_read")), UV_ENOTCONN);
    assert!(!tcp.has_callback(EventKind::Read));
    assert_eq!(tcp.read_stop(&rt), UV_EINVAL);
    assert_eq!(tcp.getpeername(&rt), Err(UV_ENOTCONN));
  }

  #[test]
  fn accept_without_listen() {
    let rt = runtime();
    let tcp = Tcp::new(&rt);
    let (client, status) = tcp.accept(&rt);
    assert_eq!(status, UV_EINVAL);
    assert_eq!(client.state(), TcpState::Unbound);
    assert!(!client.ptr_eq(&tcp));
    client.close(&rt, None);
    tcp.close(&rt, None);
    assert_eq!(rt.run(), 0);
  }

  #[test]
  fn write_is_unsupported() {
    let rt = runtime();
    let tcp = Tcp::new(&rt);
    assert_eq!(tcp.write(&rt, b"hello"), UV_ENOSYS);
  }

  #[test]
  fn operations_after_close() {
    let rt = runtime();
    let tcp = Tcp::new(&rt);
    tcp.close(&rt, None);
    assert_eq!(tcp.state(), TcpState::Closing);
    assert_eq!(tcp.bind(&rt, "127.0.0.1", 0), UV_EBADF);
    assert_eq!(
      tcp.connect(&rt, "127.0.0.1", 1, noop("on_connect")),
      UV_EBADF
    );
    assert_eq!(rt.run(), 0);
    assert_eq!(tcp.state(), TcpState::Closed);
    assert_eq!(tcp.read_stop(&rt), UV_EBADF);
    assert_eq!(tcp.nodelay(&rt, true), UV_EBADF);
    assert_eq!(tcp.getsockname(&rt), Err(UV_EBADF));
  }

  #[test]
  fn set_and_clear_callbacks() {
    let rt = runtime();
    let tcp = Tcp::new(&rt);
    tcp
      .set_callback("on_close", Value::Function(noop("on_close")))
      .unwrap();
    assert!(tcp.has_callback(EventKind::Close));
    assert!(matches!(
      tcp.set_callback("on_close", Value::Nil),
      Err(BindingError::TypeMismatch { .. })
    ));
    assert!(tcp.has_callback(EventKind::Close));
    tcp.clear_callback("on_close").unwrap();
    tcp.clear_callback("on_close").unwrap();
    assert!(!tcp.has_callback(EventKind::Close));
    assert!(matches!(
      tcp.clear_callback("on_data"),
      Err(BindingError::UnknownEvent(_))
    ));
  }

  #[test]
  fn state_names() {
    assert_eq!(TcpState::Unbound.to_string(), "unbound");
    assert_eq!(TcpState::Listening.to_string(), "listening");
    assert_eq!(TcpState::Failed.to_string(), "failed");
  }
}
