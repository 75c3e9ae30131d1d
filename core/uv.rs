// Copyright 2018-2025 the Deno authors. MIT license.

//! Pure-Rust libuv-style TCP engine, driven by a current-thread tokio
//! runtime.
//!
//! Handles live in a table owned by the loop and are addressed by
//! [`HandleId`]. Completion callbacks are plain function pointers that
//! receive the context passed to [`UvLoop::run`] together with the id of the
//! handle that completed, the same way libuv hands a callback the handle
//! pointer and leaves the caller to find its own state through `loop->data`.
//!
//! Synchronous failures are reported as libuv-compatible status codes
//! (0 on success, a negative error code otherwise).

use crate::event_loop::RunMode;
use bytes::Bytes;
use bytes::BytesMut;
use smallvec::SmallVec;
use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use tokio::net::TcpListener;
use tokio::net::TcpSocket;
use tokio::net::TcpStream;

/// Identity of a TCP handle within one loop. Ids are handed out in
/// increasing order and are never reused by the same loop.
pub type HandleId = u32;

const UV_HANDLE_CLOSING: u32 = 1 << 0;
const UV_HANDLE_READING: u32 = 1 << 1;

/// Size handed to the allocation callback before every read.
pub const SUGGESTED_READ_SIZE: usize = 65536;

// Re-poll the handle table this many times per tick while callbacks keep
// producing work.
const IO_PASSES: usize = 16;

// libuv-compatible error codes (negative errno values on unix,
// which vary depending on platform, fixed values on windows).
macro_rules! uv_errno {
  ($name:ident, $unix:expr, $win:expr) => {
    #[cfg(unix)]
    pub const $name: i32 = -($unix);
    #[cfg(windows)]
    pub const $name: i32 = $win;
  };
}

uv_errno!(UV_EADDRINUSE, libc::EADDRINUSE, -4091);
uv_errno!(UV_EADDRNOTAVAIL, libc::EADDRNOTAVAIL, -4090);
uv_errno!(UV_EAGAIN, libc::EAGAIN, -4088);
uv_errno!(UV_EALREADY, libc::EALREADY, -4084);
uv_errno!(UV_EBADF, libc::EBADF, -4083);
uv_errno!(UV_EBUSY, libc::EBUSY, -4082);
uv_errno!(UV_ECONNREFUSED, libc::ECONNREFUSED, -4078);
uv_errno!(UV_ECONNRESET, libc::ECONNRESET, -4077);
uv_errno!(UV_EINVAL, libc::EINVAL, -4071);
uv_errno!(UV_EIO, libc::EIO, -4070);
uv_errno!(UV_EISCONN, libc::EISCONN, -4035);
uv_errno!(UV_ENOSYS, libc::ENOSYS, -4054);
uv_errno!(UV_ENOTCONN, libc::ENOTCONN, -4053);
uv_errno!(UV_EPIPE, libc::EPIPE, -4047);
uv_errno!(UV_ETIMEDOUT, libc::ETIMEDOUT, -4039);
pub const UV_EOF: i32 = -4095;

/// Returns the symbolic name of a status code, e.g. `"ECONNREFUSED"`.
pub fn err_name(status: i32) -> &'static str {
  match status {
    0 => "OK",
    UV_EOF => "EOF",
    UV_EADDRINUSE => "EADDRINUSE",
    UV_EADDRNOTAVAIL => "EADDRNOTAVAIL",
    UV_EAGAIN => "EAGAIN",
    UV_EALREADY => "EALREADY",
    UV_EBADF => "EBADF",
    UV_EBUSY => "EBUSY",
    UV_ECONNREFUSED => "ECONNREFUSED",
    UV_ECONNRESET => "ECONNRESET",
    UV_EINVAL => "EINVAL",
    UV_EIO => "EIO",
    UV_EISCONN => "EISCONN",
    UV_ENOSYS => "ENOSYS",
    UV_ENOTCONN => "ENOTCONN",
    UV_EPIPE => "EPIPE",
    UV_ETIMEDOUT => "ETIMEDOUT",
    _ => "UNKNOWN",
  }
}

#[cfg(unix)]
fn os_status(err: &io::Error) -> Option<i32> {
  err.raw_os_error().map(|code| -code)
}

#[cfg(not(unix))]
fn os_status(_err: &io::Error) -> Option<i32> {
  None
}

/// Maps an I/O error onto a status code.
pub fn io_error_status(err: &io::Error) -> i32 {
  if let Some(status) = os_status(err) {
    return status;
  }
  match err.kind() {
    io::ErrorKind::AddrInUse => UV_EADDRINUSE,
    io::ErrorKind::AddrNotAvailable => UV_EADDRNOTAVAIL,
    io::ErrorKind::WouldBlock => UV_EAGAIN,
    io::ErrorKind::ConnectionRefused => UV_ECONNREFUSED,
    io::ErrorKind::ConnectionReset => UV_ECONNRESET,
    io::ErrorKind::InvalidInput => UV_EINVAL,
    io::ErrorKind::NotConnected => UV_ENOTCONN,
    io::ErrorKind::BrokenPipe => UV_EPIPE,
    io::ErrorKind::TimedOut => UV_ETIMEDOUT,
    _ => UV_EIO,
  }
}

/// Builds an IPv4 socket address from a dotted-quad host and a port.
pub fn ip4_addr(host: &str, port: i64) -> Result<SocketAddr, i32> {
  let Ok(ip) = host.parse::<Ipv4Addr>() else {
    return Err(UV_EINVAL);
  };
  let Ok(port) = u16::try_from(port) else {
    return Err(UV_EINVAL);
  };
  Ok(SocketAddr::from((ip, port)))
}

pub type ConnectCb<C> = fn(&C, HandleId, i32);
pub type ConnectionCb<C> = fn(&C, HandleId, i32);
pub type AllocCb<C> = fn(&C, HandleId, usize) -> BytesMut;
pub type ReadCb<C> = fn(&C, HandleId, isize, Bytes);
pub type CloseCb<C> = fn(&C, HandleId);

/// In-flight connect. At most one per handle.
struct ConnectPending<C> {
  future: Pin<Box<dyn Future<Output = io::Result<TcpStream>>>>,
  cb: ConnectCb<C>,
}

struct TcpHandle<C> {
  flags: u32,
  // Bound but neither listening nor connected yet.
  socket: Option<TcpSocket>,
  bind_addr: Option<SocketAddr>,
  stream: Option<TcpStream>,
  listener: Option<TcpListener>,
  nodelay: bool,
  alloc_cb: Option<AllocCb<C>>,
  read_cb: Option<ReadCb<C>>,
  connect: Option<ConnectPending<C>>,
  connection_cb: Option<ConnectionCb<C>>,
  backlog: VecDeque<TcpStream>,
}

impl<C> TcpHandle<C> {
  fn new() -> Self {
    Self {
      flags: 0,
      socket: None,
      bind_addr: None,
      stream: None,
      listener: None,
      nodelay: false,
      alloc_cb: None,
      read_cb: None,
      connect: None,
      connection_cb: None,
      backlog: VecDeque::new(),
    }
  }

  fn is_closing(&self) -> bool {
    self.flags & UV_HANDLE_CLOSING != 0
  }

  fn is_reading(&self) -> bool {
    self.flags & UV_HANDLE_READING != 0
  }

  fn is_active(&self) -> bool {
    !self.is_closing()
      && (self.is_reading()
        || self.listener.is_some()
        || self.connect.is_some())
  }

  fn is_idle(&self) -> bool {
    self.socket.is_none()
      && self.stream.is_none()
      && self.listener.is_none()
      && self.connect.is_none()
  }

  fn stop_reading(&mut self) {
    self.flags &= !UV_HANDLE_READING;
    self.alloc_cb = None;
    self.read_cb = None;
  }

  /// Disarms everything. Nothing but the close callback fires after this.
  fn stop(&mut self) {
    self.stop_reading();
    self.flags |= UV_HANDLE_CLOSING;
    self.connection_cb = None;
    self.connect = None;
    self.socket = None;
    self.stream = None;
    self.listener = None;
    self.backlog.clear();
  }
}

fn ephemeral_socket() -> io::Result<TcpSocket> {
  let socket = TcpSocket::new_v4()?;
  socket.bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
  Ok(socket)
}

/// A single-threaded event loop owning a set of TCP handles.
///
/// `C` is the context type handed to every completion callback; it is
/// supplied on each call to [`UvLoop::run`].
pub struct UvLoop<C> {
  handles: RefCell<BTreeMap<HandleId, TcpHandle<C>>>,
  next_id: Cell<HandleId>,
  closing_handles: RefCell<VecDeque<(HandleId, Option<CloseCb<C>>)>>,
  stop_flag: Cell<bool>,
  running: Cell<bool>,
  // Declared last so sockets are dropped before the reactor.
  rt: tokio::runtime::Runtime,
}

impl<C> UvLoop<C> {
  pub fn new() -> io::Result<Self> {
    let rt = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()?;
    Ok(Self {
      handles: RefCell::new(BTreeMap::new()),
      next_id: Cell::new(0),
      closing_handles: RefCell::new(VecDeque::with_capacity(16)),
      stop_flag: Cell::new(false),
      running: Cell::new(false),
      rt,
    })
  }

  fn with_tcp(
    &self,
    id: HandleId,
    f: impl FnOnce(&mut TcpHandle<C>) -> i32,
  ) -> i32 {
    let mut handles = self.handles.borrow_mut();
    match handles.get_mut(&id) {
      None => UV_EBADF,
      Some(tcp) if tcp.is_closing() => UV_EINVAL,
      Some(tcp) => f(tcp),
    }
  }

  pub fn tcp_init(&self) -> HandleId {
    let id = self.next_id.get();
    self.next_id.set(id + 1);
    let removed = self.handles.borrow_mut().insert(id, TcpHandle::new());
    assert!(removed.is_none());
    id
  }

  pub fn tcp_bind(&self, id: HandleId, addr: SocketAddr) -> i32 {
    self.with_tcp(id, |tcp| {
      if !tcp.is_idle() {
        return UV_EINVAL;
      }
      let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
      };
      let socket = match socket {
        Ok(socket) => socket,
        Err(err) => return io_error_status(&err),
      };
      if cfg!(unix) {
        socket.set_reuseaddr(true).ok();
      }
      if let Err(err) = socket.bind(addr) {
        return io_error_status(&err);
      }
      tcp.socket = Some(socket);
      tcp.bind_addr = Some(addr);
      0
    })
  }

  /// Starts an asynchronous connect. `cb` fires once with the outcome,
  /// unless the handle is closed first.
  pub fn tcp_connect(
    &self,
    id: HandleId,
    addr: SocketAddr,
    cb: ConnectCb<C>,
  ) -> i32 {
    self.with_tcp(id, |tcp| {
      if tcp.connect.is_some() {
        return UV_EALREADY;
      }
      if tcp.stream.is_some() {
        return UV_EISCONN;
      }
      if tcp.listener.is_some() {
        return UV_EINVAL;
      }
      let future: Pin<Box<dyn Future<Output = io::Result<TcpStream>>>> =
        match tcp.socket.take() {
          Some(socket) => Box::pin(socket.connect(addr)),
          None => Box::pin(TcpStream::connect(addr)),
        };
      tcp.connect = Some(ConnectPending { future, cb });
      0
    })
  }

  pub fn tcp_nodelay(&self, id: HandleId, enable: bool) -> i32 {
    self.with_tcp(id, |tcp| {
      tcp.nodelay = enable;
      if let Some(ref stream) = tcp.stream
        && let Err(err) = stream.set_nodelay(enable)
      {
        return io_error_status(&err);
      }
      0
    })
  }

  pub fn getsockname(&self, id: HandleId) -> Result<SocketAddr, i32> {
    let handles = self.handles.borrow();
    let Some(tcp) = handles.get(&id) else {
      return Err(UV_EBADF);
    };
    let addr = if let Some(ref stream) = tcp.stream {
      stream.local_addr()
    } else if let Some(ref listener) = tcp.listener {
      listener.local_addr()
    } else if let Some(ref socket) = tcp.socket {
      socket.local_addr()
    } else {
      return tcp.bind_addr.ok_or(UV_EINVAL);
    };
    addr.map_err(|err| io_error_status(&err))
  }

  pub fn getpeername(&self, id: HandleId) -> Result<SocketAddr, i32> {
    let handles = self.handles.borrow();
    let Some(tcp) = handles.get(&id) else {
      return Err(UV_EBADF);
    };
    match tcp.stream {
      Some(ref stream) => stream.peer_addr().map_err(|_| UV_ENOTCONN),
      None => Err(UV_ENOTCONN),
    }
  }

  /// Starts accepting connections. An unbound handle is bound to an
  /// ephemeral port on all interfaces first.
  pub fn listen(&self, id: HandleId, backlog: i32, cb: ConnectionCb<C>) -> i32 {
    let Ok(backlog) = u32::try_from(backlog) else {
      return UV_EINVAL;
    };
    // Registering the listener with the reactor needs a runtime context.
    let _guard = self.rt.enter();
    self.with_tcp(id, |tcp| {
      if tcp.stream.is_some() || tcp.connect.is_some() {
        return UV_EINVAL;
      }
      if tcp.listener.is_some() {
        tcp.connection_cb = Some(cb);
        return 0;
      }
      let socket = match tcp.socket.take() {
        Some(socket) => socket,
        None => match ephemeral_socket() {
          Ok(socket) => socket,
          Err(err) => return io_error_status(&err),
        },
      };
      match socket.listen(backlog) {
        Ok(listener) => {
          tcp.listener = Some(listener);
          tcp.connection_cb = Some(cb);
          0
        }
        Err(err) => io_error_status(&err),
      }
    })
  }

  /// Moves the oldest pending connection of `server` into `client`, which
  /// must be a freshly initialized handle.
  pub fn accept(&self, server: HandleId, client: HandleId) -> i32 {
    let mut handles = self.handles.borrow_mut();
    match handles.get(&client) {
      None => return UV_EBADF,
      Some(tcp) if tcp.is_closing() => return UV_EINVAL,
      Some(tcp) if !tcp.is_idle() => return UV_EISCONN,
      Some(_) => {}
    }
    let stream = match handles.get_mut(&server) {
      None => return UV_EBADF,
      Some(tcp) if tcp.is_closing() || tcp.listener.is_none() => {
        return UV_EINVAL;
      }
      Some(tcp) => match tcp.backlog.pop_front() {
        Some(stream) => stream,
        None => return UV_EAGAIN,
      },
    };
    let Some(client_tcp) = handles.get_mut(&client) else {
      return UV_EBADF;
    };
    if client_tcp.nodelay {
      stream.set_nodelay(true).ok();
    }
    client_tcp.stream = Some(stream);
    0
  }

  pub fn read_start(
    &self,
    id: HandleId,
    alloc_cb: AllocCb<C>,
    read_cb: ReadCb<C>,
  ) -> i32 {
    self.with_tcp(id, |tcp| {
      if tcp.stream.is_none() {
        return UV_ENOTCONN;
      }
      tcp.alloc_cb = Some(alloc_cb);
      tcp.read_cb = Some(read_cb);
      tcp.flags |= UV_HANDLE_READING;
      0
    })
  }

  /// Disarms reading. Fails with `UV_EINVAL` when reading is not armed.
  pub fn read_stop(&self, id: HandleId) -> i32 {
    self.with_tcp(id, |tcp| {
      if !tcp.is_reading() {
        return UV_EINVAL;
      }
      tcp.stop_reading();
      0
    })
  }

  /// Closes a handle. `cb` runs exactly once, in the close phase of the
  /// next tick; closing a handle that is already closing does nothing.
  pub fn close(&self, id: HandleId, cb: Option<CloseCb<C>>) {
    {
      let mut handles = self.handles.borrow_mut();
      let Some(tcp) = handles.get_mut(&id) else {
        log::debug!("close of unknown tcp#{id} ignored");
        return;
      };
      if tcp.is_closing() {
        return;
      }
      tcp.stop();
    }
    self.closing_handles.borrow_mut().push_back((id, cb));
  }

  pub fn is_active(&self, id: HandleId) -> bool {
    self
      .handles
      .borrow()
      .get(&id)
      .is_some_and(|tcp| tcp.is_active())
  }

  pub fn is_closing(&self, id: HandleId) -> bool {
    self
      .handles
      .borrow()
      .get(&id)
      .is_some_and(|tcp| tcp.is_closing())
  }

  pub fn handle_count(&self) -> usize {
    self.handles.borrow().len()
  }

  pub fn has_alive_handles(&self) -> bool {
    self.handles.borrow().values().any(|tcp| tcp.is_active())
      || !self.closing_handles.borrow().is_empty()
  }

  /// Makes a running loop return after the current tick.
  pub fn stop(&self) {
    self.stop_flag.set(true);
  }

  /// Runs the loop. Returns 0 when no handle is left alive, 1 when the loop
  /// returned with live handles (stopped, or a `Once`/`NoWait` run), and
  /// `UV_EBUSY` when called from inside a callback of a running loop.
  pub fn run(&self, cx: &C, mode: RunMode) -> i32 {
    if self.running.replace(true) {
      return UV_EBUSY;
    }
    self.stop_flag.set(false);
    let status = self.rt.block_on(std::future::poll_fn(|task_cx| {
      self.poll_run(cx, task_cx, mode)
    }));
    self.running.set(false);
    status
  }

  fn poll_run(
    &self,
    cx: &C,
    task_cx: &mut Context<'_>,
    mode: RunMode,
  ) -> Poll<i32> {
    let did_work = self.tick(cx, task_cx);
    let alive = self.has_alive_handles();
    let done = match mode {
      RunMode::Default => !alive || self.stop_flag.get(),
      RunMode::Once => did_work || !alive || self.stop_flag.get(),
      RunMode::NoWait => true,
    };
    if done {
      return Poll::Ready(i32::from(alive));
    }
    if did_work {
      // Callbacks may have armed new work; poll it before parking.
      task_cx.waker().wake_by_ref();
    }
    Poll::Pending
  }

  /// One loop iteration: I/O for every handle, then the close phase.
  fn tick(&self, cx: &C, task_cx: &mut Context<'_>) -> bool {
    let mut did_any_work = false;
    for _pass in 0..IO_PASSES {
      let ids: SmallVec<[HandleId; 16]> =
        self.handles.borrow().keys().copied().collect();
      let mut any_work = false;
      for id in ids {
        any_work |= self.poll_connect(cx, task_cx, id);
        any_work |= self.poll_accept(cx, task_cx, id);
        any_work |= self.poll_read(cx, task_cx, id);
      }
      if !any_work {
        break;
      }
      did_any_work = true;
    }
    did_any_work | self.run_close(cx)
  }

  fn poll_connect(
    &self,
    cx: &C,
    task_cx: &mut Context<'_>,
    id: HandleId,
  ) -> bool {
    let (cb, status) = {
      let mut handles = self.handles.borrow_mut();
      let Some(tcp) = handles.get_mut(&id) else {
        return false;
      };
      let Some(pending) = tcp.connect.as_mut() else {
        return false;
      };
      let Poll::Ready(result) = pending.future.as_mut().poll(task_cx) else {
        return false;
      };
      let cb = pending.cb;
      tcp.connect = None;
      let status = match result {
        Ok(stream) => {
          if tcp.nodelay {
            stream.set_nodelay(true).ok();
          }
          tcp.stream = Some(stream);
          0
        }
        Err(err) => io_error_status(&err),
      };
      (cb, status)
    };
    log::trace!("tcp#{id} connect finished: {}", err_name(status));
    cb(cx, id, status);
    true
  }

  fn poll_accept(
    &self,
    cx: &C,
    task_cx: &mut Context<'_>,
    id: HandleId,
  ) -> bool {
    let mut any_work = false;
    loop {
      // Re-check after each callback: it may have closed the listener.
      let (cb, status) = {
        let mut handles = self.handles.borrow_mut();
        let Some(tcp) = handles.get_mut(&id) else {
          break;
        };
        let (Some(listener), Some(cb)) =
          (tcp.listener.as_ref(), tcp.connection_cb)
        else {
          break;
        };
        match listener.poll_accept(task_cx) {
          Poll::Ready(Ok((stream, peer))) => {
            log::trace!("tcp#{id} queued connection from {peer}");
            tcp.backlog.push_back(stream);
            (cb, 0)
          }
          Poll::Ready(Err(err)) => (cb, io_error_status(&err)),
          Poll::Pending => break,
        }
      };
      any_work = true;
      cb(cx, id, status);
      if status != 0 {
        break;
      }
    }
    any_work
  }

  fn poll_read(
    &self,
    cx: &C,
    task_cx: &mut Context<'_>,
    id: HandleId,
  ) -> bool {
    let mut any_work = false;
    loop {
      // Re-check after each callback: it may have called read_stop or close.
      let (alloc_cb, read_cb, ready) = {
        let handles = self.handles.borrow();
        let Some(tcp) = handles.get(&id) else {
          break;
        };
        let (Some(alloc_cb), Some(read_cb), Some(stream)) =
          (tcp.alloc_cb, tcp.read_cb, tcp.stream.as_ref())
        else {
          break;
        };
        if !tcp.is_reading() {
          break;
        }
        (alloc_cb, read_cb, stream.poll_read_ready(task_cx))
      };
      match ready {
        Poll::Pending => break,
        Poll::Ready(Err(err)) => {
          self.finish_reading(cx, id, read_cb, io_error_status(&err));
          any_work = true;
          break;
        }
        Poll::Ready(Ok(())) => {}
      }

      let mut buf = alloc_cb(cx, id, SUGGESTED_READ_SIZE);
      if buf.capacity() == 0 {
        break;
      }
      let result = {
        let handles = self.handles.borrow();
        match handles.get(&id).and_then(|tcp| tcp.stream.as_ref()) {
          Some(stream) => stream.try_read_buf(&mut buf),
          None => break,
        }
      };
      match result {
        Ok(0) => {
          self.finish_reading(cx, id, read_cb, UV_EOF);
          any_work = true;
          break;
        }
        Ok(n) => {
          log::trace!("tcp#{id} read {n} bytes");
          any_work = true;
          read_cb(cx, id, n as isize, buf.freeze());
        }
        // Readiness was stale; polling again re-registers the waker.
        Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => continue,
        Err(err) => {
          self.finish_reading(cx, id, read_cb, io_error_status(&err));
          any_work = true;
          break;
        }
      }
    }
    any_work
  }

  /// Disarms reading and delivers the final (negative) read status.
  fn finish_reading(
    &self,
    cx: &C,
    id: HandleId,
    read_cb: ReadCb<C>,
    status: i32,
  ) {
    if let Some(tcp) = self.handles.borrow_mut().get_mut(&id) {
      tcp.stop_reading();
    }
    log::trace!("tcp#{id} read finished: {}", err_name(status));
    read_cb(cx, id, status as isize, Bytes::new());
  }

  fn run_close(&self, cx: &C) -> bool {
    let snapshot: Vec<_> =
      self.closing_handles.borrow_mut().drain(..).collect();
    let ran = !snapshot.is_empty();
    for (id, cb) in snapshot {
      self.handles.borrow_mut().remove(&id);
      log::debug!("tcp#{id} closed");
      if let Some(cb) = cb {
        cb(cx, id);
      }
    }
    ran
  }
}
