// Copyright 2018-2025 the Deno authors. MIT license.

//! Trampolines handed to the engine as completion callbacks.
//!
//! Each one resolves the handle id back to its [`Tcp`] companion through the
//! registry, then invokes the script callback registered for the event with
//! the companion as the first argument. Errors escaping a script callback are
//! reported through the runtime and never reach the engine.

use crate::callbacks::EventKind;
use crate::error::CallbackError;
use crate::runtime::Runtime;
use crate::tcp::Tcp;
use crate::tcp::TcpState;
use crate::uv::HandleId;
use crate::value::Function;
use crate::value::Value;
use bytes::Bytes;
use bytes::BytesMut;
use smallvec::SmallVec;
use smallvec::smallvec;

/// A completed engine event, alive only while it is being delivered.
enum Event {
  Connect { status: i32 },
  Connection { status: i32 },
  Read { nread: isize, data: Bytes },
  Close,
}

impl Event {
  fn kind(&self) -> EventKind {
    match self {
      Event::Connect { .. } => EventKind::Connect,
      Event::Connection { .. } => EventKind::Connection,
      Event::Read { .. } => EventKind::Read,
      Event::Close => EventKind::Close,
    }
  }

  fn into_args(self, receiver: Tcp) -> SmallVec<[Value; 3]> {
    let mut args: SmallVec<[Value; 3]> = smallvec![Value::Tcp(receiver)];
    match self {
      Event::Connect { status } | Event::Connection { status } => {
        args.push(Value::Integer(status.into()));
      }
      Event::Read { nread, data } => {
        args.push(Value::Integer(nread as i64));
        args.push(if nread >= 0 {
          Value::Buffer(data)
        } else {
          Value::Nil
        });
      }
      Event::Close => {}
    }
    args
  }
}

/// Finds the companion for an event. A handle without one can never be
/// observed by the script, so it is closed and the event dropped.
fn resolve(rt: &Runtime, id: HandleId, kind: EventKind) -> Option<Tcp> {
  let tcp = rt.registry().lookup(id);
  if tcp.is_none() {
    log::debug!("dropping {kind} event for unregistered tcp#{id}");
    rt.uv().close(id, Some(on_close));
  }
  tcp
}

fn deliver(rt: &Runtime, tcp: Tcp, event: Event) {
  let kind = event.kind();
  match tcp.callback(kind) {
    Ok(callback) => invoke(rt, tcp, &callback, event),
    Err(err) => {
      log::warn!("tcp#{}: {err}", tcp.id());
      rt.report_error(&CallbackError::new(kind, tcp.id(), err.into()));
    }
  }
}

fn invoke(rt: &Runtime, tcp: Tcp, callback: &Function, event: Event) {
  let kind = event.kind();
  let id = tcp.id();
  let args = event.into_args(tcp);
  if let Err(error) = rt.pcall(callback, &args) {
    rt.report_error(&CallbackError::new(kind, id, error));
  }
}

pub(crate) fn on_connect(rt: &Runtime, id: HandleId, status: i32) {
  let Some(tcp) = resolve(rt, id, EventKind::Connect) else {
    return;
  };
  tcp.set_state(if status == 0 {
    TcpState::Connected
  } else {
    TcpState::Failed
  });
  deliver(rt, tcp, Event::Connect { status });
}

pub(crate) fn on_connection(rt: &Runtime, id: HandleId, status: i32) {
  let Some(tcp) = resolve(rt, id, EventKind::Connection) else {
    return;
  };
  deliver(rt, tcp, Event::Connection { status });
}

pub(crate) fn on_alloc(
  rt: &Runtime,
  _id: HandleId,
  suggested: usize,
) -> BytesMut {
  match rt.options().read_buffer_size {
    0 => BytesMut::with_capacity(suggested),
    size => BytesMut::with_capacity(size),
  }
}

pub(crate) fn on_read(rt: &Runtime, id: HandleId, nread: isize, data: Bytes) {
  let Some(tcp) = resolve(rt, id, EventKind::Read) else {
    return;
  };
  if nread < 0 {
    // The engine disarmed reading.
    tcp.set_reading(false);
  }
  deliver(rt, tcp, Event::Read { nread, data });
}

pub(crate) fn on_close(rt: &Runtime, id: HandleId) {
  let Some(tcp) = rt.registry().release(id) else {
    return;
  };
  tcp.set_state(TcpState::Closed);
  tcp.set_reading(false);
  // Nothing fires for this object after close, so every callback can go.
  let callbacks = tcp.take_callbacks();
  if let Ok(callback) = callbacks.get(EventKind::Close) {
    invoke(rt, tcp, &callback, Event::Close);
  }
}
