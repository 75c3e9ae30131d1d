// Copyright 2018-2025 the Deno authors. MIT license.
use crate::error::CallbackError;
use crate::runtime::Runtime;
use crate::runtime::RuntimeOptions;
use crate::tcp::Tcp;
use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;


/// Ordered record of what callbacks observed.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
  pub fn push(&self, event: impl Into<String>) {
    self.0.borrow_mut().push(event.into());
  }

  pub fn take(&self) -> Vec<String> {
    std::mem::take(&mut *self.0.borrow_mut())
  }
}

/// Errors delivered to the runtime's reporter, rendered as
/// `(event, message, traceback)`.
#[derive(Clone, Default)]
pub(crate) struct Reported(Rc<RefCell<Vec<(String, String, Vec<String>)>>>);

impl Reported {
  pub fn take(&self) -> Vec<(String, String, Vec<String>)> {
    std::mem::take(&mut *self.0.borrow_mut())
  }
}

pub(crate) fn setup() -> (Runtime, Reported) {
  let reported = Reported::default();
  let sink = reported.clone();
  let options = RuntimeOptions {
    error_reporter: Some(Rc::new(move |err: &CallbackError| {
      sink.0.borrow_mut().push((
        err.event.to_string(),
        err.message(),
        err.traceback(),
      ));
    })),
    ..Default::default()
  };
  (Runtime::new(options).unwrap(), reported)
}

pub(crate) fn receiver(args: &[Value]) -> Tcp {
  args[0].as_tcp().unwrap().clone()
}

pub(crate) fn integer(args: &[Value], index: usize) -> i64 {
  args[index].as_integer().unwrap()
}

/// Binds a fresh handle to an ephemeral loopback port.
pub(crate) fn bound(rt: &Runtime) -> (Tcp, u16) {
  let tcp = Tcp::new(rt);
  assert_eq!(tcp.bind(rt, "127.0.0.1", 0), 0);
  let port = tcp.getsockname(rt).unwrap().port();
  (tcp, port)
}
