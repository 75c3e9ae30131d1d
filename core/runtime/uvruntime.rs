// Copyright 2018-2025 the Deno authors. MIT license.

use crate::error::AnyError;
use crate::error::BindingError;
use crate::error::CallbackError;
use crate::error::panic_message;
use crate::event_loop::RunMode;
use crate::ops;
use crate::registry::ObjectRegistry;
use crate::uv::UvLoop;
use crate::value::Function;
use crate::value::Value;
use anyhow::anyhow;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

/// Receives errors raised by script callbacks.
pub type ErrorReporter = Rc<dyn Fn(&CallbackError)>;

pub struct RuntimeOptions {
  /// Backlog used by `listen` when the caller does not pass one.
  pub default_backlog: i32,

  /// Capacity of the buffer allocated for each read. Zero uses the size
  /// suggested by the event loop.
  pub read_buffer_size: usize,

  /// Disable Nagle's algorithm on every new handle.
  pub nodelay: bool,

  /// Called with every error escaping a script callback. When not provided
  /// errors are logged at error level.
  pub error_reporter: Option<ErrorReporter>,
}

impl Default for RuntimeOptions {
  fn default() -> Self {
    Self {
      default_backlog: 128,
      read_buffer_size: 64 * 1024,
      nodelay: false,
      error_reporter: None,
    }
  }
}

/// The scripting side of the event loop: owns the loop, the registry of
/// script objects and the runtime options.
///
/// Everything is single-threaded. Script callbacks run on the thread calling
/// [`Runtime::run`], one at a time.
pub struct Runtime {
  uv: UvLoop<Runtime>,
  registry: ObjectRegistry,
  options: RuntimeOptions,
}

impl Runtime {
  pub fn new(options: RuntimeOptions) -> Result<Self, BindingError> {
    Ok(Self {
      uv: UvLoop::new()?,
      registry: ObjectRegistry::default(),
      options,
    })
  }

  pub fn options(&self) -> &RuntimeOptions {
    &self.options
  }

  pub fn registry(&self) -> &ObjectRegistry {
    &self.registry
  }

  pub(crate) fn uv(&self) -> &UvLoop<Runtime> {
    &self.uv
  }

  /// Runs the loop until no handle is active. Returns 0 once the loop is
  /// empty, 1 when stopped early with live handles.
  pub fn run(&self) -> i32 {
    self.run_mode(RunMode::Default)
  }

  pub fn run_mode(&self, mode: RunMode) -> i32 {
    log::debug!("event loop running ({mode})");
    let status = self.uv.run(self, mode);
    log::debug!("event loop returned {status}");
    status
  }

  /// Makes a running loop return after the current tick.
  pub fn stop(&self) {
    self.uv.stop();
  }

  pub fn has_alive_handles(&self) -> bool {
    self.uv.has_alive_handles()
  }

  /// Calls `f` in protected mode: both errors and panics are returned as
  /// errors.
  pub fn pcall(
    &self,
    f: &Function,
    args: &[Value],
  ) -> Result<Vec<Value>, AnyError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| f.call(self, args))) {
      Ok(result) => result,
      Err(payload) => Err(
        anyhow!("panicked: {}", panic_message(payload.as_ref()))
          .context(format!("in function '{}'", f.name())),
      ),
    }
  }

  /// Sends an error through the configured reporter.
  pub fn report_error(&self, err: &CallbackError) {
    match &self.options.error_reporter {
      Some(reporter) => reporter(err),
      None => log::error!("{err}"),
    }
  }

  /// Calls a module-level function by name (`"tcp.new"`, `"run"`).
  pub fn call_function(
    &self,
    name: &str,
    args: &[Value],
  ) -> Result<Vec<Value>, BindingError> {
    ops::call_function(self, name, args)
  }

  /// Calls a method on a script object by name (`"bind"`, `"listen"`, ...).
  pub fn call_method(
    &self,
    receiver: &Value,
    name: &str,
    args: &[Value],
  ) -> Result<Vec<Value>, BindingError> {
    ops::call_method(self, receiver, name, args)
  }
}
