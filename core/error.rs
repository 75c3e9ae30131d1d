// Copyright 2018-2025 the Deno authors. MIT license.

use crate::callbacks::EventKind;
use crate::uv::HandleId;
use std::any::Any;
use std::backtrace::BacktraceStatus;
use std::fmt;

/// A generic wrapper that can encapsulate any concrete error type.
pub type AnyError = anyhow::Error;

/// Errors raised synchronously by the binding surface. These never cross
/// the event loop; they are returned to the caller of the offending
/// operation.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
  #[error("{expected} expected, got {got}")]
  TypeMismatch {
    expected: &'static str,
    got: &'static str,
  },
  #[error("unknown event '{0}'")]
  UnknownEvent(String),
  #[error("no {0} callback registered")]
  MissingCallback(EventKind),
  #[error("'{method}' is not a method of {type_name}")]
  UnknownMethod {
    type_name: &'static str,
    method: String,
  },
  #[error("unknown function '{0}'")]
  UnknownFunction(String),
  #[error("failed to start event loop")]
  Io(#[from] std::io::Error),
}

impl BindingError {
  pub fn type_mismatch(expected: &'static str, got: &'static str) -> Self {
    Self::TypeMismatch { expected, got }
  }
}

/// An error escaping a host callback invoked from the event loop.
///
/// The error is reported through the runtime's error channel and then
/// discarded; the loop keeps running.
#[derive(Debug)]
pub struct CallbackError {
  pub event: EventKind,
  pub handle: HandleId,
  pub error: AnyError,
}

impl CallbackError {
  pub fn new(event: EventKind, handle: HandleId, error: AnyError) -> Self {
    Self {
      event,
      handle,
      error,
    }
  }

  /// The innermost error message.
  pub fn message(&self) -> String {
    self.error.root_cause().to_string()
  }

  /// Call frames recorded while the error unwound, innermost first.
  pub fn traceback(&self) -> Vec<String> {
    let mut frames: Vec<String> =
      self.error.chain().map(|cause| cause.to_string()).collect();
    // The last link is the root cause itself.
    frames.pop();
    frames.reverse();
    frames
  }
}

impl fmt::Display for CallbackError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "uncaught error in {} callback of tcp#{}: {}",
      self.event,
      self.handle,
      self.message()
    )?;
    let frames = self.traceback();
    if !frames.is_empty() {
      write!(f, "\nstack traceback:")?;
      for frame in frames {
        write!(f, "\n\t{frame}")?;
      }
    }
    let backtrace = self.error.backtrace();
    if backtrace.status() == BacktraceStatus::Captured {
      write!(f, "\n{backtrace}")?;
    }
    Ok(())
  }
}

impl std::error::Error for CallbackError {}

/// Extracts the message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "Box<dyn Any>".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use anyhow::Context;
  use anyhow::anyhow;

  #[test]
  fn traceback_is_innermost_first() {
    let error = Err::<(), _>(anyhow!("boom"))
      .context("in function 'inner'")
      .context("in function 'outer'")
      .unwrap_err();
    let err = CallbackError::new(EventKind::Read, 3, error);
    assert_eq!(err.message(), "boom");
    assert_eq!(
      err.traceback(),
      vec!["in function 'inner'", "in function 'outer'"]
    );
    let rendered = err.to_string();
    assert!(rendered.starts_with(
      "uncaught error in on_read callback of tcp#3: boom\nstack traceback:\n\tin function 'inner'\n\tin function 'outer'"
    ));
  }

  #[test]
  fn type_mismatch_message() {
    let err = BindingError::type_mismatch("function", "integer");
    assert_eq!(err.to_string(), "function expected, got integer");
    let err = BindingError::MissingCallback(EventKind::Connection);
    assert_eq!(err.to_string(), "no on_connection callback registered");
  }

  #[test]
  fn panic_payloads() {
    let payload: Box<dyn Any + Send> = Box::new("static message");
    assert_eq!(panic_message(payload.as_ref()), "static message");
    let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
    assert_eq!(panic_message(payload.as_ref()), "owned");
    let payload: Box<dyn Any + Send> = Box::new(42u8);
    assert_eq!(panic_message(payload.as_ref()), "Box<dyn Any>");
  }
}
