// Copyright 2018-2025 the Deno authors. MIT license.

//! Host values: what scripts pass into the binding and what callbacks
//! receive.

use crate::error::AnyError;
use crate::runtime::Runtime;
use crate::tcp::Tcp;
use anyhow::Context as _;
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

type HostFn = dyn Fn(&Runtime, &[Value]) -> Result<Vec<Value>, AnyError>;

/// A callable host function. Cloning is cheap and preserves identity.
#[derive(Clone)]
pub struct Function {
  name: Cow<'static, str>,
  f: Rc<HostFn>,
}

impl Function {
  pub fn new(
    name: impl Into<Cow<'static, str>>,
    f: impl Fn(&Runtime, &[Value]) -> Result<Vec<Value>, AnyError> + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      f: Rc::new(f),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Calls the function. Errors leaving it gain a frame naming this
  /// function, so nested calls accumulate a traceback.
  pub fn call(
    &self,
    rt: &Runtime,
    args: &[Value],
  ) -> Result<Vec<Value>, AnyError> {
    (self.f)(rt, args).with_context(|| format!("in function '{}'", self.name))
  }

  pub fn ptr_eq(&self, other: &Function) -> bool {
    Rc::ptr_eq(&self.f, &other.f)
  }
}

impl fmt::Debug for Function {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "function: {}", self.name)
  }
}

#[derive(Clone, Debug, Default)]
pub enum Value {
  #[default]
  Nil,
  Boolean(bool),
  Integer(i64),
  String(String),
  Buffer(Bytes),
  Function(Function),
  Tcp(Tcp),
}

impl Value {
  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Nil => "nil",
      Value::Boolean(_) => "boolean",
      Value::Integer(_) => "integer",
      Value::String(_) => "string",
      Value::Buffer(_) => "buffer",
      Value::Function(_) => "function",
      Value::Tcp(_) => "uv.tcp",
    }
  }

  pub fn is_nil(&self) -> bool {
    matches!(self, Value::Nil)
  }

  pub fn as_boolean(&self) -> Option<bool> {
    match self {
      Value::Boolean(b) => Some(*b),
      _ => None,
    }
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Value::Integer(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  /// Strings and buffers both read as bytes.
  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      Value::String(s) => Some(s.as_bytes()),
      Value::Buffer(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_function(&self) -> Option<&Function> {
    match self {
      Value::Function(f) => Some(f),
      _ => None,
    }
  }

  pub fn as_tcp(&self) -> Option<&Tcp> {
    match self {
      Value::Tcp(tcp) => Some(tcp),
      _ => None,
    }
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Boolean(b)
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self {
    Value::Integer(n)
  }
}

impl From<i32> for Value {
  fn from(n: i32) -> Self {
    Value::Integer(n.into())
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<Bytes> for Value {
  fn from(b: Bytes) -> Self {
    Value::Buffer(b)
  }
}

impl From<Function> for Value {
  fn from(f: Function) -> Self {
    Value::Function(f)
  }
}

impl From<Tcp> for Value {
  fn from(tcp: Tcp) -> Self {
    Value::Tcp(tcp)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn type_names() {
    assert_eq!(Value::Nil.type_name(), "nil");
    assert_eq!(Value::from(3).type_name(), "integer");
    assert_eq!(Value::from("x").type_name(), "string");
    assert_eq!(Value::from(Bytes::from_static(b"x")).type_name(), "buffer");
    let f = Function::new("f", |_, _| Ok(vec![]));
    assert_eq!(Value::from(f).type_name(), "function");
  }

  #[test]
  fn accessors() {
    assert_eq!(Value::from(7i64).as_integer(), Some(7));
    assert_eq!(Value::from("7").as_integer(), None);
    assert_eq!(Value::from("abc").as_bytes(), Some(&b"abc"[..]));
    assert_eq!(
      Value::from(Bytes::from_static(b"abc")).as_bytes(),
      Some(&b"abc"[..])
    );
    assert!(Value::default().is_nil());
    assert_eq!(Value::from(true).as_boolean(), Some(true));
  }

  #[test]
  fn function_identity() {
    let f = Function::new("f", |_, _| Ok(vec![]));
    let g = f.clone();
    let h = Function::new("f", |_, _| Ok(vec![]));
    assert!(f.ptr_eq(&g));
    assert!(!f.ptr_eq(&h));
    assert_eq!(format!("{f:?}"), "function: f");
  }
}
