// Copyright 2018-2025 the Deno authors. MIT license.

//! Name-dispatched entry points for script code.
//!
//! Scripts reach the binding through two tables: module functions
//! (`tcp.new`, `run`) and methods of TCP objects. Every entry checks its
//! arguments before touching any state, so a call rejected with
//! [`BindingError::TypeMismatch`] has no effect.

use crate::error::BindingError;
use crate::runtime::Runtime;
use crate::tcp::Tcp;
use crate::value::Function;
use crate::value::Value;
use std::net::SocketAddr;

type OpFn = fn(&Runtime, &[Value]) -> Result<Vec<Value>, BindingError>;
type MethodFn =
  fn(&Runtime, &Tcp, &[Value]) -> Result<Vec<Value>, BindingError>;

const TCP_TYPE_NAME: &str = "uv.tcp";

static FUNCTIONS: &[(&str, OpFn)] =
  &[("tcp.new", op_tcp_new), ("run", op_run)];

static TCP_METHODS: &[(&str, MethodFn)] = &[
  ("accept", op_accept),
  ("bind", op_bind),
  ("close", op_close),
  ("connect", op_connect),
  ("getpeername", op_getpeername),
  ("getsockname", op_getsockname),
  ("listen", op_listen),
  ("nodelay", op_nodelay),
  ("read_start", op_read_start),
  ("read_stop", op_read_stop),
  ("write", op_write),
];

/// Names of the methods TCP objects expose, in table order.
pub fn tcp_method_names() -> impl Iterator<Item = &'static str> {
  TCP_METHODS.iter().map(|(name, _)| *name)
}

pub(crate) fn call_function(
  rt: &Runtime,
  name: &str,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let Some((_, op)) = FUNCTIONS.iter().find(|(n, _)| *n == name) else {
    return Err(BindingError::UnknownFunction(name.to_string()));
  };
  op(rt, args)
}

pub(crate) fn call_method(
  rt: &Runtime,
  receiver: &Value,
  name: &str,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let Some(tcp) = receiver.as_tcp() else {
    return Err(BindingError::type_mismatch(
      TCP_TYPE_NAME,
      receiver.type_name(),
    ));
  };
  let Some((_, method)) = TCP_METHODS.iter().find(|(n, _)| *n == name) else {
    return Err(BindingError::UnknownMethod {
      type_name: TCP_TYPE_NAME,
      method: name.to_string(),
    });
  };
  method(rt, tcp, args)
}

fn type_name_of(value: Option<&Value>) -> &'static str {
  value.map_or("nil", Value::type_name)
}

fn check_integer(value: Option<&Value>) -> Result<i64, BindingError> {
  value
    .and_then(Value::as_integer)
    .ok_or_else(|| BindingError::type_mismatch("integer", type_name_of(value)))
}

fn check_boolean(value: Option<&Value>) -> Result<bool, BindingError> {
  value
    .and_then(Value::as_boolean)
    .ok_or_else(|| BindingError::type_mismatch("boolean", type_name_of(value)))
}

fn check_string(value: Option<&Value>) -> Result<&str, BindingError> {
  value
    .and_then(Value::as_str)
    .ok_or_else(|| BindingError::type_mismatch("string", type_name_of(value)))
}

fn check_function(value: Option<&Value>) -> Result<Function, BindingError> {
  value
    .and_then(Value::as_function)
    .cloned()
    .ok_or_else(|| BindingError::type_mismatch("function", type_name_of(value)))
}

fn opt_function(
  value: Option<&Value>,
) -> Result<Option<Function>, BindingError> {
  match value {
    None | Some(Value::Nil) => Ok(None),
    Some(_) => check_function(value).map(Some),
  }
}

fn status(code: i32) -> Vec<Value> {
  vec![Value::from(code)]
}

fn addr_result(result: Result<SocketAddr, i32>) -> Vec<Value> {
  match result {
    Ok(addr) => vec![
      Value::from(addr.ip().to_string()),
      Value::from(i64::from(addr.port())),
      Value::from(0),
    ],
    Err(code) => vec![Value::Nil, Value::Nil, Value::from(code)],
  }
}

fn op_tcp_new(
  rt: &Runtime,
  _args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  Ok(vec![Value::Tcp(Tcp::new(rt))])
}

fn op_run(rt: &Runtime, _args: &[Value]) -> Result<Vec<Value>, BindingError> {
  Ok(status(rt.run()))
}

fn op_bind(
  rt: &Runtime,
  tcp: &Tcp,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let host = check_string(args.first())?;
  let port = check_integer(args.get(1))?;
  Ok(status(tcp.bind(rt, host, port)))
}

fn op_connect(
  rt: &Runtime,
  tcp: &Tcp,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let host = check_string(args.first())?;
  let port = check_integer(args.get(1))?;
  let on_connect = check_function(args.get(2))?;
  Ok(status(tcp.connect(rt, host, port, on_connect)))
}

/// `listen([backlog,] on_connection)`
fn op_listen(
  rt: &Runtime,
  tcp: &Tcp,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let (backlog, on_connection) = match args.first() {
    Some(Value::Integer(backlog)) => {
      // Out-of-range backlogs are rejected by the loop as invalid.
      (Some(i32::try_from(*backlog).unwrap_or(-1)), args.get(1))
    }
    other => (None, other),
  };
  let on_connection = check_function(on_connection)?;
  Ok(status(tcp.listen(rt, backlog, on_connection)))
}

fn op_accept(
  rt: &Runtime,
  tcp: &Tcp,
  _args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let (client, code) = tcp.accept(rt);
  Ok(vec![Value::Tcp(client), Value::from(code)])
}

fn op_read_start(
  rt: &Runtime,
  tcp: &Tcp,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let on_read = check_function(args.first())?;
  Ok(status(tcp.read_start(rt, on_read)))
}

fn op_read_stop(
  rt: &Runtime,
  tcp: &Tcp,
  _args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  Ok(status(tcp.read_stop(rt)))
}

/// `write(...)` accepts any arguments and always fails.
fn op_write(
  rt: &Runtime,
  tcp: &Tcp,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let data = args.first().and_then(Value::as_bytes).unwrap_or_default();
  Ok(status(tcp.write(rt, data)))
}

fn op_close(
  rt: &Runtime,
  tcp: &Tcp,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let on_close = opt_function(args.first())?;
  tcp.close(rt, on_close);
  Ok(vec![])
}

fn op_nodelay(
  rt: &Runtime,
  tcp: &Tcp,
  args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  let enable = check_boolean(args.first())?;
  Ok(status(tcp.nodelay(rt, enable)))
}

fn op_getsockname(
  rt: &Runtime,
  tcp: &Tcp,
  _args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  Ok(addr_result(tcp.getsockname(rt)))
}

fn op_getpeername(
  rt: &Runtime,
  tcp: &Tcp,
  _args: &[Value],
) -> Result<Vec<Value>, BindingError> {
  Ok(addr_result(tcp.getpeername(rt)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn method_table_is_sorted() {
    let names: Vec<_> = tcp_method_names().collect();
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);
  }

  #[test]
  fn argument_checks() {
    assert_eq!(check_integer(Some(&Value::from(5))).unwrap(), 5);
    assert!(matches!(
      check_integer(None),
      Err(BindingError::TypeMismatch {
        expected: "integer",
        got: "nil"
      })
    ));
    assert!(matches!(
      check_string(Some(&Value::from(1))),
      Err(BindingError::TypeMismatch {
        expected: "string",
        got: "integer"
      })
    ));
    assert!(opt_function(None).unwrap().is_none());
    assert!(opt_function(Some(&Value::Nil)).unwrap().is_none());
    assert!(opt_function(Some(&Value::from(true))).is_err());
  }

  #[test]
  fn addr_results() {
    let values = addr_result(Ok("127.0.0.1:8080".parse().unwrap()));
    assert_eq!(values[0].as_str(), Some("127.0.0.1"));
    assert_eq!(values[1].as_integer(), Some(8080));
    assert_eq!(values[2].as_integer(), Some(0));
    let values = addr_result(Err(-9));
    assert!(values[0].is_nil());
    assert_eq!(values[2].as_integer(), Some(-9));
  }
}
