// Copyright 2018-2025 the Deno authors. MIT license.

//! TCP handles for a single-threaded scripting host, driven by a libuv-style
//! event loop.
//!
//! A [`Runtime`] owns the loop. Scripts create [`Tcp`] objects, call
//! operations on them that return libuv status codes, and receive completion
//! events through [`Function`] callbacks registered per object:
//!
//! - `on_connect(tcp, status)` when an outgoing connect finishes
//! - `on_connection(tcp, status)` for every incoming connection on a
//!   listener
//! - `on_read(tcp, n, data)` for every chunk read, and `on_read(tcp, status,
//!   nil)` when the stream ends
//! - `on_close(tcp)` once closing completes
//!
//! Errors raised by callbacks are reported through
//! [`RuntimeOptions::error_reporter`] and never stop the loop.

pub mod callbacks;
mod dispatch;
pub mod error;
pub mod event_loop;
pub mod ops;
pub mod registry;
mod runtime;
pub mod tcp;
pub mod uv;
pub mod value;

// Re-exports
pub use anyhow;
pub use bytes;

pub use crate::callbacks::CallbackStore;
pub use crate::callbacks::EventKind;
pub use crate::error::AnyError;
pub use crate::error::BindingError;
pub use crate::error::CallbackError;
pub use crate::event_loop::RunMode;
pub use crate::registry::ObjectRegistry;
pub use crate::runtime::ErrorReporter;
pub use crate::runtime::Runtime;
pub use crate::runtime::RuntimeOptions;
pub use crate::tcp::Tcp;
pub use crate::tcp::TcpState;
pub use crate::uv::HandleId;
pub use crate::value::Function;
pub use crate::value::Value;
