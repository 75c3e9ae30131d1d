// Copyright 2018-2025 the Deno authors. MIT license.

//! Phase-based event loop matching libuv's architecture.
//!
//! Each iteration (tick) of the loop runs these phases **in order**:
//!
//! ```text
//! ┌───────────────────────────────┐
//! │          poll                 │  ← connect completions, queued connections, reads
//! ├───────────────────────────────┤
//! │      close callbacks          │  ← handles closed since the last tick
//! └───────────────────────────────┘
//! ```
//!
//! The poll phase walks every handle in id order and repeats while callbacks
//! keep producing work, so a connection accepted and armed for reading in
//! the same tick has its first read delivered without another reactor turn.
//! The loop parks in the tokio reactor only when a full walk did nothing.

use strum::Display;
use strum::EnumString;

/// Run mode for the event loop, matching libuv's `uv_run_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[repr(C)]
pub enum RunMode {
  /// Run the event loop until there are no more active handles.
  #[default]
  Default = 0,
  /// Run until one tick delivers at least one callback.
  Once = 1,
  /// Run a single iteration without blocking for I/O.
  NoWait = 2,
}
