// Copyright 2018-2025 the Deno authors. MIT license.
mod uvruntime;

#[cfg(test)]
mod tests;

pub use uvruntime::ErrorReporter;
pub use uvruntime::Runtime;
pub use uvruntime::RuntimeOptions;
