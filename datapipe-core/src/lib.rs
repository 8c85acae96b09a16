//! Core abstractions for lazily composed data pipes
//!
//! This crate provides the substrate that concrete pipe stages build upon:
//! the iterable-style [`StreamPipe`] with its single-active-iterator
//! protocol, the map-style [`KeyedPipe`], the per-variant operation
//! registries that give pipes their fluent methods, overridable hooks, and
//! the [`SerializationWrapper`] used to ship pipes to worker processes.

#![warn(missing_docs)]

pub mod args;
pub mod chunk;
pub mod error;
pub mod hooks;
pub mod keyed;
pub mod registry;
pub mod serialization;
pub mod stream;
pub mod value;

// Re-export key types for convenience
pub use args::{Arg, Args, Func};
pub use chunk::Chunk;
pub use error::{Error, Result};
pub use keyed::{KeyedPipe, KeyedStage};
pub use registry::{BoundMethod, FunctionRegistry, Output};
pub use serialization::{SerializationConfig, SerializationWrapper, StageState};
pub use stream::{ItemIter, PipeIter, StreamPipe, StreamStage};
pub use value::{Key, Value};

static_assertions::assert_impl_all!(StreamPipe: Send, Sync, Clone);
static_assertions::assert_impl_all!(KeyedPipe: Send, Sync, Clone);
static_assertions::assert_impl_all!(Func: Send, Sync, Clone);
static_assertions::assert_impl_all!(Chunk<Value>: Send, Sync, Clone);
