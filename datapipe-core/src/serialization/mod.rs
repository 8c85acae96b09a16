//! Serialization of pipe graphs for transfer to worker processes
//!
//! A pipe graph is first captured into an engine-neutral [`PipeSnapshot`]
//! by asking every stage for its [`StageState`]: the catalog kind it is
//! registered under plus the arguments that rebuild it. An engine then
//! encodes the snapshot. The [`SerializationWrapper`] tries the engines of
//! a [`SerializationConfig`] in order, so pipes holding named closures still
//! serialize through the by-reference engine when the standard engine
//! refuses them.

mod engine;
mod snapshot;
mod wrapper;

pub use engine::{ByReferenceEngine, SerializationConfig, SerializationEngine, StandardEngine};
pub use snapshot::{
    register_keyed_stage, register_stream_stage, ArgSnapshot, Capture, ClosurePolicy,
    KeyedDecoder, PipeSnapshot, StageState, StreamDecoder,
};
pub use wrapper::{CapturedState, SerializationWrapper, WRAPPER_NAME};
