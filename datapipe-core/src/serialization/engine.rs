//! Serialization engines and the chain they are tried in

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::serialization::snapshot::{ClosurePolicy, PipeSnapshot};

/// A strategy for turning pipe snapshots into bytes and back.
///
/// Engines differ in what they can capture (see [`ClosurePolicy`]) and in
/// their encoding. The built-in engines encode with bincode.
pub trait SerializationEngine: Send + Sync {
    /// Name recorded in captured states
    fn name(&self) -> &str;

    /// How closures are captured by this engine
    fn closure_policy(&self) -> ClosurePolicy;

    /// Encode a snapshot
    fn encode(&self, snapshot: &PipeSnapshot) -> Result<Vec<u8>> {
        Ok(bincode::serialize(snapshot)?)
    }

    /// Decode a snapshot
    fn decode(&self, payload: &[u8]) -> Result<PipeSnapshot> {
        Ok(bincode::deserialize(payload)?)
    }
}

/// Restricted engine: plain data only, any closure is a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardEngine;

impl StandardEngine {
    /// Name recorded for this engine
    pub const NAME: &'static str = "standard";
}

impl SerializationEngine for StandardEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn closure_policy(&self) -> ClosurePolicy {
        ClosurePolicy::Reject
    }
}

/// Fallback engine: records named closures by reference
#[derive(Debug, Clone, Copy, Default)]
pub struct ByReferenceEngine;

impl ByReferenceEngine {
    /// Name recorded for this engine
    pub const NAME: &'static str = "by-reference";
}

impl SerializationEngine for ByReferenceEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn closure_policy(&self) -> ClosurePolicy {
        ClosurePolicy::ByName
    }
}

/// Ordered chain of engines tried by the serialization wrapper
#[derive(Clone)]
pub struct SerializationConfig {
    engines: Vec<Arc<dyn SerializationEngine>>,
}

impl SerializationConfig {
    /// A chain with only the standard engine, as in an environment without a fallback
    pub fn standard_only() -> Self {
        Self {
            engines: vec![Arc::new(StandardEngine)],
        }
    }

    /// A chain with no engines at all
    pub fn empty() -> Self {
        Self {
            engines: Vec::new(),
        }
    }

    /// Append an engine to the end of the chain
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<dyn SerializationEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    /// Engines in the order they are tried
    pub fn engines(&self) -> &[Arc<dyn SerializationEngine>] {
        &self.engines
    }

    /// Find an engine by the name recorded in a captured state
    pub fn engine(&self, name: &str) -> Option<&Arc<dyn SerializationEngine>> {
        self.engines.iter().find(|engine| engine.name() == name)
    }

    /// Whether the chain contains an engine able to capture closures
    pub fn has_fallback(&self) -> bool {
        self.engines
            .iter()
            .any(|engine| engine.closure_policy() != ClosurePolicy::Reject)
    }
}

impl Default for SerializationConfig {
    fn default() -> Self {
        Self::standard_only().with_engine(Arc::new(ByReferenceEngine))
    }
}

impl fmt::Debug for SerializationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.engines.iter().map(|engine| engine.name()))
            .finish()
    }
}
