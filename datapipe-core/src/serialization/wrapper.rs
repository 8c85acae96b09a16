//! A pipe wrapper that can always be shipped to another process

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::keyed::{KeyedPipe, KeyedStage};
use crate::serialization::engine::SerializationConfig;
use crate::serialization::snapshot::Capture;
use crate::stream::{ItemIter, StreamPipe, StreamStage};
use crate::value::{Key, Value};

/// Type name reported by the wrapper in place of the wrapped pipe
pub const WRAPPER_NAME: &str = "SerializationWrapper";

/// Serialized form of a wrapped pipe: the engine that produced it and its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedState {
    /// Name of the engine that succeeded
    pub engine: String,
    /// Engine-specific bytes
    pub payload: Vec<u8>,
}

impl CapturedState {
    /// Encode for transport
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from transport
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Wraps one pipe so it can be serialized even when it holds closures.
///
/// Capturing tries each engine of the configured chain in order and records
/// the first that succeeds. If all fail, the first engine's failure is
/// reported.
#[derive(Debug, Clone)]
pub struct SerializationWrapper<P> {
    inner: P,
    config: SerializationConfig,
}

impl<P: Capture> SerializationWrapper<P> {
    /// Wrap a pipe using the default engine chain
    pub fn new(inner: P) -> Self {
        Self::with_config(inner, SerializationConfig::default())
    }

    /// Wrap a pipe using a specific engine chain
    pub fn with_config(inner: P, config: SerializationConfig) -> Self {
        Self { inner, config }
    }

    /// The wrapped pipe
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Unwrap
    pub fn into_inner(self) -> P {
        self.inner
    }

    /// The engine chain
    pub fn config(&self) -> &SerializationConfig {
        &self.config
    }

    /// Serialize the wrapped pipe with the first engine that can
    pub fn capture_state(&self) -> Result<CapturedState> {
        let mut first_failure: Option<(String, Error)> = None;

        for engine in self.config.engines() {
            let attempt = self
                .inner
                .capture(engine.closure_policy())
                .and_then(|snapshot| engine.encode(&snapshot));

            match attempt {
                Ok(payload) => {
                    if let Some((failed, _)) = &first_failure {
                        tracing::debug!(failed = %failed, engine = engine.name(), "serialization fell back");
                    }
                    return Ok(CapturedState {
                        engine: engine.name().to_owned(),
                        payload,
                    });
                }
                Err(err) => {
                    tracing::debug!(engine = engine.name(), error = %err, "serialization engine failed");
                    if first_failure.is_none() {
                        first_failure = Some((engine.name().to_owned(), err));
                    }
                }
            }
        }

        let (engine, source) = first_failure.unwrap_or_else(|| {
            (
                String::from("<none>"),
                Error::Unserializable("pipe: no serialization engine configured".into()),
            )
        });
        tracing::warn!(engine = %engine, error = %source, "no serialization engine could capture the pipe");
        Err(Error::SerializationFailure {
            engine,
            source: Box::new(source),
        })
    }

    /// Rebuild a wrapper from a captured state using the default engine chain
    pub fn restore(captured: &CapturedState) -> Result<Self> {
        Self::restore_with_config(captured, SerializationConfig::default())
    }

    /// Rebuild a wrapper, dispatching to the engine named in `captured`
    pub fn restore_with_config(captured: &CapturedState, config: SerializationConfig) -> Result<Self> {
        let failure = |source: Error| Error::SerializationFailure {
            engine: captured.engine.clone(),
            source: Box::new(source),
        };

        let engine = config.engine(&captured.engine).ok_or_else(|| {
            failure(Error::Unserializable(format!(
                "payload: engine '{}' is not available",
                captured.engine
            )))
        })?;
        let snapshot = engine.decode(&captured.payload).map_err(failure)?;
        let inner = P::rebuild(snapshot).map_err(failure)?;

        Ok(Self { inner, config })
    }

    /// Length of the wrapped pipe; any failure is reported against the wrapper
    pub fn length(&self) -> Result<usize> {
        self.inner
            .length()
            .map_err(|_| Error::UndefinedLength(WRAPPER_NAME.to_owned()))
    }
}

impl StreamStage for SerializationWrapper<StreamPipe> {
    fn open(&mut self) -> Result<ItemIter> {
        Ok(Box::new(self.inner.iter()?))
    }

    fn length(&self) -> Result<usize> {
        SerializationWrapper::length(self)
    }

    fn type_name(&self) -> &'static str {
        WRAPPER_NAME
    }
}

impl KeyedStage for SerializationWrapper<KeyedPipe> {
    fn get(&self, key: &Key) -> Result<Value> {
        self.inner.get(key.clone())
    }

    fn length(&self) -> Result<usize> {
        SerializationWrapper::length(self)
    }

    fn type_name(&self) -> &'static str {
        WRAPPER_NAME
    }
}
