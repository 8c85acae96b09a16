//! In-memory stream source

use datapipe_core::serialization::StageState;
use datapipe_core::{Args, Error, ItemIter, Result, StreamPipe, StreamStage, Value};

/// Yields the items of an in-memory sequence, from the start on every traversal
#[derive(Debug, Clone, Default)]
pub struct IterableWrapper {
    items: Vec<Value>,
}

impl IterableWrapper {
    /// Catalog kind
    pub const KIND: &'static str = "iter.IterableWrapper";

    /// Create a source over `items`
    pub fn new(items: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a source and wrap it into a pipe handle
    pub fn pipe(items: impl IntoIterator<Item = impl Into<Value>>) -> StreamPipe {
        StreamPipe::new(Self::new(items))
    }

    pub(crate) fn decode(args: &Args) -> Result<Self> {
        match args.value(0)? {
            Value::List(items) => Ok(Self {
                items: items.clone(),
            }),
            other => Err(Error::TypeMismatch(format!(
                "{}: expected list, got {}",
                Self::KIND,
                other.kind()
            ))),
        }
    }
}

impl StreamStage for IterableWrapper {
    fn open(&mut self) -> Result<ItemIter> {
        Ok(Box::new(self.items.clone().into_iter().map(Ok)))
    }

    fn length(&self) -> Result<usize> {
        Ok(self.items.len())
    }

    fn state(&self) -> Result<StageState> {
        Ok(StageState::new(
            Self::KIND,
            Args::new().with(Value::List(self.items.clone())),
        ))
    }
}
