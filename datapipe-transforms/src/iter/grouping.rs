//! Grouping of consecutive items into chunks

use std::sync::{Arc, Mutex, PoisonError};

use datapipe_core::serialization::StageState;
use datapipe_core::{
    Args, Chunk, Error, ItemIter, PipeIter, Result, StreamPipe, StreamStage, Value,
};

/// Groups consecutive upstream items into [`Chunk`]s of `batch_size`.
///
/// Registered as `batch`. Items read before an upstream error stay in the
/// carry buffer and open the next chunk of the same traversal; `reset`
/// discards them so a new traversal starts empty.
#[derive(Debug, Clone)]
pub struct Batcher {
    source: StreamPipe,
    batch_size: usize,
    drop_last: bool,
    carry: Arc<Mutex<Vec<Value>>>,
}

impl Batcher {
    /// Catalog kind
    pub const KIND: &'static str = "iter.Batcher";

    /// Batch `source` into chunks of `batch_size`, optionally dropping a short tail
    pub fn new(source: StreamPipe, batch_size: usize, drop_last: bool) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidArgument(
                "batch_size must be greater than zero".into(),
            ));
        }
        Ok(Self {
            source,
            batch_size,
            drop_last,
            carry: Arc::new(Mutex::new(Vec::with_capacity(batch_size))),
        })
    }

    pub(crate) fn decode(args: &Args) -> Result<Self> {
        Self::new(args.stream(0)?.clone(), args.usize(1)?, args.bool_or(2, false)?)
    }

    /// Number of items held over from an interrupted chunk
    pub fn pending(&self) -> usize {
        self.carry.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl StreamStage for Batcher {
    fn open(&mut self) -> Result<ItemIter> {
        Ok(Box::new(BatchIter {
            upstream: self.source.iter()?,
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            carry: Arc::clone(&self.carry),
        }))
    }

    fn reset(&mut self) {
        let mut carry = self.carry.lock().unwrap_or_else(PoisonError::into_inner);
        if !carry.is_empty() {
            tracing::debug!(discarded = carry.len(), "batcher reset dropped pending items");
            carry.clear();
        }
    }

    fn length(&self) -> Result<usize> {
        let items = self.source.length()?;
        Ok(if self.drop_last {
            items / self.batch_size
        } else {
            items.div_ceil(self.batch_size)
        })
    }

    fn state(&self) -> Result<StageState> {
        let batch_size = i64::try_from(self.batch_size)
            .map_err(|_| Error::InvalidArgument(format!("batch_size {}", self.batch_size)))?;
        Ok(StageState::new(
            Self::KIND,
            Args::new()
                .with(self.source.clone())
                .with(batch_size)
                .with(self.drop_last),
        ))
    }
}

struct BatchIter {
    upstream: PipeIter,
    batch_size: usize,
    drop_last: bool,
    carry: Arc<Mutex<Vec<Value>>>,
}

impl Iterator for BatchIter {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut carry = self.carry.lock().unwrap_or_else(PoisonError::into_inner);
        while carry.len() < self.batch_size {
            match self.upstream.next() {
                Some(Ok(value)) => carry.push(value),
                Some(Err(err)) => return Some(Err(err)),
                None => {
                    if carry.is_empty() || self.drop_last {
                        carry.clear();
                        return None;
                    }
                    break;
                }
            }
        }
        let items = std::mem::replace(&mut *carry, Vec::with_capacity(self.batch_size));
        Some(Ok(Value::Chunk(Chunk::new(items))))
    }
}
