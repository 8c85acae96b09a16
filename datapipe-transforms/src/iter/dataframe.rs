//! Marker stage for dataframe-traced pipes

use datapipe_core::serialization::StageState;
use datapipe_core::{Args, ItemIter, Result, StreamPipe, StreamStage};

/// Passes items through unchanged and marks the pipe as dataframe-capable.
///
/// Registered as `trace_as_dataframe`. Operations registered with
/// dataframe tracing, or invoked on a pipe downstream of this stage, have
/// their results wrapped in another tracer.
#[derive(Debug, Clone)]
pub struct DataFrameTracer {
    source: StreamPipe,
}

impl DataFrameTracer {
    /// Catalog kind
    pub const KIND: &'static str = "iter.DataFrameTracer";

    /// Trace `source`
    pub fn new(source: StreamPipe) -> Self {
        Self { source }
    }

    pub(crate) fn decode(args: &Args) -> Result<Self> {
        Ok(Self::new(args.stream(0)?.clone()))
    }
}

impl StreamStage for DataFrameTracer {
    fn open(&mut self) -> Result<ItemIter> {
        Ok(Box::new(self.source.iter()?))
    }

    fn length(&self) -> Result<usize> {
        self.source.length()
    }

    fn is_dataframe(&self) -> bool {
        true
    }

    fn state(&self) -> Result<StageState> {
        Ok(StageState::new(
            Self::KIND,
            Args::new().with(self.source.clone()),
        ))
    }
}
