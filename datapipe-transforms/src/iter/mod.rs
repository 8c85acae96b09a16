//! Stream stages: an in-memory source plus `map`, `filter`, `batch` and
//! `trace_as_dataframe`

mod callable;
mod dataframe;
mod grouping;
mod source;

pub use callable::{Filter, Mapper};
pub use dataframe::DataFrameTracer;
pub use grouping::Batcher;
pub use source::IterableWrapper;

use datapipe_core::serialization::register_stream_stage;
use datapipe_core::stream::TRACE_AS_DATAFRAME;
use datapipe_core::{Result, StreamPipe};

pub(crate) fn register() -> Result<()> {
    StreamPipe::register_as_method(
        "map",
        |source, args| Ok(StreamPipe::new(Mapper::new(source, args.func(0)?.clone()))),
        false,
    )?;
    StreamPipe::register_as_method(
        "filter",
        |source, args| Ok(StreamPipe::new(Filter::new(source, args.func(0)?.clone()))),
        false,
    )?;
    StreamPipe::register_as_method(
        "batch",
        |source, args| {
            let batcher = Batcher::new(source, args.usize(0)?, args.bool_or(1, false)?)?;
            Ok(StreamPipe::new(batcher))
        },
        false,
    )?;
    StreamPipe::register_as_method(
        TRACE_AS_DATAFRAME,
        |source, _| Ok(StreamPipe::new(DataFrameTracer::new(source))),
        false,
    )?;

    register_stream_stage(IterableWrapper::KIND, |args| {
        Ok(Box::new(IterableWrapper::decode(&args)?))
    })?;
    register_stream_stage(Mapper::KIND, |args| Ok(Box::new(Mapper::decode(&args)?)))?;
    register_stream_stage(Filter::KIND, |args| Ok(Box::new(Filter::decode(&args)?)))?;
    register_stream_stage(Batcher::KIND, |args| Ok(Box::new(Batcher::decode(&args)?)))?;
    register_stream_stage(DataFrameTracer::KIND, |args| {
        Ok(Box::new(DataFrameTracer::decode(&args)?))
    })?;

    Ok(())
}
