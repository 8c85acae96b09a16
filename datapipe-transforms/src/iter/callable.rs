//! Stages that apply a user function to each item

use datapipe_core::serialization::StageState;
use datapipe_core::{Args, Func, ItemIter, Result, StreamPipe, StreamStage};

/// Applies a function to every upstream item.
///
/// Registered as `map`.
#[derive(Debug, Clone)]
pub struct Mapper {
    source: StreamPipe,
    func: Func,
}

impl Mapper {
    /// Catalog kind
    pub const KIND: &'static str = "iter.Mapper";

    /// Map `source` through `func`
    pub fn new(source: StreamPipe, func: Func) -> Self {
        Self { source, func }
    }

    pub(crate) fn decode(args: &Args) -> Result<Self> {
        Ok(Self::new(args.stream(0)?.clone(), args.func(1)?.clone()))
    }
}

impl StreamStage for Mapper {
    fn open(&mut self) -> Result<ItemIter> {
        let func = self.func.clone();
        Ok(Box::new(
            self.source
                .iter()?
                .map(move |item| item.and_then(|value| func.call(value))),
        ))
    }

    fn length(&self) -> Result<usize> {
        self.source.length()
    }

    fn state(&self) -> Result<StageState> {
        Ok(StageState::new(
            Self::KIND,
            Args::new().with(self.source.clone()).with(self.func.clone()),
        ))
    }
}

/// Keeps the upstream items for which a predicate returns `true`.
///
/// Registered as `filter`. A predicate result that is not a boolean is
/// reported as an error item and the traversal continues.
#[derive(Debug, Clone)]
pub struct Filter {
    source: StreamPipe,
    predicate: Func,
}

impl Filter {
    /// Catalog kind
    pub const KIND: &'static str = "iter.Filter";

    /// Filter `source` with `predicate`
    pub fn new(source: StreamPipe, predicate: Func) -> Self {
        Self { source, predicate }
    }

    pub(crate) fn decode(args: &Args) -> Result<Self> {
        Ok(Self::new(args.stream(0)?.clone(), args.func(1)?.clone()))
    }
}

impl StreamStage for Filter {
    fn open(&mut self) -> Result<ItemIter> {
        let predicate = self.predicate.clone();
        Ok(Box::new(self.source.iter()?.filter_map(move |item| match item {
            Ok(value) => match predicate.call(value.clone()).and_then(|keep| keep.as_bool()) {
                Ok(true) => Some(Ok(value)),
                Ok(false) => None,
                Err(err) => Some(Err(err)),
            },
            Err(err) => Some(Err(err)),
        })))
    }

    fn state(&self) -> Result<StageState> {
        Ok(StageState::new(
            Self::KIND,
            Args::new()
                .with(self.source.clone())
                .with(self.predicate.clone()),
        ))
    }
}
