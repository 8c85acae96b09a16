//! Iterable-style pipes and the single-active-iterator protocol
//!
//! Every [`StreamPipe`] keeps a generation counter. Each call to
//! [`StreamPipe::iter`] resets the stage and mints a new generation, and each
//! [`PipeIter`] remembers the generation it was created with. An iterator
//! whose generation no longer matches the pipe's fails with
//! [`Error::IteratorInvalidated`] on its next pull, so stages that keep
//! internal buffers never serve two cursors at once.

use std::collections::BTreeSet;
use std::fmt;
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};

use crate::args::Args;
use crate::error::{Error, Result};
use crate::hooks::{PipeHooks, SerializeHook, StateHook, TextHook};
use crate::registry::{short_type_name, BoundMethod, FunctionRegistry, Output};
use crate::serialization::StageState;
use crate::value::Value;

/// Boxed item iterator returned by [`StreamStage::open`]
pub type ItemIter = Box<dyn Iterator<Item = Result<Value>> + Send>;

/// Name of the operation that marks a stream pipe for dataframe tracing
pub const TRACE_AS_DATAFRAME: &str = "trace_as_dataframe";

/// Operations whose results are never wrapped for dataframe tracing by default
pub const DEFAULT_UNTRACEABLE: [&str; 4] = [
    // returns chunks
    "batch",
    // returns chunks
    "groupby",
    // unpacks dataframes
    "dataframes_as_tuples",
    TRACE_AS_DATAFRAME,
];

static STREAM_REGISTRY: LazyLock<FunctionRegistry<StreamPipe>> =
    LazyLock::new(|| FunctionRegistry::new("StreamPipe"));

static STREAM_HOOKS: PipeHooks<StreamPipe> = PipeHooks::new();

static UNTRACEABLE: LazyLock<RwLock<BTreeSet<String>>> = LazyLock::new(|| {
    RwLock::new(DEFAULT_UNTRACEABLE.iter().map(|s| (*s).to_owned()).collect())
});

/// Add `name` to the set of operations exempt from dataframe tracing
pub fn exempt_from_dataframe_tracing(name: &str) {
    UNTRACEABLE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_owned());
}

/// Check whether results of `name` skip dataframe tracing
pub fn is_exempt_from_dataframe_tracing(name: &str) -> bool {
    UNTRACEABLE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(name)
}

/// A lazily evaluated producer of items.
///
/// Implementors hold their upstream pipes and parameters; [`StreamStage::open`]
/// builds a fresh iterator over the stage's output.
pub trait StreamStage: Send + 'static {
    /// Create an iterator over this stage's items
    fn open(&mut self) -> Result<ItemIter>;

    /// Clear buffers and cursors before a new traversal
    fn reset(&mut self) {}

    /// Number of items, if well defined
    fn length(&self) -> Result<usize> {
        Err(Error::UndefinedLength(self.type_name().to_owned()))
    }

    /// Whether this stage produces dataframe-traced output
    fn is_dataframe(&self) -> bool {
        false
    }

    /// Concrete type name used for display and errors
    fn type_name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Constructor kind and arguments needed to rebuild this stage
    fn state(&self) -> Result<StageState> {
        Err(Error::Unserializable(format!("stage {}", self.type_name())))
    }
}

struct StreamNode {
    stage: Mutex<Box<dyn StreamStage>>,
    type_name: &'static str,
    is_dataframe: bool,
    generation: AtomicU64,
    restored: AtomicBool,
}

/// Shared handle to a stream stage
#[derive(Clone)]
pub struct StreamPipe {
    node: Arc<StreamNode>,
}

impl StreamPipe {
    /// Wrap a stage into a pipe handle
    pub fn new<S: StreamStage>(stage: S) -> Self {
        Self::from_boxed(Box::new(stage), 0, false)
    }

    /// Rebuild a pipe from a snapshot; its next iteration reuses `generation`
    pub(crate) fn restored(stage: Box<dyn StreamStage>, generation: u64) -> Self {
        Self::from_boxed(stage, generation, true)
    }

    fn from_boxed(stage: Box<dyn StreamStage>, generation: u64, restored: bool) -> Self {
        let type_name = stage.type_name();
        let is_dataframe = stage.is_dataframe();
        Self {
            node: Arc::new(StreamNode {
                stage: Mutex::new(stage),
                type_name,
                is_dataframe,
                generation: AtomicU64::new(generation),
                restored: AtomicBool::new(restored),
            }),
        }
    }

    /// Request a new iterator, invalidating every iterator issued before.
    ///
    /// The stage is reset exactly once per call, before the first item is
    /// produced. The first call after a restore keeps the restored
    /// generation instead of minting a new one.
    pub fn iter(&self) -> Result<PipeIter> {
        let mut stage = self.node.stage.lock().unwrap_or_else(PoisonError::into_inner);
        stage.reset();

        let generation = if self.node.restored.swap(false, Ordering::SeqCst) {
            let generation = self.node.generation.load(Ordering::SeqCst);
            tracing::debug!(pipe = self.type_name(), generation, "resuming restored pipe");
            generation
        } else {
            let generation = self.node.generation.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(pipe = self.type_name(), generation, "minted iterator generation");
            generation
        };

        let inner = stage.open()?;
        Ok(PipeIter {
            pipe: self.clone(),
            generation,
            inner: Some(inner),
        })
    }

    /// Generation of the most recent iterator, 0 if none was issued
    pub fn generation(&self) -> u64 {
        self.node.generation.load(Ordering::SeqCst)
    }

    /// Whether the next iteration resumes a restored generation
    pub fn is_restored(&self) -> bool {
        self.node.restored.load(Ordering::SeqCst)
    }

    /// Concrete type name of the wrapped stage
    pub fn type_name(&self) -> &'static str {
        self.node.type_name
    }

    /// Whether the wrapped stage is dataframe-capable
    pub fn is_dataframe(&self) -> bool {
        self.node.is_dataframe
    }

    /// Number of items, if the stage defines one
    pub fn length(&self) -> Result<usize> {
        self.node
            .stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .length()
    }

    /// Check whether two handles share the same pipe instance
    pub fn same_instance(&self, other: &StreamPipe) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    pub(crate) fn node_addr(&self) -> *const () {
        Arc::as_ptr(&self.node).cast()
    }

    /// State reported by the stage itself, ignoring the state hook
    pub fn stage_state(&self) -> Result<StageState> {
        self.node
            .stage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state()
    }

    /// State to serialize, honoring the state hook
    pub fn state(&self) -> Result<StageState> {
        match STREAM_HOOKS.state.get() {
            Some(hook) => hook(self),
            None => self.stage_state(),
        }
    }

    /// Resolve a registered operation bound to this pipe
    pub fn method(&self, name: &str) -> Result<BoundMethod<StreamPipe>> {
        STREAM_REGISTRY
            .lookup(name)
            .map(|factory| BoundMethod::new(self.clone(), name, factory))
            .ok_or_else(|| Error::AttributeNotFound {
                type_name: self.type_name().to_owned(),
                attribute: name.to_owned(),
            })
    }

    /// Invoke a registered operation with this pipe as receiver
    pub fn call(&self, name: &str, args: Args) -> Result<Output> {
        self.method(name)?.invoke(args)
    }

    /// Invoke a registered operation expected to return a stream pipe
    pub fn apply(&self, name: &str, args: Args) -> Result<StreamPipe> {
        self.call(name, args)?.into_stream()
    }

    /// Register a plain function as an operation on every stream pipe
    pub fn register_function<F>(name: &str, function: F) -> Result<()>
    where
        F: Fn(&StreamPipe, Args) -> Result<Output> + Send + Sync + 'static,
    {
        STREAM_REGISTRY.register(name, function)
    }

    /// Register a stage constructor as an operation on every stream pipe.
    ///
    /// Calling `pipe.call(name, args)` builds `ctor(pipe, args)`. When the
    /// result is a stream pipe, and either `tracing_enabled` is set or the
    /// receiver is dataframe-capable, the result is passed through
    /// [`TRACE_AS_DATAFRAME`] unless `name` is exempt.
    pub fn register_as_method<F, R>(name: &str, ctor: F, tracing_enabled: bool) -> Result<()>
    where
        F: Fn(StreamPipe, Args) -> Result<R> + Send + Sync + 'static,
        R: Into<Output>,
    {
        let operation = name.to_owned();
        STREAM_REGISTRY.register(name, move |source: &StreamPipe, args| {
            let output: Output = ctor(source.clone(), args)?.into();
            match output {
                Output::Stream(result)
                    if (tracing_enabled || source.is_dataframe())
                        && !is_exempt_from_dataframe_tracing(&operation) =>
                {
                    result.call(TRACE_AS_DATAFRAME, Args::new())
                }
                other => Ok(other),
            }
        })
    }

    /// Check whether `name` is a registered stream operation
    pub fn is_registered(name: &str) -> bool {
        STREAM_REGISTRY.contains(name)
    }

    /// Registered stream operation names in sorted order
    pub fn registered_names() -> Vec<String> {
        STREAM_REGISTRY.names()
    }

    /// Install or clear the state hook
    pub fn set_state_hook(hook: Option<StateHook<StreamPipe>>) -> Result<()> {
        STREAM_HOOKS.state.install(hook)
    }

    /// Install or clear the serialize hook
    pub fn set_serialize_hook(hook: Option<SerializeHook<StreamPipe>>) -> Result<()> {
        STREAM_HOOKS.serialize.install(hook)
    }

    /// Install or clear the `Display` hook
    pub fn set_str_hook(hook: Option<TextHook<StreamPipe>>) -> Result<()> {
        STREAM_HOOKS.string.install(hook)
    }

    /// Install or clear the `Debug` hook
    pub fn set_repr_hook(hook: Option<TextHook<StreamPipe>>) -> Result<()> {
        STREAM_HOOKS.repr.install(hook)
    }

    pub(crate) fn serialize_hook() -> Option<SerializeHook<StreamPipe>> {
        STREAM_HOOKS.serialize.get()
    }
}

impl fmt::Display for StreamPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match STREAM_HOOKS.string.get() {
            Some(hook) => f.write_str(&hook(self)),
            None => f.write_str(self.type_name()),
        }
    }
}

impl fmt::Debug for StreamPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match STREAM_HOOKS.repr.get() {
            Some(hook) => f.write_str(&hook(self)),
            None => f.write_str(self.type_name()),
        }
    }
}

/// Iterator over a stream pipe, valid until the pipe issues a newer one
pub struct PipeIter {
    pipe: StreamPipe,
    generation: u64,
    inner: Option<ItemIter>,
}

impl PipeIter {
    /// Generation this iterator was issued under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this iterator is still the pipe's active one
    pub fn is_valid(&self) -> bool {
        self.pipe.generation() == self.generation
    }
}

impl Iterator for PipeIter {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.as_mut()?;

        if self.pipe.generation() != self.generation {
            self.inner = None;
            tracing::debug!(
                pipe = self.pipe.type_name(),
                stale = self.generation,
                current = self.pipe.generation(),
                "pull from invalidated iterator"
            );
            return Some(Err(Error::IteratorInvalidated(format!("{:?}", self.pipe))));
        }

        let item = inner.next();
        if item.is_none() {
            self.inner = None;
        }
        item
    }
}

impl FusedIterator for PipeIter {}

impl fmt::Debug for PipeIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeIter")
            .field("pipe", &self.pipe)
            .field("generation", &self.generation)
            .field("exhausted", &self.inner.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Once;

    /// Yields `0..n` and counts how often it was reset
    struct Counter {
        n: i64,
        resets: Arc<AtomicUsize>,
    }

    impl Counter {
        fn pipe(n: i64) -> (StreamPipe, Arc<AtomicUsize>) {
            let resets = Arc::new(AtomicUsize::new(0));
            let pipe = StreamPipe::new(Counter {
                n,
                resets: resets.clone(),
            });
            (pipe, resets)
        }
    }

    impl StreamStage for Counter {
        fn open(&mut self) -> Result<ItemIter> {
            Ok(Box::new((0..self.n).map(|i| Ok(Value::Int(i)))))
        }

        fn reset(&mut self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn length(&self) -> Result<usize> {
            Ok(usize::try_from(self.n).unwrap_or(0))
        }
    }

    /// Passes items through from upstream
    struct Passthrough {
        source: StreamPipe,
    }

    impl StreamStage for Passthrough {
        fn open(&mut self) -> Result<ItemIter> {
            Ok(Box::new(self.source.iter()?))
        }
    }

    /// Marks its upstream as dataframe-traced
    struct Traced {
        source: StreamPipe,
    }

    impl StreamStage for Traced {
        fn open(&mut self) -> Result<ItemIter> {
            Ok(Box::new(self.source.iter()?))
        }

        fn is_dataframe(&self) -> bool {
            true
        }
    }

    /// Only exists so the string hook test can target it
    struct HookProbe;

    impl StreamStage for HookProbe {
        fn open(&mut self) -> Result<ItemIter> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    fn install_tracer() {
        static INSTALL: Once = Once::new();
        INSTALL.call_once(|| {
            StreamPipe::register_as_method(
                TRACE_AS_DATAFRAME,
                |source, _| Ok(StreamPipe::new(Traced { source })),
                false,
            )
            .unwrap();
        });
    }

    fn collect(iter: PipeIter) -> Vec<i64> {
        iter.map(|item| item.unwrap().as_int().unwrap()).collect()
    }

    #[test]
    fn test_iteration_yields_in_order() {
        let (pipe, _) = Counter::pipe(4);
        assert_eq!(collect(pipe.iter().unwrap()), vec![0, 1, 2, 3]);
        assert_eq!(pipe.length().unwrap(), 4);
    }

    #[test]
    fn test_second_iterator_invalidates_first() {
        let (pipe, _) = Counter::pipe(5);

        let mut first = pipe.iter().unwrap();
        assert_eq!(first.next().unwrap().unwrap(), Value::Int(0));

        let mut second = pipe.iter().unwrap();
        assert_eq!(second.next().unwrap().unwrap(), Value::Int(0));

        assert!(!first.is_valid());
        assert!(matches!(first.next(), Some(Err(Error::IteratorInvalidated(_)))));
        // fused after the failure
        assert!(first.next().is_none());

        assert_eq!(collect(second), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_newest_iterator_poisons_all_older_ones() {
        let (pipe, _) = Counter::pipe(3);

        let mut first = pipe.iter().unwrap();
        let mut second = pipe.iter().unwrap();
        let third = pipe.iter().unwrap();

        assert!(matches!(first.next(), Some(Err(Error::IteratorInvalidated(_)))));
        assert!(matches!(second.next(), Some(Err(Error::IteratorInvalidated(_)))));
        assert_eq!(collect(third), vec![0, 1, 2]);
    }

    #[test]
    fn test_generation_increases_per_request() {
        let (pipe, _) = Counter::pipe(1);
        assert_eq!(pipe.generation(), 0);

        let first = pipe.iter().unwrap();
        let second = pipe.iter().unwrap();

        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        assert_eq!(pipe.generation(), 2);
    }

    #[test]
    fn test_reset_runs_once_per_request_before_first_item() {
        let (pipe, resets) = Counter::pipe(2);
        assert_eq!(resets.load(Ordering::SeqCst), 0);

        let iter = pipe.iter().unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 1);
        assert_eq!(collect(iter), vec![0, 1]);
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        let _ = pipe.iter().unwrap();
        let _ = pipe.iter().unwrap();
        assert_eq!(resets.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_restored_pipe_resumes_without_minting() {
        let resets = Arc::new(AtomicUsize::new(0));
        let pipe = StreamPipe::restored(
            Box::new(Counter {
                n: 3,
                resets: resets.clone(),
            }),
            7,
        );
        assert!(pipe.is_restored());

        let mut first = pipe.iter().unwrap();
        assert_eq!(first.generation(), 7);
        assert!(!pipe.is_restored());
        assert_eq!(first.next().unwrap().unwrap(), Value::Int(0));
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        let second = pipe.iter().unwrap();
        assert_eq!(second.generation(), 8);
        assert!(matches!(first.next(), Some(Err(Error::IteratorInvalidated(_)))));
        assert_eq!(collect(second), vec![0, 1, 2]);
    }

    #[test]
    fn test_upstream_iterators_are_independent_instances() {
        let (source, _) = Counter::pipe(3);
        let stage = StreamPipe::new(Passthrough {
            source: source.clone(),
        });

        assert!(source.same_instance(&source.clone()));
        assert!(!source.same_instance(&stage));

        let iter = stage.iter().unwrap();
        assert_eq!(source.generation(), 1);
        assert_eq!(collect(iter), vec![0, 1, 2]);

        // iterating the source directly supersedes the downstream traversal
        let mut downstream = stage.iter().unwrap();
        let _direct = source.iter().unwrap();
        assert!(matches!(downstream.next(), Some(Err(Error::IteratorInvalidated(_)))));
    }

    #[test]
    fn test_default_length_is_undefined() {
        let pipe = StreamPipe::new(HookProbe);
        let err = pipe.length().unwrap_err();
        assert!(matches!(err, Error::UndefinedLength(ref name) if name == "HookProbe"));
    }

    #[test]
    fn test_default_text_is_type_name() {
        let (pipe, _) = Counter::pipe(1);
        assert_eq!(pipe.to_string(), "Counter");
        assert_eq!(format!("{pipe:?}"), "Counter");
    }

    #[test]
    fn test_string_hook_single_occupancy() {
        let hook: TextHook<StreamPipe> = Arc::new(|pipe: &StreamPipe| match pipe.type_name() {
            "HookProbe" => "probe via hook".to_owned(),
            other => other.to_owned(),
        });
        StreamPipe::set_str_hook(Some(hook.clone())).unwrap();

        let err = StreamPipe::set_str_hook(Some(hook)).unwrap_err();
        assert!(matches!(err, Error::HookAlreadyInstalled("string")));
        assert_eq!(StreamPipe::new(HookProbe).to_string(), "probe via hook");

        StreamPipe::set_str_hook(None).unwrap();
        assert_eq!(StreamPipe::new(HookProbe).to_string(), "HookProbe");
    }

    #[test]
    fn test_unknown_operation_names_type_and_attribute() {
        let (pipe, _) = Counter::pipe(1);
        let err = pipe.call("stream_tests_nope", Args::new()).unwrap_err();
        match err {
            Error::AttributeNotFound {
                type_name,
                attribute,
            } => {
                assert_eq!(type_name, "Counter");
                assert_eq!(attribute, "stream_tests_nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_register_function_and_call() {
        StreamPipe::register_function("stream_tests_len", |pipe, _| {
            let len = i64::try_from(pipe.length()?).unwrap_or(i64::MAX);
            Ok(Value::Int(len).into())
        })
        .unwrap();

        let (pipe, _) = Counter::pipe(6);
        let out = pipe.call("stream_tests_len", Args::new()).unwrap();
        assert_eq!(out.into_value().unwrap(), Value::Int(6));
        assert!(StreamPipe::is_registered("stream_tests_len"));
        assert!(StreamPipe::registered_names().contains(&"stream_tests_len".to_owned()));

        let err = StreamPipe::register_function("stream_tests_len", |_, _| Ok(Value::Null.into()))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration(_)));
    }

    #[test]
    fn test_register_as_method_builds_stage() {
        StreamPipe::register_as_method(
            "stream_tests_pass",
            |source, _| Ok(StreamPipe::new(Passthrough { source })),
            false,
        )
        .unwrap();

        let (pipe, _) = Counter::pipe(3);
        let passed = pipe.apply("stream_tests_pass", Args::new()).unwrap();
        assert_eq!(passed.type_name(), "Passthrough");
        assert_eq!(collect(passed.iter().unwrap()), vec![0, 1, 2]);
    }

    #[test]
    fn test_tracing_flag_wraps_result() {
        install_tracer();
        StreamPipe::register_as_method(
            "stream_tests_traced",
            |source, _| Ok(StreamPipe::new(Passthrough { source })),
            true,
        )
        .unwrap();

        let (pipe, _) = Counter::pipe(2);
        let traced = pipe.apply("stream_tests_traced", Args::new()).unwrap();
        assert_eq!(traced.type_name(), "Traced");
        assert!(traced.is_dataframe());
        assert_eq!(collect(traced.iter().unwrap()), vec![0, 1]);
    }

    #[test]
    fn test_dataframe_receiver_propagates_tracing() {
        install_tracer();
        StreamPipe::register_as_method(
            "stream_tests_df_pass",
            |source, _| Ok(StreamPipe::new(Passthrough { source })),
            false,
        )
        .unwrap();

        let (pipe, _) = Counter::pipe(2);
        let plain = pipe.apply("stream_tests_df_pass", Args::new()).unwrap();
        assert_eq!(plain.type_name(), "Passthrough");

        let traced_source = StreamPipe::new(Traced { source: pipe });
        let result = traced_source.apply("stream_tests_df_pass", Args::new()).unwrap();
        assert_eq!(result.type_name(), "Traced");
    }

    #[test]
    fn test_exempt_operations_are_not_wrapped() {
        install_tracer();
        exempt_from_dataframe_tracing("stream_tests_exempt");
        assert!(is_exempt_from_dataframe_tracing("stream_tests_exempt"));
        assert!(is_exempt_from_dataframe_tracing("batch"));
        StreamPipe::register_as_method(
            "stream_tests_exempt",
            |source, _| Ok(StreamPipe::new(Passthrough { source })),
            true,
        )
        .unwrap();

        let (pipe, _) = Counter::pipe(1);
        let result = pipe.apply("stream_tests_exempt", Args::new()).unwrap();
        assert_eq!(result.type_name(), "Passthrough");
    }

    #[test]
    fn test_non_stream_results_are_not_wrapped() {
        install_tracer();
        StreamPipe::register_as_method(
            "stream_tests_count",
            |source, _| {
                let count = source.iter()?.count();
                Ok(Value::Int(i64::try_from(count).unwrap_or(i64::MAX)))
            },
            true,
        )
        .unwrap();

        let (pipe, _) = Counter::pipe(4);
        let out = pipe.call("stream_tests_count", Args::new()).unwrap();
        assert_eq!(out.into_value().unwrap(), Value::Int(4));
    }
}
