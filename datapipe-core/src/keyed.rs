//! Map-style pipes indexed by hashable keys

use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::args::Args;
use crate::error::{Error, Result};
use crate::hooks::{PipeHooks, SerializeHook, StateHook, TextHook};
use crate::registry::{short_type_name, BoundMethod, FunctionRegistry, Output};
use crate::serialization::StageState;
use crate::value::{Key, Value};

static KEYED_REGISTRY: LazyLock<FunctionRegistry<KeyedPipe>> =
    LazyLock::new(|| FunctionRegistry::new("KeyedPipe"));

static KEYED_HOOKS: PipeHooks<KeyedPipe> = PipeHooks::new();

/// A random-access collection of items.
///
/// Lookups carry no cursor state, so any number of callers may request keys
/// in any order.
pub trait KeyedStage: Send + Sync + 'static {
    /// Fetch the item stored under `key`
    fn get(&self, key: &Key) -> Result<Value>;

    /// Number of items, if well defined
    fn length(&self) -> Result<usize> {
        Err(Error::UndefinedLength(self.type_name().to_owned()))
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

/// Shared handle to a keyed stage
#[derive(Clone)]
pub struct KeyedPipe {
    stage: Arc<dyn KeyedStage>,
}

impl KeyedPipe {
    /// Wrap a stage into a pipe handle
    pub fn new<S: KeyedStage>(stage: S) -> Self {
        Self {
            stage: Arc::new(stage),
        }
    }

    pub(crate) fn from_boxed(stage: Box<dyn KeyedStage>) -> Self {
        Self {
            stage: Arc::from(stage),
        }
    }

    /// Fetch the item stored under `key`
    pub fn get(&self, key: impl Into<Key>) -> Result<Value> {
        self.stage.get(&key.into())
    }

    /// Number of items, if the stage defines one
    pub fn length(&self) -> Result<usize> {
        self.stage.length()
    }

    /// Concrete type name of the wrapped stage
    pub fn type_name(&self) -> &'static str {
        self.stage.type_name()
    }

    /// Check whether two handles share the same pipe instance
    pub fn same_instance(&self, other: &KeyedPipe) -> bool {
        Arc::ptr_eq(&self.stage, &other.stage)
    }

    pub(crate) fn node_addr(&self) -> *const () {
        Arc::as_ptr(&self.stage).cast()
    }

    /// State reported by the stage itself, ignoring the state hook
    pub fn stage_state(&self) -> Result<StageState> {
        self.stage.state()
    }

    /// State to serialize, honoring the state hook
    pub fn state(&self) -> Result<StageState> {
        match KEYED_HOOKS.state.get() {
            Some(hook) => hook(self),
            None => self.stage_state(),
        }
    }

    /// Resolve a registered operation bound to this pipe
    pub fn method(&self, name: &str) -> Result<BoundMethod<KeyedPipe>> {
        KEYED_REGISTRY
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

    /// Invoke a registered operation expected to return a keyed pipe
    pub fn apply(&self, name: &str, args: Args) -> Result<KeyedPipe> {
        self.call(name, args)?.into_keyed()
    }

    /// Register a plain function as an operation on every keyed pipe
    pub fn register_function<F>(name: &str, function: F) -> Result<()>
    where
        F: Fn(&KeyedPipe, Args) -> Result<Output> + Send + Sync + 'static,
    {
        KEYED_REGISTRY.register(name, function)
    }

    /// Register a stage constructor as an operation on every keyed pipe
    pub fn register_as_method<F, R>(name: &str, ctor: F) -> Result<()>
    where
        F: Fn(KeyedPipe, Args) -> Result<R> + Send + Sync + 'static,
        R: Into<Output>,
    {
        KEYED_REGISTRY.register(name, move |source: &KeyedPipe, args| {
            ctor(source.clone(), args).map(Into::into)
        })
    }

    /// Check whether `name` is a registered keyed operation
    pub fn is_registered(name: &str) -> bool {
        KEYED_REGISTRY.contains(name)
    }

    /// Registered keyed operation names in sorted order
    pub fn registered_names() -> Vec<String> {
        KEYED_REGISTRY.names()
    }

    /// Install or clear the state hook
    pub fn set_state_hook(hook: Option<StateHook<KeyedPipe>>) -> Result<()> {
        KEYED_HOOKS.state.install(hook)
    }

    /// Install or clear the serialize hook
    pub fn set_serialize_hook(hook: Option<SerializeHook<KeyedPipe>>) -> Result<()> {
        KEYED_HOOKS.serialize.install(hook)
    }

    /// Install or clear the `Display` hook
    pub fn set_str_hook(hook: Option<TextHook<KeyedPipe>>) -> Result<()> {
        KEYED_HOOKS.string.install(hook)
    }

    /// Install or clear the `Debug` hook
    pub fn set_repr_hook(hook: Option<TextHook<KeyedPipe>>) -> Result<()> {
        KEYED_HOOKS.repr.install(hook)
    }

    pub(crate) fn serialize_hook() -> Option<SerializeHook<KeyedPipe>> {
        KEYED_HOOKS.serialize.get()
    }
}

impl fmt::Display for KeyedPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KEYED_HOOKS.string.get() {
            Some(hook) => f.write_str(&hook(self)),
            None => f.write_str(self.type_name()),
        }
    }
}

impl fmt::Debug for KeyedPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KEYED_HOOKS.repr.get() {
            Some(hook) => f.write_str(&hook(self)),
            None => f.write_str(self.type_name()),
        }
    }
}
