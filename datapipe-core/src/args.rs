//! Callables and positional arguments handed to registered operations

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::keyed::KeyedPipe;
use crate::stream::StreamPipe;
use crate::value::Value;

type FuncImpl = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Process-wide table of named callables, used to serialize closures by reference
static FUNCTION_TABLE: LazyLock<RwLock<HashMap<String, Func>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// A shareable callable from one value to another.
///
/// Anonymous callables can never leave the process. Named callables are
/// recorded in a process-wide table, so a serialized pipeline can refer to
/// them by name and a worker running the same binary can resolve them again.
#[derive(Clone)]
pub struct Func {
    name: Option<Arc<str>>,
    inner: Arc<FuncImpl>,
}

impl Func {
    /// Wrap an anonymous closure
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: None,
            inner: Arc::new(f),
        }
    }

    /// Register a closure under a process-wide unique name.
    ///
    /// Registration must happen during initialization, before pipelines
    /// built from the function are serialized or shipped to workers.
    pub fn named<F>(name: &str, f: F) -> Result<Self>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let func = Self {
            name: Some(Arc::from(name)),
            inner: Arc::new(f),
        };

        let mut table = FUNCTION_TABLE.write().unwrap_or_else(PoisonError::into_inner);
        if table.contains_key(name) {
            return Err(Error::DuplicateRegistration(name.to_owned()));
        }
        table.insert(name.to_owned(), func.clone());
        tracing::trace!(function = name, "registered named function");

        Ok(func)
    }

    /// Resolve a previously registered named callable
    pub fn lookup(name: &str) -> Result<Self> {
        FUNCTION_TABLE
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AttributeNotFound {
                type_name: "Func".into(),
                attribute: name.to_owned(),
            })
    }

    /// Name under which this callable was registered, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke the callable
    pub fn call(&self, value: Value) -> Result<Value> {
        (self.inner)(value)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Func({name})"),
            None => f.write_str("Func(<closure>)"),
        }
    }
}

/// A single positional argument
#[derive(Debug, Clone)]
pub enum Arg {
    /// Plain data
    Value(Value),
    /// Callable
    Func(Func),
    /// Upstream stream pipe
    Stream(StreamPipe),
    /// Upstream keyed pipe
    Keyed(KeyedPipe),
}

impl Arg {
    fn kind(&self) -> &'static str {
        match self {
            Arg::Value(_) => "value",
            Arg::Func(_) => "function",
            Arg::Stream(_) => "stream pipe",
            Arg::Keyed(_) => "keyed pipe",
        }
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<Func> for Arg {
    fn from(v: Func) -> Self {
        Arg::Func(v)
    }
}

impl From<StreamPipe> for Arg {
    fn from(v: StreamPipe) -> Self {
        Arg::Stream(v)
    }
}

impl From<KeyedPipe> for Arg {
    fn from(v: KeyedPipe) -> Self {
        Arg::Keyed(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Value(Value::Int(v))
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Value(Value::Bool(v))
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Value(Value::from(v))
    }
}

/// Ordered positional arguments of an operation call
#[derive(Debug, Clone, Default)]
pub struct Args {
    items: Vec<Arg>,
}

impl Args {
    /// Create an empty argument list
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append an argument
    #[must_use]
    pub fn with(mut self, arg: impl Into<Arg>) -> Self {
        self.items.push(arg.into());
        self
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if there are no arguments
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get an argument by position
    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.items.get(index)
    }

    /// All arguments
    pub fn iter(&self) -> std::slice::Iter<'_, Arg> {
        self.items.iter()
    }

    fn require(&self, index: usize) -> Result<&Arg> {
        self.items.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "missing argument {index} (got {} arguments)",
                self.items.len()
            ))
        })
    }

    fn mismatch(index: usize, expected: &str, got: &Arg) -> Error {
        Error::InvalidArgument(format!(
            "argument {index} must be a {expected}, got a {}",
            got.kind()
        ))
    }

    /// Get a plain value argument
    pub fn value(&self, index: usize) -> Result<&Value> {
        match self.require(index)? {
            Arg::Value(v) => Ok(v),
            other => Err(Self::mismatch(index, "value", other)),
        }
    }

    /// Get a callable argument
    pub fn func(&self, index: usize) -> Result<&Func> {
        match self.require(index)? {
            Arg::Func(f) => Ok(f),
            other => Err(Self::mismatch(index, "function", other)),
        }
    }

    /// Get a stream pipe argument
    pub fn stream(&self, index: usize) -> Result<&StreamPipe> {
        match self.require(index)? {
            Arg::Stream(p) => Ok(p),
            other => Err(Self::mismatch(index, "stream pipe", other)),
        }
    }

    /// Get a keyed pipe argument
    pub fn keyed(&self, index: usize) -> Result<&KeyedPipe> {
        match self.require(index)? {
            Arg::Keyed(p) => Ok(p),
            other => Err(Self::mismatch(index, "keyed pipe", other)),
        }
    }

    /// Get a non-negative integer argument
    pub fn usize(&self, index: usize) -> Result<usize> {
        let value = self.value(index)?.as_int()?;
        usize::try_from(value).map_err(|_| {
            Error::InvalidArgument(format!("argument {index} must be non-negative, got {value}"))
        })
    }

    /// Get an optional boolean argument, falling back to `default` when absent
    pub fn bool_or(&self, index: usize, default: bool) -> Result<bool> {
        match self.items.get(index) {
            None => Ok(default),
            Some(_) => self.value(index)?.as_bool(),
        }
    }
}

impl FromIterator<Arg> for Args {
    fn from_iter<I: IntoIterator<Item = Arg>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Args {
    type Item = Arg;
    type IntoIter = std::vec::IntoIter<Arg>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = &'a Arg;
    type IntoIter = std::slice::Iter<'a, Arg>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
