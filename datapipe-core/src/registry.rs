//! Variant-wide tables mapping operation names to factories

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::args::Args;
use crate::error::{Error, Result};
use crate::keyed::KeyedPipe;
use crate::stream::StreamPipe;
use crate::value::Value;

/// A registered operation: receives the receiver pipe and the call arguments
pub type Factory<P> = Arc<dyn Fn(&P, Args) -> Result<Output> + Send + Sync>;

/// Result of invoking a registered operation
#[derive(Debug, Clone)]
pub enum Output {
    /// A new stream pipe
    Stream(StreamPipe),
    /// A new keyed pipe
    Keyed(KeyedPipe),
    /// A plain value
    Value(Value),
}

impl Output {
    /// Unwrap a stream pipe result
    pub fn into_stream(self) -> Result<StreamPipe> {
        match self {
            Output::Stream(p) => Ok(p),
            other => Err(Error::TypeMismatch(format!(
                "expected a stream pipe, got {}",
                other.describe()
            ))),
        }
    }

    /// Unwrap a keyed pipe result
    pub fn into_keyed(self) -> Result<KeyedPipe> {
        match self {
            Output::Keyed(p) => Ok(p),
            other => Err(Error::TypeMismatch(format!(
                "expected a keyed pipe, got {}",
                other.describe()
            ))),
        }
    }

    /// Unwrap a plain value result
    pub fn into_value(self) -> Result<Value> {
        match self {
            Output::Value(v) => Ok(v),
            other => Err(Error::TypeMismatch(format!(
                "expected a value, got {}",
                other.describe()
            ))),
        }
    }

    fn describe(&self) -> String {
        match self {
            Output::Stream(p) => format!("stream pipe {}", p.type_name()),
            Output::Keyed(p) => format!("keyed pipe {}", p.type_name()),
            Output::Value(v) => format!("{} value", v.kind()),
        }
    }
}

impl From<StreamPipe> for Output {
    fn from(p: StreamPipe) -> Self {
        Output::Stream(p)
    }
}

impl From<KeyedPipe> for Output {
    fn from(p: KeyedPipe) -> Self {
        Output::Keyed(p)
    }
}

impl From<Value> for Output {
    fn from(v: Value) -> Self {
        Output::Value(v)
    }
}

/// Name-to-factory table shared by every instance of one pipe variant.
///
/// The table is append-only: registering an existing name fails instead of
/// overwriting. Registration is expected to complete during single-threaded
/// initialization, before pipelines are consumed concurrently.
pub struct FunctionRegistry<P> {
    variant: &'static str,
    functions: RwLock<HashMap<String, Factory<P>>>,
}

impl<P> FunctionRegistry<P> {
    /// Create an empty registry for the named variant
    pub fn new(variant: &'static str) -> Self {
        Self {
            variant,
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Name of the variant this registry belongs to
    pub fn variant(&self) -> &'static str {
        self.variant
    }

    /// Bind `name` to `factory` for the rest of the process
    pub fn register<F>(&self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&P, Args) -> Result<Output> + Send + Sync + 'static,
    {
        let mut functions = self.functions.write().unwrap_or_else(PoisonError::into_inner);
        if functions.contains_key(name) {
            return Err(Error::DuplicateRegistration(name.to_owned()));
        }
        functions.insert(name.to_owned(), Arc::new(factory));
        tracing::trace!(variant = self.variant, operation = name, "registered operation");
        Ok(())
    }

    /// Look up the factory bound to `name`
    pub fn lookup(&self, name: &str) -> Option<Factory<P>> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Check whether `name` is bound
    pub fn contains(&self, name: &str) -> bool {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl<P> fmt::Debug for FunctionRegistry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("variant", &self.variant)
            .field("functions", &self.names())
            .finish()
    }
}

/// A registered operation bound to its receiver
pub struct BoundMethod<P> {
    receiver: P,
    name: String,
    factory: Factory<P>,
}

impl<P> BoundMethod<P> {
    pub(crate) fn new(receiver: P, name: &str, factory: Factory<P>) -> Self {
        Self {
            receiver,
            name: name.to_owned(),
            factory,
        }
    }

    /// Name the method was resolved under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the operation on the bound receiver
    pub fn invoke(&self, args: Args) -> Result<Output> {
        (self.factory)(&self.receiver, args)
    }
}

impl<P: fmt::Display> fmt::Debug for BoundMethod<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<bound method {} of {}>", self.name, self.receiver)
    }
}

/// Strip the module path and generic parameters from a type name
pub fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test]
    fn test_register_and_lookup() {
        let registry: FunctionRegistry<i64> = FunctionRegistry::new("test");
        registry
            .register("add", |recv, args| Ok(Value::Int(recv + args.value(0)?.as_int()?).into()))
            .unwrap();

        let factory = registry.lookup("add").unwrap();
        let out = factory(&2, Args::new().with(3_i64)).unwrap();
        assert_eq!(out.into_value().unwrap(), Value::Int(5));
        assert!(registry.contains("add"));
        assert!(registry.lookup("sub").is_none());
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry: FunctionRegistry<()> = FunctionRegistry::new("test");
        registry.register("op", |_, _| Ok(Value::Null.into())).unwrap();

        let err = registry.register("op", |_, _| Ok(Value::Int(1).into())).unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration(ref name) if name == "op"));

        // the first binding survives
        let out = registry.lookup("op").unwrap()(&(), Args::new()).unwrap();
        assert_eq!(out.into_value().unwrap(), Value::Null);
    }

    #[test]
    fn test_bound_method_passes_receiver() {
        let registry: FunctionRegistry<String> = FunctionRegistry::new("test");
        registry
            .register("greet", |recv, _| Ok(Value::from(format!("hello {recv}")).into()))
            .unwrap();

        let method = BoundMethod::new("pipes".to_owned(), "greet", registry.lookup("greet").unwrap());
        assert_eq!(method.name(), "greet");
        let out = method.invoke(Args::new()).unwrap().into_value().unwrap();
        assert_eq!(out, Value::from("hello pipes"));
    }

    #[test_case("datapipe_core::stream::StreamPipe" => "StreamPipe" ; "module path")]
    #[test_case("a::Wrapper<b::Inner>" => "Wrapper" ; "generic")]
    #[test_case("Plain" => "Plain" ; "bare")]
    fn test_short_type_name(full: &'static str) -> &'static str {
        short_type_name(full)
    }

    proptest! {
        #[test]
        fn prop_distinct_names_all_register(names in proptest::collection::hash_set("[a-z]{1,12}", 1..32)) {
            let registry: FunctionRegistry<()> = FunctionRegistry::new("prop");
            for name in &names {
                prop_assert!(registry.register(name, |_, _| Ok(Value::Null.into())).is_ok());
            }
            let mut expected: Vec<String> = names.into_iter().collect();
            expected.sort();
            prop_assert_eq!(registry.names(), expected);
        }
    }
}
