//! Keyed stages: a sequence source and `map`

use datapipe_core::serialization::{register_keyed_stage, StageState};
use datapipe_core::{Args, Error, Func, Key, KeyedPipe, KeyedStage, Result, Value};

/// Random access to an in-memory sequence by integer index
#[derive(Debug, Clone, Default)]
pub struct SequenceWrapper {
    items: Vec<Value>,
}

impl SequenceWrapper {
    /// Catalog kind
    pub const KIND: &'static str = "map.SequenceWrapper";

    /// Create a keyed source over `items`
    pub fn new(items: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Self {
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    /// Create a keyed source and wrap it into a pipe handle
    pub fn pipe(items: impl IntoIterator<Item = impl Into<Value>>) -> KeyedPipe {
        KeyedPipe::new(Self::new(items))
    }

    fn decode(args: &Args) -> Result<Self> {
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

impl KeyedStage for SequenceWrapper {
    fn get(&self, key: &Key) -> Result<Value> {
        let index = match key {
            Key::Int(i) => usize::try_from(*i).ok(),
            _ => None,
        };
        index
            .and_then(|i| self.items.get(i))
            .cloned()
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
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

/// Applies a function to each item on lookup.
///
/// Registered as `map` on keyed pipes.
#[derive(Debug, Clone)]
pub struct KeyedMapper {
    source: KeyedPipe,
    func: Func,
}

impl KeyedMapper {
    /// Catalog kind
    pub const KIND: &'static str = "map.KeyedMapper";

    /// Map `source` through `func`
    pub fn new(source: KeyedPipe, func: Func) -> Self {
        Self { source, func }
    }

    fn decode(args: &Args) -> Result<Self> {
        Ok(Self::new(args.keyed(0)?.clone(), args.func(1)?.clone()))
    }
}

impl KeyedStage for KeyedMapper {
    fn get(&self, key: &Key) -> Result<Value> {
        self.func.call(self.source.get(key.clone())?)
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

pub(crate) fn register() -> Result<()> {
    KeyedPipe::register_as_method("map", |source, args| {
        Ok(KeyedPipe::new(KeyedMapper::new(source, args.func(0)?.clone())))
    })?;

    register_keyed_stage(SequenceWrapper::KIND, |args| {
        Ok(Box::new(SequenceWrapper::decode(&args)?))
    })?;
    register_keyed_stage(KeyedMapper::KIND, |args| {
        Ok(Box::new(KeyedMapper::decode(&args)?))
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datapipe_core::serialization::ByReferenceEngine;
    use datapipe_core::SerializationWrapper;
    use test_case::test_case;

    #[test_case(0, Some(10) ; "first")]
    #[test_case(2, Some(30) ; "last")]
    #[test_case(3, None ; "past the end")]
    #[test_case(-1, None ; "negative")]
    fn test_sequence_lookup(index: i64, expected: Option<i64>) {
        let pipe = SequenceWrapper::pipe([10_i64, 20, 30]);
        match expected {
            Some(v) => assert_eq!(pipe.get(index).unwrap(), Value::Int(v)),
            None => assert!(matches!(pipe.get(index), Err(Error::KeyNotFound(_)))),
        }
    }

    #[test]
    fn test_string_key_not_found() {
        let pipe = SequenceWrapper::pipe([1_i64]);
        assert!(matches!(pipe.get("a"), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_keyed_map() {
        crate::install().unwrap();
        let pipe = SequenceWrapper::pipe(["a", "b"])
            .apply(
                "map",
                Args::new().with(Func::new(|v| Ok(Value::from(v.as_str()?.to_uppercase())))),
            )
            .unwrap();

        assert_eq!(pipe.to_string(), "KeyedMapper");
        assert_eq!(pipe.get(1_i64).unwrap(), Value::from("B"));
        assert_eq!(pipe.get(0_i64).unwrap(), Value::from("A"));
        assert_eq!(pipe.length().unwrap(), 2);
    }

    #[test]
    fn test_keyed_serialization_roundtrip() {
        crate::install().unwrap();
        let negate = Func::named("map_tests.negate", |v| Ok(Value::Int(-v.as_int()?))).unwrap();
        let pipe = SequenceWrapper::pipe([1_i64, 2])
            .apply("map", Args::new().with(negate))
            .unwrap();

        let captured = SerializationWrapper::new(pipe).capture_state().unwrap();
        assert_eq!(captured.engine, ByReferenceEngine::NAME);

        let restored = SerializationWrapper::<KeyedPipe>::restore(&captured)
            .unwrap()
            .into_inner();
        assert_eq!(restored.get(1_i64).unwrap(), Value::Int(-2));
        assert_eq!(restored.length().unwrap(), 2);
    }
}
