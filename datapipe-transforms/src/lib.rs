//! Reference stages for the datapipe substrate
//!
//! Provides in-memory sources and a handful of operations (`map`, `filter`,
//! `batch`, `trace_as_dataframe` on stream pipes and `map` on keyed pipes).
//! [`install`] registers them as operations and adds their rebuild functions
//! to the stage catalog so pipes built from them can be serialized.

#![warn(missing_docs)]

pub mod iter;
pub mod map;

use std::sync::{Mutex, PoisonError};

use datapipe_core::Result;

pub use iter::{Batcher, DataFrameTracer, Filter, IterableWrapper, Mapper};
pub use map::{KeyedMapper, SequenceWrapper};

static INSTALLED: Mutex<bool> = Mutex::new(false);

/// Register the built-in operations and stage decoders.
///
/// Safe to call any number of times; only the first successful call
/// registers anything. Fails with `DuplicateRegistration` if one of the
/// operation names was already taken by other code.
pub fn install() -> Result<()> {
    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
    if *installed {
        return Ok(());
    }

    iter::register()?;
    map::register()?;
    *installed = true;

    tracing::debug!("registered built-in datapipe operations");
    Ok(())
}

#[cfg(test)]
mod tests {
    use datapipe_core::{KeyedPipe, StreamPipe};

    #[test]
    fn test_install_is_idempotent() {
        super::install().unwrap();
        super::install().unwrap();

        for name in ["map", "filter", "batch", "trace_as_dataframe"] {
            assert!(StreamPipe::is_registered(name), "{name}");
        }
        assert!(KeyedPipe::is_registered("map"));
    }
}
