//! Variant-wide override hooks for state capture, serialization and display

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::serialization::{PipeSnapshot, StageState};

/// Replaces the default textual form of a pipe
pub type TextHook<P> = Arc<dyn Fn(&P) -> String + Send + Sync>;

/// Replaces the stage state captured for serialization
pub type StateHook<P> = Arc<dyn Fn(&P) -> Result<StageState> + Send + Sync>;

/// Takes over serialization of a pipe; `Ok(None)` falls through to the default path
pub type SerializeHook<P> = Arc<dyn Fn(&P) -> Result<Option<PipeSnapshot>> + Send + Sync>;

/// A single-occupancy slot holding at most one hook
pub struct HookSlot<H> {
    kind: &'static str,
    slot: RwLock<Option<H>>,
}

impl<H: Clone> HookSlot<H> {
    /// Create an empty slot
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slot: RwLock::new(None),
        }
    }

    /// Install `hook`, or clear the slot when `hook` is `None`.
    ///
    /// Installing over an active hook fails; clearing always succeeds.
    pub fn install(&self, hook: Option<H>) -> Result<()> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() && hook.is_some() {
            return Err(Error::HookAlreadyInstalled(self.kind));
        }
        *slot = hook;
        Ok(())
    }

    /// The active hook, if any
    pub fn get(&self) -> Option<H> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Check whether a hook is active
    pub fn is_installed(&self) -> bool {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl<H> fmt::Debug for HookSlot<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let installed = self
            .slot
            .read()
            .map(|s| s.is_some())
            .unwrap_or_else(|poisoned| poisoned.into_inner().is_some());
        f.debug_struct("HookSlot")
            .field("kind", &self.kind)
            .field("installed", &installed)
            .finish()
    }
}

/// The four hooks of one pipe variant
#[derive(Debug)]
pub struct PipeHooks<P> {
    /// Overrides the captured stage state
    pub state: HookSlot<StateHook<P>>,
    /// Overrides the whole snapshot
    pub serialize: HookSlot<SerializeHook<P>>,
    /// Overrides `Display`
    pub string: HookSlot<TextHook<P>>,
    /// Overrides `Debug`
    pub repr: HookSlot<TextHook<P>>,
}

impl<P> PipeHooks<P> {
    /// Create a set of empty hook slots
    pub const fn new() -> Self {
        Self {
            state: HookSlot::new("state"),
            serialize: HookSlot::new("serialize"),
            string: HookSlot::new("string"),
            repr: HookSlot::new("repr"),
        }
    }
}

impl<P> Default for PipeHooks<P> {
    fn default() -> Self {
        Self::new()
    }
}
