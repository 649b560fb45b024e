//! One atomically swappable component slot.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::components::{Component, ComponentError};

/// What a slot did with a configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    /// Section unchanged, or still disabled.
    Unchanged,
    /// No instance existed; a fresh one was built.
    Built,
    /// The live instance produced its replacement.
    Reloaded,
    /// Section disabled; the instance was cleared and released.
    Retired,
    /// Section disabled at init; the slot stays empty.
    Disabled,
}

impl SlotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotAction::Unchanged => "unchanged",
            SlotAction::Built => "built",
            SlotAction::Reloaded => "reloaded",
            SlotAction::Retired => "retired",
            SlotAction::Disabled => "disabled",
        }
    }
}

impl fmt::Display for SlotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holder for the live instance of one component kind.
///
/// Readers get an `Arc` clone and keep using it even after a swap.
pub struct Slot<T> {
    current: ArcSwapOption<T>,
}

fn checked<T: Component>(config: &T::Config) -> Result<(), ComponentError> {
    T::validate(config).map_err(|errors| ComponentError::invalid(T::KIND, &errors))
}

impl<T: Component> Slot<T> {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.current.load_full()
    }

    pub fn is_present(&self) -> bool {
        self.current.load().is_some()
    }

    /// Build from scratch if the section is enabled.
    pub fn init(&self, config: &T::Config) -> Result<SlotAction, ComponentError> {
        if !T::enabled(config) {
            return Ok(SlotAction::Disabled);
        }
        checked::<T>(config)?;
        let built = T::build(config)?;
        self.current.store(Some(Arc::new(built)));
        Ok(SlotAction::Built)
    }

    /// Move the slot from `previous` to `next`.
    ///
    /// On a failed reload the previous instance stays live.
    pub async fn apply(
        &self,
        previous: &T::Config,
        next: &T::Config,
    ) -> Result<SlotAction, ComponentError> {
        if previous == next {
            return Ok(SlotAction::Unchanged);
        }

        match (T::enabled(next), self.current.load_full()) {
            (true, Some(live)) => {
                checked::<T>(next)?;
                let replacement = live.reload(next)?;
                self.current.store(Some(Arc::new(replacement)));
                Ok(SlotAction::Reloaded)
            }
            (true, None) => {
                checked::<T>(next)?;
                let built = T::build(next)?;
                self.current.store(Some(Arc::new(built)));
                Ok(SlotAction::Built)
            }
            (false, Some(live)) => {
                self.current.store(None);
                live.release().await;
                Ok(SlotAction::Retired)
            }
            (false, None) => Ok(SlotAction::Unchanged),
        }
    }

    /// Clear the slot and release whatever was in it.
    pub async fn release(&self) -> bool {
        match self.current.swap(None) {
            Some(live) => {
                live.release().await;
                true
            }
            None => false,
        }
    }
}

impl<T: Component> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}
