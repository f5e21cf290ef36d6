// src/steps.rs
//
// =============================================================================
// ESMRUN: STEP REGISTRY (v 0.1 )
// =============================================================================
//
// The extension points of every phase.
//
// Each (phase, step) pair has three slots, run in this order:
//   Pre  -> user hook before the step
//   Step -> the step body (absent = no-op)
//   Post -> user hook after the step
//
// Slots are looked up when the step runs, not when the component is built,
// so a hook registered any time before the phase starts is honoured.

use std::collections::HashMap;
use std::fmt;

use crate::component::Workspace;

/// A hook or step body. Gets the component's mutable state.
pub type StepFn = Box<dyn FnMut(&mut Workspace) -> anyhow::Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPosition {
    Pre,
    Step,
    Post,
}

impl HookPosition {
    /// Execution order around one step.
    pub const ORDER: [HookPosition; 3] = [HookPosition::Pre, HookPosition::Step, HookPosition::Post];
}

impl fmt::Display for HookPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPosition::Pre => "pre-hook",
            HookPosition::Step => "body",
            HookPosition::Post => "post-hook",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepKey {
    pub phase: String,
    pub step: String,
    pub position: HookPosition,
}

impl StepKey {
    pub fn new(phase: &str, step: &str, position: HookPosition) -> Self {
        Self {
            phase: phase.to_string(),
            step: step.to_string(),
            position,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.phase, self.step, self.position)
    }
}

#[derive(Default)]
pub struct StepRegistry {
    slots: HashMap<StepKey, StepFn>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a slot, replacing whatever was there.
    pub fn register<F>(&mut self, phase: &str, step: &str, position: HookPosition, f: F)
    where
        F: FnMut(&mut Workspace) -> anyhow::Result<()> + 'static,
    {
        let key = StepKey::new(phase, step, position);
        if self.slots.insert(key.clone(), Box::new(f)).is_some() {
            log::debug!("Rebound {}", key);
        }
    }

    /// Unbinds a slot. Unbinding a step body turns that step into a no-op.
    pub fn unregister(&mut self, phase: &str, step: &str, position: HookPosition) -> bool {
        self.slots
            .remove(&StepKey::new(phase, step, position))
            .is_some()
    }

    pub fn contains(&self, phase: &str, step: &str, position: HookPosition) -> bool {
        self.slots.contains_key(&StepKey::new(phase, step, position))
    }

    pub(crate) fn get_mut(&mut self, key: &StepKey) -> Option<&mut StepFn> {
        self.slots.get_mut(key)
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.slots.keys().map(ToString::to_string).collect();
        keys.sort();
        f.debug_struct("StepRegistry").field("slots", &keys).finish()
    }
}
