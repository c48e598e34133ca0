//! Ordered middleware chain.
//!
//! Hooks run sequentially in registration order over a mutable context. A
//! failing hook is logged and recorded; the remaining hooks still run and the
//! context keeps whatever changes earlier hooks made.

use crate::Result;
use std::sync::{Arc, RwLock};
use tracing::warn;

type HookFn<C> = Arc<dyn Fn(&mut C) -> Result<()> + Send + Sync>;

/// A named hook failure.
#[derive(Debug, Clone)]
pub struct HookFailure {
    pub hook: String,
    pub error: crate::SyftError,
}

/// Ordered list of hooks over a context of type `C`.
pub struct HookChain<C> {
    hooks: RwLock<Vec<(String, HookFn<C>)>>,
}

impl<C> Default for HookChain<C> {
    fn default() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }
}

impl<C> HookChain<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook to the end of the chain.
    pub fn register<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut C) -> Result<()> + Send + Sync + 'static,
    {
        if let Ok(mut hooks) = self.hooks.write() {
            hooks.push((name.into(), Arc::new(hook)));
        }
    }

    /// Remove every hook with the given name. Returns how many were removed.
    pub fn unregister(&self, name: &str) -> usize {
        match self.hooks.write() {
            Ok(mut hooks) => {
                let before = hooks.len();
                hooks.retain(|(n, _)| n != name);
                before - hooks.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every hook over `ctx` and return the failures.
    pub fn run(&self, ctx: &mut C) -> Vec<HookFailure> {
        // Snapshot so a hook may register or unregister without deadlocking.
        let hooks: Vec<(String, HookFn<C>)> = match self.hooks.read() {
            Ok(hooks) => hooks.clone(),
            Err(_) => return Vec::new(),
        };

        let mut failures = Vec::new();
        for (name, hook) in hooks {
            if let Err(error) = hook(ctx) {
                warn!("Hook '{}' failed: {}", name, error);
                failures.push(HookFailure { hook: name, error });
            }
        }
        failures
    }
}
