//! Command Context
//!
//! Everything an aggregate operation needs besides its arguments: where the
//! time comes from and which optional guards are switched on.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::clock::{Clock, SystemClock};

/// Whether `update_info` is accepted on a deactivated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InactiveUpdatePolicy {
    /// Updates go through regardless of status
    #[default]
    Allow,
    /// Updates on a deactivated user fail with `InvalidStateTransition`
    Reject,
}

impl FromStr for InactiveUpdatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown inactive update policy '{other}'")),
        }
    }
}

/// Context passed to every aggregate operation
#[derive(Clone)]
pub struct CommandContext {
    clock: Arc<dyn Clock>,
    inactive_updates: InactiveUpdatePolicy,
}

impl CommandContext {
    /// Create a context with the wall clock and default policies
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            inactive_updates: InactiveUpdatePolicy::default(),
        }
    }

    /// Use a different time source
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Set the inactive update policy
    pub fn with_inactive_updates(mut self, policy: InactiveUpdatePolicy) -> Self {
        self.inactive_updates = policy;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn inactive_updates(&self) -> InactiveUpdatePolicy {
        self.inactive_updates
    }
}

impl Default for CommandContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandContext")
            .field("inactive_updates", &self.inactive_updates)
            .finish_non_exhaustive()
    }
}
