//! Policy for warnings raised by the simulation library while it runs.
//!
//! Warnings are fatal by default: [`handle_warning`] turns them into a
//! [`SimulationWarning`] with a remediation hint. Bulk rollouts can switch to
//! ignoring them for a scope with [`IgnoreWarnings`].

use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimulationWarning {
  #[error("{0} Increase njmax in mujoco XML")]
  ConstraintBufferFull(String),

  #[error("{0} Increase njconmax in mujoco XML")]
  ContactBufferFull(String),

  /// Reported when the simulation is fed NaNs.
  #[error("{0} Check for NaN in simulation.")]
  UnknownWarningType(String),

  #[error("Got MuJoCo Warning: {0}")]
  Other(String),
}

/// Map raw warning text to a known condition.
pub fn classify_warning(text: &str) -> SimulationWarning {
  let text = text.to_string();
  if text.contains("Pre-allocated constraint buffer is full") {
    SimulationWarning::ConstraintBufferFull(text)
  } else if text.contains("Pre-allocated contact buffer is full") {
    SimulationWarning::ContactBufferFull(text)
  } else if text.contains("Unknown warning type") {
    SimulationWarning::UnknownWarningType(text)
  } else {
    SimulationWarning::Other(text)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WarningPolicy {
  Raise = 0,
  Ignore = 1,
}

static POLICY: AtomicU8 = AtomicU8::new(WarningPolicy::Raise as u8);

pub fn warning_policy() -> WarningPolicy {
  match POLICY.load(Ordering::SeqCst) {
    1 => WarningPolicy::Ignore,
    _ => WarningPolicy::Raise,
  }
}

/// Install `policy` process-wide, returning the previous one.
pub fn set_warning_policy(policy: WarningPolicy) -> WarningPolicy {
  match POLICY.swap(policy as u8, Ordering::SeqCst) {
    1 => WarningPolicy::Ignore,
    _ => WarningPolicy::Raise,
  }
}

/// Apply the current policy to a warning emitted by the simulation.
pub fn handle_warning(text: &str) -> Result<(), SimulationWarning> {
  match warning_policy() {
    WarningPolicy::Raise => Err(classify_warning(text)),
    WarningPolicy::Ignore => {
      debug!(warning = text, "ignoring simulation warning");
      Ok(())
    }
  }
}

/// Ignores simulation warnings until dropped, then restores the previous policy.
#[must_use = "warnings are ignored only while the guard is alive"]
pub struct IgnoreWarnings {
  previous: WarningPolicy,
}

impl IgnoreWarnings {
  pub fn new() -> Self {
    Self {
      previous: set_warning_policy(WarningPolicy::Ignore),
    }
  }
}

impl Default for IgnoreWarnings {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for IgnoreWarnings {
  fn drop(&mut self) {
    set_warning_policy(self.previous);
  }
}
