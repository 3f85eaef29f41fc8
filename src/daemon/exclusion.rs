//! Reasons polling must stay paused regardless of focus.
//!
//! The gate keeps a *set* of active reasons together with the last observed
//! focus state, behind one lock. Focus changes and exclusion begin/end are
//! all decided against that lock, so a focus-gained event always sees the
//! exclusions active at that moment and two overlapping exclusions need two
//! ends before polling can resume.

use crate::daemon::polling::PollingEngine;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

const COMPACTING_PREFIX: &str = "compacting:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExclusionReason {
    /// Disk compaction of the named distro.
    Compacting(String),
    Other(String),
}

impl ExclusionReason {
    #[cfg(test)]
    pub fn compacting(distro: impl Into<String>) -> Self {
        ExclusionReason::Compacting(distro.into())
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionReason::Compacting(distro) => write!(f, "{COMPACTING_PREFIX}{distro}"),
            ExclusionReason::Other(reason) => f.write_str(reason),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExclusionParseError {
    #[error("exclusion reason must not be empty")]
    Empty,
    #[error("missing distro name in exclusion reason: {0}")]
    MissingDistro(String),
}

impl FromStr for ExclusionReason {
    type Err = ExclusionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ExclusionParseError::Empty);
        }

        match s.strip_prefix(COMPACTING_PREFIX) {
            Some(distro) if distro.trim().is_empty() => {
                Err(ExclusionParseError::MissingDistro(s.to_string()))
            }
            Some(distro) => Ok(ExclusionReason::Compacting(distro.trim().to_string())),
            None => Ok(ExclusionReason::Other(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusOutcome {
    Paused,
    Resumed,
    HeldByExclusions(usize),
}

struct GateState {
    reasons: BTreeSet<ExclusionReason>,
    focused: bool,
}

pub struct ExclusionGate {
    engine: PollingEngine,
    state: Mutex<GateState>,
}

impl ExclusionGate {
    /// Starts focused with no exclusions.
    pub fn new(engine: PollingEngine) -> Self {
        Self {
            engine,
            state: Mutex::new(GateState {
                reasons: BTreeSet::new(),
                focused: true,
            }),
        }
    }

    /// Returns `false` if the reason was already active.
    pub fn begin_exclusion(&self, reason: ExclusionReason) -> bool {
        let mut state = self.lock();
        let inserted = state.reasons.insert(reason.clone());

        if inserted {
            tracing::info!(%reason, active = state.reasons.len(), "Exclusion started");
        } else {
            tracing::debug!(%reason, "Exclusion already active");
        }
        self.engine.pause();
        inserted
    }

    /// Returns `false` if the reason was not active.
    pub fn end_exclusion(&self, reason: &ExclusionReason) -> bool {
        let mut state = self.lock();
        if !state.reasons.remove(reason) {
            tracing::warn!(%reason, "Ending an exclusion that was not active");
            return false;
        }

        let remaining = state.reasons.len();
        if remaining == 0 && state.focused {
            tracing::info!(%reason, "Last exclusion ended, resuming polling");
            self.engine.resume();
        } else {
            tracing::info!(
                %reason,
                remaining,
                focused = state.focused,
                "Exclusion ended, polling stays paused"
            );
        }
        true
    }

    #[cfg(test)]
    pub fn is_clear(&self) -> bool {
        self.lock().reasons.is_empty()
    }

    pub fn is_focused(&self) -> bool {
        self.lock().focused
    }

    pub fn active(&self) -> Vec<ExclusionReason> {
        self.lock().reasons.iter().cloned().collect()
    }

    /// Records a focus transition and pauses or resumes the engine
    /// accordingly. Focus loss always pauses; focus gain resumes only when
    /// no exclusion is active.
    pub fn apply_focus(&self, focused: bool) -> FocusOutcome {
        let mut state = self.lock();
        state.focused = focused;

        if !focused {
            self.engine.pause();
            return FocusOutcome::Paused;
        }

        if state.reasons.is_empty() {
            self.engine.resume();
            FocusOutcome::Resumed
        } else {
            FocusOutcome::HeldByExclusions(state.reasons.len())
        }
    }

    /// Turns polling on or off. A fresh start comes up paused when an
    /// exclusion is active or the window is unfocused.
    pub fn set_enabled(&self, enabled: bool) {
        let state = self.lock();
        self.engine.set_global_enabled(enabled);

        if enabled && (!state.reasons.is_empty() || !state.focused) {
            self.engine.pause();
            tracing::info!(
                active = state.reasons.len(),
                focused = state.focused,
                "Polling enabled but held paused"
            );
        }
    }

    pub fn engine(&self) -> &PollingEngine {
        &self.engine
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
