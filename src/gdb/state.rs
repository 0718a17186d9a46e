//! Debugger lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebuggerState {
    #[default]
    NotReady,
    EngineStarting,
    AdapterStarting,
    AdapterStarted,
    InferiorPreparing,
    InferiorPrepared,
    InferiorStarting,
    /// Post-mortem inspection: accepts commands, never runs
    InferiorUnrunnable,
    InferiorRunningRequested,
    InferiorRunning,
    InferiorStopping,
    InferiorStopped,
    InferiorShuttingDown,
    InferiorShutDown,
    AdapterShuttingDown,
}

use DebuggerState::*;

impl DebuggerState {
    /// Whether commands may be posted at all in this state.
    pub fn accepts_commands(self) -> bool {
        matches!(
            self,
            AdapterStarted
                | InferiorUnrunnable
                | InferiorPreparing
                | InferiorPrepared
                | InferiorStarting
                | InferiorRunningRequested
                | InferiorRunning
                | InferiorStopping
                | InferiorStopped
                | InferiorShuttingDown
                | InferiorShutDown
                | AdapterShuttingDown
        )
    }

    /// States in which the inferior may be executing, so commands that need
    /// a stopped target have to wait.
    pub fn may_be_running(self) -> bool {
        matches!(
            self,
            InferiorStarting | InferiorRunningRequested | InferiorRunning | InferiorStopping
        )
    }

    /// States with a live inferior that must be killed on shutdown.
    pub fn has_live_inferior(self) -> bool {
        matches!(
            self,
            InferiorRunningRequested | InferiorRunning | InferiorStopping | InferiorStopped
        )
    }

    pub fn can_transition_to(self, to: DebuggerState) -> bool {
        // fatal errors may abandon any state
        if to == NotReady {
            return self != NotReady;
        }
        match self {
            NotReady => to == EngineStarting,
            EngineStarting => to == AdapterStarting,
            AdapterStarting => to == AdapterStarted,
            AdapterStarted => matches!(to, InferiorPreparing | AdapterShuttingDown),
            InferiorPreparing => matches!(to, InferiorPrepared | AdapterShuttingDown),
            InferiorPrepared => matches!(to, InferiorStarting | AdapterShuttingDown),
            InferiorStarting => matches!(
                to,
                InferiorRunningRequested
                    | InferiorRunning
                    | InferiorStopped
                    | InferiorUnrunnable
                    | AdapterShuttingDown
            ),
            InferiorUnrunnable => to == AdapterShuttingDown,
            InferiorRunningRequested => {
                matches!(to, InferiorRunning | InferiorStopped | InferiorShuttingDown)
            }
            InferiorRunning => matches!(to, InferiorStopping | InferiorShuttingDown),
            InferiorStopping => {
                matches!(to, InferiorStopped | InferiorRunning | InferiorShuttingDown)
            }
            InferiorStopped => {
                matches!(to, InferiorRunningRequested | InferiorRunning | InferiorShuttingDown)
            }
            InferiorShuttingDown => to == InferiorShutDown,
            InferiorShutDown => to == AdapterShuttingDown,
            AdapterShuttingDown => false,
        }
    }
}

impl fmt::Display for DebuggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
