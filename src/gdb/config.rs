//! Engine configuration
//!
//! Everything that varies between hosts or debugger builds lives in plain
//! data tables here, so the engine itself carries no platform branches.

use crate::gdb::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// GDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub gdb_path: String,
    pub gdb_args: Vec<String>,
    pub start_mode: StartMode,
    /// Commands posted once the inferior is prepared, after the built-in setup
    pub init_commands: Vec<String>,
    /// Locations passed to `-break-insert` before the inferior starts
    pub breakpoints: Vec<String>,
    pub skip_known_frames: bool,
    /// Upper bound on consecutive automatic steps through skipped frames
    pub max_auto_steps: u32,
    pub use_message_box_for_signals: bool,
    pub max_stack_depth: Option<u32>,
    pub list_threads: bool,
    pub quirks: ProtocolQuirks,
    pub frame_skip: FrameSkipRules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            gdb_args: vec!["--interpreter=mi2".to_string(), "-q".to_string()],
            start_mode: StartMode::default(),
            init_commands: Vec::new(),
            breakpoints: Vec::new(),
            skip_known_frames: false,
            max_auto_steps: 32,
            use_message_box_for_signals: true,
            max_stack_depth: Some(1000),
            list_threads: true,
            quirks: ProtocolQuirks::for_platform(std::env::consts::OS),
            frame_skip: FrameSkipRules::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// How the inferior comes into existence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum StartMode {
    /// Launch the executable under the debugger
    Plain {
        executable: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Attach to a running process
    Attach {
        pid: u64,
        #[serde(default)]
        executable: Option<String>,
    },
    /// Inspect a core file
    Core { core_file: String, executable: String },
    /// Connect to a gdbserver-style remote target
    Remote {
        target: String,
        #[serde(default)]
        executable: Option<String>,
    },
}

impl Default for StartMode {
    fn default() -> Self {
        StartMode::Plain {
            executable: "a.out".to_string(),
            args: Vec::new(),
        }
    }
}

impl StartMode {
    pub fn executable(&self) -> Option<&str> {
        match self {
            StartMode::Plain { executable, .. } | StartMode::Core { executable, .. } => {
                Some(executable)
            }
            StartMode::Attach { executable, .. } | StartMode::Remote { executable, .. } => {
                executable.as_deref()
            }
        }
    }
}

/// Debugger behaviors that differ across hosts and versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolQuirks {
    /// Reasons that settle as a genuine stop
    pub stop_reasons: Vec<String>,
    /// Reasons meaning the inferior is gone
    pub exit_reasons: Vec<String>,
    /// Some hosts omit the reason on every stop
    pub empty_reason_is_stop: bool,
    /// Signal used by breakpoints, never worth a message box
    pub trap_signal: String,
    /// Console phrases that reveal the inferior pid in their first group
    pub pid_patterns: Vec<String>,
    pub warning_prefix: String,
    /// Async classes dropped without a diagnostic
    pub ignored_async_classes: Vec<String>,
    /// Error seen after attaching on some hosts; the session is unusable
    pub generic_error_message: String,
    /// Error for `finish` in `main`; the inferior is in fact stopped
    pub outermost_frame_message: String,
    /// Error for stepping where no line info exists; the inferior is stopped
    pub no_function_bounds_message: String,
}

impl Default for ProtocolQuirks {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            stop_reasons: strings(&[
                "breakpoint-hit",
                "end-stepping-range",
                "location-reached",
                "function-finished",
                "signal-received",
                "watchpoint-trigger",
                "read-watchpoint-trigger",
                "access-watchpoint-trigger",
            ]),
            exit_reasons: strings(&["exited-normally", "exited-signalled", "exited"]),
            empty_reason_is_stop: true,
            trap_signal: "SIGTRAP".to_string(),
            pid_patterns: strings(&[
                r"New .hread 0x[0-9a-f]+ \(LWP ([0-9]*)\)",
                r"New .hread ([0-9]+)\.0x[0-9a-f]*",
                r"Switching to process ([0-9]+) local thread",
            ]),
            warning_prefix: "warning:".to_string(),
            ignored_async_classes: strings(&["cmd-param-changed", "memory-changed", "tsv-created"]),
            generic_error_message: "Cannot find new threads: generic error".to_string(),
            outermost_frame_message: "\"finish\" not meaningful in the outermost frame."
                .to_string(),
            no_function_bounds_message: "Cannot find bounds of current function".to_string(),
        }
    }
}

impl ProtocolQuirks {
    /// Select the table for a host OS name as reported by `std::env::consts::OS`.
    pub fn for_platform(os: &str) -> Self {
        let mut quirks = Self::default();
        match os {
            "macos" => {
                // Apple's gdb reports library events through its own classes
                quirks
                    .ignored_async_classes
                    .extend(["shlibs-updated", "shlibs-added"].map(String::from));
            }
            "windows" => {
                quirks.pid_patterns.push(r"\[New thread ([0-9]+)\.0x[0-9a-f]+\]".to_string());
            }
            _ => {}
        }
        quirks
    }
}

/// Functions and files the debugger should step through without stopping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSkipRules {
    /// Frames to step further into, e.g. trampolines
    pub skippable_functions: Vec<String>,
    pub skippable_files: Vec<String>,
    /// Frames to step out of, e.g. library internals
    pub leavable_functions: Vec<String>,
    pub leavable_files: Vec<String>,
}
