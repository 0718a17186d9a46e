//! GDB Machine Interface (MI) Type Definitions

use crate::gdb::state::DebuggerState;
use crate::gdb::value::MiValue;
use serde::{Deserialize, Serialize};

/// GDB/MI result class types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
    Unknown,
}

impl ResultClass {
    pub fn from_name(name: &str) -> Self {
        match name {
            "done" => ResultClass::Done,
            "running" => ResultClass::Running,
            "connected" => ResultClass::Connected,
            "error" => ResultClass::Error,
            "exit" => ResultClass::Exit,
            _ => ResultClass::Unknown,
        }
    }
}

/// Which async channel a record arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AsyncKind {
    /// `*`
    Exec,
    /// `+`
    Status,
    /// `=`
    Notify,
}

/// Stop reason types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    BreakpointHit,
    WatchpointTrigger,
    ReadWatchpointTrigger,
    AccessWatchpointTrigger,
    FunctionFinished,
    LocationReached,
    EndSteppingRange,
    SignalReceived,
    /// No reason given, reported by some platforms for every stop
    Unspecified,
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s {
            "breakpoint-hit" => StopReason::BreakpointHit,
            "watchpoint-trigger" => StopReason::WatchpointTrigger,
            "read-watchpoint-trigger" => StopReason::ReadWatchpointTrigger,
            "access-watchpoint-trigger" => StopReason::AccessWatchpointTrigger,
            "function-finished" => StopReason::FunctionFinished,
            "location-reached" => StopReason::LocationReached,
            "end-stepping-range" => StopReason::EndSteppingRange,
            "signal-received" => StopReason::SignalReceived,
            "" => StopReason::Unspecified,
            other => StopReason::Other(other.to_string()),
        }
    }
}

impl StopReason {
    /// Stops that end a step and may be subject to frame skipping.
    pub fn is_stepping_completion(&self) -> bool {
        matches!(self, StopReason::EndSteppingRange | StopReason::FunctionFinished)
    }
}

/// Opaque caller data carried from `post` to the result callback
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cookie {
    #[default]
    None,
    Number(i64),
    Text(String),
}

/// A result record after correlation with its command
#[derive(Debug, Clone, PartialEq)]
pub struct GdbResponse {
    pub token: Option<u64>,
    pub class: ResultClass,
    pub data: MiValue,
    pub cookie: Cookie,
}

impl GdbResponse {
    /// The `msg` field of an error result.
    pub fn error_message(&self) -> &str {
        self.data.find_child("msg").data()
    }
}

/// Breakpoint information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub number: String,
    #[serde(rename = "type")]
    pub breakpoint_type: String,
    pub disposition: String,
    pub enabled: bool,
    #[serde(default)]
    pub addr: Option<String>,
    #[serde(default)]
    pub func: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub times: u64,
    #[serde(default)]
    pub original_location: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub ignore_count: Option<u64>,
}

/// Frame information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub level: u64,
    pub addr: String,
    #[serde(default)]
    pub func: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub fullname: Option<String>,
    #[serde(default)]
    pub line: Option<u64>,
    /// Shared object the frame belongs to, when no source is known
    #[serde(default)]
    pub from: Option<String>,
}

/// Register information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub number: u64,
    pub name: String,
    pub value: String,
}

/// Debugger version as reported by `show version`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdbVersion {
    /// `10000 * major + 100 * minor + patch`
    pub version: u32,
    pub build: Option<u32>,
}

/// Output channels forwarded to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputChannel {
    /// Commands written to the debugger
    Input,
    /// Decoded `~` stream text
    Console,
    /// Decoded `@` stream text, usually the inferior's own output
    Target,
    /// Decoded `&` stream text
    Log,
    /// Engine diagnostics
    Misc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Critical,
}

/// Structured notifications derived from async records and stream noise
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Notification {
    LibraryLoaded { id: String },
    LibraryUnloaded { id: String },
    ThreadGroupCreated { id: String },
    ThreadGroupExited { id: String },
    ThreadCreated { id: String, group_id: String },
    ThreadExited { id: String, group_id: String },
    ThreadSelected { id: String },
    InferiorPid { pid: u64 },
    BreakpointCreated { breakpoint: Breakpoint },
    BreakpointModified { breakpoint: Breakpoint },
    BreakpointDeleted { number: String },
    Warning { text: String },
}

/// Everything the engine reports to the outside world
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EngineEvent {
    StateChanged {
        from: DebuggerState,
        to: DebuggerState,
    },
    Status {
        text: String,
        timeout_ms: Option<u64>,
    },
    Message {
        severity: Severity,
        title: String,
        text: String,
    },
    Output {
        channel: OutputChannel,
        text: String,
    },
    RebuildModel,
    Stopped {
        reason: StopReason,
        frame: Option<Frame>,
        thread_id: Option<String>,
    },
    Frames {
        frames: Vec<Frame>,
    },
    Threads {
        ids: Vec<String>,
        current: Option<String>,
    },
    Registers {
        registers: Vec<Register>,
    },
    Breakpoints {
        breakpoints: Vec<Breakpoint>,
    },
    Notification(Notification),
    CommandResult {
        id: u64,
        class: ResultClass,
        data: MiValue,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_vocabulary() {
        assert_eq!(StopReason::from("breakpoint-hit"), StopReason::BreakpointHit);
        assert_eq!(StopReason::from(""), StopReason::Unspecified);
        assert_eq!(
            StopReason::from("solib-event"),
            StopReason::Other("solib-event".to_string())
        );
        assert!(StopReason::from("function-finished").is_stepping_completion());
        assert!(!StopReason::from("location-reached").is_stepping_completion());
    }

    #[test]
    fn test_result_class_unknown() {
        assert_eq!(ResultClass::from_name("connected"), ResultClass::Connected);
        assert_eq!(ResultClass::from_name("bogus"), ResultClass::Unknown);
    }

    #[test]
    fn test_event_json_shape() {
        let event = EngineEvent::Notification(Notification::ThreadCreated {
            id: "2".to_string(),
            group_id: "i1".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "notification");
        assert_eq!(json["kind"], "thread-created");
        assert_eq!(json["group_id"], "i1");
    }
}
