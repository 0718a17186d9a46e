//! Interpretation of async records and console noise
//!
//! The classifier turns payloads into decisions; applying them to the
//! state machine is left to the engine.

use crate::gdb::config::{FrameSkipRules, ProtocolQuirks};
use crate::gdb::error::{EngineError, Result};
use crate::gdb::parser::parse_breakpoint;
use crate::gdb::types::{GdbVersion, Notification, StopReason};
use crate::gdb::value::MiValue;
use regex::Regex;
use std::collections::HashSet;

const VERSION_PATTERN: &str = r"GNU gdb(.*) (\d+)\.(\d+)(\.(\d+))?(-(\d+))?";

/// What a `*stopped` record means
#[derive(Debug, Clone, PartialEq)]
pub enum StopKind {
    /// The inferior is gone
    Exited { message: String },
    /// A stop the engine should settle on
    Genuine(StopReason),
    /// A reason outside the configured vocabulary
    Unrecognized(String),
}

/// What to do after a stepping stop in a given frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Settle,
    /// Step again, the frame is uninteresting plumbing
    StepInto,
    /// Finish the frame, it is library internals
    StepOut,
}

/// Side signals found in console stream text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsoleHints {
    pub pid: Option<u64>,
    pub status: Option<String>,
}

struct PatternSet(Vec<Regex>);

impl PatternSet {
    fn compile(patterns: &[String]) -> Result<Self> {
        patterns
            .iter()
            .map(|pattern| compile(pattern))
            .collect::<Result<Vec<_>>>()
            .map(PatternSet)
    }

    fn matches(&self, text: &str) -> bool {
        self.0.iter().any(|re| re.is_match(text))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| EngineError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Classifies async payloads according to the configured quirk tables
pub struct EventClassifier {
    stop_reasons: HashSet<String>,
    exit_reasons: HashSet<String>,
    empty_reason_is_stop: bool,
    trap_signal: String,
    ignored_async_classes: HashSet<String>,
    pid_patterns: Vec<Regex>,
    version_pattern: Regex,
    skippable_functions: PatternSet,
    skippable_files: PatternSet,
    leavable_functions: PatternSet,
    leavable_files: PatternSet,
}

impl EventClassifier {
    pub fn new(quirks: &ProtocolQuirks, frame_skip: &FrameSkipRules) -> Result<Self> {
        Ok(Self {
            stop_reasons: quirks.stop_reasons.iter().cloned().collect(),
            exit_reasons: quirks.exit_reasons.iter().cloned().collect(),
            empty_reason_is_stop: quirks.empty_reason_is_stop,
            trap_signal: quirks.trap_signal.clone(),
            ignored_async_classes: quirks.ignored_async_classes.iter().cloned().collect(),
            pid_patterns: quirks
                .pid_patterns
                .iter()
                .map(|pattern| compile(pattern))
                .collect::<Result<_>>()?,
            version_pattern: compile(VERSION_PATTERN)?,
            skippable_functions: PatternSet::compile(&frame_skip.skippable_functions)?,
            skippable_files: PatternSet::compile(&frame_skip.skippable_files)?,
            leavable_functions: PatternSet::compile(&frame_skip.leavable_functions)?,
            leavable_files: PatternSet::compile(&frame_skip.leavable_files)?,
        })
    }

    /// Classify the payload of a `*stopped` record.
    pub fn classify_stop(&self, data: &MiValue) -> StopKind {
        let reason = data.find_child("reason").data();

        if self.exit_reasons.contains(reason) {
            return StopKind::Exited {
                message: exit_message(reason, data),
            };
        }
        if reason.is_empty() {
            return if self.empty_reason_is_stop {
                StopKind::Genuine(StopReason::Unspecified)
            } else {
                StopKind::Unrecognized(String::new())
            };
        }
        if self.stop_reasons.contains(reason) {
            StopKind::Genuine(StopReason::from(reason))
        } else {
            StopKind::Unrecognized(reason.to_string())
        }
    }

    /// For `signal-received` stops, the signal name and meaning when it
    /// deserves user attention.
    pub fn interesting_signal<'a>(&self, data: &'a MiValue) -> Option<(&'a str, &'a str)> {
        let name = data.find_child("signal-name").data();
        if name.is_empty() || name == self.trap_signal {
            return None;
        }
        Some((name, data.find_child("signal-meaning").data()))
    }

    /// Decide whether a stepping stop in `frame` should settle.
    pub fn step_decision(&self, frame: &MiValue) -> StepDecision {
        let func = frame.find_child("func").data();
        let file = frame.find_child("file").data();
        if (!func.is_empty() && self.leavable_functions.matches(func))
            || (!file.is_empty() && self.leavable_files.matches(file))
        {
            StepDecision::StepOut
        } else if (!func.is_empty() && self.skippable_functions.matches(func))
            || (!file.is_empty() && self.skippable_files.matches(file))
        {
            StepDecision::StepInto
        } else {
            StepDecision::Settle
        }
    }

    /// Map a notify class to a structured notification.
    ///
    /// `None` means the class carries nothing the consumer needs.
    pub fn classify_notify(&self, class: &str, data: &MiValue) -> Option<Notification> {
        let field = |name: &str| data.find_child(name).data().to_string();
        let notification = match class {
            "library-loaded" => Notification::LibraryLoaded { id: field("id") },
            "library-unloaded" => Notification::LibraryUnloaded { id: field("id") },
            "thread-group-added" | "thread-group-created" => {
                Notification::ThreadGroupCreated { id: field("id") }
            }
            "thread-group-started" => {
                let pid = data.find_u64("pid")?;
                Notification::InferiorPid { pid }
            }
            "thread-group-exited" => Notification::ThreadGroupExited { id: field("id") },
            "thread-created" => Notification::ThreadCreated {
                id: field("id"),
                group_id: field("group-id"),
            },
            "thread-exited" => Notification::ThreadExited {
                id: field("id"),
                group_id: field("group-id"),
            },
            "thread-selected" => Notification::ThreadSelected { id: field("id") },
            "breakpoint-created" => Notification::BreakpointCreated {
                breakpoint: parse_breakpoint(data.find_child("bkpt"))?,
            },
            "breakpoint-modified" => Notification::BreakpointModified {
                breakpoint: parse_breakpoint(data.find_child("bkpt"))?,
            },
            "breakpoint-deleted" => Notification::BreakpointDeleted { number: field("id") },
            _ => return None,
        };
        Some(notification)
    }

    pub fn is_ignored_async_class(&self, class: &str) -> bool {
        self.ignored_async_classes.contains(class)
    }

    /// Scan decoded console text for a pid and progress phrases.
    pub fn scan_console(&self, text: &str) -> ConsoleHints {
        let pid = self
            .pid_patterns
            .iter()
            .find_map(|re| re.captures(text))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());

        let status = if let Some(rest) = text.strip_prefix("Reading symbols from ") {
            let file = rest.split("...").next().unwrap_or(rest).trim();
            Some(format!("Reading {}...", file))
        } else if text.starts_with("[New ") || text.starts_with("[Thread ") {
            Some(text.trim_end().to_string())
        } else {
            None
        };

        ConsoleHints { pid, status }
    }

    /// Parse the banner printed by `show version`.
    pub fn parse_version(&self, text: &str) -> Option<GdbVersion> {
        let caps = self.version_pattern.captures(text)?;
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        // Out-of-range components mean an unusable banner, not a panic
        let version = number(2)?
            .checked_mul(10000)?
            .checked_add(number(3)?.checked_mul(100)?)?
            .checked_add(number(5).unwrap_or(0))?;
        Some(GdbVersion {
            version,
            build: number(7),
        })
    }
}

fn exit_message(reason: &str, data: &MiValue) -> String {
    match reason {
        "exited" => format!(
            "Program exited with exit code {}.",
            data.find_child("exit-code").data()
        ),
        "exited-signalled" => format!(
            "Program exited after receiving signal {}.",
            data.find_child("signal-name").data()
        ),
        _ => "Program exited normally.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> EventClassifier {
        EventClassifier::new(&ProtocolQuirks::default(), &FrameSkipRules::default()).unwrap()
    }

    fn payload(text: &str) -> MiValue {
        MiValue::parse_results(text.as_bytes())
    }

    #[test]
    fn test_classify_genuine_stops() {
        let c = classifier();
        assert_eq!(
            c.classify_stop(&payload(r#",reason="breakpoint-hit",bkptno="1""#)),
            StopKind::Genuine(StopReason::BreakpointHit)
        );
        assert_eq!(
            c.classify_stop(&payload(r#",reason="access-watchpoint-trigger""#)),
            StopKind::Genuine(StopReason::AccessWatchpointTrigger)
        );
        assert_eq!(
            c.classify_stop(&payload(r#",frame={func="main"}"#)),
            StopKind::Genuine(StopReason::Unspecified)
        );
    }

    #[test]
    fn test_empty_reason_follows_quirk_table() {
        let quirks = ProtocolQuirks {
            empty_reason_is_stop: false,
            ..ProtocolQuirks::default()
        };
        let c = EventClassifier::new(&quirks, &FrameSkipRules::default()).unwrap();
        assert_eq!(
            c.classify_stop(&MiValue::empty_tuple()),
            StopKind::Unrecognized(String::new())
        );
    }

    #[test]
    fn test_classify_unrecognized_stop() {
        assert_eq!(
            classifier().classify_stop(&payload(r#",reason="solib-event""#)),
            StopKind::Unrecognized("solib-event".to_string())
        );
    }

    #[test]
    fn test_exit_messages() {
        let c = classifier();
        assert_eq!(
            c.classify_stop(&payload(r#",reason="exited",exit-code="03""#)),
            StopKind::Exited {
                message: "Program exited with exit code 03.".to_string()
            }
        );
        assert_eq!(
            c.classify_stop(&payload(r#",reason="exited-signalled",signal-name="SIGSEGV""#)),
            StopKind::Exited {
                message: "Program exited after receiving signal SIGSEGV.".to_string()
            }
        );
        assert_eq!(
            c.classify_stop(&payload(r#",reason="exited-normally""#)),
            StopKind::Exited {
                message: "Program exited normally.".to_string()
            }
        );
    }

    #[test]
    fn test_trap_signal_is_not_interesting() {
        let c = classifier();
        assert_eq!(
            c.interesting_signal(&payload(r#",signal-name="SIGTRAP",signal-meaning="Trace""#)),
            None
        );
        assert_eq!(
            c.interesting_signal(&payload(
                r#",signal-name="SIGSEGV",signal-meaning="Segmentation fault""#
            )),
            Some(("SIGSEGV", "Segmentation fault"))
        );
    }

    #[test]
    fn test_step_decision() {
        let rules = FrameSkipRules {
            skippable_functions: vec![r"^__\w+_trampoline$".to_string()],
            leavable_functions: vec![r"^std::".to_string()],
            leavable_files: vec![r"/usr/include/".to_string()],
            ..FrameSkipRules::default()
        };
        let c = EventClassifier::new(&ProtocolQuirks::default(), &rules).unwrap();
        let frame = |text: &str| MiValue::parse(text);
        assert_eq!(
            c.step_decision(&frame(r#"{func="std::vector<int>::size",file="v.h"}"#)),
            StepDecision::StepOut
        );
        assert_eq!(
            c.step_decision(&frame(r#"{func="f",file="/usr/include/c++/vector"}"#)),
            StepDecision::StepOut
        );
        assert_eq!(
            c.step_decision(&frame(r#"{func="__plt_trampoline"}"#)),
            StepDecision::StepInto
        );
        assert_eq!(
            c.step_decision(&frame(r#"{func="main",file="a.cpp"}"#)),
            StepDecision::Settle
        );
    }

    #[test]
    fn test_invalid_skip_pattern() {
        let rules = FrameSkipRules {
            skippable_files: vec!["(".to_string()],
            ..FrameSkipRules::default()
        };
        let err = EventClassifier::new(&ProtocolQuirks::default(), &rules)
            .err()
            .expect("pattern error");
        assert!(matches!(err, EngineError::Pattern { pattern, .. } if pattern == "("));
    }

    #[test]
    fn test_classify_notify() {
        let c = classifier();
        assert_eq!(
            c.classify_notify("thread-created", &payload(r#",id="2",group-id="i1""#)),
            Some(Notification::ThreadCreated {
                id: "2".to_string(),
                group_id: "i1".to_string()
            })
        );
        assert_eq!(
            c.classify_notify(
                "library-loaded",
                &payload(r#",id="/lib/libc.so.6",target-name="/lib/libc.so.6""#)
            ),
            Some(Notification::LibraryLoaded {
                id: "/lib/libc.so.6".to_string()
            })
        );
        assert_eq!(
            c.classify_notify("thread-group-started", &payload(r#",id="i1",pid="4242""#)),
            Some(Notification::InferiorPid { pid: 4242 })
        );
        assert!(matches!(
            c.classify_notify("breakpoint-created", &payload(r#",bkpt={number="3",type="breakpoint"}"#)),
            Some(Notification::BreakpointCreated { breakpoint }) if breakpoint.number == "3"
        ));
        assert_eq!(c.classify_notify("cmd-param-changed", &payload("")), None);
        assert!(c.is_ignored_async_class("cmd-param-changed"));
    }

    #[test]
    fn test_scan_console_pid() {
        let c = classifier();
        assert_eq!(
            c.scan_console("[New Thread 0x7ffff7d8a740 (LWP 31337)]\n").pid,
            Some(31337)
        );
        assert_eq!(c.scan_console("[New thread 812.0x1a4]\n").pid, Some(812));
        assert_eq!(
            c.scan_console("[Switching to process 99 local thread 0x1]\n").pid,
            Some(99)
        );
        assert_eq!(c.scan_console("Breakpoint 1, main ()\n").pid, None);
    }

    #[test]
    fn test_scan_console_status() {
        let c = classifier();
        assert_eq!(
            c.scan_console("Reading symbols from /tmp/app...\n").status.as_deref(),
            Some("Reading /tmp/app...")
        );
        assert_eq!(
            c.scan_console("[Thread debugging using libthread_db enabled]\n")
                .status
                .as_deref(),
            Some("[Thread debugging using libthread_db enabled]")
        );
        assert_eq!(c.scan_console("hello\n").status, None);
    }

    #[test]
    fn test_parse_version() {
        let c = classifier();
        assert_eq!(
            c.parse_version("GNU gdb (GDB) 12.1\n"),
            Some(GdbVersion { version: 120100, build: None })
        );
        assert_eq!(
            c.parse_version("GNU gdb (Ubuntu 7.11.1-0ubuntu1) 7.11.1-5\n"),
            Some(GdbVersion { version: 71101, build: Some(5) })
        );
        assert_eq!(c.parse_version("lldb-1500"), None);
    }

    #[test]
    fn test_parse_version_out_of_range() {
        let c = classifier();
        assert_eq!(c.parse_version("GNU gdb (X) 500000.1\n"), None);
        assert_eq!(c.parse_version("GNU gdb (X) 4294967296.1\n"), None);
        assert_eq!(c.parse_version("GNU gdb (X) 1.99999999\n"), None);
    }
}
