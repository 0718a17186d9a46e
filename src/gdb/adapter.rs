//! Boundaries of the engine: the transport below and the consumer above

use crate::gdb::state::DebuggerState;
use crate::gdb::types::*;
use crate::gdb::value::MiValue;
use tokio::sync::mpsc::UnboundedSender;

/// Transport to the debugger process.
///
/// Calls return immediately. Outcomes are reported back through the
/// engine's `handle_adapter_*` methods by whoever drives the transport.
pub trait Adapter {
    /// Spawn the debugger process.
    fn start_adapter(&mut self);
    /// Write one complete command line, terminator included.
    fn write(&mut self, data: &[u8]);
    /// Interrupt the running inferior.
    fn interrupt_inferior(&mut self);
    /// Reap or kill the debugger process.
    fn shutdown(&mut self);
}

/// Consumer of everything the engine reports.
///
/// All methods default to doing nothing so consumers implement only what
/// they display.
pub trait EngineObserver {
    fn state_changed(&mut self, _from: DebuggerState, _to: DebuggerState) {}
    fn status_message(&mut self, _text: &str, _timeout_ms: Option<u64>) {}
    fn show_message(&mut self, _severity: Severity, _title: &str, _text: &str) {}
    fn output(&mut self, _channel: OutputChannel, _text: &str) {}
    fn rebuild_model(&mut self) {}
    fn inferior_stopped(&mut self, _reason: &StopReason, _frame: Option<&Frame>, _thread_id: Option<&str>) {}
    fn frames_updated(&mut self, _frames: &[Frame]) {}
    fn threads_updated(&mut self, _ids: &[String], _current: Option<&str>) {}
    fn registers_updated(&mut self, _registers: &[Register]) {}
    fn breakpoints_changed(&mut self, _breakpoints: &[Breakpoint]) {}
    fn notify(&mut self, _notification: Notification) {}
    fn command_result(&mut self, _id: u64, _class: ResultClass, _data: &MiValue) {}
}

/// Anything that can collect [`EngineEvent`]s observes the engine by
/// turning each callback into an event.
pub trait EventSink {
    fn push_event(&mut self, event: EngineEvent);
}

impl EventSink for Vec<EngineEvent> {
    fn push_event(&mut self, event: EngineEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<EngineEvent> {
    fn push_event(&mut self, event: EngineEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.send(event);
    }
}

impl<S: EventSink> EngineObserver for S {
    fn state_changed(&mut self, from: DebuggerState, to: DebuggerState) {
        self.push_event(EngineEvent::StateChanged { from, to });
    }

    fn status_message(&mut self, text: &str, timeout_ms: Option<u64>) {
        self.push_event(EngineEvent::Status {
            text: text.to_string(),
            timeout_ms,
        });
    }

    fn show_message(&mut self, severity: Severity, title: &str, text: &str) {
        self.push_event(EngineEvent::Message {
            severity,
            title: title.to_string(),
            text: text.to_string(),
        });
    }

    fn output(&mut self, channel: OutputChannel, text: &str) {
        self.push_event(EngineEvent::Output {
            channel,
            text: text.to_string(),
        });
    }

    fn rebuild_model(&mut self) {
        self.push_event(EngineEvent::RebuildModel);
    }

    fn inferior_stopped(&mut self, reason: &StopReason, frame: Option<&Frame>, thread_id: Option<&str>) {
        self.push_event(EngineEvent::Stopped {
            reason: reason.clone(),
            frame: frame.cloned(),
            thread_id: thread_id.map(str::to_string),
        });
    }

    fn frames_updated(&mut self, frames: &[Frame]) {
        self.push_event(EngineEvent::Frames {
            frames: frames.to_vec(),
        });
    }

    fn threads_updated(&mut self, ids: &[String], current: Option<&str>) {
        self.push_event(EngineEvent::Threads {
            ids: ids.to_vec(),
            current: current.map(str::to_string),
        });
    }

    fn registers_updated(&mut self, registers: &[Register]) {
        self.push_event(EngineEvent::Registers {
            registers: registers.to_vec(),
        });
    }

    fn breakpoints_changed(&mut self, breakpoints: &[Breakpoint]) {
        self.push_event(EngineEvent::Breakpoints {
            breakpoints: breakpoints.to_vec(),
        });
    }

    fn notify(&mut self, notification: Notification) {
        self.push_event(EngineEvent::Notification(notification));
    }

    fn command_result(&mut self, id: u64, class: ResultClass, data: &MiValue) {
        self.push_event(EngineEvent::CommandResult {
            id,
            class,
            data: data.clone(),
        });
    }
}
