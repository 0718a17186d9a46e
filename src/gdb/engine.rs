//! GDB/MI engine
//!
//! Owns the framer, ledger, hold queue and lifecycle state of one debugger
//! session. Everything runs on the caller's thread: the transport hands
//! over raw bytes with [`GdbEngine::feed`] and reports lifecycle outcomes
//! through the `handle_*` methods; the engine answers through its
//! [`Adapter`] and [`EngineObserver`].

use crate::gdb::adapter::{Adapter, EngineObserver};
use crate::gdb::config::{EngineConfig, StartMode};
use crate::gdb::error::{EngineError, Result};
use crate::gdb::events::{EventClassifier, StepDecision, StopKind};
use crate::gdb::framer::LineFramer;
use crate::gdb::ledger::{
    Callback, CommandFlags, CommandLedger, Continuation, GdbCommand, Resolution,
};
use crate::gdb::parser::{
    field_names, parse_breakpoint, parse_breakpoint_list, parse_frame, parse_line,
    parse_register_names, parse_register_values, parse_stack_frames, parse_thread_ids, MiRecord,
};
use crate::gdb::state::DebuggerState::{self, *};
use crate::gdb::types::*;
use crate::gdb::value::MiValue;
use std::collections::VecDeque;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Settings applied once the inferior is prepared, before user init commands.
const SETUP_COMMANDS: &[&str] = &[
    "-gdb-set mi-async on",
    "-gdb-set pagination off",
    "-gdb-set confirm off",
    "set print static-members off",
    "set print inferior-events 1",
    "set breakpoint pending on",
    "set print elements 10000",
    "set overload-resolution off",
    "handle SIGSEGV nopass stop print",
    "set unwindonsignal on",
    "set width 0",
    "set height 0",
];

/// Stream text collected between two result records
#[derive(Debug, Default)]
struct StreamOutput {
    console: String,
    target: String,
    log: String,
}

impl StreamOutput {
    /// Move the collected text into a result payload.
    fn attach_to(&mut self, data: &mut MiValue) {
        let streams = [
            ("logstreamoutput", std::mem::take(&mut self.log)),
            ("targetstreamoutput", std::mem::take(&mut self.target)),
            ("consolestreamoutput", std::mem::take(&mut self.console)),
        ];
        for (name, text) in streams {
            if !text.is_empty() {
                data.push_child(name, MiValue::Const(text));
            }
        }
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// One debugger session
pub struct GdbEngine<A: Adapter, O: EngineObserver> {
    session_id: Uuid,
    config: EngineConfig,
    classifier: EventClassifier,
    adapter: A,
    observer: O,
    state: DebuggerState,
    framer: LineFramer,
    ledger: CommandLedger,
    hold_queue: VecDeque<GdbCommand>,
    streams: StreamOutput,
    inferior_pid: Option<u64>,
    gdb_version: Option<GdbVersion>,
    register_names: Vec<String>,
    current_thread: Option<String>,
    auto_steps: u32,
}

impl<A: Adapter, O: EngineObserver> GdbEngine<A, O> {
    pub fn new(config: EngineConfig, adapter: A, observer: O) -> Result<Self> {
        let classifier = EventClassifier::new(&config.quirks, &config.frame_skip)?;
        Ok(Self {
            session_id: Uuid::new_v4(),
            config,
            classifier,
            adapter,
            observer,
            state: NotReady,
            framer: LineFramer::new(),
            ledger: CommandLedger::new(),
            hold_queue: VecDeque::new(),
            streams: StreamOutput::default(),
            inferior_pid: None,
            gdb_version: None,
            register_names: Vec::new(),
            current_thread: None,
            auto_steps: 0,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> DebuggerState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn ledger(&self) -> &CommandLedger {
        &self.ledger
    }

    pub fn queued_commands(&self) -> usize {
        self.hold_queue.len()
    }

    pub fn inferior_pid(&self) -> Option<u64> {
        self.inferior_pid
    }

    pub fn gdb_version(&self) -> Option<GdbVersion> {
        self.gdb_version
    }

    pub fn current_thread(&self) -> Option<&str> {
        self.current_thread.as_deref()
    }

    fn set_state(&mut self, to: DebuggerState) -> bool {
        let from = self.state;
        if from == to {
            return true;
        }
        if !from.can_transition_to(to) {
            let err = EngineError::InvalidTransition { from, to };
            error!("{}", err);
            debug_assert!(false, "{}", err);
            return false;
        }
        debug!("State: {} -> {}", from, to);
        self.state = to;
        self.observer.state_changed(from, to);
        true
    }

    fn status(&mut self, text: &str, timeout_ms: Option<u64>) {
        self.observer.status_message(text, timeout_ms);
    }

    // ---------------------------------------------------------------------
    // Command dispatch
    // ---------------------------------------------------------------------

    /// Post a command. Returns immediately after sending, queuing or
    /// dropping it.
    pub fn post_command(
        &mut self,
        command: impl Into<String>,
        flags: CommandFlags,
        callback: Callback,
        cookie: Cookie,
    ) {
        let command = GdbCommand::new(command, flags, callback, cookie);
        if !self.state.accepts_commands() {
            debug!(
                "No gdb process running, ignoring command {} in state {}",
                command.command, self.state
            );
            return;
        }

        if command.flags.contains(CommandFlags::NEEDS_STOP) && self.inferior_may_execute() {
            debug!("Queueing {} until the inferior stops", command.command);
            self.hold_queue.push_back(command);
            if self.state == InferiorRunning {
                self.status("Stopping temporarily.", Some(1000));
                self.interrupt_inferior();
            }
            return;
        }

        if command.command.is_empty() {
            return;
        }
        self.flush_command(command);
    }

    /// Whether a command needing a stopped inferior has to wait. Attaching,
    /// loading a core file and connecting to a remote target all end with
    /// the inferior stopped, so only a plain start may be executing while
    /// it is still starting.
    fn inferior_may_execute(&self) -> bool {
        match self.state {
            InferiorStarting => matches!(self.config.start_mode, StartMode::Plain { .. }),
            state => state.may_be_running(),
        }
    }

    /// Post a command on behalf of an outside caller; the result comes back
    /// through [`EngineObserver::command_result`] with `id`.
    pub fn execute_command(&mut self, id: u64, command: &str) {
        self.post_command(
            command,
            CommandFlags::DISCARDABLE,
            Callback::Client(id),
            Cookie::Number(id as i64),
        );
    }

    fn flush_command(&mut self, command: GdbCommand) {
        if !self.state.accepts_commands() {
            debug!("Dropping {} in state {}", command.command, self.state);
            return;
        }
        let wire = self.ledger.record(command).wire_text();
        debug!("Sending command: {}", wire);
        self.observer.output(OutputChannel::Input, &wire);
        let mut line = wire.into_bytes();
        line.extend_from_slice(b"\r\n");
        self.adapter.write(&line);
    }

    /// Make results of everything issued so far stale. Callers check the
    /// ledger first, so a failure here is an engine bug.
    fn set_token_barrier(&mut self) {
        if let Err(err) = self.ledger.barrier() {
            error!("{}", err);
            debug_assert!(false, "{}", err);
            return;
        }
        let text = format!("--- token barrier ({}) ---", self.ledger.oldest_acceptable());
        self.observer.output(OutputChannel::Misc, &text);
    }

    // ---------------------------------------------------------------------
    // Input
    // ---------------------------------------------------------------------

    /// Feed raw bytes read from the debugger's stdout.
    pub fn feed(&mut self, chunk: &[u8]) {
        for line in self.framer.push(chunk) {
            if self.state == NotReady {
                debug!("Dropping output, no session: {}", String::from_utf8_lossy(&line));
                continue;
            }
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &[u8]) {
        trace!("GDB output: {}", String::from_utf8_lossy(line));
        let Some(record) = parse_line(line) else {
            return;
        };
        match record {
            MiRecord::Async {
                kind, class, data, ..
            } => self.handle_async(kind, &class, data),
            MiRecord::Result { token, class, data } => self.handle_result(token, class, data),
            MiRecord::Console(text) => self.handle_console(text),
            MiRecord::Target(text) => {
                self.observer.output(OutputChannel::Target, &text);
                self.streams.target.push_str(&text);
            }
            MiRecord::Log(text) => self.handle_log(text),
            MiRecord::Unknown(text) => warn!("Unknown response type: {}", text),
        }
    }

    fn handle_console(&mut self, text: String) {
        let hints = self.classifier.scan_console(&text);
        if self.inferior_pid.is_none() {
            if let Some(pid) = hints.pid {
                self.maybe_handle_inferior_pid_changed(pid);
            }
        }
        if let Some(status) = hints.status {
            self.status(&status, Some(1000));
        }
        self.observer.output(OutputChannel::Console, &text);
        self.streams.console.push_str(&text);
    }

    fn handle_log(&mut self, text: String) {
        if let Some(rest) = text.strip_prefix(self.config.quirks.warning_prefix.as_str()) {
            self.observer.notify(Notification::Warning {
                text: rest.trim().to_string(),
            });
        }
        self.observer.output(OutputChannel::Log, &text);
        self.streams.log.push_str(&text);
    }

    fn maybe_handle_inferior_pid_changed(&mut self, pid: u64) {
        if pid == 0 {
            debug!("Cannot parse PID");
            return;
        }
        if self.inferior_pid == Some(pid) {
            return;
        }
        info!("Session {}: inferior pid {}", self.session_id, pid);
        self.inferior_pid = Some(pid);
        self.observer.notify(Notification::InferiorPid { pid });
    }

    fn handle_async(&mut self, kind: AsyncKind, class: &str, data: MiValue) {
        match (kind, class) {
            (AsyncKind::Exec, "stopped") => self.handle_stop_record(data),
            (AsyncKind::Exec, "running") => {
                if self.state == InferiorRunningRequested {
                    self.set_state(InferiorRunning);
                }
            }
            (AsyncKind::Notify, _) => {
                if let Some(notification) = self.classifier.classify_notify(class, &data) {
                    self.handle_notification(notification);
                } else if !self.classifier.is_ignored_async_class(class) {
                    debug!(
                        "Ignoring async notification {} with fields {:?}",
                        class,
                        field_names(&data)
                    );
                }
            }
            _ => {
                if !self.classifier.is_ignored_async_class(class) {
                    debug!("Ignoring async record {:?} {}", kind, class);
                }
            }
        }
    }

    fn handle_notification(&mut self, notification: Notification) {
        match &notification {
            Notification::InferiorPid { pid } => {
                self.maybe_handle_inferior_pid_changed(*pid);
                return;
            }
            Notification::LibraryLoaded { id } => {
                self.status(&format!("Library {} loaded.", id), Some(1000));
            }
            Notification::LibraryUnloaded { id } => {
                self.status(&format!("Library {} unloaded.", id), Some(1000));
            }
            Notification::ThreadGroupCreated { id } => {
                self.status(&format!("Thread group {} created.", id), Some(1000));
            }
            Notification::ThreadGroupExited { id } => {
                self.status(&format!("Thread group {} exited.", id), Some(1000));
            }
            Notification::ThreadCreated { id, .. } => {
                self.status(&format!("Thread {} created.", id), Some(1000));
            }
            Notification::ThreadExited { id, .. } => {
                self.status(&format!("Thread {} exited.", id), Some(1000));
            }
            Notification::ThreadSelected { id } => {
                self.current_thread = Some(id.clone());
            }
            _ => {}
        }
        self.observer.notify(notification);
    }

    // ---------------------------------------------------------------------
    // Result records
    // ---------------------------------------------------------------------

    fn handle_result(&mut self, token: Option<u64>, class: ResultClass, mut data: MiValue) {
        if class == ResultClass::Running {
            if self.state.can_transition_to(InferiorRunning) {
                self.set_state(InferiorRunning);
                self.status("Running...", None);
            } else if self.state != InferiorRunning {
                warn!("Running result in state {}", self.state);
            }
            if self.state == InferiorRunning && !self.hold_queue.is_empty() {
                self.status("Stopping temporarily.", Some(1000));
                self.interrupt_inferior();
            }
        }

        self.streams.attach_to(&mut data);

        let Some(token) = token else {
            debug!("Ignoring result without token");
            return;
        };
        let response = GdbResponse {
            token: Some(token),
            class,
            data,
            cookie: Cookie::None,
        };
        self.resolve(token, response);
    }

    fn resolve(&mut self, token: u64, mut response: GdbResponse) {
        match self.ledger.resolve(token) {
            Resolution::Unknown => {
                debug!("Cookie for token {} already eaten (state {})", token, self.state);
                if response.class == ResultClass::Error {
                    self.handle_orphaned_error(response.error_message().to_string());
                }
                return;
            }
            Resolution::Discarded(command) => {
                if self.ledger.complete(&command) {
                    self.observer.rebuild_model();
                }
            }
            Resolution::Deliver(command) => {
                debug!("Result for {} after {:?}", command, command.posted_at.elapsed());
                response.cookie = command.cookie.clone();
                self.dispatch(command.callback, &response);
                if self.ledger.complete(&command) {
                    self.observer.rebuild_model();
                }
            }
        }

        if let Some(continuation) = self.ledger.take_continuation() {
            self.run_continuation(continuation);
        }
    }

    /// An error for a token nobody waits for. A few messages tell us
    /// something about the inferior's real state.
    fn handle_orphaned_error(&mut self, msg: String) {
        self.observer
            .show_message(Severity::Critical, "Executable failed", &msg);
        self.status(&format!("Executable failed: {}", msg), None);
        if msg == self.config.quirks.generic_error_message {
            self.shutdown();
        } else if msg == self.config.quirks.outermost_frame_message {
            self.force_stopped();
        }
    }

    fn dispatch(&mut self, callback: Callback, response: &GdbResponse) {
        match callback {
            Callback::None => {}
            Callback::PrepareInferior => self.handle_prepare_inferior(response),
            Callback::StartInferior => self.handle_start_inferior(response),
            Callback::ExecContinue => self.handle_exec_continue(response),
            Callback::ShowVersion => self.handle_show_version(response),
            Callback::RegisterNames => self.handle_register_names(response),
            Callback::RegisterValues => self.handle_register_values(response),
            Callback::StackFrames => self.handle_stack_frames(response),
            Callback::ForcedStop => self.handle_forced_stop(response),
            Callback::ThreadIds => self.handle_thread_ids(response),
            Callback::BreakList => self.handle_break_list(response),
            Callback::BreakInsert => self.handle_break_insert(response),
            Callback::Kill => self.handle_kill(response),
            Callback::Detach => self.handle_detach(response),
            Callback::GdbExit => self.handle_gdb_exit(response),
            Callback::Client(id) => {
                self.observer
                    .command_result(id, response.class, &response.data)
            }
        }
    }

    fn run_continuation(&mut self, continuation: Continuation) {
        debug!("Running continuation {:?}", continuation);
        match continuation {
            Continuation::StartInferior => self.start_inferior(),
            Continuation::ContinueInferior => {
                self.status("Continuing after temporary stop.", Some(1000));
                if let Err(err) = self.continue_inferior() {
                    warn!("Cannot continue after temporary stop: {}", err);
                }
            }
        }
    }

    fn handle_exec_continue(&mut self, response: &GdbResponse) {
        match response.class {
            ResultClass::Running => {
                if self.state != InferiorRunning {
                    warn!("Inferior reported running in state {}", self.state);
                }
            }
            ResultClass::Error => {
                let msg = response.error_message();
                let quirks = &self.config.quirks;
                if msg.starts_with(&quirks.no_function_bounds_message)
                    || msg == quirks.outermost_frame_message
                {
                    debug!("Execution refused, inferior still stopped: {}", msg);
                    self.force_stopped();
                    self.status(&format!("Stopped: {}", msg), Some(5000));
                } else {
                    let text = format!("Cannot continue debugged process:\n{}", msg);
                    self.observer
                        .show_message(Severity::Critical, "Execution Error", &text);
                    self.shutdown();
                }
            }
            _ => {}
        }
    }

    fn handle_show_version(&mut self, response: &GdbResponse) {
        let banner = response.data.find_child("consolestreamoutput").data();
        match self.classifier.parse_version(banner) {
            Some(version) => {
                info!(
                    "Using gdb version {} (build {:?})",
                    version.version, version.build
                );
                self.gdb_version = Some(version);
            }
            None => debug!("Unable to parse gdb version from {:?}", banner),
        }
    }

    fn handle_register_names(&mut self, response: &GdbResponse) {
        if response.class == ResultClass::Done {
            self.register_names = parse_register_names(&response.data);
        }
    }

    fn handle_register_values(&mut self, response: &GdbResponse) {
        if response.class == ResultClass::Done {
            let registers = parse_register_values(&response.data, &self.register_names);
            self.observer.registers_updated(&registers);
        }
    }

    fn handle_stack_frames(&mut self, response: &GdbResponse) {
        match response.class {
            ResultClass::Done => {
                let frames = parse_stack_frames(&response.data);
                self.observer.frames_updated(&frames);
            }
            _ => debug!("Stack listing failed: {}", response.error_message()),
        }
    }

    fn handle_thread_ids(&mut self, response: &GdbResponse) {
        if response.class != ResultClass::Done {
            return;
        }
        let (ids, current) = parse_thread_ids(&response.data);
        if current.is_some() {
            self.current_thread = current.clone();
        }
        self.observer.threads_updated(&ids, current.as_deref());
    }

    fn handle_break_list(&mut self, response: &GdbResponse) {
        if response.class == ResultClass::Done {
            let breakpoints = parse_breakpoint_list(&response.data);
            self.observer.breakpoints_changed(&breakpoints);
        }
    }

    fn handle_break_insert(&mut self, response: &GdbResponse) {
        match response.class {
            ResultClass::Done => {
                if let Some(breakpoint) = parse_breakpoint(response.data.find_child("bkpt")) {
                    self.observer
                        .notify(Notification::BreakpointCreated { breakpoint });
                }
            }
            _ => {
                let text = format!("Setting breakpoint failed: {}", response.error_message());
                warn!("{}", text);
                self.status(&text, Some(5000));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Stops
    // ---------------------------------------------------------------------

    fn handle_stop_record(&mut self, data: MiValue) {
        match self.classifier.classify_stop(&data) {
            StopKind::Exited { message } => {
                self.status(&message, None);
                self.handle_inferior_exited();
            }
            _ if !self.hold_queue.is_empty() => self.handle_temporary_stop(),
            StopKind::Genuine(reason) => self.handle_genuine_stop(reason, &data),
            StopKind::Unrecognized(reason) => {
                debug!("Stopped for unknown reason {:?}, asking for the frame", reason);
                self.post_command(
                    "-stack-info-frame",
                    CommandFlags::NONE,
                    Callback::ForcedStop,
                    Cookie::Text(reason),
                );
            }
        }
    }

    fn handle_inferior_exited(&mut self) {
        if self.state.has_live_inferior() {
            self.set_state(InferiorShuttingDown);
            self.set_state(InferiorShutDown);
        } else {
            warn!("Inferior exited in state {}", self.state);
        }
        self.shutdown();
    }

    /// The interrupt requested for queued commands has landed: send them,
    /// then resume once their results are in.
    fn handle_temporary_stop(&mut self) {
        info!("Temporary stop, flushing {} queued commands", self.hold_queue.len());
        self.force_stopped();
        self.status("Processing queued commands.", Some(1000));
        while let Some(command) = self.hold_queue.pop_front() {
            debug!("Running queued command {}", command.command);
            self.flush_command(command);
        }
        if self.ledger.is_empty() {
            self.run_continuation(Continuation::ContinueInferior);
        } else if let Err(err) = self.ledger.set_continuation(Continuation::ContinueInferior) {
            error!("{}", err);
        }
    }

    /// Settle the state machine on `InferiorStopped` from wherever it is.
    fn force_stopped(&mut self) {
        match self.state {
            InferiorRunning => {
                self.set_state(InferiorStopping);
                self.set_state(InferiorStopped);
            }
            InferiorStopping | InferiorRunningRequested | InferiorStarting => {
                self.set_state(InferiorStopped);
            }
            InferiorStopped => {}
            other => warn!("Cannot settle on a stop in state {}", other),
        }
    }

    fn handle_genuine_stop(&mut self, reason: StopReason, data: &MiValue) {
        if reason.is_stepping_completion() && self.config.skip_known_frames {
            match self.classifier.step_decision(data.find_child("frame")) {
                StepDecision::Settle => {}
                decision if self.auto_steps < self.config.max_auto_steps => {
                    self.auto_steps += 1;
                    debug!("Skipping frame ({:?}), automatic step {}", decision, self.auto_steps);
                    self.force_stopped();
                    let (command, text) = match decision {
                        StepDecision::StepOut => ("-exec-finish", "Leaving frame..."),
                        _ => ("-exec-step", "Skipping frame..."),
                    };
                    match self.exec(command, text) {
                        Ok(()) => return,
                        Err(err) => warn!("Automatic step failed: {}", err),
                    }
                }
                _ => warn!(
                    "Giving up skipping frames after {} automatic steps",
                    self.auto_steps
                ),
            }
        }
        self.auto_steps = 0;
        self.handle_stop(reason, data);
    }

    fn handle_stop(&mut self, reason: StopReason, data: &MiValue) {
        if reason == StopReason::SignalReceived && self.config.use_message_box_for_signals {
            if let Some((name, meaning)) = self.classifier.interesting_signal(data) {
                let text = format!(
                    "The inferior stopped because it received a signal from the operating system.\n\nSignal name: {}\nSignal meaning: {}",
                    name, meaning
                );
                self.observer
                    .show_message(Severity::Information, "Signal received", &text);
            }
        }

        let text = match data.find_child("reason").data() {
            "" => "Stopped.".to_string(),
            reason => format!("Stopped: \"{}\"", reason),
        };
        self.status(&text, None);
        self.force_stopped();

        let frame = parse_frame(data.find_child("frame"));
        if let Some(thread_id) = data.find_str("thread-id") {
            self.current_thread = Some(thread_id.to_string());
        }
        self.observer
            .inferior_stopped(&reason, frame.as_ref(), data.find_str("thread-id"));
        self.reload_after_stop(reason == StopReason::BreakpointHit);
    }

    /// Result of the `-stack-info-frame` round trip after an unrecognized stop.
    fn handle_forced_stop(&mut self, response: &GdbResponse) {
        let reason = match &response.cookie {
            Cookie::Text(reason) => StopReason::Other(reason.clone()),
            _ => StopReason::Unspecified,
        };
        self.status("Stopped.", None);
        self.force_stopped();
        if response.class != ResultClass::Done {
            debug!("No frame after unknown stop: {}", response.error_message());
        }
        let frame = parse_frame(response.data.find_child("frame"));
        let thread_id = self.current_thread.clone();
        self.observer
            .inferior_stopped(&reason, frame.as_ref(), thread_id.as_deref());
        self.reload_after_stop(false);
    }

    fn reload_after_stop(&mut self, breakpoint_hit: bool) {
        if breakpoint_hit {
            self.post_command(
                "-break-list",
                CommandFlags::WATCH_UPDATE,
                Callback::BreakList,
                Cookie::None,
            );
        }
        self.reload_stack();
        if self.config.list_threads {
            self.post_command(
                "-thread-list-ids",
                CommandFlags::WATCH_UPDATE,
                Callback::ThreadIds,
                Cookie::None,
            );
        }
        if !self.register_names.is_empty() {
            self.post_command(
                "-data-list-register-values x",
                CommandFlags::WATCH_UPDATE,
                Callback::RegisterValues,
                Cookie::None,
            );
        }
    }

    fn reload_stack(&mut self) {
        let command = match self.config.max_stack_depth {
            Some(depth) => format!("-stack-list-frames 0 {}", depth),
            None => "-stack-list-frames".to_string(),
        };
        self.post_command(
            command,
            CommandFlags::WATCH_UPDATE,
            Callback::StackFrames,
            Cookie::None,
        );
    }

    // ---------------------------------------------------------------------
    // Execution control
    // ---------------------------------------------------------------------

    /// Execution commands need a stopped inferior and nothing outstanding
    /// that a token barrier would cut off.
    fn check_can_exec(&self) -> Result<()> {
        if self.state != InferiorStopped {
            return Err(EngineError::NotStopped(self.state));
        }
        self.ledger.check_barrier()
    }

    fn exec(&mut self, command: &str, status: &str) -> Result<()> {
        self.check_can_exec()?;
        self.set_token_barrier();
        self.set_state(InferiorRunningRequested);
        self.status(status, None);
        self.post_command(command, CommandFlags::NONE, Callback::ExecContinue, Cookie::None);
        Ok(())
    }

    fn user_exec(&mut self, command: &str, status: &str) -> Result<()> {
        self.auto_steps = 0;
        self.exec(command, status)
    }

    pub fn continue_inferior(&mut self) -> Result<()> {
        self.user_exec("-exec-continue", "Running requested...")
    }

    pub fn step_exec(&mut self) -> Result<()> {
        self.user_exec("-exec-step", "Step requested...")
    }

    pub fn step_i_exec(&mut self) -> Result<()> {
        self.user_exec("-exec-step-instruction", "Step by instruction requested...")
    }

    pub fn next_exec(&mut self) -> Result<()> {
        self.user_exec("-exec-next", "Step over requested...")
    }

    pub fn next_i_exec(&mut self) -> Result<()> {
        self.user_exec("-exec-next-instruction", "Step over by instruction requested...")
    }

    pub fn step_out_exec(&mut self) -> Result<()> {
        self.user_exec("-exec-finish", "Finish function requested...")
    }

    pub fn run_to_line_exec(&mut self, file: &str, line: u64) -> Result<()> {
        let command = format!("-exec-until {}:{}", file, line);
        self.user_exec(&command, &format!("Run to line {}:{} requested...", file, line))
    }

    pub fn run_to_function_exec(&mut self, function: &str) -> Result<()> {
        self.check_can_exec()?;
        self.set_token_barrier();
        self.post_command(
            format!("-break-insert -t {}", function),
            CommandFlags::NONE,
            Callback::None,
            Cookie::None,
        );
        self.user_exec(
            "-exec-continue",
            &format!("Run to function {} requested...", function),
        )
    }

    pub fn jump_to_line_exec(&mut self, file: &str, line: u64) -> Result<()> {
        self.check_can_exec()?;
        let location = format!("{}:{}", file, line);
        self.set_token_barrier();
        self.post_command(
            format!("-break-insert -t {}", location),
            CommandFlags::NONE,
            Callback::None,
            Cookie::None,
        );
        self.user_exec(
            &format!("jump {}", location),
            &format!("Jump to line {} requested...", location),
        )
    }

    /// Request a stop of the running inferior.
    pub fn interrupt_inferior(&mut self) {
        if self.state != InferiorRunning {
            debug!("Interrupt requested in state {}, ignoring", self.state);
            return;
        }
        self.set_state(InferiorStopping);
        self.status("Stop requested...", Some(5000));
        self.adapter.interrupt_inferior();
    }

    /// Insert a breakpoint, stopping the inferior temporarily if needed.
    pub fn insert_breakpoint(&mut self, location: &str) {
        self.post_command(
            format!("-break-insert {}", location),
            CommandFlags::NEEDS_STOP | CommandFlags::DISCARDABLE | CommandFlags::REBUILD_MODEL,
            Callback::BreakInsert,
            Cookie::Text(location.to_string()),
        );
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    pub fn start_debugger(&mut self) {
        if self.state != NotReady {
            warn!("Start requested in state {}", self.state);
            return;
        }
        self.reset_session();
        info!(
            "Starting gdb session {}: {}",
            self.session_id, self.config.gdb_path
        );
        self.set_state(EngineStarting);
        self.set_state(AdapterStarting);
        self.adapter.start_adapter();
    }

    fn reset_session(&mut self) {
        self.session_id = Uuid::new_v4();
        self.framer.clear();
        self.ledger = CommandLedger::new();
        self.hold_queue.clear();
        self.streams = StreamOutput::default();
        self.inferior_pid = None;
        self.gdb_version = None;
        self.register_names.clear();
        self.current_thread = None;
        self.auto_steps = 0;
    }

    pub fn handle_adapter_started(&mut self) {
        info!("Adapter started");
        if self.set_state(AdapterStarted) {
            self.prepare_inferior();
        }
    }

    pub fn handle_adapter_start_failed(&mut self, msg: &str) {
        error!("Adapter start failed: {}", msg);
        self.observer
            .show_message(Severity::Critical, "Adapter start failed", msg);
        self.shutdown();
    }

    fn prepare_inferior(&mut self) {
        self.set_state(InferiorPreparing);
        let mut commands = Vec::new();
        if let Some(executable) = self.config.start_mode.executable() {
            commands.push(format!("-file-exec-and-symbols {}", quote(executable)));
        }
        if let StartMode::Plain { args, .. } = &self.config.start_mode {
            if !args.is_empty() {
                commands.push(format!("-exec-arguments {}", args.join(" ")));
            }
        }

        let Some(last) = commands.len().checked_sub(1) else {
            self.handle_inferior_prepared();
            return;
        };
        for (i, command) in commands.into_iter().enumerate() {
            let callback = if i == last {
                Callback::PrepareInferior
            } else {
                Callback::None
            };
            self.post_command(command, CommandFlags::NONE, callback, Cookie::None);
        }
    }

    fn handle_prepare_inferior(&mut self, response: &GdbResponse) {
        match response.class {
            ResultClass::Done => self.handle_inferior_prepared(),
            _ => self.handle_inferior_preparation_failed(response.error_message()),
        }
    }

    pub fn handle_inferior_prepared(&mut self) {
        if !self.set_state(InferiorPrepared) {
            return;
        }
        for command in SETUP_COMMANDS {
            self.post_command(*command, CommandFlags::NONE, Callback::None, Cookie::None);
        }
        self.post_command(
            "show version",
            CommandFlags::NONE,
            Callback::ShowVersion,
            Cookie::None,
        );
        for command in self.config.init_commands.clone() {
            self.post_command(command, CommandFlags::NONE, Callback::None, Cookie::None);
        }
        self.post_command(
            "-data-list-register-names",
            CommandFlags::NONE,
            Callback::RegisterNames,
            Cookie::None,
        );
        for location in self.config.breakpoints.clone() {
            self.post_command(
                format!("-break-insert {}", location),
                CommandFlags::NONE,
                Callback::BreakInsert,
                Cookie::Text(location),
            );
        }
        if let Err(err) = self.ledger.set_continuation(Continuation::StartInferior) {
            error!("{}", err);
        }
    }

    pub fn handle_inferior_preparation_failed(&mut self, msg: &str) {
        error!("Inferior preparation failed: {}", msg);
        self.observer
            .show_message(Severity::Critical, "Failed to prepare inferior", msg);
        self.shutdown();
    }

    fn start_inferior(&mut self) {
        if self.state != InferiorPrepared {
            warn!("Cannot start inferior in state {}", self.state);
            return;
        }
        self.set_state(InferiorStarting);
        self.status("Starting inferior...", None);
        let command = match &self.config.start_mode {
            StartMode::Plain { .. } => "-exec-run".to_string(),
            StartMode::Attach { pid, .. } => format!("-target-attach {}", pid),
            StartMode::Core { core_file, .. } => format!("-target-select core {}", quote(core_file)),
            StartMode::Remote { target, .. } => format!("-target-select remote {}", target),
        };
        if matches!(self.config.start_mode, StartMode::Plain { .. }) {
            self.set_state(InferiorRunningRequested);
        }
        self.post_command(command, CommandFlags::NONE, Callback::StartInferior, Cookie::None);
    }

    fn handle_start_inferior(&mut self, response: &GdbResponse) {
        if response.class == ResultClass::Error {
            self.handle_inferior_start_failed(response.error_message());
            return;
        }
        match self.config.start_mode.clone() {
            // the running result already moved the state on
            StartMode::Plain { .. } => {}
            StartMode::Core { core_file, .. } => {
                let text = format!("Core file {} loaded.", core_file);
                if self.set_state(InferiorUnrunnable) {
                    self.status(&text, None);
                    self.reload_stack();
                }
            }
            StartMode::Attach { .. } | StartMode::Remote { .. } => {
                if self.state != InferiorStopped {
                    self.force_stopped();
                    self.reload_after_stop(false);
                }
                self.status("Attached.", Some(5000));
            }
        }
    }

    pub fn handle_inferior_start_failed(&mut self, msg: &str) {
        error!("Inferior start failed: {}", msg);
        self.observer
            .show_message(Severity::Critical, "Inferior start failed", msg);
        // nothing is running, so skip the kill and exit the debugger
        if self.state.can_transition_to(InferiorShuttingDown) {
            self.set_state(InferiorShuttingDown);
            self.set_state(InferiorShutDown);
        }
        self.shutdown();
    }

    /// Detach from a stopped inferior and end the session.
    pub fn detach_debugger(&mut self) -> Result<()> {
        if self.state != InferiorStopped {
            return Err(EngineError::NotStopped(self.state));
        }
        self.post_command("-target-detach", CommandFlags::NONE, Callback::Detach, Cookie::None);
        Ok(())
    }

    fn handle_detach(&mut self, response: &GdbResponse) {
        match response.class {
            ResultClass::Done => {
                self.status("Detached.", Some(5000));
                self.set_state(InferiorShuttingDown);
                self.set_state(InferiorShutDown);
                self.shutdown();
            }
            _ => {
                let msg = response.error_message();
                self.observer
                    .show_message(Severity::Warning, "Detach failed", msg);
            }
        }
    }

    pub fn exit_debugger(&mut self) {
        info!("Exit requested in state {}", self.state);
        self.shutdown();
    }

    /// Walk towards `NotReady`: kill a live inferior, then exit the debugger.
    ///
    /// Steps already in progress are left alone, so repeated calls are safe.
    pub fn shutdown(&mut self) {
        debug!("Initiating shutdown in state {}", self.state);
        self.hold_queue.clear();
        self.ledger.clear_continuation();
        self.auto_steps = 0;
        match self.state {
            NotReady | InferiorShuttingDown | AdapterShuttingDown => {}
            EngineStarting | AdapterStarting => {
                self.adapter.shutdown();
                self.set_state(NotReady);
            }
            state if state.has_live_inferior() => {
                self.set_state(InferiorShuttingDown);
                self.post_command("kill", CommandFlags::NONE, Callback::Kill, Cookie::None);
            }
            _ => {
                self.set_state(AdapterShuttingDown);
                self.post_command("-gdb-exit", CommandFlags::NONE, Callback::GdbExit, Cookie::None);
            }
        }
    }

    fn handle_kill(&mut self, response: &GdbResponse) {
        match response.class {
            ResultClass::Done => self.handle_inferior_shut_down(),
            _ => self.handle_inferior_shutdown_failed(response.error_message()),
        }
    }

    pub fn handle_inferior_shut_down(&mut self) {
        info!("Inferior shut down");
        if self.state == InferiorShuttingDown {
            self.set_state(InferiorShutDown);
        }
        self.shutdown();
    }

    pub fn handle_inferior_shutdown_failed(&mut self, msg: &str) {
        error!("Inferior shutdown failed: {}", msg);
        self.observer
            .show_message(Severity::Critical, "Inferior shutdown failed", msg);
        if self.state == InferiorShuttingDown {
            self.set_state(InferiorShutDown);
        }
        self.shutdown();
    }

    fn handle_gdb_exit(&mut self, response: &GdbResponse) {
        match response.class {
            ResultClass::Exit | ResultClass::Done => self.handle_adapter_shut_down(),
            _ => self.handle_adapter_shutdown_failed(response.error_message()),
        }
    }

    pub fn handle_adapter_shut_down(&mut self) {
        info!("Session {} finished", self.session_id);
        self.adapter.shutdown();
        self.set_state(NotReady);
    }

    pub fn handle_adapter_shutdown_failed(&mut self, msg: &str) {
        error!("Adapter shutdown failed: {}", msg);
        self.observer
            .show_message(Severity::Critical, "Adapter shutdown failed", msg);
        self.adapter.shutdown();
        self.set_state(NotReady);
    }

    /// The debugger process died. Nothing it said before can be trusted,
    /// so the remaining shutdown states are passed in one go.
    pub fn handle_adapter_crashed(&mut self, msg: &str) {
        error!("Adapter crashed: {}", msg);
        if self.state == NotReady {
            return;
        }
        self.observer
            .show_message(Severity::Critical, "Adapter crashed", msg);
        if self.state.has_live_inferior() {
            self.set_state(InferiorShuttingDown);
        }
        if self.state == InferiorShuttingDown {
            self.set_state(InferiorShutDown);
        }
        if self.state == InferiorShutDown {
            self.set_state(AdapterShuttingDown);
        }
        self.set_state(NotReady);
        self.hold_queue.clear();
        self.ledger = CommandLedger::new();
        self.adapter.shutdown();
    }
}
