//! GDB Client Implementation
//!
//! Drives a [`GdbEngine`] against a real debugger process: spawns gdb,
//! pumps its stdout into the engine and carries out the adapter requests
//! the engine makes. Everything runs on one task, so the engine needs no
//! locking.

use crate::gdb::adapter::{Adapter, EngineObserver};
use crate::gdb::config::EngineConfig;
use crate::gdb::engine::GdbEngine;
use crate::gdb::error::{EngineError, Result};
use crate::gdb::state::DebuggerState;
use crate::gdb::types::EngineEvent;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Time gdb gets to exit on its own before it is killed
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Work the engine asks of the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterRequest {
    Start,
    Write(Vec<u8>),
    Interrupt,
    Shutdown,
}

/// [`Adapter`] that queues requests for the session loop
#[derive(Debug, Clone)]
pub struct ProcessAdapter {
    requests: UnboundedSender<AdapterRequest>,
}

impl ProcessAdapter {
    pub fn new(requests: UnboundedSender<AdapterRequest>) -> Self {
        Self { requests }
    }

    fn request(&self, request: AdapterRequest) {
        if self.requests.send(request).is_err() {
            debug!("Session loop gone, dropping adapter request");
        }
    }
}

impl Adapter for ProcessAdapter {
    fn start_adapter(&mut self) {
        self.request(AdapterRequest::Start);
    }

    fn write(&mut self, data: &[u8]) {
        self.request(AdapterRequest::Write(data.to_vec()));
    }

    fn interrupt_inferior(&mut self) {
        self.request(AdapterRequest::Interrupt);
    }

    fn shutdown(&mut self) {
        self.request(AdapterRequest::Shutdown);
    }
}

/// A line of user input for a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Continue,
    Step,
    Next,
    StepInstruction,
    NextInstruction,
    Finish,
    Interrupt,
    Until { file: String, line: u64 },
    RunTo(String),
    Jump { file: String, line: u64 },
    Break(String),
    Detach,
    Quit,
    /// An MI command passed through verbatim
    Raw(String),
}

fn parse_location(text: &str) -> Option<(String, u64)> {
    let (file, line) = text.trim().rsplit_once(':')?;
    let line = line.parse().ok()?;
    if file.is_empty() {
        return None;
    }
    Some((file.to_string(), line))
}

impl SessionCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.starts_with('-') {
            return Ok(SessionCommand::Raw(line.to_string()));
        }
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let unknown = || EngineError::UnknownCommand(line.to_string());

        let command = match (verb, rest.is_empty()) {
            ("continue" | "c", true) => SessionCommand::Continue,
            ("step" | "s", true) => SessionCommand::Step,
            ("next" | "n", true) => SessionCommand::Next,
            ("stepi" | "si", true) => SessionCommand::StepInstruction,
            ("nexti" | "ni", true) => SessionCommand::NextInstruction,
            ("finish", true) => SessionCommand::Finish,
            ("interrupt", true) => SessionCommand::Interrupt,
            ("detach", true) => SessionCommand::Detach,
            ("quit" | "q", true) => SessionCommand::Quit,
            ("until", false) => {
                let (file, line) = parse_location(rest).ok_or_else(unknown)?;
                SessionCommand::Until { file, line }
            }
            ("jump", false) => {
                let (file, line) = parse_location(rest).ok_or_else(unknown)?;
                SessionCommand::Jump { file, line }
            }
            ("run-to", false) => SessionCommand::RunTo(rest.to_string()),
            ("break" | "b", false) => SessionCommand::Break(rest.to_string()),
            _ => return Err(unknown()),
        };
        Ok(command)
    }

    /// Carry the command out on `engine`. `request_id` tags the result of
    /// a raw command.
    pub fn apply<A: Adapter, O: EngineObserver>(
        self,
        engine: &mut GdbEngine<A, O>,
        request_id: u64,
    ) -> Result<()> {
        match self {
            SessionCommand::Continue => engine.continue_inferior(),
            SessionCommand::Step => engine.step_exec(),
            SessionCommand::Next => engine.next_exec(),
            SessionCommand::StepInstruction => engine.step_i_exec(),
            SessionCommand::NextInstruction => engine.next_i_exec(),
            SessionCommand::Finish => engine.step_out_exec(),
            SessionCommand::Until { file, line } => engine.run_to_line_exec(&file, line),
            SessionCommand::RunTo(function) => engine.run_to_function_exec(&function),
            SessionCommand::Jump { file, line } => engine.jump_to_line_exec(&file, line),
            SessionCommand::Detach => engine.detach_debugger(),
            SessionCommand::Interrupt => {
                engine.interrupt_inferior();
                Ok(())
            }
            SessionCommand::Break(location) => {
                engine.insert_breakpoint(&location);
                Ok(())
            }
            SessionCommand::Quit => {
                engine.exit_debugger();
                Ok(())
            }
            SessionCommand::Raw(text) => {
                engine.execute_command(request_id, &text);
                Ok(())
            }
        }
    }
}

/// Read the next chunk, or wait forever when there is no reader.
async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut [u8],
) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

enum Wakeup {
    Output(io::Result<usize>),
    Command(Option<SessionCommand>),
}

/// GDB session: one debugger process and the engine driving it
pub struct GdbSession {
    engine: GdbEngine<ProcessAdapter, UnboundedSender<EngineEvent>>,
    requests: UnboundedReceiver<AdapterRequest>,
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    next_request_id: u64,
}

impl GdbSession {
    /// Create a session reporting to `events`
    pub fn new(config: EngineConfig, events: UnboundedSender<EngineEvent>) -> Result<Self> {
        let (tx, requests) = mpsc::unbounded_channel();
        let engine = GdbEngine::new(config, ProcessAdapter::new(tx), events)?;
        Ok(Self {
            engine,
            requests,
            process: None,
            stdin: None,
            stdout: None,
            next_request_id: 0,
        })
    }

    pub fn engine(&self) -> &GdbEngine<ProcessAdapter, UnboundedSender<EngineEvent>> {
        &self.engine
    }

    /// Run until the engine is back in `NotReady`.
    ///
    /// When `commands` closes the session shuts down in order.
    pub async fn run(mut self, mut commands: UnboundedReceiver<SessionCommand>) -> Result<()> {
        self.engine.start_debugger();
        info!("Session {} starting", self.engine.session_id());

        let mut buf = vec![0u8; 8192];
        let mut commands_open = true;
        loop {
            self.process_requests().await;
            if self.engine.state() == DebuggerState::NotReady {
                break;
            }

            let mut stdout = self.stdout.take();
            let wakeup = tokio::select! {
                read = read_chunk(&mut stdout, &mut buf) => Wakeup::Output(read),
                command = commands.recv(), if commands_open => Wakeup::Command(command),
            };
            self.stdout = stdout;

            match wakeup {
                Wakeup::Output(Ok(0)) => {
                    info!("gdb closed its output");
                    self.stdout = None;
                    self.engine.handle_adapter_crashed("The gdb process exited unexpectedly.");
                }
                Wakeup::Output(Ok(n)) => self.engine.feed(&buf[..n]),
                Wakeup::Output(Err(err)) => {
                    error!("Error reading gdb output: {}", err);
                    self.stdout = None;
                    self.engine.handle_adapter_crashed(&err.to_string());
                }
                Wakeup::Command(Some(command)) => {
                    self.next_request_id += 1;
                    debug!("Session command {:?}", command);
                    if let Err(err) = command.apply(&mut self.engine, self.next_request_id) {
                        warn!("{}", err);
                    }
                }
                Wakeup::Command(None) => {
                    debug!("Command channel closed");
                    commands_open = false;
                    self.engine.exit_debugger();
                }
            }
        }

        // the engine may have stopped before asking for a reap
        self.reap().await;
        info!("Session {} finished", self.engine.session_id());
        Ok(())
    }

    /// Carry out everything the engine asked for, including requests made
    /// while handling earlier ones.
    async fn process_requests(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            match request {
                AdapterRequest::Start => match self.spawn() {
                    Ok(()) => self.engine.handle_adapter_started(),
                    Err(err) => self.engine.handle_adapter_start_failed(&err.to_string()),
                },
                AdapterRequest::Write(data) => {
                    if let Err(err) = self.write(&data).await {
                        error!("Error writing to gdb: {}", err);
                        self.engine.handle_adapter_crashed(&err.to_string());
                    }
                }
                AdapterRequest::Interrupt => {
                    if let Err(err) = self.write(b"-exec-interrupt\r\n").await {
                        warn!("Failed to interrupt inferior: {}", err);
                    }
                }
                AdapterRequest::Shutdown => self.reap().await,
            }
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let config = self.engine.config();
        info!("Starting GDB: {} {:?}", config.gdb_path, config.gdb_args);

        let mut process = Command::new(&config.gdb_path)
            .args(&config.gdb_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let missing = |name: &str| io::Error::new(io::ErrorKind::BrokenPipe, format!("Failed to get {}", name));
        let stdin = process.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = process.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = process.stderr.take().ok_or_else(|| missing("stderr"))?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("GDB stderr: {}", line);
            }
        });

        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.process = Some(process);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "gdb is not running"))?;
        stdin.write_all(data).await?;
        stdin.flush().await
    }

    async fn reap(&mut self) {
        self.stdin = None;
        let Some(mut process) = self.process.take() else {
            return;
        };
        match timeout(REAP_TIMEOUT, process.wait()).await {
            Ok(Ok(status)) => info!("gdb exited with {}", status),
            Ok(Err(err)) => warn!("Failed to wait for gdb: {}", err),
            Err(_) => {
                warn!("gdb did not exit, killing it");
                if let Err(err) = process.start_kill() {
                    warn!("Failed to kill gdb: {}", err);
                }
            }
        }
    }
}
