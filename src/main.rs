//! gdbmi-engine
//!
//! Runs one GDB session driven by line commands on stdin and reports
//! every engine event as a JSON line on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use gdbmi_engine::gdb::{EngineConfig, GdbSession, SessionCommand, StartMode};
use std::io::BufRead;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gdbmi-engine", version)]
#[command(about = "Drive a GDB/MI session from stdin commands, reporting events as JSON lines")]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debugger executable, overriding the configuration
    #[arg(long, value_name = "PATH")]
    gdb: Option<String>,

    /// Attach to a running process
    #[arg(long, value_name = "PID", conflicts_with_all = ["core", "remote", "program"])]
    attach: Option<u64>,

    /// Load a core file for the executable
    #[arg(
        long,
        num_args = 2,
        value_names = ["CORE", "EXE"],
        conflicts_with_all = ["remote", "program"]
    )]
    core: Option<Vec<String>>,

    /// Connect to a remote target for the executable
    #[arg(
        long,
        num_args = 2,
        value_names = ["TARGET", "EXE"],
        conflicts_with = "program"
    )]
    remote: Option<Vec<String>>,

    /// Executable to run, followed by its arguments
    #[arg(value_name = "EXE", trailing_var_arg = true, allow_hyphen_values = true)]
    program: Vec<String>,
}

impl Cli {
    /// Build the engine configuration. Command line options win over the
    /// configuration file.
    fn into_config(self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(path) = self.gdb {
            config.gdb_path = path;
        }

        let start_mode = if let Some(pid) = self.attach {
            Some(StartMode::Attach {
                pid,
                executable: None,
            })
        } else if let Some([core_file, executable]) = self.core.map(pair) {
            Some(StartMode::Core {
                core_file,
                executable,
            })
        } else if let Some([target, executable]) = self.remote.map(pair) {
            Some(StartMode::Remote {
                target,
                executable: Some(executable),
            })
        } else {
            let mut program = self.program.into_iter();
            program.next().map(|executable| StartMode::Plain {
                executable,
                args: program.collect(),
            })
        };
        if let Some(mode) = start_mode {
            config.start_mode = mode;
        }
        Ok(config)
    }
}

/// Split a two-valued option; clap guarantees the count.
fn pair(values: Vec<String>) -> [String; 2] {
    let mut values = values.into_iter();
    [
        values.next().unwrap_or_default(),
        values.next().unwrap_or_default(),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config()?;

    info!("Starting gdbmi-engine v{}", env!("CARGO_PKG_VERSION"));

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let session = GdbSession::new(config, event_tx)?;

    // A blocked stdin read must not keep the runtime alive at exit
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Error reading from stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line);
            match SessionCommand::parse(&line) {
                Ok(command) => {
                    if command_tx.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }
    });

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = event_rx.recv().await {
            let line = serde_json::to_string(&event)?;
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    session.run(command_rx).await?;
    printer.await??;

    info!("gdbmi-engine shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<EngineConfig> {
        let args = std::iter::once("gdbmi-engine").chain(args.iter().copied());
        Cli::try_parse_from(args)?.into_config()
    }

    #[test]
    fn test_plain_executable_with_arguments() {
        let config = parse(&["--gdb", "gdb-multiarch", "./app", "--verbose", "x"]).unwrap();
        assert_eq!(config.gdb_path, "gdb-multiarch");
        assert_eq!(
            config.start_mode,
            StartMode::Plain {
                executable: "./app".to_string(),
                args: vec!["--verbose".to_string(), "x".to_string()],
            }
        );
    }

    #[test]
    fn test_start_modes() {
        let config = parse(&["--attach", "1234"]).unwrap();
        assert_eq!(
            config.start_mode,
            StartMode::Attach {
                pid: 1234,
                executable: None
            }
        );

        let config = parse(&["--core", "core.1", "app"]).unwrap();
        assert_eq!(
            config.start_mode,
            StartMode::Core {
                core_file: "core.1".to_string(),
                executable: "app".to_string(),
            }
        );

        let config = parse(&["--remote", "localhost:3333", "fw.elf"]).unwrap();
        assert_eq!(
            config.start_mode,
            StartMode::Remote {
                target: "localhost:3333".to_string(),
                executable: Some("fw.elf".to_string()),
            }
        );
    }

    #[test]
    fn test_no_start_mode_keeps_default() {
        let config = parse(&["--gdb", "/opt/gdb"]).unwrap();
        assert_eq!(config.gdb_path, "/opt/gdb");
        assert_eq!(config.start_mode, EngineConfig::default().start_mode);
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse(&["--attach", "abc"]).is_err());
        assert!(parse(&["--core", "core.1"]).is_err());
        assert!(parse(&["--attach", "1", "--remote", "host:1", "fw.elf"]).is_err());
        assert!(parse(&["--attach", "1", "./app"]).is_err());
        assert!(parse(&["--config", "/nonexistent/gdbmi.json", "./app"]).is_err());
    }

    #[test]
    fn test_help_and_version() {
        let err = Cli::try_parse_from(["gdbmi-engine", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        let err = Cli::try_parse_from(["gdbmi-engine", "--version"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }
}
