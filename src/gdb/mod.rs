//! GDB (GNU Debugger) MI Interface Module

pub mod adapter;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod framer;
pub mod ledger;
pub mod parser;
pub mod state;
pub mod types;
pub mod value;

pub use adapter::{Adapter, EngineObserver, EventSink};
pub use client::{GdbSession, SessionCommand};
pub use config::{EngineConfig, StartMode};
pub use engine::GdbEngine;
pub use error::{EngineError, Result};
pub use state::DebuggerState;
pub use types::*;
pub use value::MiValue;
