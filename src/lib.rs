//! GDB/MI protocol engine
//!
//! Parses the debugger's machine-interface output, correlates results with
//! the commands that caused them and keeps the debugger lifecycle state.

pub mod gdb;
