//! Command correlation
//!
//! Every command written to the debugger gets a fresh token and a ledger
//! entry; result records are matched back to their entry by token, in any
//! order.

use crate::gdb::error::{EngineError, Result};
use crate::gdb::types::Cookie;
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Instant;
use tracing::debug;

/// Execution flags of a command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CommandFlags(u8);

impl CommandFlags {
    pub const NONE: Self = Self(0);
    /// Must only be sent while the inferior is stopped
    pub const NEEDS_STOP: Self = Self(1);
    /// Result may be dropped once a barrier passes it
    pub const DISCARDABLE: Self = Self(1 << 1);
    /// Counts towards the pending-request total that gates model rebuilds
    pub const REBUILD_MODEL: Self = Self(1 << 2);
    /// Substitute the command's own token for [`TOKEN_PLACEHOLDER`]
    pub const EMBED_TOKEN: Self = Self(1 << 3);
    /// Refresh of a view that is rebuilt from scratch on the next stop
    pub const WATCH_UPDATE: Self = Self(Self::DISCARDABLE.0 | Self::REBUILD_MODEL.0);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CommandFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CommandFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

pub const TOKEN_PLACEHOLDER: &str = "{token}";

/// Which handler receives a command's result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    None,
    PrepareInferior,
    StartInferior,
    ExecContinue,
    ShowVersion,
    RegisterNames,
    RegisterValues,
    StackFrames,
    ForcedStop,
    ThreadIds,
    BreakList,
    BreakInsert,
    Kill,
    Detach,
    GdbExit,
    /// A command posted by an outside caller, identified by its request id
    Client(u64),
}

impl Callback {
    pub fn is_none(self) -> bool {
        self == Callback::None
    }
}

/// Deferred engine operation run once the ledger drains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    StartInferior,
    ContinueInferior,
}

/// One in-flight request
#[derive(Debug, Clone)]
pub struct GdbCommand {
    /// Zero until the command is flushed
    pub token: u64,
    pub command: String,
    pub flags: CommandFlags,
    pub callback: Callback,
    pub cookie: Cookie,
    pub posted_at: Instant,
}

impl GdbCommand {
    pub fn new(
        command: impl Into<String>,
        flags: CommandFlags,
        callback: Callback,
        cookie: Cookie,
    ) -> Self {
        Self {
            token: 0,
            command: command.into(),
            flags,
            callback,
            cookie,
            posted_at: Instant::now(),
        }
    }

    /// The exact line written to the debugger, without terminator.
    pub fn wire_text(&self) -> String {
        let command = if self.flags.contains(CommandFlags::EMBED_TOKEN) {
            self.command.replace(TOKEN_PLACEHOLDER, &self.token.to_string())
        } else {
            self.command.clone()
        };
        format!("{}{}", self.token, command)
    }
}

impl fmt::Display for GdbCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.token, self.command)
    }
}

/// Outcome of matching a result record against the ledger
#[derive(Debug)]
pub enum Resolution {
    /// The command was pending; its callback should run
    Deliver(GdbCommand),
    /// The command was pending but stale and discardable
    Discarded(GdbCommand),
    /// No such token is pending
    Unknown,
}

/// Pending commands keyed by token
#[derive(Debug, Default)]
pub struct CommandLedger {
    last_token: u64,
    /// Tokens below this are stale
    oldest_acceptable: u64,
    pending: HashMap<u64, GdbCommand>,
    pending_requests: u32,
    continuation: Option<Continuation>,
}

impl CommandLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next token to `command` and start tracking it.
    pub fn record(&mut self, mut command: GdbCommand) -> &GdbCommand {
        self.last_token += 1;
        command.token = self.last_token;
        if command.flags.contains(CommandFlags::REBUILD_MODEL) {
            self.pending_requests += 1;
        }
        self.pending.entry(self.last_token).or_insert(command)
    }

    /// Remove the entry for `token`. A token resolves at most once.
    pub fn resolve(&mut self, token: u64) -> Resolution {
        match self.pending.remove(&token) {
            None => Resolution::Unknown,
            Some(command)
                if token < self.oldest_acceptable
                    && command.flags.contains(CommandFlags::DISCARDABLE) =>
            {
                debug!("Skipping stale result for {}", command);
                Resolution::Discarded(command)
            }
            Some(command) => Resolution::Deliver(command),
        }
    }

    /// Account for a resolved command. Returns true exactly when the
    /// pending-request count drops from one to zero.
    pub fn complete(&mut self, command: &GdbCommand) -> bool {
        if !command.flags.contains(CommandFlags::REBUILD_MODEL) {
            return false;
        }
        match self.pending_requests {
            0 => false,
            n => {
                self.pending_requests = n - 1;
                self.pending_requests == 0
            }
        }
    }

    /// Whether a barrier could be set now. Reports the oldest pending
    /// command that has a callback but is not discardable.
    pub fn check_barrier(&self) -> Result<()> {
        let mut tokens: Vec<&u64> = self.pending.keys().collect();
        tokens.sort_unstable();
        for token in tokens {
            let command = &self.pending[token];
            if !command.callback.is_none() && !command.flags.contains(CommandFlags::DISCARDABLE) {
                return Err(EngineError::BarrierViolation {
                    token: *token,
                    command: command.command.clone(),
                });
            }
        }
        Ok(())
    }

    /// Make every result of a command issued so far stale.
    ///
    /// Fails without moving the watermark if `check_barrier` fails.
    pub fn barrier(&mut self) -> Result<()> {
        self.check_barrier()?;
        self.oldest_acceptable = self.last_token + 1;
        Ok(())
    }

    pub fn set_continuation(&mut self, continuation: Continuation) -> Result<()> {
        if self.continuation.is_some() {
            return Err(EngineError::ContinuationPending);
        }
        self.continuation = Some(continuation);
        Ok(())
    }

    /// Take the continuation if nothing is pending any more. The slot is
    /// empty before the caller runs it.
    pub fn take_continuation(&mut self) -> Option<Continuation> {
        if self.pending.is_empty() {
            self.continuation.take()
        } else {
            None
        }
    }

    pub fn continuation(&self) -> Option<Continuation> {
        self.continuation
    }

    pub fn clear_continuation(&mut self) {
        self.continuation = None;
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, token: u64) -> bool {
        self.pending.contains_key(&token)
    }

    pub fn get(&self, token: u64) -> Option<&GdbCommand> {
        self.pending.get(&token)
    }

    /// Pending tokens in issue order.
    pub fn pending_tokens(&self) -> Vec<u64> {
        let mut tokens: Vec<u64> = self.pending.keys().copied().collect();
        tokens.sort_unstable();
        tokens
    }

    pub fn last_token(&self) -> u64 {
        self.last_token
    }

    pub fn oldest_acceptable(&self) -> u64 {
        self.oldest_acceptable
    }

    pub fn pending_requests(&self) -> u32 {
        self.pending_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(text: &str, flags: CommandFlags, callback: Callback) -> GdbCommand {
        GdbCommand::new(text, flags, callback, Cookie::None)
    }

    #[test]
    fn test_tokens_strictly_increase() {
        let mut ledger = CommandLedger::new();
        let tokens: Vec<u64> = (0..50)
            .map(|i| {
                ledger
                    .record(command(&format!("-cmd {}", i), CommandFlags::NONE, Callback::None))
                    .token
            })
            .collect();
        assert!(tokens.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(ledger.len(), 50);
        assert_eq!(ledger.pending_tokens(), tokens);
    }

    #[test]
    fn test_wire_text() {
        let mut ledger = CommandLedger::new();
        let plain = ledger.record(command("-exec-continue", CommandFlags::NONE, Callback::None));
        assert_eq!(plain.wire_text(), "1-exec-continue");

        let embedded = ledger.record(command(
            "-interpreter-exec console \"echo {token}\"",
            CommandFlags::EMBED_TOKEN,
            Callback::None,
        ));
        assert_eq!(embedded.wire_text(), "2-interpreter-exec console \"echo 2\"");
    }

    #[test]
    fn test_resolution_is_at_most_once() {
        let mut ledger = CommandLedger::new();
        let token = ledger
            .record(command("-stack-list-frames", CommandFlags::NONE, Callback::StackFrames))
            .token;
        assert!(matches!(ledger.resolve(token), Resolution::Deliver(c) if c.callback == Callback::StackFrames));
        assert!(matches!(ledger.resolve(token), Resolution::Unknown));
        assert!(matches!(ledger.resolve(999), Resolution::Unknown));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_barrier_discards_stale_results() {
        let mut ledger = CommandLedger::new();
        let stale = ledger
            .record(command("-stack-list-frames", CommandFlags::WATCH_UPDATE, Callback::StackFrames))
            .token;
        let undiscardable = ledger
            .record(command("-gdb-set width 0", CommandFlags::NONE, Callback::None))
            .token;
        ledger.barrier().unwrap();
        let fresh = ledger
            .record(command("-stack-list-frames", CommandFlags::WATCH_UPDATE, Callback::StackFrames))
            .token;

        assert!(matches!(ledger.resolve(stale), Resolution::Discarded(_)));
        // stale, but not discardable
        assert!(matches!(ledger.resolve(undiscardable), Resolution::Deliver(_)));
        assert!(matches!(ledger.resolve(fresh), Resolution::Deliver(_)));
    }

    #[test]
    fn test_barrier_rejects_pending_callbacks() {
        let mut ledger = CommandLedger::new();
        let token = ledger
            .record(command("-break-insert main", CommandFlags::NONE, Callback::BreakInsert))
            .token;
        let watermark = ledger.oldest_acceptable();
        match ledger.barrier() {
            Err(EngineError::BarrierViolation { token: t, command }) => {
                assert_eq!(t, token);
                assert_eq!(command, "-break-insert main");
            }
            other => panic!("Expected barrier violation, got {:?}", other),
        }
        assert_eq!(ledger.oldest_acceptable(), watermark);
    }

    #[test]
    fn test_check_barrier_leaves_watermark() {
        let mut ledger = CommandLedger::new();
        ledger.record(command("-stack-list-frames", CommandFlags::DISCARDABLE, Callback::StackFrames));
        let watermark = ledger.oldest_acceptable();
        assert!(ledger.check_barrier().is_ok());
        assert_eq!(ledger.oldest_acceptable(), watermark);

        let detach = ledger
            .record(command("-target-detach", CommandFlags::NONE, Callback::Detach))
            .token;
        match ledger.check_barrier() {
            Err(EngineError::BarrierViolation { token, .. }) => assert_eq!(token, detach),
            other => panic!("Expected barrier violation, got {:?}", other),
        }
        assert_eq!(ledger.oldest_acceptable(), watermark);
    }

    #[test]
    fn test_rebuild_fires_once_per_drain() {
        let mut ledger = CommandLedger::new();
        let a = ledger
            .record(command("-a", CommandFlags::REBUILD_MODEL, Callback::None))
            .token;
        let b = ledger
            .record(command("-b", CommandFlags::WATCH_UPDATE, Callback::None))
            .token;
        let c = ledger.record(command("-c", CommandFlags::NONE, Callback::None)).token;
        assert_eq!(ledger.pending_requests(), 2);

        let mut fired = 0;
        for token in [b, c, a] {
            if let Resolution::Deliver(cmd) | Resolution::Discarded(cmd) = ledger.resolve(token) {
                if ledger.complete(&cmd) {
                    fired += 1;
                    assert!(ledger.pending_requests() == 0);
                }
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_continuation_waits_for_drain_and_clears() {
        let mut ledger = CommandLedger::new();
        let token = ledger.record(command("-a", CommandFlags::NONE, Callback::None)).token;
        ledger.set_continuation(Continuation::ContinueInferior).unwrap();
        assert!(matches!(
            ledger.set_continuation(Continuation::StartInferior),
            Err(EngineError::ContinuationPending)
        ));

        assert_eq!(ledger.take_continuation(), None);
        ledger.resolve(token);
        assert_eq!(ledger.take_continuation(), Some(Continuation::ContinueInferior));
        assert_eq!(ledger.continuation(), None);
        assert_eq!(ledger.take_continuation(), None);
        // a continuation may re-register itself once taken
        ledger.set_continuation(Continuation::ContinueInferior).unwrap();
    }

    #[test]
    fn test_flags() {
        let flags = CommandFlags::NEEDS_STOP | CommandFlags::DISCARDABLE;
        assert!(flags.contains(CommandFlags::NEEDS_STOP));
        assert!(!flags.contains(CommandFlags::REBUILD_MODEL));
        assert!(CommandFlags::WATCH_UPDATE.contains(CommandFlags::REBUILD_MODEL));
        assert!(flags.contains(CommandFlags::NONE));
    }
}
