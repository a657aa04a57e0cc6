//! Built-in introspection commands.
//!
//! Every actor answers [`GetInfo`] and [`GetStatus`] without any user
//! handler being involved. `GetInfo` is what an HTTP front-end uses to
//! generate endpoints from an actor's command table; `GetStatus` is a
//! health probe.

/// Built-in command: reply with the actor's [`ActorCommands`] table.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetInfo;

/// Built-in command: reply with a [`Status`] snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetStatus;

/// One registered command as seen from outside: the payload type name and,
/// when declared, the reply type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: &'static str,
    pub result: Option<&'static str>,
}

/// The full command table of an actor. Treat as read-only: mutating a copy
/// confuses `GetInfo` requestors but changes no actual handlers.
pub type ActorCommands = Vec<CommandInfo>;

/// Counts of an actor's live bookkeeping, as replied to [`GetStatus`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub command_processors: usize,
    pub message_processors: usize,
    pub active_promises: usize,
    pub inflight_requests: usize,
    pub stream_inputs: usize,
    pub stream_outputs: usize,
}
