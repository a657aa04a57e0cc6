//! # Troupe
//!
//! A lightweight, in-process actor runtime. Independent actors communicate
//! exclusively by asynchronous messages, issue correlated request/reply
//! exchanges with cancellation, participate in bidirectional streams with
//! credit-based backpressure, and are tied together by links and monitors
//! that propagate lifecycle events.
//!
//! ## Model
//!
//! - Each actor is single-threaded with respect to its own state: one tokio
//!   task drains its mailbox, and handlers run to completion. The only
//!   suspension inside a handler is [`Context::pause_command`].
//! - Commands expect exactly one reply and are correlated by
//!   `(origin, command id)`; messages are fire-and-forget. Dispatch is by
//!   the dynamic type of the payload, declared in a [`Behaviour`].
//! - Links quit peers on close, monitors get notified, streams tear down
//!   symmetrically. Actor close is the universal cancel.
//! - Handler panics are trapped at message boundary, converted to errors
//!   and routed to the actor's panic processor; they never cross into
//!   peers.
//!
//! ## Module organization
//!
//! - [`actor`]: the [`Actor`] trait and stock actors
//! - [`behaviour`]: the declarative handler table
//! - [`context`]: per-actor state and the operation surface
//! - [`request`]: request/reply correlation, cancellation, pausing
//! - [`links`]: lifecycle edges
//! - [`stream`]: credit-based streams
//! - [`broadcast`]: state-change broadcasting over streams
//! - [`system`]: spawning and global shutdown
//! - [`logging`]: tracing bootstrap and severity mapping

pub mod actor;
pub mod behaviour;
pub mod broadcast;
pub mod context;
pub mod links;
pub mod logging;
pub mod request;
pub mod service;
pub mod stream;
pub mod system;

mod cell;
mod envelope;
mod mailbox;

pub use actor::{Actor, FuncActor};
pub use behaviour::{Behaviour, CommandToken, Response};
pub use context::Context;
pub use links::LinkKind;
pub use request::{
    on_reply, on_reply_error, Canceller, Command, CommandQueue, OnReply, Promise, ReplyProcessor,
};
pub use service::{ActorId, ActorService};
pub use stream::{
    RequestStream, StreamInput, StreamInputBase, StreamOutput, StreamOutputBase, OutputId,
    SourceId, StreamRequestDescriptor, DEFAULT_MAX_LEN,
};
pub use broadcast::{DataSource, StateChangeOutput, StateChangeStream, Subscribers};
pub use system::{System, SystemConfig, SystemError};

pub use troupe_api as api;
pub use troupe_api::errors::ActorError;
pub use troupe_api::info::{ActorCommands, CommandInfo, GetInfo, GetStatus, Status};
pub use troupe_api::types::{ActorResult, BoxedMessage};
