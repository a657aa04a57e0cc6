//! Request/reply correlation.
//!
//! A command is a payload expecting exactly one reply. The sender allocates
//! a [`CommandId`] unique to itself; the pair `(origin service, id)` is the
//! globally unique [`PromiseId`] both sides correlate on. Outgoing requests
//! live in the sender's inflight table until resolved or cancelled; inbound
//! commands whose reply was deferred live in the receiver's active-promise
//! table until fulfilled.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use troupe_api::errors::ActorError;
use troupe_api::types::BoxedMessage;

use crate::context::Context;
use crate::envelope::Envelope;
use crate::service::ActorService;

/// Identifier of an outgoing request, unique per origin actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(pub(crate) u64);

/// Globally unique correlation key of a command: the origin service plus the
/// origin-local command id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromiseId {
    pub(crate) origin: ActorService,
    pub(crate) id: CommandId,
}

pub(crate) struct CommandMessage {
    pub promise: PromiseId,
    pub payload: BoxedMessage,
}

pub(crate) struct ReplyMessage {
    pub id: CommandId,
    pub data: Result<BoxedMessage, ActorError>,
}

/// Carries no payload; reassigns the destination a subsequent cancellation
/// should be routed to. Sent when a handler delegates.
pub(crate) struct PreReplyMessage {
    pub id: CommandId,
    pub destination: ActorService,
}

pub(crate) struct CancelCommandMessage {
    pub origin: ActorService,
    pub id: CommandId,
}

impl CancelCommandMessage {
    pub(crate) fn promise_id(&self) -> PromiseId {
        PromiseId {
            origin: self.origin.clone(),
            id: self.id,
        }
    }
}

/// Receives the single outcome of a request: `process` on a successful
/// reply, `error` on failure or cancellation. Exactly one of the two fires,
/// exactly once; consuming `Box<Self>` makes that a type-level fact.
pub trait ReplyProcessor<A>: Send {
    fn process(self: Box<Self>, state: &mut A, ctx: &mut Context<A>, data: BoxedMessage);
    fn error(self: Box<Self>, state: &mut A, ctx: &mut Context<A>, err: ActorError);
}

type ProcessFn<A> = Box<dyn FnOnce(&mut A, &mut Context<A>, BoxedMessage) + Send>;
type ErrorFn<A> = Box<dyn FnOnce(&mut A, &mut Context<A>, ActorError) + Send>;

/// Closure-backed [`ReplyProcessor`]. Build with [`on_reply`] or
/// [`on_reply_error`], optionally chaining [`OnReply::on_error`].
pub struct OnReply<A> {
    on_process: Option<ProcessFn<A>>,
    on_error: Option<ErrorFn<A>>,
}

/// Reply processor that handles successful replies with `f` and ignores
/// errors unless [`OnReply::on_error`] is chained.
pub fn on_reply<A: 'static>(
    f: impl FnOnce(&mut A, &mut Context<A>, BoxedMessage) + Send + 'static,
) -> OnReply<A> {
    OnReply {
        on_process: Some(Box::new(f)),
        on_error: None,
    }
}

/// Reply processor that only cares about failure.
pub fn on_reply_error<A: 'static>(
    f: impl FnOnce(&mut A, &mut Context<A>, ActorError) + Send + 'static,
) -> OnReply<A> {
    OnReply {
        on_process: None,
        on_error: Some(Box::new(f)),
    }
}

impl<A: 'static> OnReply<A> {
    pub fn on_error(
        mut self,
        f: impl FnOnce(&mut A, &mut Context<A>, ActorError) + Send + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl<A> ReplyProcessor<A> for OnReply<A> {
    fn process(mut self: Box<Self>, state: &mut A, ctx: &mut Context<A>, data: BoxedMessage) {
        if let Some(f) = self.on_process.take() {
            f(state, ctx, data);
        }
    }

    fn error(mut self: Box<Self>, state: &mut A, ctx: &mut Context<A>, err: ActorError) {
        if let Some(f) = self.on_error.take() {
            f(state, ctx, err);
        }
    }
}

/// One entry of the inflight table: the processor awaiting the reply and the
/// destination a cancellation is currently routed to.
pub(crate) struct InflightRequest<A> {
    pub processor: Box<dyn ReplyProcessor<A>>,
    pub destination: Option<ActorService>,
}

/// Fire-once, idempotent handle cancelling an outgoing request.
///
/// Firing routes a cancel marker through the owning actor's own mailbox; the
/// actor then errors the reply processor locally with
/// [`ActorError::Cancelled`] and forwards a cancel to the request's current
/// destination. A canceller obtained from a closed actor is a no-op.
#[derive(Clone)]
pub struct Canceller {
    inner: Option<Arc<CancellerInner>>,
}

struct CancellerInner {
    owner: ActorService,
    id: CommandId,
    fired: AtomicBool,
}

impl Canceller {
    pub(crate) fn new(owner: ActorService, id: CommandId) -> Self {
        Self {
            inner: Some(Arc::new(CancellerInner {
                owner,
                id,
                fired: AtomicBool::new(false),
            })),
        }
    }

    pub(crate) fn noop() -> Self {
        Self { inner: None }
    }

    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            if !inner.fired.swap(true, Ordering::AcqRel) {
                inner.owner.enqueue(Envelope::CancelRequest(inner.id));
            }
        }
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f.debug_tuple("Canceller").field(&inner.id).finish(),
            None => f.write_str("Canceller(noop)"),
        }
    }
}

/// Handle to a deferred reply, obtained with `Context::promise` inside a
/// command handler and fulfilled later with `Context::promise_reply`.
#[derive(Debug, Clone)]
pub struct Promise {
    pub(crate) id: PromiseId,
}

pub(crate) struct PausedCommand {
    pub promise: PromiseId,
    pub filter_index: usize,
    pub payload: Option<BoxedMessage>,
}

/// A resumable command token returned by `Context::pause_command`.
///
/// The token is shared between the user (who resumes it) and the
/// active-promise table (whose cancel path invalidates it); an invalidated
/// token is skipped on resume.
#[derive(Clone)]
pub struct Command {
    slot: Arc<Mutex<Option<PausedCommand>>>,
}

impl Command {
    pub(crate) fn new(promise: PromiseId, filter_index: usize) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(PausedCommand {
                promise,
                filter_index,
                payload: None,
            }))),
        }
    }

    pub(crate) fn fill(&self, payload: BoxedMessage) {
        if let Some(paused) = self.slot.lock().unwrap().as_mut() {
            paused.payload = Some(payload);
        }
    }

    pub(crate) fn take(&self) -> Option<PausedCommand> {
        self.slot.lock().unwrap().take()
    }

    pub(crate) fn invalidate(&self) {
        *self.slot.lock().unwrap() = None;
    }

    pub fn is_valid(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// User-owned queue of paused commands, the companion of
/// `Context::pause_command_enqueue` / `resume_commands` / `cancel_commands`.
#[derive(Default)]
pub struct CommandQueue {
    items: VecDeque<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn push(&mut self, command: Command) {
        self.items.push_back(command);
    }

    pub(crate) fn pop(&mut self) -> Option<Command> {
        self.items.pop_front()
    }

    /// Pops the first still-valid token, discarding cancelled ones.
    pub(crate) fn pop_valid(&mut self) -> Option<Command> {
        while let Some(command) = self.items.pop_front() {
            if command.is_valid() {
                return Some(command);
            }
        }
        None
    }
}
