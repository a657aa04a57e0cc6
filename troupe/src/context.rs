//! Per-actor runtime state and the operation surface handlers program
//! against.
//!
//! A [`Context`] is handed (together with the user state) to every command,
//! message and stream callback. It owns all the bookkeeping the runtime
//! keeps for one actor: correlation tables, lifecycle edges, stream tables
//! and the transient current command. All of it is reachable only from the
//! owning actor's worker, so none of it is locked.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};

use troupe_api::errors::ActorError;
use troupe_api::info::ActorCommands;
use troupe_api::types::BoxedMessage;

use crate::envelope::Envelope;
use crate::links::{EstablishLinkMessage, LinkKind, NotifyCloseMessage};
use crate::request::{
    CancelCommandMessage, Canceller, Command, CommandId, CommandMessage, CommandQueue,
    InflightRequest, OnReply, on_reply, PausedCommand, PreReplyMessage, Promise, PromiseId,
    ReplyMessage, ReplyProcessor,
};
use crate::service::ActorService;
use crate::stream::{DownstreamStoppedMessage, OutputEntry, OutputId, StreamInput};
use crate::system::System;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Running,
    Quitting,
    Closed,
}

/// What should happen to the command being processed once its handler
/// returns.
pub(crate) enum PendingAction {
    /// Still valid; the returned [`crate::Response`] decides the reply.
    Respond,
    /// A reply was already sent (or the command invalidated); the returned
    /// response is dropped.
    Done,
    /// `pause_command` was called; the token receives the payload after the
    /// handler returns.
    Paused(Command),
    /// `delegate` was called; the command is forwarded or proxied after the
    /// handler returns.
    Delegated(ActorService),
}

pub(crate) struct CurrentCommand {
    pub promise: PromiseId,
    pub filter_index: usize,
    pub action: PendingAction,
    /// Present only after the handler deferred with `Response::Promise`:
    /// the command payload, retained so a later `delegate` can forward it.
    pub payload: Option<BoxedMessage>,
}

type CancelCallback = Box<dyn FnOnce() + Send>;

pub struct Context<A> {
    pub(crate) service: ActorService,
    pub(crate) system: System,
    pub(crate) state: Lifecycle,
    pub(crate) quit_error: Option<ActorError>,
    close_done: bool,

    next_command_id: u64,
    pub(crate) inflight: HashMap<CommandId, InflightRequest<A>>,
    pub(crate) active_promises: HashMap<PromiseId, CancelCallback>,

    pub(crate) incoming_links: HashMap<ActorService, LinkKind>,
    pub(crate) outgoing_links: HashMap<ActorService, LinkKind>,
    pub(crate) monitoring: HashSet<ActorService>,

    pub(crate) next_stream_id: u64,
    pub(crate) stream_inputs: HashMap<u64, Box<dyn StreamInput<A>>>,
    pub(crate) stream_outputs: HashMap<OutputId, OutputEntry<A>>,
    pub(crate) ready_outputs: HashSet<OutputId>,

    pub(crate) current: Option<CurrentCommand>,
    pub(crate) reissued: VecDeque<Command>,
    pub(crate) command_infos: ActorCommands,
}

impl<A: 'static> Context<A> {
    pub(crate) fn new(service: ActorService, system: System) -> Self {
        Self {
            service,
            system,
            state: Lifecycle::Running,
            quit_error: None,
            close_done: false,
            next_command_id: 0,
            inflight: HashMap::new(),
            active_promises: HashMap::new(),
            incoming_links: HashMap::new(),
            outgoing_links: HashMap::new(),
            monitoring: HashSet::new(),
            next_stream_id: 0,
            stream_inputs: HashMap::new(),
            stream_outputs: HashMap::new(),
            ready_outputs: HashSet::new(),
            current: None,
            reissued: VecDeque::new(),
            command_infos: Vec::new(),
        }
    }

    /// This actor's own service handle.
    pub fn service(&self) -> &ActorService {
        &self.service
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    /// Origin of the command currently being processed.
    pub fn sender(&self) -> Option<&ActorService> {
        self.current.as_ref().map(|c| &c.promise.origin)
    }

    /// The command/result table `GetInfo` replies with.
    pub fn command_info(&self) -> &ActorCommands {
        &self.command_infos
    }

    // ---- outgoing requests ------------------------------------------------

    /// Sends `payload` as a command to `destination` and records `processor`
    /// to receive the single reply. The returned canceller is fire-once and
    /// idempotent; on a closed actor it is a no-op.
    pub fn send_request(
        &mut self,
        destination: &ActorService,
        payload: impl Any + Send,
        processor: impl ReplyProcessor<A> + 'static,
    ) -> Canceller {
        self.send_request_boxed(destination, Box::new(payload), Box::new(processor))
    }

    pub(crate) fn send_request_boxed(
        &mut self,
        destination: &ActorService,
        payload: BoxedMessage,
        processor: Box<dyn ReplyProcessor<A>>,
    ) -> Canceller {
        if self.state == Lifecycle::Closed {
            return Canceller::noop();
        }
        let id = CommandId(self.next_command_id);
        self.next_command_id += 1;
        self.inflight.insert(
            id,
            InflightRequest {
                processor,
                destination: Some(destination.clone()),
            },
        );
        destination.enqueue(Envelope::Command(CommandMessage {
            promise: PromiseId {
                origin: self.service.clone(),
                id,
            },
            payload,
        }));
        Canceller::new(self.service.clone(), id)
    }

    /// Fire-and-forget message.
    pub fn send_message(&mut self, destination: &ActorService, message: impl Any + Send) {
        destination.enqueue(Envelope::User(Box::new(message)));
    }

    /// Several fire-and-forget messages delivered as one mailbox item and
    /// flattened in order on the receiving side.
    pub fn send_messages(&mut self, destination: &ActorService, messages: Vec<BoxedMessage>) {
        destination.enqueue(Envelope::Batch(messages));
    }

    pub(crate) fn cancel_request_by_id(&mut self, state: &mut A, id: CommandId) {
        if let Some(entry) = self.inflight.remove(&id) {
            if let Some(destination) = entry.destination {
                destination.enqueue(Envelope::CancelCommand(CancelCommandMessage {
                    origin: self.service.clone(),
                    id,
                }));
            }
            entry.processor.error(state, self, ActorError::Cancelled);
        }
    }

    pub(crate) fn process_reply(&mut self, state: &mut A, reply: ReplyMessage) {
        // A reply for an unknown id was cancelled in the meantime; drop it.
        let Some(entry) = self.inflight.remove(&reply.id) else {
            return;
        };
        match reply.data {
            Ok(data) => entry.processor.process(state, self, data),
            Err(err) => entry.processor.error(state, self, err),
        }
    }

    pub(crate) fn process_pre_reply(&mut self, message: PreReplyMessage) {
        if let Some(entry) = self.inflight.get_mut(&message.id) {
            entry.destination = Some(message.destination);
        }
    }

    // ---- replying ---------------------------------------------------------

    /// Replies to the command currently being processed. A no-op once the
    /// command was replied to, paused or delegated.
    pub fn reply(&mut self, data: impl Any + Send) {
        self.reply_boxed(Ok(Box::new(data)));
    }

    pub fn reply_error(&mut self, err: ActorError) {
        self.reply_boxed(Err(err));
    }

    fn reply_boxed(&mut self, data: Result<BoxedMessage, ActorError>) {
        if let Some(current) = self.current.as_mut() {
            if matches!(current.action, PendingAction::Respond) {
                current.action = PendingAction::Done;
                let promise = current.promise.clone();
                self.send_reply(&promise, data);
            }
        }
    }

    pub(crate) fn send_reply(&self, promise: &PromiseId, data: Result<BoxedMessage, ActorError>) {
        promise.origin.enqueue(Envelope::Reply(ReplyMessage {
            id: promise.id,
            data,
        }));
    }

    /// Fails the current command after a trapped handler panic.
    pub(crate) fn fail_current_command(&mut self, err: ActorError) {
        self.reply_error(err);
        self.current = None;
    }

    // ---- promises ---------------------------------------------------------

    /// Correlation handle of the current command, for replying after the
    /// handler returned `Response::Promise`.
    pub fn promise(&self) -> Option<Promise> {
        self.current.as_ref().map(|c| Promise {
            id: c.promise.clone(),
        })
    }

    /// Fulfils a deferred reply. A no-op if the promise was already
    /// resolved or cancelled.
    pub fn promise_reply(&mut self, promise: &Promise, data: impl Any + Send) {
        self.resolve_promise(promise.id.clone(), Ok(Box::new(data)));
    }

    pub fn promise_reply_error(&mut self, promise: &Promise, err: ActorError) {
        self.resolve_promise(promise.id.clone(), Err(err));
    }

    pub(crate) fn resolve_promise(&mut self, id: PromiseId, data: Result<BoxedMessage, ActorError>) {
        if self.active_promises.remove(&id).is_some() {
            self.send_reply(&id, data);
        }
    }

    pub(crate) fn process_cancel_command(&mut self, message: CancelCommandMessage) {
        if let Some(cancel) = self.active_promises.remove(&message.promise_id()) {
            cancel();
        }
    }

    // ---- pausing and resuming ---------------------------------------------

    /// Suspends the current command, returning a resumable token. The
    /// command's reply becomes an active promise; cancellation from the
    /// origin invalidates the token.
    pub fn pause_command(&mut self) -> Option<Command> {
        let current = self.current.as_mut()?;
        if !matches!(current.action, PendingAction::Respond) {
            return None;
        }
        let token = Command::new(current.promise.clone(), current.filter_index);
        current.action = PendingAction::Paused(token.clone());
        let guard = token.clone();
        self.active_promises
            .insert(current.promise.clone(), Box::new(move || guard.invalidate()));
        Some(token)
    }

    /// Like [`Context::pause_command`], pushing the token onto a user-owned
    /// queue. Cancellation marks the queue entry cancelled.
    pub fn pause_command_enqueue(&mut self, queue: &mut CommandQueue) {
        if let Some(token) = self.pause_command() {
            queue.push(token);
        }
    }

    /// Re-enters one paused command at its saved filter position, after the
    /// current mailbox item finishes.
    pub fn resume_command(&mut self, queue: &mut CommandQueue) {
        if let Some(token) = queue.pop_valid() {
            self.reissued.push_back(token);
        }
    }

    /// Re-enters every paused command in the queue.
    pub fn resume_commands(&mut self, queue: &mut CommandQueue) {
        while let Some(token) = queue.pop() {
            self.reissued.push_back(token);
        }
    }

    /// Fails one paused command with `err`.
    pub fn cancel_command(&mut self, queue: &mut CommandQueue, err: ActorError) {
        if let Some(token) = queue.pop_valid() {
            if let Some(paused) = token.take() {
                self.active_promises.remove(&paused.promise);
                self.send_reply(&paused.promise, Err(err));
            }
        }
    }

    /// Fails every paused command in the queue with `err`.
    pub fn cancel_commands(&mut self, queue: &mut CommandQueue, err: ActorError) {
        while let Some(token) = queue.pop_valid() {
            if let Some(paused) = token.take() {
                self.active_promises.remove(&paused.promise);
                self.send_reply(&paused.promise, Err(err.clone()));
            }
        }
    }

    pub(crate) fn take_reissued(&mut self) -> Option<PausedCommand> {
        while let Some(token) = self.reissued.pop_front() {
            if let Some(paused) = token.take() {
                return Some(paused);
            }
        }
        None
    }

    // ---- delegation -------------------------------------------------------

    /// Hands the current command to `destination`. Without an active
    /// promise the raw command is forwarded, sender preserved; with one
    /// (the handler already deferred its reply), this actor proxies: it
    /// requests `destination` itself and relays the outcome to the original
    /// origin, so the origin's cancel route stays valid.
    pub fn delegate(&mut self, destination: &ActorService) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if !matches!(current.action, PendingAction::Respond) {
            return;
        }
        if let Some(payload) = current.payload.take() {
            // A previously deferred command; its payload is retained here.
            let promise = current.promise.clone();
            current.action = PendingAction::Done;
            self.finish_delegate(promise, payload, destination.clone());
        } else {
            // Mid-handler: the dispatcher holds the payload and completes
            // the delegation once the handler returns.
            current.action = PendingAction::Delegated(destination.clone());
        }
    }

    pub(crate) fn finish_delegate(
        &mut self,
        promise: PromiseId,
        payload: BoxedMessage,
        destination: ActorService,
    ) {
        if self.active_promises.contains_key(&promise) {
            // Already paused once: proxy, so the origin's cancel route stays
            // valid while the reply comes from the new destination.
            let ok_id = promise.clone();
            let err_id = promise.clone();
            let relay: OnReply<A> = on_reply(move |_state: &mut A, ctx: &mut Context<A>, data| {
                ctx.resolve_promise(ok_id, Ok(data));
            })
            .on_error(move |_state, ctx, err| {
                ctx.resolve_promise(err_id, Err(err));
            });
            let canceller = self.send_request_boxed(&destination, payload, Box::new(relay));
            self.active_promises
                .insert(promise, Box::new(move || canceller.cancel()));
        } else {
            // Re-route the origin's cancel path to the new destination; the
            // raw command follows with its sender intact.
            promise.origin.enqueue(Envelope::PreReply(PreReplyMessage {
                id: promise.id,
                destination: destination.clone(),
            }));
            destination.enqueue(Envelope::Command(CommandMessage { promise, payload }));
        }
    }

    // ---- links and monitors -----------------------------------------------

    /// Bidirectional lifecycle tie: when either side closes, the other
    /// quits.
    pub fn link(&mut self, destination: &ActorService) {
        self.incoming_links.insert(destination.clone(), LinkKind::Link);
        destination.enqueue(Envelope::EstablishLink(EstablishLinkMessage {
            source: self.service.clone(),
            kind: LinkKind::Link,
        }));
    }

    /// Notify-only edge: the finished-service processor runs when
    /// `destination` closes.
    pub fn monitor(&mut self, destination: &ActorService) {
        self.monitoring.insert(destination.clone());
        destination.enqueue(Envelope::EstablishLink(EstablishLinkMessage {
            source: self.service.clone(),
            kind: LinkKind::Monitor,
        }));
    }

    /// Quit this actor when `destination` closes.
    pub fn depend_on(&mut self, destination: &ActorService) {
        destination.enqueue(Envelope::EstablishLink(EstablishLinkMessage {
            source: self.service.clone(),
            kind: LinkKind::Depend,
        }));
    }

    /// Close `destination` when this actor closes.
    pub fn depend(&mut self, destination: &ActorService) {
        self.outgoing_links.insert(destination.clone(), LinkKind::Kill);
    }

    pub(crate) fn add_incoming_link(&mut self, source: ActorService, kind: LinkKind) {
        self.incoming_links.insert(source, kind);
    }

    // ---- lifecycle --------------------------------------------------------

    /// Starts the transition out of Running. The actor finishes in-flight
    /// work, runs its exit processor and closes once quiescent.
    pub fn quit(&mut self, err: Option<ActorError>) {
        if self.state == Lifecycle::Closed {
            return;
        }
        if err.is_some() {
            self.quit_error = err;
        }
        self.state = Lifecycle::Quitting;
    }

    pub(crate) fn force_close(&mut self) {
        self.state = Lifecycle::Closed;
    }

    /// The terminal cleanup sequence. Idempotent; runs when the actor
    /// reaches Closed.
    pub(crate) fn close(&mut self, state: &mut A) {
        if self.close_done {
            return;
        }
        self.close_done = true;
        self.state = Lifecycle::Closed;
        self.current = None;

        for (id, cancel) in std::mem::take(&mut self.active_promises) {
            cancel();
            self.send_reply(&id, Err(ActorError::ActorDead));
        }
        for (id, entry) in std::mem::take(&mut self.inflight) {
            if let Some(destination) = entry.destination {
                destination.enqueue(Envelope::CancelCommand(CancelCommandMessage {
                    origin: self.service.clone(),
                    id,
                }));
            }
            entry.processor.error(state, self, ActorError::ActorDead);
        }

        for (service, kind) in std::mem::take(&mut self.incoming_links) {
            match kind {
                LinkKind::Link | LinkKind::Depend => {
                    service.enqueue(Envelope::Quit(self.quit_error.clone()));
                }
                LinkKind::Monitor => {
                    service.enqueue(Envelope::NotifyClose(NotifyCloseMessage {
                        source: self.service.clone(),
                        err: self.quit_error.clone(),
                    }));
                }
                LinkKind::Kill => {}
            }
        }
        for (service, kind) in std::mem::take(&mut self.outgoing_links) {
            if matches!(kind, LinkKind::Link | LinkKind::Kill) {
                service.enqueue(Envelope::Quit(self.quit_error.clone()));
            }
        }
        self.monitoring.clear();

        let quit_error = self.quit_error.clone();
        for (id, mut input) in std::mem::take(&mut self.stream_inputs) {
            if let Some(source) = input.base().source().cloned() {
                source.enqueue(Envelope::DownstreamStopped(DownstreamStoppedMessage {
                    id: OutputId {
                        stream: id,
                        destination: self.service.clone(),
                    },
                    err: quit_error.clone(),
                }));
            }
            input.closed(state, self, quit_error.clone());
        }
        for (_id, mut entry) in std::mem::take(&mut self.stream_outputs) {
            entry.output.base().close_stream(quit_error.clone());
            self.finish_output(state, entry.output);
        }
        self.ready_outputs.clear();
    }
}
