//! The actor shell: run loop, dispatch and lifecycle.
//!
//! One cell owns one actor: its user state, its behaviour and its
//! [`Context`]. The run loop blocks on the mailbox signal, detaches the
//! pending chain and dispatches each item; after every item it flushes ready
//! stream outputs, re-checks quiescence and drains reissued commands.
//! Handler panics are trapped at item boundary and never cross into peers.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use troupe_api::errors::ActorError;
use troupe_api::info::{CommandInfo, GetInfo, GetStatus, Status};
use troupe_api::types::BoxedMessage;

use crate::actor::Actor;
use crate::behaviour::{Behaviour, Response};
use crate::context::{Context, CurrentCommand, Lifecycle, PendingAction};
use crate::envelope::Envelope;
use crate::links::NotifyCloseMessage;
use crate::mailbox::Mailbox;
use crate::request::{CommandMessage, PromiseId};
use crate::service::ActorService;
use crate::system::System;

pub(crate) struct ActorCell<A: Actor> {
    state: A,
    behaviour: Behaviour<A>,
    ctx: Context<A>,
    mailbox: Arc<Mailbox>,
}

impl<A: Actor> ActorCell<A> {
    pub(crate) fn new(state: A, service: ActorService, system: System, mailbox: Arc<Mailbox>) -> Self {
        Self {
            state,
            behaviour: Behaviour::default(),
            ctx: Context::new(service, system),
            mailbox,
        }
    }

    pub(crate) async fn run(mut self) {
        self.boot();
        loop {
            if !self.process_messages() {
                break;
            }
            self.mailbox.notified().await;
        }
        self.finish();
    }

    fn boot(&mut self) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.state.make_behaviour(&mut self.ctx)
        }));
        match outcome {
            Ok(behaviour) => {
                self.behaviour = behaviour;
                self.ctx.command_infos = self.built_in_infos();
                self.ctx
                    .command_infos
                    .extend(self.behaviour.command_infos.iter().cloned());
            }
            Err(payload) => {
                let err = ActorError::Panicked(panic_message(payload));
                tracing::error!(error = %err, "behaviour construction panicked");
                self.on_panic(err);
            }
        }
    }

    fn built_in_infos(&self) -> Vec<CommandInfo> {
        vec![
            CommandInfo {
                name: std::any::type_name::<GetInfo>(),
                result: Some(std::any::type_name::<troupe_api::info::ActorCommands>()),
            },
            CommandInfo {
                name: std::any::type_name::<GetStatus>(),
                result: Some(std::any::type_name::<Status>()),
            },
        ]
    }

    /// Drains the detached chain. Returns `false` once the actor is Closed.
    fn process_messages(&mut self) -> bool {
        let head = self.mailbox.take_head();
        if head.is_empty() {
            self.quit_if_inactive();
            return self.ctx.state != Lifecycle::Closed;
        }
        let mut items = Vec::with_capacity(head.len());
        for envelope in head {
            match envelope {
                Envelope::Batch(messages) => {
                    items.extend(messages.into_iter().map(Envelope::User));
                }
                other => items.push(other),
            }
        }
        for envelope in items {
            if self.ctx.state == Lifecycle::Closed {
                break;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.dispatch(envelope);
                self.ctx.flush_ready_outputs(&mut self.state);
            }));
            if let Err(payload) = outcome {
                let err = ActorError::Panicked(panic_message(payload));
                self.on_panic(err);
            }
            self.quit_if_inactive();
            self.process_reissued();
        }
        self.quit_if_inactive();
        self.ctx.state != Lifecycle::Closed
    }

    fn dispatch(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Command(command) => self.process_command(command),
            Envelope::Reply(reply) => self.ctx.process_reply(&mut self.state, reply),
            Envelope::PreReply(message) => self.ctx.process_pre_reply(message),
            Envelope::CancelCommand(message) => self.ctx.process_cancel_command(message),
            Envelope::CancelRequest(id) => self.ctx.cancel_request_by_id(&mut self.state, id),
            Envelope::EstablishLink(link) => self.ctx.add_incoming_link(link.source, link.kind),
            Envelope::NotifyClose(message) => self.process_finished_service(message),
            Envelope::Quit(err) => self.ctx.quit(err),
            Envelope::Close => self.ctx.force_close(),
            Envelope::StreamCanSend(message) => {
                self.ctx.process_stream_data(&mut self.state, message.id, None)
            }
            Envelope::StreamReply(message) => {
                self.ctx
                    .process_stream_data(&mut self.state, message.id, Some(message.data))
            }
            Envelope::StreamRequest(message) => {
                self.ctx.process_stream_request(&mut self.state, message)
            }
            Envelope::StreamAck(message) => self.ctx.process_stream_ack(&mut self.state, message),
            Envelope::UpstreamStopped(message) => {
                self.ctx.process_upstream_stopped(&mut self.state, message)
            }
            Envelope::DownstreamStopped(message) => {
                self.ctx.process_downstream_stopped(&mut self.state, message)
            }
            Envelope::User(message) => self.process_user_message(message),
            Envelope::Batch(messages) => {
                for message in messages {
                    self.process_user_message(message);
                }
            }
        }
    }

    fn process_command(&mut self, command: CommandMessage) {
        let CommandMessage { promise, payload } = command;
        if (*payload).is::<GetInfo>() {
            let infos = self.ctx.command_infos.clone();
            self.ctx.send_reply(&promise, Ok(Box::new(infos)));
            return;
        }
        if (*payload).is::<GetStatus>() {
            let status = self.status();
            self.ctx.send_reply(&promise, Ok(Box::new(status)));
            return;
        }
        let filter_count = self.behaviour.filters.len();
        self.run_command(promise, payload, filter_count);
    }

    /// Runs the filter chain and handler for one command, fresh or resumed,
    /// then settles its reply. Panics are trapped here so the promise is
    /// failed before the panic processor runs.
    fn run_command(&mut self, promise: PromiseId, mut payload: BoxedMessage, filter_index: usize) {
        self.ctx.current = Some(CurrentCommand {
            promise,
            filter_index,
            action: PendingAction::Respond,
            payload: None,
        });
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.run_command_processor(&mut payload, filter_index)
        }));
        match outcome {
            Ok(result) => self.finalize_command(payload, result),
            Err(panic_payload) => {
                let err = ActorError::Panicked(panic_message(panic_payload));
                self.ctx.fail_current_command(err.clone());
                self.on_panic(err);
            }
        }
    }

    fn run_command_processor(
        &mut self,
        payload: &mut BoxedMessage,
        mut filter_index: usize,
    ) -> Result<Response, ActorError> {
        let type_id = Any::type_id(&**payload);
        while filter_index > 0 {
            filter_index -= 1;
            if let Some(current) = self.ctx.current.as_mut() {
                current.filter_index = filter_index;
            }
            let filter = &mut self.behaviour.filters[filter_index];
            if let Some(response) = filter(&mut self.state, &mut self.ctx, payload.as_mut())? {
                return Ok(response);
            }
            if !self.current_is_respondable() {
                // The filter paused or delegated; stop the chain here.
                return Ok(Response::Empty);
            }
        }
        if let Some(current) = self.ctx.current.as_mut() {
            current.filter_index = 0;
        }
        match self.behaviour.commands.get_mut(&type_id) {
            Some(handler) => handler(&mut self.state, &mut self.ctx, payload.as_mut()),
            None => {
                tracing::warn!("command with no registered handler");
                Err(ActorError::UnrecognizedCommand)
            }
        }
    }

    fn current_is_respondable(&self) -> bool {
        matches!(
            self.ctx.current.as_ref().map(|c| &c.action),
            Some(PendingAction::Respond)
        )
    }

    /// Consumes the handler outcome: replies, registers the promise, fills
    /// the pause token or performs the delegation.
    fn finalize_command(&mut self, payload: BoxedMessage, outcome: Result<Response, ActorError>) {
        let Some(current) = self.ctx.current.take() else {
            return;
        };
        match current.action {
            PendingAction::Done => {}
            PendingAction::Paused(token) => token.fill(payload),
            PendingAction::Delegated(destination) => {
                self.ctx.finish_delegate(current.promise, payload, destination)
            }
            PendingAction::Respond => match outcome {
                Err(err) => self.ctx.send_reply(&current.promise, Err(err)),
                Ok(Response::Empty) => self.ctx.send_reply(&current.promise, Ok(Box::new(()))),
                Ok(Response::Value(value)) => self.ctx.send_reply(&current.promise, Ok(value)),
                Ok(Response::Binary(bytes)) => {
                    self.ctx.send_reply(&current.promise, Ok(Box::new(bytes)))
                }
                Ok(Response::Text(text)) => {
                    self.ctx.send_reply(&current.promise, Ok(Box::new(text)))
                }
                Ok(Response::Promise(cancel)) => {
                    self.ctx
                        .active_promises
                        .insert(current.promise.clone(), cancel);
                    // The deferred command stays current, payload retained,
                    // so a later `delegate` can still hand it off.
                    self.ctx.current = Some(CurrentCommand {
                        promise: current.promise,
                        filter_index: current.filter_index,
                        action: PendingAction::Respond,
                        payload: Some(payload),
                    });
                }
                Ok(Response::Delegated(destination)) => {
                    self.ctx.finish_delegate(current.promise, payload, destination)
                }
            },
        }
    }

    fn process_reissued(&mut self) {
        while let Some(paused) = self.ctx.take_reissued() {
            self.ctx.active_promises.remove(&paused.promise);
            let Some(payload) = paused.payload else {
                continue;
            };
            self.run_command(paused.promise, payload, paused.filter_index);
        }
    }

    fn process_user_message(&mut self, message: BoxedMessage) {
        let type_id = Any::type_id(&*message);
        match self.behaviour.messages.get_mut(&type_id) {
            Some(handler) => handler(&mut self.state, &mut self.ctx, message),
            None => tracing::debug!("message with no registered handler"),
        }
    }

    fn process_finished_service(&mut self, message: NotifyCloseMessage) {
        if let Some(handler) = self.behaviour.finished_service_processor.as_mut() {
            handler(
                &mut self.state,
                &mut self.ctx,
                &message.source,
                message.err.as_ref(),
            );
        }
        self.ctx.monitoring.remove(&message.source);
    }

    fn on_panic(&mut self, err: ActorError) {
        if let Some(handler) = self.behaviour.panic_processor.as_mut() {
            handler(&mut self.state, &mut self.ctx, err);
        } else {
            self.ctx.quit(Some(err));
        }
    }

    fn status(&self) -> Status {
        Status {
            command_processors: self.behaviour.commands.len(),
            message_processors: self.behaviour.messages.len(),
            active_promises: self.ctx.active_promises.len(),
            inflight_requests: self.ctx.inflight.len(),
            stream_inputs: self.ctx.stream_inputs.len(),
            stream_outputs: self.ctx.stream_outputs.len(),
        }
    }

    /// The quiescence predicate: nothing registered, nothing owed, nothing
    /// awaited, nothing streaming.
    fn should_quit(&self) -> bool {
        !self.behaviour.has_processors()
            && self.ctx.active_promises.is_empty()
            && self.ctx.inflight.is_empty()
            && (self.behaviour.finished_service_processor.is_none()
                || self.ctx.monitoring.is_empty())
            && self.ctx.stream_inputs.is_empty()
            && self.ctx.stream_outputs.is_empty()
    }

    fn quit_if_inactive(&mut self) {
        if self.ctx.state == Lifecycle::Closed {
            return;
        }
        if self.should_quit() {
            self.ctx.state = Lifecycle::Quitting;
        }
        if self.ctx.state == Lifecycle::Quitting {
            self.behaviour.clear_processors();
            self.ctx.close_pending_outputs(&mut self.state);
            if let Some(exit) = self.behaviour.exit_processor.take() {
                exit(&mut self.state, &mut self.ctx);
            }
        }
        if self.should_quit() {
            self.ctx.state = Lifecycle::Closed;
        }
    }

    fn finish(&mut self) {
        tracing::debug!(
            actor = self.ctx.service.id(),
            name = self.behaviour.name.as_deref().unwrap_or(""),
            "actor closed"
        );
        self.mailbox.close();
        self.ctx.close(&mut self.state);
        let id = self.ctx.service.id();
        self.ctx.system.deregister(id);
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
