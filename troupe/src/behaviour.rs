//! The behaviour DSL.
//!
//! A [`Behaviour`] is the declarative contract of an actor: command and
//! message handlers keyed by the dynamic type of a registered payload, an
//! ordered filter chain, and the lifecycle hooks. `System::spawn` obtains it
//! from [`crate::Actor::make_behaviour`] once per actor.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

use troupe_api::errors::ActorError;
use troupe_api::info::CommandInfo;
use troupe_api::types::BoxedMessage;

use crate::context::Context;
use crate::service::ActorService;

/// What a command handler hands back to the dispatcher.
///
/// The dispatcher consumes the variant after the handler returns: plain
/// values become the reply, [`Response::Promise`] registers an active
/// promise to be fulfilled later, [`Response::Delegated`] hands the command
/// to another actor. `Binary` and `Text` are direct replies that bypass any
/// serialization a front-end would otherwise apply.
pub enum Response {
    Empty,
    Value(BoxedMessage),
    Binary(Vec<u8>),
    Text(String),
    /// Defer the reply; the callback runs if the origin cancels. Pair with
    /// `Context::promise` to fulfil the reply later.
    Promise(Box<dyn FnOnce() + Send>),
    Delegated(ActorService),
}

impl Response {
    pub fn value(data: impl Any + Send) -> Self {
        Response::Value(Box::new(data))
    }
}

pub(crate) type CommandHandler<A> = Box<
    dyn FnMut(&mut A, &mut Context<A>, &mut (dyn Any + Send)) -> Result<Response, ActorError> + Send,
>;
pub(crate) type MessageHandler<A> = Box<dyn FnMut(&mut A, &mut Context<A>, BoxedMessage) + Send>;
pub(crate) type CommandFilter<A> = Box<
    dyn FnMut(&mut A, &mut Context<A>, &mut (dyn Any + Send)) -> Result<Option<Response>, ActorError>
        + Send,
>;
pub(crate) type PanicHandler<A> = Box<dyn FnMut(&mut A, &mut Context<A>, ActorError) + Send>;
pub(crate) type ExitHandler<A> = Box<dyn FnOnce(&mut A, &mut Context<A>) + Send>;
pub(crate) type FinishedServiceHandler<A> =
    Box<dyn FnMut(&mut A, &mut Context<A>, &ActorService, Option<&ActorError>) + Send>;

pub struct Behaviour<A> {
    pub(crate) name: Option<String>,
    pub(crate) commands: HashMap<TypeId, CommandHandler<A>>,
    pub(crate) command_infos: Vec<CommandInfo>,
    pub(crate) messages: HashMap<TypeId, MessageHandler<A>>,
    pub(crate) filters: Vec<CommandFilter<A>>,
    pub(crate) panic_processor: Option<PanicHandler<A>>,
    pub(crate) exit_processor: Option<ExitHandler<A>>,
    pub(crate) finished_service_processor: Option<FinishedServiceHandler<A>>,
}

impl<A> Default for Behaviour<A> {
    fn default() -> Self {
        Self {
            name: None,
            commands: HashMap::new(),
            command_infos: Vec::new(),
            messages: HashMap::new(),
            filters: Vec::new(),
            panic_processor: None,
            exit_processor: None,
            finished_service_processor: None,
        }
    }
}

impl<A: 'static> Behaviour<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Registers a command handler for payloads of type `M`. Chain
    /// [`CommandToken::result`] to declare the reply shape for `GetInfo`.
    pub fn add_command<M, F>(&mut self, mut handler: F) -> CommandToken<'_, A>
    where
        M: Any + Send,
        F: FnMut(&mut A, &mut Context<A>, &mut M) -> Result<Response, ActorError> + Send + 'static,
    {
        let index = self.command_infos.len();
        self.command_infos.push(CommandInfo {
            name: type_name::<M>(),
            result: None,
        });
        self.commands.insert(
            TypeId::of::<M>(),
            Box::new(move |state, ctx, payload| match payload.downcast_mut::<M>() {
                Some(message) => handler(state, ctx, message),
                None => Err(ActorError::UnrecognizedCommand),
            }),
        );
        CommandToken {
            behaviour: self,
            index,
        }
    }

    /// Registers a fire-and-forget message handler for payloads of type `M`.
    pub fn add_message<M, F>(&mut self, mut handler: F) -> &mut Self
    where
        M: Any + Send,
        F: FnMut(&mut A, &mut Context<A>, M) + Send + 'static,
    {
        self.messages.insert(
            TypeId::of::<M>(),
            Box::new(move |state, ctx, payload| {
                if let Ok(message) = payload.downcast::<M>() {
                    handler(state, ctx, *message);
                }
            }),
        );
        self
    }

    /// Appends a filter to the command chain. Filters run before the
    /// handler, newest first; returning `Some(response)` short-circuits. A
    /// command paused inside a filter resumes after that filter.
    pub fn add_filter<F>(&mut self, filter: F) -> &mut Self
    where
        F: FnMut(
                &mut A,
                &mut Context<A>,
                &mut (dyn Any + Send),
            ) -> Result<Option<Response>, ActorError>
            + Send
            + 'static,
    {
        self.filters.push(Box::new(filter));
        self
    }

    /// Replaces the default panic reaction (`Quit` with the captured error).
    pub fn on_panic<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&mut A, &mut Context<A>, ActorError) + Send + 'static,
    {
        self.panic_processor = Some(Box::new(handler));
        self
    }

    /// Runs once when the actor starts quitting, before it can close.
    pub fn on_exit<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnOnce(&mut A, &mut Context<A>) + Send + 'static,
    {
        self.exit_processor = Some(Box::new(handler));
        self
    }

    /// Runs for every monitored peer that closes, with the peer's service
    /// and its quit error.
    pub fn on_finished_service<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&mut A, &mut Context<A>, &ActorService, Option<&ActorError>) + Send + 'static,
    {
        self.finished_service_processor = Some(Box::new(handler));
        self
    }

    pub(crate) fn has_processors(&self) -> bool {
        !self.commands.is_empty() || !self.messages.is_empty()
    }

    /// Drops every registered handler so the quiescence check can pass.
    /// Invoked when the actor starts quitting.
    pub(crate) fn clear_processors(&mut self) {
        self.commands.clear();
        self.messages.clear();
        self.filters.clear();
        self.finished_service_processor = None;
    }
}

/// Continuation of [`Behaviour::add_command`], declaring the reply shape.
pub struct CommandToken<'a, A> {
    behaviour: &'a mut Behaviour<A>,
    index: usize,
}

impl<A> CommandToken<'_, A> {
    /// Declares the expected reply type, recorded for `GetInfo` only.
    pub fn result<R: 'static>(self) {
        self.behaviour.command_infos[self.index].result = Some(type_name::<R>());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;
    struct Ping;
    struct Note(#[allow(dead_code)] u8);

    #[test]
    fn registration_tracks_infos_and_processors() {
        let mut behaviour: Behaviour<Probe> = Behaviour::new();
        assert!(!behaviour.has_processors());

        behaviour
            .add_command(|_state, _ctx, _msg: &mut Ping| Ok(Response::Empty))
            .result::<String>();
        behaviour.add_message(|_state, _ctx, _msg: Note| {});

        assert!(behaviour.has_processors());
        assert_eq!(behaviour.command_infos.len(), 1);
        assert_eq!(behaviour.command_infos[0].name, type_name::<Ping>());
        assert_eq!(behaviour.command_infos[0].result, Some(type_name::<String>()));

        behaviour.clear_processors();
        assert!(!behaviour.has_processors());
        // The introspection table survives clearing; it is read-only data.
        assert_eq!(behaviour.command_infos.len(), 1);
    }
}
