//! The actor contract and two stock actors.

use troupe_api::errors::ActorError;

use crate::behaviour::Behaviour;
use crate::context::Context;

/// A unit of single-threaded sequential execution with a private mailbox.
///
/// The type is the actor's state; [`Actor::make_behaviour`] declares what it
/// handles. The runtime calls it exactly once, right after the actor is
/// wired to its mailbox and before any message is processed.
pub trait Actor: Send + Sized + 'static {
    fn make_behaviour(&mut self, ctx: &mut Context<Self>) -> Behaviour<Self>;
}

type BehaviourFactory =
    Box<dyn FnOnce(&mut Context<FuncActor>) -> Behaviour<FuncActor> + Send>;

/// Stateless actor whose behaviour comes from a closure; the shape behind
/// `System::become_func`, used to isolate per-request state.
pub struct FuncActor {
    factory: Option<BehaviourFactory>,
}

impl FuncActor {
    pub fn new(
        factory: impl FnOnce(&mut Context<FuncActor>) -> Behaviour<FuncActor> + Send + 'static,
    ) -> Self {
        Self {
            factory: Some(Box::new(factory)),
        }
    }
}

impl Actor for FuncActor {
    fn make_behaviour(&mut self, ctx: &mut Context<Self>) -> Behaviour<Self> {
        match self.factory.take() {
            Some(factory) => factory(ctx),
            None => Behaviour::default(),
        }
    }
}

/// Actor wrapping one offloaded blocking closure; quits when it finishes.
pub(crate) struct AsyncTask;

pub(crate) struct TaskFinished(pub Option<ActorError>);

impl Actor for AsyncTask {
    fn make_behaviour(&mut self, _ctx: &mut Context<Self>) -> Behaviour<Self> {
        let mut behaviour = Behaviour::new();
        behaviour.add_message(|_state: &mut Self, ctx, TaskFinished(err): TaskFinished| {
            ctx.quit(err);
        });
        behaviour
    }
}
