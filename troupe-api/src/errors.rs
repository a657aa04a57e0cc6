use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the actor runtime.
///
/// `Clone` is required because one terminal condition can fan out to many
/// peers: an actor closing with an error reports it to every monitor, every
/// open stream and every unanswered promise.
#[derive(Error, Debug, Clone)]
pub enum ActorError {
    /// Reply to, or close of, a still-open promise on a closing actor.
    #[error("actor is dead")]
    ActorDead,

    /// The request's canceller was fired before a reply arrived.
    #[error("request cancelled")]
    Cancelled,

    /// A stream consumer requested an offset preceding the producer's
    /// compacted window.
    #[error("stream offset out of range")]
    OffsetOutOfRange,

    /// A stream producer was asked to fill a slot of an unexpected type.
    #[error("wrong type requested from stream")]
    WrongTypeRequested,

    /// Stream output initialization received a request without a valid
    /// stream descriptor.
    #[error("invalid stream request")]
    BadStream,

    /// A reply that was expected to carry a stream descriptor did not.
    #[error("reply is not a stream request")]
    NotStreamReply,

    /// A command arrived whose payload type has no registered handler.
    #[error("unrecognized command")]
    UnrecognizedCommand,

    /// A handler panicked; the payload carries the captured panic message.
    /// Panics never cross into peers except as this reply error.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Escape hatch for user handler failures.
    #[error("{0}")]
    Other(#[from] Arc<anyhow::Error>),
}

impl From<anyhow::Error> for ActorError {
    fn from(err: anyhow::Error) -> Self {
        ActorError::Other(Arc::new(err))
    }
}

impl ActorError {
    /// Wraps an arbitrary error message as a user failure.
    pub fn other(msg: impl Into<String>) -> Self {
        ActorError::from(anyhow::anyhow!(msg.into()))
    }
}
