use crate::errors::ActorError;
use std::any::Any;

/// Type-erased message payload. Commands, fire-and-forget messages, replies
/// and stream chunks all travel as `BoxedMessage`; dispatch is by the
/// payload's dynamic type.
pub type BoxedMessage = Box<dyn Any + Send>;

/// Result alias used throughout the runtime and by reply processors.
pub type ActorResult<T> = Result<T, ActorError>;
