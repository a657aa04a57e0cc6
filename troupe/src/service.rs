//! Service handles.
//!
//! An [`ActorService`] is the opaque, cheaply-copyable name of an actor's
//! mailbox. It is all a peer ever holds: equality, hashing and enqueue. A
//! handle never keeps the actor alive beyond its own teardown; enqueues to a
//! closed actor are silently dropped by the mailbox.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::mailbox::Mailbox;

/// Process-unique actor identity.
pub type ActorId = u64;

#[derive(Clone)]
pub struct ActorService {
    core: Arc<ServiceCore>,
}

struct ServiceCore {
    id: ActorId,
    mailbox: Arc<Mailbox>,
}

impl ActorService {
    pub(crate) fn new(id: ActorId, mailbox: Arc<Mailbox>) -> Self {
        Self {
            core: Arc::new(ServiceCore { id, mailbox }),
        }
    }

    pub fn id(&self) -> ActorId {
        self.core.id
    }

    /// Fire-and-forget user message from outside the actor world. Inside a
    /// handler, prefer `Context::send_message` so the send is attributable.
    pub fn send<M: Any + Send>(&self, message: M) {
        self.enqueue(Envelope::User(Box::new(message)));
    }

    pub(crate) fn enqueue(&self, item: Envelope) {
        self.core.mailbox.enqueue(item);
    }
}

impl PartialEq for ActorService {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl Eq for ActorService {}

impl Hash for ActorService {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

impl fmt::Debug for ActorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActorService").field(&self.core.id).finish()
    }
}
