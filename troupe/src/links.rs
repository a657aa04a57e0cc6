//! Lifecycle edges between actors.
//!
//! A link is a directed edge stored twice: once in the originator's map and
//! once in the target's, kept consistent by an [`EstablishLinkMessage`].
//! On close, the supervisor walks both maps and posts quit or
//! close-notification to the right peers; teardown posts messages, it never
//! traverses a shared ownership graph.

use troupe_api::errors::ActorError;

use crate::service::ActorService;

/// What an edge means for the peer when this actor closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Bidirectional: either side closing quits the other.
    Link,
    /// One-way: the holder of the incoming edge quits when this actor closes.
    Depend,
    /// One-way, outgoing flavour: this actor closing quits the target.
    Kill,
    /// Notify-only: the peer's finished-service processor runs, nothing quits.
    Monitor,
}

pub(crate) struct EstablishLinkMessage {
    pub source: ActorService,
    pub kind: LinkKind,
}

pub(crate) struct NotifyCloseMessage {
    pub source: ActorService,
    pub err: Option<ActorError>,
}
