//! Internal mailbox items.
//!
//! Everything that crosses between actors is one of these variants; the
//! dispatcher switches on the kind exactly once per item. User payloads
//! travel in [`Envelope::User`], batches of them in [`Envelope::Batch`]
//! (flattened in order during the drain).

use troupe_api::errors::ActorError;
use troupe_api::types::BoxedMessage;

use crate::links::{EstablishLinkMessage, NotifyCloseMessage};
use crate::request::{CancelCommandMessage, CommandId, CommandMessage, PreReplyMessage, ReplyMessage};
use crate::stream::{
    DownstreamStoppedMessage, StreamAckMessage, StreamCanSendMessage, StreamReplyMessage,
    StreamRequestMessage, UpstreamStoppedMessage,
};

pub(crate) enum Envelope {
    Command(CommandMessage),
    Reply(ReplyMessage),
    PreReply(PreReplyMessage),
    CancelCommand(CancelCommandMessage),
    /// A locally-fired request canceller, routed through the owning actor's
    /// own mailbox to keep all state access single-threaded.
    CancelRequest(CommandId),
    EstablishLink(EstablishLinkMessage),
    NotifyClose(NotifyCloseMessage),
    Quit(Option<ActorError>),
    Close,
    StreamCanSend(StreamCanSendMessage),
    StreamRequest(StreamRequestMessage),
    StreamReply(StreamReplyMessage),
    StreamAck(StreamAckMessage),
    UpstreamStopped(UpstreamStoppedMessage),
    DownstreamStopped(DownstreamStoppedMessage),
    User(BoxedMessage),
    Batch(Vec<BoxedMessage>),
}
