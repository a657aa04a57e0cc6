//! The stream engine.
//!
//! A stream is a one-way data flow from a producer actor holding a
//! [`StreamOutput`] to a consumer actor holding a [`StreamInput`],
//! established out-of-band inside a normal request/reply exchange whose
//! payload implements [`RequestStream`].
//!
//! Backpressure is credit-based: the consumer issues one
//! [`StreamRequestMessage`] at a time and the producer answers it with one
//! reply. A producer with nothing ready stays *armed* on the stored request
//! until it marks itself ready via `Context::new_data_available`, at which
//! point the dispatcher flushes it at the next barrier. Teardown is
//! symmetric and idempotent: `UpstreamStopped` from the producer,
//! `DownstreamStopped` from the consumer, both terminal on receipt.

use std::any::Any;
use std::marker::PhantomData;

use troupe_api::errors::ActorError;
use troupe_api::types::BoxedMessage;

use crate::context::{Context, Lifecycle};
use crate::envelope::Envelope;
use crate::request::{on_reply_error, Canceller, ReplyProcessor};
use crate::service::ActorService;

/// Chunk budget used when a stream request does not name one.
pub const DEFAULT_MAX_LEN: usize = 64;

pub(crate) fn effective_max(max_len: usize) -> usize {
    if max_len == 0 {
        DEFAULT_MAX_LEN
    } else {
        max_len
    }
}

/// Names a stream output on the producer: the consumer-allocated stream
/// counter plus the consumer's service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputId {
    pub stream: u64,
    pub destination: ActorService,
}

/// Names a stream input's peer on the consumer: the stream counter plus the
/// producer's service, learned from the first data to arrive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId {
    pub stream: u64,
    pub source: ActorService,
}

pub(crate) struct StreamCanSendMessage {
    pub id: SourceId,
}

pub(crate) struct StreamRequestMessage {
    pub id: OutputId,
    pub slot: Option<BoxedMessage>,
    pub max_len: usize,
}

pub(crate) struct StreamReplyMessage {
    pub id: SourceId,
    pub data: BoxedMessage,
}

pub(crate) struct StreamAckMessage {
    pub id: OutputId,
}

pub(crate) struct UpstreamStoppedMessage {
    pub id: SourceId,
    pub err: Option<ActorError>,
}

pub(crate) struct DownstreamStoppedMessage {
    pub id: OutputId,
    pub err: Option<ActorError>,
}

/// Stream metadata stamped into a user command by
/// `Context::init_stream_request` and consumed on the producer by
/// `Context::init_stream_output`.
pub struct StreamRequestDescriptor {
    pub id: OutputId,
    pub slot: Option<BoxedMessage>,
    pub max_len: usize,
}

/// Implemented by command payloads that carry a stream descriptor. The
/// usual shape is a struct with an `Option<StreamRequestDescriptor>` field.
pub trait RequestStream: Send {
    fn set_stream_request(&mut self, request: StreamRequestDescriptor);
    fn take_stream_request(&mut self) -> Option<StreamRequestDescriptor>;
}

/// Consumer-side table state: identity, the source once learned, and the
/// single-outstanding-request discipline.
pub struct StreamInputBase {
    pub(crate) id: u64,
    pub(crate) consumer: Option<ActorService>,
    pub(crate) source: Option<ActorService>,
    pub(crate) pending: bool,
    pub(crate) max_len: usize,
}

impl StreamInputBase {
    pub fn new(max_len: usize) -> Self {
        Self {
            id: 0,
            consumer: None,
            source: None,
            pending: false,
            max_len,
        }
    }

    pub(crate) fn init(&mut self, consumer: ActorService, id: u64) {
        self.consumer = Some(consumer);
        self.id = id;
    }

    /// The producer service, once the first chunk has arrived.
    pub fn source(&self) -> Option<&ActorService> {
        self.source.as_ref()
    }

    /// Issues the next credit to the source, if known. At most one request
    /// is in flight per stream; extra calls are ignored until data arrives.
    pub fn send_next(&mut self, slot: Option<BoxedMessage>) {
        if self.pending {
            return;
        }
        let (Some(source), Some(consumer)) = (&self.source, &self.consumer) else {
            return;
        };
        self.pending = true;
        source.enqueue(Envelope::StreamRequest(StreamRequestMessage {
            id: OutputId {
                stream: self.id,
                destination: consumer.clone(),
            },
            slot,
            max_len: self.max_len,
        }));
    }
}

impl Default for StreamInputBase {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Consumer side of a stream.
///
/// `process` receives each chunk in producer order (`None` marks the
/// producer's first-touch "can send" signal); returning an error tears the
/// stream down with that error. The default `request_next` immediately
/// re-credits the producer; override it to pace consumption and re-credit
/// later through `Context::stream_request_next`.
pub trait StreamInput<A>: Send {
    fn process(
        &mut self,
        state: &mut A,
        ctx: &mut Context<A>,
        data: Option<BoxedMessage>,
    ) -> Result<(), ActorError>;

    fn request_next(&mut self, _state: &mut A, _ctx: &mut Context<A>) {
        let slot = self.make_slot();
        self.base().send_next(slot);
    }

    fn closed(&mut self, _state: &mut A, _ctx: &mut Context<A>, _err: Option<ActorError>) {}

    /// Slot value shipped with each request for the producer to fill.
    fn make_slot(&mut self) -> Option<BoxedMessage> {
        None
    }

    fn base(&mut self) -> &mut StreamInputBase;
}

/// Producer-side table state.
pub struct StreamOutputBase {
    pub(crate) id: Option<OutputId>,
    pub(crate) closing: bool,
    pub(crate) close_error: Option<ActorError>,
    pub(crate) close_when_actor_closes: bool,
}

impl StreamOutputBase {
    pub fn new(close_when_actor_closes: bool) -> Self {
        Self {
            id: None,
            closing: false,
            close_error: None,
            close_when_actor_closes,
        }
    }

    pub fn id(&self) -> Option<&OutputId> {
        self.id.as_ref()
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Marks the stream closing; teardown completes on the next ack or when
    /// armed with nothing left to send. The first error wins.
    pub fn close_stream(&mut self, err: Option<ActorError>) {
        if !self.closing {
            self.closing = true;
            self.close_error = err;
        }
    }

    pub(crate) fn close_now(&mut self, err: ActorError) {
        self.closing = true;
        self.close_error = Some(err);
    }
}

impl Default for StreamOutputBase {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Producer side of a stream.
///
/// `fill` produces the next chunk into (or instead of) the request's slot:
/// `Ok(Some(data))` sends it, `Ok(None)` arms the output until
/// `Context::new_data_available`, and an error closes the stream carrying
/// it. On `Ok(None)` the slot must be left in place for the armed request.
pub trait StreamOutput<A>: Send {
    fn fill(
        &mut self,
        state: &mut A,
        ctx: &mut Context<A>,
        slot: &mut Option<BoxedMessage>,
        max_len: usize,
    ) -> Result<Option<BoxedMessage>, ActorError>;

    /// The consumer processed the previous chunk.
    fn acknowledged(&mut self, _state: &mut A, _ctx: &mut Context<A>) {}

    fn closed(&mut self, _state: &mut A, _ctx: &mut Context<A>, _err: Option<ActorError>) {}

    fn base(&mut self) -> &mut StreamOutputBase;
}

pub(crate) struct OutputEntry<A> {
    pub output: Box<dyn StreamOutput<A>>,
    pub pending: Option<StreamRequestMessage>,
}

/// Reply processor used by `Context::request_stream_output`: expects the
/// reply to be a stream descriptor of type `R` and initializes the output
/// from it, reporting [`ActorError::NotStreamReply`] otherwise.
pub(crate) struct StreamOutputInit<A, R> {
    pub output: Box<dyn StreamOutput<A>>,
    pub processor: Option<Box<dyn ReplyProcessor<A>>>,
    pub _reply: PhantomData<fn() -> R>,
}

impl<A: 'static, R> ReplyProcessor<A> for StreamOutputInit<A, R>
where
    R: RequestStream + Any + Send,
{
    fn process(self: Box<Self>, state: &mut A, ctx: &mut Context<A>, mut data: BoxedMessage) {
        let StreamOutputInit {
            mut output,
            processor,
            ..
        } = *self;
        match data.downcast_mut::<R>() {
            Some(request) => {
                ctx.init_stream_output(state, output, request);
            }
            None => {
                output.closed(state, ctx, Some(ActorError::NotStreamReply));
            }
        }
        if let Some(processor) = processor {
            processor.process(state, ctx, data);
        }
    }

    fn error(self: Box<Self>, state: &mut A, ctx: &mut Context<A>, err: ActorError) {
        let StreamOutputInit {
            mut output,
            processor,
            ..
        } = *self;
        output.closed(state, ctx, Some(err.clone()));
        if let Some(processor) = processor {
            processor.error(state, ctx, err);
        }
    }
}

impl<A: 'static> Context<A> {
    /// Consumer: allocates a stream id, binds `input` to this actor, stamps
    /// `request` with the stream descriptor and registers the input. The
    /// descriptor carries the first credit; send the request with
    /// `send_request` (or use [`Context::request_stream`] which does both).
    pub fn init_stream_request(
        &mut self,
        request: &mut dyn RequestStream,
        mut input: Box<dyn StreamInput<A>>,
    ) -> u64 {
        self.next_stream_id += 1;
        let id = self.next_stream_id;
        let slot = input.make_slot();
        let base = input.base();
        base.init(self.service.clone(), id);
        base.pending = true;
        request.set_stream_request(StreamRequestDescriptor {
            id: OutputId {
                stream: id,
                destination: self.service.clone(),
            },
            slot,
            max_len: base.max_len,
        });
        self.stream_inputs.insert(id, input);
        id
    }

    /// Consumer: initializes `request` from `input` and sends it to the
    /// producer; a failed exchange reports to `on_error` and closes the
    /// input with the same error.
    pub fn request_stream<R>(
        &mut self,
        input: Box<dyn StreamInput<A>>,
        destination: &ActorService,
        mut request: R,
        on_error: impl FnOnce(&mut A, &mut Context<A>, &ActorError) + Send + 'static,
    ) -> Canceller
    where
        R: RequestStream + Any + Send,
    {
        let id = self.init_stream_request(&mut request, input);
        self.send_request(
            destination,
            request,
            on_reply_error(move |state, ctx: &mut Context<A>, err| {
                on_error(state, ctx, &err);
                ctx.close_input_by_id(state, id, Some(err));
            }),
        )
    }

    /// Producer: binds `output` to the descriptor carried by `request` and
    /// answers the first credit. Returns the output's id while the stream
    /// is live, `None` if it closed immediately.
    pub fn init_stream_output(
        &mut self,
        state: &mut A,
        mut output: Box<dyn StreamOutput<A>>,
        request: &mut dyn RequestStream,
    ) -> Option<OutputId> {
        let Some(descriptor) = request.take_stream_request() else {
            output.closed(state, self, Some(ActorError::BadStream));
            return None;
        };
        let id = descriptor.id.clone();
        output.base().id = Some(id.clone());
        if descriptor.slot.is_none() {
            // First touch without a data slot: invite the consumer to submit
            // a real request, then wait in the table without arming.
            id.destination.enqueue(Envelope::StreamCanSend(StreamCanSendMessage {
                id: SourceId {
                    stream: id.stream,
                    source: self.service.clone(),
                },
            }));
            self.stream_outputs.insert(
                id.clone(),
                OutputEntry {
                    output,
                    pending: None,
                },
            );
            return Some(id);
        }
        let request = StreamRequestMessage {
            id: id.clone(),
            slot: descriptor.slot,
            max_len: descriptor.max_len,
        };
        self.answer_stream_request(state, OutputEntry { output, pending: None }, request)
    }

    /// Producer: sends `request` expecting a reply of descriptor type `R`,
    /// then initializes `output` from it. A reply of any other shape closes
    /// the output with [`ActorError::NotStreamReply`].
    pub fn request_stream_output<R>(
        &mut self,
        output: Box<dyn StreamOutput<A>>,
        destination: &ActorService,
        request: impl Any + Send,
        processor: Option<Box<dyn ReplyProcessor<A>>>,
    ) -> Canceller
    where
        R: RequestStream + Any + Send,
    {
        self.send_request(
            destination,
            request,
            StreamOutputInit::<A, R> {
                output,
                processor,
                _reply: PhantomData,
            },
        )
    }

    /// Producer: marks an armed output ready; it is flushed at the next
    /// dispatcher barrier.
    pub fn new_data_available(&mut self, id: &OutputId) {
        if let Some(entry) = self.stream_outputs.get(id) {
            if entry.pending.is_some() {
                self.ready_outputs.insert(id.clone());
            }
        }
    }

    /// Consumer: re-credits a stream whose input deferred `request_next`.
    pub fn stream_request_next(&mut self, id: u64, slot: Option<BoxedMessage>) {
        if let Some(input) = self.stream_inputs.get_mut(&id) {
            input.base().send_next(slot);
        }
    }

    /// Consumer: tells the producer the previous chunk was processed,
    /// without requesting more. Used for output-driven pacing.
    pub fn acknowledge_stream(&mut self, id: u64) {
        if let Some(input) = self.stream_inputs.get_mut(&id) {
            let base = input.base();
            if let (Some(source), Some(consumer)) = (&base.source, &base.consumer) {
                source.enqueue(Envelope::StreamAck(StreamAckMessage {
                    id: OutputId {
                        stream: base.id,
                        destination: consumer.clone(),
                    },
                }));
            }
        }
    }

    pub(crate) fn process_stream_data(
        &mut self,
        state: &mut A,
        id: SourceId,
        data: Option<BoxedMessage>,
    ) {
        // Data for an unknown id was cancelled on this side; discard silently.
        let Some(mut input) = self.stream_inputs.remove(&id.stream) else {
            return;
        };
        {
            let base = input.base();
            if base.source.is_none() {
                base.source = Some(id.source.clone());
            }
            base.pending = false;
        }
        match input.process(state, self, data) {
            Ok(()) => {
                input.request_next(state, self);
                self.stream_inputs.insert(id.stream, input);
            }
            Err(err) => self.close_input(state, input, Some(err)),
        }
    }

    pub(crate) fn process_stream_request(&mut self, state: &mut A, request: StreamRequestMessage) {
        let Some(mut entry) = self.stream_outputs.remove(&request.id) else {
            return;
        };
        entry.output.acknowledged(state, self);
        self.answer_stream_request(state, entry, request);
    }

    pub(crate) fn process_stream_ack(&mut self, state: &mut A, ack: StreamAckMessage) {
        let Some(mut entry) = self.stream_outputs.remove(&ack.id) else {
            return;
        };
        entry.output.acknowledged(state, self);
        if entry.output.base().closing {
            self.finish_output(state, entry.output);
        } else {
            self.stream_outputs.insert(ack.id, entry);
        }
    }

    pub(crate) fn process_upstream_stopped(&mut self, state: &mut A, msg: UpstreamStoppedMessage) {
        if let Some(mut input) = self.stream_inputs.remove(&msg.id.stream) {
            input.closed(state, self, msg.err);
        }
    }

    pub(crate) fn process_downstream_stopped(
        &mut self,
        state: &mut A,
        msg: DownstreamStoppedMessage,
    ) {
        if let Some(mut entry) = self.stream_outputs.remove(&msg.id) {
            self.ready_outputs.remove(&msg.id);
            entry.output.closed(state, self, msg.err);
        }
    }

    /// Runs every ready output against its stored request. Called at the
    /// dispatcher barrier after each mailbox item.
    pub(crate) fn flush_ready_outputs(&mut self, state: &mut A) {
        if self.ready_outputs.is_empty() {
            return;
        }
        for id in std::mem::take(&mut self.ready_outputs) {
            let Some(mut entry) = self.stream_outputs.remove(&id) else {
                continue;
            };
            let Some(request) = entry.pending.take() else {
                self.stream_outputs.insert(id, entry);
                continue;
            };
            self.answer_stream_request(state, entry, request);
        }
    }

    /// Fills `entry`'s output against `request` and routes the result:
    /// data is replied, nothing leaves the output armed, errors and
    /// completed closings tear the stream down.
    fn answer_stream_request(
        &mut self,
        state: &mut A,
        mut entry: OutputEntry<A>,
        mut request: StreamRequestMessage,
    ) -> Option<OutputId> {
        let id = request.id.clone();
        match entry
            .output
            .fill(state, self, &mut request.slot, effective_max(request.max_len))
        {
            Err(err) => {
                entry.output.base().close_now(err);
                self.finish_output(state, entry.output);
                None
            }
            Ok(Some(data)) => {
                id.destination.enqueue(Envelope::StreamReply(StreamReplyMessage {
                    id: SourceId {
                        stream: id.stream,
                        source: self.service.clone(),
                    },
                    data,
                }));
                self.stream_outputs.insert(id.clone(), entry);
                Some(id)
            }
            Ok(None) => {
                let quit_error = self.quit_error.clone();
                let running = self.state == Lifecycle::Running;
                let base = entry.output.base();
                if base.close_when_actor_closes && !running {
                    base.close_stream(quit_error);
                }
                if base.closing {
                    self.finish_output(state, entry.output);
                    None
                } else {
                    entry.pending = Some(request);
                    self.stream_outputs.insert(id.clone(), entry);
                    Some(id)
                }
            }
        }
    }

    /// Completes producer-side teardown for an output already out of the
    /// table: notifies the consumer and fires the closed callback.
    pub(crate) fn finish_output(&mut self, state: &mut A, mut output: Box<dyn StreamOutput<A>>) {
        let base = output.base();
        let err = base.close_error.clone();
        if let Some(id) = base.id.clone() {
            self.ready_outputs.remove(&id);
            id.destination.enqueue(Envelope::UpstreamStopped(UpstreamStoppedMessage {
                id: SourceId {
                    stream: id.stream,
                    source: self.service.clone(),
                },
                err: err.clone(),
            }));
        }
        output.closed(state, self, err);
    }

    /// Consumer-side teardown for an input already out of the table.
    fn close_input(&mut self, state: &mut A, mut input: Box<dyn StreamInput<A>>, err: Option<ActorError>) {
        let base = input.base();
        let stream = base.id;
        if let Some(source) = base.source.clone() {
            source.enqueue(Envelope::DownstreamStopped(DownstreamStoppedMessage {
                id: OutputId {
                    stream,
                    destination: self.service.clone(),
                },
                err: err.clone(),
            }));
        }
        input.closed(state, self, err);
    }

    /// Consumer-side teardown by id; emits `DownstreamStopped` to the source.
    pub fn close_input_by_id(&mut self, state: &mut A, id: u64, err: Option<ActorError>) {
        if let Some(input) = self.stream_inputs.remove(&id) {
            self.close_input(state, input, err);
        }
    }

    /// Marks every output that should die with the actor as closing; armed
    /// ones have nothing left to send, so their teardown completes now.
    pub(crate) fn close_pending_outputs(&mut self, state: &mut A) {
        let quit_error = self.quit_error.clone();
        let mut completed = Vec::new();
        for (id, entry) in self.stream_outputs.iter_mut() {
            if self.ready_outputs.contains(id) {
                continue;
            }
            let base = entry.output.base();
            if !base.close_when_actor_closes {
                continue;
            }
            base.close_stream(quit_error.clone());
            if entry.pending.is_some() {
                completed.push(id.clone());
            }
        }
        for id in completed {
            if let Some(entry) = self.stream_outputs.remove(&id) {
                self.finish_output(state, entry.output);
            }
        }
    }
}
