//! Stream establishment, ordering, backpressure, teardown and state-change
//! broadcasting.

mod common;

use std::collections::VecDeque;

use common::{caller, downcast, recv, test_system, Go};
use troupe::{
    on_reply, Actor, ActorError, ActorService, Behaviour, BoxedMessage, Context, DataSource,
    GetStatus, OutputId, RequestStream, Response, StateChangeOutput, StateChangeStream, Status,
    StreamInput, StreamInputBase, StreamOutput, StreamOutputBase, StreamRequestDescriptor,
    Subscribers,
};

/// The carrier command: a log fetch whose payload is the stream descriptor.
struct FetchLog {
    stream: Option<StreamRequestDescriptor>,
}

impl FetchLog {
    fn new() -> Self {
        Self { stream: None }
    }
}

impl RequestStream for FetchLog {
    fn set_stream_request(&mut self, request: StreamRequestDescriptor) {
        self.stream = Some(request);
    }

    fn take_stream_request(&mut self) -> Option<StreamRequestDescriptor> {
        self.stream.take()
    }
}

struct Publish(String);

/// Producer serving its entry queue over log streams.
struct LogProducer {
    entries: VecDeque<String>,
    close_when_done: bool,
    live: Vec<OutputId>,
    events: flume::Sender<&'static str>,
}

impl Actor for LogProducer {
    fn make_behaviour(&mut self, _ctx: &mut Context<Self>) -> Behaviour<Self> {
        let mut behaviour = Behaviour::new();
        behaviour.name("log-producer");
        behaviour
            .add_command(|me: &mut Self, ctx, msg: &mut FetchLog| {
                let output = Box::new(LogOutput {
                    base: StreamOutputBase::new(false),
                    events: me.events.clone(),
                });
                if let Some(id) = ctx.init_stream_output(me, output, msg) {
                    me.live.push(id);
                }
                Ok(Response::Empty)
            })
            .result::<()>();
        behaviour.add_message(|me: &mut Self, ctx, Publish(entry): Publish| {
            me.entries.push_back(entry);
            for id in &me.live {
                ctx.new_data_available(id);
            }
        });
        behaviour
    }
}

struct LogOutput {
    base: StreamOutputBase,
    events: flume::Sender<&'static str>,
}

impl StreamOutput<LogProducer> for LogOutput {
    fn fill(
        &mut self,
        state: &mut LogProducer,
        _ctx: &mut Context<LogProducer>,
        _slot: &mut Option<BoxedMessage>,
        max_len: usize,
    ) -> Result<Option<BoxedMessage>, ActorError> {
        if state.entries.is_empty() {
            if state.close_when_done {
                self.base.close_stream(None);
            }
            return Ok(None);
        }
        let n = max_len.min(state.entries.len());
        let chunk: Vec<String> = state.entries.drain(..n).collect();
        Ok(Some(Box::new(chunk)))
    }

    fn acknowledged(&mut self, _state: &mut LogProducer, _ctx: &mut Context<LogProducer>) {
        let _ = self.events.send("acked");
    }

    fn closed(
        &mut self,
        _state: &mut LogProducer,
        _ctx: &mut Context<LogProducer>,
        _err: Option<ActorError>,
    ) {
        let _ = self.events.send("output closed");
    }

    fn base(&mut self) -> &mut StreamOutputBase {
        &mut self.base
    }
}

fn send_chunk(events: &flume::Sender<String>, data: Option<BoxedMessage>) -> Result<(), ActorError> {
    if let Some(data) = data {
        let chunk = data
            .downcast::<Vec<String>>()
            .map_err(|_| ActorError::WrongTypeRequested)?;
        for item in *chunk {
            let _ = events.send(item);
        }
    }
    Ok(())
}

fn close_event(events: &flume::Sender<String>, err: Option<ActorError>) {
    let _ = events.send(match err {
        None => "closed:ok".to_string(),
        Some(err) => format!("closed:{err}"),
    });
}

/// Input that forwards every item and immediately re-credits the producer.
struct CollectInput {
    base: StreamInputBase,
    events: flume::Sender<String>,
}

impl<A: Send + 'static> StreamInput<A> for CollectInput {
    fn process(
        &mut self,
        _state: &mut A,
        _ctx: &mut Context<A>,
        data: Option<BoxedMessage>,
    ) -> Result<(), ActorError> {
        send_chunk(&self.events, data)
    }

    fn closed(&mut self, _state: &mut A, _ctx: &mut Context<A>, err: Option<ActorError>) {
        close_event(&self.events, err);
    }

    fn make_slot(&mut self) -> Option<BoxedMessage> {
        Some(Box::new(Vec::<String>::new()))
    }

    fn base(&mut self) -> &mut StreamInputBase {
        &mut self.base
    }
}

struct Subscribe;
struct Unsubscribe;
struct Proceed;
struct AckNow;

/// Consumer wired to one producer; variants of its input drive the tests.
struct Collector {
    producer: ActorService,
    events: flume::Sender<String>,
    mode: CollectorMode,
    stream: Option<u64>,
}

enum CollectorMode {
    /// Auto re-crediting input with a typed slot.
    Eager,
    /// Input that never re-credits on its own; `Proceed` does it.
    Deferred,
    /// Input with no slot, exercising the first-touch path.
    Lazy,
}

impl Actor for Collector {
    fn make_behaviour(&mut self, _ctx: &mut Context<Self>) -> Behaviour<Self> {
        let mut behaviour = Behaviour::new();
        behaviour.name("collector");
        behaviour.add_message(|me: &mut Self, ctx, _msg: Subscribe| {
            let input: Box<dyn StreamInput<Self>> = match me.mode {
                CollectorMode::Eager => Box::new(CollectInput {
                    base: StreamInputBase::new(1),
                    events: me.events.clone(),
                }),
                CollectorMode::Deferred => Box::new(DeferInput {
                    base: StreamInputBase::new(1),
                    events: me.events.clone(),
                }),
                CollectorMode::Lazy => Box::new(LazyInput {
                    base: StreamInputBase::new(0),
                    events: me.events.clone(),
                }),
            };
            let mut request = FetchLog::new();
            let id = ctx.init_stream_request(&mut request, input);
            me.stream = Some(id);
            let producer = me.producer.clone();
            let events = me.events.clone();
            ctx.send_request(
                &producer,
                request,
                troupe::on_reply_error(move |_me: &mut Self, _ctx, err| {
                    let _ = events.send(format!("stream error: {err}"));
                }),
            );
        });
        behaviour.add_message(|me: &mut Self, ctx, _msg: Proceed| {
            if let Some(id) = me.stream {
                ctx.stream_request_next(id, Some(Box::new(Vec::<String>::new())));
            }
        });
        behaviour.add_message(|me: &mut Self, ctx, _msg: AckNow| {
            if let Some(id) = me.stream {
                ctx.acknowledge_stream(id);
            }
        });
        behaviour.add_message(|me: &mut Self, ctx, _msg: Unsubscribe| {
            if let Some(id) = me.stream.take() {
                ctx.close_input_by_id(me, id, None);
            }
        });
        behaviour
    }
}

/// Input that leaves re-crediting to the actor (backpressure test).
struct DeferInput {
    base: StreamInputBase,
    events: flume::Sender<String>,
}

impl StreamInput<Collector> for DeferInput {
    fn process(
        &mut self,
        _state: &mut Collector,
        _ctx: &mut Context<Collector>,
        data: Option<BoxedMessage>,
    ) -> Result<(), ActorError> {
        send_chunk(&self.events, data)
    }

    fn request_next(&mut self, _state: &mut Collector, _ctx: &mut Context<Collector>) {
        // Pacing is driven by Proceed messages.
    }

    fn closed(
        &mut self,
        _state: &mut Collector,
        _ctx: &mut Context<Collector>,
        err: Option<ActorError>,
    ) {
        close_event(&self.events, err);
    }

    fn make_slot(&mut self) -> Option<BoxedMessage> {
        Some(Box::new(Vec::<String>::new()))
    }

    fn base(&mut self) -> &mut StreamInputBase {
        &mut self.base
    }
}

/// Slot-less input: its first exchange goes through `StreamCanSend`.
struct LazyInput {
    base: StreamInputBase,
    events: flume::Sender<String>,
}

impl StreamInput<Collector> for LazyInput {
    fn process(
        &mut self,
        _state: &mut Collector,
        _ctx: &mut Context<Collector>,
        data: Option<BoxedMessage>,
    ) -> Result<(), ActorError> {
        send_chunk(&self.events, data)
    }

    fn closed(
        &mut self,
        _state: &mut Collector,
        _ctx: &mut Context<Collector>,
        err: Option<ActorError>,
    ) {
        close_event(&self.events, err);
    }

    fn base(&mut self) -> &mut StreamInputBase {
        &mut self.base
    }
}

fn entries(items: &[&str]) -> VecDeque<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn stream_delivers_in_order_then_closes_clean() {
    let system = test_system();
    let (producer_events, _producer_rx) = flume::unbounded();
    let (events, events_rx) = flume::unbounded::<String>();
    let (statuses, statuses_rx) = flume::unbounded::<Status>();

    let producer = system.spawn(LogProducer {
        entries: entries(&["x", "y", "z"]),
        close_when_done: true,
        live: Vec::new(),
        events: producer_events,
    });
    let collector = system.spawn(Collector {
        producer: producer.clone(),
        events,
        mode: CollectorMode::Eager,
        stream: None,
    });
    collector.send(Subscribe);

    for expected in ["x", "y", "z", "closed:ok"] {
        assert_eq!(recv(&events_rx).await, expected);
    }

    // Both stream tables are empty again.
    let collector_probe = collector.clone();
    let probe = system.spawn(caller(move |_me, ctx| {
        for target in [&producer, &collector_probe] {
            let statuses = statuses.clone();
            ctx.send_request(
                target,
                GetStatus,
                on_reply(move |_me: &mut common::Caller, _ctx, data| {
                    let _ = statuses.send(downcast::<Status>(data));
                }),
            );
        }
        ctx.quit(None);
    }));
    probe.send(Go);
    for _ in 0..2 {
        let status = recv(&statuses_rx).await;
        assert_eq!(status.stream_inputs, 0);
        assert_eq!(status.stream_outputs, 0);
    }

    system.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn consumer_paces_the_producer_without_losing_data() {
    let system = test_system();
    let (producer_events, producer_rx) = flume::unbounded::<&'static str>();
    let (events, events_rx) = flume::unbounded::<String>();

    let producer = system.spawn(LogProducer {
        entries: entries(&["x", "y"]),
        close_when_done: true,
        live: Vec::new(),
        events: producer_events,
    });
    let collector = system.spawn(Collector {
        producer,
        events,
        mode: CollectorMode::Deferred,
        stream: None,
    });
    collector.send(Subscribe);

    // One credit was embedded in the request; nothing more flows until the
    // consumer asks again.
    assert_eq!(recv(&events_rx).await, "x");

    // A bare acknowledgment reaches the producer without granting credit.
    collector.send(AckNow);
    assert_eq!(recv(&producer_rx).await, "acked");

    collector.send(Proceed);
    assert_eq!(recv(&events_rx).await, "y");
    collector.send(Proceed);
    assert_eq!(recv(&events_rx).await, "closed:ok");

    system.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn slotless_stream_arms_and_flushes_on_new_data() {
    let system = test_system();
    let (producer_events, producer_rx) = flume::unbounded::<&'static str>();
    let (events, events_rx) = flume::unbounded::<String>();

    let producer = system.spawn(LogProducer {
        entries: VecDeque::new(),
        close_when_done: false,
        live: Vec::new(),
        events: producer_events,
    });
    let collector = system.spawn(Collector {
        producer: producer.clone(),
        events,
        mode: CollectorMode::Lazy,
        stream: None,
    });
    collector.send(Subscribe);

    // The producer had nothing; publishing flushes the armed output.
    producer.send(Publish("live".to_string()));
    assert_eq!(recv(&events_rx).await, "live");

    // Consumer-initiated teardown reaches the producer's output.
    collector.send(Unsubscribe);
    assert_eq!(recv(&events_rx).await, "closed:ok");
    loop {
        match recv(&producer_rx).await {
            "output closed" => break,
            "acked" => continue,
            other => panic!("unexpected producer event: {other}"),
        }
    }

    system.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn failed_stream_request_reports_and_closes_the_input() {
    let system = test_system();
    let (events, events_rx) = flume::unbounded::<String>();

    // An actor with no log handler: the carrier request fails outright.
    let sink = system.spawn(caller(|_me, _ctx| {}));
    let input_events = events.clone();
    let error_events = events.clone();
    let consumer = system.spawn(caller(move |_me, ctx| {
        let input = Box::new(CollectInput {
            base: StreamInputBase::new(1),
            events: input_events.clone(),
        });
        ctx.request_stream(
            input,
            &sink,
            FetchLog::new(),
            move |_me: &mut common::Caller, _ctx, err| {
                let _ = error_events.send(format!("error: {err}"));
            },
        );
    }));
    consumer.send(Go);

    let unrecognized = ActorError::UnrecognizedCommand;
    assert_eq!(recv(&events_rx).await, format!("error: {unrecognized}"));
    assert_eq!(recv(&events_rx).await, format!("closed:{unrecognized}"));

    system.shutdown().await.expect("clean shutdown");
}

// ---- state-change broadcasting --------------------------------------------

struct AddItem(String);
struct LogState;

struct ChangeLog {
    items: Vec<String>,
    buffer: Vec<String>,
    start_offset: usize,
    listening: bool,
}

impl ChangeLog {
    fn new(items: &[&str]) -> Self {
        Self {
            items: items.iter().map(|s| s.to_string()).collect(),
            buffer: Vec::new(),
            start_offset: 0,
            listening: false,
        }
    }

    fn add(&mut self, item: String) {
        self.items.push(item.clone());
        if self.listening {
            self.buffer.push(item);
        }
    }
}

struct SnapshotSource {
    items: Option<Vec<String>>,
}

impl DataSource for SnapshotSource {
    fn fill(
        &mut self,
        _slot: &mut Option<BoxedMessage>,
        _max_len: usize,
    ) -> Result<Option<BoxedMessage>, ActorError> {
        Ok(self
            .items
            .take()
            .map(|items| Box::new(items) as BoxedMessage))
    }
}

impl StateChangeStream for ChangeLog {
    fn fill_data(
        &mut self,
        _slot: &mut Option<BoxedMessage>,
        offset: usize,
        max_len: usize,
    ) -> Result<(Option<BoxedMessage>, usize), ActorError> {
        if offset < self.start_offset {
            return Err(ActorError::OffsetOutOfRange);
        }
        let index = offset - self.start_offset;
        if index >= self.buffer.len() {
            return Ok((None, offset));
        }
        let n = (self.buffer.len() - index).min(max_len);
        let chunk: Vec<String> = self.buffer[index..index + n].to_vec();
        Ok((Some(Box::new(chunk)), offset + n))
    }

    fn latest_state(&mut self) -> (usize, Box<dyn DataSource>) {
        self.listening = true;
        (
            self.start_offset + self.buffer.len(),
            Box::new(SnapshotSource {
                items: Some(self.items.clone()),
            }),
        )
    }

    fn last_offset_changed(&mut self, offset: usize) {
        let consumed = offset - self.start_offset;
        if consumed > 0 && consumed * 2 >= self.buffer.len() {
            self.buffer.drain(..consumed);
            self.start_offset = offset;
        }
    }

    fn no_more_subscribers(&mut self) {
        self.buffer.clear();
        self.start_offset = 0;
        self.listening = false;
    }
}

struct Registry {
    log: ChangeLog,
    subscribers: Subscribers,
    outputs: Vec<OutputId>,
}

fn registry_log(registry: &mut Registry) -> &mut (dyn StateChangeStream + 'static) {
    &mut registry.log
}

impl Actor for Registry {
    fn make_behaviour(&mut self, _ctx: &mut Context<Self>) -> Behaviour<Self> {
        let mut behaviour = Behaviour::new();
        behaviour.name("registry");
        behaviour
            .add_command(|me: &mut Self, ctx, msg: &mut FetchLog| {
                let output = Box::new(StateChangeOutput::new(&me.subscribers, registry_log));
                if let Some(id) = ctx.init_stream_output(me, output, msg) {
                    me.outputs.push(id);
                }
                Ok(Response::Empty)
            })
            .result::<()>();
        behaviour.add_message(|me: &mut Self, ctx, AddItem(item): AddItem| {
            me.log.add(item);
            for id in &me.outputs {
                ctx.new_data_available(id);
            }
        });
        behaviour
            .add_command(|me: &mut Self, _ctx, _msg: &mut LogState| {
                Ok(Response::value((me.log.listening, me.log.buffer.len())))
            })
            .result::<(bool, usize)>();
        behaviour
    }
}

#[tokio::test]
async fn broadcaster_serves_snapshot_then_live_changes() {
    let system = test_system();
    let (events, events_rx) = flume::unbounded::<String>();
    let (states, states_rx) = flume::unbounded::<(bool, usize)>();

    let registry = system.spawn(Registry {
        log: ChangeLog::new(&["a", "b"]),
        subscribers: Subscribers::new(),
        outputs: Vec::new(),
    });
    let collector = system.spawn(Collector {
        producer: registry.clone(),
        events,
        mode: CollectorMode::Eager,
        stream: None,
    });
    collector.send(Subscribe);

    // Snapshot of the existing state first.
    assert_eq!(recv(&events_rx).await, "a");
    assert_eq!(recv(&events_rx).await, "b");

    // Then live changes, flushed through the armed output.
    registry.send(AddItem("c".to_string()));
    assert_eq!(recv(&events_rx).await, "c");

    // Dropping the last subscriber resets the change buffer.
    collector.send(Unsubscribe);
    assert_eq!(recv(&events_rx).await, "closed:ok");

    let registry_probe = registry.clone();
    let probe = system.spawn(caller(move |_me, ctx| {
        ctx.send_request(
            &registry_probe,
            LogState,
            on_reply(move |_me: &mut common::Caller, ctx, data| {
                let _ = states.send(downcast::<(bool, usize)>(data));
                ctx.quit(None);
            }),
        );
    }));
    probe.send(Go);
    assert_eq!(recv(&states_rx).await, (false, 0));

    system.shutdown().await.expect("clean shutdown");
}
