//! State-change broadcasting over streams.
//!
//! A broadcaster actor owns one [`StateChangeStream`], a change log with a
//! compactable window, and serves any number of subscribers, each through
//! its own [`StateChangeOutput`]. A new subscriber first receives a
//! snapshot of the latest state, then live changes from the offset the
//! snapshot was taken at. Offsets let the log compact once every
//! subscriber has moved past a prefix; a subscriber that falls behind the
//! window is closed with [`ActorError::OffsetOutOfRange`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use troupe_api::errors::ActorError;
use troupe_api::types::BoxedMessage;

use crate::context::Context;
use crate::stream::{StreamOutput, StreamOutputBase};

/// A static snapshot served to one catching-up subscriber.
pub trait DataSource: Send {
    /// Next chunk of the snapshot; `Ok(None)` once exhausted.
    fn fill(
        &mut self,
        slot: &mut Option<BoxedMessage>,
        max_len: usize,
    ) -> Result<Option<BoxedMessage>, ActorError>;
}

/// A change log consumed by [`StateChangeOutput`] subscribers.
pub trait StateChangeStream: Send {
    /// Fills up to `max_len` changes starting at `offset`, returning the
    /// data and the next offset. `Ok((None, offset))` means nothing new yet.
    fn fill_data(
        &mut self,
        slot: &mut Option<BoxedMessage>,
        offset: usize,
        max_len: usize,
    ) -> Result<(Option<BoxedMessage>, usize), ActorError>;

    /// Current state as a snapshot plus the offset live reading continues
    /// from. Called once per new subscriber; history collection may start
    /// here.
    fn latest_state(&mut self) -> (usize, Box<dyn DataSource>);

    /// A subscriber advanced to `offset`; the log may compact up to the
    /// slowest subscriber.
    fn last_offset_changed(&mut self, _offset: usize) {}

    /// The last subscriber went away; buffered history can be dropped.
    fn no_more_subscribers(&mut self) {}
}

/// Shared subscriber tally for one broadcaster. Clone one handle into every
/// [`StateChangeOutput`] so the stream learns when the audience is gone.
#[derive(Clone, Default)]
pub struct Subscribers(Arc<AtomicUsize>);

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn add(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` when this removal was the last subscriber.
    fn remove(&self) -> bool {
        self.0.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

enum Phase {
    Start,
    Snapshot(Box<dyn DataSource>),
    Live,
}

type Access<A> =
    Box<dyn for<'a> FnMut(&'a mut A) -> &'a mut (dyn StateChangeStream + 'static) + Send>;

/// Stream output adapter serving one subscriber from a broadcaster's
/// [`StateChangeStream`], reached through an accessor into the actor state.
pub struct StateChangeOutput<A> {
    base: StreamOutputBase,
    access: Access<A>,
    subscribers: Subscribers,
    phase: Phase,
    offset: usize,
}

impl<A> StateChangeOutput<A> {
    pub fn new(
        subscribers: &Subscribers,
        access: impl for<'a> FnMut(&'a mut A) -> &'a mut (dyn StateChangeStream + 'static)
            + Send
            + 'static,
    ) -> Self {
        subscribers.add();
        Self {
            base: StreamOutputBase::new(true),
            access: Box::new(access),
            subscribers: subscribers.clone(),
            phase: Phase::Start,
            offset: 0,
        }
    }

    /// Offset this subscriber will read next.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<A: Send + 'static> StreamOutput<A> for StateChangeOutput<A> {
    fn fill(
        &mut self,
        state: &mut A,
        _ctx: &mut Context<A>,
        slot: &mut Option<BoxedMessage>,
        max_len: usize,
    ) -> Result<Option<BoxedMessage>, ActorError> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Live) {
                Phase::Start => {
                    let stream = (self.access)(state);
                    let (offset, snapshot) = stream.latest_state();
                    self.offset = offset;
                    self.phase = Phase::Snapshot(snapshot);
                }
                Phase::Snapshot(mut snapshot) => match snapshot.fill(slot, max_len)? {
                    Some(data) => {
                        self.phase = Phase::Snapshot(snapshot);
                        return Ok(Some(data));
                    }
                    None => {
                        self.phase = Phase::Live;
                    }
                },
                Phase::Live => {
                    self.phase = Phase::Live;
                    let offset = self.offset;
                    let stream = (self.access)(state);
                    let (data, next_offset) = stream.fill_data(slot, offset, max_len)?;
                    if next_offset != offset {
                        self.offset = next_offset;
                        stream.last_offset_changed(next_offset);
                    }
                    return Ok(data);
                }
            }
        }
    }

    fn closed(&mut self, state: &mut A, _ctx: &mut Context<A>, _err: Option<ActorError>) {
        if self.subscribers.remove() {
            (self.access)(state).no_more_subscribers();
        }
    }

    fn base(&mut self) -> &mut StreamOutputBase {
        &mut self.base
    }
}
