//! Beat-quantized periodic event scheduling.
//!
//! Events live in beat space: each holds the beat of its next fire and its
//! period. The scheduler never looks at wall-clock time, so a tempo change
//! only changes when the clock reaches a beat, never which beat an event
//! fires on.
//!
//! `advance` repeatedly fires the due event with the smallest
//! `(next_fire, registration order)` key. That gives nondecreasing fire
//! order, stable ordering between simultaneous events, and catch-up firing
//! when one call covers several periods. It never allocates, and nothing
//! it does on the render path frees memory either: removed events come back
//! as [`RetiredEvent`]s for the caller to drop wherever that is safe.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};

use jr_ir::{MusicalTime, Subdivision};
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Generational handle to a scheduled event. A handle outlives its
    /// event harmlessly: operations on a cancelled handle are no-ops.
    pub struct EventHandle;
}

/// Work performed when an event fires.
///
/// `beat` is the intended fire beat, not the (later) beat at which the
/// scheduler noticed the event was due.
pub trait EventCallback<C>: Send {
    fn fire(&mut self, beat: MusicalTime, ctx: &mut C);
}

impl<C, F> EventCallback<C> for F
where
    F: FnMut(MusicalTime, &mut C) + Send,
{
    fn fire(&mut self, beat: MusicalTime, ctx: &mut C) {
        self(beat, ctx)
    }
}

/// Cross-thread liveness flag for one event.
///
/// The scheduler reads it immediately before every invocation, so flipping
/// it from any thread stops the event before its next fire.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct ScheduledEvent<C> {
    subdivision: Subdivision,
    next_fire: MusicalTime,
    callback: Box<dyn EventCallback<C>>,
    active: bool,
    /// Registration sequence; breaks ties between simultaneous events.
    order: u64,
    token: CancelToken,
}

/// An event taken out of the scheduler, still owning its callback.
/// Dropping it frees the callback.
pub struct RetiredEvent<C>(ScheduledEvent<C>);

impl<C> RetiredEvent<C> {
    /// Subdivision the event fired on.
    pub fn subdivision(&self) -> Subdivision {
        self.0.subdivision
    }
}

/// Periodic events keyed by handle, fired against a context `C`.
pub struct EventScheduler<C> {
    events: SlotMap<EventHandle, ScheduledEvent<C>>,
    next_order: u64,
    /// Events deactivated through their token and not yet taken out.
    cancelled: usize,
    /// Furthest position passed to `advance`.
    position: MusicalTime,
}

impl<C> Default for EventScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventScheduler<C> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-size the event table so registrations up to `capacity` never
    /// reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: SlotMap::with_capacity_and_key(capacity),
            next_order: 0,
            cancelled: 0,
            position: MusicalTime::zero(),
        }
    }

    /// Register a periodic event.
    ///
    /// The first fire is the first multiple of `subdivision` strictly after
    /// the current position, so registering never fires immediately.
    pub fn schedule<F>(&mut self, subdivision: Subdivision, callback: F) -> EventHandle
    where
        F: EventCallback<C> + 'static,
    {
        let order = self.next_order;
        self.next_order += 1;
        self.events.insert(ScheduledEvent {
            subdivision,
            next_fire: self.position.next_multiple_after(subdivision.sub_beats()),
            callback: Box::new(callback),
            active: true,
            order,
            token: CancelToken::default(),
        })
    }

    /// Deactivate and drop an event. Returns false for unknown handles.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.remove(handle).is_some()
    }

    /// Deactivate an event and hand it back without dropping it.
    pub fn remove(&mut self, handle: EventHandle) -> Option<RetiredEvent<C>> {
        let mut event = self.events.remove(handle)?;
        if !event.active {
            self.cancelled -= 1;
        }
        event.active = false;
        event.token.cancel();
        Some(RetiredEvent(event))
    }

    /// Token that cancels `handle` from another thread.
    pub fn cancel_token(&self, handle: EventHandle) -> Option<CancelToken> {
        self.events.get(handle).map(|e| e.token.clone())
    }

    pub fn is_active(&self, handle: EventHandle) -> bool {
        self.events
            .get(handle)
            .is_some_and(|e| e.active && !e.token.is_cancelled())
    }

    /// Beat of the next fire for a live event.
    pub fn next_fire(&self, handle: EventHandle) -> Option<MusicalTime> {
        self.events.get(handle).filter(|e| e.active).map(|e| e.next_fire)
    }

    pub fn position(&self) -> MusicalTime {
        self.position
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Fire every event due at or before `now`, in order. Returns the
    /// number of callbacks invoked.
    pub fn advance(&mut self, now: MusicalTime, ctx: &mut C) -> usize {
        if now > self.position {
            self.position = now;
        }

        let mut fired = 0;
        while let Some(key) = self.next_due(now) {
            let event = &mut self.events[key];
            if event.token.is_cancelled() {
                event.active = false;
                self.cancelled += 1;
                continue;
            }
            let beat = event.next_fire;
            event.next_fire = beat.add_sub_beats(event.subdivision.sub_beats());
            event.callback.fire(beat, ctx);
            fired += 1;
        }
        fired
    }

    fn next_due(&self, now: MusicalTime) -> Option<EventHandle> {
        self.events
            .iter()
            .filter(|(_, e)| e.active && e.next_fire <= now)
            .min_by_key(|(_, e)| (e.next_fire, e.order))
            .map(|(key, _)| key)
    }

    /// Take out one event that was cancelled through its token.
    pub fn take_cancelled(&mut self) -> Option<RetiredEvent<C>> {
        if self.cancelled == 0 {
            return None;
        }
        let key = self.events.iter().find(|(_, e)| !e.active).map(|(key, _)| key)?;
        self.remove(key)
    }

    /// Cancel everything (teardown).
    pub fn clear(&mut self) {
        for (_, event) in self.events.iter_mut() {
            event.active = false;
            event.token.cancel();
        }
        self.events.clear();
        self.cancelled = 0;
    }
}

impl<C> Drop for EventScheduler<C> {
    fn drop(&mut self) {
        self.clear();
    }
}
