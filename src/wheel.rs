//! Hierarchical timing wheel over a logical tick counter.
//!
//! The wheel stores events in eight levels of 256 slots each. Level 0 has a
//! granularity of one tick per slot; every level above it is coarser by a
//! factor of 256, so the hierarchy spans the full 64-bit tick domain:
//!
//! | Level | Ticks per slot | Range covered    |
//! |-------|----------------|------------------|
//! | 0     | 1              | 256 ticks        |
//! | 1     | 256            | ~65 K ticks      |
//! | 2     | 65 536         | ~16.8 M ticks    |
//! | ...   | 256^L          | 256^(L+1) ticks  |
//! | 7     | 256^7          | entire u64       |
//!
//! An event with target tick `t` lives at the level of the highest byte in
//! which `t` differs from the current tick, in slot `(t >> 8·L) & 255`; the
//! byte above a level's granularity indexes its ring directly, so no per-level
//! cursor state is needed beyond the tick counter itself.
//!
//! # Advancing and cascading
//!
//! [`TimerWheel::advance`] moves time forward one tick at a time. Whenever
//! the low byte of the counter wraps to zero, the next level up has rotated:
//! its newly reached slot is drained and every event in it reinserted at a
//! finer level (or straight into the current level-0 slot when its tick has
//! arrived). Draining the level-0 slot then dispatches the due events.
//! Because a tick's slot is fully drained before the counter moves again, all
//! events for tick `X` fire before any event for tick `X + 1`.
//!
//! Each slot is drained into a temporary batch before any callback runs, so
//! callbacks may freely schedule and cancel against the wheel — including
//! rescheduling themselves — without invalidating the traversal. New
//! schedules always land at a strictly later tick.
//!
//! # Bounded advancement
//!
//! [`TimerWheel::advance_bounded`] caps the number of callbacks run in one
//! call. When the cap is hit mid-slot the undispatched remainder is
//! reattached to the slot and the wheel remembers how many ticks are still
//! owed; a follow-up `advance` with a delta of zero resumes exactly where the
//! previous call stopped. As long as the cap is at least one, every call
//! with due work fires at least one event.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::ScheduleError;
use crate::event::{EventHandle, NodeState, TimerEvent, TimerNode};
use crate::list::EventList;
use crate::Tick;

const SLOTS_PER_LEVEL: usize = 256;
const LEVEL_COUNT: usize = 8;
const SLOT_BITS: u32 = 8;
const SLOT_MASK: u64 = SLOTS_PER_LEVEL as u64 - 1;

struct WheelLevel {
    slots: [EventList; SLOTS_PER_LEVEL],
}

impl WheelLevel {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| EventList::new()),
        }
    }
}

/// Shared state behind every [`TimerWheel`] handle.
pub(crate) struct WheelCore {
    now: Cell<Tick>,
    ticks_pending: Cell<Tick>,
    advancing: Cell<bool>,
    len: Cell<usize>,
    levels: [WheelLevel; LEVEL_COUNT],
}

impl WheelCore {
    fn new(origin: Tick) -> Self {
        Self {
            now: Cell::new(origin),
            ticks_pending: Cell::new(0),
            advancing: Cell::new(false),
            len: Cell::new(0),
            levels: std::array::from_fn(|_| WheelLevel::new()),
        }
    }

    /// Removes a scheduled node on behalf of [`TimerNode::cancel`].
    pub(crate) fn unlink_scheduled(&self, node: &TimerNode, level: u8, slot: u8) {
        self.levels[level as usize].slots[slot as usize].unlink(node);
        self.len.set(self.len.get() - 1);
    }

    /// Accounts for a drained event cancelled before its dispatch.
    pub(crate) fn release_pending(&self) {
        self.len.set(self.len.get() - 1);
    }

    /// Level and slot for `deadline` relative to the current tick.
    fn placement(&self, deadline: Tick) -> (usize, usize) {
        let now = self.now.get();
        if deadline <= now {
            // Cascade caught up with the target: run in the current tick.
            return (0, (now & SLOT_MASK) as usize);
        }
        let differing = deadline ^ now;
        let level = ((u64::BITS - 1 - differing.leading_zeros()) / SLOT_BITS) as usize;
        let slot = ((deadline >> (SLOT_BITS * level as u32)) & SLOT_MASK) as usize;
        (level, slot)
    }

    /// Links an event whose node is already detached.
    fn insert(&self, this: &Weak<WheelCore>, event: &Rc<dyn TimerEvent>, deadline: Tick) {
        let (level, slot) = self.placement(deadline);
        self.levels[level].slots[slot].push_front(event);
        event.node().attach(this.clone(), level as u8, slot as u8, deadline);
    }

    /// Schedules an event, displacing any previous registration.
    fn insert_new(&self, this: &Weak<WheelCore>, event: &Rc<dyn TimerEvent>, deadline: Tick) {
        event.node().cancel();
        self.insert(this, event, deadline);
        self.len.set(self.len.get() + 1);
        tracing::trace!(deadline, "scheduled timer event");
    }

    fn run(&self, this: &Weak<WheelCore>, delta: Tick, mut budget: usize) -> bool {
        let pending = self.ticks_pending.replace(0);
        let mut remaining = delta.saturating_add(pending);
        // An interrupted tick was already counted and cascaded; re-drain its
        // slot before the counter moves again.
        let mut resuming = pending > 0;

        while remaining > 0 {
            if resuming {
                resuming = false;
            } else {
                let tick = self.now.get() + 1;
                self.now.set(tick);
                if tick & SLOT_MASK == 0 {
                    self.cascade(this, tick);
                }
            }

            let slot = (self.now.get() & SLOT_MASK) as usize;
            let batch = self.levels[0].slots[slot].take_all();
            for event in &batch {
                event.node().begin_dispatch();
            }

            let mut batch = batch.into_iter();
            while let Some(event) = batch.next() {
                let node = event.node();
                if node.state() != NodeState::Dispatching {
                    // Cancelled by an earlier callback in this batch.
                    continue;
                }
                if budget == 0 {
                    self.reattach(slot, &event, batch);
                    self.ticks_pending.set(remaining);
                    tracing::debug!(
                        ticks_pending = remaining,
                        "execution budget exhausted, advance interrupted"
                    );
                    return false;
                }
                node.finish_dispatch();
                self.len.set(self.len.get() - 1);
                budget -= 1;
                event.execute();
            }

            remaining -= 1;
        }
        true
    }

    /// Returns undispatched events to the slot they were drained from.
    fn reattach(
        &self,
        slot: usize,
        first: &Rc<dyn TimerEvent>,
        rest: std::vec::IntoIter<Rc<dyn TimerEvent>>,
    ) {
        let list = &self.levels[0].slots[slot];
        for event in std::iter::once(first.clone()).chain(rest) {
            if event.node().state() == NodeState::Dispatching {
                list.push_front(&event);
                event.node().requeue(slot as u8);
            }
        }
    }

    /// Drains every higher-level slot reached by `tick` and reinserts its
    /// events one level down (or into the current level-0 slot when due).
    /// The coarsest rotated level is processed first so its events can fall
    /// through the finer levels in the same tick.
    fn cascade(&self, this: &Weak<WheelCore>, tick: Tick) {
        let rotated = ((tick.trailing_zeros() / SLOT_BITS) as usize).min(LEVEL_COUNT - 1);
        for level in (1..=rotated).rev() {
            let slot = ((tick >> (SLOT_BITS * level as u32)) & SLOT_MASK) as usize;
            let batch = self.levels[level].slots[slot].take_all();
            if !batch.is_empty() {
                tracing::trace!(level, slot, count = batch.len(), "cascading slot");
            }
            for event in batch {
                let deadline = event.node().scheduled_at();
                self.insert(this, &event, deadline);
            }
        }
    }

    fn next_event_within(&self, max: Tick) -> Tick {
        if max == 0 {
            return 0;
        }
        if self.ticks_pending.get() > 0 {
            return 0;
        }
        let now = self.now.get();
        let mut best = max;
        for (level, wheel_level) in self.levels.iter().enumerate() {
            let bits = SLOT_BITS * level as u32;
            let position = now >> bits;
            for step in 1..SLOTS_PER_LEVEL as u64 {
                let coarse = position + step;
                if bits > 0 && coarse > (u64::MAX >> bits) {
                    break; // past the end of the tick domain
                }
                let earliest = (coarse << bits) - now;
                if earliest >= best {
                    break;
                }
                let slot = (coarse & SLOT_MASK) as usize;
                if let Some(at) = wheel_level.slots[slot].min_scheduled() {
                    best = best.min(at - now);
                }
            }
        }
        best
    }
}

/// A hierarchical timer wheel.
///
/// `TimerWheel` is a cheap handle over shared wheel state: cloning it yields
/// another handle to the same wheel, which is how callbacks reschedule
/// events — capture a clone. The wheel is strictly single-threaded (`!Send`)
/// and clock-agnostic: time only moves when the caller invokes
/// [`advance`][TimerWheel::advance] with a tick delta measured by whatever
/// clock the application uses.
///
/// Event storage is owned by the caller as `Rc` handles; the wheel keeps
/// weak links only. Dropping the last handle of a scheduled event cancels
/// it. Dropping the wheel while events are still scheduled is safe: the
/// orphaned events simply never fire.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tickwheel::{CallbackEvent, TimerEvent, TimerWheel};
///
/// let wheel = TimerWheel::new();
/// let fired = Rc::new(Cell::new(false));
/// let flag = fired.clone();
/// let event = CallbackEvent::new(move || flag.set(true));
///
/// wheel.schedule(&event, 5);
/// wheel.advance(4);
/// assert!(!fired.get());
/// wheel.advance(1);
/// assert!(fired.get());
/// assert!(!event.active());
/// ```
#[derive(Clone)]
pub struct TimerWheel {
    core: Rc<WheelCore>,
}

impl TimerWheel {
    /// Default origin tick.
    ///
    /// Large enough that a node's `scheduled_at` of 0 unambiguously means
    /// "never scheduled" rather than a real target tick.
    pub const DEFAULT_ORIGIN: Tick = 1 << 32;

    /// Creates a wheel starting at [`DEFAULT_ORIGIN`](Self::DEFAULT_ORIGIN).
    #[must_use]
    pub fn new() -> Self {
        Self::new_at(Self::DEFAULT_ORIGIN)
    }

    /// Creates a wheel whose tick counter starts at `origin`.
    #[must_use]
    pub fn new_at(origin: Tick) -> Self {
        Self {
            core: Rc::new(WheelCore::new(origin)),
        }
    }

    /// The current tick.
    ///
    /// Inside a timer callback this is the tick the callback's event was
    /// scheduled for, not the final tick of the advance in progress.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.core.now.get()
    }

    /// Number of scheduled events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.len.get()
    }

    /// Returns true if no events are scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedules `event` to fire `delta` ticks from now.
    ///
    /// If the event is already scheduled it is cancelled first, so the call
    /// doubles as a reschedule.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is zero. Use
    /// [`try_schedule`][Self::try_schedule] for a non-panicking variant.
    pub fn schedule<E: EventHandle>(&self, event: &E, delta: Tick) {
        self.try_schedule(event, delta)
            .expect("timer delay must be at least one tick");
    }

    /// Attempts to schedule `event` to fire `delta` ticks from now.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::ZeroDelay`] if `delta` is zero.
    pub fn try_schedule<E: EventHandle>(&self, event: &E, delta: Tick) -> Result<(), ScheduleError> {
        if delta == 0 {
            return Err(ScheduleError::ZeroDelay);
        }
        let event = event.to_event();
        let deadline = self.core.now.get() + delta;
        self.core
            .insert_new(&Rc::downgrade(&self.core), &event, deadline);
        Ok(())
    }

    /// Schedules `event` to fire between `start` and `end` ticks from now,
    /// choosing a tick that minimizes cascade work.
    ///
    /// If the event is already scheduled inside the window the call is a
    /// no-op — repeated reschedules with overlapping slack are free, which is
    /// the main throughput lever for heartbeat-style timers. Otherwise the
    /// wheel picks the latest tick in the window that starts a coarse slot
    /// (aligned to a power of 256), falling back to the window's end; such
    /// ticks skip intermediate cascade hops entirely.
    ///
    /// # Panics
    ///
    /// Panics unless `1 <= start < end`. Use
    /// [`try_schedule_in_range`][Self::try_schedule_in_range] for a
    /// non-panicking variant.
    pub fn schedule_in_range<E: EventHandle>(&self, event: &E, start: Tick, end: Tick) {
        self.try_schedule_in_range(event, start, end)
            .expect("timer range must satisfy 1 <= start < end");
    }

    /// Attempts to schedule `event` within `[start, end]` ticks from now.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::EmptyRange`] unless `1 <= start < end`.
    pub fn try_schedule_in_range<E: EventHandle>(
        &self,
        event: &E,
        start: Tick,
        end: Tick,
    ) -> Result<(), ScheduleError> {
        if start == 0 || end <= start {
            return Err(ScheduleError::EmptyRange { start, end });
        }
        let event = event.to_event();
        let now = self.core.now.get();
        if event.node().active() {
            let at = event.node().scheduled_at();
            if at >= now + start && at <= now + end {
                return Ok(());
            }
        }

        let earliest = now + start;
        let latest = now + end;
        let mut target = latest;
        for level in (1..LEVEL_COUNT).rev() {
            let span = 1u64 << (SLOT_BITS * level as u32);
            let aligned = latest & !(span - 1);
            if aligned >= earliest {
                target = aligned;
                break;
            }
        }

        self.core
            .insert_new(&Rc::downgrade(&self.core), &event, target);
        Ok(())
    }

    /// Advances time by `delta` ticks, firing every due event.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is zero with no interrupted work to resume, or when
    /// called from inside a timer callback.
    pub fn advance(&self, delta: Tick) {
        let finished = self.advance_bounded(delta, usize::MAX);
        debug_assert!(finished, "unbounded advance always completes");
    }

    /// Advances time by `delta` ticks, firing at most `max_execute` events.
    ///
    /// Returns `true` once every due event has been dispatched. A `false`
    /// return means the budget was exhausted with work outstanding; call
    /// again with a `delta` of zero to continue. As long as `max_execute`
    /// is at least one, each call with due work fires at least one event.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is zero with no interrupted work to resume, or when
    /// called from inside a timer callback.
    pub fn advance_bounded(&self, delta: Tick, max_execute: usize) -> bool {
        let core = &self.core;
        assert!(
            delta > 0 || core.ticks_pending.get() > 0,
            "advance by zero ticks is only allowed to resume interrupted work"
        );
        assert!(
            !core.advancing.get(),
            "advance must not be called from inside a timer callback"
        );
        core.advancing.set(true);
        let finished = core.run(&Rc::downgrade(core), delta, max_execute);
        core.advancing.set(false);
        finished
    }

    /// Ticks until the nearest scheduled event, capped at `max`.
    ///
    /// Returns 0 when a previous bounded advance left work outstanding, and
    /// `max` when nothing is scheduled within that horizon. The result is
    /// exact: it accounts for events on every level, including ones that a
    /// cascade will deliver earlier than their level's granularity suggests.
    #[must_use]
    pub fn ticks_to_next_event(&self, max: Tick) -> Tick {
        self.core.next_event_within(max)
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerWheel")
            .field("now", &self.core.now.get())
            .field("len", &self.core.len.get())
            .field("ticks_pending", &self.core.ticks_pending.get())
            .finish_non_exhaustive()
    }
}
