//! Timer events and the intrusive node embedded in each of them.
//!
//! An event is any type implementing [`TimerEvent`]: it exposes the
//! [`TimerNode`] that threads it into the wheel's slot lists and an
//! [`execute`][TimerEvent::execute] hook the wheel invokes when the event's
//! tick arrives. Two ready-made adapters cover the common cases:
//!
//! - [`CallbackEvent`] binds a closure.
//! - [`HandlerEvent`] binds a value whose type implements [`TimerHandler`],
//!   fixing the dispatched method at compile time.
//!
//! Event storage is owned by the caller through `Rc` handles; the wheel keeps
//! only weak links. Dropping the last handle of a scheduled event cancels it
//! before the storage is reclaimed, so the wheel never observes a dead link.
//!
//! # Reentrancy
//!
//! `execute` runs synchronously inside [`TimerWheel::advance`]. A callback
//! may schedule or cancel events on the same wheel (including itself), but
//! must not call `advance`.
//!
//! [`TimerWheel::advance`]: crate::TimerWheel::advance

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::wheel::WheelCore;
use crate::Tick;

/// Where a node currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeState {
    /// Not scheduled anywhere.
    Idle,
    /// Linked into the slot list at `levels[level].slots[slot]`.
    Scheduled { level: u8, slot: u8 },
    /// Drained from its slot into the current advance's dispatch batch.
    Dispatching,
}

/// Intrusive bookkeeping embedded in every timer event.
///
/// The node records the event's target tick, its position in the wheel and
/// the list links for the slot it occupies. All mutation goes through the
/// wheel or through [`cancel`][TimerNode::cancel]; user code only ever holds
/// shared references to it.
pub struct TimerNode {
    /// Absolute tick the event fires at; 0 while never scheduled.
    scheduled_at: Cell<Tick>,
    state: Cell<NodeState>,
    pub(crate) next: RefCell<Option<Weak<dyn TimerEvent>>>,
    pub(crate) prev: RefCell<Option<Weak<dyn TimerEvent>>>,
    wheel: RefCell<Option<Weak<WheelCore>>>,
}

impl TimerNode {
    /// Creates a new unscheduled node.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scheduled_at: Cell::new(0),
            state: Cell::new(NodeState::Idle),
            next: RefCell::new(None),
            prev: RefCell::new(None),
            wheel: RefCell::new(None),
        }
    }

    /// Returns true while the event is scheduled in a live wheel.
    ///
    /// Inside the event's own callback this is already `false`: the event was
    /// unlinked before dispatch and may be rescheduled freely. An event whose
    /// wheel was dropped out from under it also reports `false`.
    #[must_use]
    pub fn active(&self) -> bool {
        match self.state.get() {
            NodeState::Scheduled { .. } => {
                if self.wheel().is_some() {
                    true
                } else {
                    // The wheel was torn down with this node still linked;
                    // the registration died with it.
                    self.reset();
                    false
                }
            }
            NodeState::Idle | NodeState::Dispatching => false,
        }
    }

    /// The absolute tick this event fires (or last fired) at.
    ///
    /// Meaningful while the event is active, and inside the event's callback,
    /// where it equals the wheel's current tick. A never-scheduled node
    /// reports 0, which the default wheel origin can never produce.
    #[must_use]
    pub fn scheduled_at(&self) -> Tick {
        self.scheduled_at.get()
    }

    /// Removes the event from its wheel, if scheduled. O(1); idempotent.
    ///
    /// Safe to call from inside any timer callback. An event cancelled after
    /// its slot was drained but before its own dispatch does not fire.
    pub fn cancel(&self) {
        match self.state.get() {
            NodeState::Idle => return,
            NodeState::Scheduled { level, slot } => {
                if let Some(core) = self.wheel() {
                    core.unlink_scheduled(self, level, slot);
                }
            }
            NodeState::Dispatching => {
                if let Some(core) = self.wheel() {
                    core.release_pending();
                }
            }
        }
        self.reset();
    }

    fn wheel(&self) -> Option<Rc<WheelCore>> {
        self.wheel.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn reset(&self) {
        self.state.set(NodeState::Idle);
        self.scheduled_at.set(0);
        self.wheel.borrow_mut().take();
        // If the wheel is already gone the slot unlink never ran; dropping
        // the links here keeps a later reschedule from chasing them.
        self.next.borrow_mut().take();
        self.prev.borrow_mut().take();
    }

    pub(crate) fn state(&self) -> NodeState {
        self.state.get()
    }

    pub(crate) fn attach(&self, wheel: Weak<WheelCore>, level: u8, slot: u8, deadline: Tick) {
        *self.wheel.borrow_mut() = Some(wheel);
        self.state.set(NodeState::Scheduled { level, slot });
        self.scheduled_at.set(deadline);
    }

    pub(crate) fn begin_dispatch(&self) {
        self.state.set(NodeState::Dispatching);
    }

    /// Marks the node idle just before its callback runs. `scheduled_at`
    /// stays put so the callback can observe its firing tick.
    pub(crate) fn finish_dispatch(&self) {
        self.state.set(NodeState::Idle);
        self.wheel.borrow_mut().take();
    }

    /// Returns an interrupted node to the level-0 slot it was drained from.
    pub(crate) fn requeue(&self, slot: u8) {
        self.state.set(NodeState::Scheduled { level: 0, slot });
    }
}

impl Default for TimerNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerNode {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for TimerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerNode")
            .field("scheduled_at", &self.scheduled_at.get())
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

/// An occurrence schedulable in a [`TimerWheel`](crate::TimerWheel).
///
/// Implementations embed a [`TimerNode`] and define what happens when the
/// event fires. The provided methods forward the node's user-facing
/// operations so handles read naturally: `event.cancel()`,
/// `event.active()`, `event.scheduled_at()`.
pub trait TimerEvent {
    /// The intrusive node embedded in this event.
    fn node(&self) -> &TimerNode;

    /// Invoked by the wheel when the event's tick arrives.
    fn execute(&self);

    /// See [`TimerNode::active`].
    fn active(&self) -> bool {
        self.node().active()
    }

    /// See [`TimerNode::scheduled_at`].
    fn scheduled_at(&self) -> Tick {
        self.node().scheduled_at()
    }

    /// See [`TimerNode::cancel`].
    fn cancel(&self) {
        self.node().cancel()
    }
}

/// Shared handles accepted by the wheel's scheduling operations.
///
/// Implemented for `Rc<E>` of any concrete event type and for the
/// type-erased `Rc<dyn TimerEvent>`, so a callback holding an erased handle
/// to its own event can reschedule it directly.
pub trait EventHandle {
    /// Returns a type-erased shared handle to the event.
    fn to_event(&self) -> Rc<dyn TimerEvent>;
}

impl<E: TimerEvent + 'static> EventHandle for Rc<E> {
    fn to_event(&self) -> Rc<dyn TimerEvent> {
        self.clone()
    }
}

impl EventHandle for Rc<dyn TimerEvent> {
    fn to_event(&self) -> Rc<dyn TimerEvent> {
        self.clone()
    }
}

/// Timer event that invokes a closure when it fires.
pub struct CallbackEvent<F: FnMut()> {
    node: TimerNode,
    callback: RefCell<F>,
}

impl<F: FnMut()> CallbackEvent<F> {
    /// Creates an event that runs `callback` each time it fires.
    pub fn new(callback: F) -> Rc<Self> {
        Rc::new(Self {
            node: TimerNode::new(),
            callback: RefCell::new(callback),
        })
    }
}

impl<F: FnMut()> TimerEvent for CallbackEvent<F> {
    fn node(&self) -> &TimerNode {
        &self.node
    }

    fn execute(&self) {
        (self.callback.borrow_mut())();
    }
}

impl<F: FnMut()> fmt::Debug for CallbackEvent<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEvent")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// Receiver side of a [`HandlerEvent`].
///
/// Implementing this trait fixes, at compile time, which method of the
/// receiver runs when the event fires; the only dynamic dispatch left is the
/// wheel's single call through the event object.
pub trait TimerHandler {
    /// Invoked when the bound event fires.
    fn on_timer(&self);
}

/// Timer event that invokes [`TimerHandler::on_timer`] on an embedded value.
pub struct HandlerEvent<H: TimerHandler> {
    node: TimerNode,
    handler: H,
}

impl<H: TimerHandler> HandlerEvent<H> {
    /// Creates an event bound to `handler`.
    pub fn new(handler: H) -> Rc<Self> {
        Rc::new(Self {
            node: TimerNode::new(),
            handler,
        })
    }

    /// The bound receiver.
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

impl<H: TimerHandler> TimerEvent for HandlerEvent<H> {
    fn node(&self) -> &TimerNode {
        &self.node
    }

    fn execute(&self) {
        self.handler.on_timer();
    }
}

impl<H: TimerHandler + fmt::Debug> fmt::Debug for HandlerEvent<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEvent")
            .field("node", &self.node)
            .field("handler", &self.handler)
            .finish()
    }
}
