//! Intrusive slot lists.
//!
//! Each wheel slot is a doubly linked list threaded through the
//! [`TimerNode`]s embedded in the events themselves, so membership costs no
//! allocation beyond the event's own storage. The list holds only [`Weak`]
//! references: event storage stays owned by the caller, and a node whose last
//! user handle is dropped splices itself out before deallocation, so the
//! links observed during traversal are always live.
//!
//! A node's `prev` link is `None` exactly when the node is at the head of its
//! list; unlinking relies on that convention to repair the head cell without
//! comparing pointers.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::event::{TimerEvent, TimerNode};
use crate::Tick;

/// One slot's worth of scheduled events, in unspecified order.
pub(crate) struct EventList {
    head: RefCell<Option<Weak<dyn TimerEvent>>>,
}

impl EventList {
    pub(crate) fn new() -> Self {
        Self {
            head: RefCell::new(None),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.borrow().is_none()
    }

    /// Links `event` at the front of the list. The node must be unlinked.
    pub(crate) fn push_front(&self, event: &Rc<dyn TimerEvent>) {
        let node = event.node();
        let old_head = self.head.replace(Some(Rc::downgrade(event)));
        if let Some(next) = old_head.as_ref().and_then(Weak::upgrade) {
            *next.node().prev.borrow_mut() = Some(Rc::downgrade(event));
        }
        *node.next.borrow_mut() = old_head;
        *node.prev.borrow_mut() = None;
    }

    /// Splices `node` out of this list in O(1), clearing its links.
    pub(crate) fn unlink(&self, node: &TimerNode) {
        let next = node.next.borrow_mut().take();
        let prev = node.prev.borrow_mut().take();

        match prev {
            Some(ref weak) => {
                if let Some(prev_event) = weak.upgrade() {
                    *prev_event.node().next.borrow_mut() = next.clone();
                }
            }
            None => {
                *self.head.borrow_mut() = next.clone();
            }
        }

        if let Some(next_event) = next.as_ref().and_then(Weak::upgrade) {
            *next_event.node().prev.borrow_mut() = prev;
        }
    }

    /// Drains every event into a temporary batch, leaving the list empty.
    ///
    /// The upgraded handles keep the drained events alive for the duration of
    /// the batch even if their owners drop them mid-dispatch.
    pub(crate) fn take_all(&self) -> Vec<Rc<dyn TimerEvent>> {
        let mut drained = Vec::new();
        let mut cursor = self.head.borrow_mut().take();
        while let Some(weak) = cursor {
            let Some(event) = weak.upgrade() else { break };
            let node = event.node();
            cursor = node.next.borrow_mut().take();
            node.prev.borrow_mut().take();
            drained.push(event);
        }
        drained
    }

    /// Minimum target tick among the events in this list, without draining.
    pub(crate) fn min_scheduled(&self) -> Option<Tick> {
        let mut min: Option<Tick> = None;
        let mut cursor = self.head.borrow().clone();
        while let Some(weak) = cursor {
            let Some(event) = weak.upgrade() else { break };
            let at = event.node().scheduled_at();
            min = Some(min.map_or(at, |current| current.min(at)));
            cursor = event.node().next.borrow().clone();
        }
        min
    }
}
