//! Tickwheel: a hierarchical timer wheel over logical time.
//!
//! # Overview
//!
//! A timer wheel schedules a large population of future events and delivers
//! their callbacks as time advances. This implementation is built for
//! workloads where the queue is densely occupied and most events are
//! cancelled or rescheduled before they ever fire: scheduling, cancellation
//! and rescheduling are all O(1), and advancing costs O(ticks + fired).
//!
//! # Core Properties
//!
//! - **Clock-agnostic**: the wheel owns no thread and reads no clock. Time is
//!   a logical [`Tick`] counter that moves only when the caller invokes
//!   [`TimerWheel::advance`] with a measured delta.
//! - **Caller-owned events**: events live in `Rc` handles owned by the
//!   application; the wheel holds weak links only, and dropping the last
//!   handle of a scheduled event cancels it.
//! - **Strict tick ordering**: every event for tick `X` fires before any
//!   event for tick `X + 1`; order within a tick is unspecified.
//! - **Bounded dispatch**: [`TimerWheel::advance_bounded`] caps callbacks per
//!   call and resumes exactly where it stopped, so timer processing can be
//!   interleaved with other work.
//! - **Range scheduling**: [`TimerWheel::schedule_in_range`] exploits caller
//!   slack to make repeated reschedules free and to park events on
//!   cascade-free ticks.
//!
//! # Module Structure
//!
//! - [`wheel`]: the hierarchical wheel and its advance state machine
//! - [`event`]: the [`TimerEvent`] trait, intrusive [`TimerNode`] and the
//!   closure/handler adapters
//! - [`error`]: error types for the fallible scheduling variants
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tickwheel::{CallbackEvent, TimerWheel};
//!
//! let wheel = TimerWheel::new();
//! let hits = Rc::new(Cell::new(0u32));
//!
//! let tally = hits.clone();
//! let heartbeat = CallbackEvent::new(move || tally.set(tally.get() + 1));
//!
//! // Anywhere between 90 and 110 ticks from now is acceptable.
//! wheel.schedule_in_range(&heartbeat, 90, 110);
//!
//! // Re-declaring the same slack before the event fires is free.
//! wheel.schedule_in_range(&heartbeat, 90, 110);
//!
//! wheel.advance(110);
//! assert_eq!(hits.get(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod event;
mod list;
pub mod wheel;

#[cfg(test)]
mod test_utils;

/// Logical time, in ticks.
///
/// A tick is whatever unit the embedding application measures time in; the
/// wheel only requires that the counter is monotonically non-decreasing.
pub type Tick = u64;

pub use error::ScheduleError;
pub use event::{CallbackEvent, EventHandle, HandlerEvent, TimerEvent, TimerHandler, TimerNode};
pub use wheel::TimerWheel;
