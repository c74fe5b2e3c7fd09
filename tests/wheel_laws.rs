//! Property-based law tests for the timer wheel.
//!
//! The wheel is checked against a naive model: whatever interleaving of
//! schedules, cancellations and advances is thrown at it, the multiset of
//! fired events must equal the set of surviving deadlines at or before the
//! final tick, delivered in non-decreasing tick order.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::init_test_logging;
use proptest::prelude::*;
use tickwheel::{CallbackEvent, Tick, TimerEvent, TimerWheel};

/// Schedules one counting event per delta, runs `drive`, and returns the
/// `(tick, id)` pairs observed by the callbacks in firing order.
fn collect_fired(deltas: &[u64], drive: impl FnOnce(&TimerWheel)) -> Vec<(Tick, usize)> {
    let wheel = TimerWheel::new();
    let fired: Rc<RefCell<Vec<(Tick, usize)>>> = Rc::new(RefCell::new(Vec::new()));
    let _events: Vec<_> = deltas
        .iter()
        .enumerate()
        .map(|(id, &delta)| {
            let wheel_handle = wheel.clone();
            let fired = fired.clone();
            let event = CallbackEvent::new(move || {
                fired.borrow_mut().push((wheel_handle.now(), id));
            });
            wheel.schedule(&event, delta);
            event
        })
        .collect();
    drive(&wheel);
    let result = fired.borrow().clone();
    result
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn fired_multiset_matches_naive_model(
        deltas in prop::collection::vec(1_u64..2000, 1..50),
        cancel_mask in prop::collection::vec(any::<bool>(), 50),
        steps in prop::collection::vec(1_u64..300, 1..16),
    ) {
        init_test_logging();
        let wheel = TimerWheel::new();
        let origin = wheel.now();
        let fired: Rc<RefCell<Vec<(Tick, usize)>>> = Rc::new(RefCell::new(Vec::new()));

        let events: Vec<_> = deltas
            .iter()
            .enumerate()
            .map(|(id, &delta)| {
                let wheel_handle = wheel.clone();
                let fired = fired.clone();
                let event = CallbackEvent::new(move || {
                    fired.borrow_mut().push((wheel_handle.now(), id));
                });
                wheel.schedule(&event, delta);
                event
            })
            .collect();

        let mut expected: Vec<(Tick, usize)> = Vec::new();
        for (id, &delta) in deltas.iter().enumerate() {
            if cancel_mask[id] {
                events[id].cancel();
            } else {
                expected.push((origin + delta, id));
            }
        }

        let mut total = 0_u64;
        for &step in &steps {
            wheel.advance(step);
            total += step;
        }

        expected.retain(|&(tick, _)| tick <= origin + total);
        expected.sort_unstable();

        let observed = fired.borrow().clone();
        prop_assert!(
            observed.windows(2).all(|pair| pair[0].0 <= pair[1].0),
            "fired out of tick order: {observed:?}"
        );
        let mut observed_sorted = observed;
        observed_sorted.sort_unstable();
        prop_assert_eq!(observed_sorted, expected);
    }

    #[test]
    fn bounded_advance_is_equivalent_to_unbounded(
        deltas in prop::collection::vec(1_u64..500, 1..40),
        budget in 1_usize..4,
    ) {
        init_test_logging();
        let reference = collect_fired(&deltas, |wheel| wheel.advance(600));
        let chunked = collect_fired(&deltas, |wheel| {
            let mut finished = wheel.advance_bounded(600, budget);
            while !finished {
                finished = wheel.advance_bounded(0, budget);
            }
        });

        prop_assert!(chunked.windows(2).all(|pair| pair[0].0 <= pair[1].0));

        // Order within a tick is unspecified and may legitimately differ
        // between the two drives.
        let mut reference = reference;
        let mut chunked = chunked;
        reference.sort_unstable();
        chunked.sort_unstable();
        prop_assert_eq!(chunked, reference);
    }

    #[test]
    fn reschedule_equals_cancel_plus_schedule(
        first in 1_u64..1000,
        second in 1_u64..1000,
    ) {
        init_test_logging();
        // Two wheels, same event, different paths to the same registration.
        let wheel_a = TimerWheel::new();
        let wheel_b = TimerWheel::new();
        let fired_a = Rc::new(RefCell::new(Vec::new()));
        let fired_b = Rc::new(RefCell::new(Vec::new()));

        let log_a = fired_a.clone();
        let handle_a = wheel_a.clone();
        let event_a = CallbackEvent::new(move || log_a.borrow_mut().push(handle_a.now()));
        let log_b = fired_b.clone();
        let handle_b = wheel_b.clone();
        let event_b = CallbackEvent::new(move || log_b.borrow_mut().push(handle_b.now()));

        wheel_a.schedule(&event_a, first);
        wheel_a.schedule(&event_a, second);

        wheel_b.schedule(&event_b, first);
        event_b.cancel();
        wheel_b.schedule(&event_b, second);

        prop_assert_eq!(event_a.scheduled_at(), event_b.scheduled_at());

        wheel_a.advance(1000);
        wheel_b.advance(1000);

        let a = fired_a.borrow().clone();
        let b = fired_b.borrow().clone();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), 1);
    }

    #[test]
    fn range_schedule_lands_in_window_and_sticks(
        start in 1_u64..5000,
        width in 1_u64..5000,
    ) {
        init_test_logging();
        let end = start + width;
        let wheel = TimerWheel::new();
        let origin = wheel.now();
        let fired = Rc::new(RefCell::new(Vec::new()));

        let log = fired.clone();
        let handle = wheel.clone();
        let event = CallbackEvent::new(move || log.borrow_mut().push(handle.now()));

        wheel.schedule_in_range(&event, start, end);
        let target = event.scheduled_at();
        prop_assert!(target >= origin + start && target <= origin + end);

        // Re-declaring overlapping slack never moves the registration.
        wheel.schedule_in_range(&event, start, end);
        prop_assert_eq!(event.scheduled_at(), target);

        wheel.advance(end);
        prop_assert_eq!(fired.borrow().clone(), vec![target]);
    }
}
