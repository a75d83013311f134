//! Property-based tests for the print queue.
//!
//! Delivery order and the retry budget must hold for any interleaving of
//! enqueues, claims and failures, not just the hand-picked cases in the
//! unit tests.

use std::time::Duration;

use parkpos_core::RetryPolicy;
use parkpos_printer::queue::{Claim, FailOutcome};
use parkpos_printer::{DocumentKind, JobState, PrintJob, PrintQueue, Priority, SendError};
use proptest::prelude::*;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Op {
    Enqueue(Priority),
    Claim,
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::High),
        Just(Priority::Normal),
        Just(Priority::Low),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => priority().prop_map(Op::Enqueue),
        1 => Just(Op::Claim),
    ]
}

fn policy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..=6, 1u64..=5_000, 0u64..=60_000).prop_map(|(max_attempts, base_ms, extra_ms)| {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(base_ms + extra_ms),
        }
    })
}

fn queue() -> PrintQueue {
    PrintQueue::new(RetryPolicy::default(), 10)
}

proptest! {
    /// Property: every claim hands out the oldest job of the highest
    /// non-empty priority.
    #[test]
    fn prop_claim_order_is_priority_then_fifo(ops in prop::collection::vec(op(), 1..60)) {
        let queue = queue();
        // (priority, enqueue order, id) of everything still pending
        let mut model = Vec::new();
        let now = Instant::now();

        for (order, op) in ops.into_iter().enumerate() {
            match op {
                Op::Enqueue(priority) => {
                    let job = queue.enqueue(PrintJob::new(DocumentKind::TestPage, vec![0x1b], priority));
                    model.push((priority, order, job.id));
                }
                Op::Claim => {
                    model.sort();
                    match queue.claim_next(now) {
                        Claim::Ready(job) => {
                            prop_assert!(!model.is_empty());
                            let (priority, _, id) = model.remove(0);
                            prop_assert_eq!(job.id, id);
                            prop_assert_eq!(job.priority, priority);
                            prop_assert_eq!(job.state, JobState::Sending);
                            let done = queue.complete(job);
                            prop_assert_eq!(done.state, JobState::Printed);
                        }
                        Claim::Empty => prop_assert!(model.is_empty()),
                        Claim::Wait(_) => prop_assert!(false, "no job is backing off"),
                    }
                }
            }
            prop_assert_eq!(queue.peek_status().pending, model.len());
        }
    }

    /// Property: backoff never shrinks as attempts grow and never exceeds
    /// the cap.
    #[test]
    fn prop_backoff_is_monotonic_and_capped(policy in policy(), attempts in 1u32..40) {
        let current = policy.backoff(attempts);
        let next = policy.backoff(attempts + 1);

        prop_assert!(current <= next);
        prop_assert!(next <= policy.cap);
        prop_assert!(current >= policy.base.min(policy.cap));
    }

    /// Property: a job that keeps failing is sent exactly `max_attempts`
    /// times and then abandoned once.
    #[test]
    fn prop_retry_budget_is_exact(policy in policy(), uncounted in 0usize..4) {
        let queue = PrintQueue::new(policy, 10);
        let job = queue.enqueue(PrintJob::new(DocumentKind::EntryTicket, vec![0x1b], Priority::Normal));
        let mut now = Instant::now();
        let mut sends = 0u32;

        // Failures while unlinked cost nothing
        for _ in 0..uncounted {
            let Claim::Ready(claimed) = queue.claim_next(now) else {
                return Err(TestCaseError::fail("job should be claimable"));
            };
            prop_assert_eq!(queue.fail(claimed, &SendError::NotConnected, now), FailOutcome::Returned);
        }

        loop {
            let claimed = match queue.claim_next(now) {
                Claim::Ready(claimed) => claimed,
                Claim::Wait(at) => {
                    prop_assert!(at > now);
                    now = at;
                    continue;
                }
                Claim::Empty => break,
            };
            sends += 1;
            match queue.fail(claimed, &SendError::rejected("papel atascado"), now) {
                FailOutcome::Retry { attempts, delay } => {
                    prop_assert_eq!(attempts, sends);
                    prop_assert_eq!(delay, policy.backoff(attempts));
                }
                FailOutcome::Abandoned(abandoned) => {
                    prop_assert_eq!(abandoned.id, job.id);
                    prop_assert_eq!(abandoned.attempts, policy.max_attempts);
                }
                FailOutcome::Returned => prop_assert!(false, "counted failure returned"),
            }
        }

        prop_assert_eq!(sends, policy.max_attempts);
        prop_assert_eq!(queue.abandoned_jobs().len(), 1);
        prop_assert!(queue.is_empty());
    }
}
