// tests/property/ordering_test.rs

//! Ordering properties: task-key ordering matches the delivery contracts,
//! ring lookups are stable, and backoff delays stay within bounds.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration;

use warpflow::core::membership::MembershipRing;
use warpflow::core::persistence::types::TaskKey;
use warpflow::core::tasks::backoff::{RetryPolicy, jit_duration};

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    /// Timer keys order by `(VisibilityTimestamp, TaskID)`; immediate keys
    /// order by task ID and sort before any scheduled key.
    #[test]
    fn task_keys_order_correctly(
        ts_a in 0i64..100_000, id_a in 0i64..100_000,
        ts_b in 0i64..100_000, id_b in 0i64..100_000,
    ) {
        let scheduled_a = TaskKey::scheduled(timestamp(ts_a), id_a);
        let scheduled_b = TaskKey::scheduled(timestamp(ts_b), id_b);
        prop_assert_eq!(
            scheduled_a.cmp(&scheduled_b),
            (ts_a, id_a).cmp(&(ts_b, id_b))
        );

        let immediate_a = TaskKey::immediate(id_a);
        let immediate_b = TaskKey::immediate(id_b);
        prop_assert_eq!(immediate_a.cmp(&immediate_b), id_a.cmp(&id_b));
        prop_assert!(immediate_a < scheduled_b);
    }

    /// A ring lookup always lands on a member, and removing an unrelated
    /// member never moves a key between the survivors.
    #[test]
    fn ring_lookup_is_stable(
        keys in prop::collection::vec("[a-z0-9]{1,16}", 1..20),
        removed in 0usize..3,
    ) {
        let members: Vec<String> =
            ["host-a", "host-b", "host-c"].iter().map(|s| s.to_string()).collect();
        let ring = MembershipRing::new(members.clone());
        let owners: Vec<String> =
            keys.iter().map(|k| ring.lookup(k).unwrap()).collect();
        for owner in &owners {
            prop_assert!(members.contains(owner));
        }

        let removed_member = members[removed].clone();
        let survivors: Vec<String> = members
            .iter()
            .filter(|m| **m != removed_member)
            .cloned()
            .collect();
        ring.set_members(survivors.clone());
        for (key, old_owner) in keys.iter().zip(&owners) {
            let new_owner = ring.lookup(key).unwrap();
            prop_assert!(survivors.contains(&new_owner));
            if *old_owner != removed_member {
                prop_assert_eq!(&new_owner, old_owner);
            }
        }
    }

    /// Backoff delays never exceed the configured maximum and never come
    /// back once the attempt budget is exhausted.
    #[test]
    fn backoff_respects_bounds(
        initial_ms in 1u64..1_000,
        max_ms in 1_000u64..10_000,
        max_attempts in 1u32..20,
        attempt in 0u32..40,
    ) {
        let policy = RetryPolicy::new(Duration::from_millis(initial_ms))
            .with_max_interval(Duration::from_millis(max_ms))
            .with_max_attempts(max_attempts);
        match policy.next_delay(attempt, Duration::ZERO) {
            Some(delay) => {
                prop_assert!(attempt < max_attempts);
                prop_assert!(delay <= Duration::from_millis(max_ms));
                prop_assert!(delay >= Duration::from_millis(initial_ms).min(Duration::from_millis(max_ms)));
            }
            None => prop_assert!(attempt >= max_attempts),
        }
    }

    /// Jitter stays within the symmetric window around the base duration.
    #[test]
    fn jitter_stays_in_window(base_ms in 1u64..60_000, coefficient in 0.0f64..0.9) {
        let base = Duration::from_millis(base_ms);
        let jittered = jit_duration(base, coefficient);
        let spread = base.as_secs_f64() * coefficient;
        prop_assert!(jittered.as_secs_f64() >= base.as_secs_f64() - spread - 1e-9);
        prop_assert!(jittered.as_secs_f64() <= base.as_secs_f64() + spread + 1e-9);
    }
}
