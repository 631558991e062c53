// tests/property/invariants_test.rs

//! Invariant properties: the `(State, CloseStatus)` table, failover-version
//! monotonicity across arbitrary failover sequences, and version-history
//! growth rules.

use proptest::prelude::*;

use warpflow::config::{ClusterConfig, ClusterEntry};
use warpflow::core::execution::version_histories::{VersionHistory, VersionHistoryItem};
use warpflow::core::types::{
    CloseStatus, EMPTY_VERSION, WorkflowState, validate_state_close_status,
};

fn any_state() -> impl Strategy<Value = WorkflowState> {
    prop_oneof![
        Just(WorkflowState::Created),
        Just(WorkflowState::Running),
        Just(WorkflowState::Completed),
        Just(WorkflowState::Zombie),
        Just(WorkflowState::Corrupted),
    ]
}

fn any_close_status() -> impl Strategy<Value = CloseStatus> {
    prop_oneof![
        Just(CloseStatus::None),
        Just(CloseStatus::Completed),
        Just(CloseStatus::Failed),
        Just(CloseStatus::Canceled),
        Just(CloseStatus::Terminated),
        Just(CloseStatus::ContinuedAsNew),
        Just(CloseStatus::TimedOut),
    ]
}

fn two_cluster_config() -> ClusterConfig {
    ClusterConfig {
        current_cluster: "a".to_string(),
        master_cluster: "a".to_string(),
        failover_version_increment: 10,
        clusters: vec![
            ClusterEntry {
                name: "a".to_string(),
                initial_failover_version: 1,
                rpc_address: String::new(),
            },
            ClusterEntry {
                name: "b".to_string(),
                initial_failover_version: 2,
                rpc_address: String::new(),
            },
        ],
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    /// The state table accepts exactly the legal combinations: a close
    /// status iff completed, with corrupted records exempt.
    #[test]
    fn state_table_is_exact(state in any_state(), close_status in any_close_status()) {
        let legal = match state {
            WorkflowState::Created | WorkflowState::Running | WorkflowState::Zombie => {
                close_status == CloseStatus::None
            }
            WorkflowState::Completed => close_status != CloseStatus::None,
            WorkflowState::Corrupted => true,
        };
        prop_assert_eq!(validate_state_close_status(state, close_status).is_ok(), legal);
    }

    /// Across any sequence of failovers between known clusters, the minted
    /// version strictly increases and always maps back to the cluster that
    /// minted it.
    #[test]
    fn failover_versions_strictly_increase(targets in prop::collection::vec(0usize..2, 1..50)) {
        let config = two_cluster_config();
        let names = ["a", "b"];
        let mut version = EMPTY_VERSION;
        for target in targets {
            let cluster = names[target];
            let next = config.next_failover_version(cluster, version);
            prop_assert!(next > version || version == EMPTY_VERSION);
            prop_assert_eq!(
                config.cluster_for_version(next).map(|c| c.name.as_str()),
                Some(cluster)
            );
            version = next;
        }
    }

    /// A version history grown through `add_or_update_item` keeps event IDs
    /// and versions monotonic.
    #[test]
    fn version_history_stays_monotonic(
        steps in prop::collection::vec((1i64..100, 0i64..20), 1..40)
    ) {
        let mut history = VersionHistory::default();
        let mut last_event = 0i64;
        let mut last_version = -1i64;
        for (event_delta, version_delta) in steps {
            let event_id = last_event + event_delta;
            let version = last_version.max(0) + version_delta;
            history
                .add_or_update_item(VersionHistoryItem::new(event_id, version))
                .unwrap();
            last_event = event_id;
            last_version = version;

            for window in history.items.windows(2) {
                prop_assert!(window[0].event_id < window[1].event_id);
                prop_assert!(window[0].version < window[1].version);
            }
            prop_assert_eq!(history.last_item().unwrap().event_id, last_event);
        }
    }

    /// Regressing items are always rejected and leave the history intact.
    #[test]
    fn version_history_rejects_regressions(
        event_id in 10i64..100,
        version in 10i64..100,
        event_back in 0i64..10,
        version_back in 1i64..10,
    ) {
        let mut history =
            VersionHistory::new(vec![], vec![VersionHistoryItem::new(event_id, version)]);
        let before = history.clone();

        let stale_event = VersionHistoryItem::new(event_id - event_back, version);
        prop_assert!(history.add_or_update_item(stale_event).is_err());
        let stale_version = VersionHistoryItem::new(event_id + 1, version - version_back);
        prop_assert!(history.add_or_update_item(stale_version).is_err());
        prop_assert_eq!(&history, &before);
    }
}
