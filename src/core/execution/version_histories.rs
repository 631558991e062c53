// src/core/execution/version_histories.rs

//! Version histories record the `(EventID, Version)` lineage of a run's
//! history across failovers. Comparing histories from two regions finds the
//! lowest common ancestor, which is how replication detects divergence.

use serde::{Deserialize, Serialize};

use crate::core::errors::WarpflowError;
use crate::core::types::{EventId, Version};

/// One `(EventID, Version)` milestone: all events up to and including
/// `event_id` were written at `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionHistoryItem {
    pub event_id: EventId,
    pub version: Version,
}

impl VersionHistoryItem {
    pub fn new(event_id: EventId, version: Version) -> Self {
        Self { event_id, version }
    }
}

/// One branch of history: a branch token naming the physical history branch
/// plus the ordered version milestones along it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VersionHistory {
    pub branch_token: Vec<u8>,
    pub items: Vec<VersionHistoryItem>,
}

impl VersionHistory {
    pub fn new(branch_token: Vec<u8>, items: Vec<VersionHistoryItem>) -> Self {
        Self {
            branch_token,
            items,
        }
    }

    pub fn last_item(&self) -> Result<VersionHistoryItem, WarpflowError> {
        self.items
            .last()
            .copied()
            .ok_or_else(|| WarpflowError::Internal("Version history is empty".to_string()))
    }

    /// Records that events up to `item.event_id` were written at
    /// `item.version`. Event IDs and versions must not regress; consecutive
    /// items with the same version are coalesced.
    pub fn add_or_update_item(&mut self, item: VersionHistoryItem) -> Result<(), WarpflowError> {
        let Some(last) = self.items.last_mut() else {
            self.items.push(item);
            return Ok(());
        };
        if item.version < last.version {
            return Err(WarpflowError::BadRequest(format!(
                "Version history item version {} is lower than the last version {}",
                item.version, last.version
            )));
        }
        if item.event_id <= last.event_id {
            return Err(WarpflowError::BadRequest(format!(
                "Version history item event ID {} does not advance past {}",
                item.event_id, last.event_id
            )));
        }
        if item.version == last.version {
            last.event_id = item.event_id;
        } else {
            self.items.push(item);
        }
        Ok(())
    }

    /// The highest item shared with `remote`, used to find where two
    /// regions' histories diverge.
    pub fn lowest_common_ancestor(
        &self,
        remote: &VersionHistory,
    ) -> Result<VersionHistoryItem, WarpflowError> {
        for local_item in self.items.iter().rev() {
            for remote_item in remote.items.iter().rev() {
                if local_item.version == remote_item.version {
                    return Ok(VersionHistoryItem::new(
                        local_item.event_id.min(remote_item.event_id),
                        local_item.version,
                    ));
                }
            }
        }
        Err(WarpflowError::BadRequest(
            "Version histories have no common ancestor".to_string(),
        ))
    }

    /// Whether `item` lies on this branch.
    pub fn contains_item(&self, item: VersionHistoryItem) -> bool {
        let mut previous_event_id = 0;
        for current in &self.items {
            if current.version == item.version {
                return previous_event_id < item.event_id && item.event_id <= current.event_id;
            }
            previous_event_id = current.event_id;
        }
        false
    }
}

/// The ordered set of history branches for one run. Exactly one branch is
/// current; replication may grow others until conflicts resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VersionHistories {
    pub current_index: usize,
    pub histories: Vec<VersionHistory>,
}

impl VersionHistories {
    pub fn new(history: VersionHistory) -> Self {
        Self {
            current_index: 0,
            histories: vec![history],
        }
    }

    pub fn current(&self) -> Result<&VersionHistory, WarpflowError> {
        self.histories
            .get(self.current_index)
            .ok_or_else(|| WarpflowError::Internal("Version histories current index out of range".to_string()))
    }

    pub fn current_mut(&mut self) -> Result<&mut VersionHistory, WarpflowError> {
        self.histories
            .get_mut(self.current_index)
            .ok_or_else(|| WarpflowError::Internal("Version histories current index out of range".to_string()))
    }

    /// Adds `history` as a new branch, or finds the existing branch with the
    /// deepest common ancestor. Returns `(index, created)`.
    pub fn add_history(&mut self, history: VersionHistory) -> Result<(usize, bool), WarpflowError> {
        let incoming_last = history.last_item()?;
        for (index, existing) in self.histories.iter().enumerate() {
            if existing.contains_item(incoming_last) {
                return Ok((index, false));
            }
        }
        self.histories.push(history);
        Ok((self.histories.len() - 1, true))
    }

    /// Promotes branch `index` to current. The promoted branch must end at a
    /// version no lower than the current one.
    pub fn set_current(&mut self, index: usize) -> Result<(), WarpflowError> {
        if index >= self.histories.len() {
            return Err(WarpflowError::BadRequest(format!(
                "Version history index {index} out of range"
            )));
        }
        let current_last = self.current()?.last_item()?;
        let candidate_last = self.histories[index].last_item()?;
        if candidate_last.version < current_last.version {
            return Err(WarpflowError::BadRequest(
                "Cannot promote a version history behind the current one".to_string(),
            ));
        }
        self.current_index = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_or_update_coalesces_same_version() {
        let mut history = VersionHistory::default();
        history
            .add_or_update_item(VersionHistoryItem::new(3, 1))
            .unwrap();
        history
            .add_or_update_item(VersionHistoryItem::new(6, 1))
            .unwrap();
        assert_eq!(history.items, vec![VersionHistoryItem::new(6, 1)]);

        history
            .add_or_update_item(VersionHistoryItem::new(9, 4))
            .unwrap();
        assert_eq!(history.items.len(), 2);
    }

    #[test]
    fn add_or_update_rejects_regression() {
        let mut history = VersionHistory::new(vec![], vec![VersionHistoryItem::new(5, 2)]);
        assert!(history
            .add_or_update_item(VersionHistoryItem::new(6, 1))
            .is_err());
        assert!(history
            .add_or_update_item(VersionHistoryItem::new(5, 2))
            .is_err());
    }

    #[test]
    fn lowest_common_ancestor_finds_divergence_point() {
        let local = VersionHistory::new(
            vec![],
            vec![
                VersionHistoryItem::new(3, 0),
                VersionHistoryItem::new(7, 4),
            ],
        );
        let remote = VersionHistory::new(
            vec![],
            vec![
                VersionHistoryItem::new(3, 0),
                VersionHistoryItem::new(9, 5),
            ],
        );
        let lca = local.lowest_common_ancestor(&remote).unwrap();
        assert_eq!(lca, VersionHistoryItem::new(3, 0));
    }

    #[test]
    fn contains_item_respects_ranges() {
        let history = VersionHistory::new(
            vec![],
            vec![
                VersionHistoryItem::new(3, 0),
                VersionHistoryItem::new(7, 4),
            ],
        );
        assert!(history.contains_item(VersionHistoryItem::new(2, 0)));
        assert!(history.contains_item(VersionHistoryItem::new(7, 4)));
        assert!(!history.contains_item(VersionHistoryItem::new(4, 0)));
        assert!(!history.contains_item(VersionHistoryItem::new(8, 4)));
    }
}
