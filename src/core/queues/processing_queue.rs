// src/core/queues/processing_queue.rs

//! Multi-cursor processing queues: each queue is a half-open
//! `[ackLevel, readLevel)` window over the task space with a domain filter.
//! Split policies carve slow or stuck domains into their own queues so they
//! cannot head-of-line block the rest; adjacent queues merge back once their
//! windows realign.

use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::metrics;
use crate::core::persistence::types::{DomainFilter, ProcessingQueueState, TaskKey};

/// Split-policy knobs, resolved from dynamic config per poll cycle.
#[derive(Debug, Clone)]
pub struct SplitPolicyConfig {
    pub enable_pending_task_split: bool,
    pub pending_task_split_threshold: usize,
    pub enable_stuck_task_split: bool,
    pub stuck_task_attempt_threshold: u32,
    pub enable_random_split: bool,
    pub random_split_probability: f64,
    /// Look-ahead granted to a stuck-task sub-queue, in task IDs.
    pub stuck_task_look_ahead: i64,
    pub max_split_level: usize,
}

#[derive(Debug, Clone)]
struct TrackedTask {
    domain_id: String,
    attempt: u32,
    done: bool,
}

/// One processing queue: its persisted window plus the in-memory outstanding
/// task table.
#[derive(Debug, Clone)]
pub struct ProcessingQueue {
    state: ProcessingQueueState,
    outstanding: BTreeMap<TaskKey, TrackedTask>,
}

impl ProcessingQueue {
    pub fn new(state: ProcessingQueueState) -> Self {
        Self {
            state,
            outstanding: BTreeMap::new(),
        }
    }

    /// The root queue covering every domain from `ack_level` up to `max_level`.
    pub fn root(ack_level: TaskKey, max_level: TaskKey) -> Self {
        Self::new(ProcessingQueueState {
            level: 0,
            ack_level,
            read_level: ack_level,
            max_level,
            domain_filter: DomainFilter::all(),
        })
    }

    pub fn state(&self) -> &ProcessingQueueState {
        &self.state
    }

    pub fn ack_level(&self) -> TaskKey {
        self.state.ack_level
    }

    pub fn read_level(&self) -> TaskKey {
        self.state.read_level
    }

    pub fn max_level(&self) -> TaskKey {
        self.state.max_level
    }

    /// Extends the readable window; the ceiling moves as the shard allocates
    /// new task IDs.
    pub fn set_max_level(&mut self, max_level: TaskKey) {
        if max_level > self.state.max_level {
            self.state.max_level = max_level;
        }
    }

    pub fn accepts_domain(&self, domain_id: &str) -> bool {
        self.state.domain_filter.matches(domain_id)
    }

    /// Tracks a task read into the window and advances the read level.
    /// Returns false when the task belongs to another queue's filter or
    /// falls outside the window.
    pub fn add_task(&mut self, key: TaskKey, domain_id: &str) -> bool {
        if !self.accepts_domain(domain_id) {
            return false;
        }
        if key <= self.state.ack_level || key > self.state.max_level {
            return false;
        }
        self.outstanding.insert(
            key,
            TrackedTask {
                domain_id: domain_id.to_string(),
                attempt: 0,
                done: false,
            },
        );
        if key > self.state.read_level {
            self.state.read_level = key;
        }
        true
    }

    pub fn contains_task(&self, key: TaskKey) -> bool {
        self.outstanding.contains_key(&key)
    }

    /// Marks a task executed; ack advancement happens separately.
    pub fn complete_task(&mut self, key: TaskKey) -> bool {
        match self.outstanding.get_mut(&key) {
            Some(task) => {
                task.done = true;
                true
            }
            None => false,
        }
    }

    /// Bumps a task's attempt counter, returning the new value.
    pub fn record_attempt(&mut self, key: TaskKey) -> u32 {
        match self.outstanding.get_mut(&key) {
            Some(task) => {
                task.attempt += 1;
                task.attempt
            }
            None => 0,
        }
    }

    pub fn pending_task_count(&self) -> usize {
        self.outstanding.values().filter(|t| !t.done).count()
    }

    pub fn pending_count_by_domain(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for task in self.outstanding.values() {
            if !task.done {
                *counts.entry(task.domain_id.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Advances `ack_level` to the lowest contiguous completed task and
    /// drops the completed prefix. Returns the new ack level.
    pub fn advance_ack(&mut self) -> TaskKey {
        let mut new_ack = self.state.ack_level;
        for (key, task) in self.outstanding.iter() {
            if task.done {
                new_ack = *key;
            } else {
                break;
            }
        }
        self.outstanding.retain(|key, _| *key > new_ack);
        self.state.ack_level = new_ack;
        if self.state.read_level < new_ack {
            self.state.read_level = new_ack;
        }
        new_ack
    }

    /// Whether the queue has drained completely: nothing outstanding and the
    /// ack level has caught up with the window ceiling.
    pub fn is_drained(&self) -> bool {
        self.outstanding.is_empty() && self.state.ack_level >= self.state.max_level
    }

    /// Evaluates the split policies and carves matching domains into new
    /// queues at `level + 1`. Returns the new queues; the current queue's
    /// filter shrinks accordingly.
    pub fn evaluate_splits(&mut self, config: &SplitPolicyConfig) -> Vec<ProcessingQueue> {
        if self.state.level >= config.max_split_level {
            return Vec::new();
        }

        let mut split_domains: BTreeSet<String> = BTreeSet::new();
        let mut stuck_domains: BTreeSet<String> = BTreeSet::new();

        if config.enable_pending_task_split {
            for (domain_id, count) in self.pending_count_by_domain() {
                if count > config.pending_task_split_threshold {
                    metrics::QUEUE_SPLITS_TOTAL.with_label_values(&["pending"]).inc();
                    split_domains.insert(domain_id);
                }
            }
        }
        if config.enable_stuck_task_split {
            for task in self.outstanding.values() {
                if !task.done
                    && task.attempt > config.stuck_task_attempt_threshold
                    && !split_domains.contains(&task.domain_id)
                {
                    metrics::QUEUE_SPLITS_TOTAL.with_label_values(&["stuck"]).inc();
                    stuck_domains.insert(task.domain_id.clone());
                }
            }
        }
        if config.enable_random_split {
            for domain_id in self.pending_count_by_domain().into_keys() {
                if !split_domains.contains(&domain_id)
                    && !stuck_domains.contains(&domain_id)
                    && rand::thread_rng().gen_bool(config.random_split_probability.clamp(0.0, 1.0))
                {
                    metrics::QUEUE_SPLITS_TOTAL.with_label_values(&["random"]).inc();
                    split_domains.insert(domain_id);
                }
            }
        }

        let mut new_queues = Vec::new();
        if !split_domains.is_empty() {
            new_queues.push(self.split_out(&split_domains, self.state.max_level));
        }
        if !stuck_domains.is_empty() {
            // A stuck-task sub-queue gets a bounded look-ahead horizon so it
            // cannot chase the live ceiling while it churns on retries.
            let horizon = TaskKey {
                visibility_timestamp: self.state.read_level.visibility_timestamp,
                task_id: self.state.read_level.task_id + config.stuck_task_look_ahead,
            };
            let capped = horizon.min(self.state.max_level);
            new_queues.push(self.split_out(&stuck_domains, capped));
        }
        new_queues
    }

    fn split_out(&mut self, domains: &BTreeSet<String>, max_level: TaskKey) -> ProcessingQueue {
        let mut moved = BTreeMap::new();
        self.outstanding.retain(|key, task| {
            if domains.contains(&task.domain_id) {
                moved.insert(*key, task.clone());
                false
            } else {
                true
            }
        });
        let new_state = ProcessingQueueState {
            level: self.state.level + 1,
            ack_level: self.state.ack_level,
            read_level: self.state.read_level.min(max_level),
            max_level,
            domain_filter: DomainFilter::include(domains.iter().cloned()),
        };
        self.state.domain_filter = self.state.domain_filter.exclude(domains);
        ProcessingQueue {
            state: new_state,
            outstanding: moved,
        }
    }

    /// Whether `other` can merge into this queue: same split level and the
    /// same ack level, so the combined window stays well-formed.
    pub fn can_merge_with(&self, other: &ProcessingQueue) -> bool {
        self.state.level == other.state.level && self.state.ack_level == other.state.ack_level
    }

    /// Absorbs `other`: filters union, outstanding tables union, window
    /// bounds take the wider extent.
    pub fn merge(&mut self, other: ProcessingQueue) {
        debug_assert!(self.can_merge_with(&other));
        let combined_filter = if self.state.domain_filter.reverse_match
            || other.state.domain_filter.reverse_match
        {
            // A reverse filter dominates: the union covers everything except
            // domains excluded by both sides.
            let mut filter = self.state.domain_filter.clone();
            if other.state.domain_filter.reverse_match {
                filter.domain_ids = filter
                    .domain_ids
                    .intersection(&other.state.domain_filter.domain_ids)
                    .cloned()
                    .collect();
            } else {
                for domain in &other.state.domain_filter.domain_ids {
                    filter.domain_ids.remove(domain);
                }
            }
            filter
        } else {
            DomainFilter::include(
                self.state
                    .domain_filter
                    .domain_ids
                    .union(&other.state.domain_filter.domain_ids)
                    .cloned(),
            )
        };
        self.state.domain_filter = combined_filter;
        self.state.read_level = self.state.read_level.max(other.state.read_level);
        self.state.max_level = self.state.max_level.max(other.state.max_level);
        self.outstanding.extend(other.outstanding);
    }
}

/// Merges mergeable sibling queues and retires drained split queues,
/// handing their domains back to the root queue.
///
/// A drained split queue is only dropped once its window ceiling has caught
/// up with the root's read level; otherwise the root would skip the tasks
/// between the two cursors for the rejoining domains.
pub fn consolidate_queues(queues: &mut Vec<ProcessingQueue>) {
    let root_read_level = queues
        .iter()
        .find(|q| q.state.level == 0)
        .map(|q| q.state.read_level);

    if let Some(root_read_level) = root_read_level {
        let mut rejoined: BTreeSet<String> = BTreeSet::new();
        queues.retain(|queue| {
            let droppable = queue.state.level > 0
                && queue.is_drained()
                && queue.state.max_level >= root_read_level
                && !queue.state.domain_filter.reverse_match;
            if droppable {
                rejoined.extend(queue.state.domain_filter.domain_ids.iter().cloned());
            }
            !droppable
        });
        if !rejoined.is_empty()
            && let Some(root) = queues.iter_mut().find(|q| q.state.level == 0)
        {
            for domain_id in &rejoined {
                root.state.domain_filter.domain_ids.remove(domain_id);
            }
        }
    }

    let mut index = 0;
    while index < queues.len() {
        let mut merged_any = false;
        let mut other_index = index + 1;
        while other_index < queues.len() {
            if queues[index].can_merge_with(&queues[other_index]) {
                let other = queues.remove(other_index);
                queues[index].merge(other);
                merged_any = true;
            } else {
                other_index += 1;
            }
        }
        if !merged_any {
            index += 1;
        }
    }
}
