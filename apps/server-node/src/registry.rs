use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
#[cfg(test)]
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use common::chain::{chain_label, client_label};
use common::{Health, NodeId, NodeSummary, NodeWindow, ObservedSample, StatusSample};

pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        unix_ts()
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(now_unix: u64) -> Self {
        Self {
            now: AtomicU64::new(now_unix),
        }
    }

    pub fn set(&self, now_unix: u64) {
        self.now.store(now_unix, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_unix(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub max_samples: usize,
    pub max_age_secs: u64,
    pub clock_skew_secs: u64,
    pub liveness_timeout_secs: u64,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            max_samples: 32,
            max_age_secs: 3_600,
            clock_skew_secs: 30,
            liveness_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveOutcome {
    pub created: bool,
    pub out_of_order: bool,
    pub evicted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryCounts {
    pub total: usize,
    pub healthy: usize,
    pub bad: usize,
}

struct StatusWindow {
    samples: VecDeque<ObservedSample>,
    first_seen_unix: u64,
    last_seen_unix: u64,
    // Set under the record lock when the record leaves the map.
    retired: bool,
}

impl StatusWindow {
    fn first(sample: StatusSample, now: u64, policy: &WindowPolicy) -> (Self, ObserveOutcome) {
        let mut window = Self {
            samples: VecDeque::with_capacity(policy.max_samples.min(64)),
            first_seen_unix: now,
            last_seen_unix: now,
            retired: false,
        };
        let mut outcome = window.push(sample, now, policy);
        outcome.created = true;
        (window, outcome)
    }

    fn push(&mut self, sample: StatusSample, now: u64, policy: &WindowPolicy) -> ObserveOutcome {
        let late = sample.timestamp_unix.saturating_add(policy.clock_skew_secs) < now;
        let ahead = sample.timestamp_unix > now.saturating_add(policy.clock_skew_secs);
        let mut observed = ObservedSample {
            sample,
            received_at_unix: now,
            out_of_order: false,
        };
        let key = order_key(&observed, policy);
        let position = self
            .samples
            .partition_point(|stored| order_key(stored, policy) <= key);
        let reordered = position < self.samples.len();
        let out_of_order = late || ahead || reordered;
        observed.out_of_order = out_of_order;

        self.samples.insert(position, observed);
        self.last_seen_unix = self.last_seen_unix.max(now);

        ObserveOutcome {
            created: false,
            out_of_order,
            evicted: self.evict(now, policy),
        }
    }

    /// Drops the oldest samples beyond the count limit, then those older than
    /// `max_age_secs` before `now`. The newest sample always survives.
    fn evict(&mut self, now: u64, policy: &WindowPolicy) -> usize {
        let mut evicted = 0;
        while self.samples.len() > policy.max_samples {
            self.samples.pop_front();
            evicted += 1;
        }

        let cutoff = now.saturating_sub(policy.max_age_secs);
        while self.samples.len() > 1
            && self
                .samples
                .front()
                .is_some_and(|oldest| order_key(oldest, policy) < cutoff)
        {
            self.samples.pop_front();
            evicted += 1;
        }

        evicted
    }

    fn classify(&self, now: u64, policy: &WindowPolicy) -> (Health, bool) {
        classify(
            self.samples.back(),
            self.last_seen_unix,
            now,
            policy.liveness_timeout_secs,
        )
    }

    fn snapshot(&self, node_id: &NodeId, now: u64, policy: &WindowPolicy) -> NodeWindow {
        let (health, stale) = self.classify(now, policy);
        let latest = self.samples.back().map(|observed| &observed.sample);

        NodeWindow {
            node_id: node_id.clone(),
            samples: self.samples.iter().cloned().collect(),
            first_seen_unix: self.first_seen_unix,
            last_seen_unix: self.last_seen_unix,
            health,
            stale,
            chain: latest.and_then(|s| s.chain_id).map(chain_label),
            client: latest
                .and_then(|s| s.client_version.as_deref())
                .map(client_label),
        }
    }

    fn summary(&self, node_id: &NodeId, now: u64, policy: &WindowPolicy) -> Option<NodeSummary> {
        let latest = self.samples.back()?;
        let (health, stale) = self.classify(now, policy);

        Some(NodeSummary {
            node_id: node_id.clone(),
            health,
            latest_status: latest.sample.status,
            last_seen_unix: self.last_seen_unix,
            stale,
        })
    }
}

/// Position of a sample in its window. A timestamp further ahead of arrival
/// than the clock skew is not trusted and the arrival time is used instead.
fn order_key(observed: &ObservedSample, policy: &WindowPolicy) -> u64 {
    let limit = observed
        .received_at_unix
        .saturating_add(policy.clock_skew_secs);
    if observed.sample.timestamp_unix > limit {
        observed.received_at_unix
    } else {
        observed.sample.timestamp_unix
    }
}

/// Derives `(health, stale)` from the newest sample and the last arrival time.
///
/// A node is stale once nothing arrived for longer than the liveness timeout,
/// and stale nodes are bad regardless of what they last reported.
pub fn classify(
    latest: Option<&ObservedSample>,
    last_seen_unix: u64,
    now: u64,
    liveness_timeout_secs: u64,
) -> (Health, bool) {
    let stale = now.saturating_sub(last_seen_unix) > liveness_timeout_secs;
    let failing = latest.is_none_or(|observed| observed.sample.status.is_failure());

    let health = if stale || failing {
        Health::Bad
    } else {
        Health::Healthy
    };
    (health, stale)
}

type Record = Arc<Mutex<StatusWindow>>;

/// Concurrent map from node id to its window of recent observations.
///
/// The map lock is only held to find, insert or remove record handles; each
/// record carries its own lock. Lock order is always map then record.
pub struct StatusRegistry {
    policy: WindowPolicy,
    clock: Arc<dyn Clock>,
    records: RwLock<HashMap<NodeId, Record>>,
}

impl StatusRegistry {
    pub fn new(mut policy: WindowPolicy, clock: Arc<dyn Clock>) -> Self {
        policy.max_samples = policy.max_samples.max(1);
        Self {
            policy,
            clock,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub fn now_unix(&self) -> u64 {
        self.clock.now_unix()
    }

    pub fn observe(&self, node_id: &NodeId, sample: StatusSample) -> ObserveOutcome {
        loop {
            let existing = self.read_records().get(node_id).cloned();
            let record = match existing {
                Some(record) => record,
                None => {
                    let mut records = self.write_records();
                    match records.entry(node_id.clone()) {
                        Entry::Occupied(entry) => Arc::clone(entry.get()),
                        Entry::Vacant(entry) => {
                            let now = self.clock.now_unix();
                            let (window, outcome) = StatusWindow::first(sample, now, &self.policy);
                            entry.insert(Arc::new(Mutex::new(window)));
                            return outcome;
                        }
                    }
                }
            };

            let mut window = lock_record(&record);
            if window.retired {
                // Purged between lookup and lock; start over with a fresh record.
                continue;
            }
            let now = self.clock.now_unix();
            return window.push(sample, now, &self.policy);
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Option<NodeWindow> {
        let record = self.read_records().get(node_id).cloned()?;
        let window = lock_record(&record);
        if window.retired {
            return None;
        }
        Some(window.snapshot(node_id, self.clock.now_unix(), &self.policy))
    }

    /// Lazily yields summaries ordered by node id, optionally only those with
    /// the given health. The key set is captured up front; no registry lock is
    /// held between calls to `next`.
    pub fn list(&self, filter: Option<Health>) -> NodeListing {
        let mut entries: Vec<(NodeId, Record)> = self
            .read_records()
            .iter()
            .map(|(node_id, record)| (node_id.clone(), Arc::clone(record)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        NodeListing {
            entries: entries.into_iter(),
            filter,
            policy: self.policy,
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn purge(&self, older_than_unix: u64) -> usize {
        let mut records = self.write_records();
        let before = records.len();
        records.retain(|_, record| {
            let mut window = lock_record(record);
            if window.last_seen_unix < older_than_unix {
                window.retired = true;
                false
            } else {
                true
            }
        });
        before - records.len()
    }

    pub fn counts(&self) -> RegistryCounts {
        let mut counts = RegistryCounts::default();
        for summary in self.list(None) {
            counts.total += 1;
            match summary.health {
                Health::Healthy => counts.healthy += 1,
                Health::Bad => counts.bad += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every record. Observations arriving afterwards start new records.
    pub fn close(&self) -> usize {
        let mut records = self.write_records();
        for record in records.values() {
            lock_record(record).retired = true;
        }
        let dropped = records.len();
        records.clear();
        dropped
    }

    fn read_records(&self) -> RwLockReadGuard<'_, HashMap<NodeId, Record>> {
        self.records
            .read()
            .expect("status registry map lock poisoned; a writer panicked mid-update")
    }

    fn write_records(&self) -> RwLockWriteGuard<'_, HashMap<NodeId, Record>> {
        self.records
            .write()
            .expect("status registry map lock poisoned; a writer panicked mid-update")
    }
}

fn lock_record(record: &Record) -> MutexGuard<'_, StatusWindow> {
    record
        .lock()
        .expect("status record lock poisoned; a writer panicked mid-update")
}

pub struct NodeListing {
    entries: std::vec::IntoIter<(NodeId, Record)>,
    filter: Option<Health>,
    policy: WindowPolicy,
    clock: Arc<dyn Clock>,
}

impl Iterator for NodeListing {
    type Item = NodeSummary;

    fn next(&mut self) -> Option<Self::Item> {
        for (node_id, record) in self.entries.by_ref() {
            let summary = {
                let window = lock_record(&record);
                if window.retired {
                    continue;
                }
                window.summary(&node_id, self.clock.now_unix(), &self.policy)
            };

            match (summary, self.filter) {
                (Some(summary), Some(filter)) if summary.health != filter => continue,
                (Some(summary), _) => return Some(summary),
                (None, _) => continue,
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.entries.len()))
    }
}

pub(crate) fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
