use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::graphite::MetricValue;
use crate::jenkins::JenkinsClient;
use crate::labels::LabelResolver;

/// One build request waiting for a matching agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub job_name: String,
    pub reason: String,
    pub waiting_minutes: u64,
    /// Label the entry is blocked on, resolved from the job configuration.
    pub waiting_for: String,
}

/// Snapshot of the build queue for one poll cycle.
///
/// Invariants: `total == jobs.len()` and the label counts sum to `total`.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Entries sorted descending by waiting time. Ties keep queue order.
    pub jobs: Vec<QueueEntry>,
    pub label_counts: BTreeMap<String, u64>,
    pub total: u64,
}

impl QueueSnapshot {
    /// Per-label counts as a mapping for the emission adapter.
    pub fn label_tree(&self) -> BTreeMap<String, MetricValue> {
        self.label_counts
            .iter()
            .map(|(label, count)| (label.clone(), MetricValue::Leaf(*count as f64)))
            .collect()
    }

    /// The queue total as a one-entry mapping.
    pub fn total_tree(&self) -> BTreeMap<String, MetricValue> {
        let mut tree = BTreeMap::new();
        tree.insert("total".to_string(), MetricValue::Leaf(self.total as f64));
        tree
    }
}

/// Fetch the build queue and derive per-entry wait times and blocking labels.
pub async fn build_queue_snapshot<C: JenkinsClient>(
    client: &C,
    resolver: &mut LabelResolver,
    now: SystemTime,
) -> Result<QueueSnapshot> {
    let items = client.get_queue_info().await?;
    let now_secs = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let mut jobs = Vec::with_capacity(items.len());
    let mut label_counts: BTreeMap<String, u64> = BTreeMap::new();

    for item in items {
        let waiting_for = resolver.resolve(client, &item.task.name).await?;
        *label_counts.entry(waiting_for.clone()).or_insert(0) += 1;
        jobs.push(QueueEntry {
            job_name: item.task.name,
            reason: item.why.unwrap_or_default(),
            waiting_minutes: waiting_minutes(now_secs, item.in_queue_since_ms),
            waiting_for,
        });
    }

    jobs.sort_by(|a, b| b.waiting_minutes.cmp(&a.waiting_minutes));
    let total = jobs.len() as u64;

    Ok(QueueSnapshot {
        jobs,
        label_counts,
        total,
    })
}

/// Whole minutes an entry has waited. The `abs` tolerates minor clock skew
/// between the poller and the CI server rather than producing negative
/// waits; a known leniency, kept.
fn waiting_minutes(now_secs: i64, in_queue_since_ms: i64) -> u64 {
    (now_secs - in_queue_since_ms / 1000).unsigned_abs() / 60
}
