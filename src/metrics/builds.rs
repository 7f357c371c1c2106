use std::collections::BTreeMap;

use crate::error::Result;
use crate::jenkins::JenkinsClient;
use crate::labels::LabelResolver;

/// Counts of builds currently occupying executors.
#[derive(Debug, Clone, Default)]
pub struct RunningBuildsSummary {
    pub per_job: BTreeMap<String, u64>,
    /// Counts keyed by the job's resolved waiting-for label.
    pub per_label: BTreeMap<String, u64>,
    pub total: u64,
}

impl RunningBuildsSummary {
    /// Flat metric pairs, in emission order: per-job counts, the overall
    /// total, then per-label counts. Dots in job names become underscores so
    /// the name stays a single path segment.
    pub fn to_pairs(&self) -> Vec<(String, f64)> {
        let mut pairs = Vec::with_capacity(self.per_job.len() + self.per_label.len() + 1);

        for (job, count) in &self.per_job {
            pairs.push((
                format!("jobs.{}.running", job.replace('.', "_")),
                *count as f64,
            ));
        }
        pairs.push(("builds.total.running".to_string(), self.total as f64));
        for (label, count) in &self.per_label {
            pairs.push((format!("builds.label.{label}.running"), *count as f64));
        }

        pairs
    }
}

/// Count the builds currently executing, per job and per resolved label.
pub async fn build_running_summary<C: JenkinsClient>(
    client: &C,
    resolver: &mut LabelResolver,
) -> Result<RunningBuildsSummary> {
    let builds = client.get_running_builds().await?;

    let mut summary = RunningBuildsSummary {
        total: builds.len() as u64,
        ..Default::default()
    };

    for build in builds {
        let label = resolver.resolve(client, &build.name).await?;
        *summary.per_job.entry(build.name).or_insert(0) += 1;
        *summary.per_label.entry(label).or_insert(0) += 1;
    }

    Ok(summary)
}
