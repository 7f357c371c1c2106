use std::num::NonZeroUsize;
use std::sync::OnceLock;

use lru::LruCache;
use regex::Regex;
use tracing::trace;

use crate::error::Result;
use crate::jenkins::JenkinsClient;

/// Sentinel label for jobs with no assigned-node constraint.
pub const NO_LABEL: &str = "no_label";

/// Bound on both memoization tables.
const CACHE_CAPACITY: usize = 128;

/// Matches the first assigned-node expression in a job configuration
/// document. Deliberately a lenient single-capture match rather than a full
/// XML parse: tolerant of schema drift across Jenkins versions and plugins.
/// Greedy, and `.` does not cross newlines.
fn assigned_node_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<assignedNode>(.*)</assignedNode>").expect("assignedNode pattern is valid")
    })
}

/// Cache key: one resolver may serve multiple servers, so the job name alone
/// is not unique.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    server: String,
    job: String,
}

/// Resolves a job name to its normalized waiting-for label, memoizing both
/// the raw config fetch and the derived label.
///
/// Entries never expire individually; the orchestrator clears both tables in
/// lock-step via [`LabelResolver::invalidate`] after a configured number of
/// poll cycles. Owned by the collector task, so no interior locking.
pub struct LabelResolver {
    labels: LruCache<CacheKey, String>,
    configs: LruCache<CacheKey, String>,
    hits: u64,
    misses: u64,
}

impl Default for LabelResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelResolver {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero");
        Self {
            labels: LruCache::new(capacity),
            configs: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Resolve a job's waiting-for label.
    ///
    /// Never fails on a well-formed config document (absence of the tag
    /// yields [`NO_LABEL`]); transport failures from the config fetch
    /// propagate to the caller.
    pub async fn resolve<C: JenkinsClient>(&mut self, client: &C, job: &str) -> Result<String> {
        let key = CacheKey {
            server: client.server_id().to_string(),
            job: job.to_string(),
        };

        if let Some(label) = self.labels.get(&key) {
            self.hits += 1;
            trace!(job, label = label.as_str(), "label cache hit");
            return Ok(label.clone());
        }
        self.misses += 1;

        let config = match self.configs.get(&key) {
            Some(config) => config.clone(),
            None => {
                let config = client.get_job_config(job).await?;
                self.configs.put(key.clone(), config.clone());
                config
            }
        };

        let label = extract_label(&config);
        self.labels.put(key, label.clone());
        Ok(label)
    }

    /// Fully clear both memoization tables.
    pub fn invalidate(&mut self) {
        self.labels.clear();
        self.configs.clear();
    }

    /// Number of label-cache hits since construction.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Number of label-cache misses since construction.
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// Derive the normalized label from a job configuration document.
pub fn extract_label(config_xml: &str) -> String {
    match assigned_node_re()
        .captures(config_xml)
        .and_then(|caps| caps.get(1))
    {
        Some(raw) => normalize_label(raw.as_str()),
        None => NO_LABEL.to_string(),
    }
}

/// Normalize an assigned-node expression into a metric-safe label.
///
/// Substitutions applied in order: `||` to `or`, XML-escaped `&&` to `and`,
/// trim, then spaces to underscores.
fn normalize_label(raw: &str) -> String {
    raw.replace("||", "or")
        .replace("&amp;&amp;", "and")
        .trim()
        .replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::jenkins::{NodeInfo, NodeSummary, QueueItem, RunningBuild};

    /// Serves canned job configs and counts fetches.
    struct CountingClient {
        config: String,
        fetches: AtomicUsize,
    }

    impl CountingClient {
        fn new(config: &str) -> Self {
            Self {
                config: config.to_string(),
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl JenkinsClient for CountingClient {
        async fn get_queue_info(&self) -> Result<Vec<QueueItem>> {
            Ok(Vec::new())
        }

        async fn get_nodes(&self) -> Result<Vec<NodeSummary>> {
            Ok(Vec::new())
        }

        async fn get_node_config(&self, _name: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn get_node_info(&self, _name: &str) -> Result<NodeInfo> {
            Ok(NodeInfo { idle: true })
        }

        async fn get_job_config(&self, _name: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.config.clone())
        }

        async fn get_running_builds(&self) -> Result<Vec<RunningBuild>> {
            Ok(Vec::new())
        }

        fn server_id(&self) -> &str {
            "graphite@http://jenkins:8080"
        }
    }

    #[test]
    fn test_substitution_chain() {
        let config = "<project><assignedNode>A||B &amp;&amp; C</assignedNode></project>";
        assert_eq!(extract_label(config), "AorB_and_C");
    }

    #[test]
    fn test_plain_label() {
        let config = "<project><assignedNode>linux</assignedNode></project>";
        assert_eq!(extract_label(config), "linux");
    }

    #[test]
    fn test_whitespace_becomes_underscores() {
        let config = "<project><assignedNode>  linux or gpu  </assignedNode></project>";
        assert_eq!(extract_label(config), "linux_or_gpu");
    }

    #[test]
    fn test_missing_tag_yields_no_label() {
        assert_eq!(extract_label("<project></project>"), NO_LABEL);
        assert_eq!(extract_label(""), NO_LABEL);
    }

    #[test]
    fn test_empty_tag_yields_empty_label() {
        // Matches the lenient extraction contract: an empty expression is a
        // valid (degenerate) label, not a fallback to no_label.
        let config = "<project><assignedNode></assignedNode></project>";
        assert_eq!(extract_label(config), "");
    }

    #[test]
    fn test_tag_spanning_lines_is_not_matched() {
        let config = "<project><assignedNode>linux\n</assignedNode></project>";
        assert_eq!(extract_label(config), NO_LABEL);
    }

    #[tokio::test]
    async fn test_resolve_memoizes_config_fetch() {
        let client =
            CountingClient::new("<project><assignedNode>linux</assignedNode></project>");
        let mut resolver = LabelResolver::new();

        let first = resolver.resolve(&client, "deploy").await.expect("resolve");
        let second = resolver.resolve(&client, "deploy").await.expect("resolve");

        assert_eq!(first, "linux");
        assert_eq!(second, "linux");
        assert_eq!(client.fetches(), 1);
        assert_eq!(resolver.hits(), 1);
        assert_eq!(resolver.misses(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let client = CountingClient::new("<project></project>");
        let mut resolver = LabelResolver::new();

        let label = resolver.resolve(&client, "deploy").await.expect("resolve");
        assert_eq!(label, NO_LABEL);
        assert_eq!(client.fetches(), 1);

        resolver.invalidate();

        let label = resolver.resolve(&client, "deploy").await.expect("resolve");
        assert_eq!(label, NO_LABEL);
        assert_eq!(client.fetches(), 2);
    }

    #[tokio::test]
    async fn test_distinct_jobs_fetch_separately() {
        let client =
            CountingClient::new("<project><assignedNode>linux</assignedNode></project>");
        let mut resolver = LabelResolver::new();

        resolver.resolve(&client, "deploy").await.expect("resolve");
        resolver.resolve(&client, "test").await.expect("resolve");

        assert_eq!(client.fetches(), 2);
    }
}
