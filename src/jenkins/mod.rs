use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// Default request timeout for Jenkins API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry in the build queue, from `/queue/api/json`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueItem {
    pub task: QueueTask,
    /// Human-readable reason the entry is waiting. Absent for some entries.
    #[serde(default)]
    pub why: Option<String>,
    /// Enqueue time in milliseconds since the epoch.
    #[serde(rename = "inQueueSince")]
    pub in_queue_since_ms: i64,
}

/// The job a queue entry belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueTask {
    pub name: String,
}

/// Name and connectivity of one node, from `/computer/api/json`.
#[derive(Debug, Clone)]
pub struct NodeSummary {
    pub name: String,
    pub offline: bool,
}

/// Runtime state of one node, from `/computer/<name>/api/json`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub idle: bool,
}

/// A build currently occupying an executor.
#[derive(Debug, Clone)]
pub struct RunningBuild {
    pub name: String,
}

/// Jenkins API client trait. The collector and metric builders depend on
/// this seam so tests can substitute a fake server.
pub trait JenkinsClient: Send + Sync {
    /// Fetch the current build queue.
    fn get_queue_info(&self) -> impl std::future::Future<Output = Result<Vec<QueueItem>>> + Send;

    /// Fetch the node inventory (controller included; callers filter it).
    fn get_nodes(&self) -> impl std::future::Future<Output = Result<Vec<NodeSummary>>> + Send;

    /// Fetch a node's configuration document (XML).
    fn get_node_config(&self, name: &str)
        -> impl std::future::Future<Output = Result<String>> + Send;

    /// Fetch a node's runtime state.
    fn get_node_info(&self, name: &str)
        -> impl std::future::Future<Output = Result<NodeInfo>> + Send;

    /// Fetch a job's configuration document (XML).
    fn get_job_config(&self, name: &str)
        -> impl std::future::Future<Output = Result<String>> + Send;

    /// Fetch the builds currently executing across all nodes.
    fn get_running_builds(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RunningBuild>>> + Send;

    /// Identifies the server and credentials context for cache keying.
    fn server_id(&self) -> &str;
}

/// HTTP-based Jenkins API client.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    server_id: String,
}

impl Client {
    /// Create a new Jenkins client from the runtime configuration.
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;

        let base_url = cfg.jenkins_url.trim_end_matches('/').to_string();
        let server_id = format!("{}@{}", cfg.jenkins_user, base_url);

        Ok(Self {
            http,
            base_url,
            user: cfg.jenkins_user.clone(),
            password: cfg.jenkins_pass.clone(),
            server_id,
        })
    }

    /// Perform a GET request and return the raw body on a 2xx status.
    async fn get_text(&self, path: &str) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);

        let mut request = self.http.get(&url);
        if !self.user.is_empty() {
            request = request.basic_auth(&self.user, Some(&self.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status,
                path: path.to_string(),
            });
        }

        Ok(response.text().await?)
    }

    /// Perform a GET request and deserialize the JSON response.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.get_text(path).await?;
        serde_json::from_str(&body).map_err(|source| Error::Decode {
            path: path.to_string(),
            source,
        })
    }
}

impl JenkinsClient for Client {
    async fn get_queue_info(&self) -> Result<Vec<QueueItem>> {
        debug!("fetching build queue");
        let resp: QueueResponse = self.get_json("/queue/api/json").await?;
        Ok(resp.items)
    }

    async fn get_nodes(&self) -> Result<Vec<NodeSummary>> {
        debug!("fetching node inventory");
        let resp: ComputerSet = self.get_json("/computer/api/json").await?;
        Ok(resp
            .computer
            .into_iter()
            .map(|c| NodeSummary {
                name: c.display_name,
                offline: c.offline,
            })
            .collect())
    }

    async fn get_node_config(&self, name: &str) -> Result<String> {
        let path = format!("/computer/{}/config.xml", encode_segment(name));
        self.get_text(&path).await
    }

    async fn get_node_info(&self, name: &str) -> Result<NodeInfo> {
        let path = format!("/computer/{}/api/json", encode_segment(name));
        self.get_json(&path).await
    }

    async fn get_job_config(&self, name: &str) -> Result<String> {
        self.get_text(&job_config_path(name)).await
    }

    async fn get_running_builds(&self) -> Result<Vec<RunningBuild>> {
        debug!("fetching running builds");
        let resp: ComputerSetDetail = self.get_json("/computer/api/json?depth=2").await?;

        let mut builds = Vec::new();
        for computer in resp.computer {
            for slot in computer
                .executors
                .into_iter()
                .chain(computer.one_off_executors)
            {
                let Some(executable) = slot.current_executable else {
                    continue;
                };
                if let Some(name) = job_name_from_url(&executable.url) {
                    builds.push(RunningBuild { name });
                }
            }
        }

        Ok(builds)
    }

    fn server_id(&self) -> &str {
        &self.server_id
    }
}

/// Encode a job or node name for use as a URL path segment.
fn encode_segment(name: &str) -> String {
    name.replace(' ', "%20")
}

/// Build the config.xml URL path for a job. Folder-nested names use `/` as
/// the separator ("team/deploy") and each segment needs its own `job/` path
/// element, inverting [`job_name_from_url`].
fn job_config_path(name: &str) -> String {
    let mut path = String::new();
    for segment in name.split('/').filter(|s| !s.is_empty()) {
        path.push_str("/job/");
        path.push_str(&encode_segment(segment));
    }
    path.push_str("/config.xml");
    path
}

/// Extract the job name from a build executable URL.
///
/// Jenkins build URLs look like `.../job/<name>/42/`; folder-nested jobs
/// repeat the `job/` element and are joined with `/`.
fn job_name_from_url(url: &str) -> Option<String> {
    let mut names = Vec::new();
    let mut segments = url.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "job" {
            if let Some(name) = segments.next() {
                names.push(name.to_string());
            }
        }
    }

    if names.is_empty() {
        None
    } else {
        Some(names.join("/"))
    }
}

// --- JSON response structures ---

#[derive(Deserialize)]
struct QueueResponse {
    #[serde(default)]
    items: Vec<QueueItem>,
}

#[derive(Deserialize)]
struct ComputerSet {
    #[serde(default)]
    computer: Vec<ComputerSummary>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputerSummary {
    display_name: String,
    #[serde(default)]
    offline: bool,
}

#[derive(Deserialize)]
struct ComputerSetDetail {
    #[serde(default)]
    computer: Vec<ComputerDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputerDetail {
    #[serde(default)]
    executors: Vec<ExecutorSlot>,
    #[serde(default)]
    one_off_executors: Vec<ExecutorSlot>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutorSlot {
    #[serde(default)]
    current_executable: Option<Executable>,
}

#[derive(Deserialize)]
struct Executable {
    url: String,
}
