use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;
use crate::graphite::MetricValue;
use crate::jenkins::JenkinsClient;

/// Launcher class identifying SSH-launched agents, whose configured host
/// populates the `hostname` field.
const SSH_LAUNCHER_CLASS: &str = "hudson.plugins.sshslaves.SSHLauncher";

/// The controller node, always excluded from agent metrics.
const CONTROLLER_NAME: &str = "master";

/// Connectivity of an agent as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Online,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
        }
    }
}

/// One non-controller execution node.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub name: String,
    pub status: AgentStatus,
    pub remote_fs: String,
    pub executors: u32,
    /// Raw space-separated label string as configured.
    pub label: String,
    pub idle: bool,
    /// Present only for SSH-launched agents.
    pub hostname: Option<String>,
}

/// Per-label availability counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelStats {
    pub total: u64,
    /// Agents that are simultaneously online and idle.
    pub idle: u64,
}

/// Fleet-wide availability counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentTotals {
    pub total: u64,
    pub online: u64,
    pub idle: u64,
}

/// Online/idle histogram over a set of agents, bucketed per label token.
#[derive(Debug, Clone, Default)]
pub struct AgentHistogram {
    pub totals: AgentTotals,
    pub labels: BTreeMap<String, LabelStats>,
}

impl AgentHistogram {
    /// Nested mapping for the emission adapter:
    /// `totals.{total,online,idle}` and `labels.<label>.{total,idle}`.
    pub fn to_tree(&self) -> BTreeMap<String, MetricValue> {
        let mut totals = BTreeMap::new();
        totals.insert(
            "total".to_string(),
            MetricValue::Leaf(self.totals.total as f64),
        );
        totals.insert(
            "online".to_string(),
            MetricValue::Leaf(self.totals.online as f64),
        );
        totals.insert(
            "idle".to_string(),
            MetricValue::Leaf(self.totals.idle as f64),
        );

        let mut labels = BTreeMap::new();
        for (label, stats) in &self.labels {
            let mut entry = BTreeMap::new();
            entry.insert("total".to_string(), MetricValue::Leaf(stats.total as f64));
            entry.insert("idle".to_string(), MetricValue::Leaf(stats.idle as f64));
            labels.insert(label.clone(), MetricValue::Nested(entry));
        }

        let mut tree = BTreeMap::new();
        tree.insert("totals".to_string(), MetricValue::Nested(totals));
        tree.insert("labels".to_string(), MetricValue::Nested(labels));
        tree
    }
}

/// Fetch all non-controller agents, sorted and optionally filtered.
///
/// `sort_by` names the leading sort field (case-insensitive, default
/// `status`); the full descending key is (sort field, hostname, idle,
/// label). `search` is either `key~value` (last `~` splits, value matched as
/// a substring of the named field) or a bare substring matched against
/// `hostname`; records missing or empty in the filter key are excluded.
pub async fn list_agents<C: JenkinsClient>(
    client: &C,
    search: &str,
    sort_by: &str,
) -> Result<Vec<AgentRecord>> {
    let mut agents = collect_agents(client).await?;
    sort_agents(&mut agents, sort_by);

    if search.is_empty() {
        return Ok(agents);
    }
    Ok(filter_agents(agents, search))
}

/// Aggregate the online/idle histogram over a set of agents.
///
/// An agent contributes to every token of its raw label split on single
/// spaces, so an empty label yields one `""` bucket.
pub fn histogram(agents: &[AgentRecord]) -> AgentHistogram {
    let mut histo = AgentHistogram::default();
    histo.totals.total = agents.len() as u64;

    for agent in agents {
        let online = agent.status == AgentStatus::Online;
        let counts_idle = online && agent.idle;
        if online {
            histo.totals.online += 1;
            if agent.idle {
                histo.totals.idle += 1;
            }
        }

        for token in agent.label.split(' ') {
            let entry = histo.labels.entry(token.to_string()).or_default();
            entry.total += 1;
            if counts_idle {
                entry.idle += 1;
            }
        }
    }

    histo
}

async fn collect_agents<C: JenkinsClient>(client: &C) -> Result<Vec<AgentRecord>> {
    let nodes = client.get_nodes().await?;
    let mut agents = Vec::with_capacity(nodes.len());

    for node in nodes {
        if node.name == CONTROLLER_NAME {
            continue;
        }

        let config = parse_node_config(&client.get_node_config(&node.name).await?);
        let info = client.get_node_info(&node.name).await?;

        agents.push(AgentRecord {
            name: node.name,
            status: if node.offline {
                AgentStatus::Offline
            } else {
                AgentStatus::Online
            },
            remote_fs: config.remote_fs,
            executors: config.executors,
            label: config.label,
            idle: info.idle,
            hostname: config.ssh_host,
        });
    }

    Ok(agents)
}

fn sort_agents(agents: &mut [AgentRecord], sort_by: &str) {
    let sort_key = sort_by.to_lowercase();
    agents.sort_by(|a, b| key_tuple(b, &sort_key).cmp(&key_tuple(a, &sort_key)));
}

fn key_tuple(agent: &AgentRecord, sort_key: &str) -> (String, String, bool, String) {
    (
        field_value(agent, sort_key).unwrap_or_default(),
        agent.hostname.clone().unwrap_or_default(),
        agent.idle,
        agent.label.clone(),
    )
}

fn filter_agents(agents: Vec<AgentRecord>, search: &str) -> Vec<AgentRecord> {
    // Greedy key: "a~b~c" filters field "a~b" for "c".
    let (key, value) = match search.rsplit_once('~') {
        Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
        None => ("hostname".to_string(), search.trim().to_string()),
    };

    agents
        .into_iter()
        .filter(|agent| {
            field_value(agent, &key)
                .is_some_and(|field| !field.is_empty() && field.contains(&value))
        })
        .collect()
}

/// String view of a record field for sorting and filtering. Unknown keys
/// yield `None`, which excludes the record from `key~value` filters.
fn field_value(agent: &AgentRecord, key: &str) -> Option<String> {
    match key {
        "name" => Some(agent.name.clone()),
        "status" => Some(agent.status.as_str().to_string()),
        "remoteFS" | "remotefs" => Some(agent.remote_fs.clone()),
        "executors" => Some(agent.executors.to_string()),
        "label" => Some(agent.label.clone()),
        "idle" => Some(agent.idle.to_string()),
        "hostname" => agent.hostname.clone(),
        _ => None,
    }
}

// --- Node configuration parsing ---

struct NodeConfig {
    remote_fs: String,
    executors: u32,
    label: String,
    ssh_host: Option<String>,
}

struct NodeConfigPatterns {
    remote_fs: Regex,
    executors: Regex,
    label: Regex,
    launcher_class: Regex,
    host: Regex,
}

/// Lenient single-capture extraction, same contract as the label resolver:
/// tolerant of schema drift, degrades to defaults on non-matching input.
fn node_config_patterns() -> &'static NodeConfigPatterns {
    static PATTERNS: OnceLock<NodeConfigPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| NodeConfigPatterns {
        remote_fs: Regex::new(r"<remoteFS>(.*)</remoteFS>").expect("remoteFS pattern is valid"),
        executors: Regex::new(r"<numExecutors>(.*)</numExecutors>")
            .expect("numExecutors pattern is valid"),
        label: Regex::new(r"<label>(.*)</label>").expect("label pattern is valid"),
        launcher_class: Regex::new(r#"<launcher[^>]*\bclass="([^"]*)""#)
            .expect("launcher pattern is valid"),
        host: Regex::new(r"<host>(.*)</host>").expect("host pattern is valid"),
    })
}

fn capture<'a>(re: &Regex, doc: &'a str) -> Option<&'a str> {
    re.captures(doc)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn parse_node_config(doc: &str) -> NodeConfig {
    let patterns = node_config_patterns();

    let ssh_host = match capture(&patterns.launcher_class, doc) {
        Some(SSH_LAUNCHER_CLASS) => capture(&patterns.host, doc).map(str::to_string),
        _ => None,
    };

    NodeConfig {
        remote_fs: capture(&patterns.remote_fs, doc).unwrap_or_default().to_string(),
        executors: capture(&patterns.executors, doc)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0),
        label: capture(&patterns.label, doc).unwrap_or_default().to_string(),
        ssh_host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jenkins::{NodeInfo, NodeSummary};
    use crate::metrics::testutil::FakeJenkins;

    fn agent(name: &str, status: AgentStatus, label: &str, idle: bool) -> AgentRecord {
        AgentRecord {
            name: name.to_string(),
            status,
            remote_fs: "/var/jenkins".to_string(),
            executors: 2,
            label: label.to_string(),
            idle,
            hostname: Some(format!("{name}.example.com")),
        }
    }

    fn ssh_node_config(label: &str, host: &str) -> String {
        format!(
            concat!(
                "<slave><remoteFS>/var/jenkins</remoteFS>",
                "<numExecutors>2</numExecutors>",
                "<label>{}</label>",
                r#"<launcher class="hudson.plugins.sshslaves.SSHLauncher">"#,
                "<host>{}</host></launcher></slave>"
            ),
            label, host
        )
    }

    #[test]
    fn test_histogram_totals_and_labels() {
        let agents = vec![
            agent("a1", AgentStatus::Online, "linux gpu", true),
            agent("a2", AgentStatus::Online, "linux", false),
            agent("a3", AgentStatus::Offline, "gpu", true),
        ];

        let histo = histogram(&agents);

        assert_eq!(histo.totals.total, 3);
        assert_eq!(histo.totals.online, 2);
        // Offline-and-idle does not count as idle.
        assert_eq!(histo.totals.idle, 1);

        assert_eq!(histo.labels["linux"], LabelStats { total: 2, idle: 1 });
        assert_eq!(histo.labels["gpu"], LabelStats { total: 2, idle: 1 });
    }

    #[test]
    fn test_histogram_invariants() {
        let agents = vec![
            agent("a1", AgentStatus::Online, "linux gpu big", true),
            agent("a2", AgentStatus::Offline, "linux", false),
            agent("a3", AgentStatus::Online, "gpu", false),
        ];

        let histo = histogram(&agents);

        assert!(histo.totals.idle <= histo.totals.online);
        assert!(histo.totals.online <= histo.totals.total);
        for (label, stats) in &histo.labels {
            assert!(stats.idle <= stats.total, "label {label}");
            let carrying = agents
                .iter()
                .filter(|a| a.label.split(' ').any(|t| t == label))
                .count() as u64;
            assert_eq!(stats.total, carrying, "label {label}");
        }
    }

    #[test]
    fn test_histogram_empty_label_bucket() {
        let agents = vec![agent("bare", AgentStatus::Online, "", true)];
        let histo = histogram(&agents);
        assert_eq!(histo.labels[""], LabelStats { total: 1, idle: 1 });
    }

    #[test]
    fn test_histogram_empty_fleet() {
        let histo = histogram(&[]);
        assert_eq!(histo.totals, AgentTotals::default());
        assert!(histo.labels.is_empty());
    }

    #[test]
    fn test_sort_status_default_puts_online_first() {
        let mut agents = vec![
            agent("off", AgentStatus::Offline, "linux", false),
            agent("on", AgentStatus::Online, "linux", false),
        ];
        sort_agents(&mut agents, "STATUS");
        assert_eq!(agents[0].name, "on");
        assert_eq!(agents[1].name, "off");
    }

    #[test]
    fn test_sort_falls_back_to_hostname() {
        let mut agents = vec![
            agent("alpha", AgentStatus::Online, "linux", false),
            agent("zeta", AgentStatus::Online, "linux", false),
        ];
        sort_agents(&mut agents, "status");
        // Same status: hostname descending.
        assert_eq!(agents[0].name, "zeta");
        assert_eq!(agents[1].name, "alpha");
    }

    #[test]
    fn test_filter_by_label_substring() {
        let agents = vec![
            agent("g1", AgentStatus::Online, "linux gpu", true),
            agent("c1", AgentStatus::Online, "linux", true),
        ];

        let filtered = filter_agents(agents, "label~gpu");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "g1");
    }

    #[test]
    fn test_filter_bare_search_matches_hostname() {
        let agents = vec![
            agent("g1", AgentStatus::Online, "linux", true),
            agent("c1", AgentStatus::Online, "linux", true),
        ];

        let filtered = filter_agents(agents, "g1.example");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "g1");
    }

    #[test]
    fn test_filter_excludes_records_missing_key() {
        let mut no_host = agent("bare", AgentStatus::Online, "linux", true);
        no_host.hostname = None;
        let agents = vec![no_host, agent("g1", AgentStatus::Online, "linux", true)];

        let filtered = filter_agents(agents, "hostname~example");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "g1");

        let unknown = filter_agents(
            vec![agent("g1", AgentStatus::Online, "linux", true)],
            "nosuch~x",
        );
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_filter_greedy_key_split() {
        // The last '~' splits, so the key keeps earlier tildes.
        let agents = vec![agent("g1", AgentStatus::Online, "linux", true)];
        assert!(filter_agents(agents, "label~extra~gpu").is_empty());
    }

    #[test]
    fn test_parse_node_config_ssh_launcher() {
        let config = parse_node_config(&ssh_node_config("linux gpu", "10.0.0.5"));
        assert_eq!(config.remote_fs, "/var/jenkins");
        assert_eq!(config.executors, 2);
        assert_eq!(config.label, "linux gpu");
        assert_eq!(config.ssh_host.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn test_parse_node_config_non_ssh_launcher() {
        let doc = concat!(
            "<slave><remoteFS>/srv</remoteFS><numExecutors>1</numExecutors>",
            "<label>win</label>",
            r#"<launcher class="hudson.slaves.JNLPLauncher"><host>ignored</host></launcher>"#,
            "</slave>"
        );
        let config = parse_node_config(doc);
        assert!(config.ssh_host.is_none());
        assert_eq!(config.label, "win");
    }

    #[test]
    fn test_parse_node_config_degrades_on_missing_fields() {
        let config = parse_node_config("<slave></slave>");
        assert_eq!(config.remote_fs, "");
        assert_eq!(config.executors, 0);
        assert_eq!(config.label, "");
        assert!(config.ssh_host.is_none());
    }

    #[tokio::test]
    async fn test_list_agents_excludes_controller() {
        let client = FakeJenkins {
            nodes: vec![
                NodeSummary {
                    name: "master".to_string(),
                    offline: false,
                },
                NodeSummary {
                    name: "agent-1".to_string(),
                    offline: false,
                },
            ],
            node_configs: [(
                "agent-1".to_string(),
                ssh_node_config("linux", "10.0.0.5"),
            )]
            .into_iter()
            .collect(),
            node_info: [("agent-1".to_string(), NodeInfo { idle: true })]
                .into_iter()
                .collect(),
            ..Default::default()
        };

        let agents = list_agents(&client, "", "status").await.expect("agents");
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "agent-1");
        assert_eq!(agents[0].status, AgentStatus::Online);
        assert!(agents[0].idle);
        assert_eq!(agents[0].hostname.as_deref(), Some("10.0.0.5"));
    }
}
