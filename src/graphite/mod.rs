use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Result;

/// Default Graphite plaintext-protocol port.
const DEFAULT_PORT: u16 = 2003;

/// A value in a nested metric mapping. Leaves become dotted-path scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Leaf(f64),
    Nested(BTreeMap<String, MetricValue>),
}

/// The shapes the emission adapter accepts from the metric builders.
///
/// Resolved at the call site instead of inspected at runtime: a flat list is
/// sent as one transmission, a nested mapping is flattened into one
/// transmission per leaf, and an empty payload never touches the sink.
#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    List(Vec<(String, f64)>),
    Nested(BTreeMap<String, MetricValue>),
}

/// Recursively flatten a nested mapping into dotted-path scalar records.
pub fn flatten(map: &BTreeMap<String, MetricValue>) -> Vec<(String, f64)> {
    let mut records = Vec::new();
    flatten_into(map, "", &mut records);
    records
}

fn flatten_into(map: &BTreeMap<String, MetricValue>, prefix: &str, out: &mut Vec<(String, f64)>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            MetricValue::Leaf(v) => out.push((path, *v)),
            MetricValue::Nested(inner) => flatten_into(inner, &path, out),
        }
    }
}

/// Factory for per-emission sink connections.
///
/// Each [`emit`] call gets a fresh connection scoped to one namespace
/// prefix; connections are not pooled across calls.
pub trait MetricSink: Send + Sync {
    type Conn: SinkConnection + Send;

    fn connect(
        &self,
        namespace: &str,
    ) -> impl std::future::Future<Output = Result<Self::Conn>> + Send;
}

/// One open connection to the sink, bound to a namespace prefix.
pub trait SinkConnection {
    /// Transmit a group of (path, value) records.
    fn send(
        &mut self,
        records: &[(String, f64)],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Normalize a payload and hand it to the sink under the given namespace.
///
/// An empty payload is a no-op: no connection is opened.
pub async fn emit<S: MetricSink>(sink: &S, namespace: &str, payload: Payload) -> Result<()> {
    match payload {
        Payload::Empty => {
            debug!(namespace, "empty payload, not sending");
            Ok(())
        }
        Payload::List(records) => {
            if records.is_empty() {
                debug!(namespace, "empty list payload, not sending");
                return Ok(());
            }
            debug!(namespace, count = records.len(), "sending metric list");
            let mut conn = sink.connect(namespace).await?;
            conn.send(&records).await
        }
        Payload::Nested(map) => {
            if map.is_empty() {
                debug!(namespace, "empty mapping payload, not sending");
                return Ok(());
            }
            let records = flatten(&map);
            debug!(namespace, count = records.len(), "sending flattened mapping");
            let mut conn = sink.connect(namespace).await?;
            for record in records {
                conn.send(std::slice::from_ref(&record)).await?;
            }
            Ok(())
        }
    }
}

/// Graphite plaintext-protocol sink over TCP.
pub struct GraphiteSink {
    address: String,
}

impl GraphiteSink {
    /// Create a sink for the given host, appending the default port when the
    /// host carries none.
    pub fn new(host: &str) -> Self {
        let address = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:{DEFAULT_PORT}")
        };
        Self { address }
    }
}

impl MetricSink for GraphiteSink {
    type Conn = GraphiteConnection;

    async fn connect(&self, namespace: &str) -> Result<GraphiteConnection> {
        let stream = TcpStream::connect(&self.address).await?;
        Ok(GraphiteConnection {
            stream,
            namespace: namespace.to_string(),
        })
    }
}

/// One plaintext-protocol connection: `<namespace>.<path> <value> <ts>\n`.
pub struct GraphiteConnection {
    stream: TcpStream,
    namespace: String,
}

impl SinkConnection for GraphiteConnection {
    async fn send(&mut self, records: &[(String, f64)]) -> Result<()> {
        let timestamp = unix_now_secs();
        let mut buf = String::with_capacity(records.len() * 48);
        for (path, value) in records {
            buf.push_str(&format!("{}.{} {} {}\n", self.namespace, path, value, timestamp));
        }
        self.stream.write_all(buf.as_bytes()).await?;
        Ok(())
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
