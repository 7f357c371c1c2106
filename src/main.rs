use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use jenkins_graphite::collector::Collector;
use jenkins_graphite::config::Config;
use jenkins_graphite::graphite::GraphiteSink;
use jenkins_graphite::jenkins::Client;

/// Jenkins queue, agent, and build metrics forwarder for Graphite.
#[derive(Parser)]
#[command(name = "jenkins-graphite", about, version)]
struct Cli {
    /// Jenkins base URL, e.g. https://ci.example.com.
    #[arg(long = "jenkins_url")]
    jenkins_url: String,

    /// Graphite host, with optional port (default 2003).
    #[arg(long = "graphite_host", default_value = "localhost")]
    graphite_host: String,

    /// Jenkins API user.
    #[arg(long = "jenkins_user", default_value = "graphite")]
    jenkins_user: String,

    /// Jenkins API password or token.
    #[arg(long = "jenkins_pass", default_value = "")]
    jenkins_pass: String,

    /// Poll interval in seconds.
    #[arg(long = "interval", default_value_t = 30.0)]
    interval: f64,

    /// Namespace prefix for every emitted metric.
    #[arg(long = "prefix", default_value = "jenkins")]
    prefix: String,

    /// Poll cycles between label-cache flushes (default: one day's worth).
    #[arg(long = "cache_renew")]
    cache_renew: Option<u64>,

    /// Log file path.
    #[arg(long = "log_file", default_value = "/var/log/jenkins_graphite.log")]
    log_file: String,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long = "log_level", default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    let log_path = Path::new(&cli.log_file);
    let directory = log_path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = log_path
        .file_name()
        .with_context(|| format!("invalid log file path: {}", cli.log_file))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, _guard) = tracing_appender::non_blocking(appender);

    fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    tracing::info!(pid = std::process::id(), "starting jenkins-graphite");
    tracing::info!(args = %redacted_args().join(" "), "invocation");

    let cfg = Config::new(
        cli.jenkins_url,
        cli.jenkins_user,
        cli.jenkins_pass,
        cli.graphite_host,
        cli.prefix,
        cli.interval,
        cli.cache_renew,
    )?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let client = Client::new(&cfg).context("building Jenkins client")?;
    let sink = GraphiteSink::new(&cfg.graphite_host);

    Collector::new(client, sink, cfg).run().await;
    Ok(())
}

/// Command-line arguments with any credential flag and its value removed.
fn redacted_args() -> Vec<String> {
    let mut out = Vec::new();
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg.starts_with("--") && arg.contains("pass") {
            if !arg.contains('=') {
                args.next();
            }
            continue;
        }
        out.push(arg);
    }
    out
}
