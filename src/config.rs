use std::time::Duration;

use anyhow::{bail, Result};

/// One day's worth of seconds, used to derive the default cache-renew period.
const CACHE_RENEW_PERIOD_SECS: f64 = 24.0 * 60.0 * 60.0;

/// Runtime configuration for the collector, assembled from CLI flags.
///
/// There is no config file and no environment lookup: the CLI surface is the
/// whole configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Jenkins base URL, e.g. "https://ci.example.com".
    pub jenkins_url: String,

    /// Jenkins API user.
    pub jenkins_user: String,

    /// Jenkins API password or token.
    pub jenkins_pass: String,

    /// Graphite host, optionally with port (defaults to 2003).
    pub graphite_host: String,

    /// Namespace prefix for every emitted metric.
    pub prefix: String,

    /// Poll period.
    pub interval: Duration,

    /// Poll cycles between full label-cache flushes.
    pub cache_renew_cycles: u64,
}

impl Config {
    /// Validates the interval and fills in the derived cache-renew default.
    pub fn new(
        jenkins_url: String,
        jenkins_user: String,
        jenkins_pass: String,
        graphite_host: String,
        prefix: String,
        interval_secs: f64,
        cache_renew: Option<u64>,
    ) -> Result<Self> {
        if !interval_secs.is_finite() || interval_secs <= 0.0 {
            bail!("--interval must be a positive number of seconds, got {interval_secs}");
        }

        // Sub-nanosecond intervals round to a zero Duration, which the tick
        // timer rejects.
        let interval = Duration::from_secs_f64(interval_secs);
        if interval.is_zero() {
            bail!("--interval of {interval_secs}s is too short to schedule");
        }

        let cache_renew_cycles = match cache_renew {
            Some(cycles) => cycles.max(1),
            None => default_cache_renew_cycles(interval_secs),
        };

        Ok(Self {
            jenkins_url,
            jenkins_user,
            jenkins_pass,
            graphite_host,
            prefix,
            interval,
            cache_renew_cycles,
        })
    }
}

/// Cycles between cache flushes so the effective refresh period is ~24h.
fn default_cache_renew_cycles(interval_secs: f64) -> u64 {
    let cycles = (CACHE_RENEW_PERIOD_SECS / interval_secs).round();
    (cycles as u64).max(1)
}
