use std::time::{Instant, SystemTime};

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::Result;
use crate::graphite::{emit, MetricSink, Payload};
use crate::jenkins::JenkinsClient;
use crate::labels::LabelResolver;
use crate::metrics::{agents, builds, internal_stats, queue};

/// Outcome of one successful poll cycle, for logging and tests.
#[derive(Debug, Clone, Copy)]
pub struct CycleStats {
    pub queued: u64,
    pub agents: u64,
    pub running: u64,
    /// Cycles left until the next cache flush.
    pub cache_renew_remaining: u64,
    pub sending_time_secs: f64,
}

/// Poll-loop orchestrator. Owns the label resolver and the cycle counter;
/// one instance runs as a single sequential task, so cycles never overlap.
pub struct Collector<C, S> {
    client: C,
    sink: S,
    config: Config,
    resolver: LabelResolver,
    cycles: u64,
}

impl<C: JenkinsClient, S: MetricSink> Collector<C, S> {
    pub fn new(client: C, sink: S, config: Config) -> Self {
        Self {
            client,
            sink,
            config,
            resolver: LabelResolver::new(),
            cycles: 0,
        }
    }

    /// Poll forever at the configured interval.
    ///
    /// A failed cycle is logged and its partial state discarded; the next
    /// tick is the retry. Only a signal stops the loop.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            cache_renew_cycles = self.config.cache_renew_cycles,
            prefix = self.config.prefix.as_str(),
            "collector started"
        );

        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(stats) => {
                    debug!(
                        queued = stats.queued,
                        agents = stats.agents,
                        running = stats.running,
                        sending_time_secs = stats.sending_time_secs,
                        "cycle complete"
                    );
                }
                Err(err) => {
                    error!(kind = err.kind().as_str(), error = %err, "cycle failed");
                }
            }
        }
    }

    /// Gather and emit all metric groups for one cycle, then do cache
    /// housekeeping.
    pub async fn run_cycle(&mut self) -> Result<CycleStats> {
        let started = Instant::now();
        let prefix = self.config.prefix.clone();
        let queue_namespace = format!("{prefix}.inqueue");
        let agents_namespace = format!("{prefix}.slaves");

        let snapshot =
            queue::build_queue_snapshot(&self.client, &mut self.resolver, SystemTime::now())
                .await?;
        emit(
            &self.sink,
            &queue_namespace,
            Payload::Nested(snapshot.label_tree()),
        )
        .await?;
        emit(
            &self.sink,
            &queue_namespace,
            Payload::Nested(snapshot.total_tree()),
        )
        .await?;

        let fleet = agents::list_agents(&self.client, "", "status").await?;
        let histo = agents::histogram(&fleet);
        emit(
            &self.sink,
            &agents_namespace,
            Payload::Nested(histo.to_tree()),
        )
        .await?;

        let running = builds::build_running_summary(&self.client, &mut self.resolver).await?;
        emit(&self.sink, &prefix, Payload::List(running.to_pairs())).await?;

        self.cycles += 1;
        let remaining = self.config.cache_renew_cycles.saturating_sub(self.cycles);
        let sending_time = started.elapsed().as_secs_f64();
        emit(
            &self.sink,
            &prefix,
            Payload::List(internal_stats(
                remaining,
                self.config.interval.as_secs_f64(),
                sending_time,
            )),
        )
        .await?;

        if self.cycles >= self.config.cache_renew_cycles {
            info!(
                iterations = self.cycles,
                hits = self.resolver.hits(),
                misses = self.resolver.misses(),
                "flushing label caches"
            );
            self.resolver.invalidate();
            self.cycles = 0;
        }

        Ok(CycleStats {
            queued: snapshot.total,
            agents: fleet.len() as u64,
            running: running.total,
            cache_renew_remaining: remaining,
            sending_time_secs: sending_time,
        })
    }
}
