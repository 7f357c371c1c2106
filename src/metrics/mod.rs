pub mod agents;
pub mod builds;
pub mod queue;

/// Self-instrumentation pairs for one completed poll cycle: cycles remaining
/// until the next cache renewal, the configured poll period, and the
/// wall-clock cost of the cycle that just finished.
pub fn internal_stats(
    cache_renew_remaining: u64,
    sample_rate_secs: f64,
    sending_time_secs: f64,
) -> Vec<(String, f64)> {
    vec![
        (
            "internal.cache_renew".to_string(),
            cache_renew_remaining as f64,
        ),
        ("internal.sample_rate".to_string(), sample_rate_secs),
        ("internal.sending_time".to_string(), sending_time_secs),
    ]
}
