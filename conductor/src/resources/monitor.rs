//! Background resource monitoring: host sampling and stuck-allocation
//! detection.

use super::ResourceManager;
use crate::cancellation::CancellationToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// Reads host CPU load and memory usage.
///
/// Returns `(one_minute_load, memory_used_gb)`. On platforms without
/// procfs (or when it is unreadable) both values fall back to zero; the
/// history then still tracks pool allocation over time.
#[must_use]
pub fn host_snapshot() -> (f64, f64) {
    let load = std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| {
            s.split_whitespace()
                .next()
                .and_then(|v| v.parse::<f64>().ok())
        })
        .unwrap_or(0.0);

    let memory_used_gb = std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|contents| {
            let mut total_kb = None;
            let mut available_kb = None;
            for line in contents.lines() {
                if let Some(rest) = line.strip_prefix("MemTotal:") {
                    total_kb = rest.split_whitespace().next().and_then(|v| v.parse::<f64>().ok());
                } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                    available_kb =
                        rest.split_whitespace().next().and_then(|v| v.parse::<f64>().ok());
                }
            }
            match (total_kb, available_kb) {
                (Some(total), Some(available)) => Some((total - available) / 1024.0 / 1024.0),
                _ => None,
            }
        })
        .unwrap_or(0.0);

    (load, memory_used_gb)
}

/// Spawns the monitor loop.
///
/// Each tick samples host CPU/memory into the bounded usage history and
/// flags allocations held beyond `stuck_ceiling`. The loop exits when the
/// token is cancelled.
pub fn spawn_monitor(
    manager: Arc<ResourceManager>,
    sample_interval: Duration,
    stuck_ceiling: Duration,
    cancel: Arc<CancellationToken>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(sample_interval);
        // The first tick fires immediately; skip it so tests with short
        // intervals see evenly spaced samples.
        ticker.tick().await;

        info!(
            interval_secs = sample_interval.as_secs_f64(),
            "resource monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (load, memory_used_gb) = host_snapshot();
                    manager.record_usage_sample(load, memory_used_gb);
                    let stuck = manager.detect_stuck_allocations(stuck_ceiling);
                    debug!(load, memory_used_gb, stuck = stuck.len(), "sampled host usage");
                }
                () = cancel.cancelled() => {
                    info!("resource monitor stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_snapshot_is_non_negative() {
        let (load, memory) = host_snapshot();
        assert!(load >= 0.0);
        assert!(memory >= 0.0);
    }

    #[tokio::test]
    async fn test_monitor_records_samples_and_stops() {
        let manager = Arc::new(ResourceManager::new(4.0, 16.0, 0));
        let cancel = CancellationToken::new();

        let handle = spawn_monitor(
            manager.clone(),
            Duration::from_millis(10),
            Duration::from_secs(3600),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel("test done");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(!manager.usage_history().is_empty());
    }
}
