//! Memory watchdog — periodic RSS reporter for the stream ingester.
//!
//! An operational signal, not a control loop: logs resident set size every
//! minute and warns when it crosses the configured fraction of the memory
//! limit.

use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

pub fn spawn(limit_mb: Option<u64>, warn_fraction: f64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(REPORT_INTERVAL);
        tick.tick().await;
        loop {
            tick.tick().await;
            let Some(rss_kb) = read_rss_kb() else {
                debug!("could not read process RSS");
                continue;
            };
            let rss_mb = rss_kb / 1024;
            info!(rss_mb, "memory report");

            if let Some(limit) = limit_mb {
                if rss_mb as f64 > warn_fraction * limit as f64 {
                    warn!(
                        rss_mb,
                        limit_mb = limit,
                        "resident set size above warning threshold"
                    );
                }
            }
        }
    })
}

fn read_rss_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vm_rss_line() {
        let status = "Name:\tworker\nVmPeak:\t  200000 kB\nVmRSS:\t  123456 kB\nThreads:\t8\n";
        assert_eq!(parse_vm_rss(status), Some(123_456));
    }

    #[test]
    fn missing_line_is_none() {
        assert_eq!(parse_vm_rss("Name:\tworker\n"), None);
    }
}
