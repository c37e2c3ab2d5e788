//! Network reachability wait before a sync pass.
//!
//! Polls a connectivity probe once per second until it succeeds or the
//! attempt budget runs out. Exhausting the budget is not fatal: the
//! caller proceeds with the pass anyway and lets the git commands fail
//! on their own terms.

use std::time::Duration;

use tracing::{debug, info};

use crate::process;

/// Default probe budget: 300 attempts at one-second intervals.
pub const DEFAULT_ATTEMPTS: u32 = 300;

/// Wait until `host` answers a single echo probe, up to `attempts`
/// one-second polls. Returns whether a probe ever succeeded.
pub async fn wait_for_network(host: &str, attempts: u32) -> bool {
    if host.is_empty() {
        return true;
    }

    for attempt in 0..attempts {
        if probe(host).await {
            if attempt > 0 {
                info!("network reachable after {} probes", attempt + 1);
            }
            return true;
        }
        debug!("network probe {}/{attempts} to {host} failed", attempt + 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    info!("network wait budget exhausted, proceeding without verified connectivity");
    false
}

async fn probe(host: &str) -> bool {
    #[cfg(windows)]
    let args = ["-n", "1", "-w", "1000", host];
    #[cfg(not(windows))]
    let args = ["-c", "1", "-W", "1", host];

    process::run("ping", &args, None, 3_000).await == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_host_skips_wait() {
        assert!(wait_for_network("", 300).await);
    }

    #[tokio::test]
    async fn test_zero_attempts_gives_up_immediately() {
        assert!(!wait_for_network("192.0.2.1", 0).await);
    }
}
