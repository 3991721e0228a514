//! Per-wallet cooldown — a uniform minimum gap between upstream calls for
//! the same wallet, on top of the shared rate-limiter budget.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

pub struct WalletCooldown {
    gap: Duration,
    last_call: Mutex<HashMap<String, Instant>>,
}

impl WalletCooldown {
    pub fn new(gap: Duration) -> Self {
        Self {
            gap,
            last_call: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep just long enough that at least `gap` has elapsed since the last
    /// call for this wallet, then record the call.
    pub async fn wait_if_needed(&self, wallet: &str) {
        let ready_at = {
            let map = self.last_call.lock().await;
            map.get(wallet).map(|last| *last + self.gap)
        };

        if let Some(ready_at) = ready_at {
            if ready_at > Instant::now() {
                sleep_until(ready_at).await;
            }
        }

        let mut map = self.last_call.lock().await;
        map.insert(wallet.to_string(), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_is_free() {
        let cd = WalletCooldown::new(Duration::from_secs(1));
        let start = Instant::now();
        cd.wait_if_needed("0xabc").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_waits_out_the_gap() {
        let cd = WalletCooldown::new(Duration::from_secs(1));
        cd.wait_if_needed("0xabc").await;

        let start = Instant::now();
        cd.wait_if_needed("0xabc").await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_wallets_do_not_block_each_other() {
        let cd = WalletCooldown::new(Duration::from_secs(5));
        cd.wait_if_needed("0xabc").await;

        let start = Instant::now();
        cd.wait_if_needed("0xdef").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_elapse_waits_the_remainder() {
        let cd = WalletCooldown::new(Duration::from_secs(1));
        cd.wait_if_needed("0xabc").await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        let start = Instant::now();
        cd.wait_if_needed("0xabc").await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(590), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(700), "waited {waited:?}");
    }
}
