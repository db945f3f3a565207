//! Proactive token renewal.
//!
//! Arms a one-shot timer for the midpoint of the current token's validity
//! window. When it fires, the refresh runs through the driver (and thus
//! the single-flight coordinator) and the timer re-arms from the new
//! token's claims - a self-renewing chain, independent of request
//! traffic. On failure the chain stops without tearing anything down:
//! recovery belongs to the next request's 401 handling, which avoids
//! duplicate-teardown races between the background timer and foreground
//! traffic.

use std::sync::{Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AuthFault;
use crate::token;

/// The seam the scheduler drives refreshes through. Implemented by the
/// session controller; mocked in tests.
#[async_trait]
pub trait RefreshDriver: Send + Sync {
    async fn proactive_refresh(&self) -> Result<String, AuthFault>;
}

pub struct ProactiveScheduler {
    /// Delay used when a token's midpoint has already passed.
    late_delay: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ProactiveScheduler {
    pub fn new(late_delay: Duration) -> Self {
        Self {
            late_delay,
            timer: Mutex::new(None),
        }
    }

    /// Arm the renewal chain for `access_token`. Any previously armed
    /// timer is cancelled first, so rescheduling is idempotent. A token
    /// without an expiry claim disarms the scheduler entirely.
    pub fn arm(&self, access_token: &str, driver: Weak<dyn RefreshDriver>) {
        self.cancel();

        let Some(initial_delay) = token::proactive_refresh_delay(access_token, self.late_delay)
        else {
            debug!("token has no expiry claim, proactive refresh disabled");
            return;
        };

        debug!(delay_secs = initial_delay.as_secs(), "arming proactive refresh");
        let late_delay = self.late_delay;
        let handle = tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::time::sleep(delay).await;

                let Some(driver) = driver.upgrade() else {
                    debug!("refresh driver dropped, stopping proactive chain");
                    break;
                };
                let result = driver.proactive_refresh().await;
                drop(driver);

                match result {
                    Ok(new_token) => {
                        match token::proactive_refresh_delay(&new_token, late_delay) {
                            Some(next) => {
                                debug!(delay_secs = next.as_secs(), "re-arming proactive refresh");
                                delay = next;
                            }
                            None => {
                                debug!("refreshed token has no expiry claim, stopping chain");
                                break;
                            }
                        }
                    }
                    Err(fault) => {
                        // Next 401 will recover; teardown is the
                        // controller's decision, not ours
                        warn!(fault = %fault, "proactive refresh failed, stopping chain");
                        break;
                    }
                }
            }
        });

        *self.timer.lock().unwrap() = Some(handle);
    }

    /// Cancel any armed timer. Idempotent.
    pub fn cancel(&self) {
        if let Some(handle) = self.timer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for ProactiveScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::token::tests::make_token;

    const LATE: Duration = Duration::from_secs(60);

    struct CountingDriver {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingDriver {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail,
            })
        }

        fn count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RefreshDriver for CountingDriver {
        async fn proactive_refresh(&self) -> Result<String, AuthFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AuthFault::Timeout)
            } else {
                // A fresh 10-minute token issued "now"
                Ok(make_token(Some(0), Some(600)))
            }
        }
    }

    fn downgrade(driver: &Arc<CountingDriver>) -> Weak<dyn RefreshDriver> {
        let as_dyn: Arc<dyn RefreshDriver> = driver.clone();
        Arc::downgrade(&as_dyn)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_self_renewing_chain() {
        let driver = CountingDriver::new(false);
        let scheduler = ProactiveScheduler::new(LATE);

        // Token issued now with a 10 minute lifetime: first firing at ~5min
        scheduler.arm(&make_token(Some(0), Some(600)), downgrade(&driver));

        settle().await;
        tokio::time::advance(Duration::from_secs(301)).await;
        settle().await;
        assert_eq!(driver.count(), 1, "first midpoint firing");

        // The refreshed token re-arms for its own midpoint (~5min later)
        tokio::time::advance(Duration::from_secs(301)).await;
        settle().await;
        assert_eq!(driver.count(), 2, "exactly two refreshes by T+10min");

        scheduler.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_rearming() {
        let driver = CountingDriver::new(true);
        let scheduler = ProactiveScheduler::new(LATE);
        scheduler.arm(&make_token(Some(0), Some(600)), downgrade(&driver));

        settle().await;
        tokio::time::advance(Duration::from_secs(301)).await;
        settle().await;
        assert_eq!(driver.count(), 1);

        // No re-arm after the failure
        tokio::time::advance(Duration::from_secs(3600)).await;
        settle().await;
        assert_eq!(driver.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_disarms() {
        let driver = CountingDriver::new(false);
        let scheduler = ProactiveScheduler::new(LATE);
        scheduler.arm(&make_token(Some(0), Some(600)), downgrade(&driver));
        scheduler.cancel();
        scheduler.cancel();

        tokio::time::advance(Duration::from_secs(3600)).await;
        settle().await;
        assert_eq!(driver.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous_timer() {
        let driver = CountingDriver::new(false);
        let scheduler = ProactiveScheduler::new(LATE);

        // First chain would fire at ~300s
        scheduler.arm(&make_token(Some(0), Some(600)), downgrade(&driver));
        // Re-arm with a past-midpoint token: fires at the 60s late delay
        scheduler.arm(&make_token(Some(-480), Some(120)), downgrade(&driver));

        settle().await;
        tokio::time::advance(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(driver.count(), 1, "late-delay firing");

        // At 301s the aborted first timer must NOT have fired; the second
        // chain's next firing is at ~360s
        tokio::time::advance(Duration::from_secs(240)).await;
        settle().await;
        assert_eq!(driver.count(), 1, "original timer was cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiryless_token_disarms() {
        let driver = CountingDriver::new(false);
        let scheduler = ProactiveScheduler::new(LATE);
        scheduler.arm(&make_token(Some(0), None), downgrade(&driver));

        tokio::time::advance(Duration::from_secs(3600)).await;
        settle().await;
        assert_eq!(driver.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_driver_stops_chain() {
        let driver = CountingDriver::new(false);
        let scheduler = ProactiveScheduler::new(LATE);
        scheduler.arm(&make_token(Some(0), Some(600)), downgrade(&driver));
        drop(driver);

        // Firing upgrades the weak ref, finds nothing, and stops quietly
        tokio::time::advance(Duration::from_secs(301)).await;
        settle().await;
        scheduler.cancel();
    }
}
