//! Reconnection after link loss.
//!
//! [`ScaleProcessor::start_reconnect_monitor`] checks the bound scale on an
//! interval and, once its link has dropped, reconnects it with exponential
//! backoff. It never competes with a lifecycle change: a round is skipped
//! while [`ScaleProcessor::change_scale_to_id`] runs, and attempts stop as
//! soon as the scale being reconnected is no longer current.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crema_types::Connectivity;

use crate::error::Error;
use crate::events::{ScaleEvent, ScaleId};
use crate::processor::ScaleProcessor;
use crate::traits::SharedScale;

/// Backoff schedule for the reconnect monitor.
///
/// Attempt `n` (0-based) waits `initial_delay * 2^n`, never more than
/// `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Give up after this many attempts (`None` retries forever).
    pub max_attempts: Option<u32>,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Ceiling on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectOptions {
    /// Limit the number of attempts in one run.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set the delay after the first failed attempt.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay after failed attempt `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether `attempts` made so far exhaust the limit.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// How a reconnection run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Reconnected,
    GaveUp,
    Abandoned,
}

impl ScaleProcessor {
    /// Start a background task that reconnects the bound scale after link loss.
    ///
    /// Does nothing on each tick while `auto_reconnect` is disabled. Stop it
    /// by cancelling `cancel_token`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use tokio_util::sync::CancellationToken;
    /// use crema_core::{MockDiscovery, ProcessorConfig, ScaleProcessor};
    ///
    /// # async fn example() -> crema_core::Result<()> {
    /// let discovery = Arc::new(MockDiscovery::new());
    /// let config = ProcessorConfig::default();
    /// let processor = Arc::new(ScaleProcessor::from_discovery(discovery, config)?);
    /// let cancel = CancellationToken::new();
    /// let handle = processor.start_reconnect_monitor(cancel.clone());
    ///
    /// // Later:
    /// cancel.cancel();
    /// handle.await.ok();
    /// # Ok(())
    /// # }
    /// ```
    pub fn start_reconnect_monitor(
        self: &Arc<Self>,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let processor = Arc::clone(self);
        let period = processor.config.health_check_interval;
        let options = processor.config.reconnect_options();

        tokio::spawn(async move {
            let mut check_interval = interval(period);
            check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        info!("Reconnect monitor cancelled, shutting down");
                        break;
                    }
                    _ = check_interval.tick() => {
                        if !processor.config.auto_reconnect {
                            continue;
                        }
                        let Some(scale) = processor.current_scale() else {
                            continue;
                        };
                        if scale.connectivity() != Connectivity::NotConnected {
                            continue;
                        }
                        let outcome = processor.reconnect(&scale, &options, &cancel_token).await;
                        debug!("Reconnect of {} ended: {:?}", scale.address(), outcome);
                    }
                }
            }
        })
    }

    async fn reconnect(
        &self,
        scale: &SharedScale,
        options: &ReconnectOptions,
        cancel: &CancellationToken,
    ) -> Outcome {
        let id = ScaleId::of(scale.as_ref());
        let mut attempts = 0;

        loop {
            let result = {
                let Ok(_transition) = self.transition.try_lock() else {
                    debug!("Scale change in progress, skipping reconnect round");
                    return Outcome::Abandoned;
                };
                if !self.is_current(scale) {
                    return Outcome::Abandoned;
                }
                attempts += 1;
                info!("Reconnecting {} (attempt {})", id.address, attempts);
                self.emit(ScaleEvent::ReconnectStarted {
                    scale: id.clone(),
                    attempt: attempts,
                });
                scale.connect().await
            };

            match result {
                Ok(()) => {
                    info!("Reconnected {} after {} attempt(s)", id.address, attempts);
                    self.emit(ScaleEvent::ReconnectSucceeded {
                        scale: id.clone(),
                        attempts,
                    });
                    self.emit(ScaleEvent::Connected { scale: id });
                    return Outcome::Reconnected;
                }
                Err(Error::Decommissioned) => return Outcome::Abandoned,
                Err(e) => warn!("Reconnect attempt {} for {} failed: {}", attempts, id.address, e),
            }

            if options.exhausted(attempts) {
                warn!("Giving up reconnecting {} after {} attempts", id.address, attempts);
                self.emit(ScaleEvent::ReconnectFailed {
                    scale: id,
                    attempts,
                });
                return Outcome::GaveUp;
            }

            let delay = options.delay_for_attempt(attempts - 1);
            tokio::select! {
                _ = cancel.cancelled() => return Outcome::Abandoned,
                _ = sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_retry_forever() {
        let opts = ReconnectOptions::default();
        assert_eq!(opts.max_attempts, None);
        assert!(!opts.exhausted(u32::MAX));
    }

    #[test]
    fn test_delay_doubles() {
        let opts = ReconnectOptions::default().max_delay(Duration::from_secs(60));

        assert_eq!(opts.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(opts.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(opts.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(opts.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let opts = ReconnectOptions::default();
        assert_eq!(opts.delay_for_attempt(10), Duration::from_secs(10));
        assert_eq!(opts.delay_for_attempt(200), Duration::from_secs(10));
    }

    #[test]
    fn test_sub_second_ceiling() {
        let opts = ReconnectOptions::default()
            .initial_delay(Duration::from_millis(500))
            .max_delay(Duration::from_millis(500));
        assert_eq!(opts.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(opts.delay_for_attempt(4), Duration::from_millis(500));
    }

    #[test]
    fn test_exhausted() {
        let opts = ReconnectOptions::default().max_attempts(2);
        assert!(!opts.exhausted(1));
        assert!(opts.exhausted(2));
    }
}
