use crate::BackoffConfig;
use backoff::backoff::Backoff as BackoffSeries;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Paces one retry loop around a jittered exponential interval series.
///
/// A pacer belongs to a single loop — a reconnecting broker client, a
/// consumer rebuilding its channel: [`pause`](RetryPacer::pause) after every
/// failure, [`settle`](RetryPacer::settle) after the first success. The
/// number of failures paced since the last settle is tracked and exposed as
/// [`attempt`](RetryPacer::attempt), so retry log entries can say how deep
/// into the series the loop is.
pub struct RetryPacer {
    series: SyncMutex<ExponentialBackoff>,
    attempts: AtomicU32,
}

impl RetryPacer {
    /// Builds a pacer from the given [`BackoffConfig`].
    pub fn new(config: impl AsRef<BackoffConfig>) -> Self {
        let config = config.as_ref();
        let series = ExponentialBackoffBuilder::new()
            .with_initial_interval(config.initial_interval())
            .with_max_interval(config.max_interval())
            .with_randomization_factor(config.randomization_factor())
            .with_multiplier(config.multiplier())
            .with_max_elapsed_time(config.max_elapsed_time())
            .build();

        Self {
            series: SyncMutex::new(series),
            attempts: AtomicU32::new(0),
        }
    }

    /// Sleeps for the next interval of the series and returns the time
    /// actually waited.
    ///
    /// Once the configured total time budget (if any) is exhausted, the
    /// series dries out: the pacer stops sleeping, merely yields to the
    /// runtime, and returns [`Duration::ZERO`].
    pub async fn pause(&self) -> Duration {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        match self.next_interval() {
            Some(interval) => {
                tokio::time::sleep(interval).await;

                interval
            }
            None => {
                tokio::task::yield_now().await;

                Duration::ZERO
            }
        }
    }

    /// Restarts the series after a success: the next pause starts over from
    /// the initial interval, and the attempt counter returns to zero.
    pub fn settle(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.series.lock().reset();
    }

    /// Reports how many failures have been paced since the last
    /// [`settle`](RetryPacer::settle).
    pub fn attempt(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Draws the next interval from the underlying series.
    fn next_interval(&self) -> Option<Duration> {
        self.series.lock().next_backoff()
    }
}

impl Default for RetryPacer {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn deterministic_config() -> BackoffConfig {
        BackoffConfig {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(64),
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
        }
    }

    #[tokio::test]
    async fn pacing_grows_until_settled() {
        // Given
        let pacer = RetryPacer::new(deterministic_config());

        // When
        let first = pacer.pause().await;
        let second = pacer.pause().await;

        // Then
        assert!(second > first);
        assert_eq!(pacer.attempt(), 2);

        // When settled, the series and the counter start over
        pacer.settle();
        assert_eq!(pacer.attempt(), 0);
        assert_eq!(pacer.pause().await, first);
    }

    #[tokio::test]
    async fn dried_out_series_only_yields() {
        // Given: a series with no time budget at all
        let pacer = RetryPacer::new(BackoffConfig {
            max_elapsed_time: Some(Duration::ZERO),
            ..deterministic_config()
        });

        // Then: pauses stop sleeping but the attempts keep counting
        assert_eq!(pacer.pause().await, Duration::ZERO);
        assert_eq!(pacer.pause().await, Duration::ZERO);
        assert_eq!(pacer.attempt(), 2);
    }
}
