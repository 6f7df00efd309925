use crate::human_duration;
use serde::Deserialize;
use std::time::Duration;

/// Defines the fine-tune parameters for an
/// [exponential backoff](backoff::ExponentialBackoff) mechanism.
///
/// The defaults are tuned for re-establishing a broker connection: start at
/// one second, double with 50% jitter, never wait longer than 30 seconds,
/// never give up.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(deserialize_with = "human_duration::deserialize")]
    pub(crate) initial_interval: Duration,
    #[serde(deserialize_with = "human_duration::deserialize")]
    pub(crate) max_interval: Duration,
    pub(crate) randomization_factor: f64,
    pub(crate) multiplier: f64,
    #[serde(deserialize_with = "human_duration::deserialize_option")]
    pub(crate) max_elapsed_time: Option<Duration>,
}

impl BackoffConfig {
    /// Exposes the first interval produced by the backoff.
    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    /// Exposes the ceiling that intervals never exceed.
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Exposes the jitter factor applied to every interval.
    pub fn randomization_factor(&self) -> f64 {
        self.randomization_factor
    }

    /// Exposes the multiplier applied between consecutive intervals.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Exposes the total time budget after which the backoff dries out, if
    /// any.
    pub fn max_elapsed_time(&self) -> Option<Duration> {
        self.max_elapsed_time
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            randomization_factor: 0.5,
            multiplier: 2.0,
            max_elapsed_time: None,
        }
    }
}

impl AsRef<BackoffConfig> for BackoffConfig {
    fn as_ref(&self) -> &BackoffConfig {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserialize_from_empty() {
        // Given
        let input = "{}";
        let expected_output = BackoffConfig::default();

        // When
        let actual_output = serde_yml::from_str::<BackoffConfig>(input).unwrap();

        // Then
        assert_eq!(expected_output, actual_output);
    }

    #[test]
    fn deserialize_from_full() {
        // Given
        let input = r#"
initial_interval: 500ms
max_interval: 10s
randomization_factor: 0.25
multiplier: 3.0
max_elapsed_time: 5m
"#;

        // When
        let actual_output = serde_yml::from_str::<BackoffConfig>(input).unwrap();

        // Then
        assert_eq!(actual_output.initial_interval(), Duration::from_millis(500));
        assert_eq!(actual_output.max_interval(), Duration::from_secs(10));
        assert_eq!(actual_output.randomization_factor(), 0.25);
        assert_eq!(actual_output.multiplier(), 3.0);
        assert_eq!(actual_output.max_elapsed_time(), Some(Duration::from_secs(300)));
    }
}
