use crate::Handle;
use serde::Deserialize;

/// Configuration of the [`AmqpTransport`](crate::AmqpTransport): the broker
/// [`Handle`] plus the exchange topology and consumer tuning knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    /// The connection handle of the target broker.
    pub handle: Handle,
    /// Name of the durable topic exchange every fabric message travels
    /// through.
    #[serde(rename = "exchange_name")]
    pub exchange: String,
    /// Name of the durable topic dead-letter exchange that receives messages
    /// rejected without requeue.
    #[serde(rename = "dlx_name")]
    pub dlx: String,
    /// Whether exchanges and queues are declared durable.
    pub durable: bool,
    /// Broker-side prefetch: how many unacknowledged deliveries each
    /// subscription may hold in flight.
    pub prefetch: u16,
}

impl AmqpConfig {
    fn default_exchange() -> String {
        "weft".to_string()
    }

    fn default_dlx() -> String {
        "weft.dlx".to_string()
    }
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            handle: Handle::default(),
            exchange: Self::default_exchange(),
            dlx: Self::default_dlx(),
            durable: true,
            prefetch: 16,
        }
    }
}

impl AsRef<AmqpConfig> for AmqpConfig {
    fn as_ref(&self) -> &AmqpConfig {
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
        let expected_output = AmqpConfig::default();

        // When
        let actual_output = serde_yml::from_str::<AmqpConfig>(input).unwrap();

        // Then
        assert_eq!(expected_output, actual_output);
        assert_eq!(actual_output.exchange.as_str(), "weft");
        assert_eq!(actual_output.dlx.as_str(), "weft.dlx");
        assert!(actual_output.durable);
        assert_eq!(actual_output.prefetch, 16);
    }

    #[test]
    fn deserialize_from_full() {
        // Given
        let input = r#"
handle:
  host: broker.internal
  port: 5671
exchange_name: agents
dlx_name: agents.dead
durable: false
prefetch: 64
"#;

        // When
        let actual_output = serde_yml::from_str::<AmqpConfig>(input).unwrap();

        // Then
        assert_eq!(
            actual_output.handle.identifier(),
            "guest@broker.internal:5671/%2F",
        );
        assert_eq!(actual_output.exchange.as_str(), "agents");
        assert_eq!(actual_output.dlx.as_str(), "agents.dead");
        assert!(!actual_output.durable);
        assert_eq!(actual_output.prefetch, 64);
    }
}
