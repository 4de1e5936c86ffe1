//! Broker connection establishment with bounded, fixed-delay retry.
//!
//! ```text
//! attempt 1 ──fail──> warn, sleep ──> attempt 2 ──fail──> ... ──> attempt N ──fail──> ConnectionError
//!     │                                   │                           │
//!     └──ok──> Session                    └──ok──> Session            └──ok──> Session
//! ```
//!
//! The caller's task is suspended for the whole backoff. Only
//! [`DialError::Unreachable`] is retried; a refused login fails at once.

use std::time::Duration;

use async_trait::async_trait;
use lapin::protocol::{AMQPErrorKind, AMQPHardError, AMQPSoftError};
use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{debug, error, info, warn};

use crate::config::RabbitMqConfig;
use crate::domain::foundation::{ConnectionError, DialError};
use crate::ports::Dialer;

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Fixed-delay retry budget for connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy; at least one attempt is always made.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Policy from the broker settings (5 attempts, 5 seconds apart by default).
    pub fn from_config(config: &RabbitMqConfig) -> Self {
        Self::new(config.connect_max_attempts, config.connect_retry_delay())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5))
    }
}

/// Opens broker connections, retrying unreachable brokers per [`RetryPolicy`].
pub struct ConnectionManager<D: Dialer> {
    dialer: D,
    policy: RetryPolicy,
}

impl ConnectionManager<LapinDialer> {
    /// Connection manager for the configured RabbitMQ broker.
    pub fn from_config(config: &RabbitMqConfig) -> Self {
        Self::new(LapinDialer::from_config(config), RetryPolicy::from_config(config))
    }
}

impl<D: Dialer> ConnectionManager<D> {
    /// Create a connection manager around any dialer.
    pub fn new(dialer: D, policy: RetryPolicy) -> Self {
        Self { dialer, policy }
    }

    /// The underlying dialer, for single-shot reconnects after startup.
    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Connect, retrying until the attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` carrying the number of attempts made and the
    /// last failure. Callers treat this as fatal.
    pub async fn connect(&self) -> Result<D::Connection, ConnectionError> {
        let endpoint = self.dialer.endpoint();
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.dialer.dial().await {
                Ok(connection) => {
                    info!(endpoint = %endpoint, attempt, "Connected to RabbitMQ");
                    return Ok(connection);
                }
                Err(cause) if cause.is_retryable() && attempt < max_attempts => {
                    warn!(
                        endpoint = %endpoint,
                        attempt,
                        max_attempts,
                        retry_in_secs = self.policy.delay.as_secs(),
                        error = %cause,
                        "Failed to connect to RabbitMQ, retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(cause) => {
                    error!(
                        endpoint = %endpoint,
                        attempt,
                        max_attempts,
                        error = %cause,
                        "Failed to connect to RabbitMQ"
                    );
                    return Err(ConnectionError {
                        attempts: attempt,
                        cause,
                    });
                }
            }
        }
    }
}

/// An open connection with one channel on it.
///
/// Owned by exactly one component; the channel is never shared without a lock.
pub struct Session {
    connection: Connection,
    channel: Channel,
}

impl Session {
    /// The session's channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Close the channel, then the connection. Failures are only logged;
    /// the broker drops both when the socket goes away.
    pub async fn close(self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "Bye").await {
            debug!(error = %e, "Channel close failed");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "Bye").await {
            debug!(error = %e, "Connection close failed");
        }
    }
}

/// Dials RabbitMQ with `lapin`.
#[derive(Clone)]
pub struct LapinDialer {
    uri: AMQPUri,
    endpoint: String,
    connection_name: String,
}

impl LapinDialer {
    /// Dialer for the configured broker.
    pub fn from_config(config: &RabbitMqConfig) -> Self {
        Self {
            uri: config.amqp_uri(),
            endpoint: config.endpoint(),
            connection_name: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

#[async_trait]
impl Dialer for LapinDialer {
    type Connection = Session;

    async fn dial(&self) -> Result<Session, DialError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(self.connection_name.clone().into());

        let connection = Connection::connect_uri(self.uri.clone(), properties)
            .await
            .map_err(classify)?;
        let channel = connection.create_channel().await.map_err(classify)?;

        Ok(Session {
            connection,
            channel,
        })
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// Map a lapin failure to retryable / not retryable.
fn classify(err: lapin::Error) -> DialError {
    if is_refusal(&err) {
        DialError::Refused(err.to_string())
    } else {
        DialError::Unreachable(err.to_string())
    }
}

/// Bad credentials (403) or a vhost we may not open (530).
fn is_refusal(err: &lapin::Error) -> bool {
    match err {
        lapin::Error::ProtocolError(e) => matches!(
            e.kind(),
            AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED)
                | AMQPErrorKind::Hard(AMQPHardError::NOTALLOWED)
        ),
        _ => false,
    }
}
