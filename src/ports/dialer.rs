//! Dialer port - Opens one broker connection per call.
//!
//! The connection manager owns the retry policy; a dialer only knows how to
//! make a single attempt.

use async_trait::async_trait;

use crate::domain::foundation::DialError;

/// Factory for broker connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// What a successful dial yields (a connection plus its channel).
    type Connection: Send;

    /// Make one connection attempt.
    async fn dial(&self) -> Result<Self::Connection, DialError>;

    /// Endpoint description for logs. Must not include credentials.
    fn endpoint(&self) -> String;
}
