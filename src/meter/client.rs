use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Request timed out")]
    Timeout,
    #[error("Serial link failure: {0}")]
    Link(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Password rejected by meter")]
    AuthRejected,
}

impl ClientError {
    /// Link errors void the rest of the cycle; everything else is scoped to
    /// the request that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::Link(_))
    }
}

/// Capability interface over the IEC 62056-21 transport. The session
/// orchestrator only talks to this trait, so the serial implementation can
/// be swapped for a scripted double in tests.
#[async_trait]
pub trait MeterClient: Send {
    /// Opens the serial transport.
    async fn open(&mut self) -> Result<(), ClientError>;

    /// Performs the wake/identification handshake and enters programming
    /// mode. Returns the meter's raw identification line.
    async fn handshake(&mut self) -> Result<String, ClientError>;

    /// Sends the administrative password.
    async fn authenticate(&mut self, password: &str) -> Result<(), ClientError>;

    /// Reads value(s) at `address`, optionally with an argument to the
    /// parameter's address.
    async fn request(
        &mut self,
        address: &str,
        additional_data: Option<&str>,
    ) -> Result<Vec<String>, ClientError>;

    /// Sends the session break sequence and releases the transport.
    async fn close(&mut self) -> Result<(), ClientError>;
}
