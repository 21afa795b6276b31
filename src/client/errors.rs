//! Client error types and result handling.
//!
//! This module defines the error types reported by the socket client
//! and the droppable future wrapper returned by its operations.

use std::future::Future;
use std::future::IntoFuture;

use thiserror::Error;

/// A wrapper around futures that can be polled to get results.
///
/// This is a regular future which you can poll to get result,
/// but it's totally fine to drop it if you don't need results.
/// The operation itself starts when the method is called.
///
/// # Example
///
/// ```rust
/// use tokio_pully::client::SocketClient;
/// use tokio_pully::config::Config;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///     let config = Config::new().with_server_url("http://localhost:3000");
///     let client = SocketClient::new(&config)?;
///
///     // nothing is awaited, the connection attempt runs in the background
///     let _ = client.connect();
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct FutureResult<T>(pub(crate) T);

impl<T, R> IntoFuture for FutureResult<T>
where
    T: Future<Output = R>,
{
    type Output = R;
    type IntoFuture = T;

    fn into_future(self) -> Self::IntoFuture {
        self.0
    }
}

/// Outcome of a connection attempt as seen by `connect` futures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The attempt failed; the client keeps reconnecting in the background
    #[error("connection attempt failed")]
    Failed,
    /// The server refused the namespace connection, no reconnect is made
    #[error("connection rejected by server: {0}")]
    Rejected(String),
    /// `disconnect` was called before the connection was established
    #[error("client disconnected")]
    Disconnected,
}

/// Failure of an acknowledged emit.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    #[error("acknowledgement timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
}

impl From<tokio::time::error::Elapsed> for EmitError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        EmitError::Timeout
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for EmitError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        EmitError::Closed
    }
}
