//! Bidirectional byte relay between the browser and the backend
//!
//! After the handshake the gateway has no protocol awareness left: it
//! copies opaque chunks browser->backend and backend->browser until
//! either side closes or fails. Backpressure is delegated to the
//! underlying transports; a slow peer simply blocks the pump on send.

use std::io;
use tracing::{debug, error, info};

/// A full-duplex byte endpoint the relay can service.
///
/// `recv` returning an empty buffer signals an orderly close by the
/// peer. Implementations must keep `recv` cancel-safe: the pump races
/// both endpoints and drops the losing future on every wake.
#[allow(async_fn_in_trait)]
pub trait RelayEndpoint {
    /// Receive one chunk. Empty means the peer closed the stream.
    async fn recv(&mut self) -> io::Result<Vec<u8>>;

    /// Send one chunk, blocking until the transport accepts it.
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Close the endpoint. Must be idempotent.
    async fn close(&mut self);
}

/// How a relay session ended.
///
/// Endpoint failures during the relay phase are ordinary termination
/// paths, not errors to propagate; they are reported here and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The browser side closed the stream.
    BrowserClosed,
    /// The backend side closed the stream.
    BackendClosed,
    /// The browser side failed while receiving or sending.
    BrowserError,
    /// The backend side failed while receiving or sending.
    BackendError,
}

impl RelayOutcome {
    /// Whether the session ended with an orderly close.
    #[must_use]
    pub const fn is_orderly(self) -> bool {
        matches!(self, Self::BrowserClosed | Self::BackendClosed)
    }
}

/// The steady-state copy loop between two connected endpoints.
pub struct RelayPump<B, S> {
    browser: B,
    backend: S,
}

impl<B: RelayEndpoint, S: RelayEndpoint> RelayPump<B, S> {
    pub const fn new(browser: B, backend: S) -> Self {
        Self { browser, backend }
    }

    /// Run the relay until either side terminates.
    ///
    /// Both endpoints are closed before this returns, whichever side
    /// triggered the termination.
    pub async fn run(mut self) -> RelayOutcome {
        let outcome = self.pump().await;

        self.browser.close().await;
        self.backend.close().await;

        if outcome.is_orderly() {
            info!(?outcome, "relay session ended");
        } else {
            error!(?outcome, "relay session ended abnormally");
        }

        outcome
    }

    /// One `select!` wait per iteration, servicing exactly one read
    /// from whichever endpoint became ready. Not draining an endpoint
    /// keeps the two directions fair with each other.
    async fn pump(&mut self) -> RelayOutcome {
        let mut to_backend = 0u64;
        let mut to_browser = 0u64;

        let outcome = loop {
            tokio::select! {
                chunk = self.browser.recv() => match chunk {
                    Ok(data) if data.is_empty() => break RelayOutcome::BrowserClosed,
                    Ok(data) => {
                        to_backend += data.len() as u64;
                        if let Err(e) = self.backend.send(&data).await {
                            error!("backend send failed: {e}");
                            break RelayOutcome::BackendError;
                        }
                    }
                    Err(e) => {
                        error!("browser receive failed: {e}");
                        break RelayOutcome::BrowserError;
                    }
                },
                chunk = self.backend.recv() => match chunk {
                    Ok(data) if data.is_empty() => break RelayOutcome::BackendClosed,
                    Ok(data) => {
                        to_browser += data.len() as u64;
                        if let Err(e) = self.browser.send(&data).await {
                            error!("browser send failed: {e}");
                            break RelayOutcome::BrowserError;
                        }
                    }
                    Err(e) => {
                        error!("backend receive failed: {e}");
                        break RelayOutcome::BackendError;
                    }
                },
            }
        };

        debug!(to_backend, to_browser, "relay byte counts");
        outcome
    }
}
