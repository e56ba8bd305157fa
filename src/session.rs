//! Gateway session orchestration
//!
//! A session owns one browser-facing endpoint and one backend
//! connection for its whole lifetime. It drives the backend handshake
//! once, publishes the resulting capability block to the browser, then
//! cedes control to the relay pump until either side disconnects.

use crate::client::SieveClient;
use crate::config::Account;
use crate::error::Result;
use crate::relay::{RelayEndpoint, RelayOutcome, RelayPump};
use tracing::{debug, info};

/// One browser-to-backend gateway session.
pub struct GatewaySession<W> {
    account: Account,
    browser: W,
}

impl<W: RelayEndpoint> GatewaySession<W> {
    pub const fn new(account: Account, browser: W) -> Self {
        Self { account, browser }
    }

    /// Run the session to completion.
    ///
    /// A handshake failure never transitions to relay mode: both
    /// endpoints are closed before the error propagates, and no
    /// partial protocol bytes reach the browser.
    ///
    /// # Errors
    ///
    /// Returns the handshake error when connect, STARTTLS,
    /// authentication, or the capability publication fails. The relay
    /// phase itself never fails; its end is reported in the outcome.
    pub async fn run(mut self) -> Result<RelayOutcome> {
        let mut backend = match self.handshake().await {
            Ok(backend) => backend,
            Err(e) => {
                self.browser.close().await;
                return Err(e);
            }
        };

        // First message to the browser: the post-upgrade capability
        // block, byte for byte as the backend sent it.
        debug!("publishing backend capabilities to browser");
        if let Err(e) = self.browser.send(backend.capability_block()).await {
            backend.close().await;
            self.browser.close().await;
            return Err(e.into());
        }

        Ok(RelayPump::new(self.browser, backend).run().await)
    }

    /// Connect and handshake with the backend. Closes the backend
    /// connection on any failure past connect.
    async fn handshake(&self) -> Result<SieveClient> {
        let mut backend = SieveClient::connect(&self.account).await?;

        match self.negotiate(&mut backend).await {
            Ok(()) => Ok(backend),
            Err(e) => {
                backend.close().await;
                Err(e)
            }
        }
    }

    /// The backend link is always secured; authentication happens only
    /// for proxy-auth accounts (otherwise the browser-side client
    /// authenticates through the relay itself).
    async fn negotiate(&self, backend: &mut SieveClient) -> Result<()> {
        backend.start_tls().await?;

        if self.account.proxy_auth {
            let (login, password, authzid) = self.account.credentials()?;
            info!(login, "performing proxy authentication");
            backend.authenticate(login, password, authzid).await?;
        }

        Ok(())
    }
}
