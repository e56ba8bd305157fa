//! ManageSieve backend client and handshake engine
//!
//! [`SieveClient`] owns the one TCP connection to the backend and
//! drives the RFC 5804 client handshake: read the capability greeting,
//! upgrade with STARTTLS, authenticate with SASL PLAIN. After the
//! handshake it degrades on purpose to a raw byte pipe for the relay
//! phase.

use crate::capability::{CapabilityMap, SASL, STARTTLS};
use crate::config::Account;
use crate::error::{Error, Result};
use crate::relay::RelayEndpoint;
use crate::response::{HandshakeResponse, Status};
use crate::tls;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rustls::pki_types::ServerName;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Applies to connect and to each individual handshake read. The
/// relay phase has no timeout; sessions persist until a side closes.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(6);

/// Quiescence window for greeting reads: once some of the greeting has
/// arrived, a pause this long with no terminating status line ends the
/// block.
const GREETING_GRACE: Duration = Duration::from_millis(200);

/// Upper bound on a capability greeting.
const MAX_GREETING: usize = 1024 * 1024;

/// Read buffer size for greeting and relay reads.
const READ_CHUNK: usize = 64 * 1024;

/// The one live transport to the backend. The STARTTLS upgrade
/// consumes the plain variant and produces the TLS variant, so two
/// transports can never coexist.
enum Transport {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf).await,
            Self::Tls(s) => s.read(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Plain(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            Self::Tls(s) => {
                s.write_all(data).await?;
                s.flush().await
            }
        }
    }

    async fn shutdown(&mut self) {
        let result = match self {
            Self::Plain(s) => s.shutdown().await,
            Self::Tls(s) => s.shutdown().await,
        };
        if let Err(e) = result {
            debug!("backend shutdown: {e}");
        }
    }
}

/// Client connection to a ManageSieve backend.
pub struct SieveClient {
    host: String,
    accept_invalid_certs: bool,
    transport: Option<Transport>,
    capabilities: CapabilityMap,
}

impl SieveClient {
    /// Connect to the backend and read the capability greeting.
    ///
    /// The TCP connect and the greeting read are both bounded by the
    /// fixed 6-second handshake timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] on socket failure or timeout.
    pub async fn connect(account: &Account) -> Result<Self> {
        let addr = format!("{}:{}", account.host, account.port);
        debug!("connecting to ManageSieve backend at {addr}");

        let stream = timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Connection(format!("connect to {addr} timed out")))?
            .map_err(|e| Error::Connection(format!("connect to {addr} failed: {e}")))?;

        let mut client = Self {
            host: account.host.clone(),
            accept_invalid_certs: account.accept_invalid_certs,
            transport: Some(Transport::Plain(stream)),
            capabilities: CapabilityMap::default(),
        };

        let greeting = client.read_capability_block().await?;
        client.capabilities = CapabilityMap::parse(&greeting);
        info!(
            capabilities = client.capabilities.len(),
            "connected to ManageSieve backend"
        );

        Ok(client)
    }

    /// The current capability snapshot.
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    /// The most recent capability block, byte for byte as received.
    /// This is what the gateway forwards to the browser.
    #[must_use]
    pub fn capability_block(&self) -> &[u8] {
        self.capabilities.raw()
    }

    /// Upgrade the connection with STARTTLS.
    ///
    /// Replaces the plain transport with a TLS one, re-reads the
    /// post-upgrade greeting, and verifies the server now offers SASL
    /// PLAIN (some servers advertise an empty SASL list before TLS).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] without sending any bytes when the
    /// server did not advertise STARTTLS or the connection is already
    /// upgraded; [`Error::Protocol`] when the server refuses the
    /// upgrade or drops SASL PLAIN; [`Error::Tls`] when the TLS
    /// handshake itself fails.
    pub async fn start_tls(&mut self) -> Result<()> {
        if matches!(self.transport, Some(Transport::Tls(_))) {
            return Err(Error::Protocol("STARTTLS already negotiated".into()));
        }
        if !self.capabilities.has(STARTTLS) {
            return Err(Error::Protocol("STARTTLS not supported".into()));
        }

        debug!("securing backend connection with STARTTLS");
        self.send(b"STARTTLS\r\n").await?;

        let line = self.read_response_line().await?;
        let response = HandshakeResponse::parse(&line)?;
        if response.status != Status::Ok {
            return Err(Error::Protocol(format!(
                "STARTTLS refused: {}",
                response.message
            )));
        }

        let Some(Transport::Plain(stream)) = self.transport.take() else {
            return Err(Error::Protocol("no live transport for upgrade".into()));
        };

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| Error::Tls(format!("invalid server name: {e}")))?;
        let connector = tls::connector(self.accept_invalid_certs);
        let tls_stream = timeout(HANDSHAKE_TIMEOUT, connector.connect(server_name, stream))
            .await
            .map_err(|_| Error::Tls("TLS handshake timed out".into()))?
            .map_err(|e| Error::Tls(e.to_string()))?;
        self.transport = Some(Transport::Tls(Box::new(tls_stream)));

        // The server re-announces its capabilities over the secured
        // stream; the old snapshot is stale.
        let greeting = self.read_capability_block().await?;
        self.capabilities = CapabilityMap::parse(&greeting);
        info!("backend connection upgraded to TLS");

        if !self.capabilities.has(SASL) {
            return Err(Error::Protocol("SASL not supported".into()));
        }
        if !self.capabilities.mechanism_supported("PLAIN") {
            return Err(Error::Protocol("SASL PLAIN not supported".into()));
        }

        Ok(())
    }

    /// Authenticate with SASL PLAIN.
    ///
    /// The capability snapshot supports one authentication exchange;
    /// a second call without an intervening re-parse (i.e. without a
    /// STARTTLS renegotiation) fails before touching the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] without sending any bytes when
    /// PLAIN is unavailable or already consumed;
    /// [`Error::Authentication`] when the server answers non-OK.
    pub async fn authenticate(
        &mut self,
        login: &str,
        password: &str,
        authorization_id: &str,
    ) -> Result<()> {
        if self.capabilities.authentication_disabled() {
            return Err(Error::Protocol(
                "authentication already performed for this capability snapshot".into(),
            ));
        }
        if !self.capabilities.mechanism_supported("PLAIN") {
            return Err(Error::Protocol("SASL PLAIN not supported".into()));
        }

        // Identities only. The password and the encoded payload stay
        // out of the logs.
        debug!(authorization_id, login, "authenticating with SASL PLAIN");

        let encoded = BASE64.encode(plain_payload(authorization_id, login, password));
        let command = format!("AUTHENTICATE \"PLAIN\" \"{encoded}\"\r\n");
        self.send(command.as_bytes()).await?;

        let line = self.read_response_line().await?;
        let response = HandshakeResponse::parse(&line)?;
        if response.status != Status::Ok {
            return Err(Error::Authentication(response.message));
        }

        self.capabilities.disable_authentication();
        info!(login, "authenticated against backend");
        Ok(())
    }

    /// Send raw bytes to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the connection is closed,
    /// [`Error::Io`] on transport failure.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Connection("connection closed".into()))?;
        transport.write_all(data).await?;
        Ok(())
    }

    /// Receive one chunk of raw bytes from the backend.
    ///
    /// An empty buffer signals an orderly close by the backend. No
    /// timeout applies; this is the relay-phase read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] when the connection is closed,
    /// [`Error::Io`] on transport failure.
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Connection("connection closed".into()))?;

        let mut buf = vec![0u8; READ_CHUNK];
        let n = transport.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Close the connection. Idempotent; safe to call whether or not
    /// the handshake ever completed.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
    }

    /// Read a capability block.
    ///
    /// RFC 5804 gives the greeting no explicit length prefix. The
    /// framing rule here: accumulate reads until a complete
    /// `OK`/`NO`/`BYE` status line has arrived (compliant servers
    /// always send one), falling back to a short quiescence window for
    /// servers that do not. The first read is bounded by the handshake
    /// timeout and the whole block by [`MAX_GREETING`].
    async fn read_capability_block(&mut self) -> Result<Vec<u8>> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Connection("connection closed".into()))?;

        let mut block = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let wait = if block.is_empty() {
                HANDSHAKE_TIMEOUT
            } else {
                GREETING_GRACE
            };

            match timeout(wait, transport.read(&mut buf)).await {
                Err(_) if block.is_empty() => {
                    return Err(Error::Connection(
                        "timed out waiting for capability greeting".into(),
                    ));
                }
                // Quiescence: the server has said all it is going to.
                Err(_) => break,
                Ok(Ok(0)) if block.is_empty() => {
                    return Err(Error::Connection(
                        "connection closed before capability greeting".into(),
                    ));
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    block.extend_from_slice(&buf[..n]);
                    if block.len() > MAX_GREETING {
                        return Err(Error::Protocol("capability greeting too large".into()));
                    }
                    if block_complete(&block) {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        Ok(block)
    }

    /// Read a single CRLF-terminated response line, bounded by the
    /// handshake timeout.
    ///
    /// Reads byte by byte so nothing past the line terminator is
    /// consumed: after the STARTTLS `OK` the very next bytes on the
    /// wire belong to the TLS handshake.
    async fn read_response_line(&mut self) -> Result<String> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::Connection("connection closed".into()))?;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            let n = timeout(HANDSHAKE_TIMEOUT, transport.read(&mut byte))
                .await
                .map_err(|_| Error::Connection("timed out reading handshake response".into()))?
                .map_err(Error::Io)?;

            if n == 0 {
                return Err(Error::Connection(
                    "connection closed during handshake".into(),
                ));
            }

            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
            if line.len() > READ_CHUNK {
                return Err(Error::Protocol("handshake response line too long".into()));
            }
        }

        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

impl RelayEndpoint for SieveClient {
    async fn recv(&mut self) -> io::Result<Vec<u8>> {
        self.receive().await.map_err(io::Error::other)
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        Self::send(self, data).await.map_err(io::Error::other)
    }

    async fn close(&mut self) {
        Self::close(self).await;
    }
}

/// SASL PLAIN initial response before base64 encoding:
/// `authzid NUL authcid NUL password` (RFC 4616).
pub(crate) fn plain_payload(authzid: &str, authcid: &str, password: &str) -> Vec<u8> {
    format!("{authzid}\0{authcid}\0{password}").into_bytes()
}

/// Whether the accumulated greeting contains a complete (newline
/// terminated) `OK`/`NO`/`BYE` status line.
fn block_complete(block: &[u8]) -> bool {
    let text = String::from_utf8_lossy(block);
    text.split_inclusive('\n')
        .filter(|line| line.ends_with('\n'))
        .any(|line| {
            let token = line.split_whitespace().next().unwrap_or("");
            matches!(token, "OK" | "NO" | "BYE")
        })
}
