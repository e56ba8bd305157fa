//! TCP listener, TLS setup, and the fake ManageSieve state machine
//!
//! # How the ManageSieve handshake works
//!
//! ManageSieve (RFC 5804) opens with the *server* talking first: a
//! block of quoted capability lines terminated by an `OK` status line.
//! The client then upgrades with `STARTTLS`, after which the server
//! re-announces its capabilities over the secured stream (the SASL
//! mechanism list may only appear here -- some servers refuse to
//! offer authentication on a plaintext connection). The client
//! authenticates with a single `AUTHENTICATE "PLAIN" "<base64>"` line
//! and gets one `OK`/`NO` back.
//!
//! After authentication this fake server simply echoes every received
//! chunk, which is exactly what the gateway's relay phase needs for
//! round-trip assertions. Every line the server reads is recorded and
//! exposed through [`FakeSieveServer::received`], so tests can assert
//! not only on responses but on which bytes ever reached the wire.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// What the fake server advertises and accepts.
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Advertise `"STARTTLS"` in the plaintext greeting.
    pub offer_starttls: bool,
    /// SASL mechanism list announced after the TLS upgrade;
    /// `None` omits the `"SASL"` capability entirely.
    pub post_tls_sasl: Option<&'static str>,
    /// Terminate each greeting with an `OK` status line, as compliant
    /// servers do. Disable to exercise quiescence-based greeting
    /// framing in the client.
    pub terminate_greeting: bool,
    /// The one accepted login.
    pub username: &'static str,
    pub password: &'static str,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            offer_starttls: true,
            post_tls_sasl: Some("PLAIN"),
            terminate_greeting: true,
            username: "alice",
            password: "secret",
        }
    }
}

impl Behavior {
    /// The exact plaintext greeting this behavior produces.
    pub fn plaintext_greeting(&self) -> String {
        let mut greeting = String::from("\"IMPLEMENTATION\" \"Fake ManageSieve\"\r\n");
        if self.offer_starttls {
            greeting.push_str("\"STARTTLS\"\r\n");
        }
        if self.terminate_greeting {
            greeting.push_str("OK \"Fake server ready.\"\r\n");
        }
        greeting
    }

    /// The exact greeting this behavior produces after the TLS
    /// upgrade. Tests assert verbatim forwarding against these bytes.
    pub fn post_tls_greeting(&self) -> String {
        let mut greeting = String::from("\"IMPLEMENTATION\" \"Fake ManageSieve\"\r\n");
        if let Some(mechanisms) = self.post_tls_sasl {
            greeting.push_str(&format!("\"SASL\" \"{mechanisms}\"\r\n"));
        }
        if self.terminate_greeting {
            greeting.push_str("OK \"TLS negotiation done.\"\r\n");
        }
        greeting
    }
}

/// A fake ManageSieve server on localhost with an OS-assigned port.
pub struct FakeSieveServer {
    port: u16,
    /// Every line read from clients, in arrival order.
    received: Arc<Mutex<Vec<String>>>,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeSieveServer {
    /// Start a server with the given behavior.
    ///
    /// Binds to `127.0.0.1:0`, generates a self-signed certificate via
    /// `rcgen`, and spawns an accept loop that runs the ManageSieve
    /// state machine per connection. The server runs until dropped.
    pub async fn start(behavior: Behavior) -> Self {
        // Multiple tests may race to install the process-wide crypto
        // provider; ignore the error if it is already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let received = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&received);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let behavior = behavior.clone();
                let record = Arc::clone(&record);
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, behavior, &record).await;
                });
            }
        });

        Self {
            port,
            received,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Every line received from clients so far (trimmed).
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

/// Run the ManageSieve lifecycle for one connection.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    behavior: Behavior,
    received: &Mutex<Vec<String>>,
) {
    // Phase 1: plaintext greeting. The server talks first.
    let mut reader = BufReader::new(stream);
    if write_all(&mut reader, behavior.plaintext_greeting().as_bytes())
        .await
        .is_err()
    {
        return;
    }

    // Phase 2: expect STARTTLS, then upgrade.
    let mut line = String::new();
    if reader.read_line(&mut line).await.is_err() {
        return;
    }
    received.lock().unwrap().push(line.trim().to_string());
    if line.trim() != "STARTTLS" {
        let _ = write_all(&mut reader, b"NO \"Expected STARTTLS.\"\r\n").await;
        return;
    }
    if write_all(&mut reader, b"OK \"Begin TLS negotiation now.\"\r\n")
        .await
        .is_err()
    {
        return;
    }

    let tcp = reader.into_inner();
    let Ok(tls_stream) = acceptor.accept(tcp).await else {
        return;
    };

    // Phase 3: post-upgrade greeting over the secured stream.
    let mut reader = BufReader::new(tls_stream);
    if write_all(&mut reader, behavior.post_tls_greeting().as_bytes())
        .await
        .is_err()
    {
        return;
    }

    // Phase 4: AUTHENTICATE (if the client sends one), then echo
    // everything -- the relay phase sees the backend as a mirror.
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        received.lock().unwrap().push(line.trim().to_string());

        if let Some(rest) = line.trim().strip_prefix("AUTHENTICATE \"PLAIN\" \"") {
            let response = check_credentials(rest.trim_end_matches('"'), &behavior);
            if write_all(&mut reader, response).await.is_err() {
                break;
            }
        } else if write_all(&mut reader, line.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Decode a SASL PLAIN initial response and match it against the one
/// accepted login.
fn check_credentials(encoded: &str, behavior: &Behavior) -> &'static [u8] {
    let Ok(payload) = BASE64.decode(encoded) else {
        return b"NO \"Invalid base64.\"\r\n";
    };

    let parts: Vec<&[u8]> = payload.split(|&b| b == 0).collect();
    let [_authzid, authcid, password] = parts.as_slice() else {
        return b"NO \"Malformed PLAIN response.\"\r\n";
    };

    if *authcid == behavior.username.as_bytes() && *password == behavior.password.as_bytes() {
        b"OK \"Authenticated.\"\r\n"
    } else {
        b"NO \"Authentication failed.\"\r\n"
    }
}

/// Write and flush through a `BufReader`-wrapped stream.
async fn write_all<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut BufReader<S>,
    data: &[u8],
) -> std::io::Result<()> {
    stream.get_mut().write_all(data).await?;
    stream.get_mut().flush().await
}
