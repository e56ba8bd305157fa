//! WebSocket gateway for the ManageSieve protocol
//!
//! Lets a browser-based client manage Sieve mail-filtering scripts on
//! a server speaking ManageSieve (RFC 5804) -- a protocol browsers
//! cannot speak natively because it needs a raw TCP connection with an
//! in-band STARTTLS upgrade and SASL authentication.
//!
//! The gateway terminates a WebSocket connection from the browser,
//! opens a companion TCP connection to the backend, performs the
//! handshake on the browser's behalf, forwards the capability
//! announcement, and then relays opaque bytes in both directions for
//! the rest of the session.

mod capability;
mod client;
mod config;
mod error;
mod relay;
mod response;
mod session;
mod tls;
mod ws;

pub use capability::{CapabilityMap, SASL, STARTTLS};
pub use client::SieveClient;
pub use config::{Account, GatewayConfig, WS_PATH_PREFIX, account_id_from_path};
pub use error::{Error, Result};
pub use relay::{RelayEndpoint, RelayOutcome, RelayPump};
pub use response::{HandshakeResponse, Status};
pub use session::GatewaySession;
pub use ws::WsEndpoint;
