//! Fake ManageSieve server for integration testing
//!
//! An in-process server that speaks enough RFC 5804 to exercise the
//! gateway's full backend lifecycle:
//!
//! TCP -> capability greeting -> STARTTLS -> TLS handshake ->
//! post-upgrade greeting -> AUTHENTICATE -> byte echo (relay phase)
//!
//! The TLS certificate is generated at startup with `rcgen`, so no
//! cert files are needed. [`Behavior`] controls which capabilities the
//! server advertises and which credentials it accepts, letting tests
//! drive every failure branch of the handshake.

mod server;

pub use server::{Behavior, FakeSieveServer};
