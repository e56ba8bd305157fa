//! ManageSieve capability announcements
//!
//! A ManageSieve server announces its capabilities as a block of
//! newline-terminated lines immediately after the TCP connection is
//! established, and again after a successful STARTTLS upgrade:
//!
//! ```text
//! "IMPLEMENTATION" "Dovecot Pigeonhole"
//! "SASL" "PLAIN LOGIN"
//! "STARTTLS"
//! OK "Dovecot ready."
//! ```
//!
//! Each line is either a bare quoted token or a quoted token followed
//! by a quoted value. [`CapabilityMap`] parses such a block and keeps
//! the raw bytes around so the gateway can forward them to the browser
//! untouched.

use std::collections::HashMap;
use tracing::warn;

/// The capability token advertising STARTTLS support.
pub const STARTTLS: &str = "\"STARTTLS\"";

/// The capability token carrying the SASL mechanism list.
pub const SASL: &str = "\"SASL\"";

/// Parsed capability announcement from a ManageSieve server.
///
/// Keys are the exact quoted tokens as received (`"STARTTLS"`, not
/// `STARTTLS`); values, where present, likewise retain their quotes.
/// Re-parsing after STARTTLS fully replaces the previous map.
#[derive(Debug, Default, Clone)]
pub struct CapabilityMap {
    entries: HashMap<String, Option<String>>,
    raw: Vec<u8>,
    auth_disabled: bool,
}

impl CapabilityMap {
    /// Parse a capability block as received from the server.
    ///
    /// Lines that are a recognized `OK`/`NO`/`BYE` status (the block
    /// terminator sent by real servers) are skipped. Lines that do not
    /// match the expected `"NAME"` or `"NAME" "value"` shape are
    /// skipped with a warning; a malformed line never fails the parse.
    #[must_use]
    pub fn parse(block: &[u8]) -> Self {
        let text = String::from_utf8_lossy(block);
        let mut entries = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || is_status_line(line) {
                continue;
            }

            match parse_line(line) {
                Some((token, value)) => {
                    entries.insert(token, value);
                }
                None => warn!("skipping malformed capability line: {line:?}"),
            }
        }

        Self {
            entries,
            raw: block.to_vec(),
            auth_disabled: false,
        }
    }

    /// Whether the given token was announced. Exact, case-sensitive
    /// match including the surrounding quotes (use [`STARTTLS`] /
    /// [`SASL`] for the well-known ones).
    #[must_use]
    pub fn has(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    /// The value associated with a token, quotes retained.
    #[must_use]
    pub fn value(&self, token: &str) -> Option<&str> {
        self.entries.get(token)?.as_deref()
    }

    /// Whether the `"SASL"` mechanism list contains `mech`.
    #[must_use]
    pub fn mechanism_supported(&self, mech: &str) -> bool {
        self.value(SASL)
            .map(|v| v.trim_matches('"'))
            .is_some_and(|list| list.split_whitespace().any(|m| m == mech))
    }

    /// Mark the SASL capability as consumed.
    ///
    /// A capability snapshot supports at most one authentication
    /// exchange; the flag is cleared only by re-parsing a fresh block.
    /// Enforcement lives in `SieveClient::authenticate`.
    pub fn disable_authentication(&mut self) {
        self.auth_disabled = true;
    }

    /// Whether authentication has been consumed for this snapshot.
    #[must_use]
    pub const fn authentication_disabled(&self) -> bool {
        self.auth_disabled
    }

    /// The capability block exactly as received, for forwarding to the
    /// browser-facing endpoint.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Number of parsed capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A line whose first token is a response status rather than a
/// capability. Such a line terminates the block.
fn is_status_line(line: &str) -> bool {
    let token = line.split_whitespace().next().unwrap_or("");
    matches!(token, "OK" | "NO" | "BYE")
}

/// Split one capability line into `(token, value)`.
///
/// Returns `None` when the line does not match the `"NAME"` or
/// `"NAME" "value"` shape.
fn parse_line(line: &str) -> Option<(String, Option<String>)> {
    if !line.starts_with('"') {
        return None;
    }

    let closing = line[1..].find('"')? + 1;
    let token = line[..=closing].to_string();
    let rest = line[closing + 1..].trim();

    if rest.is_empty() {
        return Some((token, None));
    }

    if rest.len() >= 2 && rest.starts_with('"') && rest.ends_with('"') {
        Some((token, Some(rest.to_string())))
    } else {
        None
    }
}
