//! ManageSieve command responses
//!
//! Every handshake command (`STARTTLS`, `AUTHENTICATE`) is answered by
//! a single status line of the form `OK <message>`, `NO <message>` or
//! `BYE <message>`.

use crate::error::{Error, Result};
use std::fmt;

/// Response status token (RFC 5804 section 1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command completed successfully.
    Ok,
    /// Command failed.
    No,
    /// Server is closing the connection.
    Bye,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bye => "BYE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed single-line command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: Status,
    pub message: String,
}

impl HandshakeResponse {
    /// Parse a response line into status and free-text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the first token is not one of
    /// `OK`, `NO` or `BYE`.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let (token, message) = trimmed.split_once(' ').unwrap_or((trimmed, ""));

        let status = match token {
            "OK" => Status::Ok,
            "NO" => Status::No,
            "BYE" => Status::Bye,
            other => {
                return Err(Error::Protocol(format!(
                    "unrecognized response status: {other:?}"
                )));
            }
        };

        Ok(Self {
            status,
            message: message.to_string(),
        })
    }
}

impl fmt::Display for HandshakeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.status)
        } else {
            write!(f, "{} {}", self.status, self.message)
        }
    }
}
