//! Raw transport failure as reported by a channel or stream

use std::fmt;
use tonic::Code;

use crate::wire::WireStatus;

/// Transport-level failure before classification.
///
/// Carries the status code and the server's human-readable description,
/// which may embed a bracketed error code such as `[RPL01]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportStatus {
    code: Code,
    description: Option<String>,
}

impl TransportStatus {
    pub fn new(code: Code, description: impl Into<String>) -> Self {
        Self { code, description: Some(description.into()) }
    }

    pub fn without_description(code: Code) -> Self {
        Self { code, description: None }
    }

    pub fn unavailable(description: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, description)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Full status message in the `CODE: description` form transports print
    pub fn message(&self) -> String {
        match &self.description {
            Some(description) => format!("{:?}: {}", self.code, description),
            None => format!("{:?}", self.code),
        }
    }

    pub fn to_wire(&self) -> WireStatus {
        WireStatus {
            code: self.code as i32,
            description: self.description.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl From<WireStatus> for TransportStatus {
    fn from(status: WireStatus) -> Self {
        let description = if status.description.is_empty() {
            None
        } else {
            Some(status.description)
        };
        Self { code: Code::from_i32(status.code), description }
    }
}

impl From<tonic::Status> for TransportStatus {
    fn from(status: tonic::Status) -> Self {
        let description = if status.message().is_empty() {
            None
        } else {
            Some(status.message().to_string())
        };
        Self { code: status.code(), description }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportStatus {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::unavailable(format!("WebSocket error: {}", err))
    }
}
