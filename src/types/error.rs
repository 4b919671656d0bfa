//! Error types for the TypeDB client
//!
//! Every failure a caller can observe is one of a closed set of kinds.
//! Raw transport failures are turned into these kinds by [`crate::classifier`].

use std::fmt;

/// Semantic classification of a client failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionLost,
    MethodUnavailable,
    ReplicaNotPrimary,
    CredentialInvalid,
    CredentialExpired,
    ConnectionNotValidated,
    IllegalState,
    Unclassified,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionLost => "ConnectionLost",
            Self::MethodUnavailable => "MethodUnavailable",
            Self::ReplicaNotPrimary => "ReplicaNotPrimary",
            Self::CredentialInvalid => "CredentialInvalid",
            Self::CredentialExpired => "CredentialExpired",
            Self::ConnectionNotValidated => "ConnectionNotValidated",
            Self::IllegalState => "IllegalState",
            Self::Unclassified => "Unclassified",
        };
        f.write_str(name)
    }
}

/// Main error type for client operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Unable to connect to TypeDB server: {0}")]
    ConnectionLost(String),

    #[error("The server does not support this method, please check the client-server compatibility: {0}")]
    MethodUnavailable(String),

    #[error("The replica is not the primary replica.")]
    ReplicaNotPrimary,

    #[error("Invalid token credential.")]
    CredentialInvalid,

    #[error("Password credential expired.")]
    CredentialExpired,

    #[error("The client connection has not been validated.")]
    ConnectionNotValidated,

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("{0}")]
    Unclassified(String),
}

impl ClientError {
    /// The semantic kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionLost(_) => ErrorKind::ConnectionLost,
            Self::MethodUnavailable(_) => ErrorKind::MethodUnavailable,
            Self::ReplicaNotPrimary => ErrorKind::ReplicaNotPrimary,
            Self::CredentialInvalid => ErrorKind::CredentialInvalid,
            Self::CredentialExpired => ErrorKind::CredentialExpired,
            Self::ConnectionNotValidated => ErrorKind::ConnectionNotValidated,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::Unclassified(_) => ErrorKind::Unclassified,
        }
    }

    pub(crate) fn transaction_closed() -> Self {
        Self::IllegalState("The transaction has been closed and no further operation is allowed.".into())
    }

    pub(crate) fn session_closed() -> Self {
        Self::IllegalState("The session has been closed and no further operation is allowed.".into())
    }

    pub(crate) fn client_closed() -> Self {
        Self::IllegalState("The client has been closed and no further operation is allowed.".into())
    }

    pub(crate) fn missing_response(expected: &str) -> Self {
        Self::Unclassified(format!("Unexpected response from server, expected {expected}."))
    }
}

impl From<rmp_serde::encode::Error> for ClientError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Unclassified(format!("Failed to encode request: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for ClientError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Unclassified(format!("Failed to decode response: {}", err))
    }
}

/// Result type alias for client operations
pub type Result<T = ()> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(ClientError::ReplicaNotPrimary.kind(), ErrorKind::ReplicaNotPrimary);
        assert_eq!(
            ClientError::transaction_closed().kind(),
            ErrorKind::IllegalState
        );
        assert_eq!(
            ClientError::ConnectionLost("gone".into()).kind(),
            ErrorKind::ConnectionLost
        );
    }

    #[test]
    fn test_unclassified_keeps_raw_description() {
        let err = ClientError::Unclassified("[TYR03] something odd".into());
        assert_eq!(err.to_string(), "[TYR03] something odd");
    }
}
