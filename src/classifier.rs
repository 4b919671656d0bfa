//! Transport failure classification
//!
//! Maps a raw [`TransportStatus`] onto exactly one [`ClientError`] variant.
//! Rules are checked in order and the first match wins.
//!
//! The cluster codes travel as short bracketed tokens inside the status
//! description. Client and server must agree on the literal token text, so the
//! tokens below must not change.

use tonic::Code;

use crate::connection::TransportStatus;
use crate::types::ClientError;

pub const REPLICA_NOT_PRIMARY_CODE: &str = "[RPL01]";
pub const TOKEN_CREDENTIAL_INVALID_CODE: &str = "[CLS08]";
pub const PASSWORD_CREDENTIAL_EXPIRED_CODE: &str = "[CLS10]";

/// Printed by the transport when the server resets the stream while shutting down
pub const RST_STREAM_MARKER: &str = "Received Rst Stream";

pub fn classify(status: &TransportStatus) -> ClientError {
    if is_unimplemented_method(status) {
        ClientError::MethodUnavailable(status.description().unwrap_or_default().to_string())
    } else if is_rst_stream(status) {
        ClientError::ConnectionLost(status.message())
    } else if is_replica_not_primary(status) {
        ClientError::ReplicaNotPrimary
    } else if is_token_credential_invalid(status) {
        ClientError::CredentialInvalid
    } else if is_password_credential_expired(status) {
        ClientError::CredentialExpired
    } else {
        ClientError::Unclassified(status.description().unwrap_or_default().to_string())
    }
}

fn is_unimplemented_method(status: &TransportStatus) -> bool {
    status.code() == Code::Unimplemented
}

fn is_rst_stream(status: &TransportStatus) -> bool {
    matches!(status.code(), Code::Unavailable | Code::Unknown)
        || status.message().contains(RST_STREAM_MARKER)
}

fn is_replica_not_primary(status: &TransportStatus) -> bool {
    status.code() == Code::Internal && description_contains(status, REPLICA_NOT_PRIMARY_CODE)
}

fn is_token_credential_invalid(status: &TransportStatus) -> bool {
    status.code() == Code::Unauthenticated && description_contains(status, TOKEN_CREDENTIAL_INVALID_CODE)
}

fn is_password_credential_expired(status: &TransportStatus) -> bool {
    status.code() == Code::Unauthenticated
        && description_contains(status, PASSWORD_CREDENTIAL_EXPIRED_CODE)
}

fn description_contains(status: &TransportStatus, token: &str) -> bool {
    status.description().is_some_and(|d| d.contains(token))
}
