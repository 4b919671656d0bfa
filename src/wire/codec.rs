//! MessagePack framing for wire envelopes

use serde::{de::DeserializeOwned, Serialize};

use crate::types::Result;

/// Encode a message with named fields so both sides tolerate field reordering
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(message)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, Options, SessionType};
    use crate::wire::{Request, RequestEnvelope, ResponseEnvelope, StreamTarget, WireStatus};
    use uuid::Uuid;

    #[test]
    fn test_request_envelope_survives_framing() {
        let envelope = RequestEnvelope {
            id: Uuid::new_v4(),
            target: StreamTarget::Connection,
            payload: Request::SessionOpen {
                database: "social".into(),
                session_type: SessionType::Data,
                options: Options::new().infer(true),
            },
        };

        let bytes = encode(&envelope).unwrap();
        let decoded: RequestEnvelope = decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_error_body_decodes() {
        let id = Uuid::new_v4();
        let envelope = ResponseEnvelope::err(
            id,
            WireStatus { code: 13, description: "[RPL01] not primary".into() },
        );
        let decoded: ResponseEnvelope = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded.id, id);
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_garbage_is_unclassified() {
        let err = decode::<ResponseEnvelope>(&[0xc1, 0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unclassified);
    }
}
