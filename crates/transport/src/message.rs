use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::ProtocolDecodeError;

/// A control record with its discriminator split out and the remainder kept
/// opaque. Collaborators that own a richer schema can decode into their own
/// type instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: Value,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ControlMessage {
    pub fn kind_str(&self) -> Option<&str> {
        self.kind.as_str()
    }
}

pub fn decode_record<M: DeserializeOwned>(record: &[u8]) -> Result<M, ProtocolDecodeError> {
    Ok(serde_json::from_slice(record)?)
}

/// Receives every successfully decoded control record, in arrival order.
///
/// Called synchronously from the control receiver, so implementations should
/// hand work off rather than block.
pub trait Dispatch<M>: Send + Sync {
    fn dispatch(&self, message: M);
}

impl<M: Send> Dispatch<M> for mpsc::UnboundedSender<M> {
    fn dispatch(&self, message: M) {
        if self.send(message).is_err() {
            log::debug!("Dropping control message, dispatch receiver closed");
        }
    }
}

/// Adapts a closure into a [`Dispatch`] implementation.
pub struct FnDispatch<F>(pub F);

impl<M, F> Dispatch<M> for FnDispatch<F>
where
    F: Fn(M) + Send + Sync,
{
    fn dispatch(&self, message: M) {
        (self.0)(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_decodes_discriminator_and_body() {
        let message: ControlMessage =
            decode_record(br#"{"type":"X","Client":{"Name":"relay"},"Version":"2.1"}"#).unwrap();
        assert_eq!(message.kind_str(), Some("X"));
        assert_eq!(message.body.len(), 2);
        assert_eq!(message.body["Version"], Value::from("2.1"));
    }

    #[test]
    fn test_numeric_discriminator() {
        let message: ControlMessage = decode_record(br#"{"type":5}"#).unwrap();
        assert_eq!(message.kind, Value::from(5));
        assert_eq!(message.kind_str(), None);
    }

    #[test]
    fn test_rejects_invalid_json() {
        let result = decode_record::<ControlMessage>(b"{invalid");
        assert!(matches!(result, Err(ProtocolDecodeError::Json(_))));
    }

    #[test]
    fn test_rejects_record_without_discriminator() {
        let result = decode_record::<ControlMessage>(br#"{"Client":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_utf8() {
        let result = decode_record::<ControlMessage>(&[b'{', 0xff, 0xfe, b'}']);
        assert!(result.is_err());
    }

    #[test]
    fn test_fn_dispatch_forwards() {
        let seen = Mutex::new(Vec::new());
        let dispatch = FnDispatch(|message: ControlMessage| {
            seen.lock().unwrap().push(message.kind);
        });
        dispatch.dispatch(decode_record(br#"{"type":"A"}"#).unwrap());
        dispatch.dispatch(decode_record(br#"{"type":"B"}"#).unwrap());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Value::from("A"), Value::from("B")]
        );
    }

    #[test]
    fn test_channel_dispatch_survives_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel::<ControlMessage>();
        drop(rx);
        tx.dispatch(decode_record(br#"{"type":"A"}"#).unwrap());
    }
}
