use anyhow::Result;
use quacktor_process::message::WireMessage;

/// Turns messages into the bytes carried by the message connection and back.
///
/// Every machine of a mesh has to use the same encoder.
pub trait MessageEncoder: Send + Sync {
    fn encode(&self, message: &WireMessage) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<WireMessage>;
}

/// MessagePack, the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct MsgpackEncoder;

impl MessageEncoder for MsgpackEncoder {
    fn encode(&self, message: &WireMessage) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(message)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<WireMessage> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoder;

impl MessageEncoder for JsonEncoder {
    fn encode(&self, message: &WireMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<WireMessage> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use quacktor_process::{message::MessageTypes, Message, Pid};
    use serde_json::json;

    use super::*;

    fn check(encoder: &dyn MessageEncoder) {
        let types = MessageTypes::default();
        let nested = Message::generic(json!({"name": "quack", "sizes": [1, 2, 3], "ok": true}));
        let bytes = encoder.encode(&nested.to_wire().unwrap()).unwrap();
        match types.decode(encoder.decode(&bytes).unwrap()).unwrap() {
            Message::Generic(value) => assert_eq!(value["sizes"][2], 3),
            other => panic!("Unexpected message {other:?}"),
        }

        let down = Message::down(Pid::new("machine", "id"));
        let bytes = encoder.encode(&down.to_wire().unwrap()).unwrap();
        assert!(matches!(
            types.decode(encoder.decode(&bytes).unwrap()).unwrap(),
            Message::Down { who } if who == Pid::new("machine", "id")
        ));
    }

    #[test]
    fn msgpack_keeps_structure() {
        check(&MsgpackEncoder);
    }

    #[test]
    fn json_keeps_structure() {
        check(&JsonEncoder);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(MsgpackEncoder.decode(&[0xc1, 0x00]).is_err());
        assert!(JsonEncoder.decode(b"{not json").is_err());
    }
}
