//! Message <-> frame codec.
//!
//! Frames are bincode with fixed-width integers. Deserialization is bounded
//! so a hostile frame cannot force a large allocation.

use bincode::Options;
use peerlink_types::Message;

use crate::error::Result;

/// Largest payload a message may carry.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Deserialization limit: payload plus envelope overhead.
pub const MAX_FRAME_SIZE: u64 = (MAX_PAYLOAD_SIZE as u64) + 4096;

pub trait MessageCodec: Send + Sync {
    fn encode(&self, message: &Message) -> Result<Vec<u8>>;
    fn decode(&self, frame: &[u8]) -> Result<Message>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_FRAME_SIZE)
        .with_fixint_encoding()
}

impl MessageCodec for BincodeCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        Ok(bincode_options().serialize(message)?)
    }

    fn decode(&self, frame: &[u8]) -> Result<Message> {
        Ok(bincode_options().deserialize(frame)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use peerlink_types::Command;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn frame_carries_routing_fields() {
        let mut message = Message::request(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Command::new("ECHO"),
            b"payload".to_vec(),
            Duration::from_secs(30),
        );
        message.previous_hop = Some(Uuid::new_v4());
        message.next_hop = Some(Uuid::new_v4());

        let frame = BincodeCodec.encode(&message).unwrap();
        let decoded = BincodeCodec.decode(&frame).unwrap();
        assert_eq!(decoded.previous_hop, message.previous_hop);
        assert_eq!(decoded.next_hop, message.next_hop);
        assert_eq!(decoded.time_to_live, message.time_to_live);
        assert_eq!(decoded.handler, None);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = BincodeCodec.decode(&[0xff, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, NetworkError::Codec(_)));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let message = Message::request(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Command::new("ECHO"),
            vec![0; 16],
            Duration::from_secs(1),
        );
        let mut frame = BincodeCodec.encode(&message).unwrap();
        // payload length field follows the fixed-size header fields
        let tail = frame.len() - 16 - 8;
        frame[tail..tail + 8].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(BincodeCodec.decode(&frame).is_err());
    }
}
