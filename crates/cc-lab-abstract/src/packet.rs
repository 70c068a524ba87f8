use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Datagram opcodes understood by senders and the receiver collaborator.
pub mod opcode {
    pub const HANDSHAKE: u8 = 0x01;
    pub const DATA: u8 = 0x02;
    pub const ACK: u8 = 0x03;
}

/// opcode + u64 sequence base
pub const HANDSHAKE_LEN: usize = 9;
/// opcode + u64 seq + u64 timestamp, filler follows
pub const DATA_HEADER_LEN: usize = 17;
/// opcode + u64 seq + u64 echoed timestamp
pub const ACK_LEN: usize = 17;
/// Largest datagram either side ever produces.
pub const MAX_DATAGRAM_LEN: usize = 1500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("truncated {kind} message: expected {expected} bytes, got {actual}")]
    Truncated {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// A single datagram exchanged between a sender and the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Control message. The sender proposes a base (usually 0), the receiver
    /// answers with the base it assigned.
    Handshake { seq_base: u64 },
    /// Payload carrying a sequence number, the sender-side send time and
    /// `filler_len` zero bytes of payload.
    Data {
        seq: u64,
        timestamp_us: u64,
        filler_len: usize,
    },
    /// Acknowledgement of `seq`, echoing the timestamp of the data packet
    /// that triggered it.
    Ack { seq: u64, echoed_timestamp_us: u64 },
}

impl Message {
    pub fn handshake(seq_base: u64) -> Self {
        Message::Handshake { seq_base }
    }

    pub fn data(seq: u64, timestamp_us: u64, filler_len: usize) -> Self {
        let filler_len = filler_len.min(MAX_DATAGRAM_LEN - DATA_HEADER_LEN);
        Message::Data {
            seq,
            timestamp_us,
            filler_len,
        }
    }

    pub fn ack(seq: u64, echoed_timestamp_us: u64) -> Self {
        Message::Ack {
            seq,
            echoed_timestamp_us,
        }
    }

    /// Number of bytes `encode` produces.
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::Handshake { .. } => HANDSHAKE_LEN,
            Message::Data { filler_len, .. } => DATA_HEADER_LEN + filler_len,
            Message::Ack { .. } => ACK_LEN,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Message::Handshake { seq_base } => {
                buf.put_u8(opcode::HANDSHAKE);
                buf.put_u64(*seq_base);
            }
            Message::Data {
                seq,
                timestamp_us,
                filler_len,
            } => {
                buf.put_u8(opcode::DATA);
                buf.put_u64(*seq);
                buf.put_u64(*timestamp_us);
                buf.put_bytes(0, *filler_len);
            }
            Message::Ack {
                seq,
                echoed_timestamp_us,
            } => {
                buf.put_u8(opcode::ACK);
                buf.put_u64(*seq);
                buf.put_u64(*echoed_timestamp_us);
            }
        }
    }

    pub fn decode(mut datagram: &[u8]) -> Result<Self, WireError> {
        let actual = datagram.len();
        if datagram.is_empty() {
            return Err(WireError::Empty);
        }
        let op = datagram.get_u8();
        match op {
            opcode::HANDSHAKE => {
                ensure_len("handshake", HANDSHAKE_LEN, actual)?;
                Ok(Message::Handshake {
                    seq_base: datagram.get_u64(),
                })
            }
            opcode::DATA => {
                ensure_len("data", DATA_HEADER_LEN, actual)?;
                let seq = datagram.get_u64();
                let timestamp_us = datagram.get_u64();
                Ok(Message::Data {
                    seq,
                    timestamp_us,
                    filler_len: datagram.remaining(),
                })
            }
            opcode::ACK => {
                ensure_len("ack", ACK_LEN, actual)?;
                Ok(Message::Ack {
                    seq: datagram.get_u64(),
                    echoed_timestamp_us: datagram.get_u64(),
                })
            }
            other => Err(WireError::UnknownOpcode(other)),
        }
    }
}

fn ensure_len(kind: &'static str, expected: usize, actual: usize) -> Result<(), WireError> {
    if actual < expected {
        return Err(WireError::Truncated {
            kind,
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_packet_carries_filler() {
        let encoded = Message::data(42, 1_000, 63).encode();
        assert_eq!(encoded.len(), DATA_HEADER_LEN + 63);
        assert_eq!(encoded[0], opcode::DATA);
        assert_eq!(
            Message::decode(&encoded).unwrap(),
            Message::Data {
                seq: 42,
                timestamp_us: 1_000,
                filler_len: 63
            }
        );
    }

    #[test]
    fn filler_is_capped_to_one_datagram() {
        let msg = Message::data(1, 1, 10_000);
        assert_eq!(msg.encoded_len(), MAX_DATAGRAM_LEN);
    }

    #[test]
    fn rejects_malformed_datagrams() {
        assert_eq!(Message::decode(&[]), Err(WireError::Empty));
        assert_eq!(Message::decode(&[0x7f, 0, 0]), Err(WireError::UnknownOpcode(0x7f)));
        assert_eq!(
            Message::decode(&[opcode::ACK, 0, 0, 0]),
            Err(WireError::Truncated {
                kind: "ack",
                expected: ACK_LEN,
                actual: 4
            })
        );
        assert!(matches!(
            Message::decode(&[opcode::HANDSHAKE, 1]),
            Err(WireError::Truncated { kind: "handshake", .. })
        ));
    }

    #[test]
    fn ack_is_big_endian() {
        let encoded = Message::ack(0x0102, 7).encode();
        assert_eq!(&encoded[..ACK_LEN], &[3, 0, 0, 0, 0, 0, 0, 1, 2, 0, 0, 0, 0, 0, 0, 0, 7]);
    }
}
