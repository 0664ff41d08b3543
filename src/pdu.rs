use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::addr::{Addr, SeqId};
use crate::config::LinkConfig;
use crate::link::ack_vector::AckVector;


/// Wire-level discriminant of a PDU.
#[derive(Debug, Clone, Copy, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PduType {
    Message = 0,
    Repeat = 1,
    AckChanged = 2,
}

/// The protocol data unit - the single value embedded in one advertised identifier.
///
/// Every variant carries the full ack vector snapshot of whoever advertises it; that snapshot
///  is the sole vehicle for acknowledgement and gap propagation. `AckChanged` is anonymous on
///  the wire - it gossips updated acknowledgement state without identifying its sender.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Pdu {
    Message {
        from: Addr,
        to: Addr,
        seq: SeqId,
        ack: AckVector,
        payload: Bytes,
    },
    Repeat {
        from: Addr,
        to: Addr,
        seq: SeqId,
        /// the node relaying this message - not necessarily its original sender
        repeater: Addr,
        ack: AckVector,
        payload: Bytes,
    },
    AckChanged {
        ack: AckVector,
    },
}

impl Pdu {
    pub fn pdu_type(&self) -> PduType {
        match self {
            Pdu::Message { .. } => PduType::Message,
            Pdu::Repeat { .. } => PduType::Repeat,
            Pdu::AckChanged { .. } => PduType::AckChanged,
        }
    }

    pub fn ack(&self) -> &AckVector {
        match self {
            Pdu::Message { ack, .. } => ack,
            Pdu::Repeat { ack, .. } => ack,
            Pdu::AckChanged { ack } => ack,
        }
    }
}


#[derive(Debug, Clone, Copy, Eq, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed PDU")]
    Malformed,
    #[error("unknown PDU type {0}")]
    UnknownType(u8),
}


/// Codec between [Pdu] values and the short identifier string that the discovery transport
///  advertises. Byte layout: session tag, type, one ack byte per address slot, then the
///  type-specific fields with a length-prefixed payload.
///
/// The identifier is a string, not a byte buffer, so each encoded byte is mapped to the char
///  with the same code point (`U+0000..U+00FF`) - lossless in both directions, and any char
///  outside that range marks the identifier as foreign.
#[derive(Debug, Clone)]
pub struct PduCodec {
    session_tag: u8,
    max_peers: usize,
    max_len: usize,
}

impl PduCodec {
    pub fn new(config: &LinkConfig) -> PduCodec {
        PduCodec {
            session_tag: config.session_tag,
            max_peers: config.max_peers,
            max_len: config.max_advertisement_len,
        }
    }

    pub fn session_tag(&self) -> u8 {
        self.session_tag
    }

    /// The biggest payload that is guaranteed to fit under the length cap even when the message
    ///  is later re-advertised as a REPEAT (which adds the repeater byte to the header).
    pub fn max_payload_len(&self) -> usize {
        let repeat_header = 2 + self.max_peers + 3 + 1 + 1;
        std::cmp::min(self.max_len - repeat_header, u8::MAX as usize)
    }

    pub fn encode(&self, pdu: &Pdu) -> anyhow::Result<String> {
        if pdu.ack().num_slots() != self.max_peers {
            bail!("ack vector has {} slots, codec is configured for {}", pdu.ack().num_slots(), self.max_peers);
        }

        let mut buf = BytesMut::new();
        buf.put_u8(self.session_tag);
        buf.put_u8(pdu.pdu_type().into());
        buf.put_slice(pdu.ack().as_slice());

        match pdu {
            Pdu::Message { from, to, seq, payload, .. } => {
                buf.put_u8(seq.0);
                buf.put_u8(from.0);
                buf.put_u8(to.0);
                Self::put_payload(&mut buf, payload)?;
            }
            Pdu::Repeat { from, to, seq, repeater, payload, .. } => {
                buf.put_u8(seq.0);
                buf.put_u8(from.0);
                buf.put_u8(to.0);
                buf.put_u8(repeater.0);
                Self::put_payload(&mut buf, payload)?;
            }
            Pdu::AckChanged { .. } => {}
        }

        if buf.len() > self.max_len {
            bail!("encoded PDU has {} bytes, exceeding the advertisement length cap of {}", buf.len(), self.max_len);
        }

        Ok(buf.iter().map(|&b| char::from(b)).collect())
    }

    fn put_payload(buf: &mut BytesMut, payload: &Bytes) -> anyhow::Result<()> {
        if payload.len() > u8::MAX as usize {
            bail!("payload of {} bytes exceeds the one-byte length prefix", payload.len());
        }
        buf.put_u8(payload.len() as u8);
        buf.put_slice(payload);
        Ok(())
    }

    pub fn decode(&self, raw: &str) -> Result<Pdu, DecodeError> {
        let bytes = Self::identifier_to_bytes(raw).ok_or(DecodeError::Malformed)?;
        if bytes.len() > self.max_len {
            return Err(DecodeError::Malformed);
        }

        let buf = &mut &bytes[..];

        let session_tag = buf.try_get_u8().map_err(|_| DecodeError::Malformed)?;
        if session_tag != self.session_tag {
            return Err(DecodeError::Malformed);
        }

        let type_byte = buf.try_get_u8().map_err(|_| DecodeError::Malformed)?;
        let pdu_type = PduType::try_from(type_byte).map_err(|_| DecodeError::UnknownType(type_byte))?;

        if buf.remaining() < self.max_peers {
            return Err(DecodeError::Malformed);
        }
        let ack = AckVector::from_slice(&buf[..self.max_peers]);
        buf.advance(self.max_peers);

        let pdu = match pdu_type {
            PduType::AckChanged => Pdu::AckChanged { ack },
            PduType::Message => {
                let seq = SeqId(buf.try_get_u8().map_err(|_| DecodeError::Malformed)?);
                let from = Addr(buf.try_get_u8().map_err(|_| DecodeError::Malformed)?);
                let to = Addr(buf.try_get_u8().map_err(|_| DecodeError::Malformed)?);
                let payload = Self::get_payload(buf)?;
                Pdu::Message { from, to, seq, ack, payload }
            }
            PduType::Repeat => {
                let seq = SeqId(buf.try_get_u8().map_err(|_| DecodeError::Malformed)?);
                let from = Addr(buf.try_get_u8().map_err(|_| DecodeError::Malformed)?);
                let to = Addr(buf.try_get_u8().map_err(|_| DecodeError::Malformed)?);
                let repeater = Addr(buf.try_get_u8().map_err(|_| DecodeError::Malformed)?);
                let payload = Self::get_payload(buf)?;
                Pdu::Repeat { from, to, seq, repeater, ack, payload }
            }
        };

        if buf.has_remaining() {
            return Err(DecodeError::Malformed);
        }
        Ok(pdu)
    }

    fn get_payload(buf: &mut &[u8]) -> Result<Bytes, DecodeError> {
        let len = buf.try_get_u8().map_err(|_| DecodeError::Malformed)? as usize;
        if buf.remaining() < len {
            return Err(DecodeError::Malformed);
        }
        let payload = Bytes::copy_from_slice(&buf[..len]);
        buf.advance(len);
        Ok(payload)
    }

    /// Cheap pre-check that lets a caller discard foreign-session traffic without a full decode.
    ///  Must never panic, whatever the input - scan results routinely contain arbitrary device
    ///  names from unrelated hardware.
    pub fn is_valid_pdu(raw: &str, session_tag: u8) -> bool {
        let mut chars = raw.chars();
        let tag = match chars.next() {
            Some(c) => c as u32,
            None => return false,
        };
        if tag != session_tag as u32 {
            return false;
        }
        match chars.next() {
            Some(c) if c as u32 <= u8::MAX as u32 => PduType::try_from(c as u8).is_ok(),
            _ => false,
        }
    }

    fn identifier_to_bytes(raw: &str) -> Option<Vec<u8>> {
        raw.chars()
            .map(|c| u8::try_from(c as u32).ok())
            .collect()
    }
}


#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    fn test_codec() -> PduCodec {
        let mut config = LinkConfig::new(0x5A, Addr(1));
        config.max_peers = 4;
        PduCodec::new(&config)
    }

    fn message_pdu() -> Pdu {
        Pdu::Message {
            from: Addr(1),
            to: Addr::BROADCAST,
            seq: SeqId(1),
            ack: AckVector::from_slice(&[1, 0, 0, 0]),
            payload: Bytes::from_static(b"hi"),
        }
    }

    #[rstest]
    #[case::message(message_pdu())]
    #[case::message_empty_payload(Pdu::Message {
        from: Addr(2), to: Addr(3), seq: SeqId(200),
        ack: AckVector::from_slice(&[9, 200, 0, 255]),
        payload: Bytes::new(),
    })]
    #[case::repeat(Pdu::Repeat {
        from: Addr(2), to: Addr::BROADCAST, seq: SeqId(7), repeater: Addr(4),
        ack: AckVector::from_slice(&[3, 7, 0, 1]),
        payload: Bytes::from_static(b"again"),
    })]
    #[case::ack_changed(Pdu::AckChanged { ack: AckVector::from_slice(&[0, 0, 4, 0]) })]
    fn test_round_trip(#[case] pdu: Pdu) {
        let codec = test_codec();
        let raw = codec.encode(&pdu).unwrap();
        assert!(raw.len() <= 248);
        assert_eq!(codec.decode(&raw).unwrap(), pdu);
    }

    #[test]
    fn test_encode_wire_layout() {
        let raw = test_codec().encode(&message_pdu()).unwrap();
        let bytes = raw.chars().map(|c| c as u32 as u8).collect::<Vec<_>>();
        assert_eq!(bytes, vec![
            0x5A,             // session tag
            0,                // type MESSAGE
            1, 0, 0, 0,       // ack vector
            1,                // sequence id
            1,                // from
            0,                // to (broadcast)
            2, b'h', b'i',    // length-prefixed payload
        ]);
    }

    #[rstest]
    #[case::empty("")]
    #[case::truncated_header("\u{5A}")]
    #[case::wrong_session_tag("\u{5B}\u{0}\u{1}\u{0}\u{0}\u{0}")]
    #[case::truncated_ack_vector("\u{5A}\u{2}\u{1}\u{0}")]
    #[case::truncated_message_fields("\u{5A}\u{0}\u{1}\u{0}\u{0}\u{0}\u{1}")]
    #[case::payload_shorter_than_prefix("\u{5A}\u{0}\u{1}\u{0}\u{0}\u{0}\u{1}\u{1}\u{0}\u{5}ab")]
    #[case::trailing_garbage("\u{5A}\u{2}\u{1}\u{0}\u{0}\u{0}xyz")]
    #[case::non_latin1_char("\u{5A}\u{2}\u{1}\u{0}\u{0}\u{394}")]
    fn test_decode_malformed(#[case] raw: &str) {
        assert_eq!(test_codec().decode(raw), Err(DecodeError::Malformed));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(test_codec().decode("\u{5A}\u{9}\u{0}\u{0}\u{0}\u{0}"), Err(DecodeError::UnknownType(9)));
    }

    #[test]
    fn test_decode_oversized() {
        let mut config = LinkConfig::new(0x5A, Addr(1));
        config.max_peers = 4;
        config.max_advertisement_len = 30;
        let codec = PduCodec::new(&config);

        let mut raw = String::from("\u{5A}\u{0}\u{0}\u{0}\u{0}\u{0}\u{1}\u{1}\u{0}\u{19}");
        raw.extend(std::iter::repeat('x').take(25));
        assert_eq!(codec.decode(&raw), Err(DecodeError::Malformed));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut config = LinkConfig::new(0x5A, Addr(1));
        config.max_peers = 4;
        let codec = PduCodec::new(&config);

        let payload = Bytes::from(vec![0u8; codec.max_payload_len() + 1]);
        let pdu = Pdu::Message {
            from: Addr(1),
            to: Addr::BROADCAST,
            seq: SeqId(1),
            ack: AckVector::new(4),
            payload,
        };
        assert!(codec.encode(&pdu).is_err());
    }

    #[test]
    fn test_encode_rejects_mismatched_ack_vector() {
        let pdu = Pdu::AckChanged { ack: AckVector::new(7) };
        assert!(test_codec().encode(&pdu).is_err());
    }

    #[rstest]
    #[case::valid_message("\u{5A}\u{0}rest-does-not-matter", true)]
    #[case::valid_ack_changed("\u{5A}\u{2}", true)]
    #[case::empty("", false)]
    #[case::only_tag("\u{5A}", false)]
    #[case::foreign_session("\u{5B}\u{0}\u{1}", false)]
    #[case::unknown_type("\u{5A}\u{3}", false)]
    #[case::arbitrary_device_name("Fitness Tracker 3000", false)]
    #[case::wide_chars("Δロボット", false)]
    fn test_is_valid_pdu(#[case] raw: &str, #[case] expected: bool) {
        assert_eq!(PduCodec::is_valid_pdu(raw, 0x5A), expected);
    }
}
