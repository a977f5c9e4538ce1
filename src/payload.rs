//! ==============================================================================
//! payload.rs - the 8-byte radio message
//! ==============================================================================
//!
//! ```text
//! purpose:
//!     every frame exchanged between a sensor node and the gateway is one
//!     `Payload`: four little-endian u16 fields, no padding, no checksum
//!     (the transceiver's CRC is the only integrity check).
//!
//!     offset  field     meaning
//!     ------  --------  ------------------------------------------------
//!     0..2    id        originating node (or, for ACK, the node acked)
//!     2..4    type      measurement kind, see `MeasurementType`
//!     4..6    value     reading; 0 for ACK
//!     6..8    uuid_ish  correlation tag of the reading; 0 for ACK
//!
//! relationships:
//!     - used by: node.rs (builds readings, recognizes ACKs)
//!     - used by: gateway.rs (decodes readings, builds ACKs)
//!     - uuid_ish feeds: dedup.rs
//! ```
//!
//! ==============================================================================

use thiserror::Error;

/// Encoded size of a `Payload` on the wire.
pub const PAYLOAD_LEN: usize = 8;

/// Node identity, fixed per node at build/config time.
pub type NodeId = u16;

/// Correlation tag shared by every retransmitted copy of one reading.
pub type Tag = u16;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    #[error("unexpected message length, expected {expected}, but was {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Measurement kind carried in the `type` field.
///
/// Codes are positional (TEMPERATURE=0, MOISTURE=1, ACK=2). Codes this side
/// does not know survive a decode/encode cycle as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementType {
    Temperature,
    Moisture,
    Ack,
    Unknown(u16),
}

impl MeasurementType {
    pub fn code(self) -> u16 {
        match self {
            MeasurementType::Temperature => 0,
            MeasurementType::Moisture => 1,
            MeasurementType::Ack => 2,
            MeasurementType::Unknown(code) => code,
        }
    }
}

impl From<u16> for MeasurementType {
    fn from(code: u16) -> Self {
        match code {
            0 => MeasurementType::Temperature,
            1 => MeasurementType::Moisture,
            2 => MeasurementType::Ack,
            other => MeasurementType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    pub id: NodeId,
    pub kind: MeasurementType,
    pub value: u16,
    pub uuid_ish: Tag,
}

impl Payload {
    pub fn reading(id: NodeId, kind: MeasurementType, value: u16, uuid_ish: Tag) -> Self {
        Self { id, kind, value, uuid_ish }
    }

    /// Acknowledgment addressed to `id`. ACKs carry no value and no tag.
    pub fn ack(id: NodeId) -> Self {
        Self { id, kind: MeasurementType::Ack, value: 0, uuid_ish: 0 }
    }

    pub fn is_ack_for(&self, id: NodeId) -> bool {
        self.kind == MeasurementType::Ack && self.id == id
    }

    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut buf = [0u8; PAYLOAD_LEN];
        buf[0..2].copy_from_slice(&self.id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.kind.code().to_le_bytes());
        buf[4..6].copy_from_slice(&self.value.to_le_bytes());
        buf[6..8].copy_from_slice(&self.uuid_ish.to_le_bytes());
        buf
    }

    /// Decode a received frame. Anything but exactly `PAYLOAD_LEN` bytes is
    /// rejected without looking at the contents.
    pub fn decode(frame: &[u8]) -> Result<Self, PayloadError> {
        let bytes: &[u8; PAYLOAD_LEN] = frame.try_into().map_err(|_| PayloadError::LengthMismatch {
            expected: PAYLOAD_LEN,
            actual: frame.len(),
        })?;

        let field = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        Ok(Self {
            id: field(0),
            kind: MeasurementType::from(field(2)),
            value: field(4),
            uuid_ish: field(6),
        })
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_fields_in_order_little_endian() {
        let p = Payload::reading(7, MeasurementType::Moisture, 724, 0xBEEF);
        assert_eq!(p.encode(), [7, 0, 1, 0, 0xD4, 0x02, 0xEF, 0xBE]);
    }

    #[test]
    fn round_trips_edge_values_in_every_field() {
        const EDGES: [u16; 5] = [0, 1, 0x7FFF, 0x8000, 0xFFFF];
        for id in EDGES {
            for code in EDGES {
                for value in EDGES {
                    for tag in EDGES {
                        let p = Payload::reading(id, MeasurementType::from(code), value, tag);
                        let frame = p.encode();
                        assert_eq!(frame[2..4], code.to_le_bytes());
                        assert_eq!(Payload::decode(&frame), Ok(p));
                    }
                }
            }
        }
    }

    #[test]
    fn known_codes_decode_to_named_kinds() {
        assert_eq!(MeasurementType::from(0), MeasurementType::Temperature);
        assert_eq!(MeasurementType::from(1), MeasurementType::Moisture);
        assert_eq!(MeasurementType::from(2), MeasurementType::Ack);
        assert_eq!(MeasurementType::from(9), MeasurementType::Unknown(9));
        assert_eq!(MeasurementType::Unknown(9).code(), 9);
    }

    #[test]
    fn rejects_every_other_length() {
        let big = [0xAAu8; 64];
        for len in (0..=64).filter(|&l| l != PAYLOAD_LEN) {
            assert_eq!(
                Payload::decode(&big[..len]),
                Err(PayloadError::LengthMismatch { expected: PAYLOAD_LEN, actual: len })
            );
        }
    }

    #[test]
    fn ack_matches_only_its_node() {
        let ack = Payload::ack(7);
        assert_eq!(ack.value, 0);
        assert!(ack.is_ack_for(7));
        assert!(!ack.is_ack_for(8));
        assert!(!Payload::reading(7, MeasurementType::Moisture, 0, 0).is_ack_for(7));
    }
}
