//! Notification packet decoding for supported scales.
//!
//! # Atomax Skale II
//!
//! Notifications on [`SKALE_WEIGHT`](crema_types::uuid::SKALE_WEIGHT):
//!
//! | Byte | Meaning |
//! |------|---------|
//! | 0 | `0xCE` settled weight, `0xCA` changing weight, `0x0F` tare ack |
//! | 1-2 | weight, i16 LE, tenths of a gram |
//!
//! # Decent Scale
//!
//! Seven-byte packets on [`DECENT_READ`](crema_types::uuid::DECENT_READ):
//!
//! | Byte | Meaning |
//! |------|---------|
//! | 0 | `0x03` model byte |
//! | 1 | `0xCE`/`0xCA` weight, `0x0F` tare ack |
//! | 2-3 | weight, i16 BE, tenths of a gram |
//! | 4-5 | unused here |
//! | 6 | XOR of bytes 0-5 |

use bytes::Buf;
use uuid::Uuid;

use crema_types::uuid as uuids;
use crema_types::{ParseError, ParseResult, ScaleType};

const WEIGHT_SETTLED: u8 = 0xCE;
const WEIGHT_CHANGING: u8 = 0xCA;
const TARE_ACK: u8 = 0x0F;

const DECENT_MODEL: u8 = 0x03;
const DECENT_PACKET_LEN: usize = 7;

/// Decoded notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    /// Weight in grams.
    Weight(f64),
    /// The scale zeroed itself.
    Tare,
}

/// GATT layout and codec of a scale model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleProtocol {
    scale_type: ScaleType,
}

impl ScaleProtocol {
    /// Protocol for `scale_type`.
    pub fn for_type(scale_type: ScaleType) -> Self {
        Self { scale_type }
    }

    /// Primary service.
    pub fn service(&self) -> Uuid {
        match self.scale_type {
            ScaleType::AtomaxSkaleII => uuids::SKALE_SERVICE,
            ScaleType::DecentScale => uuids::DECENT_SERVICE,
            _ => unreachable!("unsupported scale type {:?}", self.scale_type),
        }
    }

    /// Characteristic that carries weight notifications.
    pub fn notify_characteristic(&self) -> Uuid {
        match self.scale_type {
            ScaleType::AtomaxSkaleII => uuids::SKALE_WEIGHT,
            ScaleType::DecentScale => uuids::DECENT_READ,
            _ => unreachable!("unsupported scale type {:?}", self.scale_type),
        }
    }

    /// Characteristic that accepts commands.
    pub fn command_characteristic(&self) -> Uuid {
        match self.scale_type {
            ScaleType::AtomaxSkaleII => uuids::SKALE_COMMAND,
            ScaleType::DecentScale => uuids::DECENT_WRITE,
            _ => unreachable!("unsupported scale type {:?}", self.scale_type),
        }
    }

    /// Commands to write after subscribing, in order.
    pub fn init_commands(&self) -> Vec<Vec<u8>> {
        match self.scale_type {
            // Display weight, then switch units to grams.
            ScaleType::AtomaxSkaleII => vec![vec![0xEC], vec![0x03]],
            ScaleType::DecentScale => Vec::new(),
            _ => unreachable!("unsupported scale type {:?}", self.scale_type),
        }
    }

    /// Decode one notification. `Ok(None)` for packets that carry nothing
    /// the processor uses (buttons, battery, timers).
    pub fn decode(&self, data: &[u8]) -> ParseResult<Option<Notification>> {
        match self.scale_type {
            ScaleType::AtomaxSkaleII => decode_skale(data),
            ScaleType::DecentScale => decode_decent(data),
            _ => unreachable!("unsupported scale type {:?}", self.scale_type),
        }
    }
}

fn decode_skale(data: &[u8]) -> ParseResult<Option<Notification>> {
    let mut buf = data;
    if buf.remaining() < 1 {
        return Err(ParseError::InsufficientBytes {
            expected: 1,
            actual: 0,
        });
    }
    match buf.get_u8() {
        WEIGHT_SETTLED | WEIGHT_CHANGING => {
            if buf.remaining() < 2 {
                return Err(ParseError::InsufficientBytes {
                    expected: 3,
                    actual: data.len(),
                });
            }
            Ok(Some(Notification::Weight(f64::from(buf.get_i16_le()) / 10.0)))
        }
        TARE_ACK => Ok(Some(Notification::Tare)),
        _ => Ok(None),
    }
}

fn decode_decent(data: &[u8]) -> ParseResult<Option<Notification>> {
    if data.len() < DECENT_PACKET_LEN {
        return Err(ParseError::InsufficientBytes {
            expected: DECENT_PACKET_LEN,
            actual: data.len(),
        });
    }
    let expected = data[..6].iter().fold(0u8, |acc, b| acc ^ b);
    if expected != data[6] {
        return Err(ParseError::Checksum {
            expected,
            actual: data[6],
        });
    }
    let mut buf = data;
    if buf.get_u8() != DECENT_MODEL {
        return Err(ParseError::InvalidValue(format!(
            "unexpected model byte 0x{:02X}",
            data[0]
        )));
    }
    match buf.get_u8() {
        WEIGHT_SETTLED | WEIGHT_CHANGING => {
            Ok(Some(Notification::Weight(f64::from(buf.get_i16()) / 10.0)))
        }
        TARE_ACK => Ok(Some(Notification::Tare)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decent_packet(kind: u8, payload: [u8; 4]) -> Vec<u8> {
        let mut p = vec![DECENT_MODEL, kind, payload[0], payload[1], payload[2], payload[3]];
        let xor = p.iter().fold(0u8, |acc, b| acc ^ b);
        p.push(xor);
        p
    }

    #[test]
    fn test_skale_weight() {
        let proto = ScaleProtocol::for_type(ScaleType::AtomaxSkaleII);
        // 1234 tenths = 123.4 g
        let n = proto.decode(&[0xCE, 0xD2, 0x04]).unwrap();
        assert_eq!(n, Some(Notification::Weight(123.4)));
    }

    #[test]
    fn test_skale_negative_weight() {
        let proto = ScaleProtocol::for_type(ScaleType::AtomaxSkaleII);
        let raw = (-25i16).to_le_bytes();
        let n = proto.decode(&[0xCA, raw[0], raw[1]]).unwrap();
        assert_eq!(n, Some(Notification::Weight(-2.5)));
    }

    #[test]
    fn test_skale_tare_and_other() {
        let proto = ScaleProtocol::for_type(ScaleType::AtomaxSkaleII);
        assert_eq!(proto.decode(&[0x0F]).unwrap(), Some(Notification::Tare));
        assert_eq!(proto.decode(&[0x31, 0x00]).unwrap(), None);
    }

    #[test]
    fn test_skale_short_packets() {
        let proto = ScaleProtocol::for_type(ScaleType::AtomaxSkaleII);
        assert!(proto.decode(&[]).is_err());
        assert_eq!(
            proto.decode(&[0xCE, 0x01]),
            Err(ParseError::InsufficientBytes {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_decent_weight() {
        let proto = ScaleProtocol::for_type(ScaleType::DecentScale);
        let w = 365i16.to_be_bytes();
        let packet = decent_packet(WEIGHT_SETTLED, [w[0], w[1], 0, 0]);
        assert_eq!(
            proto.decode(&packet).unwrap(),
            Some(Notification::Weight(36.5))
        );
    }

    #[test]
    fn test_decent_tare() {
        let proto = ScaleProtocol::for_type(ScaleType::DecentScale);
        let packet = decent_packet(TARE_ACK, [0, 0, 0, 0]);
        assert_eq!(proto.decode(&packet).unwrap(), Some(Notification::Tare));
    }

    #[test]
    fn test_decent_bad_checksum() {
        let proto = ScaleProtocol::for_type(ScaleType::DecentScale);
        let mut packet = decent_packet(WEIGHT_SETTLED, [0, 10, 0, 0]);
        packet[6] ^= 0xFF;
        assert!(matches!(
            proto.decode(&packet),
            Err(ParseError::Checksum { .. })
        ));
    }

    #[test]
    fn test_decent_short_packet() {
        let proto = ScaleProtocol::for_type(ScaleType::DecentScale);
        assert!(matches!(
            proto.decode(&[0x03, 0xCE, 0x00]),
            Err(ParseError::InsufficientBytes { expected: 7, actual: 3 })
        ));
    }

    #[test]
    fn test_gatt_layout() {
        let skale = ScaleProtocol::for_type(ScaleType::AtomaxSkaleII);
        assert_eq!(skale.notify_characteristic(), uuids::SKALE_WEIGHT);
        assert_eq!(skale.init_commands().len(), 2);

        let decent = ScaleProtocol::for_type(ScaleType::DecentScale);
        assert_eq!(decent.service(), uuids::DECENT_SERVICE);
        assert!(decent.init_commands().is_empty());
    }
}
