//! APDU wire format (`SPEC_FULL.md` §6): `CLA INS P1 P2 [Lc data] [Le]`.

use crate::status::StatusWord;

pub const INS_SELECT: u8 = 0xA4;
pub const INS_CREATE: u8 = 0xE0;
pub const INS_READ_BINARY: u8 = 0xB0;
pub const INS_UPDATE_BINARY: u8 = 0xD6;
pub const INS_READ_RECORD: u8 = 0xB2;
pub const INS_UPDATE_RECORD: u8 = 0xDC;

/// The only supported instruction class.
pub const CLA_ISO: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    pub le: Option<u8>,
}

impl Apdu {
    /// Decode the four-byte header plus an optional `Lc`/data/`Le` tail.
    pub fn parse(bytes: &[u8]) -> Result<Self, StatusWord> {
        if bytes.len() < 4 {
            return Err(StatusWord::WrongLength);
        }

        let (cla, ins, p1, p2) = (bytes[0], bytes[1], bytes[2], bytes[3]);

        match bytes.len() {
            4 => Ok(Self { cla, ins, p1, p2, data: Vec::new(), le: None }),

            5 => Ok(Self { cla, ins, p1, p2, data: Vec::new(), le: Some(bytes[4]) }),

            _ => {
                let lc = bytes[4] as usize;
                let data_end = 5 + lc;

                let data = bytes.get(5..data_end).ok_or(StatusWord::WrongLength)?.to_vec();

                let le = match bytes.len() - data_end {
                    0 => None,
                    1 => Some(bytes[data_end]),
                    _ => return Err(StatusWord::WrongLength),
                };

                Ok(Self { cla, ins, p1, p2, data, le })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_only() {
        let apdu = Apdu::parse(&[0x00, 0xA4, 0x00, 0x00]).unwrap();

        assert_eq!(apdu, Apdu { cla: 0x00, ins: 0xA4, p1: 0x00, p2: 0x00, data: vec![], le: None });
    }

    #[test]
    fn parses_header_with_le_only() {
        let apdu = Apdu::parse(&[0x00, 0xB0, 0x00, 0x00, 0x10]).unwrap();

        assert_eq!(apdu.le, Some(0x10));
        assert!(apdu.data.is_empty());
    }

    #[test]
    fn parses_data_with_trailing_le() {
        let apdu = Apdu::parse(&[0x00, 0xD6, 0x00, 0x00, 0x02, 0xAA, 0xBB, 0x10]).unwrap();

        assert_eq!(apdu.data, vec![0xAA, 0xBB]);
        assert_eq!(apdu.le, Some(0x10));
    }

    #[test]
    fn rejects_truncated_data() {
        assert_eq!(
            Apdu::parse(&[0x00, 0xE0, 0x00, 0x00, 0x05, 0xAA]),
            Err(StatusWord::WrongLength)
        );
    }
}
