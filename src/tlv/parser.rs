use crate::status::StatusWord;

/// Upper bound on how many TLVs a single CREATE FILE data field may carry.
pub const MAX_TLVS: usize = 10;

/// Upper bound on a single TLV's value length.
pub const MAX_TLV_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u8,
    pub value: Vec<u8>,
}

impl Tlv {
    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Decode a flat sequence of one-byte-tag TLVs (`tag, length, value...`
/// repeated), bounded by [`MAX_TLVS`] and [`MAX_TLV_LEN`].
///
/// Every tag used by this engine's FCP grammar fits in one byte, so there
/// is no multi-byte tag-number continuation to decode.
pub fn parse_tlvs(data: &[u8]) -> Result<Vec<Tlv>, StatusWord> {
    let mut tlvs = Vec::new();
    let mut cursor = 0;

    while cursor < data.len() {
        if tlvs.len() >= MAX_TLVS {
            return Err(StatusWord::DataInvalid);
        }

        let tag = data[cursor];

        let length = *data.get(cursor + 1).ok_or(StatusWord::DataInvalid)? as usize;

        if length > MAX_TLV_LEN {
            return Err(StatusWord::DataInvalid);
        }

        let value_start = cursor + 2;
        let value_end = value_start + length;

        let value = data
            .get(value_start..value_end)
            .ok_or(StatusWord::DataInvalid)?
            .to_vec();

        tlvs.push(Tlv { tag, value });

        cursor = value_end;
    }

    Ok(tlvs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_sequence() {
        let data = [0x83, 0x02, 0x3F, 0x00, 0x8A, 0x01, 0x05];

        let tlvs = parse_tlvs(&data).unwrap();

        assert_eq!(tlvs.len(), 2);
        assert_eq!(tlvs[0], Tlv { tag: 0x83, value: vec![0x3F, 0x00] });
        assert_eq!(tlvs[1], Tlv { tag: 0x8A, value: vec![0x05] });
    }

    #[test]
    fn rejects_truncated_value() {
        let data = [0x83, 0x02, 0x3F];

        assert_eq!(parse_tlvs(&data), Err(StatusWord::DataInvalid));
    }

    #[test]
    fn rejects_too_many_tlvs() {
        let mut data = Vec::new();

        for _ in 0..=MAX_TLVS {
            data.extend_from_slice(&[0x80, 0x00]);
        }

        assert_eq!(parse_tlvs(&data), Err(StatusWord::DataInvalid));
    }
}
