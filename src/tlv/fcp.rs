//! Per-file-type validation of the File Control Parameters TLV block.

use crate::codec::node::FileType;
use crate::image::consts::MF_FID;
use crate::status::StatusWord;

use super::parser::{parse_tlvs, Tlv};

/// Outer TLV tag wrapping the FCP template in a CREATE FILE data field.
pub const TAG_FCP_TEMPLATE: u8 = 0x62;

pub const TAG_FILE_DESCRIPTOR: u8 = 0x82;
pub const TAG_FID: u8 = 0x83;
pub const TAG_AID: u8 = 0x84;
pub const TAG_LIFE_CYCLE: u8 = 0x8A;
pub const TAG_SECURITY_ATTR: u8 = 0x8B;
pub const TAG_FILE_SIZE: u8 = 0x80;
pub const TAG_TOTAL_FILE_SIZE: u8 = 0x81;
pub const TAG_PROPRIETARY_INFO: u8 = 0xC6;
pub const TAG_PROPRIETARY_A: u8 = 0x85;
pub const TAG_PROPRIETARY_B: u8 = 0xA5;
pub const TAG_SHORT_FID: u8 = 0x88;

/// The fully parsed and validated FCP block, plus everything derived from
/// it that the File Tree Engine needs to allocate and splice a new node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fcp {
    pub file_type: FileType,
    pub fid: u16,
    pub aid: Option<Vec<u8>>,
    pub file_size: Option<u16>,
    pub record_size: Option<u16>,
    pub record_count: Option<u16>,
    pub sfi: Option<u8>,

    /// The exact bytes of the CREATE FILE data field, persisted verbatim
    /// at the node's `FCPOffset` so it can be read back unmodified.
    pub raw: Vec<u8>,
}

fn allowed_tags(file_type: &FileType) -> &'static [u8] {
    match file_type {
        FileType::Mf | FileType::Df => &[
            TAG_FILE_DESCRIPTOR, TAG_FID, TAG_LIFE_CYCLE, TAG_SECURITY_ATTR,
            TAG_TOTAL_FILE_SIZE, TAG_PROPRIETARY_INFO, TAG_PROPRIETARY_A, TAG_PROPRIETARY_B,
        ],
        FileType::Adf => &[
            TAG_FILE_DESCRIPTOR, TAG_FID, TAG_AID, TAG_LIFE_CYCLE, TAG_SECURITY_ATTR,
            TAG_TOTAL_FILE_SIZE, TAG_PROPRIETARY_INFO, TAG_PROPRIETARY_A, TAG_PROPRIETARY_B,
        ],
        _ => &[
            TAG_FILE_DESCRIPTOR, TAG_FID, TAG_LIFE_CYCLE, TAG_SECURITY_ATTR,
            TAG_FILE_SIZE, TAG_PROPRIETARY_A, TAG_PROPRIETARY_B, TAG_SHORT_FID,
        ],
    }
}

fn mandatory_tags(file_type: &FileType) -> &'static [u8] {
    match file_type {
        FileType::Mf | FileType::Df => &[
            TAG_FILE_DESCRIPTOR, TAG_FID, TAG_LIFE_CYCLE, TAG_SECURITY_ATTR, TAG_TOTAL_FILE_SIZE, TAG_PROPRIETARY_INFO,
        ],
        FileType::Adf => &[
            TAG_FILE_DESCRIPTOR, TAG_FID, TAG_AID, TAG_LIFE_CYCLE, TAG_SECURITY_ATTR, TAG_TOTAL_FILE_SIZE, TAG_PROPRIETARY_INFO,
        ],
        _ => &[TAG_FILE_DESCRIPTOR, TAG_FID, TAG_LIFE_CYCLE, TAG_SECURITY_ATTR, TAG_FILE_SIZE],
    }
}

fn find<'a>(tlvs: &'a [Tlv], tag: u8) -> Option<&'a Tlv> {
    tlvs.iter().find(|tlv| tlv.tag == tag)
}

/// Derive the structural file type from the `0x82` File Descriptor TLV,
/// per SPEC_FULL §4.3. A directory-shaped descriptor alongside a present
/// `0x84` AID tag is promoted from DF to ADF.
fn derive_file_type(descriptor: &Tlv, fid: u16, aid_present: bool) -> Result<FileType, StatusWord> {
    match descriptor.value.as_slice() {
        [first, 0x21] => match *first {
            0x78 | 0x38 if fid == MF_FID => Ok(FileType::Mf),
            0x78 | 0x38 if aid_present => Ok(FileType::Adf),
            0x78 | 0x38 => Ok(FileType::Df),
            0x41 => Ok(FileType::EfTransparent { shareable: true }),
            0x01 => Ok(FileType::EfTransparent { shareable: false }),
            _ => Err(StatusWord::DataInvalid),
        },

        [first, 0x21, rs_hi, rs_lo] => match *first {
            0x42 => Ok(FileType::EfLinear { shareable: true }),
            0x02 => Ok(FileType::EfLinear { shareable: false }),
            0x46 => Ok(FileType::EfCyclic { shareable: true }),
            0x06 => Ok(FileType::EfCyclic { shareable: false }),
            _ => {
                let _ = (rs_hi, rs_lo);

                Err(StatusWord::DataInvalid)
            }
        },

        _ => Err(StatusWord::DataInvalid),
    }
}

fn record_size_of(descriptor: &Tlv) -> Option<u16> {
    match descriptor.value.as_slice() {
        [_, 0x21, rs_hi, rs_lo] => Some(u16::from_be_bytes([*rs_hi, *rs_lo])),
        _ => None,
    }
}

impl Fcp {
    /// Parse and validate the data field of a CREATE FILE APDU.
    pub fn parse(data: &[u8]) -> Result<Self, StatusWord> {
        let envelope = parse_tlvs(data)?;

        let [template] = envelope.as_slice() else {
            return Err(StatusWord::DataInvalid);
        };

        if template.tag != TAG_FCP_TEMPLATE {
            return Err(StatusWord::DataInvalid);
        }

        let inner = parse_tlvs(&template.value)?;

        let fid_tlv = find(&inner, TAG_FID).ok_or(StatusWord::DataInvalid)?;

        let [fid_hi, fid_lo] = fid_tlv.value.as_slice() else {
            return Err(StatusWord::DataInvalid);
        };

        let fid = u16::from_be_bytes([*fid_hi, *fid_lo]);

        let descriptor = find(&inner, TAG_FILE_DESCRIPTOR).ok_or(StatusWord::DataInvalid)?;

        let aid_present = find(&inner, TAG_AID).is_some();
        let file_type = derive_file_type(descriptor, fid, aid_present)?;

        let allowed = allowed_tags(&file_type);
        let mandatory = mandatory_tags(&file_type);

        for tlv in &inner {
            if !allowed.contains(&tlv.tag) {
                return Err(StatusWord::DataInvalid);
            }
        }

        for tag in mandatory {
            if find(&inner, *tag).is_none() {
                return Err(StatusWord::DataInvalid);
            }
        }

        if find(&inner, TAG_PROPRIETARY_A).is_some() && find(&inner, TAG_PROPRIETARY_B).is_some() {
            return Err(StatusWord::DataInvalid);
        }

        if let Some(life_cycle) = find(&inner, TAG_LIFE_CYCLE) {
            if life_cycle.value.as_slice() != [0x05] {
                return Err(StatusWord::DataInvalid);
            }
        }

        if let Some(security) = find(&inner, TAG_SECURITY_ATTR) {
            if security.len() != 3 {
                return Err(StatusWord::DataInvalid);
            }
        }

        if let Some(total_size) = find(&inner, TAG_TOTAL_FILE_SIZE) {
            if total_size.value.as_slice() != [0x00, 0x00] {
                return Err(StatusWord::DataInvalid);
            }
        }

        let aid = match find(&inner, TAG_AID) {
            Some(tlv) if (5..=16).contains(&tlv.len()) => Some(tlv.value.clone()),
            Some(_) => return Err(StatusWord::DataInvalid),
            None => None,
        };

        let file_size = match find(&inner, TAG_FILE_SIZE) {
            Some(tlv) => {
                let [hi, lo] = tlv.value.as_slice() else {
                    return Err(StatusWord::DataInvalid);
                };

                let size = u16::from_be_bytes([*hi, *lo]);

                if file_type.is_ef() && size == 0 {
                    return Err(StatusWord::DataInvalid);
                }

                Some(size)
            }

            None => None,
        };

        let record_size = record_size_of(descriptor);

        let record_count = match (file_type.is_record_based(), record_size, file_size) {
            (true, Some(record_size), Some(file_size)) => {
                if record_size == 0 || file_size % record_size != 0 {
                    return Err(StatusWord::DataInvalid);
                }

                Some(file_size / record_size)
            }

            _ => None,
        };

        let sfi = match (file_type.is_ef(), find(&inner, TAG_SHORT_FID)) {
            (true, Some(tlv)) => {
                let [value] = tlv.value.as_slice() else {
                    return Err(StatusWord::DataInvalid);
                };

                if value & 0x07 != 0 {
                    return Err(StatusWord::DataInvalid);
                }

                Some(value >> 3)
            }

            (true, None) => Some((fid & 0x1F) as u8),

            (false, _) => None,
        };

        Ok(Self {
            file_type,
            fid,
            aid,
            file_size,
            record_size,
            record_count,
            sfi,
            raw: data.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag, value.len() as u8];

        out.extend_from_slice(value);

        out
    }

    fn envelope(inner: &[u8]) -> Vec<u8> {
        let mut out = vec![TAG_FCP_TEMPLATE, inner.len() as u8];

        out.extend_from_slice(inner);

        out
    }

    fn mf_fcp_bytes() -> Vec<u8> {
        let mut inner = Vec::new();

        inner.extend(tlv(TAG_FILE_DESCRIPTOR, &[0x38, 0x21]));
        inner.extend(tlv(TAG_FID, &[0x3F, 0x00]));
        inner.extend(tlv(TAG_LIFE_CYCLE, &[0x05]));
        inner.extend(tlv(TAG_SECURITY_ATTR, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(TAG_TOTAL_FILE_SIZE, &[0x00, 0x00]));
        inner.extend(tlv(TAG_PROPRIETARY_INFO, &[0x00]));

        envelope(&inner)
    }

    #[test]
    fn parses_mf_fcp() {
        let fcp = Fcp::parse(&mf_fcp_bytes()).unwrap();

        assert_eq!(fcp.file_type, FileType::Mf);
        assert_eq!(fcp.fid, 0x3F00);
    }

    #[test]
    fn aid_tag_promotes_df_to_adf() {
        let mut inner = Vec::new();

        inner.extend(tlv(TAG_FILE_DESCRIPTOR, &[0x38, 0x21]));
        inner.extend(tlv(TAG_FID, &[0x7F, 0x10]));
        inner.extend(tlv(TAG_AID, &[0xA0, 0x00, 0x00, 0x00, 0x03]));
        inner.extend(tlv(TAG_LIFE_CYCLE, &[0x05]));
        inner.extend(tlv(TAG_SECURITY_ATTR, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(TAG_TOTAL_FILE_SIZE, &[0x00, 0x00]));
        inner.extend(tlv(TAG_PROPRIETARY_INFO, &[0x00]));

        let fcp = Fcp::parse(&envelope(&inner)).unwrap();

        assert_eq!(fcp.file_type, FileType::Adf);
        assert_eq!(fcp.aid, Some(vec![0xA0, 0x00, 0x00, 0x00, 0x03]));
    }

    #[test]
    fn rejects_aid_with_bad_length() {
        let mut inner = Vec::new();

        inner.extend(tlv(TAG_FILE_DESCRIPTOR, &[0x38, 0x21]));
        inner.extend(tlv(TAG_FID, &[0x7F, 0x10]));
        inner.extend(tlv(TAG_AID, &[0xA0, 0x00]));
        inner.extend(tlv(TAG_LIFE_CYCLE, &[0x05]));
        inner.extend(tlv(TAG_SECURITY_ATTR, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(TAG_TOTAL_FILE_SIZE, &[0x00, 0x00]));
        inner.extend(tlv(TAG_PROPRIETARY_INFO, &[0x00]));

        assert_eq!(Fcp::parse(&envelope(&inner)), Err(StatusWord::DataInvalid));
    }

    #[test]
    fn rejects_missing_mandatory_tag() {
        let mut inner = Vec::new();

        inner.extend(tlv(TAG_FILE_DESCRIPTOR, &[0x38, 0x21]));
        inner.extend(tlv(TAG_FID, &[0x3F, 0x00]));

        assert_eq!(Fcp::parse(&envelope(&inner)), Err(StatusWord::DataInvalid));
    }

    #[test]
    fn ef_defaults_sfi_from_fid_low_bits() {
        let mut inner = Vec::new();

        inner.extend(tlv(TAG_FILE_DESCRIPTOR, &[0x01, 0x21]));
        inner.extend(tlv(TAG_FID, &[0x6F, 0x01]));
        inner.extend(tlv(TAG_LIFE_CYCLE, &[0x05]));
        inner.extend(tlv(TAG_SECURITY_ATTR, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(TAG_FILE_SIZE, &[0x00, 0x10]));

        let fcp = Fcp::parse(&envelope(&inner)).unwrap();

        assert_eq!(fcp.sfi, Some(0x6F01u16 as u8 & 0x1F));
    }

    #[test]
    fn rejects_record_size_not_dividing_file_size() {
        let mut inner = Vec::new();

        inner.extend(tlv(TAG_FILE_DESCRIPTOR, &[0x42, 0x21, 0x00, 0x10]));
        inner.extend(tlv(TAG_FID, &[0x6F, 0x02]));
        inner.extend(tlv(TAG_LIFE_CYCLE, &[0x05]));
        inner.extend(tlv(TAG_SECURITY_ATTR, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(TAG_FILE_SIZE, &[0x00, 0x15]));

        assert_eq!(Fcp::parse(&envelope(&inner)), Err(StatusWord::DataInvalid));
    }

    #[test]
    fn rejects_zero_file_size_on_ef() {
        let mut inner = Vec::new();

        inner.extend(tlv(TAG_FILE_DESCRIPTOR, &[0x01, 0x21]));
        inner.extend(tlv(TAG_FID, &[0x6F, 0x01]));
        inner.extend(tlv(TAG_LIFE_CYCLE, &[0x05]));
        inner.extend(tlv(TAG_SECURITY_ATTR, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(TAG_FILE_SIZE, &[0x00, 0x00]));

        assert_eq!(Fcp::parse(&envelope(&inner)), Err(StatusWord::DataInvalid));
    }

    #[test]
    fn rejects_both_proprietary_tags() {
        let mut inner = Vec::new();

        inner.extend(tlv(TAG_FILE_DESCRIPTOR, &[0x38, 0x21]));
        inner.extend(tlv(TAG_FID, &[0x3F, 0x00]));
        inner.extend(tlv(TAG_LIFE_CYCLE, &[0x05]));
        inner.extend(tlv(TAG_SECURITY_ATTR, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(TAG_TOTAL_FILE_SIZE, &[0x00, 0x00]));
        inner.extend(tlv(TAG_PROPRIETARY_INFO, &[0x00]));
        inner.extend(tlv(TAG_PROPRIETARY_A, &[0x01]));
        inner.extend(tlv(TAG_PROPRIETARY_B, &[0x01]));

        assert_eq!(Fcp::parse(&envelope(&inner)), Err(StatusWord::DataInvalid));
    }
}
