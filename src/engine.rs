//! `SmartcardEngine`: owns the backing image and session state, and
//! dispatches APDUs to the File Tree Engine.

use std::path::Path;

use crate::apdu::{Apdu, INS_CREATE, INS_READ_BINARY, INS_READ_RECORD, INS_SELECT, INS_UPDATE_BINARY, INS_UPDATE_RECORD};
use crate::image::consts::C_NULL;
use crate::image::store::ImageStore;
use crate::session::Session;
use crate::status::StatusWord;
use crate::tree::file_tree::FileTreeEngine;

/// The engine as a whole: one backing image, one session, and the
/// dispatcher that routes APDUs into the File Tree Engine.
///
/// Processing is single-threaded and synchronous — every call to
/// [`Self::process_apdu`] runs to completion before returning, with no
/// concurrency primitives anywhere below it (`SPEC_FULL.md` §5).
pub struct SmartcardEngine {
    store: ImageStore,
    session: Session,
}

impl SmartcardEngine {
    /// Open (creating if necessary) the backing image at `path` and
    /// restore power-up selection state.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut store = ImageStore::open(path)?;
        let mut session = Session::new();

        Self::restore_power_up(&mut store, &mut session);

        Ok(Self { store, session })
    }

    fn restore_power_up(store: &mut ImageStore, session: &mut Session) {
        let root = store.root_pointer();

        if root == C_NULL {
            session.clear();
        } else {
            session.power_up(root);
        }
    }

    /// Re-enter power-up state: MF selected if present, nothing selected
    /// otherwise (`SPEC_FULL.md` §4.5 Power-up).
    pub fn reset_power_up(&mut self) {
        Self::restore_power_up(&mut self.store, &mut self.session);
    }

    pub fn available_memory(&mut self) -> u16 {
        self.store.available()
    }

    /// `(current directory FID, current EF FID)`.
    pub fn current_selection(&self) -> (Option<u16>, Option<u16>) {
        (self.session.current_fid, self.session.current_ef_fid)
    }

    pub fn read_fcp(&mut self, fid: u16) -> Result<Vec<u8>, StatusWord> {
        FileTreeEngine::new(&mut self.store, &mut self.session).read_fcp(fid)
    }

    /// Process one APDU to completion and return its response bytes and
    /// status word. Never panics on malformed input: every failure mode
    /// resolves to a status word.
    pub fn process_apdu(&mut self, bytes: &[u8]) -> (Vec<u8>, StatusWord) {
        match self.dispatch(bytes) {
            Ok(data) => (data, StatusWord::Ok),
            Err(sw) => (Vec::new(), sw),
        }
    }

    fn dispatch(&mut self, bytes: &[u8]) -> Result<Vec<u8>, StatusWord> {
        let apdu = Apdu::parse(bytes)?;

        if apdu.cla != crate::apdu::CLA_ISO {
            return Err(StatusWord::ClaNotSupported);
        }

        let mut tree = FileTreeEngine::new(&mut self.store, &mut self.session);

        match apdu.ins {
            INS_CREATE => tree.create_file(&apdu.data),

            INS_SELECT => {
                let [hi, lo] = apdu.data.as_slice() else {
                    return Err(StatusWord::DataInvalid);
                };

                tree.select_file(u16::from_be_bytes([*hi, *lo]))
            }

            INS_READ_BINARY => tree.read_binary(u16::from_be_bytes([apdu.p1, apdu.p2]), apdu.le),

            INS_UPDATE_BINARY => tree.update_binary(u16::from_be_bytes([apdu.p1, apdu.p2]), &apdu.data),

            INS_READ_RECORD => tree.read_record(apdu.p1, apdu.p2),

            INS_UPDATE_RECORD => tree.update_record(apdu.p1, apdu.p2, &apdu.data),

            _ => Err(StatusWord::InsNotSupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_engine<F: FnOnce(&mut SmartcardEngine)>(name: &str, callback: F) {
        let path = std::env::temp_dir().join(format!(".smartcard-fs-test-engine-{name}"));

        let _ = std::fs::remove_file(&path);

        let mut engine = SmartcardEngine::open(&path).unwrap();

        callback(&mut engine);

        let _ = std::fs::remove_file(&path);
    }

    fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag, value.len() as u8];

        out.extend_from_slice(value);

        out
    }

    fn envelope(inner: &[u8]) -> Vec<u8> {
        let mut out = vec![0x62, inner.len() as u8];

        out.extend_from_slice(inner);

        out
    }

    fn create_apdu(fcp: Vec<u8>) -> Vec<u8> {
        let mut apdu = vec![0x00, INS_CREATE, 0x00, 0x00, fcp.len() as u8];

        apdu.extend(fcp);

        apdu
    }

    fn mf_fcp() -> Vec<u8> {
        let mut inner = Vec::new();

        inner.extend(tlv(0x82, &[0x38, 0x21]));
        inner.extend(tlv(0x83, &[0x3F, 0x00]));
        inner.extend(tlv(0x8A, &[0x05]));
        inner.extend(tlv(0x8B, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(0x81, &[0x00, 0x00]));
        inner.extend(tlv(0xC6, &[0x00]));

        envelope(&inner)
    }

    fn transparent_ef_fcp(fid: u16, size: u16) -> Vec<u8> {
        let mut inner = Vec::new();

        inner.extend(tlv(0x82, &[0x01, 0x21]));
        inner.extend(tlv(0x83, &fid.to_be_bytes()));
        inner.extend(tlv(0x8A, &[0x05]));
        inner.extend(tlv(0x8B, &[0x00, 0x00, 0x00]));
        inner.extend(tlv(0x80, &size.to_be_bytes()));

        envelope(&inner)
    }

    #[test]
    fn create_mf_then_select_and_reselect_after_power_up() {
        with_engine("mf-select", |engine| {
            let (_, sw) = engine.process_apdu(&create_apdu(mf_fcp()));

            assert_eq!(sw, StatusWord::Ok);
            assert_eq!(engine.current_selection(), (Some(0x3F00), None));

            engine.reset_power_up();

            assert_eq!(engine.current_selection(), (Some(0x3F00), None));
        });
    }

    #[test]
    fn rejects_duplicate_mf_via_apdu() {
        with_engine("mf-dup", |engine| {
            let (_, sw) = engine.process_apdu(&create_apdu(mf_fcp()));
            assert_eq!(sw, StatusWord::Ok);

            let (_, sw) = engine.process_apdu(&create_apdu(mf_fcp()));
            assert_eq!(sw, StatusWord::FileAlreadyExists);
        });
    }

    #[test]
    fn create_ef_then_read_write_binary() {
        with_engine("ef-binary", |engine| {
            engine.process_apdu(&create_apdu(mf_fcp()));

            let (_, sw) = engine.process_apdu(&create_apdu(transparent_ef_fcp(0x6F01, 16)));
            assert_eq!(sw, StatusWord::Ok);

            let update = {
                let mut apdu = vec![0x00, INS_UPDATE_BINARY, 0x00, 0x00, 0x04];
                apdu.extend([0xDE, 0xAD, 0xBE, 0xEF]);
                apdu
            };

            let (_, sw) = engine.process_apdu(&update);
            assert_eq!(sw, StatusWord::Ok);

            let read = [0x00, INS_READ_BINARY, 0x00, 0x00, 0x04];

            let (data, sw) = engine.process_apdu(&read);
            assert_eq!(sw, StatusWord::Ok);
            assert_eq!(data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        });
    }

    #[test]
    fn read_binary_past_end_reports_wrong_length() {
        with_engine("ef-binary-oob", |engine| {
            engine.process_apdu(&create_apdu(mf_fcp()));
            engine.process_apdu(&create_apdu(transparent_ef_fcp(0x6F01, 4)));

            let read = [0x00, INS_READ_BINARY, 0x00, 0x00, 0x10];

            let (_, sw) = engine.process_apdu(&read);
            assert_eq!(sw, StatusWord::WrongLengthLe(4));
        });
    }

    #[test]
    fn select_unknown_fid_reports_file_not_found() {
        with_engine("select-missing", |engine| {
            engine.process_apdu(&create_apdu(mf_fcp()));

            let select = [0x00, INS_SELECT, 0x00, 0x00, 0x02, 0x6F, 0xFF];

            let (_, sw) = engine.process_apdu(&select);
            assert_eq!(sw, StatusWord::FileNotFound);
        });
    }

    #[test]
    fn unknown_instruction_is_rejected() {
        with_engine("bad-ins", |engine| {
            let (_, sw) = engine.process_apdu(&[0x00, 0xFF, 0x00, 0x00]);

            assert_eq!(sw, StatusWord::InsNotSupported);
        });
    }

    /// `SPEC_FULL.md` §8: across a randomised sequence of accepted
    /// CREATEs, the write cursor never decreases and every FID accepted
    /// under the DF is unique (a repeat is always rejected).
    #[test]
    fn randomised_ef_creation_keeps_cursor_monotonic_and_fids_unique() {
        use std::collections::HashSet;
        use tinyrand::{Rand, Wyrand};

        fn ef_fcp(fid: u16, sfi: u8) -> Vec<u8> {
            let mut inner = Vec::new();

            inner.extend([0x82, 0x02, 0x01, 0x21]);
            inner.extend([0x83, 0x02]);
            inner.extend(fid.to_be_bytes());
            inner.extend([0x8A, 0x01, 0x05]);
            inner.extend([0x8B, 0x03, 0x00, 0x00, 0x00]);
            inner.extend([0x80, 0x02, 0x00, 0x10]);
            inner.extend([0x88, 0x01, sfi << 3]);

            let mut out = vec![0x62, inner.len() as u8];

            out.extend(inner);
            out
        }

        with_engine("random-ef", |engine| {
            engine.process_apdu(&create_apdu(mf_fcp()));

            let mut rand = Wyrand::default();
            let mut accepted = HashSet::new();
            let mut last_cursor = engine.available_memory();

            for sfi in 0..40u8 {
                let fid = 0x6000 | (rand.next_u16() & 0x0FFF);

                let (_, sw) = engine.process_apdu(&create_apdu(ef_fcp(fid, sfi & 0x1F)));

                let cursor_after = engine.available_memory();
                assert!(cursor_after <= last_cursor, "available memory must never increase");
                last_cursor = cursor_after;

                if accepted.contains(&fid) {
                    assert_eq!(sw, StatusWord::FileAlreadyExists);
                } else if sw == StatusWord::Ok {
                    accepted.insert(fid);
                }

                // Re-select the DF-less MF directly so every EF attaches
                // to the same parent and the uniqueness check stays
                // meaningful across the whole loop.
                engine.process_apdu(&[0x00, INS_SELECT, 0x00, 0x00, 0x02, 0x3F, 0x00]);
            }
        });
    }
}
