//! Explicit session state.
//!
//! The original simulator kept the current selection in a handful of
//! process-global variables. `Session` folds them into one value owned by
//! the engine, per `SPEC_FULL.md` §9's recommendation.

use crate::codec::node::FileType;

/// Sentinel value of `record_pointer` meaning "no record has been
/// addressed since this EF was selected".
pub const RECORD_POINTER_UNDEFINED: u8 = 0xFF;

/// The currently selected directory (MF/DF/ADF) and, if any, EF beneath
/// it, plus the record pointer used by READ/UPDATE RECORD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub current_fid: Option<u16>,
    pub current_offset: Option<u16>,
    pub current_file_type: Option<FileType>,

    pub parent_fid: Option<u16>,
    pub parent_offset: Option<u16>,

    pub current_ef_fid: Option<u16>,
    pub current_ef_offset: Option<u16>,

    pub record_pointer: u8,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            current_fid: None,
            current_offset: None,
            current_file_type: None,
            parent_fid: None,
            parent_offset: None,
            current_ef_fid: None,
            current_ef_offset: None,
            record_pointer: RECORD_POINTER_UNDEFINED,
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a directory (MF/DF/ADF). Clears any current EF selection,
    /// since selecting a directory always leaves EF selection behind.
    pub fn select_directory(
        &mut self,
        fid: u16,
        offset: u16,
        file_type: FileType,
        parent_fid: Option<u16>,
        parent_offset: Option<u16>,
    ) {
        self.current_fid = Some(fid);
        self.current_offset = Some(offset);
        self.current_file_type = Some(file_type);
        self.parent_fid = parent_fid;
        self.parent_offset = parent_offset;

        self.current_ef_fid = None;
        self.current_ef_offset = None;
        self.record_pointer = RECORD_POINTER_UNDEFINED;
    }

    /// Select an EF underneath the current directory. The current
    /// directory selection is left untouched; only the EF and record
    /// pointer change.
    pub fn select_ef(&mut self, fid: u16, offset: u16) {
        self.current_ef_fid = Some(fid);
        self.current_ef_offset = Some(offset);
        self.record_pointer = RECORD_POINTER_UNDEFINED;
    }

    /// Restore power-up state: the MF is selected, nothing else is.
    pub fn power_up(&mut self, mf_offset: u16) {
        self.current_fid = Some(crate::image::consts::MF_FID);
        self.current_offset = Some(mf_offset);
        self.current_file_type = Some(FileType::Mf);
        self.parent_fid = None;
        self.parent_offset = None;
        self.current_ef_fid = None;
        self.current_ef_offset = None;
        self.record_pointer = RECORD_POINTER_UNDEFINED;
    }

    /// Clear all selection state (no MF found at power-up).
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn has_selection(&self) -> bool {
        self.current_fid.is_some()
    }

    pub fn current_directory_offset(&self) -> Option<u16> {
        self.current_offset.filter(|_| {
            !matches!(self.current_file_type, Some(ft) if ft.is_ef())
        })
    }

    /// The offset of the currently selected EF, if any.
    pub fn current_ef_offset_or(&self, default: Option<u16>) -> Option<u16> {
        self.current_ef_offset.or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_up_selects_mf() {
        let mut session = Session::new();

        session.power_up(0x0002);

        assert_eq!(session.current_fid, Some(crate::image::consts::MF_FID));
        assert_eq!(session.current_file_type, Some(FileType::Mf));
        assert_eq!(session.record_pointer, RECORD_POINTER_UNDEFINED);
    }

    #[test]
    fn selecting_ef_resets_record_pointer() {
        let mut session = Session::new();

        session.power_up(0x0002);
        session.record_pointer = 5;

        session.select_ef(0x6F01, 0x0100);

        assert_eq!(session.record_pointer, RECORD_POINTER_UNDEFINED);
        assert_eq!(session.current_fid, Some(crate::image::consts::MF_FID));
    }
}
