//! CREATE FILE, SELECT FILE, READ/UPDATE BINARY, READ/UPDATE RECORD.

use crate::codec::node::{DfAdfNode, EfNode, FileType, MfNode, SecondNode};
use crate::image::consts::{C_NULL, MF_FID, ZERO};
use crate::image::store::ImageStore;
use crate::session::{Session, RECORD_POINTER_UNDEFINED};
use crate::status::StatusWord;
use crate::tlv::fcp::Fcp;

use super::duplicate::{check_duplicate_fid, check_duplicate_sfi};
use super::walk::{children_of, io_err, peek_type, read_df_adf, read_directory, read_ef, read_second, DirHeader};

/// READ/UPDATE RECORD mode bits, the low three bits of P2.
const MODE_NEXT: u8 = 0x02;
const MODE_PREVIOUS: u8 = 0x03;
const MODE_ABS_CURR: u8 = 0x04;

/// Composes the Image Store, codec and TLV layers into the tree
/// operations the dispatcher calls. Borrows the engine's storage and
/// session for the lifetime of one APDU.
pub struct FileTreeEngine<'a> {
    store: &'a mut ImageStore,
    session: &'a mut Session,
}

impl<'a> FileTreeEngine<'a> {
    pub fn new(store: &'a mut ImageStore, session: &'a mut Session) -> Self {
        Self { store, session }
    }

    fn mf_offset(&mut self) -> Option<u16> {
        let root = self.store.root_pointer();

        (root != C_NULL).then_some(root)
    }

    fn ef_fcp(&mut self, ef: &EfNode) -> Result<Fcp, StatusWord> {
        let raw = self
            .store
            .read_bytes(ef.fcp_offset as u64, ef.fcp_total_size as usize)
            .map_err(io_err)?;

        Fcp::parse(&raw)
    }

    /// The directory the next CREATE FILE should attach to: the current
    /// selection, or the MF if nothing is selected yet.
    fn effective_parent(&mut self, mf_offset: u16) -> (u16, u16, bool) {
        match (self.session.current_offset, self.session.current_fid) {
            (Some(offset), Some(fid)) => (offset, fid, offset == mf_offset),
            _ => (mf_offset, MF_FID, true),
        }
    }

    // ---- CREATE FILE --------------------------------------------------

    pub fn create_file(&mut self, data: &[u8]) -> Result<Vec<u8>, StatusWord> {
        let fcp = Fcp::parse(data)?;

        if fcp.raw.len() > u8::MAX as usize {
            return Err(StatusWord::DataInvalid);
        }

        if fcp.file_type == FileType::Mf {
            return self.create_mf(&fcp);
        }

        let mf_offset = self.mf_offset().ok_or(StatusWord::CommandNotAllowed)?;
        let (parent_offset, parent_fid, parent_is_root) = self.effective_parent(mf_offset);

        let parent_kind = if parent_is_root { FileType::Mf } else { peek_type(self.store, parent_offset)? };

        if !parent_kind.is_directory() {
            return Err(StatusWord::CommandNotAllowed);
        }

        check_duplicate_fid(self.store, mf_offset, parent_offset, parent_fid, fcp.fid, fcp.file_type)?;

        if fcp.file_type.is_ef() {
            let sfi = fcp.sfi.ok_or(StatusWord::DataInvalid)?;

            check_duplicate_sfi(self.store, mf_offset, parent_offset, sfi)?;
        }

        if fcp.file_type.is_directory() {
            self.create_df_adf(parent_offset, parent_fid, parent_is_root, &fcp)
        } else {
            self.create_ef(parent_offset, parent_fid, parent_is_root, &fcp)
        }
    }

    fn create_mf(&mut self, fcp: &Fcp) -> Result<Vec<u8>, StatusWord> {
        if self.store.root_pointer() != C_NULL {
            return Err(StatusWord::FileAlreadyExists);
        }

        let total = MfNode::LENGTH as u16 + fcp.raw.len() as u16;
        let offset = self.store.allocate_mf(total)?;
        let fcp_offset = offset + MfNode::LENGTH as u16;

        let node = MfNode {
            fid: fcp.fid,
            child_fid: ZERO,
            child_offset: ZERO,
            status: 0x01,
            file_type: FileType::Mf.type_byte(),
            fcp_offset,
            fcp_total_size: fcp.raw.len() as u8,
            next_offset: ZERO,
        };

        self.store.write_bytes(offset as u64, &node.to_bytes()).map_err(io_err)?;
        self.store.write_bytes(fcp_offset as u64, &fcp.raw).map_err(io_err)?;
        self.store.set_root_pointer(offset);

        self.session.select_directory(fcp.fid, offset, FileType::Mf, None, None);

        Ok(Vec::new())
    }

    fn create_df_adf(
        &mut self,
        parent_offset: u16,
        parent_fid: u16,
        parent_is_root: bool,
        fcp: &Fcp,
    ) -> Result<Vec<u8>, StatusWord> {
        let total = DfAdfNode::LENGTH as u16 + fcp.raw.len() as u16;
        let offset = self.store.allocate(total)?;
        let fcp_offset = offset + DfAdfNode::LENGTH as u16;

        let node = DfAdfNode {
            fid: fcp.fid,
            parent_fid,
            parent_offset,
            file_type: fcp.file_type.type_byte(),
            child_fid: ZERO,
            child_offset: ZERO,
            fcp_offset,
            fcp_total_size: fcp.raw.len() as u8,
            next_offset: ZERO,
        };

        self.store.write_bytes(offset as u64, &node.to_bytes()).map_err(io_err)?;
        self.store.write_bytes(fcp_offset as u64, &fcp.raw).map_err(io_err)?;

        self.splice_child(parent_offset, parent_is_root, fcp.fid, offset)?;

        self.session
            .select_directory(fcp.fid, offset, fcp.file_type, Some(parent_fid), Some(parent_offset));

        Ok(Vec::new())
    }

    fn create_ef(
        &mut self,
        parent_offset: u16,
        parent_fid: u16,
        parent_is_root: bool,
        fcp: &Fcp,
    ) -> Result<Vec<u8>, StatusWord> {
        let file_size = fcp.file_size.unwrap_or(0);
        let total = EfNode::LENGTH as u16 + fcp.raw.len() as u16 + file_size;
        let offset = self.store.allocate(total)?;
        let fcp_offset = offset + EfNode::LENGTH as u16;
        let data_offset = fcp_offset + fcp.raw.len() as u16;

        let node = EfNode {
            fid: fcp.fid,
            parent_offset,
            parent_fid,
            file_type: fcp.file_type.type_byte(),
            fcp_offset,
            fcp_total_size: fcp.raw.len() as u8,
            data_offset,
        };

        self.store.write_bytes(offset as u64, &node.to_bytes()).map_err(io_err)?;
        self.store.write_bytes(fcp_offset as u64, &fcp.raw).map_err(io_err)?;

        if file_size > 0 {
            self.store
                .write_bytes(data_offset as u64, &vec![0xFFu8; file_size as usize])
                .map_err(io_err)?;
        }

        self.splice_child(parent_offset, parent_is_root, fcp.fid, offset)?;

        self.session.select_ef(fcp.fid, offset);

        Ok(Vec::new())
    }

    /// Attach a freshly allocated child to its parent's sibling chain:
    /// fill the embedded first-child slot if empty, otherwise append a
    /// Second node to the tail of the chain (`SPEC_FULL.md` §4.5 step 7).
    fn splice_child(
        &mut self,
        parent_offset: u16,
        parent_is_root: bool,
        child_fid: u16,
        child_offset: u16,
    ) -> Result<(), StatusWord> {
        let parent = read_directory(self.store, parent_offset, parent_is_root)?;

        if parent.child_fid() == ZERO {
            return self.write_embedded_child(parent_offset, parent_is_root, child_fid, child_offset);
        }

        let mut cursor = parent.next_offset();

        if cursor == ZERO {
            let second_offset = self.allocate_second(parent_offset, child_fid, child_offset)?;

            return self.write_next_offset(parent_offset, parent_is_root, second_offset);
        }

        loop {
            let node = read_second(self.store, cursor)?;

            if node.next_offset == ZERO {
                break;
            }

            cursor = node.next_offset;
        }

        let second_offset = self.allocate_second(parent_offset, child_fid, child_offset)?;

        // Patch the tail Second node's NextOffset field (byte 6).
        self.store
            .write_u16_be(cursor as u64 + 6, second_offset)
            .map_err(io_err)
    }

    fn allocate_second(&mut self, parent_offset: u16, child_fid: u16, child_offset: u16) -> Result<u16, StatusWord> {
        let node = SecondNode { parent_offset, child_fid, child_offset, next_offset: ZERO };

        let offset = self.store.allocate(SecondNode::LENGTH as u16)?;

        self.store.write_bytes(offset as u64, &node.to_bytes()).map_err(io_err)?;

        Ok(offset)
    }

    fn write_embedded_child(
        &mut self,
        parent_offset: u16,
        parent_is_root: bool,
        child_fid: u16,
        child_offset: u16,
    ) -> Result<(), StatusWord> {
        let (fid_field, offset_field) = if parent_is_root { (2, 4) } else { (7, 9) };

        self.store
            .write_u16_be(parent_offset as u64 + fid_field, child_fid)
            .map_err(io_err)?;

        self.store
            .write_u16_be(parent_offset as u64 + offset_field, child_offset)
            .map_err(io_err)
    }

    fn write_next_offset(&mut self, parent_offset: u16, parent_is_root: bool, value: u16) -> Result<(), StatusWord> {
        let field = if parent_is_root { 11 } else { 14 };

        self.store.write_u16_be(parent_offset as u64 + field, value).map_err(io_err)
    }

    // ---- SELECT FILE ----------------------------------------------------

    /// Locate `fid` in "nearby things first" order: the current
    /// directory, its direct children, its siblings, its parent, then a
    /// full scan from the MF (`DESIGN.md` Open Question 7).
    fn locate(&mut self, fid: u16, mf_offset: u16) -> Result<Option<(u16, FileType)>, StatusWord> {
        if let Some(current_offset) = self.session.current_offset {
            let is_root = current_offset == mf_offset;
            let dir = read_directory(self.store, current_offset, is_root)?;

            if dir.fid() == fid {
                return Ok(Some((current_offset, if is_root { FileType::Mf } else { peek_type(self.store, current_offset)? })));
            }

            for entry in children_of(self.store, &dir)? {
                if entry.fid == fid {
                    let kind = peek_type(self.store, entry.offset)?;

                    return Ok(Some((entry.offset, kind)));
                }
            }
        }

        if let Some(parent_offset) = self.session.parent_offset {
            let parent_is_root = parent_offset == mf_offset;
            let parent = read_directory(self.store, parent_offset, parent_is_root)?;

            for entry in children_of(self.store, &parent)? {
                if entry.fid == fid {
                    let kind = peek_type(self.store, entry.offset)?;

                    return Ok(Some((entry.offset, kind)));
                }
            }

            if parent.fid() == fid {
                return Ok(Some((parent_offset, if parent_is_root { FileType::Mf } else { peek_type(self.store, parent_offset)? })));
            }
        }

        self.find_in_subtree(mf_offset, true, fid)
    }

    fn find_in_subtree(&mut self, offset: u16, is_root: bool, fid: u16) -> Result<Option<(u16, FileType)>, StatusWord> {
        let dir = read_directory(self.store, offset, is_root)?;

        if dir.fid() == fid {
            return Ok(Some((offset, if is_root { FileType::Mf } else { peek_type(self.store, offset)? })));
        }

        for entry in children_of(self.store, &dir)? {
            let kind = peek_type(self.store, entry.offset)?;

            if entry.fid == fid {
                return Ok(Some((entry.offset, kind)));
            }

            if kind.is_directory() {
                if let Some(found) = self.find_in_subtree(entry.offset, false, fid)? {
                    return Ok(Some(found));
                }
            }
        }

        Ok(None)
    }

    pub fn select_file(&mut self, fid: u16) -> Result<Vec<u8>, StatusWord> {
        let mf_offset = self.mf_offset().ok_or(StatusWord::FileNotFound)?;

        match self.locate(fid, mf_offset)? {
            Some((offset, kind)) if kind.is_directory() => {
                self.select_directory_at(offset, kind, mf_offset)?;

                Ok(Vec::new())
            }

            Some((offset, _)) => {
                self.select_ef_at(offset, mf_offset)?;

                Ok(Vec::new())
            }

            None => Err(StatusWord::FileNotFound),
        }
    }

    fn select_directory_at(&mut self, offset: u16, kind: FileType, mf_offset: u16) -> Result<(), StatusWord> {
        if offset == mf_offset {
            self.session.select_directory(MF_FID, offset, FileType::Mf, None, None);
        } else {
            let node = read_df_adf(self.store, offset)?;

            self.session
                .select_directory(node.fid, offset, kind, Some(node.parent_fid), Some(node.parent_offset));
        }

        Ok(())
    }

    fn select_ef_at(&mut self, ef_offset: u16, mf_offset: u16) -> Result<(), StatusWord> {
        let ef = read_ef(self.store, ef_offset)?;

        let parent_offset = ef.parent_offset;
        let parent_is_root = parent_offset == mf_offset;

        let parent_kind = if parent_is_root { FileType::Mf } else { peek_type(self.store, parent_offset)? };

        self.select_directory_at(parent_offset, parent_kind, mf_offset)?;

        self.session.select_ef(ef.fid, ef_offset);

        Ok(())
    }

    // ---- READ/UPDATE BINARY --------------------------------------------

    fn current_ef(&mut self) -> Result<EfNode, StatusWord> {
        let offset = self.session.current_ef_offset.ok_or(StatusWord::CommandNotAllowed)?;

        read_ef(self.store, offset)
    }

    pub fn read_binary(&mut self, offset: u16, requested_len: Option<u8>) -> Result<Vec<u8>, StatusWord> {
        let ef = self.current_ef()?;
        let file_type = FileType::from_byte(ef.file_type).ok_or(StatusWord::TechnicalProblem)?;

        if !file_type.is_transparent() {
            return Err(StatusWord::CommandNotAllowed);
        }

        let fcp = self.ef_fcp(&ef)?;
        let file_size = fcp.file_size.unwrap_or(0);

        let remaining = file_size.saturating_sub(offset);
        let len = requested_len.map(|l| l as u16).unwrap_or(remaining);

        if offset > file_size || len > remaining {
            return Err(StatusWord::WrongLengthLe(remaining.min(u8::MAX as u16) as u8));
        }

        self.store.read_bytes(ef.data_offset as u64 + offset as u64, len as usize).map_err(io_err)
    }

    pub fn update_binary(&mut self, offset: u16, data: &[u8]) -> Result<Vec<u8>, StatusWord> {
        let ef = self.current_ef()?;
        let file_type = FileType::from_byte(ef.file_type).ok_or(StatusWord::TechnicalProblem)?;

        if !file_type.is_transparent() {
            return Err(StatusWord::CommandNotAllowed);
        }

        let fcp = self.ef_fcp(&ef)?;
        let file_size = fcp.file_size.unwrap_or(0);

        let remaining = file_size.saturating_sub(offset);

        if offset > file_size || data.len() as u32 > remaining as u32 {
            return Err(StatusWord::WrongLengthLe(remaining.min(u8::MAX as u16) as u8));
        }

        self.store
            .write_bytes(ef.data_offset as u64 + offset as u64, data)
            .map_err(io_err)?;

        Ok(Vec::new())
    }

    // ---- READ/UPDATE RECORD ---------------------------------------------

    fn resolve_record_number(&self, p1: u8, mode: u8, record_count: u16, is_cyclic: bool) -> Result<u16, StatusWord> {
        match mode {
            MODE_ABS_CURR => {
                if p1 == 0 || p1 as u16 > record_count {
                    Err(StatusWord::RecordNotFound)
                } else {
                    Ok(p1 as u16)
                }
            }

            MODE_NEXT => {
                let current = self.session.record_pointer;

                let next = if current == RECORD_POINTER_UNDEFINED { 1 } else { current as u16 + 1 };

                if next > record_count {
                    if is_cyclic { Ok(1) } else { Err(StatusWord::RecordNotFound) }
                } else {
                    Ok(next)
                }
            }

            MODE_PREVIOUS => {
                let current = self.session.record_pointer;

                if current == RECORD_POINTER_UNDEFINED {
                    return Err(StatusWord::RecordNotFound);
                }

                if current as u16 <= 1 {
                    if is_cyclic { Ok(record_count) } else { Err(StatusWord::RecordNotFound) }
                } else {
                    Ok(current as u16 - 1)
                }
            }

            _ => Err(StatusWord::IncorrectP1P2),
        }
    }

    fn record_offset(ef: &EfNode, record_no: u16, record_size: u16) -> u64 {
        ef.data_offset as u64 + (record_no as u64 - 1) * record_size as u64
    }

    pub fn read_record(&mut self, p1: u8, p2: u8) -> Result<Vec<u8>, StatusWord> {
        let ef = self.current_ef()?;
        let file_type = FileType::from_byte(ef.file_type).ok_or(StatusWord::TechnicalProblem)?;

        if !file_type.is_record_based() {
            return Err(StatusWord::CommandNotAllowed);
        }

        let fcp = self.ef_fcp(&ef)?;
        let record_size = fcp.record_size.ok_or(StatusWord::TechnicalProblem)?;
        let record_count = fcp.record_count.ok_or(StatusWord::TechnicalProblem)?;

        let record_no = self.resolve_record_number(p1, p2 & 0x07, record_count, file_type.is_cyclic())?;

        let data = self
            .store
            .read_bytes(Self::record_offset(&ef, record_no, record_size), record_size as usize)
            .map_err(io_err)?;

        self.session.record_pointer = record_no as u8;

        Ok(data)
    }

    /// Shift every record down by one slot, discarding the current tail,
    /// to free record 1 for a new cyclic write (`DESIGN.md` Open
    /// Question 8).
    fn shift_cyclic(&mut self, ef: &EfNode, record_count: u16, record_size: u16) -> Result<(), StatusWord> {
        for record_no in (1..record_count).rev() {
            let bytes = self
                .store
                .read_bytes(Self::record_offset(ef, record_no, record_size), record_size as usize)
                .map_err(io_err)?;

            self.store
                .write_bytes(Self::record_offset(ef, record_no + 1, record_size), &bytes)
                .map_err(io_err)?;
        }

        Ok(())
    }

    pub fn update_record(&mut self, p1: u8, p2: u8, data: &[u8]) -> Result<Vec<u8>, StatusWord> {
        let ef = self.current_ef()?;
        let file_type = FileType::from_byte(ef.file_type).ok_or(StatusWord::TechnicalProblem)?;

        if !file_type.is_record_based() {
            return Err(StatusWord::CommandNotAllowed);
        }

        let fcp = self.ef_fcp(&ef)?;
        let record_size = fcp.record_size.ok_or(StatusWord::TechnicalProblem)?;
        let record_count = fcp.record_count.ok_or(StatusWord::TechnicalProblem)?;

        if data.len() != record_size as usize {
            return Err(StatusWord::WrongLength);
        }

        let mode = p2 & 0x07;

        if file_type.is_cyclic() && mode == MODE_NEXT {
            self.shift_cyclic(&ef, record_count, record_size)?;

            self.store.write_bytes(Self::record_offset(&ef, 1, record_size), data).map_err(io_err)?;
            self.session.record_pointer = 1;

            return Ok(Vec::new());
        }

        let record_no = self.resolve_record_number(p1, mode, record_count, file_type.is_cyclic())?;

        self.store
            .write_bytes(Self::record_offset(&ef, record_no, record_size), data)
            .map_err(io_err)?;

        self.session.record_pointer = record_no as u8;

        Ok(Vec::new())
    }

    // ---- Misc state queries ---------------------------------------------

    pub fn read_fcp(&mut self, fid: u16) -> Result<Vec<u8>, StatusWord> {
        let mf_offset = self.mf_offset().ok_or(StatusWord::FileNotFound)?;

        let (offset, kind) = self.locate(fid, mf_offset)?.ok_or(StatusWord::FileNotFound)?;

        let (fcp_offset, fcp_len) = if kind.is_directory() {
            let dir: DirHeader = read_directory(self.store, offset, offset == mf_offset)?;

            (dir.fcp_offset(), dir.fcp_total_size())
        } else {
            let ef = read_ef(self.store, offset)?;

            (ef.fcp_offset, ef.fcp_total_size)
        };

        self.store.read_bytes(fcp_offset as u64, fcp_len as usize).map_err(io_err)
    }

    pub fn available_memory(&mut self) -> u16 {
        self.store.available()
    }
}
