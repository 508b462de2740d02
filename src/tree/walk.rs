//! Shared node-reading and sibling-chain traversal helpers used by both
//! the duplicate checkers and the File Tree Engine.

use crate::codec::node::{DF_ADF_EF_TYPE_OFFSET, DfAdfNode, EfNode, FileType, MfNode, SecondNode};
use crate::image::consts::ZERO;
use crate::image::store::ImageStore;
use crate::status::StatusWord;

/// A directory header, generalised over the MF's and DF/ADF's differing
/// byte layouts.
#[derive(Debug, Clone, Copy)]
pub enum DirHeader {
    Mf(MfNode),
    DfAdf(DfAdfNode),
}

impl DirHeader {
    pub fn fid(&self) -> u16 {
        match self {
            Self::Mf(node) => node.fid,
            Self::DfAdf(node) => node.fid,
        }
    }

    pub fn child_fid(&self) -> u16 {
        match self {
            Self::Mf(node) => node.child_fid,
            Self::DfAdf(node) => node.child_fid,
        }
    }

    pub fn child_offset(&self) -> u16 {
        match self {
            Self::Mf(node) => node.child_offset,
            Self::DfAdf(node) => node.child_offset,
        }
    }

    pub fn next_offset(&self) -> u16 {
        match self {
            Self::Mf(node) => node.next_offset,
            Self::DfAdf(node) => node.next_offset,
        }
    }

    pub fn fcp_offset(&self) -> u16 {
        match self {
            Self::Mf(node) => node.fcp_offset,
            Self::DfAdf(node) => node.fcp_offset,
        }
    }

    pub fn fcp_total_size(&self) -> u8 {
        match self {
            Self::Mf(node) => node.fcp_total_size,
            Self::DfAdf(node) => node.fcp_total_size,
        }
    }
}

/// One (FID, offset) entry in a sibling chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub fid: u16,
    pub offset: u16,
}

pub(crate) fn io_err(_: anyhow::Error) -> StatusWord {
    StatusWord::TechnicalProblem
}

pub fn read_mf(store: &mut ImageStore, offset: u16) -> Result<MfNode, StatusWord> {
    let bytes = store.read_bytes(offset as u64, MfNode::LENGTH).map_err(io_err)?;

    Ok(MfNode::from_bytes(&bytes))
}

pub fn read_df_adf(store: &mut ImageStore, offset: u16) -> Result<DfAdfNode, StatusWord> {
    let bytes = store.read_bytes(offset as u64, DfAdfNode::LENGTH).map_err(io_err)?;

    Ok(DfAdfNode::from_bytes(&bytes))
}

pub fn read_ef(store: &mut ImageStore, offset: u16) -> Result<EfNode, StatusWord> {
    let bytes = store.read_bytes(offset as u64, EfNode::LENGTH).map_err(io_err)?;

    Ok(EfNode::from_bytes(&bytes))
}

pub fn read_second(store: &mut ImageStore, offset: u16) -> Result<SecondNode, StatusWord> {
    let bytes = store.read_bytes(offset as u64, SecondNode::LENGTH).map_err(io_err)?;

    Ok(SecondNode::from_bytes(&bytes))
}

pub fn read_directory(store: &mut ImageStore, offset: u16, is_root: bool) -> Result<DirHeader, StatusWord> {
    if is_root {
        read_mf(store, offset).map(DirHeader::Mf)
    } else {
        read_df_adf(store, offset).map(DirHeader::DfAdf)
    }
}

/// Peek a node's type byte without decoding its full layout. Only valid
/// for DF/ADF/EF nodes, which share the same type-byte offset — the MF
/// is always found at the fixed root offset and is never discovered this
/// way.
pub fn peek_type(store: &mut ImageStore, offset: u16) -> Result<FileType, StatusWord> {
    let byte = store
        .read_u8(offset as u64 + DF_ADF_EF_TYPE_OFFSET)
        .map_err(io_err)?;

    FileType::from_byte(byte).ok_or(StatusWord::TechnicalProblem)
}

/// The full sibling list of a directory's children: the embedded first
/// child, if any, followed by every Second-node extension.
pub fn children_of(store: &mut ImageStore, dir: &DirHeader) -> Result<Vec<DirEntry>, StatusWord> {
    let mut out = Vec::new();

    if dir.child_fid() != ZERO {
        out.push(DirEntry { fid: dir.child_fid(), offset: dir.child_offset() });
    }

    let mut cursor = dir.next_offset();

    while cursor != ZERO {
        let second = read_second(store, cursor)?;

        out.push(DirEntry { fid: second.child_fid, offset: second.child_offset });

        cursor = second.next_offset;
    }

    Ok(out)
}
