//! Recursive FID/SFI collision checks (`SPEC_FULL.md` §4.4).

use crate::codec::node::FileType;
use crate::image::store::ImageStore;
use crate::status::StatusWord;
use crate::tlv::fcp::Fcp;

use super::walk::{children_of, peek_type, read_directory, read_ef, DirHeader};

/// Recursively scan every directory and EF reachable from `offset` (which
/// must be the MF) for `new_fid`.
fn scan_subtree(store: &mut ImageStore, offset: u16, is_root: bool, new_fid: u16) -> Result<bool, StatusWord> {
    let dir = read_directory(store, offset, is_root)?;

    if dir.fid() == new_fid {
        return Ok(true);
    }

    for entry in children_of(store, &dir)? {
        let kind = peek_type(store, entry.offset)?;

        if kind.is_directory() {
            if scan_subtree(store, entry.offset, false, new_fid)? {
                return Ok(true);
            }
        } else if entry.fid == new_fid {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Reject `new_fid` if it collides with the parent itself, or with any
/// FID already reachable in the scope appropriate to `new_type`:
///
/// - DF/ADF creations are checked globally, from the MF down — matching
///   `original_source/test.py`'s `check_fid_in_mf_and_children`.
/// - EF creations are checked only against the parent's direct children
///   (`DESIGN.md` Open Question 1: parent-local, matching the source's
///   `check_duplicate_fid_df`).
pub fn check_duplicate_fid(
    store: &mut ImageStore,
    mf_offset: u16,
    parent_offset: u16,
    parent_fid: u16,
    new_fid: u16,
    new_type: FileType,
) -> Result<(), StatusWord> {
    if new_fid == parent_fid {
        return Err(StatusWord::FileAlreadyExists);
    }

    let collides = if new_type.is_directory() {
        scan_subtree(store, mf_offset, true, new_fid)?
    } else {
        let parent_is_root = parent_offset == mf_offset;
        let parent = read_directory(store, parent_offset, parent_is_root)?;

        children_of(store, &parent)?.iter().any(|entry| entry.fid == new_fid)
    };

    if collides {
        Err(StatusWord::FileAlreadyExists)
    } else {
        Ok(())
    }
}

/// Reject `new_sfi` if any EF sibling already under `parent_offset`
/// resolves to the same SFI (its explicit `0x88` tag, or `FID & 0x1F` if
/// absent — `DESIGN.md` Open Question 6).
pub fn check_duplicate_sfi(
    store: &mut ImageStore,
    mf_offset: u16,
    parent_offset: u16,
    new_sfi: u8,
) -> Result<(), StatusWord> {
    let parent_is_root = parent_offset == mf_offset;
    let parent: DirHeader = read_directory(store, parent_offset, parent_is_root)?;

    for entry in children_of(store, &parent)? {
        let kind = peek_type(store, entry.offset)?;

        if !kind.is_ef() {
            continue;
        }

        let ef = read_ef(store, entry.offset)?;

        let raw = store
            .read_bytes(ef.fcp_offset as u64, ef.fcp_total_size as usize)
            .map_err(|_| StatusWord::TechnicalProblem)?;

        let sibling_fcp = Fcp::parse(&raw)?;

        let sibling_sfi = sibling_fcp.sfi.unwrap_or((entry.fid & 0x1F) as u8);

        if sibling_sfi == new_sfi {
            return Err(StatusWord::FileAlreadyExists);
        }
    }

    Ok(())
}
