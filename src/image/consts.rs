//! Fixed layout constants for the 32 KiB backing image.

/// Total size of the backing image, in bytes.
pub const FILE_SIZE: u64 = 32768;

/// Offset of the two-byte root pointer.
pub const ROOT_PTR_OFFSET: u64 = 0x0000;

/// Offset at which the MF node is written when the card is blank.
pub const MF_OFFSET: u16 = 0x0002;

/// Offset of the persisted write cursor (last four bytes of the image).
pub const WRITE_CURSOR_OFFSET: u64 = FILE_SIZE - 4;

/// Offset of the persisted read cursor.
pub const READ_CURSOR_OFFSET: u64 = FILE_SIZE - 2;

/// Sentinel meaning "no offset / no FID".
pub const C_NULL: u16 = 0xFFFF;

/// Sentinel marking an empty slot inside a node (e.g. `ChildFID == ZERO`).
pub const ZERO: u16 = 0x0000;

/// The mandatory Master File identifier.
pub const MF_FID: u16 = 0x3F00;
