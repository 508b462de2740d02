use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::Context;

use super::consts::*;
use crate::status::StatusWord;

/// The fixed-size backing image: a flat 32 KiB byte array persisted to a
/// single file, plus the cursor allocator that carves space out of it.
///
/// All reads/writes go directly against the open `File`; there is no
/// buffering layer, and every mutation is flushed before returning so a
/// crash between APDUs leaves the image exactly as the most recently
/// completed APDU left it.
#[derive(Debug)]
pub struct ImageStore {
    file: File,
}

impl ImageStore {
    /// Open the backing image at `path`, creating and initialising a
    /// fresh one if it doesn't exist yet.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        let is_new = !path.exists();

        let mut file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open backing image at {}", path.display()))?;

        let len = file
            .seek(SeekFrom::End(0))
            .context("failed to seek backing image")?;

        if is_new || len == 0 {
            Self::initialize(&mut file)?;
        } else if len != FILE_SIZE {
            anyhow::bail!(
                "backing image at {} has size {len}, expected {FILE_SIZE}",
                path.display()
            );
        }

        let mut store = Self { file };

        store.repair_cursors_if_corrupt()?;

        Ok(store)
    }

    fn initialize(file: &mut File) -> anyhow::Result<()> {
        file.seek(SeekFrom::Start(0))
            .context("failed to seek fresh backing image")?;

        file.write_all(&vec![0xFFu8; FILE_SIZE as usize])
            .context("failed to initialize fresh backing image")?;

        file.seek(SeekFrom::Start(ROOT_PTR_OFFSET))
            .context("failed to seek to root pointer")?;

        file.write_all(&C_NULL.to_be_bytes())
            .context("failed to initialize root pointer")?;

        file.seek(SeekFrom::Start(WRITE_CURSOR_OFFSET))
            .context("failed to seek to cursors")?;

        file.write_all(&[0u8; 4])
            .context("failed to initialize cursors")?;

        file.flush().context("failed to flush fresh backing image")?;

        Ok(())
    }

    /// Reset the persisted cursors to zero if they're out of range. This
    /// is deliberately permissive: existing node data is left untouched.
    fn repair_cursors_if_corrupt(&mut self) -> anyhow::Result<()> {
        if self.write_cursor() as u64 > FILE_SIZE - 4 {
            self.set_write_cursor(0);
            self.set_read_cursor(0);
        }

        Ok(())
    }

    fn seek_read(&mut self, offset: u64, buf: &mut [u8]) -> anyhow::Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed to seek to offset 0x{offset:04x}"))?;

        self.file
            .read_exact(buf)
            .with_context(|| format!("failed to read {} bytes at offset 0x{offset:04x}", buf.len()))?;

        Ok(())
    }

    fn seek_write(&mut self, offset: u64, bytes: &[u8]) -> anyhow::Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed to seek to offset 0x{offset:04x}"))?;

        self.file
            .write_all(bytes)
            .with_context(|| format!("failed to write {} bytes at offset 0x{offset:04x}", bytes.len()))?;

        self.file.flush().context("failed to flush backing image")?;

        Ok(())
    }

    pub fn read_u8(&mut self, offset: u64) -> anyhow::Result<u8> {
        let mut buf = [0u8; 1];

        self.seek_read(offset, &mut buf)?;

        Ok(buf[0])
    }

    pub fn read_u16_be(&mut self, offset: u64) -> anyhow::Result<u16> {
        let mut buf = [0u8; 2];

        self.seek_read(offset, &mut buf)?;

        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_bytes(&mut self, offset: u64, length: usize) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![0u8; length];

        self.seek_read(offset, &mut buf)?;

        Ok(buf)
    }

    pub fn write_u8(&mut self, offset: u64, value: u8) -> anyhow::Result<()> {
        self.seek_write(offset, &[value])
    }

    pub fn write_u16_be(&mut self, offset: u64, value: u16) -> anyhow::Result<()> {
        self.seek_write(offset, &value.to_be_bytes())
    }

    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) -> anyhow::Result<()> {
        self.seek_write(offset, bytes)
    }

    pub fn root_pointer(&mut self) -> u16 {
        self.read_u16_be(ROOT_PTR_OFFSET)
            .unwrap_or_else(|err| panic!("failed to read root pointer: {err}"))
    }

    pub fn set_root_pointer(&mut self, offset: u16) {
        self.write_u16_be(ROOT_PTR_OFFSET, offset)
            .unwrap_or_else(|err| panic!("failed to write root pointer: {err}"))
    }

    pub fn write_cursor(&mut self) -> u16 {
        self.read_u16_be(WRITE_CURSOR_OFFSET)
            .unwrap_or_else(|err| panic!("failed to read write cursor: {err}"))
    }

    fn set_write_cursor(&mut self, offset: u16) {
        self.write_u16_be(WRITE_CURSOR_OFFSET, offset)
            .unwrap_or_else(|err| panic!("failed to write write cursor: {err}"))
    }

    pub fn read_cursor(&mut self) -> u16 {
        self.read_u16_be(READ_CURSOR_OFFSET)
            .unwrap_or_else(|err| panic!("failed to read read cursor: {err}"))
    }

    pub fn set_read_cursor(&mut self, offset: u16) {
        self.write_u16_be(READ_CURSOR_OFFSET, offset)
            .unwrap_or_else(|err| panic!("failed to write read cursor: {err}"))
    }

    /// Bytes still free between the write cursor and the cursor region.
    pub fn available(&mut self) -> u16 {
        (WRITE_CURSOR_OFFSET as u16).saturating_sub(self.write_cursor())
    }

    /// Reserve `length` contiguous bytes starting at the current write
    /// cursor, advance and persist the cursor, and return the offset the
    /// caller should write at.
    ///
    /// On failure after a prior successful `allocate` in the same CREATE
    /// FILE, the cursor is **not** rewound — see `DESIGN.md` Open
    /// Question 2.
    pub fn allocate(&mut self, length: u16) -> Result<u16, StatusWord> {
        let cursor = self.write_cursor();

        let end = cursor
            .checked_add(length)
            .filter(|end| *end as u64 <= WRITE_CURSOR_OFFSET)
            .ok_or(StatusWord::NotEnoughMemory)?;

        self.set_write_cursor(end);

        Ok(cursor)
    }

    /// Reserve the MF's fixed home at [`MF_OFFSET`] and bump the cursor
    /// past it. Only valid while the image is pristine (write cursor at
    /// zero, no MF yet) — the caller has already checked the root
    /// pointer is [`C_NULL`] before calling this.
    pub fn allocate_mf(&mut self, length: u16) -> Result<u16, StatusWord> {
        let end = MF_OFFSET
            .checked_add(length)
            .filter(|end| *end as u64 <= WRITE_CURSOR_OFFSET)
            .ok_or(StatusWord::NotEnoughMemory)?;

        self.set_write_cursor(end);

        Ok(MF_OFFSET)
    }
}
