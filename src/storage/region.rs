//! Page access regions
//!
//! Moves one page between the backing file and a caller buffer, either through the file
//! handle or through a `memmap2` mapping of exactly that page. A mapping is created and
//! dropped inside a single call and is never retained.

use crate::config::AccessMode;
use crate::Result;
use memmap2::MmapOptions;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Fill `buf` with the bytes at `offset`. The caller guarantees the range is in the file.
pub(crate) fn read_region(file: &File, mode: AccessMode, offset: u64, buf: &mut [u8]) -> Result<()> {
    match mode {
        AccessMode::Buffered => {
            let mut handle = file;
            handle.seek(SeekFrom::Start(offset))?;
            handle.read_exact(buf)?;
        }
        AccessMode::Mapped => {
            // SAFETY: the engine is the exclusive owner of the file and the mapping does
            // not outlive this call.
            let region = unsafe { MmapOptions::new().offset(offset).len(buf.len()).map(file)? };
            buf.copy_from_slice(&region);
        }
    }
    Ok(())
}

/// Write `data` at `offset`, growing the file if the range ends past its current length.
pub(crate) fn write_region(
    file: &File,
    mode: AccessMode,
    offset: u64,
    data: &[u8],
    sync: bool,
) -> Result<()> {
    match mode {
        AccessMode::Buffered => {
            let mut handle = file;
            handle.seek(SeekFrom::Start(offset))?;
            handle.write_all(data)?;
            if sync {
                file.sync_data()?;
            }
        }
        AccessMode::Mapped => {
            let end = offset + data.len() as u64;
            if file.metadata()?.len() < end {
                // A mapping past EOF faults on access; extend first.
                file.set_len(end)?;
            }
            // SAFETY: see read_region.
            let mut region =
                unsafe { MmapOptions::new().offset(offset).len(data.len()).map_mut(file)? };
            region.copy_from_slice(data);
            if sync {
                region.flush()?;
            }
        }
    }
    Ok(())
}
