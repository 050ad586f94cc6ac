//! Disk image collaborator contract.

use std::path::Path;

use bytes::Bytes;

use crate::error::Result;

/// Number of status bytes a drive reports.
pub const STATUS_LEN: usize = 4;

/// Backing store for one emulated drive.
///
/// Sector numbers are 1-based as on the wire. Sizes may vary per sector:
/// boot sectors are shorter than data sectors on double density images.
pub trait DiskImage: Send {
    /// Size of `sector`, or the image's nominal sector size for `None`.
    fn sector_size(&self, sector: Option<u16>) -> usize;

    fn sector_count(&self) -> usize;

    /// Contents of `sector`, exactly `sector_size(Some(sector))` bytes.
    fn sector(&self, sector: u16) -> Result<Bytes>;

    /// Replace the contents of `sector`.
    fn put_sector(&mut self, sector: u16, data: &[u8]) -> Result<()>;

    /// The four drive status bytes.
    fn status_bytes(&self) -> [u8; STATUS_LEN];

    /// Re-initialize with the given geometry, every byte set to 0xFF.
    fn format(&mut self, sector_size: usize, sector_count: usize) -> Result<()>;

    /// Name of the backing file, if any.
    fn filename(&self) -> Option<String>;

    fn is_read_only(&self) -> bool;

    /// Serialize the whole image.
    fn export_image(&self) -> Result<Bytes>;

    /// Replace the whole image with `data`, remembering `path` as its file.
    fn import_image(&mut self, data: &[u8], path: Option<&Path>) -> Result<()>;

    /// Persist to `path`, or to the remembered file.
    fn save_image(&mut self, path: Option<&Path>) -> Result<()>;

    /// Release the image contents.
    fn unload_image(&mut self) -> Result<()>;
}
