//! In-memory disk image.
//!
//! Sectors are kept as plain buffers; export/import use a headerless raw
//! sector dump (every sector back to back, boot sectors at their short
//! size). Sector numbering starts at 1.

use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};

use super::image::{DiskImage, STATUS_LEN};
use crate::error::{Result, SioError};

/// Sector size of single (and enhanced) density disks.
pub const SINGLE_DENSITY_SECTOR_SIZE: usize = 128;

/// Sector size of double density disks.
pub const DOUBLE_DENSITY_SECTOR_SIZE: usize = 256;

/// Sector count of a standard single density disk.
pub const DEFAULT_SECTOR_COUNT: usize = 720;

/// Sector count of an enhanced density disk.
pub const ENHANCED_SECTOR_COUNT: usize = 1040;

/// Boot sectors stay at 128 bytes whatever the density.
pub const BOOT_SECTORS: u16 = 3;

/// Sector counts of double density drives (single and double sided).
const DOUBLE_DENSITY_SECTOR_COUNTS: [usize; 2] = [720, 1440];

const STATUS_MOTOR_ON: u8 = 0x10;
const STATUS_DOUBLE_DENSITY: u8 = 0x20;
const STATUS_WRITE_PROTECTED: u8 = 0x08;
const STATUS_ENHANCED_DENSITY: u8 = 0x80;
const STATUS_CONTROLLER_OK: u8 = 0xFF;
const STATUS_FORMAT_TIMEOUT: u8 = 0xE0;

/// Disk image held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    sector_size: usize,
    /// Sector `n` lives at index `n - 1`.
    sectors: Vec<Vec<u8>>,
    path: Option<PathBuf>,
    read_only: bool,
    dirty: bool,
}

impl MemoryImage {
    /// Blank (zero-filled) image.
    pub fn new(sector_size: usize, sector_count: usize) -> Self {
        let sectors = (1..=sector_count)
            .map(|n| vec![0u8; sector_len(sector_size, n)])
            .collect();
        Self {
            sector_size,
            sectors,
            path: None,
            read_only: false,
            dirty: false,
        }
    }

    /// Load a raw sector dump from disk.
    ///
    /// The image is read-only if the file is.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let read_only = std::fs::metadata(path)?.permissions().readonly();

        let mut image = Self::default();
        image.import_image(&data, Some(path))?;
        image.read_only = read_only;
        Ok(image)
    }

    /// Build a raw sector dump.
    pub fn from_raw(data: &[u8]) -> Result<Self> {
        let mut image = Self::default();
        image.import_image(data, None)?;
        Ok(image)
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// True if modified since load/save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn index(&self, sector: u16) -> Result<usize> {
        let n = sector as usize;
        if n == 0 || n > self.sectors.len() {
            return Err(SioError::Image(format!(
                "sector {} out of range 1-{}",
                sector,
                self.sectors.len()
            )));
        }
        Ok(n - 1)
    }
}

impl Default for MemoryImage {
    /// Single density, 720 sectors.
    fn default() -> Self {
        Self::new(SINGLE_DENSITY_SECTOR_SIZE, DEFAULT_SECTOR_COUNT)
    }
}

/// Length of sector `n` on an image with the given nominal size.
fn sector_len(sector_size: usize, n: usize) -> usize {
    if n <= BOOT_SECTORS as usize {
        sector_size.min(SINGLE_DENSITY_SECTOR_SIZE)
    } else {
        sector_size
    }
}

/// Infer `(sector_size, sector_count)` from a raw dump length.
///
/// Double density dumps keep three short boot sectors, which leaves them
/// 128 bytes past a multiple of 256. Single density dumps with an odd sector
/// count share that remainder, so a dump only counts as double density when
/// it also adds up to a double density drive's sector count.
fn infer_geometry(len: usize) -> Result<(usize, usize)> {
    let boot = BOOT_SECTORS as usize * SINGLE_DENSITY_SECTOR_SIZE;

    if len == 0 || len % SINGLE_DENSITY_SECTOR_SIZE != 0 {
        return Err(SioError::Image(format!(
            "raw image length {} is not a multiple of {}",
            len, SINGLE_DENSITY_SECTOR_SIZE
        )));
    }

    if len > boot && len % DOUBLE_DENSITY_SECTOR_SIZE == SINGLE_DENSITY_SECTOR_SIZE {
        let count = BOOT_SECTORS as usize + (len - boot) / DOUBLE_DENSITY_SECTOR_SIZE;
        if DOUBLE_DENSITY_SECTOR_COUNTS.contains(&count) {
            return Ok((DOUBLE_DENSITY_SECTOR_SIZE, count));
        }
    }

    Ok((SINGLE_DENSITY_SECTOR_SIZE, len / SINGLE_DENSITY_SECTOR_SIZE))
}

impl DiskImage for MemoryImage {
    fn sector_size(&self, sector: Option<u16>) -> usize {
        match sector {
            Some(n) => sector_len(self.sector_size, n as usize),
            None => self.sector_size,
        }
    }

    fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    fn sector(&self, sector: u16) -> Result<Bytes> {
        let index = self.index(sector)?;
        Ok(Bytes::copy_from_slice(&self.sectors[index]))
    }

    fn put_sector(&mut self, sector: u16, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(SioError::Image("image is read-only".to_string()));
        }

        let index = self.index(sector)?;
        let len = self.sector_size(Some(sector));
        let mut buf = data[..data.len().min(len)].to_vec();
        buf.resize(len, 0);

        self.sectors[index] = buf;
        self.dirty = true;
        Ok(())
    }

    fn status_bytes(&self) -> [u8; STATUS_LEN] {
        let mut flags = STATUS_MOTOR_ON;
        if self.sector_size == DOUBLE_DENSITY_SECTOR_SIZE {
            flags |= STATUS_DOUBLE_DENSITY;
        }
        if self.sector_size == SINGLE_DENSITY_SECTOR_SIZE
            && self.sectors.len() == ENHANCED_SECTOR_COUNT
        {
            flags |= STATUS_ENHANCED_DENSITY;
        }
        if self.read_only {
            flags |= STATUS_WRITE_PROTECTED;
        }
        [flags, STATUS_CONTROLLER_OK, STATUS_FORMAT_TIMEOUT, 0x00]
    }

    fn format(&mut self, sector_size: usize, sector_count: usize) -> Result<()> {
        if self.read_only {
            return Err(SioError::Image("image is read-only".to_string()));
        }
        if sector_size == 0 {
            return Err(SioError::Image("sector size must be non-zero".to_string()));
        }

        self.sector_size = sector_size;
        self.sectors = (1..=sector_count)
            .map(|n| vec![0xFF; sector_len(sector_size, n)])
            .collect();
        self.dirty = true;
        Ok(())
    }

    fn filename(&self) -> Option<String> {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn export_image(&self) -> Result<Bytes> {
        let total = self.sectors.iter().map(Vec::len).sum();
        let mut out = BytesMut::with_capacity(total);
        for sector in &self.sectors {
            out.put_slice(sector);
        }
        Ok(out.freeze())
    }

    fn import_image(&mut self, data: &[u8], path: Option<&Path>) -> Result<()> {
        let (sector_size, sector_count) = infer_geometry(data.len())?;

        let mut sectors = Vec::with_capacity(sector_count);
        let mut offset = 0;
        for n in 1..=sector_count {
            let len = sector_len(sector_size, n);
            sectors.push(data[offset..offset + len].to_vec());
            offset += len;
        }

        self.sector_size = sector_size;
        self.sectors = sectors;
        self.path = path.map(Path::to_path_buf);
        self.dirty = false;

        tracing::debug!(
            "Imported image: {} sectors of {} bytes",
            sector_count,
            sector_size
        );
        Ok(())
    }

    fn save_image(&mut self, path: Option<&Path>) -> Result<()> {
        let target = match path.or(self.path.as_deref()) {
            Some(p) => p.to_path_buf(),
            None => return Err(SioError::Image("no file to save to".to_string())),
        };

        let data = self.export_image()?;
        std::fs::write(&target, &data)?;

        self.path = Some(target);
        self.dirty = false;
        Ok(())
    }

    fn unload_image(&mut self) -> Result<()> {
        self.sectors.clear();
        self.path = None;
        self.dirty = false;
        Ok(())
    }
}
