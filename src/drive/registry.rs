//! Drive registry - the eight drive slots.
//!
//! Every operation validates the drive index (0-7) first and fails with
//! `InvalidDriveIndex` outside that range, then `NoDriveImage` if the slot
//! is empty.
//!
//! # Example
//!
//! ```
//! use sio_drive::drive::{DriveRegistry, MemoryImage};
//!
//! let mut registry = DriveRegistry::new();
//! registry.bind(0, Box::new(MemoryImage::default())).unwrap();
//!
//! assert_eq!(registry.status(0).unwrap(), [0x10, 0xFF, 0xE0, 0x00]);
//! assert!(registry.status(1).is_err());
//! assert!(registry.status(8).is_err());
//! ```

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::image::{DiskImage, STATUS_LEN};
use super::memory::MemoryImage;
use crate::error::{Result, SioError};
use crate::protocol::MAX_DRIVES;

/// Creates the image bound when an empty slot is formatted or imported into.
pub type ImageFactory = Box<dyn Fn() -> Box<dyn DiskImage> + Send + Sync>;

/// Summary of one bound drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveStatus {
    pub filename: Option<String>,
    pub sector_count: usize,
    /// Size of the last sector (boot sectors may be shorter).
    pub sector_size: usize,
    pub read_only: bool,
}

/// Summary of all slots; `None` for empty ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub drives: Vec<Option<DriveStatus>>,
}

impl StatusReport {
    /// Number of bound drives.
    pub fn bound(&self) -> usize {
        self.drives.iter().filter(|d| d.is_some()).count()
    }
}

/// Owner of the drive slots.
pub struct DriveRegistry {
    slots: Vec<Option<Box<dyn DiskImage>>>,
    factory: ImageFactory,
}

impl DriveRegistry {
    /// Create a registry with eight empty slots.
    ///
    /// Empty slots that get formatted receive a default [`MemoryImage`].
    pub fn new() -> Self {
        Self::with_factory(Box::new(|| Box::new(MemoryImage::default())))
    }

    /// Create a registry with a custom default-image factory.
    pub fn with_factory(factory: ImageFactory) -> Self {
        Self {
            slots: (0..MAX_DRIVES).map(|_| None).collect(),
            factory,
        }
    }

    fn check_index(index: usize) -> Result<()> {
        if index >= MAX_DRIVES {
            return Err(SioError::InvalidDriveIndex(index));
        }
        Ok(())
    }

    fn image(&self, index: usize) -> Result<&dyn DiskImage> {
        Self::check_index(index)?;
        self.slots[index]
            .as_deref()
            .ok_or(SioError::NoDriveImage(index))
    }

    fn image_mut(&mut self, index: usize) -> Result<&mut Box<dyn DiskImage>> {
        Self::check_index(index)?;
        self.slots[index]
            .as_mut()
            .ok_or(SioError::NoDriveImage(index))
    }

    /// Bind an image to a slot, returning the one it replaces.
    pub fn bind(
        &mut self,
        index: usize,
        image: Box<dyn DiskImage>,
    ) -> Result<Option<Box<dyn DiskImage>>> {
        Self::check_index(index)?;
        Ok(self.slots[index].replace(image))
    }

    /// Empty a slot, returning its image.
    pub fn unbind(&mut self, index: usize) -> Result<Option<Box<dyn DiskImage>>> {
        Self::check_index(index)?;
        Ok(self.slots[index].take())
    }

    /// Check if a slot holds an image. False for invalid indices.
    pub fn is_bound(&self, index: usize) -> bool {
        self.slots.get(index).map_or(false, Option::is_some)
    }

    pub fn status(&self, index: usize) -> Result<[u8; STATUS_LEN]> {
        Ok(self.image(index)?.status_bytes())
    }

    pub fn read_sector(&self, index: usize, sector: u16) -> Result<Bytes> {
        self.image(index)?.sector(sector)
    }

    /// Write a sector, clipping `data` to the sector's size.
    pub fn write_sector(&mut self, index: usize, sector: u16, data: &[u8]) -> Result<()> {
        let image = self.image_mut(index)?;
        let size = image.sector_size(Some(sector));
        image.put_sector(sector, &data[..data.len().min(size)])
    }

    /// Format the drive, binding a default image first if the slot is empty.
    ///
    /// Returns the 0xFF-filled block sent back to the host.
    pub fn format(&mut self, index: usize) -> Result<Bytes> {
        Self::check_index(index)?;
        if self.slots[index].is_none() {
            tracing::info!("Creating default image for drive {}", index + 1);
            self.slots[index] = Some((self.factory)());
        }

        let image = self.image_mut(index)?;
        let size = image.sector_size(None);
        let count = image.sector_count();
        image.format(size, count)?;

        Ok(Bytes::from(vec![0xFF; size]))
    }

    pub fn sector_size(&self, index: usize, sector: Option<u16>) -> Result<usize> {
        Ok(self.image(index)?.sector_size(sector))
    }

    pub fn sector_count(&self, index: usize) -> Result<usize> {
        Ok(self.image(index)?.sector_count())
    }

    /// Load a raw image file into a slot.
    pub fn load(&mut self, index: usize, path: impl AsRef<Path>) -> Result<()> {
        Self::check_index(index)?;
        let image = MemoryImage::open(path)?;
        self.slots[index] = Some(Box::new(image));
        Ok(())
    }

    /// Serialize the slot's image.
    pub fn export_image(&self, index: usize) -> Result<Bytes> {
        self.image(index)?.export_image()
    }

    /// Replace the slot's image contents, creating a default image if empty.
    ///
    /// An empty slot stays empty if the import fails.
    pub fn import_image(&mut self, index: usize, data: &[u8], path: Option<&Path>) -> Result<()> {
        Self::check_index(index)?;
        if let Some(image) = self.slots[index].as_mut() {
            return image.import_image(data, path);
        }

        let mut image = (self.factory)();
        image.import_image(data, path)?;
        self.slots[index] = Some(image);
        Ok(())
    }

    /// Persist the slot's image to `path` or its own file.
    pub fn save_image(&mut self, index: usize, path: Option<&Path>) -> Result<()> {
        self.image_mut(index)?.save_image(path)
    }

    /// Unload the slot's image and empty the slot.
    pub fn unload(&mut self, index: usize) -> Result<()> {
        self.image_mut(index)?.unload_image()?;
        self.slots[index] = None;
        Ok(())
    }

    /// Summary of every slot.
    pub fn status_report(&self) -> StatusReport {
        let drives = self
            .slots
            .iter()
            .map(|slot| {
                slot.as_deref().map(|image| {
                    let sector_count = image.sector_count();
                    let last = u16::try_from(sector_count).ok();
                    DriveStatus {
                        filename: image.filename(),
                        sector_count,
                        sector_size: image.sector_size(last),
                        read_only: image.is_read_only(),
                    }
                })
            })
            .collect();

        StatusReport { drives }
    }
}

impl Default for DriveRegistry {
    fn default() -> Self {
        Self::new()
    }
}
