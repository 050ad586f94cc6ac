//! Drive module - disk images and the slot registry.
//!
//! Provides:
//! - [`DiskImage`] - the contract a drive's backing store fulfils
//! - [`MemoryImage`] - an in-memory image with raw-dump import/export
//! - [`DriveRegistry`] - the eight bounds-checked drive slots

mod image;
mod memory;
mod registry;

pub use image::{DiskImage, STATUS_LEN};
pub use memory::{
    MemoryImage, BOOT_SECTORS, DEFAULT_SECTOR_COUNT, DOUBLE_DENSITY_SECTOR_SIZE,
    ENHANCED_SECTOR_COUNT, SINGLE_DENSITY_SECTOR_SIZE,
};
pub use registry::{DriveRegistry, DriveStatus, ImageFactory, StatusReport};
