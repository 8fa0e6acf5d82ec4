use std::{
    fs::{File, OpenOptions},
    ops::{Deref, DerefMut},
    path::Path,
};

use memmap2::{MmapMut, MmapOptions};
use vmi_cache_core::{ForeignMemory, Gfn, Protection};

use crate::Error;

const PAGE_SIZE: u64 = 4096;

/// A page of a memory image, mapped into the current process.
///
/// The page is unmapped when dropped.
pub struct MmapPage(MmapMut);

impl Deref for MmapPage {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for MmapPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Foreign memory driver for a raw guest memory image.
///
/// Writable mappings are shared with the image file. Read-only mappings are
/// private copies; writes through them never reach the image.
pub struct MmapForeignMemory {
    file: File,
    pages: u64,
    writable: bool,
}

impl MmapForeignMemory {
    /// Opens a memory image for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, true)
    }

    /// Opens a memory image for reading only.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path)?;
        Self::from_file(file, false)
    }

    /// Creates a driver from an already opened memory image.
    ///
    /// `writable` must only be set if the file was opened for writing.
    pub fn from_file(file: File, writable: bool) -> Result<Self, Error> {
        let size = file.metadata()?.len();

        if size == 0 || !size.is_multiple_of(PAGE_SIZE) {
            return Err(Error::InvalidImage);
        }

        let pages = size / PAGE_SIZE;
        tracing::debug!(pages, writable, "memory image opened");

        Ok(Self {
            file,
            pages,
            writable,
        })
    }

    /// Returns the highest GFN contained in the image.
    pub fn max_gfn(&self) -> Gfn {
        Gfn(self.pages - 1)
    }

    /// Checks if the image accepts writable mappings.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn map_page(&self, gfn: Gfn, protection: Protection) -> Result<MmapPage, Error> {
        if gfn > self.max_gfn() {
            return Err(Error::OutOfBounds);
        }

        let mut options = MmapOptions::new();
        options.offset(gfn.0 * PAGE_SIZE).len(PAGE_SIZE as usize);

        let mmap = if protection.contains(Protection::W) {
            if !self.writable {
                return Err(Error::ReadOnly);
            }

            // SAFETY: The range lies within the file. Concurrent modification
            //         of the image is inherent to introspection and every
            //         access through the cache copies the data.
            unsafe { options.map_mut(&self.file)? }
        } else {
            // SAFETY: See above.
            unsafe { options.map_copy(&self.file)? }
        };

        Ok(MmapPage(mmap))
    }
}

impl ForeignMemory for MmapForeignMemory {
    type Page = MmapPage;

    fn page_size(&self) -> usize {
        PAGE_SIZE as usize
    }

    fn map(&self, gfn: Gfn, protection: Protection) -> Result<Self::Page, std::io::Error> {
        Ok(self.map_page(gfn, protection)?)
    }
}
