use std::ops::Range;

use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::{ForeignMemory, Gfn, MapError, MappingHandle, PageCache};

/// A reference to a cached guest page.
///
/// The page stays mapped while the guard is alive; dropping the guard
/// releases the reference. Because the guard borrows the cache, the cache
/// cannot be destroyed while the page is in use. The reference is owned by
/// the guard alone and cannot be released through
/// [`PageCache::release`].
///
/// Guest memory can change underneath the guard at any time, so the page is
/// accessed by copying rather than through slices.
pub struct PageGuard<'a, Driver>
where
    Driver: ForeignMemory,
{
    cache: &'a PageCache<Driver>,
    gfn: Gfn,
    handle: MappingHandle,
    len: usize,
}

impl<'a, Driver> PageGuard<'a, Driver>
where
    Driver: ForeignMemory,
{
    pub(crate) fn new(
        cache: &'a PageCache<Driver>,
        gfn: Gfn,
        handle: MappingHandle,
        len: usize,
    ) -> Self {
        Self {
            cache,
            gfn,
            handle,
            len,
        }
    }

    /// Returns the guest frame number of the page.
    pub fn gfn(&self) -> Gfn {
        self.gfn
    }

    /// Returns the mapping handle of the page.
    pub fn handle(&self) -> MappingHandle {
        self.handle
    }

    /// Returns the size of the mapping in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a raw pointer to the start of the mapping.
    ///
    /// The pointer must not be dereferenced after the guard is dropped.
    pub fn as_ptr(&self) -> *mut u8 {
        self.handle.0 as *mut u8
    }

    /// Reads bytes from the page, starting at `offset`.
    pub fn read(&self, offset: usize, buffer: &mut [u8]) -> Result<(), MapError> {
        let range = self.check_bounds(offset, buffer.len())?;

        self.cache.with_page(self.gfn, |page| match page.get(range) {
            Some(content) => {
                buffer.copy_from_slice(content);
                Ok(())
            }
            None => Err(MapError::OutOfBounds),
        })?
    }

    /// Writes bytes to the page, starting at `offset`.
    pub fn write(&self, offset: usize, content: &[u8]) -> Result<(), MapError> {
        let range = self.check_bounds(offset, content.len())?;

        self.cache.with_page(self.gfn, |page| match page.get_mut(range) {
            Some(target) => {
                target.copy_from_slice(content);
                Ok(())
            }
            None => Err(MapError::OutOfBounds),
        })?
    }

    /// Reads a 64-bit unsigned integer from the page.
    pub fn read_u64(&self, offset: usize) -> Result<u64, MapError> {
        let mut buffer = [0u8; 8];
        self.read(offset, &mut buffer)?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Writes a 64-bit unsigned integer to the page.
    pub fn write_u64(&self, offset: usize, value: u64) -> Result<(), MapError> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Reads a structure from the page.
    pub fn read_struct<T>(&self, offset: usize) -> Result<T, MapError>
    where
        T: FromBytes + IntoBytes,
    {
        let mut result = T::new_zeroed();
        self.read(offset, result.as_mut_bytes())?;
        Ok(result)
    }

    /// Writes a structure to the page.
    pub fn write_struct<T>(&self, offset: usize, value: &T) -> Result<(), MapError>
    where
        T: IntoBytes + Immutable,
    {
        self.write(offset, value.as_bytes())
    }

    fn check_bounds(&self, offset: usize, size: usize) -> Result<Range<usize>, MapError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len => Ok(offset..end),
            _ => Err(MapError::OutOfBounds),
        }
    }
}

impl<Driver> Drop for PageGuard<'_, Driver>
where
    Driver: ForeignMemory,
{
    fn drop(&mut self) {
        self.cache.release_guard(self.gfn);
    }
}

impl<Driver> std::fmt::Debug for PageGuard<'_, Driver>
where
    Driver: ForeignMemory,
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("gfn", &self.gfn)
            .field("handle", &self.handle)
            .field("len", &self.len)
            .finish()
    }
}
