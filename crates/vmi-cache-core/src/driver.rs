use std::ops::DerefMut;

use crate::{Gfn, Protection};

/// A trait for implementing a foreign memory mapping primitive.
///
/// The driver owns whatever session state the hypervisor requires (control
/// interface, domain identifier) and maps single guest pages into the
/// address space of the calling process.
pub trait ForeignMemory {
    /// An owned mapping of one guest page.
    ///
    /// Dropping the value unmaps the page. The page cache drops every
    /// mapping exactly once.
    type Page: DerefMut<Target = [u8]>;

    /// Returns the size of a guest page in bytes.
    ///
    /// Mappings of any other size are rejected by the page cache.
    fn page_size(&self) -> usize;

    /// Maps exactly one guest page with the given protection.
    ///
    /// Failures carry the underlying OS error.
    fn map(&self, gfn: Gfn, protection: Protection) -> Result<Self::Page, std::io::Error>;
}

impl<T> ForeignMemory for &T
where
    T: ForeignMemory + ?Sized,
{
    type Page = T::Page;

    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn map(&self, gfn: Gfn, protection: Protection) -> Result<Self::Page, std::io::Error> {
        (**self).map(gfn, protection)
    }
}
