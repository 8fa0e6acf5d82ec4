use std::ops::{Deref, DerefMut};

use vmi_cache_core::{ForeignMemory, Gfn, Protection};
use xen::{XenDomainId, XenForeignMemory, XenForeignMemoryProtection};

use crate::{Error, XEN_PAGE_SIZE};

/// A guest page mapped through Xen foreign memory.
///
/// The page is unmapped when dropped.
pub struct XenPage(Box<dyn DerefMut<Target = [u8]>>);

impl Deref for XenPage {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for XenPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Foreign memory driver for a Xen domain.
pub struct XenForeignMemoryDriver {
    domain_id: XenDomainId,
    foreign_memory: XenForeignMemory,
}

impl XenForeignMemoryDriver {
    /// Opens the foreign memory interface for the given domain.
    pub fn new(domain_id: XenDomainId) -> Result<Self, Error> {
        let foreign_memory = XenForeignMemory::new()?;
        tracing::debug!(?domain_id, "foreign memory opened");

        Ok(Self {
            domain_id,
            foreign_memory,
        })
    }

    /// Returns the identifier of the mapped domain.
    pub fn domain_id(&self) -> XenDomainId {
        self.domain_id
    }

    fn map_page(&self, gfn: Gfn, protection: Protection) -> Result<XenPage, Error> {
        let page = self.foreign_memory.map(
            self.domain_id,
            protection.into_xen(),
            &[u64::from(gfn)],
            None,
        )?;

        if page.len() != XEN_PAGE_SIZE {
            return Err(Error::InvalidMapping(page.len()));
        }

        Ok(XenPage(Box::new(page)))
    }
}

impl ForeignMemory for XenForeignMemoryDriver {
    type Page = XenPage;

    fn page_size(&self) -> usize {
        XEN_PAGE_SIZE
    }

    fn map(&self, gfn: Gfn, protection: Protection) -> Result<Self::Page, std::io::Error> {
        Ok(self.map_page(gfn, protection)?)
    }
}

/// Crate-local conversion of protection flags.
trait IntoXen {
    fn into_xen(self) -> XenForeignMemoryProtection;
}

impl IntoXen for Protection {
    fn into_xen(self) -> XenForeignMemoryProtection {
        let mut result = XenForeignMemoryProtection::empty();

        if self.contains(Protection::R) {
            result |= XenForeignMemoryProtection::READ;
        }
        if self.contains(Protection::W) {
            result |= XenForeignMemoryProtection::WRITE;
        }

        result
    }
}
