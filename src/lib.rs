//! Reference-counted foreign page mapping cache for Virtual Machine
//! Introspection.
//!
//! This crate re-exports [`vmi_cache_core`] and the available drivers.
//!
//! ```no_run
//! use vmi_cache::{Gfn, PageCache, driver::mmap::MmapForeignMemory};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let driver = MmapForeignMemory::open("guest.raw")?;
//! let cache = PageCache::new(driver);
//!
//! let page = cache.get(Gfn(0x1000))?;
//! println!("{:#x}", page.read_u64(0)?);
//! # Ok(())
//! # }
//! ```

pub use vmi_cache_core::*;

/// Foreign memory drivers.
pub mod driver {
    /// Driver for raw guest memory images.
    #[cfg(feature = "driver-mmap")]
    pub mod mmap {
        pub use vmi_cache_driver_mmap::*;
    }

    /// Driver for Xen foreign memory.
    #[cfg(feature = "driver-xen")]
    pub mod xen {
        pub use vmi_cache_driver_xen::*;
    }
}
