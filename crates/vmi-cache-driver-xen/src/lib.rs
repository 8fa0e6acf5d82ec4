//! Xen foreign memory driver for the VMI page cache.
//!
//! The driver is only available with the `foreign-memory` feature, which
//! links against the Xen userspace libraries.

#[cfg(feature = "foreign-memory")]
mod driver;
#[cfg(feature = "foreign-memory")]
mod error;

#[cfg(feature = "foreign-memory")]
pub use self::{
    driver::{XenForeignMemoryDriver, XenPage},
    error::Error,
};

/// Size of a Xen guest page in bytes.
pub const XEN_PAGE_SIZE: usize = 4096;
