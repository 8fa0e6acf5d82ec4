//! Page cache driver for raw guest memory images.
//!
//! The image is a flat copy of guest physical memory, where the page with
//! GFN `n` starts at offset `n * 4096`. Pages are mapped individually with
//! `mmap(2)`, so the driver behaves like a foreign memory interface without
//! requiring a running hypervisor.

mod driver;
mod error;

pub use self::{
    driver::{MmapForeignMemory, MmapPage},
    error::Error,
};
