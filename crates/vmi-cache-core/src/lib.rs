//! Foreign page mapping cache for Virtual Machine Introspection.
//!
//! Introspection tools read and write guest memory one page at a time.
//! Mapping a guest page into the monitoring process is a privileged and
//! comparatively expensive hypervisor operation, and the number of live
//! mappings is a scarce resource. [`PageCache`] keeps recently used
//! mappings alive, hands out references to them and evicts unreferenced
//! mappings once a configurable limit is reached.
//!
//! The mapping primitive is supplied by a [`ForeignMemory`] driver. On hosts
//! where a successful mapping does not guarantee a populated page, new
//! mappings are validated with a [`ResidencyProbe`].

mod cache;
mod core;
mod driver;
mod error;
mod metrics;
mod page;
mod residency;

pub use self::{
    cache::{PageCache, PageCacheOptions},
    core::{Gfn, MappingHandle, Protection},
    driver::ForeignMemory,
    error::{MapError, MapStatus},
    metrics::{Counters, Metrics, NoMetrics},
    page::PageGuard,
    residency::{KernelVersion, Mincore, ResidencyCheck, ResidencyProbe},
};
