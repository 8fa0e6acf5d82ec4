//! Residency checks for freshly mapped foreign pages.
//!
//! On Linux kernels older than 4.0, a foreign mapping request can succeed
//! even though the privcmd driver did not populate the mapping with a
//! fault-capable page. Touching such a page kills the monitoring process, so
//! the cache asks the kernel whether the page is resident before handing it
//! out. Newer kernels report the failure from the mapping call itself and
//! the check is skipped.

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};

/// Path of the kernel release string.
const OSRELEASE: &str = "/proc/sys/kernel/osrelease";

/// First kernel major version that reports unpopulated foreign mappings
/// from the mapping call.
const TRUSTED_MAJOR: u32 = 4;

/// Version of the running host kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KernelVersion {
    /// Major version number.
    pub major: u32,

    /// Minor version number.
    pub minor: u32,
}

impl KernelVersion {
    /// Creates a new kernel version.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parses a kernel release string such as `5.15.0-91-generic`.
    ///
    /// Only the leading numeric components are considered. Returns `None`
    /// if the string does not start with a major version number.
    pub fn parse(release: &str) -> Option<Self> {
        let mut parts = release.trim().split(|c: char| !c.is_ascii_digit());

        let major = parts.next()?.parse().ok()?;
        let minor = parts
            .next()
            .and_then(|minor| minor.parse().ok())
            .unwrap_or(0);

        Some(Self { major, minor })
    }

    /// Reads the version of the running kernel.
    ///
    /// Failures are logged and reported as `None`.
    pub fn detect() -> Option<Self> {
        Self::read_from(OSRELEASE)
    }

    /// Reads a kernel release string from the given file.
    pub fn read_from(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        let release = match std::fs::read_to_string(path) {
            Ok(release) => release,
            Err(err) => {
                tracing::error!(path = %path.display(), %err, "cannot access kernel release");
                return None;
            }
        };

        let version = Self::parse(&release);
        if version.is_none() {
            tracing::error!(release = release.trim(), "cannot parse kernel release");
        }

        version
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Policy deciding whether mapped pages are probed for residency.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResidencyCheck {
    /// A successful mapping is trusted to be backed by memory.
    #[default]
    Trust,

    /// Every new mapping is probed with a [`ResidencyProbe`].
    Probe,
}

impl ResidencyCheck {
    /// Selects the policy for the given host kernel.
    ///
    /// Kernels older than 4.0 are probed. Newer kernels, as well as kernels
    /// whose version could not be determined, are trusted.
    pub fn for_kernel(version: Option<KernelVersion>) -> Self {
        match version {
            Some(version) if version.major < TRUSTED_MAJOR => Self::Probe,
            _ => Self::Trust,
        }
    }
}

/// A trait for querying whether a range of mapped memory is resident.
pub trait ResidencyProbe {
    /// Checks whether every page in `[ptr, ptr + len)` is resident.
    ///
    /// `ptr` must be page aligned.
    fn is_resident(&self, ptr: *const u8, len: usize) -> std::io::Result<bool>;
}

/// Residency probe backed by `mincore(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mincore;

impl ResidencyProbe for Mincore {
    fn is_resident(&self, ptr: *const u8, len: usize) -> std::io::Result<bool> {
        // SAFETY: `sysconf` has no preconditions.
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            size if size > 0 => size as usize,
            _ => return Err(std::io::Error::last_os_error()),
        };

        let mut vec = vec![0u8; len.div_ceil(page_size)];

        // SAFETY: `vec` holds one byte per page of the queried range.
        let result =
            unsafe { libc::mincore(ptr as *mut libc::c_void, len, vec.as_mut_ptr().cast()) };

        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }

        Ok(vec.iter().all(|&page| page & 0x01 != 0))
    }
}
