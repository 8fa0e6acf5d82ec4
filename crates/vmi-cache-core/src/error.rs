use crate::Gfn;

/// An error that can occur when mapping guest pages through the cache.
#[derive(thiserror::Error, Debug)]
pub enum MapError {
    /// The cache is not bound to a hypervisor session.
    #[error("The page cache is not bound to a session.")]
    NoSession,

    /// The foreign memory mapping primitive failed.
    #[error("Failed to map page {gfn}: {source}")]
    MapFailed {
        /// The page that could not be mapped.
        gfn: Gfn,

        /// The error reported by the mapping primitive.
        #[source]
        source: std::io::Error,
    },

    /// The page was mapped, but it is not backed by resident memory.
    #[error("Page not present ({gfn})")]
    PageNotPresent {
        /// The page that failed the residency check.
        gfn: Gfn,
    },

    /// The requested cache limit is below the allowed minimum.
    #[error("Cache limit {requested} is below the minimum of {minimum}")]
    LimitTooSmall {
        /// The rejected limit.
        requested: usize,

        /// The smallest accepted limit.
        minimum: usize,
    },

    /// Out of bounds.
    #[error("Out of bounds")]
    OutOfBounds,
}

impl MapError {
    /// Returns the status code this error reduces to.
    pub fn status(&self) -> MapStatus {
        match self {
            Self::PageNotPresent { .. } => MapStatus::PageNotPresent,
            _ => MapStatus::GenericFailure,
        }
    }
}

/// Outcome of a page acquisition, reduced to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapStatus {
    /// The page is mapped and its mapping was handed out.
    Success,

    /// The cache has no session, or the mapping primitive failed.
    GenericFailure,

    /// The page was mapped but is not resident, and has been unmapped again.
    PageNotPresent,
}

impl MapStatus {
    /// Reduces the result of an acquisition to its status code.
    pub fn of<T>(result: &Result<T, MapError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) => err.status(),
        }
    }
}

impl std::fmt::Display for MapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::GenericFailure => f.write_str("generic failure"),
            Self::PageNotPresent => f.write_str("page not present"),
        }
    }
}
