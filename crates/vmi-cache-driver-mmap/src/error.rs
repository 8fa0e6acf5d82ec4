/// Error type for the memory image driver.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred.
    Io(std::io::Error),

    /// The memory image is empty or not a multiple of the page size.
    InvalidImage,

    /// The page lies outside of the memory image.
    OutOfBounds,

    /// A writable mapping was requested from a read-only image.
    ReadOnly,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        use std::io::ErrorKind;

        match value {
            Error::Io(value) => value,
            Error::InvalidImage => {
                Self::new(ErrorKind::InvalidData, "invalid memory image size")
            }
            Error::OutOfBounds => {
                Self::new(ErrorKind::InvalidInput, "page outside of the memory image")
            }
            Error::ReadOnly => Self::new(ErrorKind::PermissionDenied, "memory image is read-only"),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(value) => write!(f, "{value}"),
            Self::InvalidImage => f.write_str("invalid memory image size"),
            Self::OutOfBounds => f.write_str("page outside of the memory image"),
            Self::ReadOnly => f.write_str("memory image is read-only"),
        }
    }
}

impl std::error::Error for Error {}
