/// Error type for the Xen driver.
pub enum Error {
    /// An error occurred in the Xen driver.
    Xen(xen::XenError),

    /// The mapping does not span exactly one page.
    InvalidMapping(usize),
}

impl From<xen::XenError> for Error {
    fn from(error: xen::XenError) -> Self {
        Self::Xen(error)
    }
}

impl From<Error> for std::io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Xen(error) => Self::other(error.to_string()),
            Error::InvalidMapping(len) => Self::new(
                std::io::ErrorKind::InvalidData,
                format!("foreign mapping of {len} bytes"),
            ),
        }
    }
}
