use super::macros::impl_ops;

impl_ops!(Gfn, u64, "Guest Frame Number");
impl_ops!(
    MappingHandle,
    usize,
    "process-local address of a mapped guest page"
);

impl MappingHandle {
    /// Creates a handle from the address of a mapping.
    pub fn from_ptr(ptr: *const u8) -> Self {
        Self(ptr as usize)
    }

    /// Checks if the handle refers to the NULL address.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}
