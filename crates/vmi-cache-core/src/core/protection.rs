use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Protection requested for a foreign page mapping.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Protection: u8 {
        /// Read permission.
        const R = 0b00000001;

        /// Write permission.
        const W = 0b00000010;

        /// Combined Read and Write permissions.
        const RW = Self::R.bits() | Self::W.bits();
    }
}

impl std::fmt::Display for Protection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut result = [b'-'; 2];

        if self.contains(Protection::R) {
            result[0] = b'r';
        }
        if self.contains(Protection::W) {
            result[1] = b'w';
        }

        // SAFETY: The `result` array is always valid UTF-8.
        f.write_str(unsafe { std::str::from_utf8_unchecked(&result) })
    }
}
