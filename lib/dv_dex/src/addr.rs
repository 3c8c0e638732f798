//! Code address representation.

use serde::Serialize;
use std::fmt;

/// Address of an instruction, in 16-bit code units from the start of the method code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Addr(pub usize);

impl Addr {
    #[inline]
    #[must_use]
    pub const fn entry() -> Self {
        Self(0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl Addr {
    #[must_use]
    pub const fn offset(self, units: usize) -> Self {
        Self(self.0 + units)
    }
}
