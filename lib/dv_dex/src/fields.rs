//! Dalvik fields data structures.

use crate::types::DexType;
use std::fmt;

/// Symbolic reference to a field, as found in field access instructions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldRef {
    definer: DexType,
    name: String,
    type_: DexType,
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}->{}:{}", self.definer, self.name, self.type_)
    }
}

impl FieldRef {
    #[must_use]
    pub fn new(definer: DexType, name: &str, type_: DexType) -> Self {
        Self {
            definer,
            name: name.to_string(),
            type_,
        }
    }

    /// Class that declares the field.
    #[inline]
    #[must_use]
    pub const fn definer(&self) -> &DexType {
        &self.definer
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub const fn type_(&self) -> &DexType {
        &self.type_
    }
}
