//! Dalvik methods data structures.

use crate::code::Code;
use crate::types::DexType;
use bitflags::bitflags;
use std::fmt;

/// Name of instance constructors.
pub const CONSTRUCTOR_NAME: &str = "<init>";

/// Symbolic reference to a method, as found in invocation instructions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodRef {
    definer: DexType,
    name: String,
    parameters: Vec<DexType>,
    return_type: DexType,
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}->{}(", self.definer, self.name)?;
        for t in &self.parameters {
            write!(f, "{t}")?;
        }
        write!(f, "){}", self.return_type)
    }
}

impl MethodRef {
    #[must_use]
    pub fn new(
        definer: DexType,
        name: &str,
        parameters: Vec<DexType>,
        return_type: DexType,
    ) -> Self {
        Self {
            definer,
            name: name.to_string(),
            parameters,
            return_type,
        }
    }

    /// Type that defines the method.
    /// According to the Dalvik documentation, this must be a class type or an array type.
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
    pub fn parameters_types(&self) -> &[DexType] {
        &self.parameters
    }

    #[inline]
    #[must_use]
    pub const fn return_type(&self) -> &DexType {
        &self.return_type
    }

    /// Checks if the method is an instance constructor.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    /// Number of registers needed by the parameters (without the receiver).
    #[must_use]
    pub fn parameters_width(&self) -> usize {
        self.parameters.iter().map(DexType::register_width).sum()
    }
}

bitflags! {
    /// Dalvik method flags
    pub struct MethodFlags: u32 {
        const ACC_PUBLIC                = 0x00001;
        const ACC_PRIVATE               = 0x00002;
        const ACC_PROTECTED             = 0x00004;
        const ACC_STATIC                = 0x00008;
        const ACC_FINAL                 = 0x00010;
        const ACC_SYNCHRONIZED          = 0x00020;
        const ACC_BRIDGE                = 0x00040;
        const ACC_VARARGS               = 0x00080;
        const ACC_NATIVE                = 0x00100;
        const ACC_ABSTRACT              = 0x00400;
        const ACC_STRICT                = 0x00800;
        const ACC_SYNTHETIC             = 0x01000;
        const ACC_CONSTRUCTOR           = 0x10000;
        const ACC_DECLARED_SYNCHRONIZED = 0x20000;
    }
}

/// A method definition, with its code when it has an implementation.
#[derive(Debug, Clone)]
pub struct Method {
    descriptor: MethodRef,
    flags: MethodFlags,
    code: Option<Code>,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.descriptor)
    }
}

impl Method {
    #[must_use]
    pub const fn new(descriptor: MethodRef, flags: MethodFlags, code: Option<Code>) -> Self {
        Self {
            descriptor,
            flags,
            code,
        }
    }

    #[inline]
    #[must_use]
    pub const fn descriptor(&self) -> &MethodRef {
        &self.descriptor
    }

    #[inline]
    #[must_use]
    pub const fn definer(&self) -> &DexType {
        self.descriptor.definer()
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> MethodFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::ACC_STATIC)
    }

    /// Checks if the method is an instance constructor.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        !self.is_static() && self.descriptor.is_constructor()
    }

    #[inline]
    #[must_use]
    pub const fn code(&self) -> Option<&Code> {
        self.code.as_ref()
    }
}
