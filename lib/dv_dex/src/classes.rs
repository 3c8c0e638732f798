//! Dalvik class definitions, as seen by the verifier.

use crate::methods::MethodRef;
use crate::types::DexType;
use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// Dalvik class flags
    pub struct ClassFlags: u32 {
        const ACC_PUBLIC                = 0x00001;
        const ACC_PRIVATE               = 0x00002;
        const ACC_PROTECTED             = 0x00004;
        const ACC_STATIC                = 0x00008;
        const ACC_FINAL                 = 0x00010;
        const ACC_INTERFACE             = 0x00200;
        const ACC_ABSTRACT              = 0x00400;
        const ACC_SYNTHETIC             = 0x01000;
        const ACC_ANNOTATION            = 0x02000;
        const ACC_ENUM                  = 0x04000;
    }
}

/// The Dalvik class definition.
#[derive(Debug, Clone)]
pub struct ClassDef {
    class: DexType,
    flags: ClassFlags,
    superclass: Option<DexType>,
    interfaces: Vec<DexType>,
    methods: Vec<MethodRef>,
    source_file: Option<Arc<str>>,
}

impl fmt::Display for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.class)
    }
}

impl ClassDef {
    #[must_use]
    pub fn new(class: DexType, flags: ClassFlags, superclass: Option<DexType>) -> Self {
        Self {
            class,
            flags,
            superclass,
            interfaces: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    #[must_use]
    pub fn with_interfaces(mut self, interfaces: Vec<DexType>) -> Self {
        self.interfaces = interfaces;
        self
    }

    #[must_use]
    pub fn with_methods(mut self, methods: Vec<MethodRef>) -> Self {
        self.methods = methods;
        self
    }

    #[must_use]
    pub fn with_source_file(mut self, source_file: Arc<str>) -> Self {
        self.source_file = Some(source_file);
        self
    }

    #[inline]
    #[must_use]
    pub const fn class(&self) -> &DexType {
        &self.class
    }

    #[inline]
    #[must_use]
    pub const fn flags(&self) -> ClassFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub const fn superclass(&self) -> Option<&DexType> {
        self.superclass.as_ref()
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &DexType> {
        self.interfaces.iter()
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodRef> {
        self.methods.iter()
    }

    #[must_use]
    pub fn source_file(&self) -> Option<&Arc<str>> {
        self.source_file.as_ref()
    }

    #[inline]
    #[must_use]
    pub const fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::ACC_INTERFACE)
    }

    /// Checks if the class declares the given method.
    ///
    /// Classes built without a methods list are considered to declare every method
    /// referencing them.
    #[must_use]
    pub fn declares(&self, method: &MethodRef) -> bool {
        method.definer() == &self.class
            && (self.methods.is_empty() || self.methods.iter().any(|m| m == method))
    }
}
