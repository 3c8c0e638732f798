//! Objects allocated but not constructed yet.
//!
//! A `new-instance` instruction produces an [`Uninit`] value identified by its allocation
//! site. Nothing but copies and a constructor call can be done with it; the constructor
//! call promotes every copy at once into an initialized reference.

use crate::typing::types::RegisterType;
use crate::typing::State;
use dv_dex::classes::ClassDef;
use dv_dex::methods::MethodRef;
use dv_dex::registers::Reg;
use dv_dex::{Addr, DexType};
use std::collections::BTreeMap;
use std::fmt;
use std::ptr;

/// The instruction that allocated an object: enclosing method and address.
#[derive(Clone, Copy)]
pub struct AllocationSite<'a> {
    method: &'a MethodRef,
    pc: Addr,
}

impl PartialEq for AllocationSite<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.pc == other.pc && (ptr::eq(self.method, other.method) || self.method == other.method)
    }
}

impl Eq for AllocationSite<'_> {}

impl fmt::Debug for AllocationSite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.method, self.pc)
    }
}

impl<'a> AllocationSite<'a> {
    #[must_use]
    pub const fn new(method: &'a MethodRef, pc: Addr) -> Self {
        Self { method, pc }
    }

    #[inline]
    #[must_use]
    pub const fn method(&self) -> &'a MethodRef {
        self.method
    }

    #[inline]
    #[must_use]
    pub const fn pc(&self) -> Addr {
        self.pc
    }
}

/// A pending object.
///
/// Two values denote the same object when they share allocation site and type; the `id`
/// is only a convenient tag, and the class definition a borrowed view on the hierarchy.
#[derive(Clone)]
pub struct Uninit<'a> {
    id: u32,
    typ: DexType,
    class: Option<&'a ClassDef>,
    site: AllocationSite<'a>,
}

impl PartialEq for Uninit<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.site == other.site && self.typ == other.typ
    }
}

impl Eq for Uninit<'_> {}

impl fmt::Debug for Uninit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Uninit")
            .field("id", &self.id)
            .field("typ", &format_args!("{}", self.typ))
            .field("known_class", &self.class.is_some())
            .field("site", &self.site)
            .finish()
    }
}

impl fmt::Display for Uninit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "uninit[{}@{}]", self.typ, self.site.pc)
    }
}

impl<'a> Uninit<'a> {
    #[must_use]
    pub const fn new(
        id: u32,
        typ: DexType,
        class: Option<&'a ClassDef>,
        site: AllocationSite<'a>,
    ) -> Self {
        Self {
            id,
            typ,
            class,
            site,
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn typ(&self) -> &DexType {
        &self.typ
    }

    /// Definition of the allocated class, when known by the hierarchy.
    #[inline]
    #[must_use]
    pub const fn class_def(&self) -> Option<&'a ClassDef> {
        self.class
    }

    #[inline]
    #[must_use]
    pub const fn site(&self) -> &AllocationSite<'a> {
        &self.site
    }
}

/// Allocation sites of a method, numbered in discovery order.
///
/// A site keeps its number for the whole analysis, whatever the number of times it is
/// visited.
#[derive(Debug, Default)]
pub struct AllocationSites {
    ids: BTreeMap<Addr, u32>,
}

impl AllocationSites {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_of(&mut self, pc: Addr) -> u32 {
        let next = u32::try_from(self.ids.len()).unwrap_or(u32::MAX);
        *self.ids.entry(pc).or_insert(next)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl<'a> State<'a> {
    fn replace_all(&mut self, target: &RegisterType<'a>, by: &RegisterType<'a>) -> usize {
        let mut count = 0;
        for (i, typ) in (0u16..).zip(self.registers.iter_mut()) {
            if typ == target {
                *typ = by.clone();
                self.origins.remove(&i);
                count += 1;
            }
        }
        for typ in [&mut self.last_result, &mut self.last_exception]
            .into_iter()
            .flatten()
        {
            if typ == target {
                *typ = by.clone();
                count += 1;
            }
        }
        count
    }

    /// Turns every copy of a pending object into an initialized reference of the given
    /// type, returning the number of promoted slots.
    pub(crate) fn promote(&mut self, target: &RegisterType<'a>, typ: &DexType) -> usize {
        self.replace_all(target, &RegisterType::Reference(typ.clone()))
    }

    /// Discards every copy of a pending object, returning the number of discarded slots.
    pub(crate) fn invalidate(&mut self, target: &RegisterType<'a>) -> usize {
        self.replace_all(target, &RegisterType::Conflict)
    }

    /// Registers holding a pending object.
    pub(crate) fn uninitialized_registers(
        &self,
    ) -> impl Iterator<Item = (Reg, &RegisterType<'a>)> {
        (0u16..)
            .zip(self.registers.iter())
            .filter(|(_, typ)| typ.is_uninitialized())
            .map(|(i, typ)| (Reg::from(i), typ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typing::types::PrimitiveKind;

    fn method() -> MethodRef {
        MethodRef::new(DexType::class("Zoo"), "run", vec![], DexType::Void)
    }

    #[test]
    fn site_numbering_is_stable() {
        let mut sites = AllocationSites::new();
        assert!(sites.is_empty());
        assert_eq!(sites.id_of(Addr(4)), 0);
        assert_eq!(sites.id_of(Addr(10)), 1);
        assert_eq!(sites.id_of(Addr(4)), 0);
        assert_eq!(sites.id_of(Addr(2)), 2);
        assert_eq!(sites.len(), 3);
    }

    #[test]
    fn identity_ignores_id_and_class() {
        let m = method();
        let copy = m.clone();
        let dog = DexType::class("Dog");
        let def = ClassDef::new(dog.clone(), dv_dex::classes::ClassFlags::ACC_PUBLIC, None);
        let u1 = Uninit::new(0, dog.clone(), Some(&def), AllocationSite::new(&m, Addr(4)));
        let u2 = Uninit::new(3, dog.clone(), None, AllocationSite::new(&copy, Addr(4)));
        let u3 = Uninit::new(0, DexType::class("Cat"), None, AllocationSite::new(&m, Addr(4)));
        assert_eq!(u1, u2);
        assert_ne!(u1, u3);
        assert_eq!(u1.class_def().map(ClassDef::class), Some(&dog));
        assert_eq!(format!("{u1}"), "uninit[LDog;@0004]");
    }

    #[test]
    fn promotion_reaches_every_alias() {
        let m = method();
        let dog = DexType::class("Dog");
        let pending = RegisterType::Uninitialized(Uninit::new(
            0,
            dog.clone(),
            None,
            AllocationSite::new(&m, Addr(4)),
        ));
        let other = RegisterType::Uninitialized(Uninit::new(
            1,
            dog.clone(),
            None,
            AllocationSite::new(&m, Addr(8)),
        ));
        let int = RegisterType::Primitive(PrimitiveKind::Int);
        let mut state = State::new(
            vec![pending.clone(), int.clone(), pending.clone(), other.clone()],
            None,
        );
        state.last_result = Some(pending.clone());
        assert_eq!(state.uninitialized_registers().count(), 3);

        assert_eq!(state.promote(&pending, &dog), 3);
        let promoted = RegisterType::Reference(dog);
        assert_eq!(state.registers, vec![promoted.clone(), int, promoted.clone(), other.clone()]);
        assert_eq!(state.last_result, Some(promoted));
        let pending_regs: Vec<Reg> = state.uninitialized_registers().map(|(r, _)| r).collect();
        assert_eq!(pending_regs, vec![Reg::from(3u8)]);

        assert_eq!(state.invalidate(&other), 1);
        assert_eq!(state.registers[3], RegisterType::Conflict);
    }
}
