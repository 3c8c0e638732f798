use crate::hierarchy::ClassHierarchy;
use crate::typing::errors::{TypeError, TypeResult};
use crate::typing::uninit::Uninit;
use dv_dex::DexType;
use lazy_static::lazy_static;
use serde::Serialize;
use std::fmt;

/// Primitive kinds a register can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Float,
    Long,
    Double,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Char => "char",
            Self::Int => "int",
            Self::Float => "float",
            Self::Long => "long",
            Self::Double => "double",
        };
        write!(f, "{s}")
    }
}

impl PrimitiveKind {
    #[must_use]
    pub const fn from_dex_type(typ: &DexType) -> Option<Self> {
        match typ {
            DexType::Boolean => Some(Self::Boolean),
            DexType::Byte => Some(Self::Byte),
            DexType::Short => Some(Self::Short),
            DexType::Char => Some(Self::Char),
            DexType::Int => Some(Self::Int),
            DexType::Float => Some(Self::Float),
            DexType::Long => Some(Self::Long),
            DexType::Double => Some(Self::Double),
            _ => None,
        }
    }

    /// Checks if the kind occupies a register pair.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Checks if the kind is one of the 32-bit integral kinds (`int` and narrower).
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Boolean | Self::Byte | Self::Short | Self::Char | Self::Int
        )
    }

    /// Implicit widening: boolean ⊑ byte ⊑ short ⊑ int and boolean ⊑ char ⊑ int.
    #[must_use]
    pub fn widens_to(self, other: Self) -> bool {
        self == other
            || matches!(
                (self, other),
                (Self::Boolean, Self::Byte | Self::Short | Self::Char | Self::Int)
                    | (Self::Byte | Self::Short | Self::Char, Self::Int)
                    | (Self::Byte, Self::Short)
            )
    }

    /// Least kind both kinds widen to, if any.
    #[must_use]
    pub fn join(self, other: Self) -> Option<Self> {
        if self.widens_to(other) {
            Some(other)
        } else if other.widens_to(self) {
            Some(self)
        } else if self.is_integral() && other.is_integral() {
            Some(Self::Int)
        } else {
            None
        }
    }
}

lazy_static! {
    pub static ref JAVA_LANG_OBJECT: DexType = DexType::class("java/lang/Object");
    pub static ref JAVA_LANG_THROWABLE: DexType = DexType::class("java/lang/Throwable");
    pub static ref JAVA_LANG_STRING: DexType = DexType::class("java/lang/String");
    pub static ref JAVA_LANG_CLASS: DexType = DexType::class("java/lang/Class");
    pub static ref JAVA_LANG_CLONEABLE: DexType = DexType::class("java/lang/Cloneable");
    pub static ref JAVA_IO_SERIALIZABLE: DexType = DexType::class("java/io/Serializable");
}

/// Abstract type of a register.
///
/// The variants form a lattice ordered by [`RegisterType::is_assignable`], with
/// [`Unknown`](RegisterType::Unknown) at the bottom and
/// [`Conflict`](RegisterType::Conflict) at the top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterType<'a> {
    /// Never assigned on this path.
    Unknown,
    Primitive(PrimitiveKind),
    /// Literal zero, usable both as `null` and as any 32-bit primitive zero.
    Zero,
    /// Non-zero 32-bit literal whose integral range fits the given kind. It holds raw
    /// bits, so it is also a valid `float`.
    Literal(PrimitiveKind),
    /// 64-bit literal, either a `long` or a `double`.
    WideLiteral,
    Null,
    /// Fully initialized object or array.
    Reference(DexType),
    /// Allocated object whose constructor has not run yet.
    Uninitialized(Uninit<'a>),
    /// Receiver of a constructor before the superclass constructor has run.
    UninitializedThis(DexType),
    Conflict,
}

impl fmt::Display for RegisterType<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "⊥"),
            Self::Primitive(kind) => write!(f, "{kind}"),
            Self::Zero => write!(f, "zero"),
            Self::Literal(kind) => write!(f, "{kind} literal"),
            Self::WideLiteral => write!(f, "wide literal"),
            Self::Null => write!(f, "null"),
            Self::Reference(typ) => write!(f, "{typ}"),
            Self::Uninitialized(uninit) => write!(f, "{uninit}"),
            Self::UninitializedThis(typ) => write!(f, "uninit-this[{typ}]"),
            Self::Conflict => write!(f, "⊤"),
        }
    }
}

impl<'a> RegisterType<'a> {
    /// Maps a declared type (parameter, field, return, array element) onto the lattice.
    ///
    /// # Errors
    ///
    /// Fails on `void`, which no register can hold.
    pub fn from_dex_type(typ: &DexType) -> TypeResult<Self> {
        match typ {
            DexType::Void => Err(TypeError::VoidType),
            DexType::Array(_, _) | DexType::Class(_) => Ok(Self::Reference(typ.clone())),
            _ => PrimitiveKind::from_dex_type(typ)
                .map(Self::Primitive)
                .ok_or(TypeError::VoidType),
        }
    }

    /// Type of a 32-bit literal: [`Zero`](Self::Zero) for 0, otherwise a
    /// [`Literal`](Self::Literal) tagged with the narrowest integral kind holding it.
    #[must_use]
    pub fn literal(value: i32) -> Self {
        let kind = match value {
            0 => return Self::Zero,
            1 => PrimitiveKind::Boolean,
            v if i8::try_from(v).is_ok() => PrimitiveKind::Byte,
            v if i16::try_from(v).is_ok() => PrimitiveKind::Short,
            v if u16::try_from(v).is_ok() => PrimitiveKind::Char,
            _ => PrimitiveKind::Int,
        };
        Self::Literal(kind)
    }

    /// Checks if the type occupies a register pair.
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::WideLiteral) || matches!(self, Self::Primitive(kind) if kind.is_wide())
    }

    /// Checks if the type can be used as an initialized reference (including `null` and
    /// the literal zero).
    #[must_use]
    pub const fn is_reference_like(&self) -> bool {
        matches!(self, Self::Zero | Self::Null | Self::Reference(_))
    }

    /// Checks if the type can be used as a 32-bit integral value.
    #[must_use]
    pub const fn is_integral(&self) -> bool {
        match self {
            Self::Zero | Self::Literal(_) => true,
            Self::Primitive(kind) => kind.is_integral(),
            _ => false,
        }
    }

    /// Checks if the type is a single-word primitive value.
    #[must_use]
    pub const fn is_single_word(&self) -> bool {
        match self {
            Self::Zero | Self::Literal(_) => true,
            Self::Primitive(kind) => !kind.is_wide(),
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized(_) | Self::UninitializedThis(_))
    }

    /// Least upper bound of two types.
    ///
    /// References are joined through their nearest common supertype given by the
    /// hierarchy, uninitialized values only join with the same pending object.
    #[must_use]
    pub fn join<H: ClassHierarchy + ?Sized>(&self, other: &Self, hierarchy: &H) -> Self {
        match (self, other) {
            (Self::Conflict, _) | (_, Self::Conflict) => Self::Conflict,
            (Self::Unknown, t) | (t, Self::Unknown) => t.clone(),
            (Self::Primitive(k1), Self::Primitive(k2)) => {
                k1.join(*k2).map_or(Self::Conflict, Self::Primitive)
            }
            (Self::Zero, t) | (t, Self::Zero) if t.is_single_word() || t.is_reference_like() => {
                t.clone()
            }
            (Self::Literal(k1), Self::Literal(k2)) => {
                k1.join(*k2).map_or(Self::Conflict, Self::Literal)
            }
            (Self::Literal(_), Self::Primitive(PrimitiveKind::Float))
            | (Self::Primitive(PrimitiveKind::Float), Self::Literal(_)) => {
                Self::Primitive(PrimitiveKind::Float)
            }
            (Self::Literal(k1), Self::Primitive(k2)) | (Self::Primitive(k2), Self::Literal(k1))
                if k2.is_integral() =>
            {
                k1.join(*k2).map_or(Self::Conflict, Self::Primitive)
            }
            (Self::WideLiteral, Self::WideLiteral) => Self::WideLiteral,
            (Self::WideLiteral, Self::Primitive(kind)) | (Self::Primitive(kind), Self::WideLiteral)
                if kind.is_wide() =>
            {
                Self::Primitive(*kind)
            }
            (Self::Null, Self::Null) => Self::Null,
            (Self::Null, Self::Reference(t)) | (Self::Reference(t), Self::Null) => {
                Self::Reference(t.clone())
            }
            (Self::Reference(t1), Self::Reference(t2)) => {
                if t1 == t2 {
                    Self::Reference(t1.clone())
                } else {
                    hierarchy
                        .common_supertype(t1, t2)
                        .map_or(Self::Conflict, Self::Reference)
                }
            }
            (Self::Uninitialized(u1), Self::Uninitialized(u2)) if u1 == u2 => self.clone(),
            (Self::UninitializedThis(t1), Self::UninitializedThis(t2)) if t1 == t2 => {
                self.clone()
            }
            _ => Self::Conflict,
        }
    }

    /// Checks if a value of this type can be used where a value of type `to` is expected.
    #[must_use]
    pub fn is_assignable<H: ClassHierarchy + ?Sized>(&self, to: &Self, hierarchy: &H) -> bool {
        match (self, to) {
            (Self::Unknown, _) | (_, Self::Conflict) => true,
            (Self::Primitive(k1), Self::Primitive(k2)) => k1.widens_to(*k2),
            (Self::Zero, t) => t.is_single_word() || t.is_reference_like(),
            (Self::Literal(_), Self::Primitive(PrimitiveKind::Float)) => true,
            (Self::Literal(k1), Self::Primitive(k2) | Self::Literal(k2)) => k1.widens_to(*k2),
            (Self::WideLiteral, Self::WideLiteral) => true,
            (Self::WideLiteral, Self::Primitive(kind)) => kind.is_wide(),
            (Self::Null, Self::Null | Self::Reference(_)) => true,
            (Self::Reference(t1), Self::Reference(t2)) => hierarchy.is_assignable(t1, t2),
            (Self::Uninitialized(u1), Self::Uninitialized(u2)) => u1 == u2,
            (Self::UninitializedThis(t1), Self::UninitializedThis(t2)) => t1 == t2,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::tests::zoo;
    use crate::typing::uninit::AllocationSite;
    use dv_dex::methods::MethodRef;
    use dv_dex::Addr;

    fn reference(name: &str) -> RegisterType<'static> {
        RegisterType::Reference(DexType::class(name))
    }

    fn samples<'a>(method: &'a MethodRef) -> Vec<RegisterType<'a>> {
        use PrimitiveKind::*;
        let dog = DexType::class("Dog");
        vec![
            RegisterType::Unknown,
            RegisterType::Conflict,
            RegisterType::Null,
            RegisterType::Primitive(Boolean),
            RegisterType::Primitive(Byte),
            RegisterType::Primitive(Short),
            RegisterType::Primitive(Char),
            RegisterType::Primitive(Int),
            RegisterType::Primitive(Float),
            RegisterType::Primitive(Long),
            RegisterType::Primitive(Double),
            reference("Dog"),
            reference("Cat"),
            reference("Puppy"),
            reference("Animal"),
            RegisterType::Reference(JAVA_LANG_OBJECT.clone()),
            RegisterType::Reference(DexType::array_of(DexType::class("Dog"))),
            RegisterType::Uninitialized(Uninit::new(
                0,
                dog.clone(),
                None,
                AllocationSite::new(method, Addr(4)),
            )),
            RegisterType::Uninitialized(Uninit::new(
                1,
                dog.clone(),
                None,
                AllocationSite::new(method, Addr(12)),
            )),
            RegisterType::UninitializedThis(dog),
            RegisterType::Zero,
            RegisterType::Literal(Boolean),
            RegisterType::Literal(Byte),
            RegisterType::Literal(Char),
            RegisterType::Literal(Int),
            RegisterType::WideLiteral,
        ]
    }

    fn method() -> MethodRef {
        MethodRef::new(DexType::class("Zoo"), "run", vec![], DexType::Void)
    }

    #[test]
    fn primitive_widening() {
        use PrimitiveKind::*;
        assert_eq!(Short.join(Char), Some(Int));
        assert_eq!(Byte.join(Char), Some(Int));
        assert_eq!(Boolean.join(Byte), Some(Byte));
        assert_eq!(Boolean.join(Char), Some(Char));
        assert_eq!(Byte.join(Short), Some(Short));
        assert_eq!(Int.join(Float), None);
        assert_eq!(Long.join(Double), None);
        assert_eq!(Long.join(Long), Some(Long));
        assert!(Boolean.widens_to(Int));
        assert!(!Int.widens_to(Short));
        assert!(!Float.widens_to(Double));
    }

    #[test]
    fn join_rules() {
        let h = zoo();
        let m = method();
        let s = samples(&m);
        let int = RegisterType::Primitive(PrimitiveKind::Int);
        assert_eq!(RegisterType::Unknown.join(&int, &h), int);
        assert_eq!(RegisterType::Conflict.join(&int, &h), RegisterType::Conflict);
        assert_eq!(RegisterType::Null.join(&reference("Dog"), &h), reference("Dog"));
        assert_eq!(reference("Dog").join(&reference("Cat"), &h), reference("Animal"));
        assert_eq!(int.join(&reference("Dog"), &h), RegisterType::Conflict);
        assert_eq!(s[17].join(&s[17], &h), s[17]);
        assert_eq!(s[17].join(&s[18], &h), RegisterType::Conflict);
        assert_eq!(s[17].join(&reference("Dog"), &h), RegisterType::Conflict);
        assert_eq!(s[19].join(&reference("Dog"), &h), RegisterType::Conflict);
        assert_eq!(s[17].join(&RegisterType::Null, &h), RegisterType::Conflict);
    }

    #[test]
    fn uninitialized_identity() {
        let h = zoo();
        let m = method();
        let other = MethodRef::new(DexType::class("Zoo"), "walk", vec![], DexType::Void);
        let u = |id, method, pc| {
            RegisterType::Uninitialized(Uninit::new(
                id,
                DexType::class("Dog"),
                None,
                AllocationSite::new(method, Addr(pc)),
            ))
        };
        // the id is not part of the identity
        assert_eq!(u(0, &m, 4).join(&u(7, &m, 4), &h), u(0, &m, 4));
        assert_eq!(u(0, &m, 4).join(&u(0, &other, 4), &h), RegisterType::Conflict);
        assert_eq!(u(0, &m, 4).join(&u(0, &m, 6), &h), RegisterType::Conflict);
    }

    #[test]
    fn lattice_laws() {
        let h = zoo();
        let m = method();
        let s = samples(&m);
        for a in &s {
            assert_eq!(&a.join(a, &h), a, "idempotence of {a}");
            assert_eq!(&RegisterType::Unknown.join(a, &h), a, "identity of {a}");
            for b in &s {
                let ab = a.join(b, &h);
                assert_eq!(ab, b.join(a, &h), "commutativity of {a} and {b}");
                assert!(a.is_assignable(&ab, &h), "{a} ⊑ {a} ⊔ {b}");
                assert!(b.is_assignable(&ab, &h), "{b} ⊑ {a} ⊔ {b}");
                for c in &s {
                    assert_eq!(
                        ab.join(c, &h),
                        a.join(&b.join(c, &h), &h),
                        "associativity of {a}, {b} and {c}"
                    );
                }
            }
        }
    }

    #[test]
    fn assignability() {
        let h = zoo();
        let m = method();
        let s = samples(&m);
        assert!(RegisterType::Unknown.is_assignable(&reference("Dog"), &h));
        assert!(reference("Dog").is_assignable(&RegisterType::Conflict, &h));
        assert!(RegisterType::Null.is_assignable(&reference("Cat"), &h));
        assert!(reference("Puppy").is_assignable(&reference("Animal"), &h));
        assert!(!reference("Animal").is_assignable(&reference("Puppy"), &h));
        assert!(!RegisterType::Null.is_assignable(&RegisterType::Primitive(PrimitiveKind::Int), &h));
        // uninitialized objects are never references
        assert!(!s[17].is_assignable(&reference("Dog"), &h));
        assert!(!s[19].is_assignable(&reference("Dog"), &h));
        assert!(s[17].is_assignable(&s[17], &h));
    }

    #[test]
    fn untyped_literals() {
        use PrimitiveKind::*;
        let h = zoo();
        let m = method();
        let s = samples(&m);
        let zero = RegisterType::Zero;
        assert_eq!(RegisterType::literal(0), zero);
        assert_eq!(RegisterType::literal(1), RegisterType::Literal(Boolean));
        assert_eq!(RegisterType::literal(-3), RegisterType::Literal(Byte));
        assert_eq!(RegisterType::literal(0xffff), RegisterType::Literal(Char));
        assert_eq!(RegisterType::literal(0x3f80_0000), RegisterType::Literal(Int));

        // zero is null as well as any 32-bit primitive
        assert!(zero.is_assignable(&reference("Dog"), &h));
        assert!(zero.is_assignable(&RegisterType::Null, &h));
        assert!(zero.is_assignable(&RegisterType::Primitive(Float), &h));
        assert!(!zero.is_assignable(&RegisterType::Primitive(Long), &h));
        assert!(!zero.is_assignable(&s[17], &h));
        assert_eq!(zero.join(&RegisterType::Null, &h), RegisterType::Null);
        assert_eq!(zero.join(&reference("Cat"), &h), reference("Cat"));
        assert_eq!(zero.join(&RegisterType::Primitive(Char), &h), RegisterType::Primitive(Char));
        assert_eq!(zero.join(&s[17], &h), RegisterType::Conflict);

        let byte = RegisterType::Literal(Byte);
        assert!(byte.is_assignable(&RegisterType::Primitive(Float), &h));
        assert!(byte.is_assignable(&RegisterType::Primitive(Short), &h));
        assert!(!byte.is_assignable(&RegisterType::Primitive(Char), &h));
        assert!(!byte.is_assignable(&RegisterType::Primitive(Boolean), &h));
        assert!(!byte.is_assignable(&reference("Dog"), &h));
        assert_eq!(byte.join(&RegisterType::Literal(Char), &h), RegisterType::Literal(Int));
        assert_eq!(byte.join(&RegisterType::Primitive(Char), &h), RegisterType::Primitive(Int));
        assert_eq!(byte.join(&RegisterType::Primitive(Float), &h), RegisterType::Primitive(Float));
        assert_eq!(byte.join(&RegisterType::Null, &h), RegisterType::Conflict);

        let wide = RegisterType::WideLiteral;
        assert!(wide.is_wide());
        assert!(wide.is_assignable(&RegisterType::Primitive(Double), &h));
        assert!(wide.is_assignable(&RegisterType::Primitive(Long), &h));
        assert_eq!(wide.join(&RegisterType::Primitive(Double), &h), RegisterType::Primitive(Double));
        assert_eq!(wide.join(&zero, &h), RegisterType::Conflict);
        assert_eq!(format!("{zero} {byte} {wide}"), "zero byte literal wide literal");
    }

    #[test]
    fn declared_types() {
        use PrimitiveKind::*;
        assert!(matches!(
            RegisterType::from_dex_type(&DexType::Void),
            Err(TypeError::VoidType)
        ));
        assert_eq!(
            RegisterType::from_dex_type(&DexType::Char).unwrap(),
            RegisterType::Primitive(Char)
        );
        let wide = RegisterType::from_dex_type(&DexType::Double).unwrap();
        assert!(wide.is_wide());
        let arr = RegisterType::from_dex_type(&DexType::array_of(DexType::Int)).unwrap();
        assert!(arr.is_reference_like());
        assert_eq!(format!("{arr}"), "[I");
        assert_eq!(format!("{}", RegisterType::Unknown), "⊥");
        assert_eq!(format!("{}", RegisterType::Conflict), "⊤");
        assert_eq!(
            format!("{}", RegisterType::UninitializedThis(DexType::class("Dog"))),
            "uninit-this[LDog;]"
        );
    }
}
