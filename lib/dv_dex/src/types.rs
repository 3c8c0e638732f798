//! Dalvik typing informations data structures.

use crate::errors::{DexError, DexResult};
use serde::{Serialize, Serializer};
use std::convert::TryFrom;
use std::fmt;

/// Dalvik concrete type descriptor type.
///
/// Values are compared structurally, so two descriptors naming the same class are
/// interchangeable keys into a class hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DexType {
    /// `void` type, only valid for return types.
    Void,
    /// `boolean` type.
    Boolean,
    /// `byte` type.
    Byte,
    /// `short` type.
    Short,
    /// `char` type.
    Char,
    /// `int` type.
    Int,
    /// `long` type.
    Long,
    /// `float` type.
    Float,
    /// `double` type.
    Double,
    /// Array of the given element type, with the given number of dimensions.
    /// The element type is never an array itself and there are at most 255 dimensions.
    Array(usize, Box<Self>),
    /// Type of a fully-qualified class, in its internal form (`java/lang/Object`).
    Class(String),
}

impl DexType {
    /// Builds a class type from its internal name (`java/lang/String`).
    #[must_use]
    pub fn class(name: &str) -> Self {
        Self::Class(name.to_string())
    }

    /// Builds the array type whose components are of the given type.
    #[must_use]
    pub fn array_of(component: Self) -> Self {
        match component {
            Self::Array(n, elem) => Self::Array(n + 1, elem),
            elem => Self::Array(1, Box::new(elem)),
        }
    }

    /// Returns the type of the components of an array type, `None` for any other type.
    #[must_use]
    pub fn component(&self) -> Option<Self> {
        match self {
            Self::Array(1, elem) => Some(elem.as_ref().clone()),
            Self::Array(n, elem) => Some(Self::Array(n - 1, elem.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        !matches!(self, Self::Void | Self::Array(_, _) | Self::Class(_))
    }

    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Array(_, _) | Self::Class(_))
    }

    /// Checks if values of this type occupy a register pair.
    #[must_use]
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    /// Number of registers needed to hold a value of this type.
    #[must_use]
    pub const fn register_width(&self) -> usize {
        match self {
            Self::Void => 0,
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }

    pub fn as_class_name(&self) -> DexResult<&str> {
        if let Self::Class(name) = self {
            Ok(name)
        } else {
            Err(DexError::InvalidType)
        }
    }

    /// Returns a java-like representation of the type.
    /// This method is useful for human readable diagnostics. Its result differs
    /// from the `Display` implementation, which produces strings in the Dalvik
    /// format.
    #[must_use]
    pub fn to_java_string(&self) -> String {
        match self {
            Self::Void => "void".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Byte => "byte".to_string(),
            Self::Short => "short".to_string(),
            Self::Char => "char".to_string(),
            Self::Int => "int".to_string(),
            Self::Long => "long".to_string(),
            Self::Float => "float".to_string(),
            Self::Double => "double".to_string(),
            Self::Array(n, sub) => {
                let mut s = sub.to_java_string();
                for _ in 0..*n {
                    s.push_str("[]");
                }
                s
            }
            Self::Class(name) => name.replace('/', "."),
        }
    }
}

impl fmt::Display for DexType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Void => write!(f, "V"),
            Self::Boolean => write!(f, "Z"),
            Self::Byte => write!(f, "B"),
            Self::Short => write!(f, "S"),
            Self::Char => write!(f, "C"),
            Self::Int => write!(f, "I"),
            Self::Long => write!(f, "J"),
            Self::Float => write!(f, "F"),
            Self::Double => write!(f, "D"),
            Self::Array(n, inner) => {
                for _ in 0..*n {
                    write!(f, "[")?;
                }
                write!(f, "{inner}")
            }
            Self::Class(classname) => write!(f, "L{classname};"),
        }
    }
}

impl Serialize for DexType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

fn conversion_error(s: &str) -> DexError {
    DexError::Conversion {
        from: format!("&str ({s:?})"),
        to: "DexType".to_string(),
    }
}

impl TryFrom<&str> for DexType {
    type Error = DexError;

    fn try_from(s: &str) -> DexResult<Self> {
        if s == "V" {
            return Ok(Self::Void);
        }

        let dims = s.bytes().take_while(|c| *c == b'[').count();
        if dims >= s.len() || dims > 255 {
            return Err(conversion_error(s));
        }

        let elem = match &s[dims..] {
            "Z" => Self::Boolean,
            "B" => Self::Byte,
            "S" => Self::Short,
            "C" => Self::Char,
            "I" => Self::Int,
            "J" => Self::Long,
            "F" => Self::Float,
            "D" => Self::Double,
            sub => {
                let l = sub.len();
                if l > 2 && sub.starts_with('L') && sub.ends_with(';') {
                    Self::Class(sub[1..l - 1].to_string())
                } else {
                    return Err(conversion_error(s));
                }
            }
        };
        if dims == 0 {
            Ok(elem)
        } else {
            Ok(Self::Array(dims, Box::new(elem)))
        }
    }
}
