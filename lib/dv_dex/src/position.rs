//! Source positions attached to instructions.
//!
//! A position records where an instruction comes from: the source file, the original
//! bytecode address and the original line number. When several source lines collapse into
//! a single instruction (after inlining for example) the position keeps all of them.

use crate::errors::{DexError, DexResult};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Lines {
    Single(i32),
    Multi(Vec<i32>),
}

/// Information about a source position for code, which includes both a
/// line number and original bytecode address.
///
/// Two comparison policies coexist:
///  - equality (and [`same_line_and_file`](SourcePosition::same_line_and_file)) looks at
///    the address, the source file and the scalar line only;
///  - [`same_line`](SourcePosition::same_line) compares the original line numbers as sets.
///
/// A position built from several lines has no scalar line (it is `-1`).
#[derive(Debug, Clone)]
pub struct SourcePosition {
    source_file: Option<Arc<str>>,
    address: i32,
    lines: Lines,
}

impl SourcePosition {
    /// Convenient "no information known" instance.
    pub const NO_INFO: Self = Self {
        source_file: None,
        address: -1,
        lines: Lines::Single(-1),
    };

    /// Builds a position with a single original line.
    ///
    /// `address` and `line` are `-1` when unknown.
    ///
    /// # Errors
    ///
    /// Fails if `address` or `line` is lower than `-1`.
    pub fn new(source_file: Option<Arc<str>>, address: i32, line: i32) -> DexResult<Self> {
        if address < -1 {
            return Err(DexError::InvalidAddress(address));
        }
        if line < -1 {
            return Err(DexError::InvalidLine(line));
        }
        Ok(Self {
            source_file,
            address,
            lines: Lines::Single(line),
        })
    }

    /// Builds a position covering several original lines, in their original order.
    ///
    /// # Errors
    ///
    /// Fails if `address` is lower than `-1`, if `lines` is empty or if one of the lines
    /// is lower than `-1`.
    pub fn with_lines(
        source_file: Option<Arc<str>>,
        address: i32,
        lines: Vec<i32>,
    ) -> DexResult<Self> {
        if address < -1 {
            return Err(DexError::InvalidAddress(address));
        }
        if lines.is_empty() {
            return Err(DexError::EmptyLines);
        }
        if let Some(line) = lines.iter().find(|line| **line < -1) {
            return Err(DexError::InvalidLine(*line));
        }
        Ok(Self {
            source_file,
            address,
            lines: Lines::Multi(lines),
        })
    }

    /// Gets the source file, if known.
    #[must_use]
    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    /// Gets the original bytecode address, `-1` if unknown.
    #[inline]
    #[must_use]
    pub const fn address(&self) -> i32 {
        self.address
    }

    /// Gets a representative original line number, `-1` if unknown.
    ///
    /// For a position covering several lines, this is the first of them.
    #[must_use]
    pub fn line(&self) -> i32 {
        match &self.lines {
            Lines::Single(line) => *line,
            Lines::Multi(lines) => lines[0],
        }
    }

    /// Gets all the original lines when the position was built from several of them.
    #[must_use]
    pub fn lines(&self) -> Option<&[i32]> {
        match &self.lines {
            Lines::Single(_) => None,
            Lines::Multi(lines) => Some(lines),
        }
    }

    const fn scalar_line(&self) -> i32 {
        match self.lines {
            Lines::Single(line) => line,
            Lines::Multi(_) => -1,
        }
    }

    fn line_set(&self) -> BTreeSet<i32> {
        match &self.lines {
            Lines::Single(line) => BTreeSet::from([*line]),
            Lines::Multi(lines) => lines.iter().copied().collect(),
        }
    }

    /// Returns whether the lines match between this instance and the one given.
    ///
    /// Lines are compared as sets: `[10, 12]` matches `[12, 10]` but not `[10]`.
    #[must_use]
    pub fn same_line(&self, other: &Self) -> bool {
        match (&self.lines, &other.lines) {
            (Lines::Single(l1), Lines::Single(l2)) => l1 == l2,
            _ => self.line_set() == other.line_set(),
        }
    }

    /// Returns whether the scalar lines and the files match between this instance and the
    /// one given.
    #[must_use]
    pub fn same_line_and_file(&self, other: &Self) -> bool {
        let same_file = match (&self.source_file, &other.source_file) {
            (None, None) => true,
            (Some(f1), Some(f2)) => Arc::ptr_eq(f1, f2) || f1 == f2,
            _ => false,
        };
        self.scalar_line() == other.scalar_line() && same_file
    }
}

impl Default for SourcePosition {
    fn default() -> Self {
        Self::NO_INFO
    }
}

impl PartialEq for SourcePosition {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.same_line_and_file(other)
    }
}

impl Eq for SourcePosition {}

impl Hash for SourcePosition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_file.as_deref().hash(state);
        self.address.hash(state);
        self.scalar_line().hash(state);
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(file) = &self.source_file {
            write!(f, "{file}:")?;
        }
        let line = self.line();
        if line >= 0 {
            write!(f, "{line}")?;
        }
        write!(f, "@")?;
        if self.address < 0 {
            write!(f, "????")
        } else {
            write!(f, "{:04x}", self.address)
        }
    }
}

impl Serialize for SourcePosition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("SourcePosition", 3)?;
        state.serialize_field("file", &self.source_file.as_deref())?;
        state.serialize_field("address", &self.address)?;
        match &self.lines {
            Lines::Single(line) => state.serialize_field("lines", &[*line])?,
            Lines::Multi(lines) => state.serialize_field("lines", lines)?,
        }
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> Option<Arc<str>> {
        Some(Arc::from(name))
    }

    #[test]
    fn construction_checks() {
        assert!(SourcePosition::new(None, -1, -1).is_ok());
        assert!(matches!(
            SourcePosition::new(None, -2, 3),
            Err(DexError::InvalidAddress(-2))
        ));
        assert!(matches!(
            SourcePosition::new(None, 0, -5),
            Err(DexError::InvalidLine(-5))
        ));
        assert!(matches!(
            SourcePosition::with_lines(None, 0, vec![]),
            Err(DexError::EmptyLines)
        ));
        assert!(matches!(
            SourcePosition::with_lines(None, 0, vec![3, -7]),
            Err(DexError::InvalidLine(-7))
        ));
    }

    #[test]
    fn same_line_is_set_based() {
        let f = file("Foo.java");
        let p1 = SourcePosition::with_lines(f.clone(), 4, vec![10, 12]).unwrap();
        let p2 = SourcePosition::with_lines(f.clone(), 4, vec![12, 10]).unwrap();
        let p3 = SourcePosition::with_lines(f.clone(), 4, vec![10]).unwrap();
        let p4 = SourcePosition::with_lines(f, 4, vec![10, 10, 12]).unwrap();
        assert!(p1.same_line(&p2));
        assert!(!p1.same_line(&p3));
        assert!(p1.same_line(&p4));
    }

    #[test]
    fn same_line_scalar_as_singleton() {
        let single = SourcePosition::new(None, 2, 10).unwrap();
        let multi = SourcePosition::with_lines(None, 2, vec![10]).unwrap();
        let other = SourcePosition::new(None, 2, 11).unwrap();
        assert!(single.same_line(&multi));
        assert!(!single.same_line(&other));
    }

    #[test]
    fn representative_line() {
        let multi = SourcePosition::with_lines(None, 0, vec![42, 7]).unwrap();
        assert_eq!(multi.line(), 42);
        assert_eq!(multi.lines(), Some(&[42, 7][..]));
        assert_eq!(SourcePosition::new(None, 0, 9).unwrap().line(), 9);
        assert_eq!(SourcePosition::NO_INFO.lines(), None);
    }

    #[test]
    fn equality_uses_scalar_line_and_file() {
        let shared = file("A.java");
        let p1 = SourcePosition::new(shared.clone(), 8, 3).unwrap();
        let p2 = SourcePosition::new(shared, 8, 3).unwrap();
        let p3 = SourcePosition::new(file("A.java"), 8, 3).unwrap();
        let p4 = SourcePosition::new(file("B.java"), 8, 3).unwrap();
        let p5 = SourcePosition::new(file("A.java"), 9, 3).unwrap();
        assert_eq!(p1, p2);
        assert_eq!(p1, p3);
        assert_ne!(p1, p4);
        assert_ne!(p1, p5);
        assert!(p1.same_line_and_file(&p5));

        // multi-line positions only differ through their line sets
        let m1 = SourcePosition::with_lines(None, 1, vec![1, 2]).unwrap();
        let m2 = SourcePosition::with_lines(None, 1, vec![3]).unwrap();
        assert_eq!(m1, m2);
        assert!(!m1.same_line(&m2));
    }

    #[test]
    fn hashing_agrees_with_equality() {
        use std::collections::HashSet;

        let positions = vec![
            SourcePosition::new(file("A.java"), 8, 3).unwrap(),
            SourcePosition::new(file("A.java"), 8, 3).unwrap(),
            SourcePosition::new(file("B.java"), 8, 3).unwrap(),
            SourcePosition::new(file("A.java"), 9, 3).unwrap(),
            SourcePosition::with_lines(None, 1, vec![1, 2]).unwrap(),
            SourcePosition::with_lines(None, 1, vec![3]).unwrap(),
            SourcePosition::NO_INFO,
            SourcePosition::default(),
        ];
        for p1 in &positions {
            for p2 in &positions {
                if p1 == p2 {
                    let set: HashSet<_> = [p1, p2].into_iter().collect();
                    assert_eq!(set.len(), 1, "{p1} and {p2}");
                }
            }
        }
        let set: HashSet<_> = positions.iter().collect();
        assert_eq!(set.len(), 5);
    }

    #[test]
    fn rendering() {
        let p = SourcePosition::new(file("Main.java"), 0x1a, 12).unwrap();
        assert_eq!(format!("{p}"), "Main.java:12@001a");
        let p = SourcePosition::new(None, 3, -1).unwrap();
        assert_eq!(format!("{p}"), "@0003");
        assert_eq!(format!("{}", SourcePosition::NO_INFO), "@????");
        let p = SourcePosition::with_lines(None, -1, vec![5, 6]).unwrap();
        assert_eq!(format!("{p}"), "5@????");
    }
}
