//! Typing errors definitions.

use crate::errors::AnalysisError;
use dv_dex::errors::DexError;
use dv_dex::registers::Reg;
use dv_dex::{Addr, SourcePosition};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// An alias for result that can be a [`TypeError`].
pub type TypeResult<T> = Result<T, TypeError>;

/// Internal typing failures.
///
/// They denote a method that cannot be analyzed at all (malformed code, inconsistent
/// layout), in contrast with [`Violation`]s which are findings about well-formed code.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("Dex error: {0}")]
    Dex(#[from] DexError),

    #[error("Out of bounds register: {0}")]
    OutOfBoundsRegister(Reg),

    #[error("Registers cannot hold a void value")]
    VoidType,

    #[error("Parameters need {needed} registers but {available} are declared")]
    BadInsSize { needed: usize, available: usize },

    #[error("Trying to merge incompatible typing states")]
    IncompatibleStates,
}

/// Category of a verification violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A register is read before being assigned on some path.
    UnknownRegister,
    /// An object is used before its constructor has run.
    UninitializedUse,
    /// A register holding incompatible types on merged paths is read.
    ConflictUse,
    NotAssignable,
    /// A constructor is invoked on an already initialized object.
    DoubleConstruction,
    /// The invoked constructor does not belong to the class of the allocated object.
    ConstructorMismatch,
    /// An uninitialized object is still reachable when the method exits.
    UninitializedEscape,
    MissingResult,
    MissingException,
    /// The two halves of a register pair do not hold the same wide value.
    BadPair,
    BadReturn,
    /// Wrong number of arguments at method invocation.
    Arity,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::UnknownRegister => "unknown register",
            Self::UninitializedUse => "uninitialized use",
            Self::ConflictUse => "conflict use",
            Self::NotAssignable => "not assignable",
            Self::DoubleConstruction => "double construction",
            Self::ConstructorMismatch => "constructor mismatch",
            Self::UninitializedEscape => "uninitialized escape",
            Self::MissingResult => "missing result",
            Self::MissingException => "missing exception",
            Self::BadPair => "bad register pair",
            Self::BadReturn => "bad return",
            Self::Arity => "bad arity",
        };
        write!(f, "{s}")
    }
}

/// A verification violation found at some instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{position}: {kind}: {message}")]
pub struct Violation {
    addr: Addr,
    position: SourcePosition,
    kind: ViolationKind,
    message: String,
}

impl Violation {
    #[must_use]
    pub const fn new(
        addr: Addr,
        position: SourcePosition,
        kind: ViolationKind,
        message: String,
    ) -> Self {
        Self {
            addr,
            position,
            kind,
            message,
        }
    }

    #[inline]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn position(&self) -> &SourcePosition {
        &self.position
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ViolationKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of a failed check inside a transfer function: either a violation of the
/// analyzed code, or a failure of the analysis itself.
#[derive(Debug)]
pub(crate) enum Check {
    Violation(ViolationKind, String),
    Fatal(AnalysisError),
}

pub(crate) type CheckResult<T> = Result<T, Check>;

impl From<AnalysisError> for Check {
    fn from(err: AnalysisError) -> Self {
        Self::Fatal(err)
    }
}

impl From<TypeError> for Check {
    fn from(err: TypeError) -> Self {
        Self::Fatal(err.into())
    }
}

impl From<DexError> for Check {
    fn from(err: DexError) -> Self {
        Self::Fatal(err.into())
    }
}
