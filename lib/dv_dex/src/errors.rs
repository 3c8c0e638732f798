//! Dex errors definitions.

use crate::Addr;
use std::fmt;
use thiserror::Error;

/// An alias for result that can be a [`DexError`].
pub type DexResult<T> = Result<T, DexError>;

/// The Dex error type.
#[derive(Debug, Error)]
pub enum DexError {
    /// Error that can be returned when formatting dex parts.
    #[error("Formatting error: {0}")]
    Fmt(#[from] fmt::Error),

    #[error("could not convert {} into {}", from, to)]
    Conversion { from: String, to: String },

    #[error("invalid type")]
    InvalidType,

    #[error("invalid address: {0} < -1")]
    InvalidAddress(i32),

    #[error("invalid line number: {0} < -1")]
    InvalidLine(i32),

    #[error("empty line numbers list")]
    EmptyLines,

    #[error("Instruction not found (address: {0})")]
    InstructionNotFound(Addr),

    #[error("code structure is invalid: {0}")]
    Structure(String),
}
