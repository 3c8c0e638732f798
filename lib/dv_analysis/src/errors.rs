//! Analysis errors definition.

use crate::typing::errors::TypeError;
use dv_dex::errors::DexError;
use dv_dex::DexType;
use thiserror::Error;

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Failures that prevent the analysis of a method from completing.
///
/// Verification violations found in the analyzed code are not errors: they are reported
/// in the verification result.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("dex error: {0}")]
    Dex(#[from] DexError),

    #[error("duplicate class in hierarchy: {0}")]
    DuplicateClass(DexType),

    #[error("instruction not found: {0}")]
    InstructionNotFound(String),

    #[error("the method has no implementation")]
    NoCode,

    #[error("typing error: {0}")]
    Type(#[from] TypeError),
}
