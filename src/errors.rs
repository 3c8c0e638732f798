//! Global error handling.
//!
//! Each sub-crate of the project defines its own type error.
//! Their types can be unified, for example in a main function,
//! when winding results at the top-level.
//!
//! ```rust
//! use dexverify::dex::instrs::Instr;
//! use dexverify::prelude::*;
//!
//! fn main() -> DvResult<()> { // can return a DvError
//!    let _code = Code::assemble(1, 0, vec![Instr::ReturnVoid], vec![])?; // can return a DexError
//!    Ok(())
//! }
//! ```

use dv_analysis::errors::AnalysisError;
use dv_dex::errors::DexError;
use thiserror::Error;

/// An alias for result that can be a [`DvError`].
pub type DvResult<T> = Result<T, DvError>;

/// The main error type for error winding at the top-level.
/// It mainly consists of transparent wrapper over error types that
/// are defined in dependencies.
#[derive(Debug, Error)]
pub enum DvError {
    /// Error that can be returned from regex compilation.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// Error returned when a global logger is already installed.
    #[error("logger initialization failed: {0}")]
    Logger(#[from] log::SetLoggerError),

    /// Error that can be returned from [`dv_analysis`] functions.
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Error that can be returned from [`dv_dex`] functions.
    #[error(transparent)]
    Dex(#[from] DexError),
}
