//! This crate provides the register-type verification of Dalvik bytecode for the
//! `dexverify` project.
//!
//! A method is verified by a forward dataflow analysis over its control flow graph:
//! every register gets an abstract [type](typing::RegisterType) at every instruction,
//! states are merged at control flow joins until a fixpoint is reached, and every
//! instruction checks its operands against what it expects. Objects created by
//! `new-instance` are tracked until their constructor runs, so that they cannot be
//! used (or leak out of the method) before being initialized.
//!
//! Class relations are asked to a [`ClassHierarchy`](hierarchy::ClassHierarchy)
//! oracle; [`Hierarchy`](hierarchy::Hierarchy) is a graph-backed implementation.

pub mod controlflow;
pub mod dataflow;
pub mod errors;
pub mod hierarchy;
pub mod typing;

use crate::errors::AnalysisResult;
use crate::hierarchy::ClassHierarchy;
use crate::typing::{Verification, VerifierOptions};
use dv_dex::methods::Method;

/// Verifies the register types of a method.
///
/// # Errors
///
/// See [`Verification::compute`].
pub fn verify<'a, H: ClassHierarchy>(
    method: &'a Method,
    hierarchy: &'a H,
    options: VerifierOptions,
) -> AnalysisResult<Verification<'a>> {
    Verification::compute(method, hierarchy, options)
}
