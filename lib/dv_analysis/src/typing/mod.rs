//! Dalvik bytecode register types verification.

mod forward;
mod types;
mod uninit;

pub mod errors;

pub use crate::typing::types::{
    PrimitiveKind, RegisterType, JAVA_IO_SERIALIZABLE, JAVA_LANG_CLASS, JAVA_LANG_CLONEABLE,
    JAVA_LANG_OBJECT, JAVA_LANG_STRING, JAVA_LANG_THROWABLE,
};
pub use crate::typing::uninit::{AllocationSite, AllocationSites, Uninit};

use crate::dataflow;
use crate::dataflow::Dataflow;
use crate::errors::{AnalysisError, AnalysisResult};
use crate::hierarchy::ClassHierarchy;
use crate::typing::errors::{Check, CheckResult, TypeError, Violation, ViolationKind};
use dv_dex::methods::{Method, MethodRef};
use dv_dex::registers::Reg;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

/// Verifier settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifierOptions {
    /// Keep the register states computed at every instruction in the result.
    pub keep_states: bool,
}

/// Everything the typing transfer functions need besides the state itself.
pub struct TypingContext<'a> {
    hierarchy: &'a dyn ClassHierarchy,
    method: &'a Method,
    sites: RefCell<AllocationSites>,
}

impl<'a> TypingContext<'a> {
    pub fn new(method: &'a Method, hierarchy: &'a dyn ClassHierarchy) -> Self {
        Self {
            hierarchy,
            method,
            sites: RefCell::new(AllocationSites::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn hierarchy(&self) -> &'a dyn ClassHierarchy {
        self.hierarchy
    }

    #[inline]
    #[must_use]
    pub const fn method(&self) -> &'a Method {
        self.method
    }

    pub(crate) fn allocation_id(&self, site: &AllocationSite) -> u32 {
        self.sites.borrow_mut().id_of(site.pc())
    }

    /// Number of allocation sites met so far.
    #[must_use]
    pub fn allocation_sites(&self) -> usize {
        self.sites.borrow().len()
    }

    pub(crate) fn expect_assignable(
        &self,
        typ: &RegisterType<'a>,
        expected: &RegisterType<'a>,
    ) -> CheckResult<()> {
        if typ.is_assignable(expected, self.hierarchy) {
            Ok(())
        } else {
            Err(Check::Violation(
                ViolationKind::NotAssignable,
                format!("{typ} is not assignable to {expected}"),
            ))
        }
    }
}

macro_rules! tc {
    ( $t1:ident <: $t2:expr ; $ctx:expr ) => {
        $ctx.expect_assignable(&$t1, $t2)
    };
}
pub(crate) use tc;

/// The abstract state for the typing pass.
///
/// Contains abstract types of registers and special abstract register type
/// information for interprocedural exchanges (exception handling, method
/// invocation return types).
#[derive(Debug, Clone)]
pub struct State<'a> {
    registers: Vec<RegisterType<'a>>,
    last_exception: Option<RegisterType<'a>>,
    last_result: Option<RegisterType<'a>>,
    expected: Option<RegisterType<'a>>,
    // types that were merged into a conflict, by register
    origins: BTreeMap<u16, (RegisterType<'a>, RegisterType<'a>)>,
}

impl PartialEq for State<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.registers == other.registers
            && self.last_exception == other.last_exception
            && self.last_result == other.last_result
            && self.expected == other.expected
    }
}

impl Eq for State<'_> {}

impl fmt::Display for State<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, typ) in self.registers.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "v{i}: {typ}")?;
        }
        if let Some(v) = &self.last_exception {
            write!(f, " last_exception: {v}")?;
        }
        if let Some(v) = &self.last_result {
            write!(f, " last_result: {v}")?;
        }
        Ok(())
    }
}

impl<'a> State<'a> {
    pub(crate) fn new(registers: Vec<RegisterType<'a>>, expected: Option<RegisterType<'a>>) -> Self {
        Self {
            registers,
            last_exception: None,
            last_result: None,
            expected,
            origins: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn registers(&self) -> &[RegisterType<'a>] {
        &self.registers
    }

    #[must_use]
    pub const fn last_result(&self) -> Option<&RegisterType<'a>> {
        self.last_result.as_ref()
    }

    #[must_use]
    pub const fn last_exception(&self) -> Option<&RegisterType<'a>> {
        self.last_exception.as_ref()
    }

    /// Declared return type of the analyzed method, `None` for `void`.
    #[must_use]
    pub const fn expected(&self) -> Option<&RegisterType<'a>> {
        self.expected.as_ref()
    }

    /// Returns the two types whose merge produced the conflict held by a register.
    #[must_use]
    pub fn conflict_origin(&self, r: Reg) -> Option<&(RegisterType<'a>, RegisterType<'a>)> {
        self.origins.get(&r.value())
    }

    /// Returns the type of the rth register.
    ///
    /// # Errors
    ///
    /// This function may return an out of bounds error.
    pub fn read_reg(&self, r: Reg) -> AnalysisResult<&RegisterType<'a>> {
        self.registers
            .get(r.index())
            .ok_or_else(|| TypeError::OutOfBoundsRegister(r).into())
    }

    fn write_reg(&mut self, r: Reg, t: RegisterType<'a>) -> AnalysisResult<()> {
        let slot = self
            .registers
            .get_mut(r.index())
            .ok_or(AnalysisError::Type(TypeError::OutOfBoundsRegister(r)))?;
        *slot = t;
        self.origins.remove(&r.value());
        Ok(())
    }

    fn write_pair(&mut self, r: Reg, t: RegisterType<'a>) -> AnalysisResult<()> {
        self.write_reg(r, t.clone())?;
        self.write_reg(r.next(), t)
    }

    /// Reads a register that is about to be used as an operand.
    ///
    /// Unknown, conflicting and uninitialized values are violations.
    pub(crate) fn use_reg(&self, r: Reg) -> CheckResult<RegisterType<'a>> {
        let typ = self.read_reg(r)?;
        match typ {
            RegisterType::Unknown => Err(Check::Violation(
                ViolationKind::UnknownRegister,
                format!("{r} is read before being assigned"),
            )),
            RegisterType::Conflict => Err(Check::Violation(
                ViolationKind::ConflictUse,
                match self.conflict_origin(r) {
                    Some((t1, t2)) => format!("{r} holds incompatible types {t1} and {t2}"),
                    None => format!("{r} holds conflicting types"),
                },
            )),
            RegisterType::Uninitialized(_) | RegisterType::UninitializedThis(_) => {
                Err(Check::Violation(
                    ViolationKind::UninitializedUse,
                    format!("{r} holds {typ} which is used before construction"),
                ))
            }
            _ => Ok(typ.clone()),
        }
    }

    /// Reads a register pair that is about to be used as a wide operand.
    pub(crate) fn use_pair(&self, r: Reg) -> CheckResult<RegisterType<'a>> {
        let t1 = self.use_reg(r)?;
        let t2 = self.use_reg(r.next())?;
        if t1 == t2 && t1.is_wide() {
            Ok(t1)
        } else {
            Err(Check::Violation(
                ViolationKind::BadPair,
                format!("{r} and {} hold {t1} and {t2}", r.next()),
            ))
        }
    }

    fn join_slot(
        &mut self,
        i: usize,
        other: &RegisterType<'a>,
        origin: Option<&(RegisterType<'a>, RegisterType<'a>)>,
        hierarchy: &dyn ClassHierarchy,
    ) {
        let current = &self.registers[i];
        let joined = current.join(other, hierarchy);
        if joined == RegisterType::Conflict {
            if let Ok(key) = u16::try_from(i) {
                if *current != RegisterType::Conflict && *other != RegisterType::Conflict {
                    self.origins.insert(key, (current.clone(), other.clone()));
                } else if let (false, Some(origin)) = (self.origins.contains_key(&key), origin) {
                    self.origins.insert(key, origin.clone());
                }
            }
        }
        self.registers[i] = joined;
    }
}

/// Result of the verification of a method.
#[derive(Debug)]
pub struct Verification<'a> {
    method: MethodRef,
    violations: Vec<Violation>,
    states: Option<Dataflow<State<'a>>>,
}

impl<'a> Verification<'a> {
    /// Runs the register types verification of the given method.
    ///
    /// # Errors
    ///
    /// Fails when the method cannot be analyzed at all (no code, malformed code,
    /// out-of-bounds registers, etc.). Violations found in well-formed code are not
    /// errors, they are listed in the result.
    pub fn compute<H: ClassHierarchy>(
        method: &'a Method,
        hierarchy: &'a H,
        options: VerifierOptions,
    ) -> AnalysisResult<Self> {
        let code = method.code().ok_or(AnalysisError::NoCode)?;
        let context = TypingContext::new(method, hierarchy);
        let (states, violations) = dataflow::forward::<State>(code, &context)?;
        log::debug!(
            "{}: {} violation(s), {} allocation site(s)",
            method,
            violations.len(),
            context.allocation_sites()
        );
        Ok(Self {
            method: method.descriptor().clone(),
            violations,
            states: options.keep_states.then_some(states),
        })
    }

    #[must_use]
    pub const fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Checks that no violation was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violations found, in code order.
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Register states at every instruction, when asked for.
    #[must_use]
    pub const fn states(&self) -> Option<&Dataflow<State<'a>>> {
        self.states.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::tests::zoo;
    use dv_dex::DexType;

    fn r(n: u8) -> Reg {
        Reg::from(n)
    }

    #[test]
    fn operand_reads() {
        let long = RegisterType::Primitive(PrimitiveKind::Long);
        let state = State::new(
            vec![
                RegisterType::Unknown,
                long.clone(),
                long.clone(),
                RegisterType::Primitive(PrimitiveKind::Int),
            ],
            None,
        );
        assert!(matches!(
            state.use_reg(r(0)),
            Err(Check::Violation(ViolationKind::UnknownRegister, _))
        ));
        assert_eq!(state.use_pair(r(1)).ok(), Some(long));
        assert!(matches!(
            state.use_pair(r(2)),
            Err(Check::Violation(ViolationKind::BadPair, _))
        ));
        assert!(state.read_reg(r(9)).is_err());
        assert_eq!(format!("{state}"), "v0: ⊥ v1: long v2: long v3: int");
    }

    #[test]
    fn conflict_origins() {
        let h = zoo();
        let dog = RegisterType::Reference(DexType::class("Dog"));
        let mut state = State::new(vec![dog.clone()], None);
        let other = State::new(vec![RegisterType::Primitive(PrimitiveKind::Int)], None);

        state.join_slot(0, &other.registers[0], None, &h);
        assert_eq!(state.registers()[0], RegisterType::Conflict);
        assert_eq!(
            state.conflict_origin(r(0)),
            Some(&(dog, RegisterType::Primitive(PrimitiveKind::Int)))
        );
        match state.use_reg(r(0)) {
            Err(Check::Violation(ViolationKind::ConflictUse, message)) => {
                assert_eq!(message, "v0 holds incompatible types LDog; and int");
            }
            _ => panic!("conflict not reported"),
        }

        // origins are not part of the state identity
        let mut plain = state.clone();
        plain.origins.clear();
        assert_eq!(plain, state);

        state.write_reg(r(0), RegisterType::Null).unwrap();
        assert!(state.conflict_origin(r(0)).is_none());
    }
}
