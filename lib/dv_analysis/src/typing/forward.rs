use crate::controlflow::Branch;
use crate::dataflow::AbstractForwardState;
use crate::errors::{AnalysisError, AnalysisResult};
use crate::hierarchy::ClassHierarchy;
use crate::typing::errors::{Check, CheckResult, TypeError, Violation, ViolationKind};
use crate::typing::types::{
    PrimitiveKind, RegisterType, JAVA_LANG_CLASS, JAVA_LANG_OBJECT, JAVA_LANG_STRING,
    JAVA_LANG_THROWABLE,
};
use crate::typing::uninit::{AllocationSite, Uninit};
use crate::typing::{tc, State, TypingContext};
use dv_dex::instrs::{Access, Comp, Instr, InvokeKind, LabeledInstr, NumKind, UnOp};
use dv_dex::methods::MethodRef;
use dv_dex::registers::Reg;
use dv_dex::DexType;

const INT: RegisterType<'static> = RegisterType::Primitive(PrimitiveKind::Int);
const BOOLEAN: RegisterType<'static> = RegisterType::Primitive(PrimitiveKind::Boolean);

fn violation<T>(kind: ViolationKind, message: String) -> CheckResult<T> {
    Err(Check::Violation(kind, message))
}

const fn num_kind(kind: NumKind) -> PrimitiveKind {
    match kind {
        NumKind::Int => PrimitiveKind::Int,
        NumKind::Long => PrimitiveKind::Long,
        NumKind::Float => PrimitiveKind::Float,
        NumKind::Double => PrimitiveKind::Double,
    }
}

const fn access_kind(access: Access) -> Option<PrimitiveKind> {
    match access {
        Access::Boolean => Some(PrimitiveKind::Boolean),
        Access::Byte => Some(PrimitiveKind::Byte),
        Access::Char => Some(PrimitiveKind::Char),
        Access::Short => Some(PrimitiveKind::Short),
        Access::Plain | Access::Wide | Access::Object => None,
    }
}

/// Checks that a declared (field or array element) type can be accessed with the given
/// operation suffix.
fn access_matches(access: Access, typ: &DexType) -> bool {
    match access {
        Access::Plain => matches!(typ, DexType::Int | DexType::Float),
        Access::Wide => matches!(typ, DexType::Long | DexType::Double),
        Access::Object => typ.is_reference(),
        _ => access_kind(access) == PrimitiveKind::from_dex_type(typ),
    }
}

fn declared<'a>(typ: &DexType) -> RegisterType<'a> {
    RegisterType::from_dex_type(typ).unwrap_or(RegisterType::Conflict)
}

fn expect_single_word(typ: &RegisterType) -> CheckResult<()> {
    if typ.is_single_word() {
        Ok(())
    } else {
        violation(
            ViolationKind::NotAssignable,
            format!("{typ} is not a 32-bit primitive value"),
        )
    }
}

fn expect_reference(typ: &RegisterType) -> CheckResult<()> {
    if typ.is_reference_like() {
        Ok(())
    } else {
        violation(
            ViolationKind::NotAssignable,
            format!("{typ} is not a reference"),
        )
    }
}

impl<'a> AbstractForwardState<'a> for State<'a> {
    type Context = TypingContext<'a>;
    type Error = AnalysisError;
    type Diagnostic = Violation;

    fn init(ctx: &TypingContext<'a>) -> AnalysisResult<Self> {
        // Note1: method registers layout:
        // [...local registers ...]
        // ['this' register (if method is not static)]
        // [...parameters...]
        let method = ctx.method();
        let code = method.code().ok_or(AnalysisError::NoCode)?;
        let nb_registers = usize::from(code.registers_size());
        let nb_ins = usize::from(code.ins_size());
        let descriptor = method.descriptor();

        let needed = descriptor.parameters_width() + usize::from(!method.is_static());
        if needed != nb_ins {
            return Err(TypeError::BadInsSize {
                needed,
                available: nb_ins,
            }
            .into());
        }

        let mut registers = vec![RegisterType::Unknown; nb_registers];
        let mut param_reg = nb_registers - nb_ins;

        if !method.is_static() {
            let class = method.definer().clone();
            registers[param_reg] = if method.is_constructor() && class != *JAVA_LANG_OBJECT {
                RegisterType::UninitializedThis(class)
            } else {
                RegisterType::Reference(class)
            };
            param_reg += 1;
        }

        for type_descr in descriptor.parameters_types() {
            let typ = RegisterType::from_dex_type(type_descr)?;
            if typ.is_wide() {
                registers[param_reg] = typ.clone();
                param_reg += 1;
            }
            registers[param_reg] = typ;
            param_reg += 1;
        }

        let expected = match descriptor.return_type() {
            DexType::Void => None,
            t => Some(RegisterType::from_dex_type(t)?),
        };

        Ok(Self::new(registers, expected))
    }

    fn join(&mut self, other: &Self, ctx: &TypingContext<'a>) -> AnalysisResult<()> {
        if self.registers.len() != other.registers.len() || self.expected != other.expected {
            return Err(TypeError::IncompatibleStates.into());
        }
        let hierarchy = ctx.hierarchy();
        for (i, typ) in other.registers.iter().enumerate() {
            let origin = u16::try_from(i)
                .ok()
                .and_then(|key| other.origins.get(&key));
            self.join_slot(i, typ, origin, hierarchy);
        }

        self.last_exception = match (&self.last_exception, &other.last_exception) {
            (Some(t1), Some(t2)) => Some(t1.join(t2, hierarchy)),
            _ => None,
        };
        self.last_result = match (&self.last_result, &other.last_result) {
            (Some(t1), Some(t2)) => Some(t1.join(t2, hierarchy)),
            _ => None,
        };

        Ok(())
    }

    fn transfer_branch(&mut self, branch: &Branch, _ctx: &TypingContext<'a>) -> AnalysisResult<()> {
        match branch {
            Branch::IfTrue(_, _, _)
            | Branch::IfFalse(_, _, _)
            | Branch::Switch(_, _)
            | Branch::SwitchDefault
            | Branch::Jmp
            | Branch::Sequence
            | Branch::ArrayAccessSuccess
            | Branch::InvokeSuccess
            | Branch::DivSuccess => Ok(()),
            Branch::Catch(t) => {
                self.last_result = None;
                self.last_exception = Some(RegisterType::from_dex_type(t)?);
                Ok(())
            }
            Branch::CatchAll => {
                self.last_result = None;
                self.last_exception = Some(RegisterType::Reference(JAVA_LANG_THROWABLE.clone()));
                Ok(())
            }
            Branch::CastSuccess(ptr, cls) => {
                // null stays null, failed checks were already reported
                if matches!(self.read_reg(*ptr)?, RegisterType::Reference(_)) {
                    self.write_reg(*ptr, declared(cls))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn transfer_instr(
        &mut self,
        linstr: &LabeledInstr,
        ctx: &TypingContext<'a>,
        diagnostics: &mut Vec<Violation>,
    ) -> AnalysisResult<()> {
        match self.apply(linstr, ctx) {
            Ok(()) => Ok(()),
            Err(Check::Fatal(err)) => Err(err),
            Err(Check::Violation(kind, message)) => {
                log::debug!("{}: {kind}: {message}", linstr.addr());
                diagnostics.push(Violation::new(
                    linstr.addr(),
                    linstr.position().clone(),
                    kind,
                    message,
                ));
                self.recover(linstr.instr())
            }
        }
    }
}

impl<'a> State<'a> {
    fn write_typed(&mut self, r: Reg, t: RegisterType<'a>) -> AnalysisResult<()> {
        if t.is_wide() {
            self.write_pair(r, t)
        } else {
            self.write_reg(r, t)
        }
    }

    fn use_kind(&self, r: Reg, kind: PrimitiveKind, ctx: &TypingContext<'a>) -> CheckResult<()> {
        let expected = RegisterType::Primitive(kind);
        let typ = if kind.is_wide() {
            self.use_pair(r)?
        } else {
            self.use_reg(r)?
        };
        tc!(typ <: &expected ; ctx)
    }

    fn use_typed(&self, r: Reg, expected: &RegisterType<'a>, ctx: &TypingContext<'a>) -> CheckResult<()> {
        let typ = if expected.is_wide() {
            self.use_pair(r)?
        } else {
            self.use_reg(r)?
        };
        if expected.is_reference_like() {
            expect_reference(&typ)?;
        }
        tc!(typ <: expected ; ctx)
    }

    fn check_escape(&self) -> CheckResult<()> {
        let escaping: Vec<String> = self
            .uninitialized_registers()
            .map(|(r, t)| format!("{r}: {t}"))
            .collect();
        if escaping.is_empty() {
            Ok(())
        } else {
            violation(
                ViolationKind::UninitializedEscape,
                format!("uninitialized objects still live: {}", escaping.join(", ")),
            )
        }
    }

    /// Returns the component type of the array held by a register, `None` for `null`.
    fn use_array(&self, r: Reg) -> CheckResult<Option<DexType>> {
        match self.use_reg(r)? {
            RegisterType::Null | RegisterType::Zero => Ok(None),
            RegisterType::Reference(typ @ DexType::Array(_, _)) => Ok(typ.component()),
            typ => violation(
                ViolationKind::NotAssignable,
                format!("{r} holds {typ} which is not an array"),
            ),
        }
    }

    fn check_arguments(
        &self,
        method: &MethodRef,
        args: &[Reg],
        has_receiver: bool,
        ctx: &TypingContext<'a>,
    ) -> CheckResult<()> {
        let expected = method.parameters_width() + usize::from(has_receiver);
        if args.len() != expected {
            return violation(
                ViolationKind::Arity,
                format!(
                    "{method} expects {expected} argument registers, {} given",
                    args.len()
                ),
            );
        }
        let mut i = usize::from(has_receiver);
        for type_descr in method.parameters_types() {
            let param = RegisterType::from_dex_type(type_descr)?;
            let r = args[i];
            if param.is_wide() {
                if args[i + 1] != r.next() {
                    return violation(
                        ViolationKind::BadPair,
                        format!("{r} and {} do not form a register pair", args[i + 1]),
                    );
                }
                i += 2;
            } else {
                i += 1;
            }
            self.use_typed(r, &param, ctx)?;
        }
        Ok(())
    }

    /// Runs a constructor on the object held by `receiver`, promoting all its copies.
    fn construct(
        &mut self,
        receiver: Reg,
        method: &MethodRef,
        ctx: &TypingContext<'a>,
    ) -> CheckResult<()> {
        let hierarchy = ctx.hierarchy();
        let target = self.read_reg(receiver)?.clone();
        match &target {
            RegisterType::Uninitialized(uninit) => {
                if !hierarchy.is_constructor_of(method, uninit.typ()) {
                    return violation(
                        ViolationKind::ConstructorMismatch,
                        format!("{method} does not construct {}", uninit.typ()),
                    );
                }
                let count = self.promote(&target, uninit.typ());
                log::trace!("{target} promoted in {count} slot(s)");
                Ok(())
            }
            RegisterType::UninitializedThis(typ) => {
                let definer = method.definer();
                let delegates = definer == typ
                    || match hierarchy.superclass_of(typ) {
                        Some(superclass) => &superclass == definer,
                        // nothing is known about the class ancestors
                        None => hierarchy.class_def(typ).is_none(),
                    };
                if !(delegates && hierarchy.is_constructor_of(method, definer)) {
                    return violation(
                        ViolationKind::ConstructorMismatch,
                        format!("{method} cannot initialize {typ}"),
                    );
                }
                let count = self.promote(&target, typ);
                log::trace!("{target} promoted in {count} slot(s)");
                Ok(())
            }
            RegisterType::Reference(typ) => violation(
                ViolationKind::DoubleConstruction,
                format!("{receiver} already holds an initialized {typ}"),
            ),
            _ => {
                self.use_reg(receiver)?;
                violation(
                    ViolationKind::NotAssignable,
                    format!("{receiver} holds {target} which cannot be constructed"),
                )
            }
        }
    }

    /// Sets the destination of a failed instruction to its declared result type, or to
    /// `Conflict` when it has none.
    fn recover(&mut self, instr: &Instr) -> AnalysisResult<()> {
        match instr {
            Instr::Move(dst, _)
            | Instr::MoveObject(dst, _)
            | Instr::MoveResult(dst)
            | Instr::MoveResultObject(dst)
            | Instr::NewInstance(dst, _) => self.write_reg(*dst, RegisterType::Conflict),
            Instr::MoveWide(dst, _) | Instr::MoveResultWide(dst) => {
                self.write_pair(*dst, RegisterType::Conflict)
            }
            Instr::MoveException(dst) => {
                self.write_reg(*dst, RegisterType::Reference(JAVA_LANG_THROWABLE.clone()))
            }
            Instr::InstanceOf(dst, _, _) => self.write_reg(*dst, BOOLEAN),
            Instr::ArrayLength(dst, _) | Instr::Cmp(_, dst, _, _) | Instr::BinOpLit(_, dst, _, _) => {
                self.write_reg(*dst, INT)
            }
            Instr::CheckCast(r, typ) | Instr::NewArray(r, _, typ) => {
                self.write_reg(*r, declared(typ))
            }
            Instr::FilledNewArray(_, typ) => {
                self.last_result = Some(declared(typ));
                Ok(())
            }
            Instr::Aget(access, dst, _, _) => match access_kind(*access) {
                Some(kind) => self.write_reg(*dst, RegisterType::Primitive(kind)),
                None if *access == Access::Wide => self.write_pair(*dst, RegisterType::Conflict),
                None => self.write_reg(*dst, RegisterType::Conflict),
            },
            Instr::Iget(_, dst, _, field) | Instr::Sget(_, dst, field) => {
                self.write_typed(*dst, declared(field.type_()))
            }
            Instr::Invoke(_, method, _) => {
                self.last_result = match method.return_type() {
                    DexType::Void => None,
                    t => Some(declared(t)),
                };
                Ok(())
            }
            Instr::UnOp(_, kind, dst, _) | Instr::BinOp(_, kind, dst, _, _) => {
                self.write_typed(*dst, RegisterType::Primitive(num_kind(*kind)))
            }
            Instr::Convert(dst, _, _, to) => self.write_typed(*dst, declared(to)),
            _ => Ok(()),
        }
    }

    #[allow(clippy::cognitive_complexity)]
    #[allow(clippy::too_many_lines)]
    fn apply(&mut self, linstr: &LabeledInstr, ctx: &TypingContext<'a>) -> CheckResult<()> {
        // save last status registers, and reset them to the 'default' value (None)
        let last_exception = self.last_exception.take();
        let last_result = self.last_result.take();

        match linstr.instr() {
            Instr::Nop | Instr::Goto(_) => Ok(()),

            Instr::Move(dst, src) => {
                let typ = self.use_reg(*src)?;
                expect_single_word(&typ)?;
                Ok(self.write_reg(*dst, typ)?)
            }
            Instr::MoveWide(dst, src) => {
                let typ = self.use_pair(*src)?;
                Ok(self.write_pair(*dst, typ)?)
            }
            Instr::MoveObject(dst, src) => {
                // the only instruction allowed to copy uninitialized objects
                let typ = self.read_reg(*src)?.clone();
                if !typ.is_uninitialized() {
                    expect_reference(&self.use_reg(*src)?)?;
                }
                Ok(self.write_reg(*dst, typ)?)
            }

            Instr::MoveResult(dst) => match last_result {
                Some(typ) => {
                    expect_single_word(&typ)?;
                    Ok(self.write_reg(*dst, typ)?)
                }
                None => violation(
                    ViolationKind::MissingResult,
                    "no result to move".to_string(),
                ),
            },
            Instr::MoveResultWide(dst) => match last_result {
                Some(typ) if typ.is_wide() => Ok(self.write_pair(*dst, typ)?),
                Some(typ) => violation(
                    ViolationKind::NotAssignable,
                    format!("{typ} is not a wide value"),
                ),
                None => violation(
                    ViolationKind::MissingResult,
                    "no result to move".to_string(),
                ),
            },
            Instr::MoveResultObject(dst) => match last_result {
                Some(typ) => {
                    expect_reference(&typ)?;
                    Ok(self.write_reg(*dst, typ)?)
                }
                None => violation(
                    ViolationKind::MissingResult,
                    "no result to move".to_string(),
                ),
            },
            Instr::MoveException(dst) => match last_exception {
                Some(typ) => Ok(self.write_reg(*dst, typ)?),
                None => violation(
                    ViolationKind::MissingException,
                    "no exception was caught here".to_string(),
                ),
            },

            Instr::ReturnVoid => {
                self.check_escape()?;
                match &self.expected {
                    None => Ok(()),
                    Some(expected) => violation(
                        ViolationKind::BadReturn,
                        format!("return-void in a method returning {expected}"),
                    ),
                }
            }
            Instr::Return(r) | Instr::ReturnWide(r) | Instr::ReturnObject(r) => {
                self.check_escape()?;
                let expected = match &self.expected {
                    Some(expected) => expected.clone(),
                    None => {
                        return violation(
                            ViolationKind::BadReturn,
                            "returning a value from a void method".to_string(),
                        )
                    }
                };
                let matching = match linstr.instr() {
                    Instr::Return(_) => !expected.is_wide() && !expected.is_reference_like(),
                    Instr::ReturnWide(_) => expected.is_wide(),
                    _ => expected.is_reference_like(),
                };
                if !matching {
                    return violation(
                        ViolationKind::BadReturn,
                        format!("{} in a method returning {expected}", linstr.instr().mnemonic()),
                    );
                }
                self.use_typed(*r, &expected, ctx)
            }

            Instr::Const(dst, value) => Ok(self.write_reg(*dst, RegisterType::literal(*value))?),
            Instr::ConstFloat(dst, _) => {
                Ok(self.write_reg(*dst, RegisterType::Primitive(PrimitiveKind::Float))?)
            }
            Instr::ConstWide(dst, _) => Ok(self.write_pair(*dst, RegisterType::WideLiteral)?),
            Instr::ConstDouble(dst, _) => {
                Ok(self.write_pair(*dst, RegisterType::Primitive(PrimitiveKind::Double))?)
            }
            Instr::ConstNull(dst) => Ok(self.write_reg(*dst, RegisterType::Null)?),
            Instr::ConstString(dst, _) => {
                Ok(self.write_reg(*dst, RegisterType::Reference(JAVA_LANG_STRING.clone()))?)
            }
            Instr::ConstClass(dst, _) => {
                Ok(self.write_reg(*dst, RegisterType::Reference(JAVA_LANG_CLASS.clone()))?)
            }

            Instr::MonitorEnter(r) | Instr::MonitorExit(r) => {
                let object = RegisterType::Reference(JAVA_LANG_OBJECT.clone());
                self.use_typed(*r, &object, ctx)
            }
            Instr::CheckCast(r, typ) => {
                if !typ.is_reference() {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("cannot cast to {typ}"),
                    );
                }
                let object = RegisterType::Reference(JAVA_LANG_OBJECT.clone());
                self.use_typed(*r, &object, ctx)
            }
            Instr::InstanceOf(dst, src, typ) => {
                if !typ.is_reference() {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("cannot check instances of {typ}"),
                    );
                }
                let object = RegisterType::Reference(JAVA_LANG_OBJECT.clone());
                self.use_typed(*src, &object, ctx)?;
                Ok(self.write_reg(*dst, BOOLEAN)?)
            }
            Instr::ArrayLength(dst, arr) => {
                self.use_array(*arr)?;
                Ok(self.write_reg(*dst, INT)?)
            }

            Instr::NewInstance(dst, typ) => {
                if !matches!(typ, DexType::Class(_)) {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("cannot instantiate {typ}"),
                    );
                }
                let site = AllocationSite::new(ctx.method().descriptor(), linstr.addr());
                let id = ctx.allocation_id(&site);
                let class = ctx.hierarchy().class_def(typ);
                let value = RegisterType::Uninitialized(Uninit::new(id, typ.clone(), class, site));
                // an object from a previous execution of this allocation is no longer
                // distinguishable from the new one
                let stale = self.invalidate(&value);
                if stale > 0 {
                    log::trace!("{stale} stale copies of {value} discarded");
                }
                Ok(self.write_reg(*dst, value)?)
            }
            Instr::NewArray(dst, size, typ) => {
                self.use_kind(*size, PrimitiveKind::Int, ctx)?;
                if !matches!(typ, DexType::Array(_, _)) {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("{typ} is not an array type"),
                    );
                }
                Ok(self.write_reg(*dst, RegisterType::Reference(typ.clone()))?)
            }
            Instr::FilledNewArray(args, typ) => {
                let elem = match typ.component() {
                    Some(elem) if !elem.is_wide() => elem,
                    _ => {
                        return violation(
                            ViolationKind::NotAssignable,
                            format!("cannot fill an array of type {typ}"),
                        )
                    }
                };
                let elem = RegisterType::from_dex_type(&elem)?;
                for r in args {
                    self.use_typed(*r, &elem, ctx)?;
                }
                self.last_result = Some(RegisterType::Reference(typ.clone()));
                Ok(())
            }

            Instr::Throw(r) => {
                self.check_escape()?;
                let throwable = RegisterType::Reference(JAVA_LANG_THROWABLE.clone());
                self.use_typed(*r, &throwable, ctx)
            }

            Instr::Switch(r, _) => self.use_kind(*r, PrimitiveKind::Int, ctx),
            Instr::If(comp, r1, r2, _) => {
                let t1 = self.use_reg(*r1)?;
                let t2 = self.use_reg(*r2)?;
                if t1.is_integral() && t2.is_integral() {
                    Ok(())
                } else if t1.is_reference_like()
                    && t2.is_reference_like()
                    && matches!(comp, Comp::Eq | Comp::Ne)
                {
                    Ok(())
                } else {
                    violation(
                        ViolationKind::NotAssignable,
                        format!("cannot compare {t1} and {t2} with if-{comp}"),
                    )
                }
            }
            Instr::IfZ(comp, r, _) => {
                let typ = self.use_reg(*r)?;
                if typ.is_integral() || (typ.is_reference_like() && matches!(comp, Comp::Eq | Comp::Ne))
                {
                    Ok(())
                } else {
                    violation(
                        ViolationKind::NotAssignable,
                        format!("cannot compare {typ} to zero with if-{comp}z"),
                    )
                }
            }
            Instr::Cmp(kind, dst, r1, r2) => {
                self.use_kind(*r1, num_kind(*kind), ctx)?;
                self.use_kind(*r2, num_kind(*kind), ctx)?;
                Ok(self.write_reg(*dst, INT)?)
            }

            Instr::Aget(access, dst, arr, idx) => {
                self.use_kind(*idx, PrimitiveKind::Int, ctx)?;
                let value = match self.use_array(*arr)? {
                    Some(elem) if access_matches(*access, &elem) => RegisterType::from_dex_type(&elem)?,
                    Some(elem) => {
                        return violation(
                            ViolationKind::NotAssignable,
                            format!("{} cannot read an element of type {elem}", linstr.instr().mnemonic()),
                        )
                    }
                    // reading from null always throws
                    None => match (access, access_kind(*access)) {
                        (_, Some(kind)) => RegisterType::Primitive(kind),
                        (Access::Wide, None) => RegisterType::Primitive(PrimitiveKind::Long),
                        (Access::Object, None) => RegisterType::Null,
                        _ => INT,
                    },
                };
                Ok(self.write_typed(*dst, value)?)
            }
            Instr::Aput(access, val, arr, idx) => {
                self.use_kind(*idx, PrimitiveKind::Int, ctx)?;
                match self.use_array(*arr)? {
                    Some(elem) if access_matches(*access, &elem) => {
                        let elem = RegisterType::from_dex_type(&elem)?;
                        if elem.is_reference_like() {
                            // element types of reference arrays are checked at runtime
                            let object = RegisterType::Reference(JAVA_LANG_OBJECT.clone());
                            self.use_typed(*val, &object, ctx)
                        } else {
                            self.use_typed(*val, &elem, ctx)
                        }
                    }
                    Some(elem) => violation(
                        ViolationKind::NotAssignable,
                        format!("{} cannot write an element of type {elem}", linstr.instr().mnemonic()),
                    ),
                    None => match access {
                        Access::Wide => self.use_pair(*val).map(|_| ()),
                        Access::Object => {
                            let object = RegisterType::Reference(JAVA_LANG_OBJECT.clone());
                            self.use_typed(*val, &object, ctx)
                        }
                        _ => self.use_reg(*val).and_then(|t| expect_single_word(&t)),
                    },
                }
            }

            Instr::Iget(access, dst, obj, field) => {
                if !access_matches(*access, field.type_()) {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("{} cannot read field {field}", linstr.instr().mnemonic()),
                    );
                }
                let definer = RegisterType::Reference(field.definer().clone());
                self.use_typed(*obj, &definer, ctx)?;
                Ok(self.write_typed(*dst, RegisterType::from_dex_type(field.type_())?)?)
            }
            Instr::Iput(access, val, obj, field) => {
                if !access_matches(*access, field.type_()) {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("{} cannot write field {field}", linstr.instr().mnemonic()),
                    );
                }
                // a constructor may set its own fields before calling the super constructor
                let own_field = matches!(self.read_reg(*obj)?,
                    RegisterType::UninitializedThis(typ) if typ == field.definer());
                if !own_field {
                    let definer = RegisterType::Reference(field.definer().clone());
                    self.use_typed(*obj, &definer, ctx)?;
                }
                let typ = RegisterType::from_dex_type(field.type_())?;
                self.use_typed(*val, &typ, ctx)
            }
            Instr::Sget(access, dst, field) => {
                if !access_matches(*access, field.type_()) {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("{} cannot read field {field}", linstr.instr().mnemonic()),
                    );
                }
                Ok(self.write_typed(*dst, RegisterType::from_dex_type(field.type_())?)?)
            }
            Instr::Sput(access, val, field) => {
                if !access_matches(*access, field.type_()) {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("{} cannot write field {field}", linstr.instr().mnemonic()),
                    );
                }
                let typ = RegisterType::from_dex_type(field.type_())?;
                self.use_typed(*val, &typ, ctx)
            }

            Instr::Invoke(kind, method, args) => {
                let has_receiver = *kind != InvokeKind::Static;
                self.check_arguments(method, args, has_receiver, ctx)?;
                if let (true, Some(receiver)) = (has_receiver, args.first()) {
                    if *kind == InvokeKind::Direct && method.is_constructor() {
                        self.construct(*receiver, method, ctx)?;
                    } else {
                        let definer = RegisterType::Reference(method.definer().clone());
                        self.use_typed(*receiver, &definer, ctx)?;
                    }
                }
                self.last_result = match method.return_type() {
                    DexType::Void => None,
                    t => Some(RegisterType::from_dex_type(t)?),
                };
                Ok(())
            }

            Instr::UnOp(op, kind, dst, src) => {
                if *op == UnOp::Not && !matches!(kind, NumKind::Int | NumKind::Long) {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("not-{kind} is not defined"),
                    );
                }
                self.use_kind(*src, num_kind(*kind), ctx)?;
                Ok(self.write_typed(*dst, RegisterType::Primitive(num_kind(*kind)))?)
            }
            Instr::Convert(dst, src, from, to) => {
                let (from_kind, to_kind) = match (
                    PrimitiveKind::from_dex_type(from),
                    PrimitiveKind::from_dex_type(to),
                ) {
                    (Some(from_kind), Some(to_kind)) => (from_kind, to_kind),
                    _ => {
                        return violation(
                            ViolationKind::NotAssignable,
                            format!("cannot convert {from} to {to}"),
                        )
                    }
                };
                self.use_kind(*src, from_kind, ctx)?;
                Ok(self.write_typed(*dst, RegisterType::Primitive(to_kind))?)
            }
            Instr::BinOp(op, kind, dst, r1, r2) => {
                if op.is_bitwise() && !kind.is_integral() {
                    return violation(
                        ViolationKind::NotAssignable,
                        format!("{op}-{kind} is not defined"),
                    );
                }
                let kind = num_kind(*kind);
                self.use_kind(*r1, kind, ctx)?;
                // shift distances are always ints
                let second = if op.is_shift() { PrimitiveKind::Int } else { kind };
                self.use_kind(*r2, second, ctx)?;
                Ok(self.write_typed(*dst, RegisterType::Primitive(kind))?)
            }
            Instr::BinOpLit(_, dst, src, _) => {
                self.use_kind(*src, PrimitiveKind::Int, ctx)?;
                Ok(self.write_reg(*dst, INT)?)
            }
        }
    }
}
