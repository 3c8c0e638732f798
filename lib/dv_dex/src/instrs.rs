//! Structured Dalvik instructions.
//!
//! Instructions are given already decoded: register operands are widened to [`Reg`],
//! branch offsets are resolved into absolute [addresses](Addr), switch payloads are
//! inlined into their switch instruction, and constant pool indexes are resolved into
//! [types](DexType), [methods](MethodRef) and [fields](FieldRef) references. The various
//! encodings of a same operation (`move/from16`, `add-int/2addr`, `invoke-virtual/range`,
//! etc.) are folded into a single variant.

use crate::fields::FieldRef;
use crate::methods::MethodRef;
use crate::position::SourcePosition;
use crate::registers::Reg;
use crate::types::DexType;
use crate::Addr;
use std::fmt;

/// Comparison operator of conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl fmt::Display for Comp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "eq"),
            Self::Ne => write!(f, "ne"),
            Self::Lt => write!(f, "lt"),
            Self::Ge => write!(f, "ge"),
            Self::Gt => write!(f, "gt"),
            Self::Le => write!(f, "le"),
        }
    }
}

/// Operand kind of array and field accesses (the mnemonic suffix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// 32-bit value, `int` or `float`.
    Plain,
    /// 64-bit value, `long` or `double`.
    Wide,
    Object,
    Boolean,
    Byte,
    Char,
    Short,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Plain => Ok(()),
            Self::Wide => write!(f, "-wide"),
            Self::Object => write!(f, "-object"),
            Self::Boolean => write!(f, "-boolean"),
            Self::Byte => write!(f, "-byte"),
            Self::Char => write!(f, "-char"),
            Self::Short => write!(f, "-short"),
        }
    }
}

/// Numeric operand kind of arithmetic instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Int,
    Long,
    Float,
    Double,
}

impl fmt::Display for NumKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Long => write!(f, "long"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
        }
    }
}

impl NumKind {
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }

    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(self, Self::Int | Self::Long)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Ushr => "ushr",
        };
        write!(f, "{s}")
    }
}

impl BinOp {
    /// Checks if the operation is only defined on integral operands.
    #[must_use]
    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            Self::And | Self::Or | Self::Xor | Self::Shl | Self::Shr | Self::Ushr
        )
    }

    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::Shr | Self::Ushr)
    }

    /// Checks if the operation raises `ArithmeticException` on integral zero divisors.
    #[must_use]
    pub const fn is_division(self) -> bool {
        matches!(self, Self::Div | Self::Rem)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

impl fmt::Display for InvokeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Virtual => write!(f, "virtual"),
            Self::Super => write!(f, "super"),
            Self::Direct => write!(f, "direct"),
            Self::Static => write!(f, "static"),
            Self::Interface => write!(f, "interface"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Waste cycles.
    Nop,
    /// Move the contents of one non-object register to another.
    Move(Reg, Reg),
    /// Move the contents of one register-pair to another.
    MoveWide(Reg, Reg),
    /// Move the contents of one object-bearing register to another.
    MoveObject(Reg, Reg),
    /// Move the single-word non-object result of the most recent invoke into the indicated
    /// register.
    MoveResult(Reg),
    /// Move the double-word result of the most recent invoke into the indicated register
    /// pair.
    MoveResultWide(Reg),
    /// Move the object result of the most recent invoke or `filled-new-array` into the
    /// indicated register.
    MoveResultObject(Reg),
    /// Save a just-caught exception into the given register.
    MoveException(Reg),
    ReturnVoid,
    Return(Reg),
    ReturnWide(Reg),
    ReturnObject(Reg),
    /// Move the given untyped 32-bit literal (integral, `float` bits or zero) into the
    /// specified register.
    Const(Reg, i32),
    /// Move the given `float` literal into the specified register.
    ConstFloat(Reg, f32),
    /// Move the given untyped 64-bit literal (`long` or `double` bits) into the specified
    /// register pair.
    ConstWide(Reg, i64),
    /// Move the given `double` literal into the specified register pair.
    ConstDouble(Reg, f64),
    /// Move the literal zero, used as a null reference, into the specified register.
    ConstNull(Reg),
    ConstString(Reg, String),
    ConstClass(Reg, DexType),
    MonitorEnter(Reg),
    MonitorExit(Reg),
    CheckCast(Reg, DexType),
    InstanceOf(Reg, Reg, DexType),
    ArrayLength(Reg, Reg),
    /// Construct a new instance of the indicated type; its constructor is not run.
    NewInstance(Reg, DexType),
    NewArray(Reg, Reg, DexType),
    FilledNewArray(Vec<Reg>, DexType),
    Throw(Reg),
    Goto(Addr),
    /// Switch over the keys of an inlined packed or sparse payload.
    Switch(Reg, Vec<(i32, Addr)>),
    /// Comparison of two floating point or `long` values.
    Cmp(NumKind, Reg, Reg, Reg),
    If(Comp, Reg, Reg, Addr),
    IfZ(Comp, Reg, Addr),
    Aget(Access, Reg, Reg, Reg),
    Aput(Access, Reg, Reg, Reg),
    Iget(Access, Reg, Reg, FieldRef),
    Iput(Access, Reg, Reg, FieldRef),
    Sget(Access, Reg, FieldRef),
    Sput(Access, Reg, FieldRef),
    Invoke(InvokeKind, MethodRef, Vec<Reg>),
    UnOp(UnOp, NumKind, Reg, Reg),
    /// Primitive conversion from the first type to the second one.
    Convert(Reg, Reg, DexType, DexType),
    BinOp(BinOp, NumKind, Reg, Reg, Reg),
    /// `int` operation with a literal second operand.
    BinOpLit(BinOp, Reg, Reg, i16),
}

impl Instr {
    /// Returns the instruction mnemonic.
    #[must_use]
    pub fn mnemonic(&self) -> String {
        match self {
            Self::Nop => "nop".to_string(),
            Self::Move(_, _) => "move".to_string(),
            Self::MoveWide(_, _) => "move-wide".to_string(),
            Self::MoveObject(_, _) => "move-object".to_string(),
            Self::MoveResult(_) => "move-result".to_string(),
            Self::MoveResultWide(_) => "move-result-wide".to_string(),
            Self::MoveResultObject(_) => "move-result-object".to_string(),
            Self::MoveException(_) => "move-exception".to_string(),
            Self::ReturnVoid => "return-void".to_string(),
            Self::Return(_) => "return".to_string(),
            Self::ReturnWide(_) => "return-wide".to_string(),
            Self::ReturnObject(_) => "return-object".to_string(),
            Self::Const(_, _) | Self::ConstFloat(_, _) | Self::ConstNull(_) => {
                "const".to_string()
            }
            Self::ConstWide(_, _) | Self::ConstDouble(_, _) => "const-wide".to_string(),
            Self::ConstString(_, _) => "const-string".to_string(),
            Self::ConstClass(_, _) => "const-class".to_string(),
            Self::MonitorEnter(_) => "monitor-enter".to_string(),
            Self::MonitorExit(_) => "monitor-exit".to_string(),
            Self::CheckCast(_, _) => "check-cast".to_string(),
            Self::InstanceOf(_, _, _) => "instance-of".to_string(),
            Self::ArrayLength(_, _) => "array-length".to_string(),
            Self::NewInstance(_, _) => "new-instance".to_string(),
            Self::NewArray(_, _, _) => "new-array".to_string(),
            Self::FilledNewArray(_, _) => "filled-new-array".to_string(),
            Self::Throw(_) => "throw".to_string(),
            Self::Goto(_) => "goto".to_string(),
            Self::Switch(_, _) => "switch".to_string(),
            Self::Cmp(kind, _, _, _) => match kind {
                NumKind::Long => "cmp-long".to_string(),
                k => format!("cmp-{k}"),
            },
            Self::If(comp, _, _, _) => format!("if-{comp}"),
            Self::IfZ(comp, _, _) => format!("if-{comp}z"),
            Self::Aget(access, _, _, _) => format!("aget{access}"),
            Self::Aput(access, _, _, _) => format!("aput{access}"),
            Self::Iget(access, _, _, _) => format!("iget{access}"),
            Self::Iput(access, _, _, _) => format!("iput{access}"),
            Self::Sget(access, _, _) => format!("sget{access}"),
            Self::Sput(access, _, _) => format!("sput{access}"),
            Self::Invoke(kind, _, _) => format!("invoke-{kind}"),
            Self::UnOp(UnOp::Neg, kind, _, _) => format!("neg-{kind}"),
            Self::UnOp(UnOp::Not, kind, _, _) => format!("not-{kind}"),
            Self::Convert(_, _, from, to) => {
                format!("{}-to-{}", from.to_java_string(), to.to_java_string())
            }
            Self::BinOp(op, kind, _, _, _) => format!("{op}-{kind}"),
            Self::BinOpLit(op, _, _, _) => format!("{op}-int/lit16"),
        }
    }

    /// Returns the size of the instruction in 16-bit code units, using the widest encoding
    /// of its operation.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::Nop
            | Self::Move(_, _)
            | Self::MoveWide(_, _)
            | Self::MoveObject(_, _)
            | Self::MoveResult(_)
            | Self::MoveResultWide(_)
            | Self::MoveResultObject(_)
            | Self::MoveException(_)
            | Self::ReturnVoid
            | Self::Return(_)
            | Self::ReturnWide(_)
            | Self::ReturnObject(_)
            | Self::ConstNull(_)
            | Self::MonitorEnter(_)
            | Self::MonitorExit(_)
            | Self::ArrayLength(_, _)
            | Self::Throw(_)
            | Self::UnOp(_, _, _, _)
            | Self::Convert(_, _, _, _) => 1,
            Self::ConstString(_, _)
            | Self::ConstClass(_, _)
            | Self::CheckCast(_, _)
            | Self::InstanceOf(_, _, _)
            | Self::NewInstance(_, _)
            | Self::NewArray(_, _, _)
            | Self::Goto(_)
            | Self::Cmp(_, _, _, _)
            | Self::If(_, _, _, _)
            | Self::IfZ(_, _, _)
            | Self::Aget(_, _, _, _)
            | Self::Aput(_, _, _, _)
            | Self::Iget(_, _, _, _)
            | Self::Iput(_, _, _, _)
            | Self::Sget(_, _, _)
            | Self::Sput(_, _, _)
            | Self::BinOp(_, _, _, _, _)
            | Self::BinOpLit(_, _, _, _) => 2,
            Self::Const(_, _)
            | Self::ConstFloat(_, _)
            | Self::Switch(_, _)
            | Self::FilledNewArray(_, _)
            | Self::Invoke(_, _, _) => 3,
            Self::ConstWide(_, _) | Self::ConstDouble(_, _) => 5,
        }
    }

    /// Checks if the instruction may raise an exception.
    #[must_use]
    pub const fn can_throw(&self) -> bool {
        match self {
            Self::Throw(_)
            | Self::ConstClass(_, _)
            | Self::MonitorEnter(_)
            | Self::MonitorExit(_)
            | Self::CheckCast(_, _)
            | Self::ArrayLength(_, _)
            | Self::NewInstance(_, _)
            | Self::NewArray(_, _, _)
            | Self::FilledNewArray(_, _)
            | Self::Aget(_, _, _, _)
            | Self::Aput(_, _, _, _)
            | Self::Iget(_, _, _, _)
            | Self::Iput(_, _, _, _)
            | Self::Sget(_, _, _)
            | Self::Sput(_, _, _)
            | Self::Invoke(_, _, _) => true,
            Self::BinOp(op, kind, _, _, _) => op.is_division() && kind.is_integral(),
            Self::BinOpLit(op, _, _, _) => op.is_division(),
            _ => false,
        }
    }

    /// Checks if the instruction leaves the method normally.
    #[must_use]
    pub const fn does_return(&self) -> bool {
        matches!(
            self,
            Self::ReturnVoid | Self::Return(_) | Self::ReturnWide(_) | Self::ReturnObject(_)
        )
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self {
            Self::Nop | Self::ReturnVoid => Ok(()),
            Self::Move(a, b)
            | Self::MoveWide(a, b)
            | Self::MoveObject(a, b)
            | Self::ArrayLength(a, b)
            | Self::UnOp(_, _, a, b)
            | Self::Convert(a, b, _, _) => write!(f, " {a}, {b}"),
            Self::MoveResult(a)
            | Self::MoveResultWide(a)
            | Self::MoveResultObject(a)
            | Self::MoveException(a)
            | Self::Return(a)
            | Self::ReturnWide(a)
            | Self::ReturnObject(a)
            | Self::ConstNull(a)
            | Self::MonitorEnter(a)
            | Self::MonitorExit(a)
            | Self::Throw(a) => write!(f, " {a}"),
            Self::Const(a, v) => write!(f, " {a}, #{v}"),
            Self::ConstFloat(a, v) => write!(f, " {a}, #{v}"),
            Self::ConstWide(a, v) => write!(f, " {a}, #{v}"),
            Self::ConstDouble(a, v) => write!(f, " {a}, #{v}"),
            Self::ConstString(a, s) => write!(f, " {a}, {s:?}"),
            Self::ConstClass(a, t) | Self::CheckCast(a, t) | Self::NewInstance(a, t) => {
                write!(f, " {a}, {t}")
            }
            Self::InstanceOf(a, b, t) | Self::NewArray(a, b, t) => write!(f, " {a}, {b}, {t}"),
            Self::FilledNewArray(args, t) => {
                write!(f, " {{")?;
                write_regs(f, args)?;
                write!(f, "}}, {t}")
            }
            Self::Goto(target) => write!(f, " {target}"),
            Self::Switch(a, targets) => {
                write!(f, " {a}")?;
                for (key, target) in targets {
                    write!(f, ", {key}:{target}")?;
                }
                Ok(())
            }
            Self::Cmp(_, a, b, c)
            | Self::Aget(_, a, b, c)
            | Self::Aput(_, a, b, c)
            | Self::BinOp(_, _, a, b, c) => write!(f, " {a}, {b}, {c}"),
            Self::If(_, a, b, target) => write!(f, " {a}, {b}, {target}"),
            Self::IfZ(_, a, target) => write!(f, " {a}, {target}"),
            Self::Iget(_, a, b, field) | Self::Iput(_, a, b, field) => {
                write!(f, " {a}, {b}, {field}")
            }
            Self::Sget(_, a, field) | Self::Sput(_, a, field) => write!(f, " {a}, {field}"),
            Self::Invoke(_, method, args) => {
                write!(f, " {{")?;
                write_regs(f, args)?;
                write!(f, "}}, {method}")
            }
            Self::BinOpLit(_, a, b, lit) => write!(f, " {a}, {b}, #{lit}"),
        }
    }
}

fn write_regs(f: &mut fmt::Formatter, regs: &[Reg]) -> fmt::Result {
    for (i, r) in regs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{r}")?;
    }
    Ok(())
}

/// An instruction located in the method code.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledInstr {
    pub(crate) addr: Addr,
    pub(crate) next_addr: Addr,
    pub(crate) instr: Instr,
    pub(crate) position: SourcePosition,
}

impl fmt::Display for LabeledInstr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.addr, self.instr)
    }
}

impl LabeledInstr {
    #[inline]
    #[must_use]
    pub const fn addr(&self) -> Addr {
        self.addr
    }

    #[inline]
    #[must_use]
    pub const fn instr(&self) -> &Instr {
        &self.instr
    }

    /// Returns the address of the instruction that follows in the code.
    #[inline]
    #[must_use]
    pub const fn next_addr(&self) -> Addr {
        self.next_addr
    }

    #[inline]
    #[must_use]
    pub const fn position(&self) -> &SourcePosition {
        &self.position
    }

    #[inline]
    #[must_use]
    pub const fn can_throw(&self) -> bool {
        self.instr.can_throw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics() {
        let field = FieldRef::new(DexType::class("Foo"), "bar", DexType::Boolean);
        assert_eq!(
            Instr::Iget(Access::Boolean, Reg::from(0u8), Reg::from(1u8), field).mnemonic(),
            "iget-boolean"
        );
        assert_eq!(
            Instr::BinOp(
                BinOp::Add,
                NumKind::Long,
                Reg::from(0u8),
                Reg::from(2u8),
                Reg::from(4u8)
            )
            .mnemonic(),
            "add-long"
        );
        assert_eq!(
            Instr::Convert(Reg::from(0u8), Reg::from(1u8), DexType::Int, DexType::Char)
                .mnemonic(),
            "int-to-char"
        );
        assert_eq!(
            Instr::IfZ(Comp::Ne, Reg::from(0u8), Addr(4)).mnemonic(),
            "if-nez"
        );
    }

    #[test]
    fn throwing_instructions() {
        let r = Reg::from(0u8);
        assert!(Instr::Throw(r).can_throw());
        assert!(Instr::BinOp(BinOp::Div, NumKind::Int, r, r, r).can_throw());
        assert!(!Instr::BinOp(BinOp::Div, NumKind::Float, r, r, r).can_throw());
        assert!(!Instr::Move(r, r).can_throw());
        assert!(Instr::ReturnObject(r).does_return());
    }

    #[test]
    fn display() {
        let method = MethodRef::new(DexType::class("Foo"), "<init>", vec![], DexType::Void);
        let instr = Instr::Invoke(
            InvokeKind::Direct,
            method,
            vec![Reg::from(0u8), Reg::from(1u8)],
        );
        assert_eq!(format!("{instr}"), "invoke-direct {v0, v1}, LFoo;-><init>()V");
    }
}
