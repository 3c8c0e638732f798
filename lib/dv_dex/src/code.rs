//! Method code: instructions, registers layout and exception handlers.

use crate::errors::{DexError, DexResult};
use crate::instrs::{Instr, LabeledInstr};
use crate::position::SourcePosition;
use crate::types::DexType;
use crate::Addr;

/// An exception handler: caught type and handler address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchHandler {
    catch_type: DexType,
    addr: Addr,
}

impl CatchHandler {
    #[must_use]
    pub const fn new(catch_type: DexType, addr: Addr) -> Self {
        Self { catch_type, addr }
    }

    #[inline]
    #[must_use]
    pub const fn catch_type(&self) -> &DexType {
        &self.catch_type
    }

    #[inline]
    #[must_use]
    pub const fn catch_addr(&self) -> Addr {
        self.addr
    }
}

/// A range of instructions protected by exception handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryItem {
    start: Addr,
    end: Addr,
    handlers: Vec<CatchHandler>,
    catch_all: Option<Addr>,
}

impl TryItem {
    /// Builds a try range covering `[start, end)`.
    #[must_use]
    pub const fn new(
        start: Addr,
        end: Addr,
        handlers: Vec<CatchHandler>,
        catch_all: Option<Addr>,
    ) -> Self {
        Self {
            start,
            end,
            handlers,
            catch_all,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start_addr(&self) -> Addr {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end_addr(&self) -> Addr {
        self.end
    }

    #[inline]
    #[must_use]
    pub fn covers(&self, addr: Addr) -> bool {
        addr >= self.start && addr < self.end
    }

    pub fn iter_handlers(&self) -> impl Iterator<Item = &CatchHandler> {
        self.handlers.iter()
    }

    #[inline]
    #[must_use]
    pub const fn catch_all_addr(&self) -> Option<Addr> {
        self.catch_all
    }
}

/// The code of a method.
///
/// Registers layout follows the Dalvik convention: the last `ins_size` registers hold the
/// incoming arguments (receiver first for instance methods), the other ones are locals.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    registers_size: u16,
    ins_size: u16,
    instrs: Vec<LabeledInstr>,
    tries: Vec<TryItem>,
}

impl Code {
    /// Builds a method code from located instructions.
    ///
    /// # Errors
    ///
    /// Fails if the code is empty, if addresses are not strictly increasing, if the
    /// arguments do not fit in the registers, or if a try range is empty.
    pub fn new(
        registers_size: u16,
        ins_size: u16,
        instrs: Vec<(Addr, Instr, SourcePosition)>,
        tries: Vec<TryItem>,
    ) -> DexResult<Self> {
        if instrs.is_empty() {
            return Err(DexError::Structure("empty code".to_string()));
        }
        if ins_size > registers_size {
            return Err(DexError::Structure(format!(
                "ins size {ins_size} exceeds registers size {registers_size}"
            )));
        }
        for pair in instrs.windows(2) {
            if pair[0].0 >= pair[1].0 {
                return Err(DexError::Structure(format!(
                    "instruction addresses not increasing at {}",
                    pair[1].0
                )));
            }
        }
        if let Some(try_) = tries.iter().find(|t| t.start >= t.end) {
            return Err(DexError::Structure(format!(
                "empty try range at {}",
                try_.start
            )));
        }

        let next_addrs: Vec<Addr> = instrs
            .iter()
            .skip(1)
            .map(|(addr, _, _)| *addr)
            .chain(
                instrs
                    .last()
                    .map(|(addr, instr, _)| addr.offset(instr.size())),
            )
            .collect();
        let instrs = instrs
            .into_iter()
            .zip(next_addrs)
            .map(|((addr, instr, position), next_addr)| LabeledInstr {
                addr,
                next_addr,
                instr,
                position,
            })
            .collect();

        Ok(Self {
            registers_size,
            ins_size,
            instrs,
            tries,
        })
    }

    /// Builds a method code from a straight listing of instructions, assigning addresses
    /// from the instruction sizes and positions with unknown line numbers.
    ///
    /// # Errors
    ///
    /// Same as [`Code::new`].
    pub fn assemble(
        registers_size: u16,
        ins_size: u16,
        instrs: Vec<Instr>,
        tries: Vec<TryItem>,
    ) -> DexResult<Self> {
        let mut addr = Addr::entry();
        let mut located = Vec::with_capacity(instrs.len());
        for instr in instrs {
            let size = instr.size();
            let position = SourcePosition::new(None, addr_to_i32(addr)?, -1)?;
            located.push((addr, instr, position));
            addr = addr.offset(size);
        }
        Self::new(registers_size, ins_size, located, tries)
    }

    #[inline]
    #[must_use]
    pub const fn registers_size(&self) -> u16 {
        self.registers_size
    }

    #[inline]
    #[must_use]
    pub const fn ins_size(&self) -> u16 {
        self.ins_size
    }

    pub fn iter_instructions(&self) -> impl Iterator<Item = &LabeledInstr> {
        self.instrs.iter()
    }

    #[must_use]
    pub fn instructions(&self) -> &[LabeledInstr] {
        &self.instrs
    }

    pub fn iter_tries(&self) -> impl Iterator<Item = &TryItem> {
        self.tries.iter()
    }

    /// Returns the position of the instruction at the given address in the listing.
    ///
    /// # Errors
    ///
    /// Fails if no instruction starts at this address.
    pub fn instruction_index(&self, addr: Addr) -> DexResult<usize> {
        self.instrs
            .binary_search_by_key(&addr, LabeledInstr::addr)
            .map_err(|_| DexError::InstructionNotFound(addr))
    }

    /// Returns the instruction at the given address.
    ///
    /// # Errors
    ///
    /// Fails if no instruction starts at this address.
    pub fn instruction_at(&self, addr: Addr) -> DexResult<&LabeledInstr> {
        self.instruction_index(addr).map(|i| &self.instrs[i])
    }
}

fn addr_to_i32(addr: Addr) -> DexResult<i32> {
    i32::try_from(addr.0).map_err(|_| DexError::Conversion {
        from: format!("Addr ({addr})"),
        to: "i32".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Reg;

    #[test]
    fn assemble_addresses() {
        let code = Code::assemble(
            2,
            0,
            vec![
                Instr::Const(Reg::from(0u8), 1),
                Instr::Move(Reg::from(1u8), Reg::from(0u8)),
                Instr::ReturnVoid,
            ],
            vec![],
        )
        .unwrap();
        let addrs: Vec<Addr> = code.iter_instructions().map(LabeledInstr::addr).collect();
        assert_eq!(addrs, vec![Addr(0), Addr(3), Addr(4)]);
        assert_eq!(code.instruction_at(Addr(3)).unwrap().next_addr(), Addr(4));
        assert_eq!(code.instruction_at(Addr(4)).unwrap().next_addr(), Addr(5));
        assert_eq!(code.instruction_at(Addr(4)).unwrap().position().address(), 4);
        assert!(matches!(
            code.instruction_at(Addr(1)),
            Err(DexError::InstructionNotFound(Addr(1)))
        ));
    }

    #[test]
    fn structure_checks() {
        assert!(Code::assemble(1, 0, vec![], vec![]).is_err());
        assert!(Code::assemble(1, 2, vec![Instr::ReturnVoid], vec![]).is_err());
        let unordered = vec![
            (Addr(2), Instr::Nop, SourcePosition::NO_INFO),
            (Addr(1), Instr::ReturnVoid, SourcePosition::NO_INFO),
        ];
        assert!(Code::new(1, 0, unordered, vec![]).is_err());
        let bad_try = TryItem::new(Addr(1), Addr(1), vec![], None);
        assert!(Code::assemble(1, 0, vec![Instr::ReturnVoid], vec![bad_try]).is_err());
    }
}
