//! Control flow graph representation.

use crate::errors::{AnalysisError, AnalysisResult};
use dv_dex::code::Code;
use dv_dex::instrs::{Comp, Instr, LabeledInstr};
use dv_dex::registers::Reg;
use dv_dex::{Addr, DexType};
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeRef, NodeRef};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug)]
pub struct Block<'a> {
    start: Addr,
    instrs: &'a [LabeledInstr],
    can_throw: bool,
}

impl fmt::Display for Block<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for linstr in self.instrs {
            writeln!(f, "{linstr}")?;
        }
        Ok(())
    }
}

impl<'a> Block<'a> {
    fn new(start: Addr, instrs: &'a [LabeledInstr]) -> Self {
        let can_throw = instrs.first().map_or(false, LabeledInstr::can_throw);
        Self {
            start,
            instrs,
            can_throw,
        }
    }

    #[inline]
    pub fn instructions(&self) -> impl Iterator<Item = &'a LabeledInstr> {
        self.instrs.iter()
    }

    #[inline]
    #[must_use]
    pub const fn start_addr(&self) -> Addr {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn can_throw(&self) -> bool {
        self.can_throw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(Reg),
    Zero,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Branch {
    IfTrue(Reg, Comp, Operand),
    IfFalse(Reg, Comp, Operand),
    Switch(Reg, i32),
    SwitchDefault,
    Jmp,
    Sequence,
    Catch(DexType),
    CatchAll,
    ArrayAccessSuccess,
    InvokeSuccess,
    /// The given register holds an instance of the given type on this edge.
    CastSuccess(Reg, DexType),
    DivSuccess,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::IfTrue(_, _, _) => write!(f, "<true>"),
            Self::IfFalse(_, _, _) => write!(f, "<false>"),
            Self::Switch(_, key) => write!(f, "<switch {key}>"),
            Self::SwitchDefault => write!(f, "<switch _>"),
            Self::Jmp => write!(f, "<jmp>"),
            Self::Sequence => write!(f, "<seq>"),
            Self::Catch(typ) => write!(f, "<catch {typ}>"),
            Self::CatchAll => write!(f, "<catch *>"),
            Self::ArrayAccessSuccess => write!(f, "<seq_array>"),
            Self::InvokeSuccess => write!(f, "<seq_invoke>"),
            Self::CastSuccess(_, _) => write!(f, "<seq_cast>"),
            Self::DivSuccess => write!(f, "<seq_div>"),
        }
    }
}

#[derive(Debug)]
pub struct Cfg<'a> {
    pub(crate) inner: DiGraph<Block<'a>, Branch>,
    node_ids: BTreeMap<Addr, NodeIndex>,
}

impl<'a> Cfg<'a> {
    pub(crate) fn start_index(&self) -> AnalysisResult<NodeIndex> {
        self.node_ids
            .get(&Addr::entry())
            .copied()
            .ok_or_else(|| AnalysisError::InstructionNotFound("entry point".to_string()))
    }

    /// Iterates over blocks by increasing start address.
    pub fn iter_ordered_blocks(&self) -> impl Iterator<Item = (NodeIndex, &Block<'a>)> {
        self.node_ids.values().map(move |id| (*id, &self.inner[*id]))
    }

    #[must_use]
    pub fn block_at(&self, addr: Addr) -> Option<&Block<'a>> {
        self.node_ids.get(&addr).map(|id| &self.inner[*id])
    }

    /// Successors of the block starting at the given address, with edge labels.
    pub fn successors(&self, addr: Addr) -> impl Iterator<Item = (&Branch, Addr)> {
        self.node_ids.get(&addr).into_iter().flat_map(move |id| {
            self.inner
                .edges(*id)
                .map(move |edge| (edge.weight(), self.inner[edge.target()].start_addr()))
        })
    }

    #[must_use]
    pub fn to_dot(&self) -> String {
        let dot = Dot::with_attr_getters(
            &self.inner,
            &[Config::GraphContentOnly, Config::EdgeNoLabel],
            &|_, edge| {
                let color = match edge.weight() {
                    Branch::IfTrue(_, _, _) => "green",
                    Branch::IfFalse(_, _, _) => "red",
                    Branch::Switch(_, _) | Branch::SwitchDefault => "purple",
                    Branch::Jmp => "blue",
                    Branch::Catch(_) | Branch::CatchAll => "orchid",
                    Branch::Sequence
                    | Branch::ArrayAccessSuccess
                    | Branch::InvokeSuccess
                    | Branch::CastSuccess(_, _)
                    | Branch::DivSuccess => "black",
                };
                format!("color={},xlabel=\"{}\"", color, edge.weight())
            },
            &|_, node| {
                if node.weight().can_throw() {
                    String::from("shape=box,color=blue")
                } else {
                    String::from("shape=box,color=black")
                }
            },
        );
        format!("digraph {{\n  splines=ortho;\n  nodesep=2;\n{dot}}}")
    }

    /// Builds the control flow graph of a method code.
    ///
    /// # Errors
    ///
    /// Fails if a branch or handler targets an address where no instruction starts.
    pub fn build(code: &'a Code) -> AnalysisResult<Self> {
        let mut cfgraph = DiGraph::new();
        let mut blocks_map = BTreeMap::new();

        let leaders = compute_block_leaders(code);
        for block in split_into_blocks(code.instructions(), &leaders) {
            let start = block.start_addr();
            blocks_map.insert(start, cfgraph.add_node(block));
        }

        let breakers: Vec<(NodeIndex, &LabeledInstr)> = cfgraph
            .node_indices()
            .filter_map(|id| {
                let instrs: &'a [LabeledInstr] = cfgraph[id].instrs;
                instrs.last().map(|linstr| (id, linstr))
            })
            .collect();
        for (src_id, linstr) in breakers {
            let branching = instruction_branching(linstr);
            if branching.is_empty()
                && !linstr.instr().does_return()
                && !matches!(linstr.instr(), Instr::Throw(_))
            {
                // falling through the end of the code is not a branch
                if let Some(dst_id) = blocks_map.get(&linstr.next_addr()) {
                    cfgraph.add_edge(src_id, *dst_id, Branch::Sequence);
                }
            }
            for (branch, dst) in branching.into_iter().chain(block_tries(code, linstr)) {
                let dst_id = blocks_map.get(&dst).ok_or_else(|| {
                    AnalysisError::InstructionNotFound(format!(
                        "{branch} target {dst} from {}",
                        linstr.addr()
                    ))
                })?;
                cfgraph.add_edge(src_id, *dst_id, branch);
            }
        }

        Ok(Self {
            inner: cfgraph,
            node_ids: blocks_map,
        })
    }
}

// Block leaders are block first instructions addresses.
// Leaders can be caused by several cases:
//   - target address of a branching instruction is a leader
//   - address following a branching instruction is a leader
//   - throwable instruction is a leader (so that we can easily retrieve state before the
//     instruction when running a dataflow analysis)
//   - boundaries of a try range and start of a catch block are leaders
fn compute_block_leaders(code: &Code) -> BTreeSet<Addr> {
    let mut leaders = BTreeSet::new();

    for linstr in code.iter_instructions() {
        let branching = instruction_branching(linstr);
        if !branching.is_empty() || linstr.can_throw() || linstr.instr().does_return() {
            leaders.insert(linstr.next_addr());
        }
        for (_, dst) in branching {
            leaders.insert(dst);
        }
        if linstr.can_throw() {
            leaders.insert(linstr.addr());
        }
    }

    for try_ in code.iter_tries() {
        leaders.insert(try_.start_addr());
        leaders.insert(try_.end_addr());
        for handler in try_.iter_handlers() {
            leaders.insert(handler.catch_addr());
        }
        if let Some(addr) = try_.catch_all_addr() {
            leaders.insert(addr);
        }
    }

    leaders
}

fn split_into_blocks<'a>(instrs: &'a [LabeledInstr], leaders: &BTreeSet<Addr>) -> Vec<Block<'a>> {
    let mut blocks = Vec::new();
    let mut start = 0;

    // the first instruction always starts a block, even when it is not a leader
    for (i, linstr) in instrs.iter().enumerate().skip(1) {
        if leaders.contains(&linstr.addr()) {
            blocks.push(Block::new(instrs[start].addr(), &instrs[start..i]));
            start = i;
        }
    }
    if let Some(first) = instrs.get(start) {
        blocks.push(Block::new(first.addr(), &instrs[start..]));
    }

    blocks
}

fn instruction_branching(linstr: &LabeledInstr) -> Vec<(Branch, Addr)> {
    let next = linstr.next_addr();
    match linstr.instr() {
        Instr::Goto(target) => vec![(Branch::Jmp, *target)],
        Instr::If(comp, reg1, reg2, target) => {
            if_instr_branching(next, *target, *reg1, *comp, Operand::Register(*reg2))
        }
        Instr::IfZ(comp, reg, target) => {
            if_instr_branching(next, *target, *reg, *comp, Operand::Zero)
        }
        Instr::Switch(reg, targets) => std::iter::once((Branch::SwitchDefault, next))
            .chain(
                targets
                    .iter()
                    .map(|(key, target)| (Branch::Switch(*reg, *key), *target)),
            )
            .collect(),

        Instr::ArrayLength(_, _)
        | Instr::FilledNewArray(_, _)
        | Instr::Aget(_, _, _, _)
        | Instr::Aput(_, _, _, _) => vec![(Branch::ArrayAccessSuccess, next)],

        Instr::Invoke(_, _, _) => vec![(Branch::InvokeSuccess, next)],

        Instr::BinOp(op, kind, _, _, _) if op.is_division() && kind.is_integral() => {
            vec![(Branch::DivSuccess, next)]
        }
        Instr::BinOpLit(op, _, _, _) if op.is_division() => vec![(Branch::DivSuccess, next)],

        Instr::CheckCast(reg, typ) => vec![(Branch::CastSuccess(*reg, typ.clone()), next)],
        _ => vec![],
    }
}

fn if_instr_branching(
    next: Addr,
    target: Addr,
    op1: Reg,
    comp: Comp,
    op2: Operand,
) -> Vec<(Branch, Addr)> {
    vec![
        (Branch::IfTrue(op1, comp, op2), target),
        (Branch::IfFalse(op1, comp, op2), next),
    ]
}

fn block_tries(code: &Code, linstr: &LabeledInstr) -> Vec<(Branch, Addr)> {
    if !linstr.can_throw() {
        return vec![];
    }
    code.iter_tries()
        .find(|try_| try_.covers(linstr.addr()))
        .map(|try_| {
            try_.iter_handlers()
                .map(|h| (Branch::Catch(h.catch_type().clone()), h.catch_addr()))
                .chain(try_.catch_all_addr().map(|addr| (Branch::CatchAll, addr)))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_dex::code::{CatchHandler, TryItem};
    use dv_dex::instrs::InvokeKind;
    use dv_dex::methods::MethodRef;

    fn r(n: u8) -> Reg {
        Reg::from(n)
    }

    fn succs(cfg: &Cfg, addr: usize) -> Vec<(Branch, Addr)> {
        let mut v: Vec<_> = cfg
            .successors(Addr(addr))
            .map(|(b, a)| (b.clone(), a))
            .collect();
        v.sort_by_key(|(_, a)| *a);
        v
    }

    #[test]
    fn conditional_and_loop() {
        // 0: const v0, 0
        // 3: if-nez v0, 10
        // 5: const v0, 1
        // 8: goto 3
        // 10: return-void
        let code = Code::assemble(
            1,
            0,
            vec![
                Instr::Const(r(0), 0),
                Instr::IfZ(Comp::Ne, r(0), Addr(10)),
                Instr::Const(r(0), 1),
                Instr::Goto(Addr(3)),
                Instr::ReturnVoid,
            ],
            vec![],
        )
        .unwrap();
        let cfg = Cfg::build(&code).unwrap();
        let starts: Vec<Addr> = cfg.iter_ordered_blocks().map(|(_, b)| b.start_addr()).collect();
        assert_eq!(starts, vec![Addr(0), Addr(3), Addr(5), Addr(10)]);
        assert_eq!(succs(&cfg, 0), vec![(Branch::Sequence, Addr(3))]);
        assert_eq!(
            succs(&cfg, 3),
            vec![
                (Branch::IfFalse(r(0), Comp::Ne, Operand::Zero), Addr(5)),
                (Branch::IfTrue(r(0), Comp::Ne, Operand::Zero), Addr(10)),
            ]
        );
        assert_eq!(succs(&cfg, 5), vec![(Branch::Jmp, Addr(3))]);
        assert!(succs(&cfg, 10).is_empty());
        assert_eq!(cfg.block_at(Addr(5)).unwrap().instructions().count(), 2);
        assert!(cfg.to_dot().starts_with("digraph {"));
    }

    #[test]
    fn throwing_instructions_and_handlers() {
        // 0: new-instance v0, LFoo;
        // 2: invoke-direct {v0}, LFoo;-><init>()V
        // 5: return-void
        // 6: move-exception v1
        // 7: throw v1
        let foo = DexType::class("Foo");
        let init = MethodRef::new(foo.clone(), "<init>", vec![], DexType::Void);
        let code = Code::assemble(
            2,
            0,
            vec![
                Instr::NewInstance(r(0), foo),
                Instr::Invoke(InvokeKind::Direct, init, vec![r(0)]),
                Instr::ReturnVoid,
                Instr::MoveException(r(1)),
                Instr::Throw(r(1)),
            ],
            vec![TryItem::new(
                Addr(2),
                Addr(5),
                vec![CatchHandler::new(DexType::class("java/lang/Exception"), Addr(6))],
                Some(Addr(6)),
            )],
        )
        .unwrap();
        let cfg = Cfg::build(&code).unwrap();
        let starts: Vec<Addr> = cfg.iter_ordered_blocks().map(|(_, b)| b.start_addr()).collect();
        assert_eq!(starts, vec![Addr(0), Addr(2), Addr(5), Addr(6), Addr(7)]);
        // not covered by the try range
        assert_eq!(succs(&cfg, 0), vec![(Branch::Sequence, Addr(2))]);
        let mut from_invoke = succs(&cfg, 2);
        from_invoke.sort_by_key(|(b, _)| format!("{b}"));
        assert_eq!(
            from_invoke,
            vec![
                (Branch::CatchAll, Addr(6)),
                (Branch::Catch(DexType::class("java/lang/Exception")), Addr(6)),
                (Branch::InvokeSuccess, Addr(5)),
            ]
        );
        assert!(cfg.block_at(Addr(2)).unwrap().can_throw());
        assert!(succs(&cfg, 7).is_empty());
    }

    #[test]
    fn switch_targets() {
        // 0: switch v0, 1:4, 2:5
        // 3: nop
        // 4: nop
        // 5: return-void
        let code = Code::assemble(
            1,
            1,
            vec![
                Instr::Switch(r(0), vec![(1, Addr(4)), (2, Addr(5))]),
                Instr::Nop,
                Instr::Nop,
                Instr::ReturnVoid,
            ],
            vec![],
        )
        .unwrap();
        let cfg = Cfg::build(&code).unwrap();
        assert_eq!(
            succs(&cfg, 0),
            vec![
                (Branch::SwitchDefault, Addr(3)),
                (Branch::Switch(r(0), 1), Addr(4)),
                (Branch::Switch(r(0), 2), Addr(5)),
            ]
        );
    }

    #[test]
    fn missing_target() {
        let code = Code::assemble(1, 0, vec![Instr::Goto(Addr(7))], vec![]).unwrap();
        assert!(matches!(
            Cfg::build(&code),
            Err(AnalysisError::InstructionNotFound(_))
        ));
    }
}
