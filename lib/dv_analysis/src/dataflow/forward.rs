use crate::controlflow::{Branch, Cfg};
use crate::dataflow::{BlockStatus, Dataflow};
use crate::errors::{AnalysisError, AnalysisResult};
use dv_dex::code::Code;
use dv_dex::instrs::LabeledInstr;
use fixedbitset::FixedBitSet;
use petgraph::graph::NodeIndex;
use petgraph::visit::{DfsPostOrder, EdgeRef};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fmt;

/// The abstract state that is carried along the control flow graph
/// during forward dataflow analysis.
pub trait AbstractForwardState<'a>: Eq + Clone + Sized {
    type Context;
    type Error;
    /// Findings reported by the transfer function, that do not stop the analysis.
    type Diagnostic;

    /// The state initialization function.
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` if the analyzed method does not allow
    /// a proper state initialization.
    fn init(ctx: &Self::Context) -> Result<Self, Self::Error>;

    /// The state join operation function.
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` if given states
    /// cannot be joined properly with respect to the context.
    fn join(&mut self, other: &Self, ctx: &Self::Context) -> Result<(), Self::Error>;

    /// The control flow branch transfer function.
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` if given branch
    /// cannot be passed with the current state with respect to the
    /// context.
    fn transfer_branch(&mut self, branch: &Branch, ctx: &Self::Context)
        -> Result<(), Self::Error>;

    /// The instruction transfer function.
    ///
    /// Diagnostics pushed for an instruction replace the ones pushed by a previous
    /// processing of the same basic block.
    ///
    /// # Errors
    ///
    /// This method should return a `Self::Error` if given instruction
    /// cannot be passed at all with the current state.
    fn transfer_instr(
        &mut self,
        instr: &LabeledInstr,
        ctx: &Self::Context,
        diagnostics: &mut Vec<Self::Diagnostic>,
    ) -> Result<(), Self::Error>;
}

/// Performs a forward dataflow analysis over the given code, until fixpoint.
///
/// Blocks are processed in reverse postorder; a block is processed again each time its
/// entry state grows. Exception edges carry the entry state of the throwing block (throwing
/// instructions start their own block), other edges carry its exit state.
///
/// Returns the computed states and the diagnostics of the last processing of every
/// block, in code order.
///
/// # Errors
///
/// This function may generate errors resulting of an underlying
/// abstract state error (at initialization, join or transfer
/// operation), or of a malformed control flow.
pub fn forward<'a, S>(
    code: &Code,
    context: &S::Context,
) -> AnalysisResult<(Dataflow<S>, Vec<S::Diagnostic>)>
where
    S: AbstractForwardState<'a> + fmt::Display,
    S::Error: Into<AnalysisError>,
{
    let cfg = Cfg::build(code)?;
    let cfgraph = &cfg.inner;
    let nb_blocks = cfgraph.node_count();
    let start = cfg.start_index()?;

    // reverse postorder ranks of reachable blocks
    let mut postorder = Vec::with_capacity(nb_blocks);
    let mut dfs = DfsPostOrder::new(cfgraph, start);
    while let Some(id) = dfs.next(cfgraph) {
        postorder.push(id);
    }
    let order: Vec<NodeIndex> = postorder.into_iter().rev().collect();
    let mut ranks = vec![usize::MAX; nb_blocks];
    for (rank, id) in order.iter().enumerate() {
        ranks[id.index()] = rank;
    }

    let mut status = vec![BlockStatus::Unvisited; nb_blocks];
    let mut block_entries: Vec<Option<S>> = vec![None; nb_blocks];
    let mut block_diagnostics: Vec<Vec<S::Diagnostic>> = Vec::with_capacity(nb_blocks);
    block_diagnostics.resize_with(nb_blocks, Vec::new);
    let mut visits = vec![0; nb_blocks];

    let mut entries: BTreeMap<_, S> = BTreeMap::new();
    let mut exits: BTreeMap<_, S> = BTreeMap::new();

    let mut worklist = BinaryHeap::new();
    let mut queued = FixedBitSet::with_capacity(nb_blocks);
    block_entries[start.index()] = Some(S::init(context).map_err(S::Error::into)?);
    status[start.index()] = BlockStatus::Pending;
    worklist.push(Reverse(0));
    queued.insert(start.index());

    while let Some(Reverse(rank)) = worklist.pop() {
        let id = order[rank];
        queued.set(id.index(), false);
        status[id.index()] = BlockStatus::Stable;
        visits[id.index()] += 1;

        let block = &cfgraph[id];
        let entry = block_entries[id.index()].clone().ok_or_else(|| {
            AnalysisError::Internal(format!("no entry state for block@{}", block.start_addr()))
        })?;
        log::debug!("    ---- block@{}", block.start_addr());
        log::debug!("    -- ENTRY STATE: {entry}");

        // apply transfer function for each instruction of the block
        // while saving intermediate states
        let mut state = entry.clone();
        let mut diagnostics = Vec::new();
        for linstr in block.instructions() {
            entries.insert(linstr.addr(), state.clone());
            log::trace!("transfer_instr( {linstr} )");
            log::trace!("    before: {state}");
            state
                .transfer_instr(linstr, context, &mut diagnostics)
                .map_err(S::Error::into)?;
            log::trace!("    after:  {state}");
            exits.insert(linstr.addr(), state.clone());
        }
        log::debug!("    -- EXIT STATE: {state}");
        block_diagnostics[id.index()] = diagnostics;

        // propagate to successors, which are scheduled again when their entry grows
        for edge in cfgraph.edges_directed(id, Direction::Outgoing) {
            let mut outgoing = match edge.weight() {
                Branch::Catch(_) | Branch::CatchAll => entry.clone(),
                _ => state.clone(),
            };
            outgoing
                .transfer_branch(edge.weight(), context)
                .map_err(S::Error::into)?;

            let target = edge.target();
            let slot = &mut block_entries[target.index()];
            let changed = match slot {
                Some(recorded) => {
                    let previous = recorded.clone();
                    recorded.join(&outgoing, context).map_err(S::Error::into)?;
                    *recorded != previous
                }
                None => {
                    *slot = Some(outgoing);
                    true
                }
            };
            if changed && !queued.contains(target.index()) {
                status[target.index()] = BlockStatus::Pending;
                queued.insert(target.index());
                worklist.push(Reverse(ranks[target.index()]));
            }
        }
    }

    let mut block_visits = BTreeMap::new();
    let mut all_diagnostics = Vec::new();
    for (id, block) in cfg.iter_ordered_blocks() {
        match status[id.index()] {
            BlockStatus::Stable => {
                block_visits.insert(block.start_addr(), visits[id.index()]);
                all_diagnostics.append(&mut block_diagnostics[id.index()]);
            }
            BlockStatus::Unvisited => log::debug!("unreachable block@{}", block.start_addr()),
            BlockStatus::Pending => {
                return Err(AnalysisError::Internal(format!(
                    "block@{} still pending after fixpoint",
                    block.start_addr()
                )))
            }
        }
    }

    Ok((
        Dataflow {
            entries,
            exits,
            visits: block_visits,
        },
        all_diagnostics,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_dex::instrs::Instr;
    use dv_dex::registers::Reg;
    use dv_dex::Addr;

    /// Tracks the set of registers written so far, as a bitmask.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Written(u32);

    impl fmt::Display for Written {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "{:#b}", self.0)
        }
    }

    impl<'a> AbstractForwardState<'a> for Written {
        type Context = ();
        type Error = AnalysisError;
        type Diagnostic = Addr;

        fn init(_: &()) -> AnalysisResult<Self> {
            Ok(Self(0))
        }

        fn join(&mut self, other: &Self, _: &()) -> AnalysisResult<()> {
            // must-analysis: keep registers written on every path
            self.0 &= other.0;
            Ok(())
        }

        fn transfer_branch(&mut self, _: &Branch, _: &()) -> AnalysisResult<()> {
            Ok(())
        }

        fn transfer_instr(
            &mut self,
            instr: &LabeledInstr,
            _: &(),
            diagnostics: &mut Vec<Addr>,
        ) -> AnalysisResult<()> {
            match instr.instr() {
                Instr::Const(r, _) => self.0 |= 1 << r.value(),
                Instr::Return(r) if self.0 & (1 << r.value()) == 0 => diagnostics.push(instr.addr()),
                _ => (),
            }
            Ok(())
        }
    }

    fn r(n: u8) -> Reg {
        Reg::from(n)
    }

    #[test]
    fn branches_are_joined() {
        // 0: if-eqz v0, 8
        // 2: const v1, 1
        // 5: const v2, 1
        // 8: return v2
        let code = Code::assemble(
            3,
            1,
            vec![
                Instr::IfZ(dv_dex::instrs::Comp::Eq, r(0), Addr(8)),
                Instr::Const(r(1), 1),
                Instr::Const(r(2), 1),
                Instr::Return(r(2)),
            ],
            vec![],
        )
        .unwrap();
        let (flow, diagnostics) = forward::<Written>(&code, &()).unwrap();
        assert_eq!(diagnostics, vec![Addr(8)]);
        assert_eq!(flow.entries[&Addr(8)], Written(0));
        assert_eq!(flow.exits[&Addr(5)], Written(0b110));
        assert!(flow.visits.values().all(|v| *v == 1));
    }

    #[test]
    fn loops_reach_fixpoint() {
        // 0: const v0, 1
        // 3: if-eqz v1, 11
        // 5: const v1, 0
        // 8: goto 3
        // 10: nop (unreachable)
        // 11: return v0
        let code = Code::assemble(
            2,
            0,
            vec![
                Instr::Const(r(0), 1),
                Instr::IfZ(dv_dex::instrs::Comp::Eq, r(1), Addr(11)),
                Instr::Const(r(1), 0),
                Instr::Goto(Addr(3)),
                Instr::Nop,
                Instr::Return(r(0)),
            ],
            vec![],
        )
        .unwrap();
        let (flow, diagnostics) = forward::<Written>(&code, &()).unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(flow.entries[&Addr(3)], Written(0b01));
        assert!(!flow.is_reachable(Addr(10)));
        assert!(flow.visits[&Addr(3)] <= 2);
    }

    #[test]
    fn bad_branch_target() {
        let code = Code::assemble(1, 0, vec![Instr::Goto(Addr(1))], vec![]).unwrap();
        assert!(forward::<Written>(&code, &()).is_err());
    }
}
