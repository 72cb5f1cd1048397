//! Count propagation
//!
//! Sampled counts are sparse: only blocks holding a profiled statement get a
//! count directly. Equivalence classes (blocks that must execute equally
//! often) spread those counts, then edge counts are solved block by block
//! until nothing changes. Finally branch probabilities and block
//! frequencies are derived from the counts.

use super::resolver::ProfileResolver;
use super::value_profile::{IndirectCallHistogram, PromotedSet};
use crate::ir::{
    BlockId, CmpOp, ControlFlowAnalysis, Def, EdgeId, FunctionBody, Operand, StmtKind,
    REG_BR_PROB_BASE,
};
use fxhash::FxHashSet;

/// Seed one block from the profile. Returns the largest sampled count among
/// its statements whose positions were not used yet, or 0 if there are none.
/// When any statement was profiled, every position the block touches is
/// marked annotated and so is the block.
pub fn annotate_block(
    resolver: &ProfileResolver<'_>,
    body: &mut FunctionBody,
    block: BlockId,
    promoted: &PromotedSet,
) -> u64 {
    let strings = &resolver.profile().strings;
    let bb = body.block(block);
    let mut max_count = 0;
    let mut profiled = false;
    let mut histograms = Vec::new();

    for stmt in &bb.statements {
        if stmt.is_debug() {
            continue;
        }
        let Some(info) = resolver.count_info(stmt.location.as_ref()) else {
            continue;
        };
        if info.is_annotated() {
            continue;
        }
        max_count = max_count.max(info.count);
        profiled = true;
        if stmt.is_indirect_call() && !promoted.contains(&stmt.id) {
            if let Some(hist) = IndirectCallHistogram::from_targets(strings, &info.targets) {
                histograms.push((stmt.id, hist));
            }
        }
    }

    if !profiled {
        return 0;
    }

    for stmt in &bb.statements {
        resolver.mark_annotated(stmt.location.as_ref());
    }
    for arg in bb.phis.iter().flat_map(|phi| &phi.args) {
        resolver.mark_annotated(arg.location.as_ref());
    }
    for &e in &bb.succs {
        resolver.mark_annotated(body.edge(e).goto_location.as_ref());
    }

    body.block_mut(block).annotated = true;
    body.histograms.extend(histograms);
    max_count
}

/// Leader of every block's equivalence class, indexed by block.
///
/// Two blocks are equivalent when one dominates the other, the other
/// post-dominates the first, and both sit in the same innermost loop. A
/// leader takes the largest annotated count among its members.
pub fn find_equiv_classes<A>(body: &mut FunctionBody, cfg: &A) -> Vec<BlockId>
where
    A: ControlFlowAnalysis + ?Sized,
{
    let mut leader: Vec<Option<BlockId>> = vec![None; body.num_blocks()];

    for bb in body.all_blocks() {
        if leader[bb.index()].is_some() {
            continue;
        }
        leader[bb.index()] = Some(bb);
        let bb_loop = cfg.innermost_loop(bb);

        let dominated = cfg
            .dominated_blocks(bb)
            .into_iter()
            .filter(|&b| cfg.post_dominates(b, bb));
        let post_dominated = cfg
            .post_dominated_blocks(bb)
            .into_iter()
            .filter(|&b| cfg.dominates(b, bb));
        let candidates: Vec<BlockId> = dominated.collect();
        let post_candidates: Vec<BlockId> = post_dominated.collect();

        for member in candidates.into_iter().chain(post_candidates) {
            if leader[member.index()].is_some() || cfg.innermost_loop(member) != bb_loop {
                continue;
            }
            leader[member.index()] = Some(bb);
            let (count, annotated) = {
                let m = body.block(member);
                (m.count, m.annotated)
            };
            let head = body.block_mut(bb);
            if count > head.count && annotated {
                head.count = count;
                head.annotated = true;
            }
        }
    }

    leader
        .into_iter()
        .enumerate()
        .map(|(i, l)| l.unwrap_or(BlockId(i as u32)))
        .collect()
}

/// One side of edge propagation over the real blocks. With every edge
/// known the block count is raised to their sum; with exactly one unknown
/// edge on an annotated block that edge takes the difference.
pub fn propagate_edge(body: &mut FunctionBody, is_succ: bool) -> bool {
    let mut changed = false;

    for block in body.real_blocks().to_vec() {
        let bb = body.block(block);
        let (bb_count, bb_annotated) = (bb.count, bb.annotated);
        let edges = if is_succ { &bb.succs } else { &bb.preds };
        let mut unknown: Option<EdgeId> = None;
        let mut num_unknown = 0;
        let mut total_known = 0u64;
        for &e in edges {
            let edge = body.edge(e);
            if edge.annotated {
                total_known += edge.count;
            } else {
                num_unknown += 1;
                unknown = Some(e);
            }
        }

        match (num_unknown, unknown) {
            (0, _) => {
                let bb = body.block_mut(block);
                if total_known > bb.count {
                    bb.count = total_known;
                    changed = true;
                }
                if !bb.annotated {
                    bb.annotated = true;
                    changed = true;
                }
            }
            (1, Some(e)) if bb_annotated => {
                let edge = body.edge_mut(e);
                edge.count = bb_count.saturating_sub(total_known);
                edge.annotated = true;
                changed = true;
            }
            _ => {}
        }
    }

    changed
}

/// Push counts backwards through a PHI feeding a branch on 0/1.
///
/// Short-circuit conditions are lowered to a PHI of constants tested by a
/// single branch. When an outgoing edge of the test is known, the one PHI
/// argument whose constant selects that edge gets its count.
pub fn propagate_circuit(body: &mut FunctionBody) {
    for block in body.all_blocks() {
        let bb = body.block(block);
        let Some(StmtKind::Cond { lhs, op, rhs }) = bb.last_stmt().map(|s| &s.kind) else {
            continue;
        };
        let Some(rhs_is_one) = rhs.as_zero_or_one() else {
            continue;
        };
        let Operand::Value(mut value) = *lhs else {
            continue;
        };
        if !bb.annotated {
            continue;
        }
        let op_is_eq = *op == CmpOp::Eq;

        // Follow plain copies back to the PHI.
        let mut seen = FxHashSet::default();
        let phi = loop {
            if !seen.insert(value) {
                break None;
            }
            match body.def(value) {
                Some(Def::Stmt(stmt)) => match stmt.kind {
                    StmtKind::Copy {
                        src: Operand::Value(src),
                        ..
                    } => value = src,
                    _ => break None,
                },
                Some(Def::Phi(phi)) => break Some(phi),
                None => break None,
            }
        };
        let Some(phi) = phi else {
            continue;
        };
        let args: Vec<(EdgeId, Option<bool>)> = phi
            .args
            .iter()
            .map(|arg| (arg.edge, arg.value.as_zero_or_one()))
            .collect();
        let succs = bb.succs.clone();

        for e in succs {
            let (annotated, count, is_true) = {
                let edge = body.edge(e);
                (edge.annotated, edge.count, edge.is_true_value())
            };
            if !annotated {
                continue;
            }
            let check_value_one = (rhs_is_one ^ op_is_eq) ^ is_true;
            let mut matching = args
                .iter()
                .filter(|(_, v)| *v == Some(check_value_one))
                .map(|(edge, _)| *edge);
            let (Some(only_one), None) = (matching.next(), matching.next()) else {
                continue;
            };
            let incoming = body.edge_mut(only_one);
            if !incoming.annotated {
                incoming.count = count;
                incoming.annotated = true;
            }
        }
    }
}

/// Spread class counts and solve edges, at most `max_iterations` rounds.
pub fn propagate<A>(body: &mut FunctionBody, cfg: &A, max_iterations: u32)
where
    A: ControlFlowAnalysis + ?Sized,
{
    let leaders = find_equiv_classes(body, cfg);
    for block in body.all_blocks() {
        let leader = leaders[block.index()];
        let (count, annotated) = {
            let l = body.block(leader);
            (l.count, l.annotated)
        };
        let bb = body.block_mut(block);
        bb.count = count;
        if annotated {
            bb.annotated = true;
        }
    }

    let mut changed = true;
    let mut iterations = 0;
    while changed && iterations < max_iterations {
        iterations += 1;
        changed = false;
        if propagate_edge(body, true) {
            changed = true;
        }
        if propagate_edge(body, false) {
            changed = true;
        }
        propagate_circuit(body);
    }

    if changed {
        log::debug!("propagation stopped at the bound of {} iterations", max_iterations);
    } else {
        log::trace!("propagation converged after {} iterations", iterations);
    }
}

/// New probability of the first successor edge of a block, with what it
/// replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchProbability {
    pub edge: EdgeId,
    pub block: BlockId,
    pub old_probability: u32,
    /// Rounded, unlike the truncated value stored on the edge
    pub new_probability: u32,
    pub predicted_by_expect: bool,
}

/// Propagate counts, then derive edge probabilities and scale every edge
/// count by its block's count. Nothing happens when no real block has a
/// count. Returns the first-edge probability change of every block whose
/// successors are all known.
pub fn calculate_branch_probabilities<A>(
    body: &mut FunctionBody,
    cfg: &A,
    max_iterations: u32,
) -> Vec<BranchProbability>
where
    A: ControlFlowAnalysis + ?Sized,
{
    let has_sample = body
        .real_blocks()
        .iter()
        .any(|&b| body.block(b).count > 0);
    if !has_sample {
        return Vec::new();
    }

    propagate(body, cfg, max_iterations);

    let base = REG_BR_PROB_BASE as f64;
    let mut changes = Vec::new();
    for block in body.real_blocks().to_vec() {
        let succs = body.block(block).succs.clone();
        let all_known = succs.iter().all(|&e| body.edge(e).annotated);
        let total: u64 = succs.iter().map(|&e| body.edge(e).count).sum();
        if !all_known || total == 0 {
            continue;
        }

        for (i, &e) in succs.iter().enumerate() {
            let edge = body.edge_mut(e);
            let probability = edge.count as f64 * base / total as f64;
            if i == 0 {
                changes.push(BranchProbability {
                    edge: e,
                    block,
                    old_probability: edge.probability,
                    new_probability: (probability + 0.5) as u32,
                    predicted_by_expect: edge.predicted_by_expect,
                });
            }
            edge.probability = probability as u32;
        }
    }

    for block in body.all_blocks() {
        let bb = body.block(block);
        let count = bb.count;
        for e in bb.succs.clone() {
            let edge = body.edge_mut(e);
            edge.count = (count as f64 * edge.probability as f64 / base) as u64;
        }
    }

    changes
}

/// Block frequencies relative to the hottest block, rounded.
pub fn counts_to_frequencies(body: &mut FunctionBody) {
    let max = body
        .all_blocks()
        .into_iter()
        .map(|b| body.block(b).count)
        .max()
        .unwrap_or(0);
    if max == 0 {
        return;
    }
    let base = REG_BR_PROB_BASE as u128;
    for block in body.all_blocks() {
        let bb = body.block_mut(block);
        bb.frequency = ((bb.count as u128 * base + max as u128 / 2) / max as u128) as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CfgAnalyses, PhiArg, PhiNode};

    //      ENTRY
    //        |
    //       b1
    //      /  \
    //    b2    b3
    //      \  /
    //       b4
    //        |
    //       EXIT
    fn diamond() -> (FunctionBody, [BlockId; 4], [EdgeId; 2]) {
        let mut body = FunctionBody::new();
        let b = [body.add_block(), body.add_block(), body.add_block(), body.add_block()];
        body.add_edge(BlockId::ENTRY, b[0]);
        let (t, f) = body.add_cond_edges(b[0], b[1], b[2]);
        body.add_edge(b[1], b[3]);
        body.add_edge(b[2], b[3]);
        body.add_edge(b[3], BlockId::EXIT);
        (body, b, [t, f])
    }

    #[test]
    fn diamond_fills_missing_edge() {
        let (mut body, [b1, b2, b3, b4], [t, f]) = diamond();
        body.block_mut(b1).count = 100;
        body.block_mut(b1).annotated = true;
        body.edge_mut(t).count = 60;
        body.edge_mut(t).annotated = true;

        let cfg = CfgAnalyses::compute(&body);
        propagate(&mut body, &cfg, 100);

        assert_eq!(body.edge(f).count, 40);
        assert!(body.edge(f).annotated);
        assert_eq!(body.block(b2).count, 60);
        assert_eq!(body.block(b3).count, 40);
        assert_eq!(body.block(b4).count, 100);
        assert!(body.block(b4).annotated);
    }

    /// Checks in-flow, out-flow and block count agree on every block whose
    /// count and edges are all known. Returns how many blocks were checked.
    fn assert_flow_conserved(body: &FunctionBody) -> usize {
        let mut checked = 0;
        for &block in body.real_blocks() {
            let bb = body.block(block);
            let known = |edges: &[EdgeId]| edges.iter().all(|&e| body.edge(e).annotated);
            if !bb.annotated || !known(&bb.preds) || !known(&bb.succs) {
                continue;
            }
            let sum = |edges: &[EdgeId]| edges.iter().map(|&e| body.edge(e).count).sum::<u64>();
            assert_eq!(sum(&bb.preds), bb.count, "into {}", block);
            assert_eq!(sum(&bb.succs), bb.count, "out of {}", block);
            checked += 1;
        }
        checked
    }

    #[test]
    fn flow_is_conserved() {
        let (mut body, [b1, ..], [t, _]) = diamond();
        body.block_mut(b1).count = 100;
        body.block_mut(b1).annotated = true;
        body.edge_mut(t).count = 25;
        body.edge_mut(t).annotated = true;

        let cfg = CfgAnalyses::compute(&body);
        propagate(&mut body, &cfg, 100);

        assert_eq!(assert_flow_conserved(&body), 4);
    }

    //  ENTRY -> b1 -> b2 <-> b3
    //                 |
    //                 b4 -> EXIT
    #[test]
    fn flow_is_conserved_around_a_loop() {
        let mut body = FunctionBody::new();
        let [b1, b2, b3, b4] = [body.add_block(), body.add_block(), body.add_block(), body.add_block()];
        body.add_edge(BlockId::ENTRY, b1);
        body.add_edge(b1, b2);
        let (stay, leave) = body.add_cond_edges(b2, b3, b4);
        body.add_edge(b3, b2);
        body.add_edge(b4, BlockId::EXIT);
        for (block, count) in [(b1, 10), (b2, 110), (b3, 100)] {
            let bb = body.block_mut(block);
            bb.count = count;
            bb.annotated = true;
        }

        let cfg = CfgAnalyses::compute(&body);
        propagate(&mut body, &cfg, 100);

        assert_eq!(body.edge(stay).count, 100);
        assert_eq!(body.edge(leave).count, 10);
        assert_eq!(body.block(b4).count, 10);
        assert_eq!(assert_flow_conserved(&body), 4);
    }

    #[test]
    fn loops_split_classes() {
        let mut body = FunctionBody::new();
        let b1 = body.add_block();
        let b2 = body.add_block();
        let b3 = body.add_block();
        body.add_edge(BlockId::ENTRY, b1);
        body.add_edge(b1, b2);
        body.add_cond_edges(b2, b2, b3);
        body.add_edge(b3, BlockId::EXIT);
        body.block_mut(b3).count = 7;
        body.block_mut(b3).annotated = true;

        let cfg = CfgAnalyses::compute(&body);
        let leaders = find_equiv_classes(&mut body, &cfg);

        assert_eq!(leaders[b1.index()], BlockId::ENTRY);
        assert_eq!(leaders[b3.index()], BlockId::ENTRY);
        assert_eq!(leaders[b2.index()], b2);
        assert_eq!(body.block(BlockId::ENTRY).count, 7);
        assert!(body.block(BlockId::ENTRY).annotated);
    }

    // if (a && b): the PHI in `join` merges 0 from `head`, 0 from `second`
    // and 1 from `both`; `join` tests a copy of it against 0.
    #[test]
    fn circuit_feeds_single_matching_phi_edge() {
        let mut body = FunctionBody::new();
        let head = body.add_block();
        let second = body.add_block();
        let both = body.add_block();
        let join = body.add_block();
        let yes = body.add_block();
        let no = body.add_block();
        body.add_edge(BlockId::ENTRY, head);
        let (_, head_join) = body.add_cond_edges(head, second, join);
        let (_, second_join) = body.add_cond_edges(second, both, join);
        let both_join = body.add_edge(both, join);
        let (to_yes, to_no) = body.add_cond_edges(join, yes, no);
        body.add_edge(yes, BlockId::EXIT);
        body.add_edge(no, BlockId::EXIT);

        let tmp = body.new_value();
        let copy = body.new_value();
        body.push_phi(
            join,
            PhiNode {
                dest: tmp,
                args: vec![
                    PhiArg { edge: head_join, value: Operand::Const(0), location: None },
                    PhiArg { edge: second_join, value: Operand::Const(0), location: None },
                    PhiArg { edge: both_join, value: Operand::Const(1), location: None },
                ],
            },
        );
        body.push_stmt(join, StmtKind::Copy { dest: copy, src: Operand::Value(tmp) }, None);
        body.push_stmt(
            join,
            StmtKind::Cond { lhs: Operand::Value(copy), op: CmpOp::Ne, rhs: Operand::Const(0) },
            None,
        );

        body.block_mut(join).annotated = true;
        body.block_mut(join).count = 100;
        for (e, count) in [(to_yes, 30), (to_no, 70)] {
            body.edge_mut(e).count = count;
            body.edge_mut(e).annotated = true;
        }

        propagate_circuit(&mut body);

        assert!(body.edge(both_join).annotated);
        assert_eq!(body.edge(both_join).count, 30);
        // Two PHI arguments are 0, so the false side stays unresolved.
        assert!(!body.edge(head_join).annotated);
        assert!(!body.edge(second_join).annotated);
    }

    #[test]
    fn probabilities_and_frequencies() {
        let (mut body, [b1, b2, b3, b4], [t, f]) = diamond();
        body.block_mut(b1).count = 100;
        body.block_mut(b1).annotated = true;
        body.edge_mut(t).count = 60;
        body.edge_mut(t).annotated = true;
        body.edge_mut(t).probability = 5000;
        body.edge_mut(t).predicted_by_expect = true;

        let cfg = CfgAnalyses::compute(&body);
        let changes = calculate_branch_probabilities(&mut body, &cfg, 100);

        assert_eq!(body.edge(t).probability, 6000);
        assert_eq!(body.edge(f).probability, 4000);
        assert_eq!(body.edge(f).count, 40);
        let first = changes.iter().find(|c| c.block == b1).unwrap();
        assert_eq!(first.edge, t);
        assert_eq!(first.old_probability, 5000);
        assert_eq!(first.new_probability, 6000);
        assert!(first.predicted_by_expect);

        counts_to_frequencies(&mut body);
        assert_eq!(body.block(b1).frequency, REG_BR_PROB_BASE);
        assert_eq!(body.block(b2).frequency, 6000);
        assert_eq!(body.block(b3).frequency, 4000);
        assert_eq!(body.block(b4).frequency, REG_BR_PROB_BASE);
    }

    #[test]
    fn no_samples_no_probabilities() {
        let (mut body, _, [t, _]) = diamond();
        let cfg = CfgAnalyses::compute(&body);
        assert!(calculate_branch_probabilities(&mut body, &cfg, 100).is_empty());
        assert_eq!(body.edge(t).probability, REG_BR_PROB_BASE);
    }
}
