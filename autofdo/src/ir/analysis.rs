//! Control-flow queries consumed by count propagation.

use super::body::{BlockId, FunctionBody};
use super::dominance::DominatorTree;
use super::loops::LoopNestInfo;

/// What propagation needs to know about a body's control flow. Hosts with
/// their own dominance and loop analyses implement this directly; others use
/// [`CfgAnalyses`].
pub trait ControlFlowAnalysis {
    fn dominates(&self, a: BlockId, b: BlockId) -> bool;

    fn post_dominates(&self, a: BlockId, b: BlockId) -> bool;

    /// `block` and every block it dominates.
    fn dominated_blocks(&self, block: BlockId) -> Vec<BlockId>;

    /// `block` and every block it post-dominates.
    fn post_dominated_blocks(&self, block: BlockId) -> Vec<BlockId>;

    /// Header of the innermost loop containing `block`, `None` at top level.
    fn innermost_loop(&self, block: BlockId) -> Option<BlockId>;
}

/// Dominators, post-dominators and loops computed from a [`FunctionBody`].
#[derive(Debug, Clone)]
pub struct CfgAnalyses {
    pub dominators: DominatorTree,
    pub post_dominators: DominatorTree,
    pub loops: LoopNestInfo,
}

impl CfgAnalyses {
    pub fn compute(body: &FunctionBody) -> Self {
        let dominators = DominatorTree::compute(body);
        let post_dominators = DominatorTree::compute_post(body);
        let loops = LoopNestInfo::analyze(body, &dominators);
        CfgAnalyses {
            dominators,
            post_dominators,
            loops,
        }
    }
}

impl ControlFlowAnalysis for CfgAnalyses {
    fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominators.dominates(a, b)
    }

    fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.post_dominators.dominates(a, b)
    }

    fn dominated_blocks(&self, block: BlockId) -> Vec<BlockId> {
        self.dominators.dominated_blocks(block)
    }

    fn post_dominated_blocks(&self, block: BlockId) -> Vec<BlockId> {
        self.post_dominators.dominated_blocks(block)
    }

    fn innermost_loop(&self, block: BlockId) -> Option<BlockId> {
        self.loops.innermost_loop(block)
    }
}
