//! Natural loop detection via back edges, and the innermost loop of each block.

use super::body::{BlockId, FunctionBody};
use super::dominance::DominatorTree;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A natural loop: all blocks that reach a back edge source without passing
/// through the header.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: BlockId,

    /// Sources of the back edges into `header`
    pub latches: Vec<BlockId>,

    /// All blocks in the loop body (including header)
    pub blocks: HashSet<BlockId>,

    /// Nesting depth (0 = outermost)
    pub nesting_depth: usize,

    /// Header of the enclosing loop, if nested
    pub parent: Option<BlockId>,
}

#[derive(Debug, Clone, Default)]
pub struct LoopNestInfo {
    /// All natural loops indexed by header block
    pub loops: BTreeMap<BlockId, NaturalLoop>,

    /// Map from block to its innermost containing loop header
    pub block_to_loop: HashMap<BlockId, BlockId>,
}

impl LoopNestInfo {
    pub fn analyze(body: &FunctionBody, domtree: &DominatorTree) -> Self {
        let mut loops: BTreeMap<BlockId, NaturalLoop> = BTreeMap::new();

        for block in body.all_blocks() {
            for succ in body.successors(block) {
                // A back edge is an edge to a dominator
                if !domtree.dominates(succ, block) || domtree.depth(block).is_none() {
                    continue;
                }
                let loop_blocks = Self::find_loop_blocks(body, succ, block);
                match loops.get_mut(&succ) {
                    Some(existing) => {
                        existing.blocks.extend(loop_blocks);
                        existing.latches.push(block);
                    }
                    None => {
                        loops.insert(
                            succ,
                            NaturalLoop {
                                header: succ,
                                latches: vec![block],
                                blocks: loop_blocks,
                                nesting_depth: 0,
                                parent: None,
                            },
                        );
                    }
                }
            }
        }

        // The parent is the smallest other loop containing the header.
        let headers: Vec<BlockId> = loops.keys().copied().collect();
        let mut parents: HashMap<BlockId, BlockId> = HashMap::new();
        for &header in &headers {
            let parent = headers
                .iter()
                .filter(|&&other| other != header && loops[&other].blocks.contains(&header))
                .filter(|&&other| !loops[&header].blocks.contains(&other))
                .min_by_key(|&&other| loops[&other].blocks.len());
            if let Some(&p) = parent {
                parents.insert(header, p);
            }
        }

        for &header in &headers {
            let mut depth = 0;
            let mut current = header;
            while let Some(&p) = parents.get(&current) {
                depth += 1;
                current = p;
                if depth > headers.len() {
                    break;
                }
            }
            if let Some(l) = loops.get_mut(&header) {
                l.nesting_depth = depth;
                l.parent = parents.get(&header).copied();
            }
        }

        // Map each block to its innermost loop
        let mut block_to_loop: HashMap<BlockId, BlockId> = HashMap::new();
        for (&header, info) in &loops {
            for &block in &info.blocks {
                let deeper = block_to_loop
                    .get(&block)
                    .map_or(true, |existing| info.nesting_depth > loops[existing].nesting_depth);
                if deeper {
                    block_to_loop.insert(block, header);
                }
            }
        }

        Self {
            loops,
            block_to_loop,
        }
    }

    fn find_loop_blocks(body: &FunctionBody, header: BlockId, latch: BlockId) -> HashSet<BlockId> {
        let mut loop_blocks = HashSet::new();
        loop_blocks.insert(header);

        if header == latch {
            return loop_blocks;
        }

        let mut worklist = vec![latch];
        loop_blocks.insert(latch);

        while let Some(block) = worklist.pop() {
            for pred in body.predecessors(block) {
                if loop_blocks.insert(pred) {
                    worklist.push(pred);
                }
            }
        }

        loop_blocks
    }

    /// Header of the innermost loop containing `block`; `None` outside loops.
    pub fn innermost_loop(&self, block: BlockId) -> Option<BlockId> {
        self.block_to_loop.get(&block).copied()
    }

    /// Loop depth for a block (0 if not in any loop).
    pub fn loop_depth(&self, block: BlockId) -> usize {
        self.innermost_loop(block)
            .and_then(|h| self.loops.get(&h))
            .map(|l| l.nesting_depth + 1)
            .unwrap_or(0)
    }

    pub fn is_loop_header(&self, block: BlockId) -> bool {
        self.loops.contains_key(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_loops() {
        //  ENTRY -> outer -> inner -> inner (self loop)
        //                   inner -> latch -> outer
        //           outer -> exit_bb -> EXIT
        let mut body = FunctionBody::new();
        let outer = body.add_block();
        let inner = body.add_block();
        let latch = body.add_block();
        let exit_bb = body.add_block();
        body.add_edge(BlockId::ENTRY, outer);
        body.add_cond_edges(outer, inner, exit_bb);
        body.add_cond_edges(inner, inner, latch);
        body.add_edge(latch, outer);
        body.add_edge(exit_bb, BlockId::EXIT);

        let dom = DominatorTree::compute(&body);
        let info = LoopNestInfo::analyze(&body, &dom);

        assert_eq!(info.loops.len(), 2);
        assert!(info.is_loop_header(outer));
        assert!(info.is_loop_header(inner));
        assert_eq!(info.innermost_loop(inner), Some(inner));
        assert_eq!(info.innermost_loop(latch), Some(outer));
        assert_eq!(info.innermost_loop(exit_bb), None);
        assert_eq!(info.loops[&inner].parent, Some(outer));
        assert_eq!(info.loop_depth(inner), 2);
        assert_eq!(info.loop_depth(outer), 1);
        assert_eq!(info.loop_depth(BlockId::ENTRY), 0);
    }
}
