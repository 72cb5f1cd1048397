//! Dominator and post-dominator trees
//!
//! Both are computed with the iterative algorithm of Cooper, Harvey and
//! Kennedy over reverse postorder. The post-dominator tree is the dominator
//! tree of the reversed graph rooted at EXIT.

use super::body::{BlockId, FunctionBody};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Rooted at ENTRY, following successor edges
    Forward,
    /// Rooted at EXIT, following predecessor edges
    Backward,
}

/// Dominator tree for a function's control flow graph.
///
/// A block D dominates block B if every path from the root to B goes through D.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator for each block (the root has none)
    idom: HashMap<BlockId, BlockId>,

    /// Children in the dominator tree
    children: HashMap<BlockId, Vec<BlockId>>,

    /// Tree depth for each reachable block (root = 0)
    depth: HashMap<BlockId, usize>,

    root: BlockId,
}

impl DominatorTree {
    /// Dominators, rooted at ENTRY.
    pub fn compute(body: &FunctionBody) -> Self {
        Self::compute_in(body, Direction::Forward)
    }

    /// Post-dominators, rooted at EXIT.
    pub fn compute_post(body: &FunctionBody) -> Self {
        Self::compute_in(body, Direction::Backward)
    }

    fn next(body: &FunctionBody, block: BlockId, direction: Direction) -> Vec<BlockId> {
        match direction {
            Direction::Forward => body.successors(block).collect(),
            Direction::Backward => body.predecessors(block).collect(),
        }
    }

    fn prev(body: &FunctionBody, block: BlockId, direction: Direction) -> Vec<BlockId> {
        match direction {
            Direction::Forward => body.predecessors(block).collect(),
            Direction::Backward => body.successors(block).collect(),
        }
    }

    pub fn compute_in(body: &FunctionBody, direction: Direction) -> Self {
        let root = match direction {
            Direction::Forward => BlockId::ENTRY,
            Direction::Backward => BlockId::EXIT,
        };

        let rpo = Self::reverse_postorder(body, root, direction);
        let rpo_index: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut idom: HashMap<BlockId, Option<BlockId>> = HashMap::new();
        for &block in &rpo {
            idom.insert(block, None);
        }
        idom.insert(root, Some(root));

        let mut changed = true;
        while changed {
            changed = false;

            for &block in &rpo {
                if block == root {
                    continue;
                }

                let mut new_idom: Option<BlockId> = None;
                for pred in Self::prev(body, block, direction) {
                    if idom.get(&pred).and_then(|x| *x).is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(current, pred, &idom, &rpo_index),
                    });
                }

                if new_idom != idom[&block] {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }

        let mut final_idom: HashMap<BlockId, BlockId> = HashMap::new();
        for (&block, &dom) in &idom {
            if let Some(d) = dom {
                if block != root {
                    final_idom.insert(block, d);
                }
            }
        }

        let mut children: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for &block in &rpo {
            if let Some(&dom) = final_idom.get(&block) {
                children.entry(dom).or_default().push(block);
            }
        }

        let mut depth: HashMap<BlockId, usize> = HashMap::new();
        depth.insert(root, 0);
        let mut queue: VecDeque<BlockId> = VecDeque::new();
        queue.push_back(root);
        while let Some(block) = queue.pop_front() {
            let d = depth[&block];
            for &child in children.get(&block).map(Vec::as_slice).unwrap_or(&[]) {
                depth.insert(child, d + 1);
                queue.push_back(child);
            }
        }

        Self {
            idom: final_idom,
            children,
            depth,
            root,
        }
    }

    fn reverse_postorder(body: &FunctionBody, root: BlockId, direction: Direction) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        // Explicit stack of (block, remaining successors).
        let mut stack: Vec<(BlockId, Vec<BlockId>)> = Vec::new();

        visited.insert(root);
        stack.push((root, Self::next(body, root, direction)));
        while let Some((block, pending)) = stack.last_mut() {
            if let Some(succ) = pending.pop() {
                if visited.insert(succ) {
                    let succs = Self::next(body, succ, direction);
                    stack.push((succ, succs));
                }
            } else {
                postorder.push(*block);
                stack.pop();
            }
        }

        postorder.reverse();
        postorder
    }

    fn intersect(
        mut b1: BlockId,
        mut b2: BlockId,
        idom: &HashMap<BlockId, Option<BlockId>>,
        rpo_index: &HashMap<BlockId, usize>,
    ) -> BlockId {
        while b1 != b2 {
            let mut idx1 = rpo_index.get(&b1).copied().unwrap_or(usize::MAX);
            let mut idx2 = rpo_index.get(&b2).copied().unwrap_or(usize::MAX);

            while idx1 > idx2 {
                match idom.get(&b1) {
                    Some(Some(dom)) => {
                        b1 = *dom;
                        idx1 = rpo_index.get(&b1).copied().unwrap_or(usize::MAX);
                    }
                    _ => return b1,
                }
            }

            while idx2 > idx1 {
                match idom.get(&b2) {
                    Some(Some(dom)) => {
                        b2 = *dom;
                        idx2 = rpo_index.get(&b2).copied().unwrap_or(usize::MAX);
                    }
                    _ => return b2,
                }
            }
        }
        b1
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(&block).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Depth in the tree; `None` for blocks the root cannot reach.
    pub fn depth(&self, block: BlockId) -> Option<usize> {
        self.depth.get(&block).copied()
    }

    /// Check if block A dominates block B.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }

        let mut current = b;
        while let Some(&dom) = self.idom.get(&current) {
            if dom == a {
                return true;
            }
            current = dom;
        }

        false
    }

    /// `block` and every block below it in the tree, preorder.
    pub fn dominated_blocks(&self, block: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack = vec![block];
        while let Some(b) = stack.pop() {
            out.push(b);
            stack.extend(self.children(b).iter().rev());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    //      ENTRY
    //        |
    //       bb2
    //       /  \
    //     bb3  bb4
    //       \  /
    //       bb5
    //        |
    //       EXIT
    fn diamond() -> (FunctionBody, [BlockId; 4]) {
        let mut body = FunctionBody::new();
        let b = [body.add_block(), body.add_block(), body.add_block(), body.add_block()];
        body.add_edge(BlockId::ENTRY, b[0]);
        body.add_cond_edges(b[0], b[1], b[2]);
        body.add_edge(b[1], b[3]);
        body.add_edge(b[2], b[3]);
        body.add_edge(b[3], BlockId::EXIT);
        (body, b)
    }

    #[test]
    fn test_dominators_diamond() {
        let (body, [b1, b2, b3, b4]) = diamond();
        let dom = DominatorTree::compute(&body);

        assert!(dom.dominates(BlockId::ENTRY, b4));
        assert!(dom.dominates(b1, b2));
        assert!(dom.dominates(b1, b4));
        assert!(!dom.dominates(b2, b3));
        assert!(!dom.dominates(b2, b4));
        assert_eq!(dom.idom(b4), Some(b1));
        assert_eq!(dom.depth(b4), Some(2));

        let mut below = dom.dominated_blocks(b1);
        below.sort();
        assert_eq!(below, vec![b1, b2, b3, b4, BlockId::EXIT]);
    }

    #[test]
    fn test_post_dominators_diamond() {
        let (body, [b1, b2, b3, b4]) = diamond();
        let pdom = DominatorTree::compute_post(&body);

        assert_eq!(pdom.root(), BlockId::EXIT);
        assert!(pdom.dominates(b4, b1));
        assert!(pdom.dominates(b4, BlockId::ENTRY));
        assert!(!pdom.dominates(b2, b1));
        assert!(!pdom.dominates(b3, b1));
        assert_eq!(pdom.idom(b1), Some(b4));
    }

    #[test]
    fn test_unreachable_block() {
        let (mut body, [_, _, _, b4]) = diamond();
        let dead = body.add_block();
        body.add_edge(dead, b4);
        let dom = DominatorTree::compute(&body);

        assert_eq!(dom.depth(dead), None);
        assert!(!dom.dominates(BlockId::ENTRY, dead));
        assert!(dom.dominates(dead, dead));
    }
}
