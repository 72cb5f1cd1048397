//! Function bodies: basic blocks, edges, statements and PHI nodes
//!
//! Every body has two pseudo blocks, [`BlockId::ENTRY`] and [`BlockId::EXIT`],
//! that carry no statements. The entry block has one edge to the first real
//! block; every returning block has an edge to the exit block. Real blocks are
//! kept in layout order, which is the order propagation visits them in.

use super::program::{DeclId, Location};
use crate::annotate::value_profile::IndirectCallHistogram;
use fxhash::FxHashMap;

/// Probabilities are fixed point with this base.
pub const REG_BR_PROB_BASE: u32 = 10_000;

/// Unique identifier for basic blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);
    pub const EXIT: BlockId = BlockId(1);

    pub fn is_pseudo(self) -> bool {
        self == Self::ENTRY || self == Self::EXIT
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            BlockId::ENTRY => write!(f, "ENTRY"),
            BlockId::EXIT => write!(f, "EXIT"),
            BlockId(n) => write!(f, "bb{}", n),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

/// Stable statement identity; survives block edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub u32);

/// SSA value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Fallthru,
    /// Taken when the block's condition holds
    True,
    /// Taken when the block's condition fails
    False,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub src: BlockId,
    pub dest: BlockId,
    pub kind: EdgeKind,
    pub count: u64,
    /// Out of [`REG_BR_PROB_BASE`]
    pub probability: u32,
    pub annotated: bool,
    /// The branch direction came from a `__builtin_expect`-style hint
    pub predicted_by_expect: bool,
    pub goto_location: Option<Location>,
}

impl Edge {
    pub fn is_true_value(&self) -> bool {
        self.kind == EdgeKind::True
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Value(ValueId),
    Const(i64),
}

impl Operand {
    /// `Some(false)` for constant 0, `Some(true)` for constant 1.
    pub fn as_zero_or_one(&self) -> Option<bool> {
        match self {
            Operand::Const(0) => Some(false),
            Operand::Const(1) => Some(true),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Direct(DeclId),
    /// Call through a function pointer value
    Indirect(ValueId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    /// Debug binding; never carries profile weight
    Debug,
    /// `dest = src`
    Copy { dest: ValueId, src: Operand },
    /// Any other computation defining `dest`
    Compute { dest: ValueId },
    Call {
        target: CallTarget,
        num_args: usize,
        dest: Option<ValueId>,
    },
    /// `if (lhs op rhs)`; ends its block, which has one true and one false edge
    Cond { lhs: Operand, op: CmpOp, rhs: Operand },
    Return,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub id: StmtId,
    pub kind: StmtKind,
    pub location: Option<Location>,
}

impl Statement {
    pub fn is_debug(&self) -> bool {
        matches!(self.kind, StmtKind::Debug)
    }

    pub fn is_indirect_call(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Call {
                target: CallTarget::Indirect(_),
                ..
            }
        )
    }

    pub fn call_args(&self) -> Option<usize> {
        match self.kind {
            StmtKind::Call { num_args, .. } => Some(num_args),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhiArg {
    /// Incoming edge the value flows along
    pub edge: EdgeId,
    pub value: Operand,
    pub location: Option<Location>,
}

#[derive(Debug, Clone)]
pub struct PhiNode {
    pub dest: ValueId,
    pub args: Vec<PhiArg>,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub statements: Vec<Statement>,
    pub phis: Vec<PhiNode>,
    pub preds: Vec<EdgeId>,
    pub succs: Vec<EdgeId>,
    pub count: u64,
    pub annotated: bool,
    /// Relative to the hottest block, out of [`REG_BR_PROB_BASE`]
    pub frequency: u32,
}

impl BasicBlock {
    fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            statements: Vec::new(),
            phis: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            count: 0,
            annotated: false,
            frequency: 0,
        }
    }

    /// Last non-debug statement.
    pub fn last_stmt(&self) -> Option<&Statement> {
        self.statements.iter().rev().find(|s| !s.is_debug())
    }

    pub fn has_indirect_call(&self) -> bool {
        self.statements.iter().any(Statement::is_indirect_call)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileStatus {
    #[default]
    Absent,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionFrequency {
    Unlikely,
    #[default]
    Normal,
    Hot,
}

/// Definition site of an SSA value.
#[derive(Debug, Clone, Copy)]
pub enum Def<'a> {
    Stmt(&'a Statement),
    Phi(&'a PhiNode),
}

#[derive(Debug, Clone)]
pub struct FunctionBody {
    blocks: Vec<BasicBlock>,
    edges: Vec<Edge>,
    layout: Vec<BlockId>,
    pub start_locus: Option<Location>,
    pub end_locus: Option<Location>,
    pub profile_status: ProfileStatus,
    pub frequency: FunctionFrequency,
    /// Function entry count, kept apart from the ENTRY block count
    pub count: u64,
    /// Indirect-call histograms attached for the value-profile transformation
    pub histograms: FxHashMap<StmtId, IndirectCallHistogram>,
    next_stmt: u32,
    next_value: u32,
}

impl Default for FunctionBody {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionBody {
    pub fn new() -> Self {
        FunctionBody {
            blocks: vec![
                BasicBlock::new(BlockId::ENTRY),
                BasicBlock::new(BlockId::EXIT),
            ],
            edges: Vec::new(),
            layout: Vec::new(),
            start_locus: None,
            end_locus: None,
            profile_status: ProfileStatus::Absent,
            frequency: FunctionFrequency::Normal,
            count: 0,
            histograms: FxHashMap::default(),
            next_stmt: 0,
            next_value: 0,
        }
    }

    /// Append a real block at the end of the layout.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        self.layout.push(id);
        id
    }

    pub fn add_edge(&mut self, src: BlockId, dest: BlockId) -> EdgeId {
        self.add_edge_kind(src, dest, EdgeKind::Fallthru)
    }

    pub fn add_edge_kind(&mut self, src: BlockId, dest: BlockId, kind: EdgeKind) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge {
            src,
            dest,
            kind,
            count: 0,
            probability: REG_BR_PROB_BASE,
            annotated: false,
            predicted_by_expect: false,
            goto_location: None,
        });
        self.blocks[src.index()].succs.push(id);
        self.blocks[dest.index()].preds.push(id);
        id
    }

    /// Add the true and false edges of a conditional block.
    pub fn add_cond_edges(
        &mut self,
        src: BlockId,
        on_true: BlockId,
        on_false: BlockId,
    ) -> (EdgeId, EdgeId) {
        let t = self.add_edge_kind(src, on_true, EdgeKind::True);
        let f = self.add_edge_kind(src, on_false, EdgeKind::False);
        (t, f)
    }

    pub fn new_value(&mut self) -> ValueId {
        let v = ValueId(self.next_value);
        self.next_value += 1;
        v
    }

    pub fn push_stmt(
        &mut self,
        block: BlockId,
        kind: StmtKind,
        location: Option<Location>,
    ) -> StmtId {
        let id = StmtId(self.next_stmt);
        self.next_stmt += 1;
        self.blocks[block.index()].statements.push(Statement { id, kind, location });
        id
    }

    pub fn push_phi(&mut self, block: BlockId, phi: PhiNode) {
        self.blocks[block.index()].phis.push(phi);
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0 as usize]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id.0 as usize]
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges
            .iter()
            .enumerate()
            .map(|(i, e)| (EdgeId(i as u32), e))
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut Edge> {
        self.edges.iter_mut()
    }

    /// Total number of blocks, pseudo blocks included.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Real blocks in layout order.
    pub fn real_blocks(&self) -> &[BlockId] {
        &self.layout
    }

    /// ENTRY, the real blocks in layout order, then EXIT.
    pub fn all_blocks(&self) -> Vec<BlockId> {
        let mut all = Vec::with_capacity(self.layout.len() + 2);
        all.push(BlockId::ENTRY);
        all.extend_from_slice(&self.layout);
        all.push(BlockId::EXIT);
        all
    }

    pub fn first_real_block(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    pub fn last_real_block(&self) -> Option<BlockId> {
        self.layout.last().copied()
    }

    pub fn successors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.block(block).succs.iter().map(|&e| self.edge(e).dest)
    }

    pub fn predecessors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.block(block).preds.iter().map(|&e| self.edge(e).src)
    }

    pub fn entry_count(&self) -> u64 {
        self.count
    }

    /// Where `value` is defined, if anywhere in this body.
    pub fn def(&self, value: ValueId) -> Option<Def<'_>> {
        for block in &self.blocks {
            if let Some(phi) = block.phis.iter().find(|p| p.dest == value) {
                return Some(Def::Phi(phi));
            }
            let found = block.statements.iter().find(|s| match s.kind {
                StmtKind::Copy { dest, .. } | StmtKind::Compute { dest } => dest == value,
                StmtKind::Call { dest, .. } => dest == Some(value),
                _ => false,
            });
            if let Some(stmt) = found {
                return Some(Def::Stmt(stmt));
            }
        }
        None
    }

    pub fn statements(&self) -> impl Iterator<Item = &Statement> {
        self.layout
            .iter()
            .flat_map(move |&b| self.block(b).statements.iter())
    }
}
