//! Host program model
//!
//! The minimal view of a compiler's IR that profile annotation works on:
//! declarations and lexical scopes ([`program`]), function bodies
//! ([`body`]), and the control-flow analyses propagation queries
//! ([`analysis`], backed by [`dominance`] and [`loops`]).

pub mod analysis;
pub mod body;
pub mod dominance;
pub mod loops;
pub mod program;

pub use analysis::{CfgAnalyses, ControlFlowAnalysis};
pub use body::{
    BasicBlock, BlockId, CallTarget, CmpOp, Def, Edge, EdgeId, EdgeKind, FunctionBody,
    FunctionFrequency, Operand, PhiArg, PhiNode, ProfileStatus, Statement, StmtId, StmtKind,
    ValueId, REG_BR_PROB_BASE,
};
pub use dominance::DominatorTree;
pub use loops::LoopNestInfo;
pub use program::{DeclId, FunctionDecl, InlinedCall, LexicalScope, Location, Program, ScopeId};
