//! Declarations, lexical scopes and function bodies of the program being
//! compiled.
//!
//! Only what profile annotation consumes is modeled: symbol names, start and
//! end lines, abstract origins, and the scope tree that records where code was
//! inlined from.

use super::body::FunctionBody;
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use source_map::{FileId, SourceMap};

/// Unique identifier for a function declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeclId(pub u32);

impl std::fmt::Display for DeclId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decl{}", self.0)
    }
}

/// Unique identifier for a lexical scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

/// A source location, optionally tied to the lexical scope it occurs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: FileId,
    pub line: u32,
    pub discriminator: u32,
    pub scope: Option<ScopeId>,
}

impl Location {
    pub fn new(file: FileId, line: u32) -> Self {
        Location {
            file,
            line,
            discriminator: 0,
            scope: None,
        }
    }

    pub fn with_discriminator(mut self, discriminator: u32) -> Self {
        self.discriminator = discriminator;
        self
    }

    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Same file and line, whatever the scope or discriminator.
    pub fn same_line(&self, other: &Location) -> bool {
        self.file == other.file && self.line == other.line
    }
}

/// Inlining metadata of a scope created by inlining a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlinedCall {
    pub callee: DeclId,
    pub call_location: Location,
}

#[derive(Debug, Clone, Default)]
pub struct LexicalScope {
    pub parent: Option<ScopeId>,
    pub inlined: Option<InlinedCall>,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub assembler_name: String,
    pub debug_name: Option<String>,
    pub abstract_origin: Option<DeclId>,
    /// Declaration location; its line is the base of location keys
    pub location: Location,
    /// Line of the closing brace, when the body is known
    pub end_line: Option<u32>,
    pub num_params: usize,
    pub is_builtin: bool,
}

impl FunctionDecl {
    pub fn new(assembler_name: impl Into<String>, file: FileId, start_line: u32) -> Self {
        FunctionDecl {
            assembler_name: assembler_name.into(),
            debug_name: None,
            abstract_origin: None,
            location: Location::new(file, start_line),
            end_line: None,
            num_params: 0,
            is_builtin: false,
        }
    }

    pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
        self.debug_name = Some(name.into());
        self
    }

    pub fn with_abstract_origin(mut self, origin: DeclId) -> Self {
        self.abstract_origin = Some(origin);
        self
    }

    pub fn with_end_line(mut self, line: u32) -> Self {
        self.end_line = Some(line);
        self
    }

    pub fn with_params(mut self, num_params: usize) -> Self {
        self.num_params = num_params;
        self
    }

    pub fn builtin(mut self) -> Self {
        self.is_builtin = true;
        self
    }

    pub fn start_line(&self) -> u32 {
        self.location.line
    }

    /// Source-level name, or the assembler name when there is none.
    pub fn printable_name(&self) -> &str {
        self.debug_name.as_deref().unwrap_or(&self.assembler_name)
    }
}

/// The translation unit under compilation.
#[derive(Debug, Default)]
pub struct Program {
    pub source_map: SourceMap,
    decls: Vec<FunctionDecl>,
    scopes: Vec<LexicalScope>,
    bodies: FxHashMap<DeclId, FunctionBody>,
    by_name: FxHashMap<String, DeclId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, decl: FunctionDecl) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.by_name.insert(decl.assembler_name.clone(), id);
        self.decls.push(decl);
        id
    }

    pub fn add_scope(&mut self, scope: LexicalScope) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        id
    }

    /// Record that `callee` was inlined at `call_location`; returns the new
    /// scope for the inlined body.
    pub fn add_inlined_scope(
        &mut self,
        parent: Option<ScopeId>,
        callee: DeclId,
        call_location: Location,
    ) -> ScopeId {
        self.add_scope(LexicalScope {
            parent,
            inlined: Some(InlinedCall {
                callee,
                call_location,
            }),
        })
    }

    pub fn decl(&self, id: DeclId) -> &FunctionDecl {
        &self.decls[id.0 as usize]
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut FunctionDecl {
        &mut self.decls[id.0 as usize]
    }

    pub fn decl_count(&self) -> usize {
        self.decls.len()
    }

    pub fn decl_ids(&self) -> impl Iterator<Item = DeclId> {
        (0..self.decls.len() as u32).map(DeclId)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&LexicalScope> {
        self.scopes.get(id.0 as usize)
    }

    /// Function with the given assembler name.
    pub fn find_function(&self, name: &str) -> Option<DeclId> {
        self.by_name.get(name).copied()
    }

    pub fn set_body(&mut self, id: DeclId, body: FunctionBody) {
        self.bodies.insert(id, body);
    }

    pub fn body(&self, id: DeclId) -> Option<&FunctionBody> {
        self.bodies.get(&id)
    }

    pub fn body_mut(&mut self, id: DeclId) -> Option<&mut FunctionBody> {
        self.bodies.get_mut(&id)
    }

    pub fn has_body(&self, id: DeclId) -> bool {
        self.bodies.contains_key(&id)
    }

    /// Detach a body for exclusive processing; pair with [`Program::set_body`].
    pub fn take_body(&mut self, id: DeclId) -> Option<FunctionBody> {
        self.bodies.remove(&id)
    }

    /// Whether `callee` can stand in for an indirect call with `num_args` arguments.
    pub fn is_compatible_call_target(&self, callee: DeclId, num_args: usize) -> bool {
        self.decl(callee).num_params == num_args
    }
}
