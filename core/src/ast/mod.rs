//! The AST surface consumed by the analyzer.
//!
//! The upstream walker (a Clang tool, not part of this repository)
//! exports one [`TranslationUnit`] per source file: the original text,
//! an arena of statements with precomputed parent links, an arena of
//! variable declarations, and a source-ordered event stream per
//! function body. Everything is addressed through integer handles so
//! the dump serializes cleanly and the analyzer never chases pointers.

pub mod build;

#[cfg(test)]
mod ast_test;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::access::AccessMode;

/// A position inside the analyzed main file. Ordering, equality and
/// hashing all go through the byte offset; line and column exist for
/// diagnostics and directive placement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl SourcePos {
    pub fn new(line: u32, column: u32, offset: usize) -> Self {
        Self { line, column, offset }
    }
}

impl PartialEq for SourcePos {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl Eq for SourcePos {}

impl PartialOrd for SourcePos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SourcePos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.offset.cmp(&other.offset)
    }
}

impl std::hash::Hash for SourcePos {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Convert a byte offset into a line/column position.
pub fn offset_to_pos(text: &str, offset: usize) -> SourcePos {
    let mut line = 1;
    let mut column = 1;

    for (i, ch) in text.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }

    SourcePos::new(line, column, offset)
}

/// Handle of a declaration in [`TranslationUnit::decls`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub u32);

/// Handle of a statement in [`TranslationUnit::stmts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StmtId(pub u32);

/// What the analyzer needs to know about one declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclInfo {
    pub name: String,
    /// Location of the declared identifier.
    pub pos: SourcePos,
    /// Arithmetic (integer/floating) type; only these may be demoted
    /// to `firstprivate`.
    pub arithmetic: bool,
    /// Pointer or reference type.
    pub pointer: bool,
    /// Pointer/reference whose pointee is const-qualified.
    pub pointee_const: bool,
    /// Compiler-synthesized temporary; never recorded in the log.
    pub synthetic: bool,
}

/// Statement shape, reduced to what placement needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Compound,
    For { body: StmtId },
    While { body: StmtId },
    DoWhile { body: StmtId },
    If,
    Switch,
    /// An OpenMP executable directive. `captured` is the associated
    /// statement; `kernel` marks offloading (`target`-family)
    /// directives; `atomic` and bodyless directives never extend a
    /// kernel's extent.
    Directive {
        captured: Option<StmtId>,
        kernel: bool,
        atomic: bool,
    },
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StmtInfo {
    pub kind: StmtKind,
    pub begin: SourcePos,
    /// One past the last character of the statement's own text,
    /// excluding a trailing semicolon. For directives this covers the
    /// pragma line only, not the captured statement.
    pub end: SourcePos,
    pub parent: Option<StmtId>,
}

/// Operand of a for-loop bound: a literal, a direct variable
/// reference, or an opaque expression rendered as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Literal(i64),
    Var(VarId),
    Expr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    Eq,
}

/// The recognizable pieces of a counted `for` loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForParts {
    /// `i = <value>` or `int i = <value>` in the init clause.
    pub init: Option<LoopInit>,
    /// The condition comparison.
    pub cond: Option<LoopCond>,
    /// A unary `++`/`--` on a single variable.
    pub step: Option<LoopStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopInit {
    pub var: VarId,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopCond {
    pub op: CmpOp,
    pub lhs: Operand,
    pub rhs: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopStep {
    pub var: VarId,
    pub ascending: bool,
}

/// An array subscript expression, reduced to the variables it
/// references and an optional constant value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexExpr {
    pub vars: Vec<VarId>,
    pub literal: Option<i64>,
}

/// One arm of an `if`/`else if`/`else` chain or a `switch` case.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CondArm {
    pub pos: SourcePos,
    /// Trailing `else` or `default:`.
    pub fallback: bool,
}

/// One argument at a call site. `var` is set only when the argument is
/// a direct variable reference through an implicit conversion
/// sequence; `mode` is the walker's hint derived from the callee's
/// parameter type (UNKNOWN for pointer/reference to non-const, READ
/// otherwise).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallArg {
    pub var: Option<VarId>,
    pub pos: SourcePos,
    pub mode: AccessMode,
}

/// Source-ordered events for one function body, as delivered by the
/// walker (parents before children, directives before their captured
/// statements).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstEvent {
    LocalDecl {
        var: VarId,
        stmt: StmtId,
        has_init: bool,
    },
    Access {
        var: VarId,
        pos: SourcePos,
        stmt: StmtId,
        mode: AccessMode,
        overwrite: bool,
    },
    ArraySubscript {
        base: VarId,
        pos: SourcePos,
        index: IndexExpr,
    },
    Loop {
        stmt: StmtId,
        parts: Option<ForParts>,
    },
    Cond {
        stmt: StmtId,
        arms: Vec<CondArm>,
    },
    Directive {
        stmt: StmtId,
        private_vars: Vec<VarId>,
    },
    Call {
        stmt: StmtId,
        pos: SourcePos,
        callee: String,
        args: Vec<CallArg>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionFeed {
    pub name: String,
    /// Start of the function definition (used to derive indentation).
    pub decl_pos: SourcePos,
    pub body: StmtId,
    pub params: Vec<VarId>,
    pub events: Vec<AstEvent>,
}

/// The dump for one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub file: String,
    pub source: String,
    pub decls: Vec<DeclInfo>,
    pub stmts: Vec<StmtInfo>,
    pub functions: Vec<FunctionFeed>,
}

impl TranslationUnit {
    /// Parse a walker-exported dump.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        use anyhow::Context as _;
        serde_json::from_str(text).context("malformed translation-unit dump")
    }

    pub fn decl(&self, var: VarId) -> &DeclInfo {
        &self.decls[var.0 as usize]
    }

    pub fn stmt(&self, id: StmtId) -> &StmtInfo {
        &self.stmts[id.0 as usize]
    }

    pub fn is_loop(&self, id: StmtId) -> bool {
        matches!(
            self.stmt(id).kind,
            StmtKind::For { .. } | StmtKind::While { .. } | StmtKind::DoWhile { .. }
        )
    }

    pub fn loop_body(&self, id: StmtId) -> Option<StmtId> {
        match self.stmt(id).kind {
            StmtKind::For { body } | StmtKind::While { body } | StmtKind::DoWhile { body } => Some(body),
            _ => None,
        }
    }

    /// The outermost statement under `ancestor` whose transitive child
    /// is `s`. Returns `None` when `s` is not below `ancestor`, which
    /// callers surface as an anchor-resolution failure.
    pub fn outermost_capturing_stmt(&self, ancestor: StmtId, s: StmtId) -> Option<StmtId> {
        let mut cur = s;
        if cur == ancestor {
            return Some(cur);
        }
        loop {
            match self.stmt(cur).parent {
                Some(p) if p == ancestor => return Some(cur),
                Some(p) => cur = p,
                None => return None,
            }
        }
    }

    /// The nearest ancestor (including `s` itself) whose parent is a
    /// compound statement or the top of the chain: the statement whose
    /// textual extent ends with a semicolon or closing brace.
    pub fn semi_terminated_stmt(&self, s: StmtId) -> StmtId {
        let mut cur = s;
        loop {
            match self.stmt(cur).parent {
                Some(p) if matches!(self.stmt(p).kind, StmtKind::Compound) => return cur,
                Some(p) => cur = p,
                None => return cur,
            }
        }
    }

    /// End of the innermost captured statement of a directive chain;
    /// for non-directives, the statement's own end.
    pub fn directive_captured_end(&self, s: StmtId) -> SourcePos {
        let mut cur = s;
        while let StmtKind::Directive { captured: Some(c), .. } = self.stmt(cur).kind {
            cur = c;
        }
        self.stmt(cur).end
    }
}
