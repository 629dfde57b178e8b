//! Programmatic construction of [`TranslationUnit`] dumps.
//!
//! Event producers (the upstream walker, tests, benchmarks) assemble a
//! unit against the source text with this builder. Positions are
//! usually anchored by searching the text, so fixtures stay readable.
//!
//! Position lookups panic on a missing pattern: a builder that points
//! at text that is not there is a programming error, not an input
//! error.

use super::{
    AstEvent, DeclInfo, FunctionFeed, SourcePos, StmtId, StmtInfo, StmtKind, TranslationUnit, VarId, offset_to_pos,
};

#[derive(Debug)]
pub struct TuBuilder {
    file: String,
    source: String,
    decls: Vec<DeclInfo>,
    stmts: Vec<StmtInfo>,
    functions: Vec<FunctionFeed>,
}

impl TuBuilder {
    pub fn new(file: &str, source: &str) -> Self {
        Self {
            file: file.to_string(),
            source: source.to_string(),
            decls: Vec::new(),
            stmts: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Position of the `n`-th (0-based) occurrence of `pat`.
    pub fn pos_nth(&self, pat: &str, n: usize) -> SourcePos {
        let mut from = 0;
        for _ in 0..n {
            match self.source[from..].find(pat) {
                Some(i) => from = from + i + pat.len(),
                None => panic!("pattern {pat:?} has no occurrence {n}"),
            }
        }
        match self.source[from..].find(pat) {
            Some(i) => offset_to_pos(&self.source, from + i),
            None => panic!("pattern {pat:?} has no occurrence {n}"),
        }
    }

    /// Position of the first occurrence of `pat`.
    pub fn pos(&self, pat: &str) -> SourcePos {
        self.pos_nth(pat, 0)
    }

    /// Position one past the end of the `n`-th occurrence of `pat`.
    pub fn pos_after_nth(&self, pat: &str, n: usize) -> SourcePos {
        let p = self.pos_nth(pat, n);
        offset_to_pos(&self.source, p.offset + pat.len())
    }

    pub fn pos_after(&self, pat: &str) -> SourcePos {
        self.pos_after_nth(pat, 0)
    }

    pub fn push_decl(&mut self, decl: DeclInfo) -> VarId {
        let id = VarId(self.decls.len() as u32);
        self.decls.push(decl);
        id
    }

    /// An arithmetic-typed variable, declared at the first occurrence
    /// of its name.
    pub fn scalar(&mut self, name: &str) -> VarId {
        let pos = self.pos(name);
        self.push_decl(DeclInfo {
            name: name.to_string(),
            pos,
            arithmetic: true,
            pointer: false,
            pointee_const: false,
            synthetic: false,
        })
    }

    /// An array-typed variable (non-arithmetic, non-pointer).
    pub fn array(&mut self, name: &str) -> VarId {
        let pos = self.pos(name);
        self.push_decl(DeclInfo {
            name: name.to_string(),
            pos,
            arithmetic: false,
            pointer: false,
            pointee_const: false,
            synthetic: false,
        })
    }

    /// A pointer or reference variable.
    pub fn pointer(&mut self, name: &str, pointee_const: bool) -> VarId {
        let pos = self.pos(name);
        self.push_decl(DeclInfo {
            name: name.to_string(),
            pos,
            arithmetic: false,
            pointer: true,
            pointee_const,
            synthetic: false,
        })
    }

    pub fn stmt(&mut self, kind: StmtKind, begin: SourcePos, end: SourcePos, parent: Option<StmtId>) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(StmtInfo {
            kind,
            begin,
            end,
            parent,
        });
        id
    }

    /// A statement spanning the `n`-th occurrence of `text`, ending one
    /// past its last character.
    pub fn stmt_over_nth(&mut self, kind: StmtKind, text: &str, n: usize, parent: Option<StmtId>) -> StmtId {
        let begin = self.pos_nth(text, n);
        let end = offset_to_pos(&self.source, begin.offset + text.len());
        self.stmt(kind, begin, end, parent)
    }

    pub fn stmt_over(&mut self, kind: StmtKind, text: &str, parent: Option<StmtId>) -> StmtId {
        self.stmt_over_nth(kind, text, 0, parent)
    }

    /// Re-parent a statement. Captured statements are usually built
    /// before the directive that owns them.
    pub fn set_parent(&mut self, stmt: StmtId, parent: StmtId) {
        self.stmts[stmt.0 as usize].parent = Some(parent);
    }

    /// Start a new function feed; subsequent [`event`](Self::event)
    /// calls append to it.
    pub fn function(&mut self, name: &str, decl_pos: SourcePos, body: StmtId, params: Vec<VarId>) {
        self.functions.push(FunctionFeed {
            name: name.to_string(),
            decl_pos,
            body,
            params,
            events: Vec::new(),
        });
    }

    pub fn event(&mut self, event: AstEvent) {
        match self.functions.last_mut() {
            Some(f) => f.events.push(event),
            None => panic!("event recorded before any function"),
        }
    }

    pub fn finish(self) -> TranslationUnit {
        TranslationUnit {
            file: self.file,
            source: self.source,
            decls: self.decls,
            stmts: self.stmts,
            functions: self.functions,
        }
    }
}
