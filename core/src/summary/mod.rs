//! Access-log builder: turns one function's AST event stream into a
//! [`FunctionSummary`] — the position-ordered log of data accesses and
//! scope barriers everything downstream works on.


use std::collections::BTreeSet;
use std::fmt::Write as _;

use once_cell::sync::Lazy;

use crate::access::{AccessEntry, AccessMode, Bound, LoopBounds, ScopeBarrier};
use crate::ast::{
    AstEvent, CallArg, CmpOp, ForParts, FunctionFeed, IndexExpr, Operand, SourcePos, StmtId, StmtKind, TranslationUnit,
    VarId,
};
use crate::region::TargetDataRegion;
use crate::util::FastHashSet;

/// Functions that allocate memory without guaranteeing its contents.
/// `calloc` is deliberately absent: it zero-fills, which counts as a
/// write.
static MEM_ALLOC: Lazy<FastHashSet<&'static str>> = Lazy::new(|| ["malloc", "realloc"].into_iter().collect());

static MEM_DEALLOC: Lazy<FastHashSet<&'static str>> = Lazy::new(|| ["free"].into_iter().collect());

pub fn is_mem_alloc(name: &str) -> bool {
    MEM_ALLOC.contains(name)
}

pub fn is_mem_dealloc(name: &str) -> bool {
    MEM_DEALLOC.contains(name)
}

/// One offloaded directive and its captured extent.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub directive: StmtId,
    /// Span of the pragma itself; references inside it are not data
    /// accesses.
    pub directive_begin: SourcePos,
    pub directive_end: SourcePos,
    /// Extent of the captured statement, extended over nested
    /// non-atomic, statement-bearing directives.
    pub begin: SourcePos,
    pub end: SourcePos,
    private: FastHashSet<VarId>,
    nested: Vec<StmtId>,
    /// Index window of this kernel in the owning log, set by the
    /// classifier.
    pub window: Option<(usize, usize)>,
}

impl Kernel {
    pub fn new(tu: &TranslationUnit, directive: StmtId) -> Self {
        let info = tu.stmt(directive);
        let (begin, end) = match info.kind {
            StmtKind::Directive { captured: Some(c), .. } => {
                let mut inner = c;
                while let StmtKind::Directive { captured: Some(n), .. } = tu.stmt(inner).kind {
                    inner = n;
                }
                (tu.stmt(inner).begin, tu.stmt(inner).end)
            }
            _ => (info.begin, info.end),
        };
        Self {
            directive,
            directive_begin: info.begin,
            directive_end: info.end,
            begin,
            end,
            private: FastHashSet::default(),
            nested: Vec::new(),
            window: None,
        }
    }

    pub fn contains(&self, pos: SourcePos) -> bool {
        self.begin <= pos && pos < self.end
    }

    pub fn record_private(&mut self, var: VarId) {
        self.private.insert(var);
    }

    pub fn is_private(&self, var: VarId) -> bool {
        self.private.contains(&var)
    }

    pub fn private_decls(&self) -> impl Iterator<Item = VarId> + '_ {
        self.private.iter().copied()
    }

    /// Record a directive nested inside this kernel. Non-atomic
    /// directives with a captured statement extend the kernel's
    /// extent.
    pub fn record_nested(&mut self, tu: &TranslationUnit, stmt: StmtId) {
        self.nested.push(stmt);
        if let StmtKind::Directive {
            captured: Some(_),
            atomic: false,
            ..
        } = tu.stmt(stmt).kind
        {
            let captured_end = tu.directive_captured_end(stmt);
            if self.end < captured_end {
                self.end = captured_end;
            }
        }
    }

    pub fn last_nested(&self) -> Option<StmtId> {
        self.nested.last().copied()
    }
}

/// A recorded call expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    pub stmt: StmtId,
    pub pos: SourcePos,
    pub callee: String,
    pub args: Vec<CallArg>,
}

/// Per-function analysis state: the access log, the kernels, the
/// referenced declarations, and eventually the computed target data
/// region.
#[derive(Debug)]
pub struct FunctionSummary {
    pub name: String,
    pub body: StmtId,
    pub decl_pos: SourcePos,
    pub params: Vec<VarId>,
    pub log: Vec<AccessEntry>,
    pub kernels: Vec<Kernel>,
    pub loops: Vec<StmtId>,
    pub conds: Vec<StmtId>,
    pub calls: Vec<CallSite>,
    pub locals: FastHashSet<VarId>,
    /// Referenced declarations not local to this function, ordered so
    /// the interprocedural mode vectors pair deterministically.
    pub globals: BTreeSet<VarId>,
    /// Declarations whose mapping is managed elsewhere (kernel-private
    /// data, or caller-managed data under the aggressive policy).
    pub disabled: FastHashSet<VarId>,
    pub region: Option<TargetDataRegion>,
    pending_subscript: Option<(VarId, IndexExpr)>,
}

impl FunctionSummary {
    pub fn new(feed: &FunctionFeed) -> Self {
        Self {
            name: feed.name.clone(),
            body: feed.body,
            decl_pos: feed.decl_pos,
            params: feed.params.clone(),
            log: Vec::new(),
            kernels: Vec::new(),
            loops: Vec::new(),
            conds: Vec::new(),
            calls: Vec::new(),
            locals: feed.params.iter().copied().collect(),
            globals: BTreeSet::new(),
            disabled: FastHashSet::default(),
            region: None,
            pending_subscript: None,
        }
    }

    /// Replay a walker event stream. Events must arrive in source
    /// order, parents before children, directives before their
    /// captured statements.
    pub fn from_feed(tu: &TranslationUnit, feed: &FunctionFeed) -> Self {
        let mut fs = Self::new(feed);
        for ev in &feed.events {
            match ev {
                AstEvent::LocalDecl { var, stmt, has_init } => {
                    let pos = tu.decl(*var).pos;
                    if let Some(k) = fs.kernels.last_mut()
                        && k.contains(pos)
                    {
                        k.record_private(*var);
                        continue;
                    }
                    fs.locals.insert(*var);
                    let mode = if *has_init { AccessMode::Write } else { AccessMode::Nop };
                    fs.record_access(tu, *var, pos, Some(*stmt), mode, false, true);
                }
                AstEvent::Access {
                    var,
                    pos,
                    stmt,
                    mode,
                    overwrite,
                } => {
                    fs.record_access(tu, *var, *pos, Some(*stmt), *mode, false, *overwrite);
                }
                AstEvent::ArraySubscript { base, pos, index } => {
                    fs.record_array_access(*base, *pos, index.clone());
                }
                AstEvent::Loop { stmt, parts } => {
                    fs.record_loop(tu, *stmt, parts.as_ref());
                }
                AstEvent::Cond { stmt, arms } => {
                    fs.record_cond(tu, *stmt, arms);
                }
                AstEvent::Directive { stmt, private_vars } => {
                    if matches!(tu.stmt(*stmt).kind, StmtKind::Directive { kernel: true, .. }) {
                        fs.record_target_region(tu, *stmt, private_vars);
                    } else {
                        fs.record_nested_directive(tu, *stmt);
                    }
                }
                AstEvent::Call { stmt, pos, callee, args } => {
                    fs.record_call(
                        tu,
                        CallSite {
                            stmt: *stmt,
                            pos: *pos,
                            callee: callee.clone(),
                            args: args.clone(),
                        },
                    );
                }
            }
        }
        fs
    }

    fn insert_entry(&mut self, entry: AccessEntry) {
        // Maintain increasing position; new entries usually land near
        // the tail, so walk backwards. Ties append after, which keeps
        // begin barriers ahead of the contents recorded later.
        let mut i = self.log.len();
        while i > 0 && entry.pos < self.log[i - 1].pos {
            i -= 1;
        }
        self.log.insert(i, entry);
    }

    /// Upsert one data access. Returns the number of log changes (0 or
    /// 1) so the interprocedural fixpoint can count updates.
    pub fn record_access(
        &mut self,
        tu: &TranslationUnit,
        var: VarId,
        pos: SourcePos,
        stmt: Option<StmtId>,
        mode: AccessMode,
        offload: bool,
        overwrite: bool,
    ) -> usize {
        let decl = tu.decl(var);
        if decl.synthetic {
            return 0;
        }

        if let Some(k) = self.kernels.last() {
            // Private data never moves.
            if k.is_private(var) {
                return 0;
            }
            // References within the pragma text itself (clause
            // operands, duplicated parameter references) are not data
            // accesses, and neither is anything inside an
            // already-recorded nested directive's pragma.
            if decl.pos >= k.directive_begin && decl.pos < k.directive_end {
                return 0;
            }
            if pos >= k.directive_begin && pos < k.directive_end {
                return 0;
            }
            if let Some(nd) = k.last_nested() {
                let info = tu.stmt(nd);
                if pos >= info.begin && pos < info.end {
                    return 0;
                }
            }
        }

        for e in self.log.iter_mut().rev() {
            if e.var == Some(var) && e.pos == pos {
                if !overwrite || (e.mode == mode && e.offload == offload) {
                    return 0;
                }
                e.mode = mode;
                e.offload = offload;
                return 1;
            }
        }

        if !self.locals.contains(&var) {
            self.globals.insert(var);
        }

        let mut entry = AccessEntry::data(var, pos, stmt, mode);
        entry.offload = offload;
        if let Some((base, index)) = self.pending_subscript.take() {
            if base == var {
                entry.subscript = Some(index);
            } else {
                self.pending_subscript = Some((base, index));
            }
        }
        self.insert_entry(entry);
        1
    }

    /// The subscript is often seen before the enclosing operator fixes
    /// the access mode; attach it to the existing entry or hold it for
    /// the next matching [`record_access`](Self::record_access).
    pub fn record_array_access(&mut self, base: VarId, pos: SourcePos, index: IndexExpr) {
        if let Some(e) = self
            .log
            .iter_mut()
            .find(|e| e.var == Some(base) && e.pos == pos)
        {
            e.subscript = Some(index);
            self.pending_subscript = None;
            return;
        }
        self.pending_subscript = Some((base, index));
    }

    pub fn record_loop(&mut self, tu: &TranslationUnit, stmt: StmtId, parts: Option<&ForParts>) {
        self.loops.push(stmt);
        let info = tu.stmt(stmt);
        let offload = self.kernels.last().map(|k| k.contains(info.begin)).unwrap_or(false);

        let mut begin = AccessEntry::barrier(ScopeBarrier::LoopBegin, info.begin, stmt);
        begin.offload = offload;
        if matches!(info.kind, StmtKind::For { .. })
            && let Some(parts) = parts
        {
            begin.bounds = extract_loop_bounds(parts);
        }
        self.insert_entry(begin);

        let mut end = AccessEntry::barrier(ScopeBarrier::LoopEnd, info.end, stmt);
        end.offload = offload;
        self.insert_entry(end);
    }

    /// Insert the conditional's barriers. Re-entry for an already
    /// recorded statement is a no-op (each arm of an if/else chain
    /// would otherwise re-record the whole chain).
    pub fn record_cond(&mut self, tu: &TranslationUnit, stmt: StmtId, arms: &[crate::ast::CondArm]) {
        if self.conds.contains(&stmt) {
            return;
        }
        self.conds.push(stmt);
        let info = tu.stmt(stmt);
        self.insert_entry(AccessEntry::barrier(ScopeBarrier::CondBegin, info.begin, stmt));
        for arm in arms {
            let kind = if arm.fallback {
                ScopeBarrier::CondFallback
            } else {
                ScopeBarrier::CondCase
            };
            self.insert_entry(AccessEntry::barrier(kind, arm.pos, stmt));
        }
        self.insert_entry(AccessEntry::barrier(ScopeBarrier::CondEnd, info.end, stmt));
    }

    pub fn record_target_region(&mut self, tu: &TranslationUnit, directive: StmtId, private_vars: &[VarId]) {
        let mut kernel = Kernel::new(tu, directive);
        for &v in private_vars {
            kernel.record_private(v);
        }
        self.insert_entry(AccessEntry::barrier(ScopeBarrier::KernelBegin, kernel.begin, directive));
        self.insert_entry(AccessEntry::barrier(ScopeBarrier::KernelEnd, kernel.end, directive));
        self.kernels.push(kernel);
    }

    pub fn record_nested_directive(&mut self, tu: &TranslationUnit, stmt: StmtId) {
        let begin = tu.stmt(stmt).begin;
        if let Some(k) = self.kernels.last_mut()
            && k.contains(begin)
        {
            k.record_nested(tu, stmt);
        }
    }

    /// Record the call and the per-argument accesses. Argument modes
    /// come hinted from the walker; calls into non-initializing
    /// allocators and deallocators move no data.
    pub fn record_call(&mut self, tu: &TranslationUnit, site: CallSite) {
        let no_transfer = is_mem_alloc(&site.callee) || is_mem_dealloc(&site.callee);
        for arg in &site.args {
            let Some(var) = arg.var else { continue };
            let mode = if no_transfer { AccessMode::Nop } else { arg.mode };
            self.record_access(tu, var, arg.pos, Some(site.stmt), mode, false, true);
        }
        self.calls.push(site);
    }

    /// Kernel classifier: mark every non-barrier entry with a nonzero
    /// mode inside a kernel's extent as offloaded, and remember each
    /// kernel's index window. Idempotent.
    pub fn classify_offloaded(&mut self) {
        for k in self.kernels.iter_mut() {
            let lo = self
                .log
                .iter()
                .position(|e| e.pos >= k.begin)
                .unwrap_or(self.log.len());
            let mut hi = lo;
            while hi < self.log.len() && self.log[hi].pos < k.end {
                hi += 1;
            }
            k.window = Some((lo, hi));
            for e in &mut self.log[lo..hi] {
                if e.mode != AccessMode::Nop {
                    e.offload = true;
                }
            }
        }
    }

    /// True when any entry carries the offload mark.
    pub fn has_offload(&self) -> bool {
        self.log.iter().any(|e| e.offload)
    }

    /// Caller-facing access mode of every parameter: the lattice join
    /// of all recorded accesses. The flag is set only under the
    /// aggressive policy, for pointer parameters whose every non-NOP
    /// access is offloaded; such parameters are marked disabled here
    /// (the caller manages their mapping).
    pub fn param_access_modes(&mut self, tu: &TranslationUnit, cross_function: bool) -> Vec<(AccessMode, bool)> {
        let mut out = Vec::with_capacity(self.params.len());
        for &p in &self.params {
            if !tu.decl(p).pointer {
                out.push((AccessMode::Nop, false));
                continue;
            }
            out.push(joined_mode(&self.log, p, cross_function));
        }
        for (i, &(_, offload_only)) in out.iter().enumerate() {
            if offload_only {
                self.disabled.insert(self.params[i]);
            }
        }
        out
    }

    /// Caller-facing access mode of every referenced global, in
    /// `globals` iteration order.
    pub fn global_access_modes(&mut self, cross_function: bool) -> Vec<(AccessMode, bool)> {
        let globals: Vec<VarId> = self.globals.iter().copied().collect();
        let mut out = Vec::with_capacity(globals.len());
        for &g in &globals {
            let entry = joined_mode(&self.log, g, cross_function);
            if entry.1 {
                self.disabled.insert(g);
            }
            out.push(entry);
        }
        out
    }

    /// Render the log for debugging.
    pub fn dump_log(&self, tu: &TranslationUnit) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "access log for function {}", self.name);
        for e in &self.log {
            let name = e.var.map(|v| tu.decl(v).name.as_str()).unwrap_or("-");
            let barrier = e.barrier.map(|b| format!("{b:?}")).unwrap_or_default();
            let exec = if e.offload { "device" } else { "host" };
            let _ = writeln!(out, "{:>10}  {:<9} {:<6} {:<12} {}", name, e.mode, exec, barrier, e.pos);
        }
        out
    }
}

fn joined_mode(log: &[AccessEntry], var: VarId, cross_function: bool) -> (AccessMode, bool) {
    let mut mode = AccessMode::Nop;
    let mut any = false;
    let mut all_offloaded = true;
    for e in log {
        if e.var == Some(var) {
            mode = mode.join(e.mode);
            if e.mode != AccessMode::Nop {
                any = true;
                all_offloaded &= e.offload;
            }
        }
    }
    (mode, cross_function && any && all_offloaded)
}

fn operand_bound(op: &Operand) -> Bound {
    match op {
        Operand::Literal(v) => Bound::Literal(*v),
        Operand::Var(v) => Bound::Var(*v),
        Operand::Expr(text) => Bound::Expr(text.clone()),
    }
}

/// Extract loop bounds from a recognizable counted `for` pattern: a
/// unary `++`/`--` step on a single variable, an init assigning it and
/// a condition comparing it. Unrecognizable loops yield no bounds,
/// which is not an error.
pub fn extract_loop_bounds(parts: &ForParts) -> Option<LoopBounds> {
    let step = parts.step?;
    let index = step.var;

    let init_bound = parts
        .init
        .as_ref()
        .filter(|i| i.var == index)
        .map(|i| operand_bound(&i.value));

    let mut cond_bound = None;
    let mut cmp = None;
    if let Some(c) = &parts.cond {
        if matches!(&c.lhs, Operand::Var(v) if *v == index) {
            cond_bound = Some(operand_bound(&c.rhs));
            cmp = Some(c.op);
        } else if matches!(&c.rhs, Operand::Var(v) if *v == index) {
            cond_bound = Some(operand_bound(&c.lhs));
            cmp = Some(c.op);
        }
    }

    let (lower, upper, lower_adjust, upper_adjust) = if step.ascending {
        let upper_adjust = match cmp {
            Some(CmpOp::Le) | Some(CmpOp::Ge) => 1,
            _ => 0,
        };
        (init_bound, cond_bound, 0, upper_adjust)
    } else {
        let lower_adjust = match cmp {
            Some(CmpOp::Lt) | Some(CmpOp::Gt) | Some(CmpOp::Ne) => 1,
            _ => 0,
        };
        (cond_bound, init_bound, lower_adjust, 1)
    };

    if lower.is_none() && upper.is_none() {
        return None;
    }
    Some(LoopBounds {
        lower,
        upper,
        index,
        lower_adjust,
        upper_adjust,
    })
}
