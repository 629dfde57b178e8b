//! The target data region: the outermost span of a function enclosing
//! every offloaded kernel, together with the data movement decided for
//! it. Built through [`RegionBuilder`] during per-variable analysis and
//! frozen afterwards.

use crate::ast::{SourcePos, StmtId, VarId};

/// Where an update directive is placed relative to its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnchorSite {
    /// Around the statement: `update to` after its semicolon-terminated
    /// extent, `update from` before it.
    Stmt(StmtId),
    /// Hoisted host-to-device copy: once, directly after the loop.
    AfterLoop(StmtId),
    /// Hoisted device-to-host copy: once, directly before the loop the
    /// subscript is indexed by.
    BeforeLoop(StmtId),
    /// Loop-carried device-to-host copy: at the end of the loop body,
    /// every iteration.
    LoopBodyEnd(StmtId),
}

/// One pending `target update` insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlacement {
    pub var: VarId,
    /// Temporal position of the access that caused the update; always
    /// inside the owning region.
    pub pos: SourcePos,
    pub site: AnchorSite,
}

/// One pending `firstprivate` clause addition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstPrivate {
    pub directive: StmtId,
    pub var: VarId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    Alloc,
    To,
    From,
    ToFrom,
}

/// Frozen result of per-function analysis. The four map lists are
/// pairwise disjoint over variables.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDataRegion {
    pub begin: SourcePos,
    pub end: SourcePos,
    /// Directives of the kernels the region spans, in source order.
    pub kernels: Vec<StmtId>,
    pub map_alloc: Vec<VarId>,
    pub map_to: Vec<VarId>,
    pub map_from: Vec<VarId>,
    pub map_tofrom: Vec<VarId>,
    pub update_to: Vec<UpdatePlacement>,
    pub update_from: Vec<UpdatePlacement>,
    pub first_private: Vec<FirstPrivate>,
}

impl TargetDataRegion {
    pub fn contains(&self, pos: SourcePos) -> bool {
        self.begin <= pos && pos <= self.end
    }
}

/// Mutable accumulator owned by the data-flow engine; append-only
/// except for the firstprivate rollback of a speculative update.
#[derive(Debug)]
pub struct RegionBuilder {
    region: TargetDataRegion,
}

impl RegionBuilder {
    pub fn new(begin: SourcePos, end: SourcePos, kernels: Vec<StmtId>) -> Self {
        Self {
            region: TargetDataRegion {
                begin,
                end,
                kernels,
                map_alloc: Vec::new(),
                map_to: Vec::new(),
                map_from: Vec::new(),
                map_tofrom: Vec::new(),
                update_to: Vec::new(),
                update_from: Vec::new(),
                first_private: Vec::new(),
            },
        }
    }

    pub fn begin(&self) -> SourcePos {
        self.region.begin
    }

    pub fn end(&self) -> SourcePos {
        self.region.end
    }

    pub fn push_update_to(&mut self, p: UpdatePlacement) {
        self.region.update_to.push(p);
    }

    pub fn push_update_from(&mut self, p: UpdatePlacement) {
        self.region.update_from.push(p);
    }

    /// Undo the trailing `update to` if it was recorded for `var` at
    /// `pos`: a kernel that turned out to be firstprivate-eligible
    /// rolls back the copy it speculatively requested.
    pub fn pop_update_to_if(&mut self, var: VarId, pos: SourcePos) -> bool {
        if let Some(last) = self.region.update_to.last()
            && last.var == var
            && last.pos == pos
        {
            self.region.update_to.pop();
            return true;
        }
        false
    }

    pub fn push_first_private(&mut self, directive: StmtId, var: VarId) {
        self.region.first_private.push(FirstPrivate { directive, var });
    }

    /// Record the region-scope clause for `var`. Each variable is
    /// placed at most once, keeping the four lists disjoint.
    pub fn place_map(&mut self, var: VarId, kind: MapKind) {
        let list = match kind {
            MapKind::Alloc => &mut self.region.map_alloc,
            MapKind::To => &mut self.region.map_to,
            MapKind::From => &mut self.region.map_from,
            MapKind::ToFrom => &mut self.region.map_tofrom,
        };
        list.push(var);
    }

    pub fn finish(self) -> TargetDataRegion {
        self.region
    }
}
