//! Access model: what one log entry says about one variable.


use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{IndexExpr, SourcePos, StmtId, VarId};

/// Direction of a recorded access.
///
/// `Unknown` is a call-mediated access whose direction has not been
/// resolved yet; the interprocedural pass refines it. The lattice is
/// `Nop ⊑ {Read, Write} ⊑ ReadWrite ⊑ Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessMode {
    #[default]
    Nop,
    Read,
    Write,
    ReadWrite,
    Unknown,
}

impl AccessMode {
    /// Read, ReadWrite or Unknown: the access may observe the value.
    pub fn reads(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite | AccessMode::Unknown)
    }

    /// Write, ReadWrite or Unknown: the access may change the value.
    pub fn writes(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite | AccessMode::Unknown)
    }

    /// Read or ReadWrite: the access definitely observes the value.
    pub fn reads_definitely(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn join(self, other: AccessMode) -> AccessMode {
        use AccessMode::*;
        match (self, other) {
            (Unknown, _) | (_, Unknown) => Unknown,
            (Nop, m) | (m, Nop) => m,
            (ReadWrite, _) | (_, ReadWrite) => ReadWrite,
            (Read, Write) | (Write, Read) => ReadWrite,
            (Read, Read) => Read,
            (Write, Write) => Write,
        }
    }

    /// `self ⊑ other` in the refinement lattice.
    pub fn ascends_to(self, other: AccessMode) -> bool {
        self.join(other) == other
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessMode::Nop => "nop",
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::ReadWrite => "readwrite",
            AccessMode::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Marker carried by variable-less log entries delimiting a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeBarrier {
    KernelBegin,
    KernelEnd,
    LoopBegin,
    LoopEnd,
    CondBegin,
    CondCase,
    CondFallback,
    CondEnd,
}

/// A for-loop bound after extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Literal(i64),
    Var(VarId),
    Expr(String),
}

/// Bounds of a counted `for` loop, attached to its LoopBegin entry.
/// The adjustments compensate the comparison operator: an inclusive
/// upper comparison on an ascending loop really runs one element
/// further, and mirrored for descending loops.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopBounds {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
    pub index: VarId,
    pub lower_adjust: i8,
    pub upper_adjust: i8,
}

/// One unit of the per-function access log: either a data access of a
/// variable or a scope barrier. Entries are identified by
/// (variable, position) for deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessEntry {
    pub var: Option<VarId>,
    pub stmt: Option<StmtId>,
    pub pos: SourcePos,
    pub mode: AccessMode,
    /// The access lies inside an offloaded kernel (set by the kernel
    /// classifier, or by interprocedural propagation under the
    /// aggressive policy).
    pub offload: bool,
    pub barrier: Option<ScopeBarrier>,
    pub subscript: Option<IndexExpr>,
    pub bounds: Option<LoopBounds>,
}

impl AccessEntry {
    pub fn data(var: VarId, pos: SourcePos, stmt: Option<StmtId>, mode: AccessMode) -> Self {
        Self {
            var: Some(var),
            stmt,
            pos,
            mode,
            offload: false,
            barrier: None,
            subscript: None,
            bounds: None,
        }
    }

    pub fn barrier(kind: ScopeBarrier, pos: SourcePos, stmt: StmtId) -> Self {
        Self {
            var: None,
            stmt: Some(stmt),
            pos,
            mode: AccessMode::Nop,
            offload: false,
            barrier: Some(kind),
            subscript: None,
            bounds: None,
        }
    }

    /// A data entry (not a barrier).
    pub fn is_data(&self) -> bool {
        self.barrier.is_none()
    }
}
