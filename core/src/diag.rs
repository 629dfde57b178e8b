//! Analysis warnings. These never stop the pipeline; they are
//! collected in a sink and rendered by the caller.

use std::fmt;

use crate::ast::SourcePos;

#[derive(Debug, Clone, PartialEq)]
pub enum DiagKind {
    /// A read was observed before any write initialized the variable.
    UninitializedUse,
    /// The variable is declared inside the target data region that
    /// manages it; the declaration was expected to precede the region.
    DeclCapturedByRegion { region_begin: SourcePos },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub var: String,
    pub pos: SourcePos,
}

impl Diagnostic {
    pub fn uninitialized_use(var: &str, pos: SourcePos) -> Self {
        Self {
            kind: DiagKind::UninitializedUse,
            var: var.to_string(),
            pos,
        }
    }

    pub fn decl_captured(var: &str, pos: SourcePos, region_begin: SourcePos) -> Self {
        Self {
            kind: DiagKind::DeclCapturedByRegion { region_begin },
            var: var.to_string(),
            pos,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagKind::UninitializedUse => {
                write!(
                    f,
                    "{}: warning: variable '{}' is uninitialized when used here",
                    self.pos, self.var
                )
            }
            DiagKind::DeclCapturedByRegion { region_begin } => {
                write!(
                    f,
                    "{}: warning: declaration of '{}' is captured within a target data region in which it is being utilized\n{}: note: declaration of '{}' was anticipated to precede the beginning of the target data region at this location",
                    self.pos, self.var, region_begin, self.var
                )
            }
        }
    }
}
