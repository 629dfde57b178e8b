//! Translation-unit pipeline: build per-function summaries, run the
//! interprocedural fixpoint, classify offloaded accesses, analyze each
//! function, and resolve the rewrites against the source text.

use tracing::debug;

use crate::ast::TranslationUnit;
use crate::diag::Diagnostic;
use crate::rewrite::edits::RewriteBatch;
use crate::summary::FunctionSummary;
use crate::{flow, interproc, rewrite};

#[derive(Debug, Clone)]
pub struct AnalyzerOptions {
    /// Leave offload-only callee data to callers
    /// (`--aggressive-cross-function`).
    pub aggressive_cross_function: bool,
    /// Cap on interprocedural fixpoint rounds; recursion never
    /// converges, so the residue past the cap stays unknown.
    pub max_propagation_rounds: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            aggressive_cross_function: false,
            max_propagation_rounds: 10,
        }
    }
}

#[derive(Debug)]
pub struct AnalysisOutcome {
    /// The rewritten source text.
    pub source: String,
    /// Whether any edit was applied.
    pub changed: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Build the per-function summaries for a unit, in declaration order.
pub fn build_summaries(tu: &TranslationUnit) -> Vec<FunctionSummary> {
    tu.functions.iter().map(|f| FunctionSummary::from_feed(tu, f)).collect()
}

/// Run the whole pipeline over one translation unit.
pub fn analyze_unit(tu: &TranslationUnit, opts: &AnalyzerOptions) -> AnalysisOutcome {
    let mut summaries = build_summaries(tu);

    interproc::propagate(tu, &mut summaries, opts.max_propagation_rounds);
    for fs in &mut summaries {
        fs.classify_offloaded();
    }
    if opts.aggressive_cross_function {
        interproc::aggressive_cross_function(tu, &mut summaries);
    }

    let mut diagnostics = Vec::new();
    for fs in &mut summaries {
        flow::analyze_function(tu, fs, &mut diagnostics);
    }

    let mut batch = RewriteBatch::new();
    for fs in &summaries {
        if let Some(region) = &fs.region {
            rewrite::rewrite_region(tu, fs, region, &mut batch);
        }
    }
    debug!(target: "ompmap::driver", file = %tu.file, edits = batch.len(), "rewrites resolved");

    AnalysisOutcome {
        changed: !batch.is_empty(),
        source: batch.apply(&tu.source),
        diagnostics,
    }
}
