//! Placement resolver: turn the abstract placements of a
//! [`TargetDataRegion`] into concrete text insertions — map clauses at
//! the region boundary, `target update` directives at their anchors,
//! and `firstprivate` clauses on kernel pragmas.

pub mod edits;

#[cfg(test)]
mod rewrite_test;

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{StmtId, StmtInfo, StmtKind, TranslationUnit, VarId};
use crate::region::{AnchorSite, TargetDataRegion, UpdatePlacement};
use crate::summary::FunctionSummary;
use edits::RewriteBatch;

const FALLBACK_INDENT_STEP: &str = "    ";

/// Emit every edit for one region into `batch`.
pub fn rewrite_region(tu: &TranslationUnit, fs: &FunctionSummary, region: &TargetDataRegion, batch: &mut RewriteBatch) {
    rewrite_clauses(tu, region, batch);

    if region.map_alloc.is_empty()
        && region.map_to.is_empty()
        && region.map_from.is_empty()
        && region.map_tofrom.is_empty()
    {
        return;
    }

    let step = indentation_step(tu, fs);
    rewrite_data_map(tu, region, batch, &step);
    rewrite_updates(tu, batch, &region.update_to, Direction::To, &step);
    rewrite_updates(tu, batch, &region.update_from, Direction::From, &step);
}

fn names(tu: &TranslationUnit, vars: impl IntoIterator<Item = VarId>) -> String {
    let mut out = String::new();
    for v in vars {
        if !out.is_empty() {
            out.push(',');
        }
        out.push_str(&tu.decl(v).name);
    }
    out
}

/// Group firstprivate additions per directive and append one clause to
/// each pragma.
fn rewrite_clauses(tu: &TranslationUnit, region: &TargetDataRegion, batch: &mut RewriteBatch) {
    let mut per_directive: BTreeMap<StmtId, BTreeSet<VarId>> = BTreeMap::new();
    for fp in &region.first_private {
        per_directive.entry(fp.directive).or_default().insert(fp.var);
    }
    for (directive, vars) in per_directive {
        let clause = format!(" firstprivate({})", names(tu, vars));
        batch.insert_before(tu.stmt(directive).end.offset, clause);
    }
}

fn rewrite_data_map(tu: &TranslationUnit, region: &TargetDataRegion, batch: &mut RewriteBatch, step: &str) {
    let src = &tu.source;
    let single_kernel_region =
        region.kernels.len() == 1 && tu.stmt(region.kernels[0]).begin == region.begin;

    let mut directive = String::new();
    if !single_kernel_region {
        directive.push_str("#pragma omp target data");
    }
    for (kind, vars) in [
        ("alloc", &region.map_alloc),
        ("to", &region.map_to),
        ("from", &region.map_from),
        ("tofrom", &region.map_tofrom),
    ] {
        if !vars.is_empty() {
            directive.push_str(&format!(" map({kind}:{})", names(tu, vars.iter().copied())));
        }
    }

    if single_kernel_region {
        // The one kernel begins the region; extend its own pragma.
        batch.insert_before(tu.stmt(region.kernels[0]).end.offset, directive);
        return;
    }

    // Fresh `target data` directive wrapping the region in braces, with
    // the enclosed lines shifted one level right.
    let indent = indent_at(src, region.begin.offset);
    let mut open = directive;
    open.push('\n');
    open.push_str(&indent);
    open.push_str("{\n");
    open.push_str(&indent);
    open.push_str(step);
    batch.insert_before(region.begin.offset, open);

    let mut close_off = region.end.offset;
    // A do-while region ends before its semicolon.
    if src.as_bytes().get(close_off) == Some(&b';') {
        close_off += 1;
    }
    batch.insert_after(close_off, format!("\n{indent}}}\n"));

    for line in region.begin.line + 1..=region.end.line {
        if let Some(off) = line_start_offset(src, line) {
            batch.insert_before(off, step.to_string());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    To,
    From,
}

impl Direction {
    fn keyword(self) -> &'static str {
        match self {
            Direction::To => "to",
            Direction::From => "from",
        }
    }
}

/// Concrete insertion shape for one update directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Target {
    /// After the statement's semicolon-terminated extent.
    AfterStmt(StmtId),
    /// Before the statement, on its own line.
    BeforeStmt(StmtId),
    /// At the top of a compound body.
    BodyTop(StmtId),
    /// Before the closing brace of a compound body.
    BodyEnd(StmtId),
}

fn is_compound(tu: &TranslationUnit, s: StmtId) -> bool {
    matches!(tu.stmt(s).kind, StmtKind::Compound)
}

fn resolve_target(tu: &TranslationUnit, p: &UpdatePlacement, dir: Direction) -> Target {
    match p.site {
        AnchorSite::AfterLoop(l) => Target::AfterStmt(l),
        AnchorSite::BeforeLoop(l) => Target::BeforeStmt(l),
        AnchorSite::LoopBodyEnd(l) => match tu.loop_body(l) {
            Some(body) if is_compound(tu, body) => Target::BodyEnd(body),
            Some(body) => Target::BeforeStmt(body),
            None => Target::BeforeStmt(l),
        },
        AnchorSite::Stmt(s) => {
            let full = tu.semi_terminated_stmt(s);
            match dir {
                Direction::To => {
                    // A host access sitting in a loop header resolves
                    // to the loop; the copy goes at the top of its
                    // body.
                    if let Some(body) = tu.loop_body(full) {
                        if is_compound(tu, body) {
                            Target::BodyTop(body)
                        } else {
                            Target::AfterStmt(body)
                        }
                    } else if is_compound(tu, full) {
                        Target::BodyTop(full)
                    } else {
                        Target::AfterStmt(full)
                    }
                }
                Direction::From => {
                    // Reads in a do-while condition re-run every
                    // iteration; the copy belongs at the body end.
                    if let StmtKind::DoWhile { body } = tu.stmt(full).kind {
                        if is_compound(tu, body) {
                            Target::BodyEnd(body)
                        } else {
                            Target::BeforeStmt(body)
                        }
                    } else if is_compound(tu, full) {
                        Target::BodyEnd(full)
                    } else {
                        Target::BeforeStmt(full)
                    }
                }
            }
        }
    }
}

fn rewrite_updates(
    tu: &TranslationUnit,
    batch: &mut RewriteBatch,
    placements: &[UpdatePlacement],
    dir: Direction,
    step: &str,
) {
    if placements.is_empty() {
        return;
    }

    // Variables sharing an insertion point merge into one directive.
    let mut grouped: BTreeMap<Target, BTreeSet<VarId>> = BTreeMap::new();
    for p in placements {
        grouped.entry(resolve_target(tu, p, dir)).or_default().insert(p.var);
    }

    for (target, vars) in grouped {
        let pragma = format!("#pragma omp target update {}({})", dir.keyword(), names(tu, vars));
        emit_update(tu, batch, target, &pragma, step);
    }
}

// Update directives only occur in regions that get wrapped in a fresh
// `target data` block, whose lines are shifted one level right after
// the fact. The inserted text compensates by carrying one extra
// indentation step.
fn emit_update(tu: &TranslationUnit, batch: &mut RewriteBatch, target: Target, pragma: &str, step: &str) {
    let src = &tu.source;
    match target {
        Target::AfterStmt(s) => {
            let insert = semi_end_offset(src, tu.stmt(s).end.offset);
            let indent = format!("{}{step}", indent_at(src, tu.stmt(s).begin.offset));
            let mut text = format!("\n{indent}{pragma}");
            // Push any trailing text on the same line down to a fresh
            // one.
            let trailing = whitespace_run(src, insert);
            if has_text_before_newline(src, insert + trailing) {
                text.push('\n');
                text.push_str(&indent);
                batch.remove_range(insert, trailing);
            }
            batch.insert_before(insert, text);
        }
        Target::BeforeStmt(s) => {
            let insert = tu.stmt(s).begin.offset;
            let indent = format!("{}{step}", indent_at(src, insert));
            let mut text = format!("{pragma}\n{indent}");
            let lead = leading_run(src, insert);
            if has_text_after_line_start(src, insert - lead) {
                text = format!("\n{indent}{text}");
                batch.remove_range(insert - lead, lead);
            }
            batch.insert_before(insert, text);
        }
        Target::BodyTop(c) => {
            let insert = tu.stmt(c).begin.offset + 1;
            let indent = format!("{}{step}", body_indent_of(src, tu.stmt(c)));
            let mut text = format!("\n{indent}{pragma}");
            let trailing = whitespace_run(src, insert);
            if has_text_before_newline(src, insert + trailing) {
                text.push('\n');
                text.push_str(&indent);
                batch.remove_range(insert, trailing);
            }
            batch.insert_before(insert, text);
        }
        Target::BodyEnd(c) => {
            let info = tu.stmt(c);
            let brace = info.end.offset.saturating_sub(1);
            let inner = body_indent_of(src, info);
            let outer = indent_at(src, brace);
            if line_is_blank_before(src, brace) {
                // The brace sits on its own line; the directive takes
                // the body indentation just above it.
                batch.insert_before(brace, format!("{step}{pragma}\n{outer}{step}"));
            } else {
                batch.insert_before(brace, format!("\n{inner}{step}{pragma}\n{outer}{step}"));
            }
        }
    }
}

// --- source text helpers ---

fn line_start_at(src: &str, offset: usize) -> usize {
    let b = src.as_bytes();
    let mut i = offset.min(b.len());
    while i > 0 && b[i - 1] != b'\n' {
        i -= 1;
    }
    i
}

/// Byte offset of the first column of a 1-based line number.
fn line_start_offset(src: &str, line: u32) -> Option<usize> {
    if line == 1 {
        return Some(0);
    }
    let mut current = 1u32;
    for (i, ch) in src.char_indices() {
        if ch == '\n' {
            current += 1;
            if current == line {
                return Some(i + 1);
            }
        }
    }
    None
}

/// Leading whitespace of the line containing `offset`.
fn indent_at(src: &str, offset: usize) -> String {
    let start = line_start_at(src, offset);
    src[start..]
        .chars()
        .take_while(|&c| c == ' ' || c == '\t')
        .collect()
}

/// Indentation of the first non-blank line inside a compound body.
fn body_indent_of(src: &str, info: &StmtInfo) -> String {
    let b = src.as_bytes();
    let end = info.end.offset.min(b.len());
    let mut i = (info.begin.offset + 1).min(end);
    while i < end && b[i] != b'\n' {
        i += 1;
    }
    let mut indent = String::new();
    while i < end && (b[i] as char).is_ascii_whitespace() {
        if b[i] == b'\n' {
            indent.clear();
        } else {
            indent.push(b[i] as char);
        }
        i += 1;
    }
    indent
}

/// One level of indentation, derived from the distance between the
/// function's declaration line and its body's first statement.
fn indentation_step(tu: &TranslationUnit, fs: &FunctionSummary) -> String {
    let parent = indent_at(&tu.source, fs.decl_pos.offset);
    let body = tu.stmt(fs.body);
    if !matches!(body.kind, StmtKind::Compound) {
        return if parent.is_empty() {
            FALLBACK_INDENT_STEP.to_string()
        } else {
            parent
        };
    }
    let inner = body_indent_of(&tu.source, body);
    match inner.strip_prefix(&parent) {
        Some(step) if !step.is_empty() => step.to_string(),
        _ => FALLBACK_INDENT_STEP.to_string(),
    }
}

/// Offset one past the statement's terminator: the closing brace it
/// already ends with, or the next semicolon.
fn semi_end_offset(src: &str, stmt_end: usize) -> usize {
    let b = src.as_bytes();
    let end = stmt_end.min(b.len());
    if end > 0 && b[end - 1] == b'}' {
        return end;
    }
    let mut i = end;
    while i < b.len() && b[i] != b';' {
        i += 1;
    }
    (i + 1).min(b.len())
}

/// Length of the whitespace run starting at `offset`, stopping at a
/// newline.
fn whitespace_run(src: &str, offset: usize) -> usize {
    let b = src.as_bytes();
    let mut i = offset;
    while i < b.len() && b[i] != b'\n' && (b[i] as char).is_ascii_whitespace() {
        i += 1;
    }
    i - offset
}

fn has_text_before_newline(src: &str, offset: usize) -> bool {
    let b = src.as_bytes();
    offset < b.len() && b[offset] != b'\n'
}

/// Length of the whitespace run ending at `offset`, stopping at a
/// newline.
fn leading_run(src: &str, offset: usize) -> usize {
    let b = src.as_bytes();
    let mut i = offset;
    while i > 0 && b[i - 1] != b'\n' && (b[i - 1] as char).is_ascii_whitespace() {
        i -= 1;
    }
    offset - i
}

fn has_text_after_line_start(src: &str, offset: usize) -> bool {
    let b = src.as_bytes();
    offset > 0 && b[offset - 1] != b'\n'
}

/// True when everything between the line start and `offset` is
/// whitespace.
fn line_is_blank_before(src: &str, offset: usize) -> bool {
    let start = line_start_at(src, offset);
    src[start..offset].chars().all(|c| c == ' ' || c == '\t')
}
