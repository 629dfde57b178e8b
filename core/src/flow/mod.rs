//! Per-variable data-flow engine.
//!
//! For every variable with an offloaded use, walk the access log once
//! with a (host-valid, device-valid, initialized, firstprivate-
//! candidate) state machine and decide the region-scope map clause,
//! the mid-region update directives, and firstprivate demotion.


use std::collections::BTreeSet;

use tracing::{debug, error};

use crate::access::{AccessEntry, AccessMode, ScopeBarrier};
use crate::ast::{StmtKind, TranslationUnit, VarId};
use crate::diag::Diagnostic;
use crate::region::{AnchorSite, MapKind, RegionBuilder, UpdatePlacement};
use crate::summary::FunctionSummary;

/// Snapshot taken when entering a non-offloaded loop.
struct LoopFrame {
    valid_on_host: bool,
    valid_on_device: bool,
    map_to: bool,
    first_host_access: Option<usize>,
}

/// Analyze one classified function summary and attach its
/// `TargetDataRegion`. Functions without offloaded accesses get none;
/// functions whose region extent cannot be anchored are skipped with
/// an error.
pub fn analyze_function(tu: &TranslationUnit, fs: &mut FunctionSummary, diags: &mut Vec<Diagnostic>) {
    fs.classify_offloaded();

    let Some(first) = fs.log.iter().position(|e| e.offload) else {
        fs.region = None;
        return;
    };
    let Some(last) = fs.log.iter().rposition(|e| e.offload) else {
        fs.region = None;
        return;
    };
    debug!(target: "ompmap::flow", function = %fs.name, "analyzing\n{}", fs.dump_log(tu));

    // The region spans the outermost statements enclosing the first
    // and last offloaded entries, widened to the kernels' own
    // enclosing statements. Directive ends are the end of the
    // innermost captured statement, not the pragma span.
    let mut scope_begin = fs.log[first]
        .stmt
        .and_then(|s| tu.outermost_capturing_stmt(fs.body, s))
        .map(|s| tu.stmt(s).begin);
    let mut scope_end = fs.log[last]
        .stmt
        .and_then(|s| tu.outermost_capturing_stmt(fs.body, s))
        .map(|s| tu.stmt(s).end);

    if let (Some(first_kernel), Some(last_kernel)) = (fs.kernels.first(), fs.kernels.last()) {
        if let Some(front) = tu.outermost_capturing_stmt(fs.body, first_kernel.directive) {
            let begin = tu.stmt(front).begin;
            if scope_begin.is_none_or(|b| begin < b) {
                scope_begin = Some(begin);
            }
        }
        if let Some(back) = tu.outermost_capturing_stmt(fs.body, last_kernel.directive) {
            let end = match tu.stmt(back).kind {
                StmtKind::Directive { .. } => tu.directive_captured_end(back),
                _ => tu.stmt(back).end,
            };
            if scope_end.is_none_or(|e| e < end) {
                scope_end = Some(end);
            }
        }
    }

    let (Some(begin), Some(end)) = (scope_begin, scope_end) else {
        error!(
            target: "ompmap::flow",
            "data mapping scope could not be determined for function {}", fs.name
        );
        fs.region = None;
        return;
    };

    let mut builder = RegionBuilder::new(begin, end, fs.kernels.iter().map(|k| k.directive).collect());

    // Kernel-private data is managed by the kernels themselves.
    for k in &fs.kernels {
        for v in k.private_decls() {
            fs.disabled.insert(v);
        }
    }

    let targets: BTreeSet<VarId> = fs
        .log
        .iter()
        .filter(|e| e.offload && e.is_data())
        .filter_map(|e| e.var)
        .collect();

    for var in targets {
        if !fs.disabled.contains(&var) {
            analyze_var(tu, fs, &mut builder, var, diags);
        }
    }

    fs.region = Some(builder.finish());
}

/// Walk outward through the loops enclosing an array access and return
/// the outermost one whose bounded index variable appears in the
/// subscript, without crossing `limit` (normally the preceding kernel
/// boundary). The update directive hoists to that loop.
fn outermost_indexing_loop(
    log: &[AccessEntry],
    access: usize,
    loop_stack: &[usize],
    limit: Option<usize>,
) -> Option<usize> {
    let subscript = log[access].subscript.as_ref()?;
    let mut outermost = None;
    for &l in loop_stack.iter().rev() {
        if let Some(lim) = limit
            && log[l].pos < log[lim].pos
        {
            break;
        }
        let Some(bounds) = &log[l].bounds else { continue };
        if subscript.vars.contains(&bounds.index) {
            outermost = Some(l);
        }
    }
    outermost
}

fn analyze_var(
    tu: &TranslationUnit,
    fs: &FunctionSummary,
    builder: &mut RegionBuilder,
    var: VarId,
    diags: &mut Vec<Diagnostic>,
) {
    let log = &fs.log;
    let decl = tu.decl(var);
    let is_arithmetic = decl.arithmetic;
    let is_global = fs.globals.contains(&var);
    let is_param = fs.params.contains(&var);
    let is_param_ptr_to_nonconst = is_param && decl.pointer && !decl.pointee_const;

    let mut map_to = false;
    let mut map_from = false;
    let mut device_wrote = false;
    // Globals and parameters arrive initialized, with the host copy
    // current.
    let mut initialized = is_global || is_param;
    let mut valid_on_host = is_global || is_param;
    let mut valid_on_device = false;

    let mut first_private = false;
    let mut used_in_last_kernel = false;
    let mut prev_map_to = false;

    let mut loop_frames: Vec<LoopFrame> = Vec::new();
    let mut cond_stack: Vec<usize> = Vec::new();
    let mut loop_stack: Vec<usize> = Vec::new();
    let mut prev_host_loop_stack: Vec<usize> = Vec::new();
    let mut prev_host: Option<usize> = None;
    let mut prev_target: Option<usize> = None;

    let region_begin = builder.begin();
    let region_end = builder.end();

    for i in 0..log.len() {
        let e = &log[i];
        // Only entries in the flow of `var`: its accesses plus every
        // barrier.
        if e.barrier.is_none() && e.var != Some(var) {
            continue;
        }

        match e.barrier {
            Some(ScopeBarrier::LoopBegin) => {
                if !e.offload {
                    loop_frames.push(LoopFrame {
                        valid_on_host,
                        valid_on_device,
                        map_to,
                        first_host_access: None,
                    });
                }
                loop_stack.push(i);
            }
            Some(ScopeBarrier::LoopEnd) => {
                loop_stack.pop();
                if !e.offload
                    && let Some(frame) = loop_frames.pop()
                {
                    if frame.valid_on_host
                        && !valid_on_host
                        && let (Some(fh), Some(loop_stmt)) = (frame.first_host_access, e.stmt)
                    {
                        // The loop body invalidated the host copy it
                        // started with; restore it at the end of each
                        // iteration.
                        builder.push_update_from(UpdatePlacement {
                            var,
                            pos: log[fh].pos,
                            site: AnchorSite::LoopBodyEnd(loop_stmt),
                        });
                        valid_on_host = true;
                    }
                    if (frame.valid_on_device && !valid_on_device && frame.first_host_access.is_some())
                        || (!frame.map_to && map_to && !valid_on_device)
                    {
                        // A region-scope map decided inside the loop is
                        // not enough once the loop re-runs; a mid-region
                        // update at the host access suffices instead.
                        if let Some(ph) = prev_host
                            && let Some(stmt) = log[ph].stmt
                        {
                            builder.push_update_to(UpdatePlacement {
                                var,
                                pos: log[ph].pos,
                                site: AnchorSite::Stmt(stmt),
                            });
                            map_to = frame.map_to;
                        }
                    }
                }
            }
            Some(ScopeBarrier::CondBegin) => cond_stack.push(i),
            Some(ScopeBarrier::CondCase) | Some(ScopeBarrier::CondFallback) => {}
            Some(ScopeBarrier::CondEnd) => {
                cond_stack.pop();
            }
            Some(ScopeBarrier::KernelBegin) => {
                if is_arithmetic && !valid_on_device {
                    first_private = true;
                    used_in_last_kernel = false;
                    prev_map_to = map_to;
                }
            }
            Some(ScopeBarrier::KernelEnd) => {
                if is_arithmetic && first_private {
                    // Still a read-only scalar not already resident:
                    // demote to firstprivate and roll back the copy the
                    // kernel speculatively requested.
                    if let Some(ph) = prev_host {
                        builder.pop_update_to_if(var, log[ph].pos);
                    }
                    map_to = prev_map_to;
                    if used_in_last_kernel
                        && let Some(stmt) = e.stmt
                    {
                        builder.push_first_private(stmt, var);
                    }
                    first_private = false;
                    valid_on_device = false;
                }
                prev_target = Some(i);
            }
            None if e.offload => {
                if e.mode != AccessMode::Read {
                    first_private = false;
                }
                if !initialized {
                    if e.mode.reads_definitely() {
                        diags.push(Diagnostic::uninitialized_use(&decl.name, e.pos));
                    } else if matches!(e.mode, AccessMode::Write | AccessMode::Unknown) {
                        initialized = true;
                    }
                } else if (!cond_stack.is_empty() && e.mode.writes()) || (!valid_on_device && e.mode.reads()) {
                    // A conditional write leaves the host copy
                    // unprovable; a read needs the data present.
                    match prev_host {
                        None => map_to = true,
                        Some(ph) if log[ph].pos < region_begin => map_to = true,
                        Some(ph) => {
                            if log[ph].subscript.is_some()
                                && let Some(l) = outermost_indexing_loop(log, ph, &prev_host_loop_stack, prev_target)
                            {
                                if let Some(loop_stmt) = log[l].stmt {
                                    builder.push_update_to(UpdatePlacement {
                                        var,
                                        pos: log[ph].pos,
                                        site: AnchorSite::AfterLoop(loop_stmt),
                                    });
                                }
                            } else if let Some(stmt) = log[ph].stmt {
                                builder.push_update_to(UpdatePlacement {
                                    var,
                                    pos: log[ph].pos,
                                    site: AnchorSite::Stmt(stmt),
                                });
                            }
                        }
                    }
                    valid_on_device = true;
                }
                if e.mode.writes() {
                    valid_on_device = true;
                    valid_on_host = false;
                    device_wrote = true;
                }
                used_in_last_kernel = true;
            }
            None => {
                if !initialized {
                    if e.pos == decl.pos && !(e.pos < region_begin) {
                        diags.push(Diagnostic::decl_captured(&decl.name, e.pos, region_begin));
                    }
                    if e.mode.reads_definitely() {
                        diags.push(Diagnostic::uninitialized_use(&decl.name, e.pos));
                    } else if matches!(e.mode, AccessMode::Write | AccessMode::Unknown) {
                        initialized = true;
                    }
                } else if !valid_on_host && e.mode.reads() {
                    if region_end < e.pos {
                        // Past the region: the region boundary itself
                        // carries the data out.
                        map_from = true;
                    } else if e.subscript.is_some()
                        && let Some(l) = outermost_indexing_loop(log, i, &loop_stack, prev_target)
                    {
                        if let Some(loop_stmt) = log[l].stmt {
                            builder.push_update_from(UpdatePlacement {
                                var,
                                pos: e.pos,
                                site: AnchorSite::BeforeLoop(loop_stmt),
                            });
                        }
                    } else if let Some(&c) = cond_stack.last() {
                        // Hoist out of the conditional so the copy
                        // happens irrespective of the branch taken.
                        if let Some(stmt) = log[c].stmt {
                            builder.push_update_from(UpdatePlacement {
                                var,
                                pos: log[c].pos,
                                site: AnchorSite::Stmt(stmt),
                            });
                        }
                    } else if let Some(stmt) = e.stmt {
                        builder.push_update_from(UpdatePlacement {
                            var,
                            pos: e.pos,
                            site: AnchorSite::Stmt(stmt),
                        });
                    }
                    valid_on_host = true;
                }
                if e.mode.writes() {
                    valid_on_device = false;
                    valid_on_host = true;
                }
                if let Some(frame) = loop_frames.last_mut()
                    && frame.first_host_access.is_none()
                {
                    frame.first_host_access = Some(i);
                }
                prev_host = Some(i);
                prev_host_loop_stack = loop_stack.clone();
            }
        }
    }

    // Callers must observe final device-side writes through non-const
    // pointer parameters and globals.
    if (is_global || is_param_ptr_to_nonconst) && !valid_on_host {
        map_from = true;
    }

    if map_to && map_from {
        builder.place_map(var, MapKind::ToFrom);
    } else if map_to {
        builder.place_map(var, MapKind::To);
    } else if map_from {
        builder.place_map(var, MapKind::From);
    } else if !is_arithmetic && device_wrote {
        builder.place_map(var, MapKind::Alloc);
    }
}
