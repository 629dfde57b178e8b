//! Interprocedural propagation: refine every call site with the
//! effects the callee imposes on its pointer parameters and on the
//! globals it touches, until nothing changes.


use tracing::{debug, warn};

use crate::access::AccessMode;
use crate::ast::{TranslationUnit, VarId};
use crate::summary::FunctionSummary;

/// Caller-facing view of one function, frozen for a propagation round.
#[derive(Debug, Clone)]
pub struct CalleeSnapshot {
    pub name: String,
    pub params: Vec<VarId>,
    pub param_modes: Vec<(AccessMode, bool)>,
    pub globals: Vec<VarId>,
    pub global_modes: Vec<(AccessMode, bool)>,
}

/// Take the caller-facing summary of `fs`. With `cross_function` the
/// offload mark survives for data accessed only inside kernels, and
/// such declarations are disabled on the callee (the caller will own
/// the mapping).
pub fn snapshot(tu: &TranslationUnit, fs: &mut FunctionSummary, cross_function: bool) -> CalleeSnapshot {
    let param_modes = fs.param_access_modes(tu, cross_function);
    let global_modes = fs.global_access_modes(cross_function);
    CalleeSnapshot {
        name: fs.name.clone(),
        params: fs.params.clone(),
        param_modes,
        globals: fs.globals.iter().copied().collect(),
        global_modes,
    }
}

/// Rewrite every call from `caller` into the snapshotted callee.
/// Returns the number of log entries changed.
pub fn apply_callee_effects(tu: &TranslationUnit, caller: &mut FunctionSummary, callee: &CalleeSnapshot) -> usize {
    let calls: Vec<_> = caller
        .calls
        .iter()
        .filter(|c| c.callee == callee.name)
        .cloned()
        .collect();
    if calls.is_empty() {
        return 0;
    }
    debug!(target: "ompmap::interproc", caller = %caller.name, callee = %callee.name, sites = calls.len(), "propagating callee effects");

    let mut updates = 0;

    // Globals the callee touches become accesses at the call position.
    if callee.globals.len() != callee.global_modes.len() {
        warn!(
            target: "ompmap::interproc",
            "inconsistent summary for callee {}: {} globals vs {} modes; skipping",
            callee.name,
            callee.globals.len(),
            callee.global_modes.len()
        );
    } else {
        for (&global, &(mode, offload)) in callee.globals.iter().zip(&callee.global_modes) {
            for call in &calls {
                updates += caller.record_access(tu, global, call.pos, Some(call.stmt), mode, offload, true);
            }
            if !caller.locals.contains(&global) {
                caller.globals.insert(global);
            }
        }
    }

    // Arguments passed by pointer/reference take the callee's
    // parameter mode.
    if callee.params.len() != callee.param_modes.len() {
        warn!(
            target: "ompmap::interproc",
            "inconsistent summary for callee {}: {} parameters vs {} modes; skipping",
            callee.name,
            callee.params.len(),
            callee.param_modes.len()
        );
        return updates;
    }
    for call in &calls {
        for (i, (&param, &(mode, offload))) in callee.params.iter().zip(&callee.param_modes).enumerate() {
            if !tu.decl(param).pointer {
                continue;
            }
            let Some(arg) = call.args.get(i) else {
                warn!(
                    target: "ompmap::interproc",
                    "call to {} from {} passes {} arguments for {} parameters; skipping",
                    callee.name,
                    caller.name,
                    call.args.len(),
                    callee.params.len()
                );
                break;
            };
            let Some(var) = arg.var else {
                // Literal or computed expression; nothing to refine.
                continue;
            };
            updates += caller.record_access(tu, var, arg.pos, Some(call.stmt), mode, offload, true);
        }
    }
    updates
}

/// Run the propagation fixpoint. Each round snapshots a callee before
/// rewriting any caller, so a round observes only the previous round's
/// outputs. Recursive call graphs cannot converge; after `max_rounds`
/// the residue stays `Unknown` and a warning is emitted.
pub fn propagate(tu: &TranslationUnit, summaries: &mut [FunctionSummary], max_rounds: usize) -> usize {
    let mut total = 0;
    for round in 0..max_rounds {
        let mut updates = 0;
        for i in 0..summaries.len() {
            let snap = snapshot(tu, &mut summaries[i], false);
            for j in 0..summaries.len() {
                updates += apply_callee_effects(tu, &mut summaries[j], &snap);
            }
        }
        debug!(target: "ompmap::interproc", round, updates, "propagation round finished");
        total += updates;
        if updates == 0 {
            return total;
        }
    }
    warn!(
        target: "ompmap::interproc",
        "call-effect propagation did not converge after {max_rounds} rounds; remaining call effects stay unknown"
    );
    total
}

/// Aggressive cross-function policy: snapshot every function with the
/// offload mark preserved, then rewrite all call sites. Parameters and
/// globals that are only touched on the device inside the callee are
/// left for callers to map.
pub fn aggressive_cross_function(tu: &TranslationUnit, summaries: &mut [FunctionSummary]) {
    let mut snapshots = Vec::with_capacity(summaries.len());
    for fs in summaries.iter_mut() {
        snapshots.push(snapshot(tu, fs, true));
    }
    for fs in summaries.iter_mut() {
        for snap in &snapshots {
            apply_callee_effects(tu, fs, snap);
        }
    }
}
