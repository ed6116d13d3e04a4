//! Method inlining: substitute marked call sites with callee bodies.
//!
//! Inline targets are selected by an external convention (the loader marks
//! them on the [`crate::graph::Method`]). Every call site invoking a target,
//! in every retained body, is rewritten to contain the callee's logic
//! directly, and the target is removed from its type.
//!
//! # Algorithm
//!
//! 1. Widen the declaring type's declaration-private members to at least
//!    module-private (the substituted body runs inside other types) and
//!    detach each target from its type's method list.
//! 2. Resolve inlining *within* each target body before substituting it
//!    elsewhere. A resolved set avoids reprocessing; an in-progress stack
//!    rejects self- or mutually-recursive targets.
//! 3. At a call site, walk backward from the call tracking the cumulative
//!    stack-depth delta to partition the preceding instructions into exactly
//!    N contiguous argument evaluation windows, each netting one value.
//! 4. Per argument, choose materialize-into-local versus re-emit-at-each-use
//!    by cost (window length × use count against one store plus one load per
//!    use). Windows with side effects are only re-emitted when used exactly
//!    once and never past a later materialized window; duplicating, dropping
//!    or reordering a call or store would change behavior. A window that pops
//!    values produced outside itself reads the operand stack in place, so it
//!    pins itself and every earlier window at the call site as one spill
//!    group.
//! 5. Splice the callee: fresh local slots, parameter loads replaced by the
//!    chosen argument form, branch labels rebuilt through an identity map, a
//!    non-final `ret` turned into a jump past the call site, the final `ret`
//!    dropped.
//! 6. Redirect external branches that targeted the call or a re-emitted
//!    window to the first surviving instruction of the rewritten region.
//! 7. Verify labels and stack depths, recompute the maximum stack.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use tracing::debug;

use crate::{
    error::InlineRejection,
    graph::{
        Body, FieldAttributes, Instruction, MethodAttributes, MethodId, MethodRef,
        MethodSignature, Module, Opcode, Operand, TypeId, TypeRef,
    },
    passes::{LinkContext, ModulePass},
    verify::verify_and_finish_body,
    Error, Result,
};

/// Rewrites every call site of every inline-target method, then removes the
/// targets.
pub struct InlinePass;

impl Default for InlinePass {
    fn default() -> Self {
        Self::new()
    }
}

impl InlinePass {
    /// Creates the inlining pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for InlinePass {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn description(&self) -> &'static str {
        "Substitutes marked call sites with callee bodies and removes the callees"
    }

    fn run(&self, module: &mut Module, _ctx: &mut LinkContext) -> Result<bool> {
        let targets: Vec<MethodId> = module
            .attached_methods()
            .into_iter()
            .filter(|&m| module.method(m).inline_target)
            .collect();
        if targets.is_empty() {
            return Ok(false);
        }

        for &t in &targets {
            let declaring = module.method(t).declaring;
            widen_private_members(module, declaring);
            module.type_def_mut(declaring).methods.retain(|&m| m != t);
        }

        let mut inliner = Inliner {
            targets: targets.iter().copied().collect(),
            resolved: HashSet::new(),
            in_progress: Vec::new(),
        };
        for &t in &targets {
            inliner.resolve_target(module, t)?;
        }

        let mut rewritten = 0usize;
        for m in module.attached_methods() {
            if module.method(m).body.is_some() {
                rewritten += inliner.process_body(module, m)?;
                verify_and_finish_body(module, m, "inline")?;
            }
        }

        debug!(
            targets = targets.len(),
            sites = rewritten,
            "inlined call sites"
        );
        Ok(true)
    }
}

/// Private members of an inline target's declaring type become reachable
/// from arbitrary call sites, so they need at least module-wide access.
fn widen_private_members(module: &mut Module, ty: TypeId) {
    for f in module.type_def(ty).fields.clone() {
        let field = module.field_mut(f);
        if field.flags.is_private() {
            field.flags.set_access(FieldAttributes::ASSEMBLY);
        }
    }
    for m in module.type_def(ty).methods.clone() {
        let method = module.method_mut(m);
        if method.flags.is_private() {
            method.flags.set_access(MethodAttributes::ASSEMBLY);
        }
    }
}

/// How one argument flows into the spliced callee body.
enum ArgMode {
    /// Evaluate once at the call site, store into a fresh local, load at
    /// each parameter use.
    Materialize { local: u16 },
    /// Re-emit the evaluation window at each parameter use.
    Reemit { template: Vec<Instruction> },
}

struct Inliner {
    targets: HashSet<MethodId>,
    resolved: HashSet<MethodId>,
    in_progress: Vec<MethodId>,
}

impl Inliner {
    /// Resolves inlining within a target's own body so nested targets are
    /// expanded before the body is substituted anywhere else.
    fn resolve_target(&mut self, module: &mut Module, target: MethodId) -> Result<()> {
        if self.resolved.contains(&target) {
            return Ok(());
        }

        let Some(body) = module.method(target).body.as_ref() else {
            return Err(structural_error!(
                "inline target {target} has no body"
            ));
        };
        for instr in &body.instructions {
            if instr.opcode == Opcode::Starg {
                return Err(Error::UnsupportedInline {
                    method: target,
                    site: instr.id,
                    reason: InlineRejection::ParameterMutation,
                });
            }
        }

        self.in_progress.push(target);
        let result = self.process_body(module, target);
        self.in_progress.pop();
        result?;
        self.resolved.insert(target);
        Ok(())
    }

    /// Rewrites every target call site in one body. Returns the number of
    /// sites rewritten.
    fn process_body(&mut self, module: &mut Module, method: MethodId) -> Result<usize> {
        let mut rewritten = 0usize;
        loop {
            let site = match module.method(method).body.as_ref() {
                Some(body) => find_target_site(body, &self.targets),
                None => None,
            };
            let Some((call_idx, call_id, callee)) = site else {
                return Ok(rewritten);
            };

            if self.in_progress.contains(&callee) {
                return Err(Error::UnsupportedInline {
                    method,
                    site: call_id,
                    reason: InlineRejection::RecursiveTarget,
                });
            }
            self.resolve_target(module, callee)?;

            let callee_sig = module.method(callee).signature.clone();
            let callee_declaring = module.method(callee).declaring;
            let callee_body = module
                .method(callee)
                .body
                .clone()
                .ok_or_else(|| structural_error!("inline target {callee} has no body"))?;

            let mut body = module
                .method_mut(method)
                .body
                .take()
                .ok_or_else(|| structural_error!("body of {method} disappeared mid-pass"))?;
            let result = inline_site(
                module,
                &mut body,
                method,
                call_idx,
                &callee_sig,
                callee_declaring,
                &callee_body,
            );
            module.method_mut(method).body = Some(body);
            result?;
            rewritten += 1;
        }
    }
}

/// First call instruction that invokes an inline target.
fn find_target_site(
    body: &Body,
    targets: &HashSet<MethodId>,
) -> Option<(usize, crate::graph::InstrId, MethodId)> {
    body.instructions.iter().enumerate().find_map(|(idx, i)| {
        match (i.opcode, &i.operand) {
            (Opcode::Call, Operand::Method(MethodRef::Definition(m))) if targets.contains(m) => {
                Some((idx, i.id, *m))
            }
            _ => None,
        }
    })
}

/// Partitions the instructions before `call_idx` into `arg_count` contiguous
/// argument evaluation windows, front-of-list first.
fn partition_windows(
    module: &Module,
    body: &Body,
    caller: MethodId,
    call_idx: usize,
    arg_count: usize,
) -> Result<Vec<Range<usize>>> {
    let mut windows: Vec<Range<usize>> = Vec::with_capacity(arg_count);
    let mut end = call_idx;
    let mut depth: i32 = 0;
    let mut i = call_idx;

    while windows.len() < arg_count {
        if i == 0 {
            return Err(structural_error!(
                "cannot recover {arg_count} argument windows before {} in {caller}",
                body.instructions[call_idx].id
            ));
        }
        i -= 1;
        let instr = &body.instructions[i];
        if !instr.is_trivial_flow() {
            return Err(Error::UnsupportedInline {
                method: caller,
                site: instr.id,
                reason: InlineRejection::BranchInArgument,
            });
        }
        depth += instr.stack_delta(module);
        if depth == windows.len() as i32 + 1 {
            windows.push(i..end);
            end = i;
        }
    }

    windows.reverse();
    Ok(windows)
}

/// True when the window at some point pops a value it has not pushed, i.e.
/// it consumes operands that were produced outside the window.
fn pops_outside_values(module: &Module, slice: &[Instruction]) -> bool {
    let mut depth: i32 = 0;
    for instr in slice {
        depth -= instr.stack_pops(module) as i32;
        if depth < 0 {
            return true;
        }
        depth += instr.stack_pushes(module) as i32;
    }
    false
}

/// Rewrites one call site in place.
#[allow(clippy::too_many_lines)]
fn inline_site(
    module: &Module,
    body: &mut Body,
    caller: MethodId,
    call_idx: usize,
    callee_sig: &MethodSignature,
    callee_declaring: TypeId,
    callee_body: &Body,
) -> Result<()> {
    let call_id = body.instructions[call_idx].id;
    let arg_count = callee_sig.arg_count();
    let windows = partition_windows(module, body, caller, call_idx, arg_count)?;

    // The instruction after the call survives the splice and doubles as the
    // jump target for non-final returns.
    let end_id = body
        .instructions
        .get(call_idx + 1)
        .map(|i| i.id)
        .ok_or_else(|| structural_error!("call {call_id} is the last instruction of {caller}"))?;

    // Per-argument use counts and address-taking inside the callee.
    let mut uses = vec![0usize; arg_count];
    let mut addressed = vec![false; arg_count];
    for instr in &callee_body.instructions {
        if let Operand::Arg(a) = instr.operand {
            let a = a as usize;
            if a >= arg_count {
                return Err(structural_error!(
                    "argument index {a} out of range in inline target"
                ));
            }
            uses[a] += 1;
            if instr.opcode == Opcode::Ldarga {
                addressed[a] = true;
            }
        }
    }

    let mut arg_types: Vec<TypeRef> = Vec::with_capacity(arg_count);
    if callee_sig.instance {
        arg_types.push(TypeRef::Definition(callee_declaring));
    }
    arg_types.extend(callee_sig.params.iter().copied());

    let mut removed: Vec<crate::graph::InstrId> = vec![call_id];
    let slices: Vec<Vec<Instruction>> = windows
        .iter()
        .map(|w| body.instructions[w.clone()].to_vec())
        .collect();

    // A window that pops values produced outside itself (a `dup` of a
    // neighbouring argument) reads the operand stack in place. It and every
    // window before it must stay at the call site.
    let mut grouped = 0usize;
    for (a, slice) in slices.iter().enumerate() {
        if pops_outside_values(module, slice) {
            grouped = a + 1;
        }
    }

    let impure: Vec<bool> = slices
        .iter()
        .map(|s| s.iter().any(Instruction::has_side_effects))
        .collect();

    let mut materialize = vec![false; arg_count];
    for (a, slice) in slices.iter().enumerate() {
        if addressed[a] {
            if a < grouped || slice.len() != 1 || slice[0].opcode != Opcode::Ldloc {
                return Err(Error::UnsupportedInline {
                    method: caller,
                    site: call_id,
                    reason: InlineRejection::AddressOfNonLocal,
                });
            }
            continue;
        }
        if a < grouped {
            materialize[a] = true;
            continue;
        }
        let reemit_cost = slice.len() * uses[a];
        let materialize_cost = slice.len() + 1 + uses[a];
        materialize[a] = (impure[a] && uses[a] != 1) || materialize_cost < reemit_cost;
    }

    // Materialized windows evaluate at the call site; re-emitted ones run
    // later, at their parameter uses. An impure window before a materialized
    // one must materialize too, or its side effects would move after the
    // later window's.
    let mut later_materializes = false;
    for a in (0..arg_count).rev() {
        if later_materializes && impure[a] {
            materialize[a] = true;
        }
        later_materializes |= materialize[a];
    }

    let mut modes: Vec<ArgMode> = Vec::with_capacity(arg_count);
    let mut out: Vec<Instruction> = Vec::new();

    // The grouped prefix evaluates verbatim, then spills top of stack first.
    // Its instructions keep their identities, so branches into the windows
    // remain valid.
    let group_locals: Vec<u16> = arg_types[..grouped]
        .iter()
        .map(|&t| body.push_local(t))
        .collect();
    for slice in &slices[..grouped] {
        out.extend(slice.iter().cloned());
    }
    for &local in group_locals.iter().rev() {
        let store = body.make(Opcode::Stloc, Operand::Local(local));
        out.push(store);
    }
    for &local in &group_locals {
        modes.push(ArgMode::Materialize { local });
    }

    for (a, slice) in slices.iter().enumerate().skip(grouped) {
        if materialize[a] {
            // The window stays in place, followed by a store into a fresh
            // local. Its instructions keep their identities, so branches
            // into the window remain valid.
            let local = body.push_local(arg_types[a]);
            out.extend(slice.iter().cloned());
            let store = body.make(Opcode::Stloc, Operand::Local(local));
            out.push(store);
            modes.push(ArgMode::Materialize { local });
        } else {
            removed.extend(slice.iter().map(|i| i.id));
            modes.push(ArgMode::Reemit {
                template: slice.clone(),
            });
        }
    }

    // Splice the callee body. Locals move into fresh caller slots; branch
    // operands are rebuilt afterwards through the identity map.
    let local_base = body.locals.len() as u16;
    body.locals.extend(callee_body.locals.iter().copied());

    let mut id_map: HashMap<crate::graph::InstrId, crate::graph::InstrId> = HashMap::new();
    let mut fixup: Vec<usize> = Vec::new();
    let last_idx = callee_body.instructions.len().saturating_sub(1);

    for (cidx, cinstr) in callee_body.instructions.iter().enumerate() {
        let emitted_from = out.len();
        match (cinstr.opcode, cinstr.operand) {
            (Opcode::Ldarg | Opcode::Ldarga, Operand::Arg(a)) => {
                let a = a as usize;
                match &modes[a] {
                    ArgMode::Materialize { local } => {
                        let opcode = if cinstr.opcode == Opcode::Ldarga {
                            Opcode::Ldloca
                        } else {
                            Opcode::Ldloc
                        };
                        let instr = body.make(opcode, Operand::Local(*local));
                        out.push(instr);
                    }
                    ArgMode::Reemit { template } => {
                        if cinstr.opcode == Opcode::Ldarga {
                            // Checked above: the template is a bare local load.
                            let Operand::Local(l) = template[0].operand else {
                                return Err(structural_error!(
                                    "address-of argument window is not a local load"
                                ));
                            };
                            let instr = body.make(Opcode::Ldloca, Operand::Local(l));
                            out.push(instr);
                        } else {
                            for t in template.clone() {
                                let instr = body.make(t.opcode, t.operand);
                                out.push(instr);
                            }
                        }
                    }
                }
            }
            (Opcode::Ldloc | Opcode::Stloc | Opcode::Ldloca, Operand::Local(l)) => {
                let instr = body.make(cinstr.opcode, Operand::Local(l + local_base));
                out.push(instr);
            }
            (Opcode::Ret, _) => {
                if cidx == last_idx {
                    // The final return falls through to the code after the
                    // call site.
                    id_map.insert(cinstr.id, end_id);
                    continue;
                }
                let instr = body.make(Opcode::Br, Operand::Target(end_id));
                out.push(instr);
            }
            _ => {
                let instr = body.make(cinstr.opcode, cinstr.operand);
                if matches!(cinstr.operand, Operand::Target(_)) {
                    fixup.push(out.len());
                }
                out.push(instr);
            }
        }
        if out.len() > emitted_from {
            id_map.insert(cinstr.id, out[emitted_from].id);
        }
    }

    for idx in fixup {
        let Operand::Target(old) = out[idx].operand else {
            continue;
        };
        let new = id_map.get(&old).ok_or_else(|| Error::Verification {
            pass: "inline",
            detail: format!("unresolved callee label {old} while splicing into {caller}"),
        })?;
        out[idx].operand = Operand::Target(*new);
    }

    // External branches that targeted the call or a re-emitted window land on
    // the first surviving instruction of the region.
    let start_id = out.first().map_or(end_id, |i| i.id);
    let redirect: HashMap<_, _> = removed.into_iter().map(|id| (id, start_id)).collect();

    let region_start = windows.first().map_or(call_idx, |w| w.start);
    body.instructions.splice(region_start..=call_idx, out);
    body.redirect_targets(&redirect);

    Ok(())
}
