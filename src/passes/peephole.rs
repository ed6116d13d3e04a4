//! Local instruction simplification.
//!
//! Three rewrites, all size-motivated and all local:
//!
//! - a numeric conversion immediately following a conversion to the same
//!   width is redundant and dropped;
//! - the `ldarg.0` + `call` pair invoking a base constructor that does
//!   nothing is dropped;
//! - `nop` instructions are dropped.
//!
//! Branches that targeted a dropped instruction are redirected to the next
//! surviving one. Every rewritten body is re-verified.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    graph::{Body, InstrId, MethodRef, Module, Opcode, Operand},
    passes::{LinkContext, ModulePass},
    verify::verify_and_finish_body,
    Result,
};

/// Drops redundant conversions, empty base-constructor calls and `nop`s.
pub struct PeepholePass;

impl Default for PeepholePass {
    fn default() -> Self {
        Self::new()
    }
}

impl PeepholePass {
    /// Creates the peephole pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for PeepholePass {
    fn name(&self) -> &'static str {
        "peephole"
    }

    fn description(&self) -> &'static str {
        "Drops redundant conversions, empty base-constructor calls and nops"
    }

    fn run(&self, module: &mut Module, _ctx: &mut LinkContext) -> Result<bool> {
        let mut dropped = 0usize;
        for m in module.attached_methods() {
            let Some(mut body) = module.method_mut(m).body.take() else {
                continue;
            };
            let n = simplify(module, &mut body);
            module.method_mut(m).body = Some(body);
            if n > 0 {
                dropped += n;
                verify_and_finish_body(module, m, "peephole")?;
            }
        }
        debug!(dropped, "peephole simplification");
        Ok(dropped > 0)
    }
}

/// Simplifies one body in place. Returns the number of instructions dropped.
fn simplify(module: &Module, body: &mut Body) -> usize {
    let n = body.instructions.len();
    let mut remove = vec![false; n];

    let mut last_kept_conv: Option<(usize, crate::graph::PrimType)> = None;
    for i in 0..n {
        let instr = &body.instructions[i];

        if instr.opcode == Opcode::Nop {
            remove[i] = true;
            continue;
        }

        // Adjacent conversions to the same width: the later one is a no-op.
        if let Some(width) = instr.conv_target() {
            if let Some((j, w)) = last_kept_conv {
                if j + 1 == i && w == width {
                    remove[i] = true;
                    // The dropped conversion still counts as adjacent for a
                    // chain of three or more.
                    last_kept_conv = Some((i, width));
                    continue;
                }
            }
            last_kept_conv = Some((i, width));
        } else {
            last_kept_conv = None;
        }

        // ldarg.0 + call of a base constructor that does nothing.
        if i + 1 < n
            && instr.opcode == Opcode::Ldarg
            && instr.operand == Operand::Arg(0)
            && is_empty_ctor_call(module, &body.instructions[i + 1])
        {
            remove[i] = true;
            remove[i + 1] = true;
        }
    }

    if !remove.iter().any(|&r| r) {
        return 0;
    }

    // Branches into dropped instructions land on the next survivor. A `ret`
    // is never dropped, so a survivor always follows.
    let mut redirect: HashMap<InstrId, InstrId> = HashMap::new();
    let mut next_kept: Option<InstrId> = None;
    for i in (0..n).rev() {
        if remove[i] {
            if let Some(to) = next_kept {
                redirect.insert(body.instructions[i].id, to);
            }
        } else {
            next_kept = Some(body.instructions[i].id);
        }
    }

    let mut i = 0;
    body.instructions.retain(|_| {
        let keep = !remove[i];
        i += 1;
        keep
    });
    body.redirect_targets(&redirect);
    remove.iter().filter(|&&r| r).count()
}

/// True for a call to an owned no-argument instance constructor whose body
/// has no effect: a bare `ret`, or the compiler's `ldarg.0` + external base
/// constructor call + `ret`.
fn is_empty_ctor_call(module: &Module, instr: &crate::graph::Instruction) -> bool {
    let (Opcode::Call, Operand::Method(MethodRef::Definition(callee))) =
        (instr.opcode, instr.operand)
    else {
        return false;
    };
    let method = module.method(callee);
    if method.name.as_deref() != Some(".ctor")
        || !method.signature.instance
        || !method.signature.params.is_empty()
    {
        return false;
    }
    let Some(body) = &method.body else {
        return false;
    };
    match body.instructions.as_slice() {
        [only] => only.opcode == Opcode::Ret,
        [load, call, ret] => {
            load.opcode == Opcode::Ldarg
                && load.operand == Operand::Arg(0)
                && matches!(
                    (call.opcode, call.operand),
                    (Opcode::Call, Operand::Method(MethodRef::External(_)))
                )
                && ret.opcode == Opcode::Ret
        }
        _ => false,
    }
}
