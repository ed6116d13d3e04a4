//! Post-pass structural verification.
//!
//! Every transformation pass that rewrites instruction streams finishes by
//! running its touched bodies through [`check_body`], which resolves branch
//! labels, simulates the operand stack and recomputes the maximum stack
//! depth. The driver additionally runs [`verify_module`] after the closure
//! and trim passes to assert that no retained body references a member that
//! was deleted.
//!
//! Failures here are defects in a pass, not in the input: [`check_body`]
//! reports [`crate::Error::Verification`] with the responsible pass name and
//! instruction context, and [`verify_module`] reports
//! [`crate::Error::Structural`].

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    graph::{Body, FieldRef, FlowType, MethodId, MethodRef, Module, Operand, TypeRef},
    Error, Result,
};

/// Resolves labels and simulates the operand stack of one body.
///
/// Checks, per the graph invariants:
/// - every branch target resolves to an instruction of this body;
/// - control cannot fall off the end of the instruction stream;
/// - the cumulative stack depth from entry is non-negative at every
///   instruction and consistent across merge points;
/// - at every `ret`, the depth is exactly one when the method returns a
///   value and exactly zero otherwise.
///
/// Returns the recomputed maximum stack depth.
///
/// # Errors
///
/// Returns [`Error::Verification`] naming `pass` when any check fails.
pub fn check_body(
    module: &Module,
    body: &Body,
    returns_value: bool,
    pass: &'static str,
) -> Result<u16> {
    let n = body.instructions.len();
    if n == 0 {
        return Err(Error::Verification {
            pass,
            detail: "body has no instructions".to_string(),
        });
    }

    let mut index_of = HashMap::with_capacity(n);
    for (idx, instr) in body.instructions.iter().enumerate() {
        index_of.insert(instr.id, idx);
    }

    // Resolve every label up front so a dangling target is reported even in
    // unreachable code.
    let mut targets = vec![None; n];
    for (idx, instr) in body.instructions.iter().enumerate() {
        if let Some(t) = instr.branch_target() {
            match index_of.get(&t) {
                Some(&tidx) => targets[idx] = Some(tidx),
                None => {
                    return Err(Error::Verification {
                        pass,
                        detail: format!("unresolved branch label {t} at {}", instr.id),
                    })
                }
            }
        }
    }

    let mut depths: Vec<Option<i32>> = vec![None; n];
    let mut max_depth: i32 = 0;
    let mut queue = VecDeque::new();
    depths[0] = Some(0);
    queue.push_back(0usize);

    while let Some(idx) = queue.pop_front() {
        let instr = &body.instructions[idx];
        let entry = depths[idx].unwrap_or(0);

        let pops = instr.stack_pops(module) as i32;
        let pushes = instr.stack_pushes(module) as i32;
        if entry - pops < 0 {
            return Err(Error::Verification {
                pass,
                detail: format!(
                    "stack underflow at {} ({}): depth {entry}, pops {pops}",
                    instr.id, instr.opcode
                ),
            });
        }
        let exit = entry - pops + pushes;
        max_depth = max_depth.max(entry).max(exit);

        let mut successors: [Option<usize>; 2] = [None, None];
        match instr.flow_type() {
            FlowType::Return => {
                let required = i32::from(returns_value);
                if entry != required {
                    return Err(Error::Verification {
                        pass,
                        detail: format!(
                            "residual stack depth {entry} at {} (expected {required})",
                            instr.id
                        ),
                    });
                }
            }
            FlowType::UnconditionalBranch => successors[0] = targets[idx],
            FlowType::ConditionalBranch => {
                successors[0] = targets[idx];
                successors[1] = Some(idx + 1);
            }
            FlowType::Sequential | FlowType::Call => successors[0] = Some(idx + 1),
        }

        for succ in successors.into_iter().flatten() {
            if succ >= n {
                return Err(Error::Verification {
                    pass,
                    detail: format!("control falls off the end after {}", instr.id),
                });
            }
            match depths[succ] {
                Some(existing) if existing != exit => {
                    return Err(Error::Verification {
                        pass,
                        detail: format!(
                            "inconsistent stack depth at {}: {existing} vs {exit}",
                            body.instructions[succ].id
                        ),
                    });
                }
                Some(_) => {}
                None => {
                    depths[succ] = Some(exit);
                    queue.push_back(succ);
                }
            }
        }
    }

    Ok(u16::try_from(max_depth).unwrap_or(u16::MAX))
}

/// Runs [`check_body`] on a method and stores the recomputed max stack.
///
/// # Errors
///
/// Propagates any [`Error::Verification`] from the body check.
pub fn verify_and_finish_body(
    module: &mut Module,
    method: MethodId,
    pass: &'static str,
) -> Result<()> {
    let returns_value = module.method(method).signature.returns_value();
    let max_stack = match module.method(method).body.as_ref() {
        Some(body) => check_body(module, body, returns_value, pass)?,
        None => return Ok(()),
    };
    if let Some(body) = module.method_mut(method).body.as_mut() {
        body.max_stack = max_stack;
    }
    Ok(())
}

/// Audits the whole graph after closure and trim: every definition reference
/// reachable from a retained body or signature must resolve to a retained
/// member.
///
/// # Errors
///
/// Returns [`Error::Structural`] on the first dangling reference found.
pub fn verify_module(module: &Module) -> Result<()> {
    let retained_types: HashSet<_> = module.type_list.iter().copied().collect();
    let mut retained_fields = HashSet::new();
    let mut retained_methods = HashSet::new();
    for &ty in &module.type_list {
        retained_fields.extend(module.type_def(ty).fields.iter().copied());
        retained_methods.extend(module.type_def(ty).methods.iter().copied());
    }

    let check_type = |tr: &TypeRef, ctx: &str| -> Result<()> {
        if let TypeRef::Definition(id) = tr {
            if !retained_types.contains(id) {
                return Err(structural_error!("dangling type reference {id} in {ctx}"));
            }
        }
        Ok(())
    };

    for &ty in &module.type_list {
        let def = module.type_def(ty);
        let ctx = def.full_name();
        if let Some(base) = &def.base {
            check_type(base, &ctx)?;
        }
        for iface in &def.interfaces {
            check_type(iface, &ctx)?;
        }
        for &f in &def.fields {
            check_type(&module.field(f).ty, &ctx)?;
        }
        for &m in &def.methods {
            let method = module.method(m);
            check_type(&method.signature.ret, &ctx)?;
            for p in &method.signature.params {
                check_type(p, &ctx)?;
            }
            let Some(body) = &method.body else { continue };
            for local in &body.locals {
                check_type(local, &ctx)?;
            }
            for instr in &body.instructions {
                match &instr.operand {
                    Operand::Field(FieldRef::Definition(f)) => {
                        if !retained_fields.contains(f) {
                            return Err(structural_error!(
                                "dangling field reference {f} at {} in {ctx}",
                                instr.id
                            ));
                        }
                    }
                    Operand::Method(MethodRef::Definition(m2)) => {
                        if !retained_methods.contains(m2) {
                            return Err(structural_error!(
                                "dangling method reference {m2} at {} in {ctx}",
                                instr.id
                            ));
                        }
                    }
                    Operand::Type(tr) => check_type(tr, &ctx)?,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{InstrId, Instruction, Opcode};

    fn body_of(instrs: Vec<(Opcode, Operand)>) -> Body {
        let mut body = Body::new();
        for (op, operand) in instrs {
            body.push(op, operand);
        }
        body
    }

    #[test]
    fn balanced_void_body_passes() {
        let module = Module::new("m");
        let body = body_of(vec![
            (Opcode::LdcI4, Operand::Int(1)),
            (Opcode::Pop, Operand::None),
            (Opcode::Ret, Operand::None),
        ]);
        assert_eq!(check_body(&module, &body, false, "test").unwrap(), 1);
    }

    #[test]
    fn residual_depth_at_void_ret_fails() {
        let module = Module::new("m");
        let body = body_of(vec![
            (Opcode::LdcI4, Operand::Int(1)),
            (Opcode::Ret, Operand::None),
        ]);
        let err = check_body(&module, &body, false, "test").unwrap_err();
        assert!(matches!(err, Error::Verification { pass: "test", .. }));
    }

    #[test]
    fn value_return_needs_depth_one() {
        let module = Module::new("m");
        let body = body_of(vec![
            (Opcode::LdcI4, Operand::Int(42)),
            (Opcode::Ret, Operand::None),
        ]);
        assert_eq!(check_body(&module, &body, true, "test").unwrap(), 1);
    }

    #[test]
    fn unresolved_label_fails() {
        let module = Module::new("m");
        let mut body = Body::new();
        body.push(Opcode::Br, Operand::Target(InstrId(999)));
        body.push(Opcode::Ret, Operand::None);
        assert!(check_body(&module, &body, false, "test").is_err());
    }

    #[test]
    fn underflow_fails() {
        let module = Module::new("m");
        let body = body_of(vec![
            (Opcode::Pop, Operand::None),
            (Opcode::Ret, Operand::None),
        ]);
        assert!(check_body(&module, &body, false, "test").is_err());
    }

    #[test]
    fn merge_point_depths_must_agree() {
        let module = Module::new("m");
        let mut body = Body::new();
        // cond ? (push 1) : () ; merge at ret with differing depths
        let _c = body.push(Opcode::LdcI4, Operand::Int(0));
        let ret = body.alloc_id();
        let skip = body.alloc_id();
        body.instructions.push(Instruction {
            id: skip,
            opcode: Opcode::BrTrue,
            operand: Operand::Target(ret),
        });
        body.push(Opcode::LdcI4, Operand::Int(7));
        body.instructions.push(Instruction {
            id: ret,
            opcode: Opcode::Ret,
            operand: Operand::None,
        });
        assert!(check_body(&module, &body, false, "test").is_err());
    }

    #[test]
    fn max_stack_recomputed() {
        let module = Module::new("m");
        let body = body_of(vec![
            (Opcode::LdcI4, Operand::Int(1)),
            (Opcode::LdcI4, Operand::Int(2)),
            (Opcode::LdcI4, Operand::Int(3)),
            (Opcode::Add, Operand::None),
            (Opcode::Add, Operand::None),
            (Opcode::Pop, Operand::None),
            (Opcode::Ret, Operand::None),
        ]);
        assert_eq!(check_body(&module, &body, false, "test").unwrap(), 3);
    }
}
