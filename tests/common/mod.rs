//! Shared builders and a reference evaluator for integration tests.
//!
//! The evaluator interprets the integer subset of the instruction model
//! directly over the module graph, so tests can compare observable behavior
//! before and after a build instead of inspecting instruction sequences.

use std::collections::HashMap;

use cilshrink::prelude::*;

/// Builds a module with one donor string so the renamer always has supply.
pub fn module() -> Module {
    let mut module = Module::new("app");
    module.donor_strings = vec!["Console".to_string(), "Object".to_string()];
    module
}

pub fn class(module: &mut Module, name: &str) -> TypeId {
    module.add_type(TypeDef::new(None, name, TypeAttributes::PUBLIC))
}

/// Adds a static `int32(int32...)` method with the given instruction stream.
pub fn int_method(
    module: &mut Module,
    ty: TypeId,
    name: &str,
    params: usize,
    build: impl FnOnce(&mut Body),
) -> MethodId {
    let mut method = Method::new(
        name,
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        MethodSignature::stat(
            TypeRef::Primitive(PrimType::I4),
            vec![TypeRef::Primitive(PrimType::I4); params],
        ),
    );
    let mut body = Body::new();
    build(&mut body);
    method.body = Some(body);
    module.add_method(ty, method)
}

/// Interprets a static method over integer arguments.
///
/// Supports the arithmetic, comparison, constant, local, argument, static
/// field, branch and call instructions; anything else panics, which keeps
/// the tests honest about what they exercise.
pub struct Eval<'m> {
    module: &'m Module,
    statics: HashMap<FieldId, i64>,
}

impl<'m> Eval<'m> {
    pub fn new(module: &'m Module) -> Self {
        Eval {
            module,
            statics: HashMap::new(),
        }
    }

    pub fn set_static(&mut self, field: FieldId, value: i64) {
        self.statics.insert(field, value);
    }

    pub fn call(&mut self, method: MethodId, args: &[i64]) -> i64 {
        let method = self.module.method(method);
        let body = method.body.as_ref().expect("evaluated method has no body");
        let mut stack: Vec<i64> = Vec::new();
        let mut locals = vec![0i64; body.locals.len()];
        let mut pc = 0usize;

        loop {
            let instr = &body.instructions[pc];
            pc += 1;
            match (instr.opcode, instr.operand) {
                (Opcode::Nop, _) => {}
                (Opcode::LdcI4, Operand::Int(v)) | (Opcode::LdcI8, Operand::Int(v)) => {
                    stack.push(v);
                }
                (Opcode::Ldarg, Operand::Arg(i)) => stack.push(args[i as usize]),
                (Opcode::Ldloc, Operand::Local(i)) => stack.push(locals[i as usize]),
                (Opcode::Stloc, Operand::Local(i)) => {
                    locals[i as usize] = stack.pop().expect("stloc on empty stack");
                }
                (Opcode::Ldsfld, Operand::Field(FieldRef::Definition(f))) => {
                    stack.push(*self.statics.get(&f).unwrap_or(&0));
                }
                (Opcode::Stsfld, Operand::Field(FieldRef::Definition(f))) => {
                    let v = stack.pop().expect("stsfld on empty stack");
                    self.statics.insert(f, v);
                }
                (Opcode::Dup, _) => {
                    let v = *stack.last().expect("dup on empty stack");
                    stack.push(v);
                }
                (Opcode::Pop, _) => {
                    stack.pop();
                }
                (Opcode::Neg, _) => {
                    let v = stack.pop().unwrap();
                    stack.push(v.wrapping_neg());
                }
                (Opcode::Not, _) => {
                    let v = stack.pop().unwrap();
                    stack.push(!v);
                }
                (Opcode::Conv, Operand::Type(TypeRef::Primitive(p))) => {
                    let v = stack.pop().unwrap();
                    stack.push(truncate(v, p));
                }
                (
                    Opcode::Add
                    | Opcode::Sub
                    | Opcode::Mul
                    | Opcode::Div
                    | Opcode::Rem
                    | Opcode::And
                    | Opcode::Or
                    | Opcode::Xor
                    | Opcode::Shl
                    | Opcode::Shr
                    | Opcode::Ceq
                    | Opcode::Cgt
                    | Opcode::Clt,
                    _,
                ) => {
                    let b = stack.pop().unwrap();
                    let a = stack.pop().unwrap();
                    stack.push(binary(instr.opcode, a, b));
                }
                (Opcode::Br, Operand::Target(t)) => {
                    pc = body.index_of(t).expect("dangling branch target");
                }
                (Opcode::BrTrue, Operand::Target(t)) => {
                    if stack.pop().unwrap() != 0 {
                        pc = body.index_of(t).expect("dangling branch target");
                    }
                }
                (Opcode::BrFalse, Operand::Target(t)) => {
                    if stack.pop().unwrap() == 0 {
                        pc = body.index_of(t).expect("dangling branch target");
                    }
                }
                (Opcode::Call, Operand::Method(MethodRef::Definition(callee))) => {
                    let sig = self.module.method(callee).signature.clone();
                    let argc = sig.params.len();
                    let split = stack.len() - argc;
                    let call_args: Vec<i64> = stack.split_off(split);
                    let result = self.call(callee, &call_args);
                    if sig.returns_value() {
                        stack.push(result);
                    }
                }
                (Opcode::Ret, _) => {
                    return if method.signature.returns_value() {
                        stack.pop().expect("ret on empty stack")
                    } else {
                        0
                    };
                }
                (opcode, operand) => {
                    panic!("evaluator does not model {opcode} {operand:?}")
                }
            }
        }
    }
}

fn binary(opcode: Opcode, a: i64, b: i64) -> i64 {
    match opcode {
        Opcode::Add => a.wrapping_add(b),
        Opcode::Sub => a.wrapping_sub(b),
        Opcode::Mul => a.wrapping_mul(b),
        Opcode::Div => a.wrapping_div(b),
        Opcode::Rem => a.wrapping_rem(b),
        Opcode::And => a & b,
        Opcode::Or => a | b,
        Opcode::Xor => a ^ b,
        Opcode::Shl => a.wrapping_shl(b as u32),
        Opcode::Shr => a.wrapping_shr(b as u32),
        Opcode::Ceq => i64::from(a == b),
        Opcode::Cgt => i64::from(a > b),
        Opcode::Clt => i64::from(a < b),
        _ => unreachable!(),
    }
}

fn truncate(v: i64, p: PrimType) -> i64 {
    match p {
        PrimType::I1 => v as i8 as i64,
        PrimType::U1 => v as u8 as i64,
        PrimType::I2 => v as i16 as i64,
        PrimType::U2 => v as u16 as i64,
        PrimType::I4 => v as i32 as i64,
        PrimType::U4 => v as u32 as i64,
        _ => v,
    }
}
