//! The stack-machine instruction model.
//!
//! An [`Instruction`] is an identity handle plus an [`Opcode`] category and an
//! [`Operand`]. The opcode set is the minimal surface the linker transforms:
//! constant/local/argument/field loads and stores, calls and allocations,
//! branches, returns, stack shuffling, arithmetic/comparison and numeric
//! conversion, and the token load that feeds bulk array initialization.
//!
//! Two derived views drive the analyses:
//! - [`FlowType`] classifies how an instruction leaves control flow, which the
//!   inliner uses to police argument evaluation windows (only fallthrough and
//!   calls are trivial).
//! - [`Instruction::stack_delta`] gives the net operand-stack effect, which
//!   both the argument-window partitioning and post-pass verification are
//!   built on.

use crate::graph::{FieldRef, InstrId, MethodRef, Module, PrimType, TypeRef};

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction.
    Sequential,
    /// Calls out and then falls through.
    Call,
    /// Branches when the popped condition matches.
    ConditionalBranch,
    /// Always branches.
    UnconditionalBranch,
    /// Leaves the method.
    Return,
}

/// Opcode categories understood by the linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[allow(missing_docs)]
pub enum Opcode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "ldnull")]
    LdNull,
    #[strum(serialize = "ldloc")]
    Ldloc,
    #[strum(serialize = "ldloca")]
    Ldloca,
    #[strum(serialize = "stloc")]
    Stloc,
    #[strum(serialize = "ldarg")]
    Ldarg,
    #[strum(serialize = "ldarga")]
    Ldarga,
    #[strum(serialize = "starg")]
    Starg,
    #[strum(serialize = "ldfld")]
    Ldfld,
    #[strum(serialize = "stfld")]
    Stfld,
    #[strum(serialize = "ldsfld")]
    Ldsfld,
    #[strum(serialize = "ldsflda")]
    Ldsflda,
    #[strum(serialize = "stsfld")]
    Stsfld,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "newobj")]
    NewObj,
    #[strum(serialize = "newarr")]
    NewArr,
    #[strum(serialize = "ldtoken")]
    LdToken,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brtrue")]
    BrTrue,
    #[strum(serialize = "brfalse")]
    BrFalse,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "xor")]
    Xor,
    #[strum(serialize = "shl")]
    Shl,
    #[strum(serialize = "shr")]
    Shr,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "clt")]
    Clt,
    #[strum(serialize = "conv")]
    Conv,
}

/// Instruction operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// No operand.
    None,
    /// Integer literal (`ldc.i4`, `ldc.i8`).
    Int(i64),
    /// Floating-point literal (`ldc.r8`).
    Float(f64),
    /// Local variable slot index.
    Local(u16),
    /// Argument index (`this` is index 0 for instance methods).
    Arg(u16),
    /// Field reference.
    Field(FieldRef),
    /// Method reference.
    Method(MethodRef),
    /// Type reference (`newarr` element type, `conv` target width).
    Type(TypeRef),
    /// Branch target, by instruction identity.
    Target(InstrId),
}

/// One decoded instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Stable identity within the owning body.
    pub id: InstrId,
    /// Opcode category.
    pub opcode: Opcode,
    /// Operand value.
    pub operand: Operand,
}

impl Instruction {
    /// Control-flow classification of this instruction.
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        match self.opcode {
            Opcode::Br => FlowType::UnconditionalBranch,
            Opcode::BrTrue | Opcode::BrFalse => FlowType::ConditionalBranch,
            Opcode::Ret => FlowType::Return,
            Opcode::Call | Opcode::NewObj => FlowType::Call,
            _ => FlowType::Sequential,
        }
    }

    /// True when control can only fall through (or return from a call) to the
    /// next instruction. The inliner admits exactly these inside argument
    /// evaluation windows.
    #[must_use]
    pub fn is_trivial_flow(&self) -> bool {
        matches!(self.flow_type(), FlowType::Sequential | FlowType::Call)
    }

    /// Branch target of this instruction, if it has one.
    #[must_use]
    pub fn branch_target(&self) -> Option<InstrId> {
        match self.operand {
            Operand::Target(id) => Some(id),
            _ => None,
        }
    }

    /// Number of values this instruction pops from the operand stack.
    ///
    /// `ret` reports zero pops; whether a return consumes a value depends on
    /// the enclosing signature and is handled by the verifier.
    #[must_use]
    pub fn stack_pops(&self, module: &Module) -> u32 {
        match self.opcode {
            Opcode::Nop
            | Opcode::LdcI4
            | Opcode::LdcI8
            | Opcode::LdcR8
            | Opcode::LdNull
            | Opcode::Ldloc
            | Opcode::Ldloca
            | Opcode::Ldarg
            | Opcode::Ldarga
            | Opcode::Ldsfld
            | Opcode::Ldsflda
            | Opcode::LdToken
            | Opcode::Br
            | Opcode::Ret => 0,
            Opcode::Dup
            | Opcode::Stloc
            | Opcode::Starg
            | Opcode::Stsfld
            | Opcode::BrTrue
            | Opcode::BrFalse
            | Opcode::Pop
            | Opcode::Neg
            | Opcode::Not
            | Opcode::Conv
            | Opcode::Ldfld
            | Opcode::NewArr => 1,
            Opcode::Stfld
            | Opcode::Add
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
            | Opcode::Clt => 2,
            Opcode::Call => match self.operand {
                Operand::Method(m) => {
                    let sig = module.method_signature(m);
                    sig.arg_count() as u32
                }
                _ => 0,
            },
            Opcode::NewObj => match self.operand {
                Operand::Method(m) => module.method_signature(m).params.len() as u32,
                _ => 0,
            },
        }
    }

    /// Number of values this instruction pushes onto the operand stack.
    #[must_use]
    pub fn stack_pushes(&self, module: &Module) -> u32 {
        match self.opcode {
            Opcode::Nop
            | Opcode::Stloc
            | Opcode::Starg
            | Opcode::Stfld
            | Opcode::Stsfld
            | Opcode::Br
            | Opcode::BrTrue
            | Opcode::BrFalse
            | Opcode::Ret
            | Opcode::Pop => 0,
            Opcode::LdcI4
            | Opcode::LdcI8
            | Opcode::LdcR8
            | Opcode::LdNull
            | Opcode::Ldloc
            | Opcode::Ldloca
            | Opcode::Ldarg
            | Opcode::Ldarga
            | Opcode::Ldfld
            | Opcode::Ldsfld
            | Opcode::Ldsflda
            | Opcode::LdToken
            | Opcode::NewObj
            | Opcode::NewArr
            | Opcode::Neg
            | Opcode::Not
            | Opcode::Conv
            | Opcode::Add
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
            | Opcode::Clt => 1,
            Opcode::Dup => 2,
            Opcode::Call => match self.operand {
                Operand::Method(m) => u32::from(module.method_signature(m).returns_value()),
                _ => 0,
            },
        }
    }

    /// Net operand-stack effect of this instruction.
    #[must_use]
    pub fn stack_delta(&self, module: &Module) -> i32 {
        self.stack_pushes(module) as i32 - self.stack_pops(module) as i32
    }

    /// True when this instruction can observably read or write shared state
    /// (calls, allocations, field stores). Argument windows containing such
    /// instructions must not be duplicated or dropped.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Call | Opcode::NewObj | Opcode::NewArr | Opcode::Stfld | Opcode::Stsfld
        )
    }

    /// Conversion target width for `conv` instructions.
    #[must_use]
    pub fn conv_target(&self) -> Option<PrimType> {
        match (self.opcode, self.operand) {
            (Opcode::Conv, Operand::Type(TypeRef::Primitive(p))) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Module;

    fn instr(opcode: Opcode, operand: Operand) -> Instruction {
        Instruction {
            id: InstrId(0),
            opcode,
            operand,
        }
    }

    #[test]
    fn flow_classification() {
        assert_eq!(
            instr(Opcode::Br, Operand::Target(InstrId(1))).flow_type(),
            FlowType::UnconditionalBranch
        );
        assert!(instr(Opcode::Add, Operand::None).is_trivial_flow());
        assert!(instr(Opcode::Call, Operand::None).is_trivial_flow());
        assert!(!instr(Opcode::BrTrue, Operand::Target(InstrId(1))).is_trivial_flow());
    }

    #[test]
    fn arithmetic_deltas() {
        let module = Module::new("m");
        assert_eq!(instr(Opcode::Add, Operand::None).stack_delta(&module), -1);
        assert_eq!(instr(Opcode::Dup, Operand::None).stack_delta(&module), 1);
        assert_eq!(
            instr(Opcode::LdcI4, Operand::Int(7)).stack_delta(&module),
            1
        );
        assert_eq!(instr(Opcode::Stloc, Operand::Local(0)).stack_delta(&module), -1);
    }
}
