//! Method bodies: local variable slots and instruction streams.

use crate::graph::{InstrId, Instruction, Opcode, Operand, TypeRef};

/// The body of a method: ordered local slots and an ordered instruction
/// stream.
///
/// Instructions are addressed by identity ([`InstrId`]), allocated from a
/// per-body counter. The identity space survives splicing, deletion and
/// reordering; positional indexes are only ever computed transiently.
#[derive(Debug, Clone)]
pub struct Body {
    /// Declared types of the local variable slots.
    pub locals: Vec<TypeRef>,
    /// The instruction stream.
    pub instructions: Vec<Instruction>,
    /// Whether locals are zero-initialized on entry.
    pub init_locals: bool,
    /// Maximum operand stack depth; recomputed by verification.
    pub max_stack: u16,
    next_id: u32,
}

impl Default for Body {
    fn default() -> Self {
        Self::new()
    }
}

impl Body {
    /// Creates an empty body.
    #[must_use]
    pub fn new() -> Self {
        Body {
            locals: Vec::new(),
            instructions: Vec::new(),
            init_locals: true,
            max_stack: 0,
            next_id: 0,
        }
    }

    /// Allocates a fresh instruction identity, unique within this body.
    pub fn alloc_id(&mut self) -> InstrId {
        let id = InstrId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Builds an instruction with a fresh identity without appending it.
    pub fn make(&mut self, opcode: Opcode, operand: Operand) -> Instruction {
        Instruction {
            id: self.alloc_id(),
            opcode,
            operand,
        }
    }

    /// Appends an instruction, returning its identity.
    pub fn push(&mut self, opcode: Opcode, operand: Operand) -> InstrId {
        let instr = self.make(opcode, operand);
        let id = instr.id;
        self.instructions.push(instr);
        id
    }

    /// Appends a new local slot, returning its index.
    pub fn push_local(&mut self, ty: TypeRef) -> u16 {
        // Local slot indexes are u16 on the wire; a body that overflows this
        // was never loadable in the first place.
        let idx = u16::try_from(self.locals.len()).unwrap_or(u16::MAX);
        self.locals.push(ty);
        idx
    }

    /// Positional index of the instruction with the given identity.
    #[must_use]
    pub fn index_of(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|i| i.id == id)
    }

    /// The instruction with the given identity.
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.id == id)
    }

    /// Retargets every branch whose target appears in `map` keys.
    ///
    /// Used when instructions are removed or replaced: branches to a dead
    /// identity are redirected to its surviving replacement.
    pub fn redirect_targets(&mut self, map: &std::collections::HashMap<InstrId, InstrId>) {
        for instr in &mut self.instructions {
            if let Operand::Target(t) = instr.operand {
                if let Some(new) = map.get(&t) {
                    instr.operand = Operand::Target(*new);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PrimType;
    use std::collections::HashMap;

    #[test]
    fn identities_are_unique_and_stable() {
        let mut body = Body::new();
        let a = body.push(Opcode::Nop, Operand::None);
        let b = body.push(Opcode::Ret, Operand::None);
        assert_ne!(a, b);
        assert_eq!(body.index_of(a), Some(0));

        body.instructions.remove(0);
        assert_eq!(body.index_of(a), None);
        assert_eq!(body.index_of(b), Some(0));

        // A fresh id never collides with a deleted one.
        let c = body.alloc_id();
        assert_ne!(c, a);
    }

    #[test]
    fn redirect_rewrites_branches() {
        let mut body = Body::new();
        let target = body.push(Opcode::Nop, Operand::None);
        body.push(Opcode::Br, Operand::Target(target));
        let replacement = body.push(Opcode::Ret, Operand::None);

        let mut map = HashMap::new();
        map.insert(target, replacement);
        body.redirect_targets(&map);

        assert_eq!(body.instructions[1].branch_target(), Some(replacement));
    }

    #[test]
    fn local_slots() {
        let mut body = Body::new();
        assert_eq!(body.push_local(TypeRef::Primitive(PrimType::I4)), 0);
        assert_eq!(body.push_local(TypeRef::Primitive(PrimType::I8)), 1);
    }
}
