//! Static type merging: collapse side-effect-only types into one.
//!
//! A type with no instance fields and no instance methods exists only for its
//! static members; each such type costs a full metadata row set. This pass
//! moves all of their members into one synthesized type and coalesces their
//! static constructors.
//!
//! # Algorithm
//!
//! 1. Collect target classes with no instance state (interfaces, enums and
//!    value types are excluded; blob holders are value types and handled by
//!    the blob merger).
//! 2. If more than one exists, synthesize a merged type and move every field
//!    and method into it, forcing the static flag.
//! 3. If more than one static constructor was collected: demote each original
//!    to a plain static method with a synthetic name, mark it as an inline
//!    target, and synthesize a fresh static constructor that calls each
//!    original in declaration order and returns. Each original initializer
//!    still runs exactly once, in order.
//! 4. If the module's global type was merged, the merged type becomes the new
//!    global type and is inserted first.

use tracing::debug;

use crate::{
    graph::{
        Body, FieldAttributes, Method, MethodAttributes, MethodRef, MethodSignature, Module,
        Opcode, Operand, PrimType, TypeAttributes, TypeDef, TypeId, TypeRef,
    },
    passes::{LinkContext, ModulePass},
    Result,
};

/// Merges static-only types into one synthesized type.
pub struct MergeStaticsPass;

impl Default for MergeStaticsPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeStaticsPass {
    /// Creates the static-merge pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for MergeStaticsPass {
    fn name(&self) -> &'static str {
        "merge-statics"
    }

    fn description(&self) -> &'static str {
        "Merges side-effect-only static types, coalescing static constructors"
    }

    fn run(&self, module: &mut Module, _ctx: &mut LinkContext) -> Result<bool> {
        let candidates: Vec<TypeId> = module
            .type_list
            .iter()
            .copied()
            .filter(|&ty| is_static_only(module, ty))
            .collect();
        if candidates.len() < 2 {
            return Ok(false);
        }

        let merged_global = module
            .global_type
            .is_some_and(|g| candidates.contains(&g));

        let mut merged_def = TypeDef::new(
            None,
            "<Merged>",
            TypeAttributes::NOT_PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SEALED,
        );
        merged_def.base = Some(TypeRef::Primitive(PrimType::Object));
        let merged = module.add_type_detached(merged_def);

        // Move members, in candidate declaration order.
        let mut cctors = Vec::new();
        for &ty in &candidates {
            let fields = std::mem::take(&mut module.type_def_mut(ty).fields);
            let methods = std::mem::take(&mut module.type_def_mut(ty).methods);
            for f in fields {
                let field = module.field_mut(f);
                field.declaring = merged;
                field.flags.insert(FieldAttributes::STATIC);
                module.type_def_mut(merged).fields.push(f);
            }
            for m in methods {
                let method = module.method_mut(m);
                method.declaring = merged;
                method.flags.insert(MethodAttributes::STATIC);
                if method.is_static_constructor() {
                    cctors.push(m);
                }
                module.type_def_mut(merged).methods.push(m);
            }
            module.record_substitution(ty, merged);
        }

        if cctors.len() > 1 {
            for (i, &m) in cctors.iter().enumerate() {
                let method = module.method_mut(m);
                method.name = Some(format!("$init{i}"));
                method
                    .flags
                    .remove(MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME);
                method.inline_target = true;
            }

            let mut body = Body::new();
            for &m in &cctors {
                body.push(Opcode::Call, Operand::Method(MethodRef::Definition(m)));
            }
            body.push(Opcode::Ret, Operand::None);

            let mut cctor = Method::new(
                ".cctor",
                MethodAttributes::PRIVATE
                    | MethodAttributes::STATIC
                    | MethodAttributes::SPECIAL_NAME
                    | MethodAttributes::RT_SPECIAL_NAME,
                MethodSignature::stat(TypeRef::Primitive(PrimType::Void), vec![]),
            );
            cctor.body = Some(body);
            module.add_method(merged, cctor);
        }

        module.type_list.retain(|ty| !candidates.contains(ty));
        if merged_global {
            module.type_list.insert(0, merged);
            module.global_type = Some(merged);
        } else {
            module.type_list.push(merged);
        }

        debug!(
            merged = candidates.len(),
            cctors = cctors.len(),
            "merged static-only types"
        );
        Ok(true)
    }
}

/// A type qualifies when nothing about it is instance-bound: no instance
/// fields, no instance methods, not an interface, enum or value type, and not
/// generic.
fn is_static_only(module: &Module, ty: TypeId) -> bool {
    let def = module.type_def(ty);
    if def.is_interface() || def.is_enum() || def.is_value_type() || !def.generic_params.is_empty()
    {
        return false;
    }
    def.fields
        .iter()
        .all(|&f| module.field(f).is_static())
        && def.methods.iter().all(|&m| module.method(m).is_static())
}
