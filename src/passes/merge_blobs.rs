//! Array-init blob holder merging.
//!
//! Bulk array initialization loads a token for a static field whose declared
//! type is a fixed-layout, byte-packed value type that exists only to give
//! the constant data a size. Compilers emit one such holder type per distinct
//! blob size, each costing a full metadata row set. This pass collapses them:
//! one placeholder type sized to the largest holder replaces every narrower
//! one (reading fewer bytes than the placeholder's size is harmless; the
//! blob length is taken from the array, not the type).
//!
//! The pass only records a type-substitution mapping; the reachability
//! relinker applies it uniformly to every surviving reference, after which
//! the original holders are unreferenced and trimmed.

use tracing::debug;

use crate::{
    graph::{
        ClassLayout, Module, Operand, PrimType, TypeAttributes, TypeDef, TypeId, TypeRef,
    },
    passes::{LinkContext, ModulePass},
    Result,
};

/// Merges compatible constant-data holder types into one placeholder.
pub struct MergeBlobsPass;

impl Default for MergeBlobsPass {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeBlobsPass {
    /// Creates the blob-merge pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for MergeBlobsPass {
    fn name(&self) -> &'static str {
        "merge-blobs"
    }

    fn description(&self) -> &'static str {
        "Merges array-init blob holder types into one sized placeholder"
    }

    fn run(&self, module: &mut Module, _ctx: &mut LinkContext) -> Result<bool> {
        let candidates: Vec<TypeId> = module
            .type_list
            .iter()
            .copied()
            .filter(|&ty| is_blob_holder(module, ty))
            .collect();
        if candidates.len() < 2 {
            return Ok(false);
        }

        let max_size = candidates
            .iter()
            .filter_map(|&ty| module.type_def(ty).layout)
            .map(|l| l.size)
            .max()
            .unwrap_or(0);

        let base = module.ensure_ext_type("System", "ValueType", "corlib", false);
        let mut def = TypeDef::new(
            None,
            "<Blob>",
            TypeAttributes::NOT_PUBLIC
                | TypeAttributes::SEALED
                | TypeAttributes::EXPLICIT_LAYOUT
                | TypeAttributes::VALUE_TYPE_SEMANTICS,
        );
        def.base = Some(TypeRef::External(base));
        def.layout = Some(ClassLayout {
            packing: 1,
            size: max_size,
        });
        let placeholder = module.add_type(def);

        for &ty in &candidates {
            module.record_substitution(ty, placeholder);
        }

        debug!(
            holders = candidates.len(),
            size = max_size,
            "merged blob holder types"
        );
        Ok(true)
    }
}

/// A blob holder is a fixed-layout, memberless value type whose only uses in
/// the module are as the declared type of RVA-backed static fields.
fn is_blob_holder(module: &Module, ty: TypeId) -> bool {
    let def = module.type_def(ty);
    if !def.is_value_type()
        || def.layout.is_none()
        || !def.fields.is_empty()
        || !def.methods.is_empty()
        || !def.generic_params.is_empty()
    {
        return false;
    }

    let this = TypeRef::Definition(ty);
    for &other in &module.type_list {
        let odef = module.type_def(other);
        if odef.base == Some(this) || odef.interfaces.contains(&this) {
            return false;
        }
        for &f in &odef.fields {
            let field = module.field(f);
            if field.ty == this && (!field.is_static() || field.rva_data.is_none()) {
                return false;
            }
        }
        for &m in &odef.methods {
            let method = module.method(m);
            if method.signature.ret == this || method.signature.params.contains(&this) {
                return false;
            }
            let Some(body) = &method.body else { continue };
            if body.locals.contains(&this) {
                return false;
            }
            // ldtoken on a holder field is the idiom itself; any other
            // type-operand use disqualifies.
            for instr in &body.instructions {
                if instr.operand == Operand::Type(this) {
                    return false;
                }
            }
        }
    }
    true
}
