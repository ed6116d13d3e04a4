//! Type flattening: promote nested types to the top level.
//!
//! Later passes assume a flat type list, so this runs first. Each lifted
//! type's visibility is adjusted: a declaration-private nested type becomes
//! module-private, every other nested type inherits its former enclosing
//! type's public/non-public visibility.

use tracing::debug;

use crate::{
    graph::{Module, TypeAttributes, TypeId},
    passes::{LinkContext, ModulePass},
    Result,
};

/// Promotes nested types to top level, adjusting visibility. Idempotent.
pub struct FlattenPass;

impl Default for FlattenPass {
    fn default() -> Self {
        Self::new()
    }
}

impl FlattenPass {
    /// Creates the flattening pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for FlattenPass {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn description(&self) -> &'static str {
        "Promotes nested types to top level, adjusting visibility"
    }

    fn run(&self, module: &mut Module, _ctx: &mut LinkContext) -> Result<bool> {
        let mut lifted = Vec::new();
        for &ty in &module.type_list {
            collect_nested(module, ty, &mut lifted);
        }

        for &ty in &lifted {
            let enclosing = module
                .type_def(ty)
                .enclosing
                .ok_or_else(|| structural_error!("nested type {ty} has no enclosing type"))?;
            let enclosing_public = module.type_def(enclosing).flags.is_public_visibility();

            let def = module.type_def_mut(ty);
            if def.flags.is_nested_private() {
                def.flags.set_visibility(TypeAttributes::NOT_PUBLIC);
            } else if enclosing_public {
                def.flags.set_visibility(TypeAttributes::PUBLIC);
            } else {
                def.flags.set_visibility(TypeAttributes::NOT_PUBLIC);
            }
            def.enclosing = None;
        }

        for &ty in &lifted {
            module.type_list.push(ty);
        }
        for &ty in &module.type_list.clone() {
            module.type_def_mut(ty).nested.clear();
        }

        debug!(count = lifted.len(), "flattened nested types");
        Ok(!lifted.is_empty())
    }
}

/// Depth-first collection of the nested types under `ty`, parents before
/// children so visibility adjustment sees the enclosing type's final state.
fn collect_nested(module: &Module, ty: TypeId, out: &mut Vec<TypeId>) {
    for &nested in &module.type_def(ty).nested {
        out.push(nested);
        collect_nested(module, nested, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TypeDef;

    #[test]
    fn lifts_recursively_and_adjusts_visibility() {
        let mut module = Module::new("m");
        let outer = module.add_type(TypeDef::new(None, "Outer", TypeAttributes::PUBLIC));
        let inner = module.add_nested_type(
            outer,
            TypeDef::new(None, "Inner", TypeAttributes::NESTED_PUBLIC),
        );
        let secret = module.add_nested_type(
            inner,
            TypeDef::new(None, "Secret", TypeAttributes::NESTED_PRIVATE),
        );

        let changed = FlattenPass::new()
            .run(&mut module, &mut LinkContext::default())
            .unwrap();
        assert!(changed);

        assert_eq!(module.type_list, vec![outer, inner, secret]);
        assert!(module.type_def(inner).flags.is_public_visibility());
        assert!(!module.type_def(secret).flags.is_public_visibility());
        assert!(!module.type_def(secret).flags.is_nested());
        assert!(module.type_def(outer).nested.is_empty());
    }

    #[test]
    fn nested_nonpublic_inherits_enclosing_visibility() {
        let mut module = Module::new("m");
        let outer = module.add_type(TypeDef::new(None, "Outer", TypeAttributes::NOT_PUBLIC));
        let inner = module.add_nested_type(
            outer,
            TypeDef::new(None, "Inner", TypeAttributes::NESTED_PUBLIC),
        );

        FlattenPass::new()
            .run(&mut module, &mut LinkContext::default())
            .unwrap();
        assert!(!module.type_def(inner).flags.is_public_visibility());
    }

    #[test]
    fn idempotent() {
        let mut module = Module::new("m");
        let outer = module.add_type(TypeDef::new(None, "Outer", TypeAttributes::PUBLIC));
        module.add_nested_type(
            outer,
            TypeDef::new(None, "Inner", TypeAttributes::NESTED_PUBLIC),
        );

        let pass = FlattenPass::new();
        let mut ctx = LinkContext::default();
        assert!(pass.run(&mut module, &mut ctx).unwrap());
        let snapshot = module.type_list.clone();
        assert!(!pass.run(&mut module, &mut ctx).unwrap());
        assert_eq!(module.type_list, snapshot);
    }
}
