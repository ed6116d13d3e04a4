//! Custom-attribute stripping.
//!
//! Attribute annotations are pure metadata; execution never consults them.
//! Dropping them before the blob merger and closure keeps attribute
//! constructor references from retaining otherwise-dead members.

use tracing::debug;

use crate::{
    graph::Module,
    passes::{LinkContext, ModulePass},
    Result,
};

/// Clears custom attributes from the module and every member.
pub struct StripAttributesPass;

impl Default for StripAttributesPass {
    fn default() -> Self {
        Self::new()
    }
}

impl StripAttributesPass {
    /// Creates the attribute-stripping pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for StripAttributesPass {
    fn name(&self) -> &'static str {
        "strip-attributes"
    }

    fn description(&self) -> &'static str {
        "Drops custom-attribute annotations from the module and all members"
    }

    fn run(&self, module: &mut Module, _ctx: &mut LinkContext) -> Result<bool> {
        let mut cleared = module.custom_attributes.len();
        module.custom_attributes.clear();

        for ty in module.type_list.clone() {
            cleared += module.type_def(ty).custom_attributes.len();
            module.type_def_mut(ty).custom_attributes.clear();

            for f in module.type_def(ty).fields.clone() {
                cleared += module.field(f).custom_attributes.len();
                module.field_mut(f).custom_attributes.clear();
            }
            for m in module.type_def(ty).methods.clone() {
                cleared += module.method(m).custom_attributes.len();
                module.method_mut(m).custom_attributes.clear();
            }
        }

        debug!(cleared, "stripped custom attributes");
        Ok(cleared > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        CustomAttribute, MethodRef, MethodSignature, PrimType, TypeAttributes, TypeDef, TypeRef,
    };

    #[test]
    fn clears_every_level() {
        let mut module = Module::new("m");
        let ext = module.ensure_ext_type("System", "ObsoleteAttribute", "corlib", false);
        let ctor = module.add_ext_method(
            ext,
            ".ctor",
            MethodSignature::instance(TypeRef::Primitive(PrimType::Void), vec![]),
        );
        let attr = || CustomAttribute {
            ctor: MethodRef::External(ctor),
            blob: vec![0x01, 0x00],
        };

        module.custom_attributes.push(attr());
        let ty = module.add_type(TypeDef::new(None, "A", TypeAttributes::NOT_PUBLIC));
        module.type_def_mut(ty).custom_attributes.push(attr());

        let changed = StripAttributesPass::new()
            .run(&mut module, &mut LinkContext::default())
            .unwrap();
        assert!(changed);
        assert!(module.custom_attributes.is_empty());
        assert!(module.type_def(ty).custom_attributes.is_empty());
    }
}
