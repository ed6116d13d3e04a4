//! Trimming: delete unreachable members, erase non-essential names.
//!
//! Consumes the referenced sets computed by the closure. Types outside the
//! closure are deleted outright, or kept as empty shells when the caller
//! asked for the output container to preserve them. Retained types lose the
//! fields that are neither constant nor referenced, their unreferenced
//! methods, all property metadata and all parameter names.
//!
//! Name erasure follows what a runtime loader actually needs: field names go
//! away except on delegate-like types, method names survive only on
//! special-name members and on virtual methods still paired by name and
//! signature with a base-chain or interface counterpart. A virtual method
//! that matches nothing on either side is never dispatched by name and loses
//! it.

use std::collections::HashSet;

use tracing::debug;

use crate::{
    graph::{ExtTypeId, MethodId, Module, TypeId, TypeRef},
    passes::{LinkContext, ModulePass},
    Result,
};

/// Deletes everything outside the closure and erases disposable metadata.
pub struct TrimPass;

impl Default for TrimPass {
    fn default() -> Self {
        Self::new()
    }
}

impl TrimPass {
    /// Creates the trimming pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for TrimPass {
    fn name(&self) -> &'static str {
        "trim"
    }

    fn description(&self) -> &'static str {
        "Deletes unreachable members and erases non-essential names"
    }

    fn run(&self, module: &mut Module, ctx: &mut LinkContext) -> Result<bool> {
        let mut removed_types = 0usize;
        let mut removed_members = 0usize;

        if ctx.remove_other_types {
            let before = module.type_list.len();
            let referenced = &ctx.referenced.types;
            module.type_list.retain(|t| referenced.contains(t));
            removed_types = before - module.type_list.len();
        }

        let dispatch = dispatch_bound_methods(module);
        for ty in module.type_list.clone() {
            removed_members += trim_type(module, ctx, ty, &dispatch);
        }

        debug!(
            removed_types,
            removed_members,
            shells = !ctx.remove_other_types,
            "trimmed module"
        );
        Ok(removed_types > 0 || removed_members > 0)
    }
}

/// Trims one retained (or shell) type in place. Returns the number of
/// members dropped.
fn trim_type(
    module: &mut Module,
    ctx: &LinkContext,
    ty: TypeId,
    dispatch: &HashSet<MethodId>,
) -> usize {
    let mut dropped = 0usize;
    let delegate_like = is_delegate_like(module, ty);

    let fields = module.type_def(ty).fields.clone();
    let mut kept_fields = Vec::with_capacity(fields.len());
    for f in fields {
        let field = module.field(f);
        if ctx.referenced.fields.contains(&f) || field.constant.is_some() {
            kept_fields.push(f);
        } else {
            dropped += 1;
        }
    }
    for &f in &kept_fields {
        if !delegate_like {
            module.field_mut(f).name = None;
        }
    }
    module.type_def_mut(ty).fields = kept_fields;

    let methods = module.type_def(ty).methods.clone();
    let mut kept_methods = Vec::with_capacity(methods.len());
    for m in methods {
        if ctx.referenced.methods.contains(&m) {
            kept_methods.push(m);
        } else {
            dropped += 1;
        }
    }
    for &m in &kept_methods {
        let keep_name = module.method(m).is_special_name() || dispatch.contains(&m);
        let method = module.method_mut(m);
        for name in &mut method.param_names {
            *name = None;
        }
        if !keep_name {
            method.name = None;
        }
    }
    module.type_def_mut(ty).methods = kept_methods;

    module.type_def_mut(ty).properties.clear();
    dropped
}

/// Collects the virtual methods whose names implicit dispatch still resolves
/// through: both sides of a name-and-signature match between a type and its
/// base chain or interface list, and the owned side of a match against an
/// external base or interface.
fn dispatch_bound_methods(module: &Module) -> HashSet<MethodId> {
    let mut bound = HashSet::new();
    for &ty in &module.type_list {
        let mut cursor = module.type_def(ty).base;
        loop {
            match cursor {
                Some(TypeRef::Definition(b)) => {
                    pair_owned(module, ty, b, &mut bound);
                    cursor = module.type_def(b).base;
                }
                Some(TypeRef::External(e)) => {
                    pair_external(module, ty, e, &mut bound);
                    break;
                }
                _ => break,
            }
        }
        for iface in module.type_def(ty).interfaces.clone() {
            match iface {
                TypeRef::Definition(i) => pair_owned(module, ty, i, &mut bound),
                TypeRef::External(e) => pair_external(module, ty, e, &mut bound),
                TypeRef::Primitive(_) => {}
            }
        }
    }
    bound
}

fn pair_owned(module: &Module, ty: TypeId, other: TypeId, bound: &mut HashSet<MethodId>) {
    for &m in &module.type_def(ty).methods {
        let method = module.method(m);
        if !method.is_virtual() || method.explicit_impl {
            continue;
        }
        let Some(name) = method.name.as_deref() else {
            continue;
        };
        // The counterpart side is not required to be virtual: owned
        // interface declarations may not carry the flag.
        for &om in &module.type_def(other).methods {
            let counterpart = module.method(om);
            if counterpart.name.as_deref() == Some(name)
                && counterpart.signature == method.signature
            {
                bound.insert(m);
                bound.insert(om);
            }
        }
    }
}

fn pair_external(module: &Module, ty: TypeId, ext: ExtTypeId, bound: &mut HashSet<MethodId>) {
    for &m in &module.type_def(ty).methods {
        let method = module.method(m);
        if !method.is_virtual() || method.explicit_impl {
            continue;
        }
        let Some(name) = method.name.as_deref() else {
            continue;
        };
        if module
            .ext_methods()
            .iter()
            .any(|em| em.declaring == ext && em.name == name && em.signature == method.signature)
        {
            bound.insert(m);
        }
    }
}

/// Delegate types are loaded through runtime machinery that inspects field
/// names, so those names stay.
fn is_delegate_like(module: &Module, ty: TypeId) -> bool {
    match module.type_def(ty).base {
        Some(TypeRef::External(e)) => {
            let ext = module.ext_type(e);
            ext.namespace == "System"
                && (ext.name == "MulticastDelegate" || ext.name == "Delegate")
        }
        _ => false,
    }
}
