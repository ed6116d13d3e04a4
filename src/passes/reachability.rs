//! Reachability closure and reference relinking.
//!
//! Computes the least set of owned types, fields and methods reachable from
//! the caller-declared roots plus structural obligations, and rewrites every
//! surviving reference in place:
//!
//! - external references pass through unchanged;
//! - references into the module are routed through the type-substitution map
//!   recorded by the merging passes and marked referenced;
//! - references to an owned enum are replaced by its underlying primitive,
//!   removing the enum from the graph at that use site.
//!
//! Growth rules, applied until the sets stop changing:
//!
//! - the static constructor of every referenced type;
//! - override obligations: a non-final virtual base method (or an implemented
//!   interface method) paired with this type's implicit matching override
//!   keeps the override alive the moment the base side is referenced.
//!   External bases count as already referenced; owned bases that are not yet
//!   referenced park the pairing in a pending map keyed by the base method;
//! - everything a newly referenced member's signature or body touches.
//!
//! The closure is a monotone fixed point: the final sets are identical for
//! any visitation order.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    graph::{
        ExtTypeId, FieldId, FieldRef, MethodAttributes, MethodId, MethodRef, MethodSignature,
        Module, Operand, TypeId, TypeRef,
    },
    passes::{LinkContext, ModulePass, ReferencedSets, RootSpec},
    Result,
};

/// Computes the referenced sets and relinks every surviving reference.
pub struct ReachabilityPass;

impl Default for ReachabilityPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ReachabilityPass {
    /// Creates the closure pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModulePass for ReachabilityPass {
    fn name(&self) -> &'static str {
        "reachability"
    }

    fn description(&self) -> &'static str {
        "Computes the retained member set and rewrites surviving references"
    }

    fn run(&self, module: &mut Module, ctx: &mut LinkContext) -> Result<bool> {
        let mut closure = Closure::default();

        for root in ctx.roots.clone() {
            match root {
                RootSpec::Type(t) => {
                    let t = module.substitute(t);
                    closure.mark_type(t);
                }
                RootSpec::Field(f) => closure.mark_field(module, f),
                RootSpec::Method(m) => closure.mark_method(module, m),
            }
        }
        if let Some(global) = module.global_type {
            closure.mark_type(module.substitute(global));
        }

        while let Some(item) = closure.worklist.pop() {
            match item {
                Work::Type(t) => closure.process_type(module, t)?,
                Work::Field(f) => closure.process_field(module, f),
                Work::Method(m) => closure.process_method(module, m)?,
            }
        }

        debug!(
            types = closure.referenced.types.len(),
            fields = closure.referenced.fields.len(),
            methods = closure.referenced.methods.len(),
            "computed reachability closure"
        );
        ctx.referenced = closure.referenced;
        Ok(true)
    }
}

enum Work {
    Type(TypeId),
    Field(FieldId),
    Method(MethodId),
}

/// The base side of an override obligation.
enum BaseSide {
    Owned(MethodId),
    External,
}

#[derive(Default)]
struct Closure {
    referenced: ReferencedSets,
    worklist: Vec<Work>,
    /// Override pairings waiting for their base method to become referenced.
    pending: HashMap<MethodId, Vec<MethodId>>,
}

impl Closure {
    fn mark_type(&mut self, t: TypeId) {
        if self.referenced.types.insert(t) {
            self.worklist.push(Work::Type(t));
        }
    }

    fn mark_field(&mut self, module: &Module, f: FieldId) {
        if self.referenced.fields.insert(f) {
            self.worklist.push(Work::Field(f));
            self.mark_type(module.field(f).declaring);
        }
    }

    fn mark_method(&mut self, module: &Module, m: MethodId) {
        if self.referenced.methods.insert(m) {
            self.worklist.push(Work::Method(m));
            self.mark_type(module.method(m).declaring);
            if let Some(overrides) = self.pending.remove(&m) {
                for o in overrides {
                    self.mark_method(module, o);
                }
            }
        }
    }

    /// Applies the substitution map and the enum-to-primitive rewrite to one
    /// type reference, marking whatever owned type the result points at.
    fn relink_typeref(&mut self, module: &Module, tr: TypeRef) -> TypeRef {
        match tr {
            TypeRef::Definition(id) => {
                let id = module.substitute(id);
                let def = module.type_def(id);
                if def.is_enum() {
                    TypeRef::Primitive(def.underlying_primitive())
                } else {
                    self.mark_type(id);
                    TypeRef::Definition(id)
                }
            }
            other => other,
        }
    }

    /// Relinks the type header and records the type's structural
    /// obligations.
    fn process_type(&mut self, module: &mut Module, t: TypeId) -> Result<()> {
        if let Some(base) = module.type_def(t).base {
            let base = self.relink_typeref(module, base);
            module.type_def_mut(t).base = Some(base);
        }
        let interfaces = module.type_def(t).interfaces.clone();
        let interfaces: Vec<TypeRef> = interfaces
            .into_iter()
            .map(|i| self.relink_typeref(module, i))
            .collect();
        module.type_def_mut(t).interfaces = interfaces;

        if let Some(cctor) = module.static_constructor(t) {
            self.mark_method(module, cctor);
        }

        for (base, implementor) in override_obligations(module, t) {
            match base {
                BaseSide::External => self.mark_method(module, implementor),
                BaseSide::Owned(b) if self.referenced.methods.contains(&b) => {
                    self.mark_method(module, implementor);
                }
                BaseSide::Owned(b) => {
                    self.pending.entry(b).or_default().push(implementor);
                }
            }
        }
        Ok(())
    }

    fn process_field(&mut self, module: &mut Module, f: FieldId) {
        let ty = module.field(f).ty;
        let ty = self.relink_typeref(module, ty);
        module.field_mut(f).ty = ty;
    }

    /// Relinks the signature, local slots and every body operand, marking
    /// each owned member the body touches.
    fn process_method(&mut self, module: &mut Module, m: MethodId) -> Result<()> {
        let sig = module.method(m).signature.clone();
        let sig = MethodSignature {
            instance: sig.instance,
            ret: self.relink_typeref(module, sig.ret),
            params: sig
                .params
                .into_iter()
                .map(|p| self.relink_typeref(module, p))
                .collect(),
        };
        module.method_mut(m).signature = sig;

        let Some(mut body) = module.method_mut(m).body.take() else {
            return Ok(());
        };
        for local in &mut body.locals {
            *local = self.relink_typeref(module, *local);
        }
        for instr in &mut body.instructions {
            match instr.operand {
                Operand::Field(FieldRef::Definition(f)) => self.mark_field(module, f),
                Operand::Method(MethodRef::Definition(callee)) => {
                    self.mark_method(module, callee);
                }
                Operand::Type(tr) => {
                    instr.operand = Operand::Type(self.relink_typeref(module, tr));
                }
                _ => {}
            }
        }
        module.method_mut(m).body = Some(body);
        Ok(())
    }
}

/// Pairs each non-final virtual base-chain method and each implemented
/// interface method with this type's implicit matching override.
///
/// A match is name plus structural signature equality on a virtual method
/// that is not an explicit implementation; base-chain matches additionally
/// must not claim a new slot.
fn override_obligations(module: &Module, t: TypeId) -> Vec<(BaseSide, MethodId)> {
    let mut pairs = Vec::new();

    let mut cursor = module.type_def(t).base;
    loop {
        match cursor {
            Some(TypeRef::Definition(b)) => {
                for &bm in &module.type_def(b).methods {
                    let base = module.method(bm);
                    if !base.is_virtual() || base.flags.contains(MethodAttributes::FINAL) {
                        continue;
                    }
                    if let Some(o) = implicit_match(module, t, base.name.as_deref(), &base.signature, true)
                    {
                        pairs.push((BaseSide::Owned(bm), o));
                    }
                }
                cursor = module.type_def(b).base;
            }
            Some(TypeRef::External(e)) => {
                pair_external(module, t, e, true, &mut pairs);
                break;
            }
            _ => break,
        }
    }

    for iface in &module.type_def(t).interfaces {
        match *iface {
            TypeRef::Definition(i) => {
                for &im in &module.type_def(i).methods {
                    let decl = module.method(im);
                    if let Some(o) =
                        implicit_match(module, t, decl.name.as_deref(), &decl.signature, false)
                    {
                        pairs.push((BaseSide::Owned(im), o));
                    }
                }
            }
            TypeRef::External(e) => pair_external(module, t, e, false, &mut pairs),
            TypeRef::Primitive(_) => {}
        }
    }

    pairs
}

/// Matches against the members of an external base or interface, which count
/// as always referenced.
fn pair_external(
    module: &Module,
    t: TypeId,
    ext: ExtTypeId,
    base_chain: bool,
    pairs: &mut Vec<(BaseSide, MethodId)>,
) {
    for em in module.ext_methods() {
        if em.declaring != ext {
            continue;
        }
        if let Some(o) = implicit_match(module, t, Some(&em.name), &em.signature, base_chain) {
            pairs.push((BaseSide::External, o));
        }
    }
}

fn implicit_match(
    module: &Module,
    t: TypeId,
    name: Option<&str>,
    sig: &MethodSignature,
    require_reused_slot: bool,
) -> Option<MethodId> {
    let name = name?;
    module
        .type_def(t)
        .methods
        .iter()
        .copied()
        .find(|&m| {
            let method = module.method(m);
            method.name.as_deref() == Some(name)
                && method.signature == *sig
                && method.is_virtual()
                && !method.explicit_impl
                && !(require_reused_slot && method.flags.contains(MethodAttributes::NEW_SLOT))
        })
}
