//! The module graph: arena owner of every type, field and method definition.

use std::collections::HashMap;

use crate::graph::{
    CustomAttribute, ExtField, ExtFieldId, ExtMethod, ExtMethodId, ExtType, ExtTypeId, Field,
    FieldId, Method, MethodId, MethodRef, MethodSignature, TypeDef, TypeId, TypeRef,
};

/// An in-memory binary module: the unit the linker transforms.
///
/// All entity data lives in owning arenas inside the module; everything else
/// refers to entities through stable handles ([`TypeId`], [`FieldId`],
/// [`MethodId`] and the external-reference handles). Arenas never shrink:
/// deleting a member detaches it from the membership lists
/// ([`Module::type_list`], [`TypeDef::fields`], [`TypeDef::methods`]) while
/// its slot remains, so outstanding handles stay valid for diagnostics.
///
/// The module is populated once by a loader and then mutated destructively by
/// the pass pipeline; see [`crate::Linker`].
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name.
    pub name: String,
    /// Top-level type membership, in declaration order. Index 0 is the
    /// global type when one is present.
    pub type_list: Vec<TypeId>,
    /// The global (module) type, if present.
    pub global_type: Option<TypeId>,
    /// Strings already present in the module's string data whose suffixes the
    /// renamer may borrow. Seeded by the loader, typically from
    /// external-reference names.
    pub donor_strings: Vec<String>,
    /// Module-level custom attribute annotations.
    pub custom_attributes: Vec<CustomAttribute>,

    types: Vec<TypeDef>,
    fields: Vec<Field>,
    methods: Vec<Method>,
    ext_types: Vec<ExtType>,
    ext_fields: Vec<ExtField>,
    ext_methods: Vec<ExtMethod>,

    /// Uniform type replacements recorded by merging passes and applied by
    /// the reachability relinker.
    pub(crate) substitutions: HashMap<TypeId, TypeId>,
}

impl Module {
    /// Creates an empty module with the given name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            type_list: Vec::new(),
            global_type: None,
            donor_strings: Vec::new(),
            custom_attributes: Vec::new(),
            types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            ext_types: Vec::new(),
            ext_fields: Vec::new(),
            ext_methods: Vec::new(),
            substitutions: HashMap::new(),
        }
    }

    // ---- definitions ----------------------------------------------------

    /// Adds a top-level type, returning its handle.
    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        let id = self.add_type_detached(def);
        self.type_list.push(id);
        id
    }

    /// Adds a type to the arena without entering it in the top-level list.
    /// Used for nested types (entered via their enclosing type) and for
    /// synthesized types that are inserted at a specific position.
    pub fn add_type_detached(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(u32::try_from(self.types.len()).unwrap_or(u32::MAX));
        self.types.push(def);
        id
    }

    /// Adds a nested type under `enclosing`, returning its handle.
    pub fn add_nested_type(&mut self, enclosing: TypeId, mut def: TypeDef) -> TypeId {
        def.enclosing = Some(enclosing);
        let id = self.add_type_detached(def);
        self.types[enclosing.index()].nested.push(id);
        id
    }

    /// Adds a field to `ty`, returning its handle.
    pub fn add_field(&mut self, ty: TypeId, mut field: Field) -> FieldId {
        field.declaring = ty;
        let id = FieldId(u32::try_from(self.fields.len()).unwrap_or(u32::MAX));
        self.fields.push(field);
        self.types[ty.index()].fields.push(id);
        id
    }

    /// Adds a method to `ty`, returning its handle.
    pub fn add_method(&mut self, ty: TypeId, mut method: Method) -> MethodId {
        method.declaring = ty;
        let id = MethodId(u32::try_from(self.methods.len()).unwrap_or(u32::MAX));
        self.methods.push(method);
        self.types[ty.index()].methods.push(id);
        id
    }

    /// The type definition behind a handle.
    #[must_use]
    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    /// Mutable access to a type definition.
    pub fn type_def_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.types[id.index()]
    }

    /// The field behind a handle.
    #[must_use]
    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.index()]
    }

    /// Mutable access to a field.
    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.index()]
    }

    /// The method behind a handle.
    #[must_use]
    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.index()]
    }

    /// Mutable access to a method.
    pub fn method_mut(&mut self, id: MethodId) -> &mut Method {
        &mut self.methods[id.index()]
    }

    /// Number of type arena slots (including detached ones).
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Whether a type handle is within the arena.
    #[must_use]
    pub fn contains_type(&self, id: TypeId) -> bool {
        id.index() < self.types.len()
    }

    /// Whether a field handle is within the arena.
    #[must_use]
    pub fn contains_field(&self, id: FieldId) -> bool {
        id.index() < self.fields.len()
    }

    /// Whether a method handle is within the arena.
    #[must_use]
    pub fn contains_method(&self, id: MethodId) -> bool {
        id.index() < self.methods.len()
    }

    /// Every method attached to a top-level type, in declaration order.
    #[must_use]
    pub fn attached_methods(&self) -> Vec<MethodId> {
        let mut out = Vec::new();
        for &ty in &self.type_list {
            out.extend_from_slice(&self.types[ty.index()].methods);
        }
        out
    }

    /// The static constructor of a type, if it has one.
    #[must_use]
    pub fn static_constructor(&self, ty: TypeId) -> Option<MethodId> {
        self.types[ty.index()]
            .methods
            .iter()
            .copied()
            .find(|&m| self.methods[m.index()].is_static_constructor())
    }

    /// Finds a method of `ty` whose name and signature structurally match.
    #[must_use]
    pub fn find_method(&self, ty: TypeId, name: &str, sig: &MethodSignature) -> Option<MethodId> {
        self.types[ty.index()].methods.iter().copied().find(|&m| {
            let method = &self.methods[m.index()];
            method.name.as_deref() == Some(name) && method.signature == *sig
        })
    }

    // ---- external references --------------------------------------------

    /// Adds an external type reference, reusing an existing identical entry.
    pub fn ensure_ext_type(
        &mut self,
        namespace: &str,
        name: &str,
        assembly: &str,
        value_type: bool,
    ) -> ExtTypeId {
        if let Some(idx) = self
            .ext_types
            .iter()
            .position(|t| t.namespace == namespace && t.name == name && t.assembly == assembly)
        {
            return ExtTypeId(idx as u32);
        }
        let id = ExtTypeId(self.ext_types.len() as u32);
        self.ext_types.push(ExtType {
            name: name.to_string(),
            namespace: namespace.to_string(),
            assembly: assembly.to_string(),
            value_type,
        });
        id
    }

    /// Adds an external field reference, returning its handle.
    pub fn add_ext_field(&mut self, declaring: ExtTypeId, name: &str, ty: TypeRef) -> ExtFieldId {
        let id = ExtFieldId(self.ext_fields.len() as u32);
        self.ext_fields.push(ExtField {
            name: name.to_string(),
            ty,
            declaring,
        });
        id
    }

    /// Adds an external method reference, returning its handle.
    pub fn add_ext_method(
        &mut self,
        declaring: ExtTypeId,
        name: &str,
        signature: MethodSignature,
    ) -> ExtMethodId {
        let id = ExtMethodId(self.ext_methods.len() as u32);
        self.ext_methods.push(ExtMethod {
            name: name.to_string(),
            signature,
            declaring,
        });
        id
    }

    /// The external type behind a handle.
    #[must_use]
    pub fn ext_type(&self, id: ExtTypeId) -> &ExtType {
        &self.ext_types[id.index()]
    }

    /// The external field behind a handle.
    #[must_use]
    pub fn ext_field(&self, id: ExtFieldId) -> &ExtField {
        &self.ext_fields[id.index()]
    }

    /// The external method behind a handle.
    #[must_use]
    pub fn ext_method(&self, id: ExtMethodId) -> &ExtMethod {
        &self.ext_methods[id.index()]
    }

    /// All external types, in table order.
    #[must_use]
    pub fn ext_types(&self) -> &[ExtType] {
        &self.ext_types
    }

    /// All external fields, in table order.
    #[must_use]
    pub fn ext_fields(&self) -> &[ExtField] {
        &self.ext_fields
    }

    /// All external methods, in table order.
    #[must_use]
    pub fn ext_methods(&self) -> &[ExtMethod] {
        &self.ext_methods
    }

    /// The signature behind a method reference.
    #[must_use]
    pub fn method_signature(&self, m: MethodRef) -> &MethodSignature {
        match m {
            MethodRef::Definition(id) => &self.methods[id.index()].signature,
            MethodRef::External(id) => &self.ext_methods[id.index()].signature,
        }
    }

    // ---- substitutions ---------------------------------------------------

    /// Records a uniform type replacement, applied to every reference by the
    /// reachability relinker.
    pub fn record_substitution(&mut self, from: TypeId, to: TypeId) {
        self.substitutions.insert(from, to);
    }

    /// Resolves a type handle through the substitution map (chains allowed).
    #[must_use]
    pub fn substitute(&self, mut id: TypeId) -> TypeId {
        // Substitution chains are short (merge passes run once); the bound
        // guards against an accidental cycle.
        for _ in 0..self.substitutions.len() + 1 {
            match self.substitutions.get(&id) {
                Some(&next) => id = next,
                None => break,
            }
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{FieldAttributes, MethodAttributes, PrimType, TypeAttributes};

    #[test]
    fn arena_handles_stay_valid_after_detach() {
        let mut module = Module::new("m");
        let ty = module.add_type(TypeDef::new(None, "A", TypeAttributes::NOT_PUBLIC));
        let f = module.add_field(
            ty,
            Field::new(
                "x",
                TypeRef::Primitive(PrimType::I4),
                FieldAttributes::PRIVATE,
            ),
        );
        let m = module.add_method(
            ty,
            Method::new(
                "M",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                MethodSignature::stat(TypeRef::Primitive(PrimType::Void), vec![]),
            ),
        );

        module.type_def_mut(ty).fields.clear();
        module.type_def_mut(ty).methods.clear();

        // Detached members remain addressable.
        assert_eq!(module.field(f).name.as_deref(), Some("x"));
        assert_eq!(module.method(m).name.as_deref(), Some("M"));
        assert_eq!(module.field(f).declaring, ty);
    }

    #[test]
    fn ext_type_dedup() {
        let mut module = Module::new("m");
        let a = module.ensure_ext_type("System", "Object", "corlib", false);
        let b = module.ensure_ext_type("System", "Object", "corlib", false);
        let c = module.ensure_ext_type("System", "ValueType", "corlib", false);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn substitution_chains_resolve() {
        let mut module = Module::new("m");
        let a = module.add_type(TypeDef::new(None, "A", TypeAttributes::NOT_PUBLIC));
        let b = module.add_type(TypeDef::new(None, "B", TypeAttributes::NOT_PUBLIC));
        let c = module.add_type(TypeDef::new(None, "C", TypeAttributes::NOT_PUBLIC));
        module.record_substitution(a, b);
        module.record_substitution(b, c);
        assert_eq!(module.substitute(a), c);
        assert_eq!(module.substitute(c), c);
    }
}
