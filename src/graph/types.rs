//! Type definitions and their auxiliary metadata.

use crate::graph::{
    CustomAttribute, FieldId, MethodId, PrimType, TypeAttributes, TypeId, TypeRef,
};

/// Fixed byte layout of a value type (packing and total size).
///
/// Only present on blob-holder types that back bulk array initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLayout {
    /// Field packing alignment.
    pub packing: u16,
    /// Total size of the type in bytes.
    pub size: u32,
}

/// Property metadata attached to a type.
///
/// Properties are pure metadata over getter/setter methods; the trimmer
/// clears them because execution never consults them.
#[derive(Debug, Clone)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Getter method, if any.
    pub getter: Option<MethodId>,
    /// Setter method, if any.
    pub setter: Option<MethodId>,
}

/// One type definition owned by the module.
#[derive(Debug, Clone)]
pub struct TypeDef {
    /// Type name; `None` once erased.
    pub name: Option<String>,
    /// Namespace; `None` once erased or for synthesized types.
    pub namespace: Option<String>,
    /// Attribute bits.
    pub flags: TypeAttributes,
    /// Base type, absent only for interfaces and the global type.
    pub base: Option<TypeRef>,
    /// Implemented interfaces.
    pub interfaces: Vec<TypeRef>,
    /// Owned fields, in declaration order.
    pub fields: Vec<FieldId>,
    /// Owned methods, in declaration order.
    pub methods: Vec<MethodId>,
    /// Nested types; consumed by the flattening pass.
    pub nested: Vec<TypeId>,
    /// Enclosing type while still nested.
    pub enclosing: Option<TypeId>,
    /// Generic parameter names.
    pub generic_params: Vec<String>,
    /// Fixed layout for blob-holder value types.
    pub layout: Option<ClassLayout>,
    /// Underlying primitive for enum types.
    pub enum_underlying: Option<PrimType>,
    /// Property metadata.
    pub properties: Vec<Property>,
    /// Custom attribute annotations.
    pub custom_attributes: Vec<CustomAttribute>,
}

impl TypeDef {
    /// Creates a named type with the given flags and no members.
    #[must_use]
    pub fn new(namespace: Option<&str>, name: &str, flags: TypeAttributes) -> Self {
        TypeDef {
            name: Some(name.to_string()),
            namespace: namespace.map(str::to_string),
            flags,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            nested: Vec::new(),
            enclosing: None,
            generic_params: Vec::new(),
            layout: None,
            enum_underlying: None,
            properties: Vec::new(),
            custom_attributes: Vec::new(),
        }
    }

    /// True when the type is an enum.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.flags.contains(TypeAttributes::ENUM_SEMANTICS)
    }

    /// True when the type is a value type.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags
            .contains(TypeAttributes::VALUE_TYPE_SEMANTICS)
    }

    /// True when the type is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// Underlying primitive of an enum; `I4` when the loader left it
    /// unpopulated.
    #[must_use]
    pub fn underlying_primitive(&self) -> PrimType {
        self.enum_underlying.unwrap_or(PrimType::I4)
    }

    /// Full display name (`Namespace.Name`) for diagnostics.
    #[must_use]
    pub fn full_name(&self) -> String {
        match (&self.namespace, &self.name) {
            (Some(ns), Some(n)) if !ns.is_empty() => format!("{ns}.{n}"),
            (_, Some(n)) => n.clone(),
            _ => "<unnamed>".to_string(),
        }
    }
}
