//! Field and method definitions, external references, and constants.

use crate::graph::{
    Body, ExtTypeId, FieldAttributes, MethodAttributes, MethodRef, MethodSignature, TypeId,
    TypeRef,
};

/// A compile-time constant value attached to a literal field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    /// 32-bit integer constant.
    I4(i32),
    /// 64-bit integer constant.
    I8(i64),
    /// 64-bit float constant.
    R8(f64),
}

/// A custom attribute annotation (constructor reference plus encoded
/// argument blob). Cleared wholesale by the attribute stripper.
#[derive(Debug, Clone)]
pub struct CustomAttribute {
    /// The attribute constructor.
    pub ctor: MethodRef,
    /// Encoded fixed and named arguments.
    pub blob: Vec<u8>,
}

/// One field definition owned by the module.
#[derive(Debug, Clone)]
pub struct Field {
    /// Field name; `None` once erased.
    pub name: Option<String>,
    /// Declared type.
    pub ty: TypeRef,
    /// Attribute bits.
    pub flags: FieldAttributes,
    /// Constant value for literal fields.
    pub constant: Option<Constant>,
    /// Raw initialization bytes for RVA-backed fields (array-init blobs).
    pub rva_data: Option<Vec<u8>>,
    /// The declaring type.
    pub declaring: TypeId,
    /// Custom attribute annotations.
    pub custom_attributes: Vec<CustomAttribute>,
}

impl Field {
    /// Creates a field with the given name, type and flags. The declaring
    /// type is assigned when the field is added to the module.
    #[must_use]
    pub fn new(name: &str, ty: TypeRef, flags: FieldAttributes) -> Self {
        Field {
            name: Some(name.to_string()),
            ty,
            flags,
            constant: None,
            rva_data: None,
            declaring: TypeId(u32::MAX),
            custom_attributes: Vec::new(),
        }
    }

    /// True for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldAttributes::STATIC)
    }
}

/// One method definition owned by the module.
#[derive(Debug, Clone)]
pub struct Method {
    /// Method name; `None` once erased.
    pub name: Option<String>,
    /// Attribute bits.
    pub flags: MethodAttributes,
    /// Return type and ordered parameter types.
    pub signature: MethodSignature,
    /// Declared parameter names; cleared by the trimmer.
    pub param_names: Vec<Option<String>>,
    /// The body, absent for abstract methods.
    pub body: Option<Body>,
    /// Marked for removal-by-substitution at every call site.
    pub inline_target: bool,
    /// Explicit interface implementation; excluded from implicit
    /// interface-method pairing.
    pub explicit_impl: bool,
    /// The declaring type.
    pub declaring: TypeId,
    /// Custom attribute annotations.
    pub custom_attributes: Vec<CustomAttribute>,
}

impl Method {
    /// Creates a method with the given name, flags and signature. The
    /// declaring type is assigned when the method is added to the module.
    #[must_use]
    pub fn new(name: &str, flags: MethodAttributes, signature: MethodSignature) -> Self {
        let param_names = vec![None; signature.params.len()];
        Method {
            name: Some(name.to_string()),
            flags,
            signature,
            param_names,
            body: None,
            inline_target: false,
            explicit_impl: false,
            declaring: TypeId(u32::MAX),
            custom_attributes: Vec::new(),
        }
    }

    /// True for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }

    /// True for virtual methods.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodAttributes::VIRTUAL)
    }

    /// True for constructors and other members whose name the runtime
    /// depends on.
    #[must_use]
    pub fn is_special_name(&self) -> bool {
        self.flags
            .intersects(MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME)
    }

    /// True for static constructors.
    #[must_use]
    pub fn is_static_constructor(&self) -> bool {
        self.is_static()
            && self.flags.contains(MethodAttributes::RT_SPECIAL_NAME)
            && self.name.as_deref() == Some(".cctor")
    }

    /// Name for diagnostics, tolerating erased names.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

/// A type outside this module. Always resolvable, never trimmed or renamed.
#[derive(Debug, Clone)]
pub struct ExtType {
    /// Type name.
    pub name: String,
    /// Namespace.
    pub namespace: String,
    /// Name of the assembly that owns the type.
    pub assembly: String,
    /// True for external value types (affects signature encoding).
    pub value_type: bool,
}

impl ExtType {
    /// Full display name (`Namespace.Name`).
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// A field of an external type.
#[derive(Debug, Clone)]
pub struct ExtField {
    /// Field name.
    pub name: String,
    /// Declared type.
    pub ty: TypeRef,
    /// The declaring external type.
    pub declaring: ExtTypeId,
}

/// A method of an external type.
#[derive(Debug, Clone)]
pub struct ExtMethod {
    /// Method name.
    pub name: String,
    /// Return type and ordered parameter types.
    pub signature: MethodSignature,
    /// The declaring external type.
    pub declaring: ExtTypeId,
}
