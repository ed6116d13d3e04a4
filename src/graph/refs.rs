//! Tagged reference unions over graph entities.
//!
//! Cross-references inside signatures, bodies and type headers are one of
//! these exhaustively-matched unions rather than direct object references:
//! a reference either points at a definition owned by this module (a handle),
//! at an entry of the external reference table (always resolvable, never
//! trimmed or renamed), or at a primitive type.

use crate::graph::{ExtFieldId, ExtMethodId, ExtTypeId, FieldId, MethodId, TypeId};

/// Built-in primitive types.
///
/// The discriminants carry no encoding; the image builder maps them to their
/// `ELEMENT_TYPE_*` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimType {
    /// No value (return type only).
    Void,
    /// Boolean.
    Bool,
    /// UTF-16 code unit.
    Char,
    /// Signed 8-bit integer.
    I1,
    /// Unsigned 8-bit integer.
    U1,
    /// Signed 16-bit integer.
    I2,
    /// Unsigned 16-bit integer.
    U2,
    /// Signed 32-bit integer.
    I4,
    /// Unsigned 32-bit integer.
    U4,
    /// Signed 64-bit integer.
    I8,
    /// Unsigned 64-bit integer.
    U8,
    /// 32-bit float.
    R4,
    /// 64-bit float.
    R8,
    /// Native-width signed integer.
    I,
    /// Native-width unsigned integer.
    U,
    /// Root object type.
    Object,
    /// Immutable string type.
    String,
}

/// Reference to a type: an owned definition, an external reference, or a
/// primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A type definition owned by this module.
    Definition(TypeId),
    /// A type in the external reference table.
    External(ExtTypeId),
    /// A built-in primitive.
    Primitive(PrimType),
}

impl TypeRef {
    /// Returns the definition handle if this references an owned type.
    #[must_use]
    pub fn as_definition(&self) -> Option<TypeId> {
        match self {
            TypeRef::Definition(id) => Some(*id),
            _ => None,
        }
    }

    /// True when this is `Primitive(Void)`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Primitive(PrimType::Void))
    }
}

/// Reference to a field: owned definition or external.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// A field owned by this module.
    Definition(FieldId),
    /// A field in the external reference table.
    External(ExtFieldId),
}

/// Reference to a method: owned definition or external.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodRef {
    /// A method owned by this module.
    Definition(MethodId),
    /// A method in the external reference table.
    External(ExtMethodId),
}
