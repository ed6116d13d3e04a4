//! Attribute bit sets for types, fields and methods.
//!
//! The numeric values follow the ECMA-335 attribute words so that the binary
//! image builder can emit them directly. Visibility is a masked sub-field, not
//! a set of independent bits; use the accessor helpers rather than testing the
//! raw constants. A few high bits ([`TypeAttributes::ENUM_SEMANTICS`],
//! [`TypeAttributes::VALUE_TYPE_SEMANTICS`]) are in-memory model flags outside
//! the standard's range and are masked out at serialization.

use bitflags::bitflags;

bitflags! {
    /// Attribute bits of a type definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeAttributes: u32 {
        /// Module-private top-level type.
        const NOT_PUBLIC = 0x0000_0000;
        /// Public top-level type.
        const PUBLIC = 0x0000_0001;
        /// Nested type, visible outside the enclosing type.
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested type, private to the enclosing type.
        const NESTED_PRIVATE = 0x0000_0003;
        /// Nested type, family visibility.
        const NESTED_FAMILY = 0x0000_0004;
        /// Nested type, assembly visibility.
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Nested type, family-and-assembly visibility.
        const NESTED_FAM_AND_ASSEM = 0x0000_0006;
        /// Nested type, family-or-assembly visibility.
        const NESTED_FAM_OR_ASSEM = 0x0000_0007;
        /// Fields are laid out sequentially.
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Fields are laid out at explicit offsets.
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// The type is an interface.
        const INTERFACE = 0x0000_0020;
        /// The type is abstract.
        const ABSTRACT = 0x0000_0080;
        /// The type is sealed.
        const SEALED = 0x0000_0100;
        /// The type name is special (compiler reserved).
        const SPECIAL_NAME = 0x0000_0400;
        /// The runtime should check name encoding.
        const RT_SPECIAL_NAME = 0x0000_0800;
        /// Static initializer runs lazily (beforefieldinit).
        const BEFORE_FIELD_INIT = 0x0010_0000;

        /// Model-only: the type is an enum. Masked out of the image.
        const ENUM_SEMANTICS = 0x1000_0000;
        /// Model-only: the type is a value type. Masked out of the image.
        const VALUE_TYPE_SEMANTICS = 0x2000_0000;
    }
}

/// Mask selecting the visibility sub-field of [`TypeAttributes`].
pub const TYPE_VISIBILITY_MASK: u32 = 0x0000_0007;

impl TypeAttributes {
    /// True for `NestedPrivate` visibility.
    #[must_use]
    pub fn is_nested_private(&self) -> bool {
        self.bits() & TYPE_VISIBILITY_MASK == Self::NESTED_PRIVATE.bits()
    }

    /// True for any of the nested visibility values.
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.bits() & TYPE_VISIBILITY_MASK >= Self::NESTED_PUBLIC.bits()
    }

    /// True when the type is visible outside its module (`Public` or
    /// `NestedPublic`).
    #[must_use]
    pub fn is_public_visibility(&self) -> bool {
        matches!(
            self.bits() & TYPE_VISIBILITY_MASK,
            v if v == Self::PUBLIC.bits() || v == Self::NESTED_PUBLIC.bits()
        )
    }

    /// Replaces the visibility sub-field, leaving all other bits intact.
    pub fn set_visibility(&mut self, visibility: TypeAttributes) {
        let cleared = self.bits() & !TYPE_VISIBILITY_MASK;
        *self = Self::from_bits_retain(cleared | (visibility.bits() & TYPE_VISIBILITY_MASK));
    }
}

bitflags! {
    /// Attribute bits of a field definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldAttributes: u16 {
        /// Accessible only by the parent type.
        const PRIVATE = 0x0001;
        /// Accessible by anything in the assembly.
        const ASSEMBLY = 0x0003;
        /// Accessible by the parent type and subtypes.
        const FAMILY = 0x0004;
        /// Accessible by anyone who can see the parent type.
        const PUBLIC = 0x0006;
        /// The field is static.
        const STATIC = 0x0010;
        /// The field can only be initialized, not written after init.
        const INIT_ONLY = 0x0020;
        /// Compile-time constant; the value lives in the Constant table.
        const LITERAL = 0x0040;
        /// The field name is special.
        const SPECIAL_NAME = 0x0200;
        /// The runtime depends on the field name.
        const RT_SPECIAL_NAME = 0x0400;
        /// The field has initialization data at an RVA.
        const HAS_FIELD_RVA = 0x0100;
    }
}

/// Mask selecting the access sub-field of [`FieldAttributes`].
pub const FIELD_ACCESS_MASK: u16 = 0x0007;

impl FieldAttributes {
    /// True for `Private` access.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.bits() & FIELD_ACCESS_MASK == Self::PRIVATE.bits()
    }

    /// Replaces the access sub-field, leaving all other bits intact.
    pub fn set_access(&mut self, access: FieldAttributes) {
        let cleared = self.bits() & !FIELD_ACCESS_MASK;
        *self = Self::from_bits_retain(cleared | (access.bits() & FIELD_ACCESS_MASK));
    }
}

bitflags! {
    /// Attribute bits of a method definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAttributes: u16 {
        /// Accessible only by the parent type.
        const PRIVATE = 0x0001;
        /// Accessible by anything in the assembly.
        const ASSEMBLY = 0x0003;
        /// Accessible by the parent type and subtypes.
        const FAMILY = 0x0004;
        /// Accessible by anyone who can see the parent type.
        const PUBLIC = 0x0006;
        /// The method is static.
        const STATIC = 0x0010;
        /// The method cannot be overridden.
        const FINAL = 0x0020;
        /// The method dispatches virtually.
        const VIRTUAL = 0x0040;
        /// Hide by name and signature.
        const HIDE_BY_SIG = 0x0080;
        /// The method gets a new vtable slot instead of reusing a base slot.
        const NEW_SLOT = 0x0100;
        /// The method is abstract.
        const ABSTRACT = 0x0400;
        /// The method name is special (constructors, operators).
        const SPECIAL_NAME = 0x0800;
        /// The runtime depends on the method name.
        const RT_SPECIAL_NAME = 0x1000;
    }
}

/// Mask selecting the access sub-field of [`MethodAttributes`].
pub const METHOD_ACCESS_MASK: u16 = 0x0007;

impl MethodAttributes {
    /// True for `Private` access.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.bits() & METHOD_ACCESS_MASK == Self::PRIVATE.bits()
    }

    /// Replaces the access sub-field, leaving all other bits intact.
    pub fn set_access(&mut self, access: MethodAttributes) {
        let cleared = self.bits() & !METHOD_ACCESS_MASK;
        *self = Self::from_bits_retain(cleared | (access.bits() & METHOD_ACCESS_MASK));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_visibility_subfield() {
        let mut flags = TypeAttributes::NESTED_PRIVATE | TypeAttributes::SEALED;
        assert!(flags.is_nested_private());
        assert!(flags.is_nested());

        flags.set_visibility(TypeAttributes::NOT_PUBLIC);
        assert!(!flags.is_nested());
        assert!(flags.contains(TypeAttributes::SEALED));
    }

    #[test]
    fn method_access_replacement_keeps_flags() {
        let mut flags =
            MethodAttributes::PRIVATE | MethodAttributes::STATIC | MethodAttributes::SPECIAL_NAME;
        flags.set_access(MethodAttributes::ASSEMBLY);
        assert!(!flags.is_private());
        assert!(flags.contains(MethodAttributes::STATIC));
        assert!(flags.contains(MethodAttributes::SPECIAL_NAME));
    }
}
