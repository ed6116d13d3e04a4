//! Stable integer handles for module graph entities.
//!
//! Every entity in the graph lives in an owning arena inside its [`crate::graph::Module`]
//! (or, for instructions, inside a method [`crate::graph::Body`]) and is addressed through
//! one of these index handles. Handles stay valid for the lifetime of the module:
//! arenas only grow, and "deletion" detaches an entry from the membership lists
//! without reusing its slot. This keeps the graph free of ownership cycles even
//! though fields and methods point back at their declaring type and instructions
//! point at member operands.

/// Handle to a type definition owned by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

/// Handle to a field definition owned by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub(crate) u32);

/// Handle to a method definition owned by the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub(crate) u32);

/// Handle to an entry in the external type reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtTypeId(pub(crate) u32);

/// Handle to an entry in the external field reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtFieldId(pub(crate) u32);

/// Handle to an entry in the external method reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtMethodId(pub(crate) u32);

/// Identity handle of one instruction within one method body.
///
/// Branch operands reference instruction identity, never a numeric offset;
/// offsets exist only transiently during final serialization. Identities are
/// allocated from a per-body counter and never reused, so they survive
/// arbitrary splicing and deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

macro_rules! impl_handle {
    ($name:ident, $tag:literal) => {
        impl $name {
            /// Raw arena index of this handle.
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($tag, "#{}"), self.0)
            }
        }
    };
}

impl_handle!(TypeId, "type");
impl_handle!(FieldId, "field");
impl_handle!(MethodId, "method");
impl_handle!(ExtTypeId, "ext-type");
impl_handle!(ExtFieldId, "ext-field");
impl_handle!(ExtMethodId, "ext-method");
impl_handle!(InstrId, "instr");
