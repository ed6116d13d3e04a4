//! The module graph: the in-memory representation the linker transforms.
//!
//! A [`Module`] owns every type, field and method definition in arena
//! collections and hands out stable integer handles; cross-references are
//! tagged unions over those handles (see [`TypeRef`], [`FieldRef`],
//! [`MethodRef`]). Method bodies are stack-machine instruction streams whose
//! branch operands reference instruction identity, never numeric offsets.
//!
//! # Key Types
//! - [`Module`] - arena owner and entry point
//! - [`TypeDef`], [`Field`], [`Method`], [`Body`], [`Instruction`]
//! - [`TypeRef`] / [`FieldRef`] / [`MethodRef`] - reference unions
//! - [`MethodSignature`] - structural signature descriptor
//!
//! # Example
//! ```rust
//! use cilshrink::graph::*;
//!
//! let mut module = Module::new("app");
//! let ty = module.add_type(TypeDef::new(Some("App"), "Program", TypeAttributes::PUBLIC));
//! let mut main = Method::new(
//!     "Main",
//!     MethodAttributes::PUBLIC | MethodAttributes::STATIC,
//!     MethodSignature::stat(TypeRef::Primitive(PrimType::Void), vec![]),
//! );
//! let mut body = Body::new();
//! body.push(Opcode::Ret, Operand::None);
//! main.body = Some(body);
//! module.add_method(ty, main);
//! ```

mod body;
mod flags;
mod handles;
mod instruction;
mod member;
mod module;
mod refs;
mod signature;
mod types;

pub use body::Body;
pub use flags::{
    FieldAttributes, MethodAttributes, TypeAttributes, FIELD_ACCESS_MASK, METHOD_ACCESS_MASK,
    TYPE_VISIBILITY_MASK,
};
pub use handles::{ExtFieldId, ExtMethodId, ExtTypeId, FieldId, InstrId, MethodId, TypeId};
pub use instruction::{FlowType, Instruction, Opcode, Operand};
pub use member::{Constant, CustomAttribute, ExtField, ExtMethod, ExtType, Field, Method};
pub use module::Module;
pub use refs::{FieldRef, MethodRef, PrimType, TypeRef};
pub use signature::MethodSignature;
pub use types::{ClassLayout, Property, TypeDef};
