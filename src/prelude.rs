//! Convenient re-exports of the most commonly used types.
//!
//! Import this module to get quick access to everything a typical build
//! driver touches.
//!
//! # Example
//!
//! ```rust,no_run
//! use cilshrink::prelude::*;
//!
//! let mut linker = Linker::new(Module::new("app"));
//! let image = linker.build(&BuildOptions::default())?;
//! # Ok::<(), cilshrink::Error>(())
//! ```

/// The main error type for all linker operations.
pub use crate::Error;

/// Detail carried by inliner rejections.
pub use crate::InlineRejection;

/// The result type used throughout the crate.
pub use crate::Result;

/// The one-shot build driver and its inputs.
pub use crate::{BuildOptions, Linker};

/// The finished image bytes.
pub use crate::BinaryImage;

/// Root-set entries handed to [`BuildOptions`].
pub use crate::passes::RootSpec;

/// The module graph and its handle types.
pub use crate::graph::{
    Body, Field, FieldId, FieldRef, Instruction, Method, MethodId, MethodRef, MethodSignature,
    Module, Opcode, Operand, PrimType, TypeDef, TypeId, TypeRef,
};

/// Attribute bit sets.
pub use crate::graph::{FieldAttributes, MethodAttributes, TypeAttributes};
