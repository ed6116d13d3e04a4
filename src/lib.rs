#![deny(missing_docs)]

//! # cilshrink
//!
//! A size-minimizing linker for CIL-style binary modules, built in pure Rust.
//! `cilshrink` takes a loader-populated module graph, computes the exact set
//! of members a declared root set can reach, substitutes marked call sites
//! inline, deletes everything unreachable, and serializes the survivors into
//! the smallest PE/ECMA-335 image it knows how to produce.
//!
//! ## Features
//!
//! - **Reachability trimming** - a monotone closure over the module graph
//!   keeps exactly the types, fields and methods the roots require
//! - **Call-site inlining** - methods marked by the loader are substituted
//!   into their call sites and removed from the output
//! - **Metadata erasure** - names that dispatch never consults are deleted;
//!   survivors are renamed to suffixes of strings the heap already carries
//! - **Minimal serialization** - one `.text` section, the smallest legal
//!   header shapes, short branch forms wherever displacements allow
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cilshrink::prelude::*;
//!
//! # fn load() -> Module { Module::new("app") }
//! # fn entry_point(_m: &Module) -> cilshrink::graph::MethodId { unreachable!() }
//! let module: Module = load();
//! let main = entry_point(&module);
//!
//! let options = BuildOptions {
//!     roots: vec![RootSpec::Method(main)],
//!     ..BuildOptions::default()
//! };
//! let image = Linker::new(module).build(&options)?;
//! std::fs::write("app.min.dll", &*image)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`graph`] - the arena-owned module graph the passes transform
//! - [`passes`] - the fixed transformation pipeline and its shared context
//! - [`Linker`] / [`BuildOptions`] - the one-shot build driver
//! - [`verify`] - structural checks run after body-rewriting passes
//! - [`BinaryImage`] - the finished PE image bytes
//!
//! The pipeline is deliberately not a fixpoint engine: each pass runs once,
//! in a fixed order the driver owns. See [`passes`] for the ordering contract.

#[macro_use]
pub(crate) mod error;

/// Shared factory helpers for unit tests.
#[cfg(test)]
pub(crate) mod test;

pub mod prelude;

pub mod graph;
pub mod passes;
pub mod verify;

mod linker;
pub(crate) mod write;

pub use error::{Error, InlineRejection};
pub use linker::{BuildOptions, Linker};
pub use write::BinaryImage;

/// `cilshrink` result type, used by every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, Error>;
