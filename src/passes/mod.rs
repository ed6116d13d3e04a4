//! The transformation passes and their shared infrastructure.
//!
//! Every pass implements [`ModulePass`] and mutates the shared
//! [`crate::graph::Module`] in place. Unlike a fixpoint scheduler, the
//! pipeline is a fixed, one-shot sequence owned by [`crate::Linker`]. The
//! ordering is a hard contract (inlining must precede the reachability
//! closure so inlined-away call sites cannot keep a removed method's callees
//! alive, and the closure must precede trimming).
//!
//! Pipeline order:
//!
//! 1. [`FlattenPass`] - promote nested types to top level
//! 2. [`MergeStaticsPass`] - merge side-effect-only static types
//! 3. [`StripAttributesPass`] - drop custom-attribute metadata
//! 4. [`MergeBlobsPass`] - merge array-init blob holder types
//! 5. [`InlinePass`] - substitute marked call sites
//! 6. [`ReachabilityPass`] - compute the retained set, rewrite references
//! 7. [`TrimPass`] - delete unreachable members, erase names
//! 8. [`PeepholePass`] - local instruction simplification (optional)
//! 9. [`RenamePass`] - assign minimal donor-suffix names

use std::collections::{HashMap, HashSet};

use crate::{
    graph::{FieldId, MethodId, Module, TypeId},
    Result,
};

mod flatten;
mod inline;
mod merge_blobs;
mod merge_statics;
mod peephole;
mod reachability;
mod rename;
mod strip_attributes;
mod trim;

pub use flatten::FlattenPass;
pub use inline::InlinePass;
pub use merge_blobs::MergeBlobsPass;
pub use merge_statics::MergeStaticsPass;
pub use peephole::PeepholePass;
pub use reachability::ReachabilityPass;
pub use rename::RenamePass;
pub use strip_attributes::StripAttributesPass;
pub use trim::TrimPass;

/// A member named in the external root set: something the output must keep
/// and expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSpec {
    /// Keep a type (and everything it structurally requires).
    Type(TypeId),
    /// Keep a field.
    Field(FieldId),
    /// Keep a method.
    Method(MethodId),
}

/// The referenced sets produced by the reachability closure and consumed by
/// the trimmer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferencedSets {
    /// Referenced type definitions.
    pub types: HashSet<TypeId>,
    /// Referenced field definitions.
    pub fields: HashSet<FieldId>,
    /// Referenced method definitions.
    pub methods: HashSet<MethodId>,
}

/// Shared state threaded through the pipeline.
///
/// Carries the caller's build inputs and the inter-pass scratch results
/// (most importantly the referenced sets, written by [`ReachabilityPass`]
/// and read by [`TrimPass`]).
#[derive(Debug, Clone)]
pub struct LinkContext {
    /// Caller-declared external roots.
    pub roots: Vec<RootSpec>,
    /// Whether types outside the closure are deleted outright (`true`, the
    /// default) or kept as trimmed shells (`false`).
    pub remove_other_types: bool,
    /// Per-type renaming priority; higher values receive shorter names.
    pub name_priorities: HashMap<TypeId, i32>,
    /// Referenced sets, populated by the reachability closure.
    pub referenced: ReferencedSets,
}

impl Default for LinkContext {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            remove_other_types: true,
            name_priorities: HashMap::new(),
            referenced: ReferencedSets::default(),
        }
    }
}

/// One transformation pass over the module graph.
///
/// Passes are held as `Box<dyn ModulePass>` in the driver's fixed pipeline.
/// `run` returns whether the pass changed anything, which the driver logs.
pub trait ModulePass {
    /// Unique name for logging and verification context.
    fn name(&self) -> &'static str;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Runs the pass over the whole module.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass cannot complete; all pass errors abort
    /// the build.
    fn run(&self, module: &mut Module, ctx: &mut LinkContext) -> Result<bool>;
}
